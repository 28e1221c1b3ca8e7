//! Report assembly
//!
//! Joins the filtered resources with their enrichment into one ordered record set. The flat
//! row shape is identical for both run modes so downstream tooling never branches on it.

pub mod sink;

pub use sink::{FileSink, OutputFormat, ReportSink, S3Sink, StdoutSink};

use crate::remediate::Outcome;
use crate::resource::{ImageDescription, MatchResult, PolicyState, Resource};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Fixed column order of the tabular report
pub const REPORT_HEADER: [&str; 4] = ["resourceName", "resourceArn", "policyState", "derivedField"];

/// Column order of the per-image report
pub const IMAGE_REPORT_HEADER: [&str; 4] = ["repositoryName", "imageTag", "imageDigest", "imageSizeInBytes"];

/// Which enrichment step a run performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Count images per repository
    Inventory,
    /// Set tag immutability
    Remediate,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Inventory => f.write_str("inventory"),
            RunMode::Remediate => f.write_str("remediate"),
        }
    }
}

/// What was learned about one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enrichment {
    ImageCount(u64),
    /// Count plus the summed size of the distinct digests
    ImageInventory { count: u64, total_bytes: u64 },
    /// The count could not be established for this resource only
    CountUnavailable(String),
    Remediation(Outcome),
}

impl fmt::Display for Enrichment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Enrichment::ImageCount(n) => write!(f, "{n}"),
            Enrichment::ImageInventory { count, .. } => write!(f, "{count}"),
            Enrichment::CountUnavailable(reason) => write!(f, "count unavailable: {reason}"),
            Enrichment::Remediation(outcome) => write!(f, "{outcome}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichedRecord {
    pub matched: MatchResult,
    pub enrichment: Enrichment,
}

impl EnrichedRecord {
    pub fn resource(&self) -> &Resource {
        &self.matched.resource
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        match &self.enrichment {
            Enrichment::Remediation(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// Policy state after this run: the state reported by a successful mutation,
    /// otherwise the state observed at listing time
    pub fn effective_policy_state(&self) -> &PolicyState {
        match self.outcome() {
            Some(Outcome::Applied { state }) => state,
            _ => &self.resource().policy_state,
        }
    }

    /// Flatten for the sink; `policyState` is the state observed at listing time in both
    /// modes, the transition itself shows up in `derivedField`
    pub fn to_row(&self) -> ReportRow {
        ReportRow {
            resource_name: self.resource().name.clone(),
            resource_arn: self.resource().arn.clone(),
            policy_state: self.resource().policy_state.to_string(),
            derived_field: self.enrichment.to_string(),
        }
    }
}

impl Enrichment {
    /// Summed image size, when the run described images
    pub fn total_bytes(&self) -> Option<u64> {
        match self {
            Enrichment::ImageInventory { total_bytes, .. } => Some(*total_bytes),
            _ => None,
        }
    }
}

/// One image line, in [`IMAGE_REPORT_HEADER`] order
///
/// An image carrying several tags yields one line per tag; an untagged one has an empty tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub repository_name: String,
    pub image_tag: String,
    pub image_digest: String,
    pub image_size_in_bytes: Option<u64>,
}

impl ImageRecord {
    /// Expand one description into its per-tag lines
    pub fn from_description(repository: &str, image: &ImageDescription) -> Vec<Self> {
        let line = |tag: &str| ImageRecord {
            repository_name: repository.to_string(),
            image_tag: tag.to_string(),
            image_digest: image.digest.clone(),
            image_size_in_bytes: image.size_bytes,
        };

        if image.tags.is_empty() {
            vec![line("")]
        } else {
            image.tags.iter().map(|t| line(t)).collect()
        }
    }
}

/// One flat report line, in [`REPORT_HEADER`] order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub resource_name: String,
    pub resource_arn: String,
    pub policy_state: String,
    pub derived_field: String,
}

/// Counts per outcome kind, for the closing summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub records: usize,
    pub total_images: u64,
    /// Only filled by runs that described images
    pub total_bytes: u64,
    pub count_unavailable: usize,
    pub applied: usize,
    pub skipped: usize,
    pub dry_run: usize,
    pub failed: usize,
}

/// The ordered result of one run
#[derive(Debug, Clone)]
pub struct Report {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub mode: RunMode,
    pub dry_run: bool,
    pub pattern: String,
    pub records: Vec<EnrichedRecord>,
    /// Per-image lines, present when the run described images
    pub images: Option<Vec<ImageRecord>>,
}

impl Report {
    /// Zip matches with their enrichment, keeping discovery order
    ///
    /// `enrichments[i]` must belong to `matches[i]`.
    pub fn assemble(
        run_id: Uuid,
        mode: RunMode,
        dry_run: bool,
        pattern: &str,
        matches: Vec<MatchResult>,
        enrichments: Vec<Enrichment>,
    ) -> Self {
        assert_eq!(
            matches.len(),
            enrichments.len(),
            "every matched resource needs exactly one enrichment"
        );

        let records = matches
            .into_iter()
            .zip(enrichments)
            .map(|(matched, enrichment)| EnrichedRecord {
                matched,
                enrichment,
            })
            .collect();

        Self {
            run_id,
            generated_at: Utc::now(),
            mode,
            dry_run,
            pattern: pattern.to_string(),
            records,
            images: None,
        }
    }

    /// Attach the per-image lines, in discovery order
    pub fn with_images(mut self, images: Vec<ImageRecord>) -> Self {
        self.images = Some(images);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn rows(&self) -> Vec<ReportRow> {
        self.records.iter().map(EnrichedRecord::to_row).collect()
    }

    /// Records whose remediation failed, in report order
    pub fn failures(&self) -> impl Iterator<Item = &EnrichedRecord> {
        self.records
            .iter()
            .filter(|r| r.outcome().is_some_and(Outcome::is_failed))
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary {
            records: self.records.len(),
            ..Summary::default()
        };

        for record in &self.records {
            match &record.enrichment {
                Enrichment::ImageCount(n) => summary.total_images += n,
                Enrichment::ImageInventory { count, total_bytes } => {
                    summary.total_images += count;
                    summary.total_bytes += total_bytes;
                }
                Enrichment::CountUnavailable(_) => summary.count_unavailable += 1,
                Enrichment::Remediation(Outcome::Applied { .. }) => summary.applied += 1,
                Enrichment::Remediation(Outcome::Skipped { .. }) => summary.skipped += 1,
                Enrichment::Remediation(Outcome::DryRun { .. }) => summary.dry_run += 1,
                Enrichment::Remediation(Outcome::Failed { .. }) => summary.failed += 1,
            }
        }

        summary
    }
}
