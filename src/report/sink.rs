//! Report sinks
//!
//! Renders a [`Report`] as delimited text or JSON and hands it to a destination.

use super::{ImageRecord, Report, ReportRow, IMAGE_REPORT_HEADER, REPORT_HEADER};
use crate::aws::s3::S3Uploader;
use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

/// Serialization of the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
        }
    }

    fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Csv => "text/csv",
            OutputFormat::Json => "application/json",
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonReport<'a> {
    run_id: String,
    generated_at: String,
    mode: super::RunMode,
    dry_run: bool,
    pattern: &'a str,
    records: Vec<JsonRecord<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<&'a [ImageRecord]>,
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    #[serde(flatten)]
    row: ReportRow,
    #[serde(rename = "totalSizeBytes", skip_serializing_if = "Option::is_none")]
    total_size_bytes: Option<u64>,
    tags: &'a BTreeMap<String, String>,
}

/// Render the report in `format`; `delimiter` only applies to CSV
///
/// The CSV header is always written, so an empty report is a header-only file. A report
/// carrying per-image lines renders them as CSV instead of the repository rows; JSON holds both.
pub fn render(report: &Report, format: OutputFormat, delimiter: u8) -> Result<Vec<u8>> {
    match format {
        OutputFormat::Csv => {
            let mut writer = csv::WriterBuilder::new()
                .delimiter(delimiter)
                .has_headers(false)
                .from_writer(Vec::new());

            match &report.images {
                Some(images) => {
                    writer.write_record(IMAGE_REPORT_HEADER)?;
                    for image in images {
                        writer.serialize(image).context("Failed to write image row")?;
                    }
                }
                None => {
                    writer.write_record(REPORT_HEADER)?;
                    for row in report.rows() {
                        writer.serialize(row).context("Failed to write report row")?;
                    }
                }
            }
            writer.into_inner().context("Failed to flush CSV report")
        }
        OutputFormat::Json => {
            let document = JsonReport {
                run_id: report.run_id.to_string(),
                generated_at: report.generated_at.to_rfc3339(),
                mode: report.mode,
                dry_run: report.dry_run,
                pattern: &report.pattern,
                records: report
                    .records
                    .iter()
                    .map(|r| JsonRecord {
                        row: r.to_row(),
                        total_size_bytes: r.enrichment.total_bytes(),
                        tags: &r.resource().tags,
                    })
                    .collect(),
                images: report.images.as_deref(),
            };
            serde_json::to_vec_pretty(&document).context("Failed to serialize JSON report")
        }
    }
}

/// Destination for a finished report
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Persist the report; returns a human-readable location
    async fn write(&self, report: &Report) -> Result<String>;
}

/// Local file
#[derive(Debug, Clone)]
pub struct FileSink {
    pub path: PathBuf,
    pub format: OutputFormat,
    pub delimiter: u8,
}

#[async_trait]
impl ReportSink for FileSink {
    async fn write(&self, report: &Report) -> Result<String> {
        let body = render(report, self.format, self.delimiter)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&self.path, body)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;

        tracing::info!(path = %self.path.display(), records = report.records.len(), "Report written");
        Ok(self.path.display().to_string())
    }
}

/// Standard output
#[derive(Debug, Clone)]
pub struct StdoutSink {
    pub format: OutputFormat,
    pub delimiter: u8,
}

#[async_trait]
impl ReportSink for StdoutSink {
    async fn write(&self, report: &Report) -> Result<String> {
        let body = render(report, self.format, self.delimiter)?;
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(&body)?;
        stdout.flush()?;
        Ok("stdout".to_string())
    }
}

/// Object key stem of repository reports
pub const REPOSITORY_KEY_STEM: &str = "ecr_repositories";
/// Object key stem of per-image reports
pub const IMAGE_KEY_STEM: &str = "ecr_images";

/// Object upload to an S3 bucket
pub struct S3Sink {
    pub uploader: S3Uploader,
    pub bucket: String,
    pub key: String,
    pub format: OutputFormat,
    pub delimiter: u8,
}

impl S3Sink {
    /// Default object key, e.g. `ecr_repositories_2024-05-01.csv`
    pub fn default_key(stem: &str, format: OutputFormat, date: chrono::NaiveDate) -> String {
        format!("{}_{}.{}", stem, date.format("%Y-%m-%d"), format.extension())
    }
}

#[async_trait]
impl ReportSink for S3Sink {
    async fn write(&self, report: &Report) -> Result<String> {
        let body = render(report, self.format, self.delimiter)?;
        self.uploader
            .upload_bytes(&self.bucket, &self.key, body, self.format.content_type())
            .await?;
        Ok(format!("s3://{}/{}", self.bucket, self.key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remediate::Outcome;
    use crate::report::{Enrichment, RunMode};
    use crate::resource::{MatchResult, PolicyState, Resource};
    use uuid::Uuid;

    fn sample() -> Report {
        let mut tagged = Resource::new(
            "app-frontend",
            "arn:aws:ecr:eu-west-1:1:repository/app-frontend",
            PolicyState::Mutable,
        );
        tagged.tags.insert("Owner".into(), "platform".into());
        let plain = Resource::new(
            "app-backend-snapshot",
            "arn:aws:ecr:eu-west-1:1:repository/app-backend-snapshot",
            PolicyState::Mutable,
        );

        Report::assemble(
            Uuid::new_v4(),
            RunMode::Remediate,
            false,
            "app-",
            vec![
                MatchResult {
                    resource: tagged,
                    matched: true,
                },
                MatchResult {
                    resource: plain,
                    matched: true,
                },
            ],
            vec![
                Enrichment::Remediation(Outcome::Applied {
                    state: PolicyState::Immutable,
                }),
                Enrichment::Remediation(Outcome::Skipped {
                    reason: "excluded, name contains 'snapshot'".into(),
                }),
            ],
        )
    }

    #[test]
    fn test_csv_has_fixed_header_and_rows_in_order() {
        let text = String::from_utf8(render(&sample(), OutputFormat::Csv, b',').unwrap()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "resourceName,resourceArn,policyState,derivedField");
        assert!(lines[1].starts_with("app-frontend,"));
        assert!(lines[1].ends_with("Applied (IMMUTABLE)"));
        assert!(lines[2].starts_with("app-backend-snapshot,"));
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_csv_respects_delimiter() {
        let text = String::from_utf8(render(&sample(), OutputFormat::Csv, b'|').unwrap()).unwrap();
        assert!(text.starts_with("resourceName|resourceArn|policyState|derivedField"));
    }

    #[test]
    fn test_empty_report_is_header_only() {
        let report = Report::assemble(
            Uuid::new_v4(),
            RunMode::Inventory,
            false,
            "^none$",
            vec![],
            vec![],
        );
        let text = String::from_utf8(render(&report, OutputFormat::Csv, b',').unwrap()).unwrap();
        assert_eq!(text.trim_end(), "resourceName,resourceArn,policyState,derivedField");
    }

    #[test]
    fn test_json_carries_run_metadata_and_tags() {
        let report = sample();
        let value: serde_json::Value =
            serde_json::from_slice(&render(&report, OutputFormat::Json, b',').unwrap()).unwrap();

        assert_eq!(value["runId"], report.run_id.to_string());
        assert_eq!(value["mode"], "remediate");
        assert_eq!(value["dryRun"], false);
        assert_eq!(value["records"][0]["resourceName"], "app-frontend");
        assert_eq!(value["records"][0]["tags"]["Owner"], "platform");
        assert_eq!(value["records"][1]["derivedField"], "Skipped: excluded, name contains 'snapshot'");
    }

    #[test]
    fn test_default_s3_key_uses_date() {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(
            S3Sink::default_key(REPOSITORY_KEY_STEM, OutputFormat::Json, date),
            "ecr_repositories_2024-05-01.json"
        );
        assert_eq!(
            S3Sink::default_key(IMAGE_KEY_STEM, OutputFormat::Csv, date),
            "ecr_images_2024-05-01.csv"
        );
    }

    #[tokio::test]
    async fn test_file_sink_writes_rendered_report() {
        let dir = std::env::temp_dir().join(format!("ecr-audit-test-{}", Uuid::new_v4()));
        let sink = FileSink {
            path: dir.join("nested").join("repositories.csv"),
            format: OutputFormat::Csv,
            delimiter: b',',
        };

        let location = sink.write(&sample()).await.unwrap();
        let written = std::fs::read_to_string(&sink.path).unwrap();
        assert!(written.starts_with("resourceName,"));
        assert_eq!(location, sink.path.display().to_string());

        std::fs::remove_dir_all(dir).unwrap();
    }

    fn image_report() -> Report {
        let matches = vec![MatchResult {
            resource: Resource::new("app", "arn:aws:ecr:eu-west-1:1:repository/app", PolicyState::Mutable),
            matched: true,
        }];
        Report::assemble(
            Uuid::new_v4(),
            RunMode::Inventory,
            false,
            "app",
            matches,
            vec![Enrichment::ImageInventory {
                count: 2,
                total_bytes: 4096,
            }],
        )
        .with_images(vec![
            ImageRecord {
                repository_name: "app".into(),
                image_tag: "v1".into(),
                image_digest: "sha256:aaa".into(),
                image_size_in_bytes: Some(4096),
            },
            ImageRecord {
                repository_name: "app".into(),
                image_tag: String::new(),
                image_digest: "sha256:bbb".into(),
                image_size_in_bytes: None,
            },
        ])
    }

    #[test]
    fn test_image_csv_lists_one_line_per_image() {
        let text = String::from_utf8(render(&image_report(), OutputFormat::Csv, b'|').unwrap()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "repositoryName|imageTag|imageDigest|imageSizeInBytes");
        assert_eq!(lines[1], "app|v1|sha256:aaa|4096");
        assert_eq!(lines[2], "app||sha256:bbb|");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_image_json_carries_sizes() {
        let value: serde_json::Value =
            serde_json::from_slice(&render(&image_report(), OutputFormat::Json, b',').unwrap()).unwrap();
        assert_eq!(value["records"][0]["totalSizeBytes"], 4096);
        assert_eq!(value["images"][0]["imageDigest"], "sha256:aaa");
        assert_eq!(value["images"][1]["imageSizeInBytes"], serde_json::Value::Null);

        let plain: serde_json::Value =
            serde_json::from_slice(&render(&sample(), OutputFormat::Json, b',').unwrap()).unwrap();
        assert!(plain.get("images").is_none());
        assert!(plain["records"][0].get("totalSizeBytes").is_none());
    }
}
