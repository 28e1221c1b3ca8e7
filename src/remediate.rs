//! Policy remediation
//!
//! Moves each matched repository to `IMMUTABLE` tag mutability. Per resource the state
//! machine is `Candidate -> {Excluded, DryRunSimulated, Applied, Failed}`:
//!
//! - exclusion is decided first and never reaches the mutation call, live or not
//! - dry-run records the intended state without calling the service
//! - a live call either succeeds (`Applied`) or its error is downgraded to `Failed`
//!
//! A call that timed out may still have been applied by the service. Its `Failed` text says
//! `outcome unknown` so the operator checks the repository instead of assuming nothing changed.
//!
//! The mutation is idempotent on the service side, so an already immutable repository
//! comes back as `Applied` again. A failure never stops the batch.

use crate::error::ApiError;
use crate::resource::{MatchResult, PolicyState, RegistryApi};
use crate::retry::{with_retry, RetryPolicy};
use serde::Deserialize;
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Marker excluded by default; snapshot repositories must stay overwritable
pub const DEFAULT_EXCLUDED_MARKER: &str = "snapshot";

/// Terminal result of evaluating one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The live call succeeded; carries the state the service reported back
    Applied { state: PolicyState },
    /// Not sent to the service (exclusion rule or cancellation)
    Skipped { reason: String },
    /// Dry-run: the transition that would have been requested
    DryRun { intended: PolicyState },
    /// The live call failed, or timed out with an unknown effect
    Failed { error: ApiError },
}

impl Outcome {
    /// Stable label used in reports and summaries
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Applied { .. } => "Applied",
            Outcome::Skipped { .. } => "Skipped",
            Outcome::DryRun { .. } => "DryRun",
            Outcome::Failed { .. } => "Failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Applied { state } => write!(f, "Applied ({state})"),
            Outcome::Skipped { reason } => write!(f, "Skipped: {reason}"),
            Outcome::DryRun { intended } => write!(f, "DryRun (would set {intended})"),
            Outcome::Failed { error } if error.is_outcome_unknown() => {
                write!(f, "Failed: outcome unknown ({error})")
            }
            Outcome::Failed { error } => write!(f, "Failed: {error}"),
        }
    }
}

/// Names that must never be remediated
///
/// A name is protected when it contains one of the markers, ignoring case.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "Vec<String>")]
pub struct ExclusionRule {
    markers: Vec<String>,
}

impl ExclusionRule {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(|m| m.into().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    /// Protect nothing
    pub fn none() -> Self {
        Self {
            markers: Vec::new(),
        }
    }

    /// The marker protecting `name`, if any
    pub fn matching_marker(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.markers
            .iter()
            .find(|m| name.contains(m.as_str()))
            .map(String::as_str)
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }
}

impl From<Vec<String>> for ExclusionRule {
    fn from(markers: Vec<String>) -> Self {
        Self::new(markers)
    }
}

impl Default for ExclusionRule {
    fn default() -> Self {
        Self::new([DEFAULT_EXCLUDED_MARKER])
    }
}

/// Drives candidates through the remediation state machine, one at a time
pub struct PolicyRemediator<'a, A: ?Sized> {
    api: &'a A,
    retry: &'a RetryPolicy,
    exclusions: &'a ExclusionRule,
    target: PolicyState,
    dry_run: bool,
}

impl<'a, A> PolicyRemediator<'a, A>
where
    A: RegistryApi + ?Sized,
{
    pub fn new(
        api: &'a A,
        retry: &'a RetryPolicy,
        exclusions: &'a ExclusionRule,
        dry_run: bool,
    ) -> Self {
        Self {
            api,
            retry,
            exclusions,
            target: PolicyState::Immutable,
            dry_run,
        }
    }

    /// Evaluate a single candidate
    pub async fn evaluate(&self, candidate: &MatchResult, cancel: &CancellationToken) -> Outcome {
        let name = candidate.resource.name.as_str();

        if let Some(marker) = self.exclusions.matching_marker(name) {
            let outcome = Outcome::Skipped {
                reason: format!("excluded, name contains '{marker}'"),
            };
            info!(resource = name, outcome = %outcome, "Remediation skipped");
            return outcome;
        }

        if self.dry_run {
            let outcome = Outcome::DryRun {
                intended: self.target.clone(),
            };
            info!(
                resource = name,
                current = %candidate.resource.policy_state,
                outcome = %outcome,
                "Dry-run: tag immutability would be set"
            );
            return outcome;
        }

        if cancel.is_cancelled() {
            let outcome = Outcome::Skipped {
                reason: "run cancelled before remediation".to_string(),
            };
            warn!(resource = name, "Cancelled, not sending mutation");
            return outcome;
        }

        let target = &self.target;
        match with_retry(self.retry, "PutImageTagMutability", || {
            self.api.set_policy_state(name, target)
        })
        .await
        {
            Ok(state) => {
                info!(resource = name, state = %state, "Tag immutability set");
                Outcome::Applied { state }
            }
            Err(error) => {
                warn!(resource = name, error = %error, "Failed to set tag immutability");
                Outcome::Failed { error }
            }
        }
    }

    /// Evaluate every candidate in order; the result lines up index by index
    pub async fn remediate_all(
        &self,
        candidates: &[MatchResult],
        cancel: &CancellationToken,
    ) -> Vec<Outcome> {
        let mut outcomes = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            outcomes.push(self.evaluate(candidate, cancel).await);
        }
        outcomes
    }
}
