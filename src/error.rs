//! Error taxonomy
//!
//! Two tiers: [`ApiError`] is scoped to a single call against the control plane and is
//! recoverable at the resource level, while [`RunError`] aborts the whole run.

use std::time::Duration;
use thiserror::Error;

/// Failure of a single control-plane call, already classified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Network failure or 5xx-class service error (retryable)
    #[error("transport error: {0}")]
    Transport(String),

    /// No response before the deadline; the request may still have been applied (retryable)
    #[error("timed out: {0}")]
    TimedOut(String),

    /// Request was rate limited (retryable with backoff)
    #[error("rate limited: {0}")]
    Throttling(String),

    /// Credentials lack permission for the operation
    #[error("access denied: {0}")]
    Authorization(String),

    /// The addressed resource does not exist (anymore)
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other service-side rejection
    #[error("service error{}: {message}", .code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default())]
    Service {
        code: Option<String>,
        message: String,
    },

    /// The response could not be mapped onto the typed model
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ApiError {
    /// Build the error returned when a call exceeds its deadline
    pub fn timed_out(operation: &str, after: Duration) -> Self {
        ApiError::TimedOut(format!("{operation} got no response within {after:?}"))
    }

    /// Only transient failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Transport(_) | ApiError::TimedOut(_) | ApiError::Throttling(_)
        )
    }

    /// The call may have taken effect even though no answer arrived
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(self, ApiError::TimedOut(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }

    /// Short operator hint for known failure classes
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            ApiError::Authorization(_) => {
                Some("Check the IAM permissions of the selected profile (ecr:PutImageTagMutability).")
            }
            ApiError::Throttling(_) => Some("ECR rate limit hit after all retries. Re-run later."),
            ApiError::Transport(_) => Some("Check your network connection and the region name."),
            ApiError::TimedOut(_) => {
                Some("The service did not answer in time. Raise retry.call_timeout or re-run.")
            }
            ApiError::NotFound(_) => Some("The repository was deleted while the run was in progress."),
            _ => None,
        }
    }
}

/// A page of a paginated listing failed; everything collected so far is void.
#[derive(Debug, Clone, Error)]
#[error("page {page} failed: {source}")]
pub struct PageError {
    /// 1-based index of the page that failed
    pub page: usize,
    #[source]
    pub source: ApiError,
}

/// Conditions that abort the whole run
#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("listing {listing} aborted at page {}: {}", .source.page, .source.source)]
    PartialPage {
        listing: String,
        #[source]
        source: PageError,
    },

    #[error("session error: {0}")]
    Session(String),
}
