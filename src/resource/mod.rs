//! Resource model and the control-plane seam
//!
//! The pipeline only ever sees the typed [`Resource`] snapshot; raw SDK shapes are mapped at
//! the API boundary (see [`crate::aws::ecr`]).
//!
//! # Architecture
//!
//! - [`fetcher`] - Drains a paginated listing into a lazy item stream
//! - [`filter`] - Selects resources whose name matches a regular expression
//! - [`counter`] - Counts the items of a resource-scoped secondary listing
//!
//! # Example
//!
//! ```ignore
//! use ecr_audit::resource::{fetcher, PatternFilter};
//!
//! let filter = PatternFilter::new("^prod-")?;
//! let all = fetcher::collect_all("DescribeRepositories", |token| api.list_repositories(token, None)).await?;
//! let matches = filter.select(all);
//! ```

pub mod counter;
pub mod fetcher;
pub mod filter;

pub use counter::{count_images, describe_all_images};
pub use fetcher::{collect_all, paginate};
pub use filter::{MatchResult, PatternFilter};

use crate::error::ApiError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Tag mutability of a repository
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub enum PolicyState {
    Mutable,
    Immutable,
    /// Any other value the service reports, kept verbatim
    Other(String),
}

impl PolicyState {
    pub fn as_str(&self) -> &str {
        match self {
            PolicyState::Mutable => "MUTABLE",
            PolicyState::Immutable => "IMMUTABLE",
            PolicyState::Other(s) => s,
        }
    }
}

impl From<&str> for PolicyState {
    fn from(value: &str) -> Self {
        match value {
            "MUTABLE" => PolicyState::Mutable,
            "IMMUTABLE" => PolicyState::Immutable,
            other => PolicyState::Other(other.to_string()),
        }
    }
}

impl From<PolicyState> for String {
    fn from(state: PolicyState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for PolicyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only snapshot of a container repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Unique within the account and region
    pub name: String,
    /// Globally unique
    pub arn: String,
    pub policy_state: PolicyState,
    pub tags: BTreeMap<String, String>,
}

impl Resource {
    pub fn new(name: impl Into<String>, arn: impl Into<String>, policy_state: PolicyState) -> Self {
        Self {
            name: name.into(),
            arn: arn.into(),
            policy_state,
            tags: BTreeMap::new(),
        }
    }
}

/// Entry of a repository's image listing; an image pushed under several tags shows up once
/// per tag, an untagged one once without a tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub digest: String,
    pub tag: Option<String>,
}

/// Per-digest image metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescription {
    pub digest: String,
    pub tags: Vec<String>,
    /// Compressed size as reported by the registry
    pub size_bytes: Option<u64>,
}

/// One page of a paginated listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Continuation token; `None` ends the walk
    pub next_token: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_token: Option<String>) -> Self {
        Self { items, next_token }
    }

    /// A page without continuation
    pub fn last(items: Vec<T>) -> Self {
        Self::new(items, None)
    }
}

/// The control-plane operations the pipeline needs
///
/// Authentication and session handling stay with the implementor.
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// One page of repositories in listing order
    async fn list_repositories(
        &self,
        next_token: Option<String>,
        page_size: Option<i32>,
    ) -> Result<Page<Resource>, ApiError>;

    /// One page of the image listing of a repository
    async fn list_images(
        &self,
        repository: &str,
        next_token: Option<String>,
        page_size: Option<i32>,
    ) -> Result<Page<Image>, ApiError>;

    /// One page of image metadata (tags, size) of a repository
    async fn describe_images(
        &self,
        repository: &str,
        next_token: Option<String>,
        page_size: Option<i32>,
    ) -> Result<Page<ImageDescription>, ApiError>;

    /// Set the tag mutability of a repository; returns the state reported back
    async fn set_policy_state(
        &self,
        repository: &str,
        state: &PolicyState,
    ) -> Result<PolicyState, ApiError>;

    /// Tags attached to a resource
    async fn list_tags(&self, arn: &str) -> Result<BTreeMap<String, String>, ApiError>;
}
