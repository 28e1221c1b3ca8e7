//! AWS API interaction module
//!
//! Live implementations of the control-plane seam and the report upload target.
//!
//! # Module Structure
//!
//! - [`context`] - Session bootstrap (region + named profile) shared by all clients
//! - [`ecr`] - [`crate::resource::RegistryApi`] backed by the ECR SDK client
//! - [`error`] - Classification of SDK failures into [`crate::error::ApiError`]
//! - [`s3`] - Object upload for the S3 report sink
//!
//! # Example
//!
//! ```ignore
//! use ecr_audit::aws::{context::AwsSession, ecr::EcrRegistry};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let session = AwsSession::load("eu-west-1", "default").await?;
//!     let registry = EcrRegistry::from_session(&session);
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod ecr;
pub mod error;
pub mod s3;
