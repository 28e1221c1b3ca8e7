//! Inventory and tag-immutability remediation for ECR repositories.
//!
//! A run lists every repository of a region, keeps those whose name matches a pattern and then
//! either counts their images or moves them to `IMMUTABLE` tag mutability. The result is one
//! ordered [`report::Report`] per run.

pub mod aws;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod remediate;
pub mod report;
pub mod resource;
pub mod retry;

/// Version injected at compile time via ECR_AUDIT_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("ECR_AUDIT_VERSION") {
    Some(v) => v,
    None => "dev",
};
