//! AWS session bootstrap
//!
//! Loads one SDK configuration for an explicit region and named profile and hands out
//! service clients built from it. Credential resolution is left to the SDK provider chain.

use crate::error::RunError;
use aws_config::retry::RetryConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use std::sync::Arc;

/// Profile used when neither the CLI, the config file nor `AWS_PROFILE` names one
pub const DEFAULT_PROFILE: &str = "default";

/// Shared, read-only session state
#[derive(Clone)]
pub struct AwsSession {
    config: Arc<SdkConfig>,
    region: String,
    profile: String,
}

impl AwsSession {
    /// Load configuration for `region` using credentials of `profile`
    pub async fn load(region: &str, profile: &str) -> Result<Self, RunError> {
        if !validate_region(region) {
            return Err(RunError::Session(format!("invalid region '{region}'")));
        }
        if profile.trim().is_empty() {
            return Err(RunError::Session("empty credential profile".to_string()));
        }

        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .profile_name(profile)
            .load()
            .await;

        tracing::info!(region, profile, "AWS session loaded");

        Ok(Self {
            config: Arc::new(config),
            region: region.to_string(),
            profile: profile.to_string(),
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// ECR client; SDK-level retries are off since every call goes through
    /// [`crate::retry::with_retry`]
    pub fn ecr_client(&self) -> aws_sdk_ecr::Client {
        let config = aws_sdk_ecr::config::Builder::from(self.config.as_ref())
            .retry_config(RetryConfig::disabled())
            .build();
        aws_sdk_ecr::Client::from_conf(config)
    }

    pub fn s3_client(&self) -> aws_sdk_s3::Client {
        aws_sdk_s3::Client::new(&self.config)
    }
}

impl std::fmt::Debug for AwsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsSession")
            .field("region", &self.region)
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

/// Validate an AWS region name such as `eu-west-1` or `us-gov-east-1`
///
/// Lowercase letters, digits and hyphens, at least three hyphen-separated parts, the last
/// one numeric.
pub fn validate_region(region: &str) -> bool {
    if region.len() < 9 || region.len() > 25 {
        return false;
    }

    let parts: Vec<&str> = region.split('-').collect();
    if parts.len() < 3 {
        return false;
    }

    let Some((last, rest)) = parts.split_last() else {
        return false;
    };

    last.chars().all(|c| c.is_ascii_digit())
        && !last.is_empty()
        && rest
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_lowercase()))
}

/// Region from the standard environment variables
/// Security: ignores values that do not look like a region name
pub fn get_default_region() -> Option<String> {
    for var in ["AWS_REGION", "AWS_DEFAULT_REGION"] {
        if let Ok(region) = std::env::var(var) {
            if validate_region(&region) {
                return Some(region);
            }
            tracing::warn!("Invalid region format in {}", var);
        }
    }
    None
}

/// Profile from `AWS_PROFILE`
pub fn get_default_profile() -> Option<String> {
    std::env::var("AWS_PROFILE")
        .ok()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
}
