//! Configuration Management
//!
//! [`Config`] holds persistent user defaults read from disk; [`RunConfig`] is the validated
//! configuration of a single run, threaded explicitly through every component.

use crate::aws::context::{get_default_profile, get_default_region, validate_region, DEFAULT_PROFILE};
use crate::remediate::ExclusionRule;
use crate::report::{OutputFormat, RunMode};
use crate::retry::RetryPolicy;
use anyhow::{bail, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default report file, relative to the working directory
pub const DEFAULT_OUTPUT: &str = "repositories.csv";

/// User configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Default region
    #[serde(default)]
    pub region: Option<String>,
    /// Default credential profile
    #[serde(default)]
    pub profile: Option<String>,
    /// Name markers never remediated (replaces the built-in `snapshot`)
    #[serde(default)]
    pub exclude: Option<ExclusionRule>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    /// Page size requested from listing calls
    #[serde(default)]
    pub page_size: Option<i32>,
    /// Parallel image counts in inventory mode
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub format: Option<OutputFormat>,
    /// Single-byte CSV delimiter
    #[serde(default)]
    pub delimiter: Option<char>,
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ecr-audit").join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        Self::load_from(&path)
    }

    /// Load from an explicit path; a missing or unreadable file yields defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring invalid config file {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Get effective region (CLI > config > environment)
    pub fn effective_region(&self) -> Option<String> {
        self.region
            .clone()
            .filter(|r| validate_region(r))
            .or_else(get_default_region)
    }

    /// Get effective profile (CLI > config > environment > `default`)
    pub fn effective_profile(&self) -> String {
        self.profile
            .clone()
            .or_else(get_default_profile)
            .unwrap_or_else(|| DEFAULT_PROFILE.to_string())
    }

    pub fn effective_output(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT))
    }

    /// CSV delimiter as a byte; only ASCII characters are usable
    pub fn effective_delimiter(&self) -> Result<u8> {
        delimiter_byte(self.delimiter.unwrap_or(','))
    }
}

/// Convert a delimiter character into the byte the CSV writer expects
pub fn delimiter_byte(delimiter: char) -> Result<u8> {
    if !delimiter.is_ascii() || delimiter == '"' || delimiter == '\n' {
        bail!("Unsupported delimiter {:?}", delimiter);
    }
    Ok(delimiter as u8)
}

/// Validated configuration of one run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub region: String,
    pub pattern: String,
    pub profile: String,
    /// Only meaningful for [`RunMode::Remediate`]
    pub dry_run: bool,
    pub mode: RunMode,
    pub exclusions: ExclusionRule,
    pub retry: RetryPolicy,
    /// Upper bound of concurrent image counts; 1 keeps processing sequential
    pub concurrency: usize,
    pub page_size: Option<i32>,
    /// Fetch repository tags after filtering
    pub include_tags: bool,
    /// Inventory only: describe images and report one line per image
    pub include_images: bool,
}

impl RunConfig {
    /// Inventory run with defaults for everything but the four core fields
    pub fn new(region: &str, pattern: &str, profile: &str, dry_run: bool) -> Self {
        Self {
            region: region.to_string(),
            pattern: pattern.to_string(),
            profile: profile.to_string(),
            dry_run,
            mode: RunMode::Inventory,
            exclusions: ExclusionRule::default(),
            retry: RetryPolicy::default(),
            concurrency: 1,
            page_size: None,
            include_tags: false,
            include_images: false,
        }
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    /// Apply the persisted defaults the CLI did not override
    pub fn with_defaults_from(mut self, config: &Config) -> Self {
        if let Some(exclude) = &config.exclude {
            self.exclusions = exclude.clone();
        }
        if let Some(retry) = &config.retry {
            self.retry = retry.clone();
        }
        if let Some(concurrency) = config.concurrency {
            self.concurrency = concurrency;
        }
        self.page_size = self.page_size.or(config.page_size);
        self
    }

    /// Reject settings the pipeline cannot honor
    pub fn validate(&self) -> Result<()> {
        if !validate_region(&self.region) {
            bail!("Invalid region '{}'", self.region);
        }
        if self.profile.trim().is_empty() {
            bail!("Empty credential profile");
        }
        if self.concurrency == 0 {
            bail!("Concurrency must be at least 1");
        }
        if self.include_images && self.mode != RunMode::Inventory {
            bail!("Image details are only available in inventory runs");
        }
        if let Some(size) = self.page_size {
            if !(1..=1000).contains(&size) {
                bail!("Page size must be between 1 and 1000, got {}", size);
            }
        }
        Ok(())
    }
}
