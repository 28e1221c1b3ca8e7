//! Name pattern filter

use super::Resource;
use crate::error::RunError;
use regex::Regex;

/// A resource together with whether its name matched the run's pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub resource: Resource,
    pub matched: bool,
}

/// Compiled name filter; regular-expression search anywhere in the name
#[derive(Debug, Clone)]
pub struct PatternFilter {
    regex: Regex,
}

impl PatternFilter {
    /// Compile the pattern. Fails before any enrichment work can start.
    pub fn new(pattern: &str) -> Result<Self, RunError> {
        let regex = Regex::new(pattern).map_err(|source| RunError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self { regex })
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    /// Flag every resource, keeping listing order
    pub fn evaluate(&self, resources: Vec<Resource>) -> Vec<MatchResult> {
        resources
            .into_iter()
            .map(|resource| {
                let matched = self.is_match(&resource.name);
                MatchResult { resource, matched }
            })
            .collect()
    }

    /// Keep only matching resources, keeping listing order
    pub fn select(&self, resources: Vec<Resource>) -> Vec<MatchResult> {
        let total = resources.len();
        let selected: Vec<_> = self
            .evaluate(resources)
            .into_iter()
            .filter(|m| m.matched)
            .collect();

        tracing::info!(
            pattern = self.pattern(),
            total,
            matched = selected.len(),
            "Applied name filter"
        );
        selected
    }
}
