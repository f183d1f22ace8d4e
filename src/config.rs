//! Engine configuration.
//!
//! All tunables live in one explicit struct handed to the engine at
//! construction. Values can be loaded from a TOML file; every field has a
//! documented default so an empty document is a valid configuration.

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_ASSOCIATION_MARGIN_SECONDS: u64 = 20;

/// Configuration of the cycle detection and consolidation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Tolerance window, in seconds, used to attach or reattach a cycle to
    /// a slot despite small timing mismatches.
    pub association_margin_seconds: u64,
    /// When a stop event arrives right after an already-full cycle within
    /// the same continuous operation, extend that cycle's end forward
    /// instead of opening a new cycle.
    pub extend_full_cycle_on_new_cycle_end: bool,
    /// Do not keep between-cycles rows for zero-width gaps.
    pub skip_empty_between_cycles: bool,
    /// Consolidate neighbor slots touched indirectly by a timeline
    /// mutation. When disabled, their consolidation is deferred to the next
    /// explicit `consolidate` call.
    pub every_slot_consolidation: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            association_margin_seconds: DEFAULT_ASSOCIATION_MARGIN_SECONDS,
            extend_full_cycle_on_new_cycle_end: false,
            skip_empty_between_cycles: false,
            every_slot_consolidation: true,
        }
    }
}

impl AnalysisConfig {
    /// Association margin as a duration.
    pub fn association_margin(&self) -> Duration {
        Duration::seconds(self.association_margin_seconds as i64)
    }

    /// Convenience constructor used heavily in tests.
    pub fn with_association_margin(seconds: u64) -> Self {
        Self {
            association_margin_seconds: seconds,
            ..Default::default()
        }
    }

    /// Parse a configuration from a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).context("Invalid analysis configuration")
    }

    /// Load a configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AnalysisConfig::default();
        assert_eq!(config.association_margin(), Duration::seconds(20));
        assert!(!config.extend_full_cycle_on_new_cycle_end);
        assert!(!config.skip_empty_between_cycles);
        assert!(config.every_slot_consolidation);
    }

    #[test]
    fn test_empty_document_is_valid() {
        let config = AnalysisConfig::from_toml_str("").unwrap();
        assert_eq!(config.association_margin_seconds, 20);
    }

    #[test]
    fn test_partial_document_overrides() {
        let config = AnalysisConfig::from_toml_str(
            "association_margin_seconds = 2\nextend_full_cycle_on_new_cycle_end = true\n",
        )
        .unwrap();
        assert_eq!(config.association_margin(), Duration::seconds(2));
        assert!(config.extend_full_cycle_on_new_cycle_end);
        assert!(!config.skip_empty_between_cycles);
    }

    #[test]
    fn test_invalid_document_is_an_error() {
        assert!(AnalysisConfig::from_toml_str("association_margin_seconds = \"soon\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "skip_empty_between_cycles = true").unwrap();
        let config = AnalysisConfig::from_toml_file(file.path()).unwrap();
        assert!(config.skip_empty_between_cycles);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(AnalysisConfig::from_toml_file("/nonexistent/analysis.toml").is_err());
    }
}
