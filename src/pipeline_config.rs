//! Pipeline configuration: validation thresholds, capability endpoints,
//! and the vision retry policy.
//!
//! Built once at startup (defaults → optional JSON file → `FREIGHTCHECK_*`
//! environment overrides) and then shared read-only by every document task.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ═══════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("{field} out of range: {reason}")]
    OutOfRange { field: &'static str, reason: String },
}

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Bounded retry with exponential backoff for external capability calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first call.
    pub max_attempts: u32,
    /// Delay before retry `n` is `base_delay_ms * 2^n`.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
        }
    }

    /// Backoff before the retry that follows failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// Tunable pipeline behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Quality below this raises the soft quality warning (GEN_001).
    pub quality_warning_threshold: f32,
    /// Blurry scans below this score fail the hard severe-blur rule (GEN_004).
    pub severe_quality_floor: f32,
    /// Minimum OCR text length for GEN_002.
    pub min_text_length: usize,
    /// Local OCR output shorter than this triggers vision enrichment.
    pub min_usable_ocr_chars: usize,
    /// Classifier confidence below this forces `Unknown`.
    pub classification_threshold: f32,
    /// Keyword confidence below this asks the vision model for a second opinion.
    pub vision_classification_threshold: f32,
    /// Minimum filled/expected field ratio for GEN_006.
    pub extraction_completeness_threshold: f32,
    /// Call vision analysis even when local OCR looks usable.
    pub always_enrich_with_vision: bool,
    /// Retry policy for vision analysis and signature detection.
    pub vision_retry: RetryPolicy,
    /// On a stage-1 halt, still evaluate stage-2 rules for operators.
    /// The extra results never change the verdict.
    pub stage2_diagnostics_on_halt: bool,
    /// Ollama base URL serving both OCR and vision models.
    pub ollama_url: String,
    /// Model used by the local OCR engine.
    pub ocr_model: String,
    /// Model used for document analysis and signature detection.
    pub vision_model: String,
    /// HTTP timeout for capability calls.
    pub request_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            quality_warning_threshold: 45.0,
            severe_quality_floor: 25.0,
            min_text_length: 50,
            min_usable_ocr_chars: 50,
            classification_threshold: 0.50,
            vision_classification_threshold: 0.55,
            extraction_completeness_threshold: 0.50,
            always_enrich_with_vision: false,
            vision_retry: RetryPolicy::default(),
            stage2_diagnostics_on_halt: false,
            ollama_url: "http://localhost:11434".into(),
            ocr_model: "deepseek-ocr".into(),
            vision_model: "qwen2.5vl:7b".into(),
            request_timeout_secs: 300,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Loading
// ═══════════════════════════════════════════════════════════

impl PipelineConfig {
    /// Load from a JSON file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise defaults; then apply env overrides.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(p) if p.exists() => Self::load(p)?,
            _ => Self::default(),
        };
        let config = base.with_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus process environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(None)
    }

    /// Apply `FREIGHTCHECK_*` overrides through a lookup function
    /// (the process environment in production, a map in tests).
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FREIGHTCHECK_QUALITY_THRESHOLD") {
            self.quality_warning_threshold = parse_value("FREIGHTCHECK_QUALITY_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("FREIGHTCHECK_SEVERE_QUALITY_FLOOR") {
            self.severe_quality_floor = parse_value("FREIGHTCHECK_SEVERE_QUALITY_FLOOR", &v)?;
        }
        if let Some(v) = lookup("FREIGHTCHECK_MIN_TEXT_LENGTH") {
            self.min_text_length = parse_value("FREIGHTCHECK_MIN_TEXT_LENGTH", &v)?;
        }
        if let Some(v) = lookup("FREIGHTCHECK_CLASSIFICATION_THRESHOLD") {
            self.classification_threshold =
                parse_value("FREIGHTCHECK_CLASSIFICATION_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("FREIGHTCHECK_VISION_CLASSIFICATION_THRESHOLD") {
            self.vision_classification_threshold =
                parse_value("FREIGHTCHECK_VISION_CLASSIFICATION_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("FREIGHTCHECK_ALWAYS_ENRICH") {
            self.always_enrich_with_vision = parse_value("FREIGHTCHECK_ALWAYS_ENRICH", &v)?;
        }
        if let Some(v) = lookup("FREIGHTCHECK_STAGE2_ON_HALT") {
            self.stage2_diagnostics_on_halt = parse_value("FREIGHTCHECK_STAGE2_ON_HALT", &v)?;
        }
        if let Some(v) = lookup("FREIGHTCHECK_OLLAMA_URL") {
            self.ollama_url = v;
        }
        if let Some(v) = lookup("FREIGHTCHECK_OCR_MODEL") {
            self.ocr_model = v;
        }
        if let Some(v) = lookup("FREIGHTCHECK_VISION_MODEL") {
            self.vision_model = v;
        }
        Ok(self)
    }

    /// Reject values that would make the rulebook meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=100.0).contains(&self.quality_warning_threshold) {
            return Err(ConfigError::OutOfRange {
                field: "quality_warning_threshold",
                reason: format!("{} not in 0..=100", self.quality_warning_threshold),
            });
        }
        if self.severe_quality_floor > self.quality_warning_threshold {
            return Err(ConfigError::OutOfRange {
                field: "severe_quality_floor",
                reason: format!(
                    "{} exceeds quality_warning_threshold {}",
                    self.severe_quality_floor, self.quality_warning_threshold
                ),
            });
        }
        for (field, value) in [
            ("classification_threshold", self.classification_threshold),
            (
                "vision_classification_threshold",
                self.vision_classification_threshold,
            ),
            (
                "extraction_completeness_threshold",
                self.extraction_completeness_threshold,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange {
                    field,
                    reason: format!("{value} not in 0..=1"),
                });
            }
        }
        if self.vision_retry.max_attempts == 0 {
            return Err(ConfigError::OutOfRange {
                field: "vision_retry.max_attempts",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.quality_warning_threshold, 45.0);
        assert_eq!(config.vision_retry.max_attempts, 3);
        assert!(!config.stage2_diagnostics_on_halt);
        assert_eq!(config.vision_classification_threshold, 0.55);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2), Duration::from_secs(8));
        assert_eq!(RetryPolicy::immediate(3).delay_for(2), Duration::ZERO);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("pipeline.json");
        std::fs::write(&path, r#"{"quality_warning_threshold": 50.0}"#).unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.quality_warning_threshold, 50.0);
        assert_eq!(config.min_text_length, 50);
        assert_eq!(config.vision_retry, RetryPolicy::default());
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("FREIGHTCHECK_QUALITY_THRESHOLD", "55"),
            ("FREIGHTCHECK_STAGE2_ON_HALT", "true"),
            ("FREIGHTCHECK_VISION_MODEL", "gemma3:12b"),
        ]
        .into_iter()
        .collect();

        let config = PipelineConfig::default()
            .with_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.quality_warning_threshold, 55.0);
        assert!(config.stage2_diagnostics_on_halt);
        assert_eq!(config.vision_model, "gemma3:12b");
    }

    #[test]
    fn bad_env_value_rejected() {
        let result = PipelineConfig::default().with_env_overrides(|k| {
            (k == "FREIGHTCHECK_MIN_TEXT_LENGTH").then(|| "fifty".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn floor_above_warning_threshold_rejected() {
        let config = PipelineConfig {
            severe_quality_floor: 60.0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { field: "severe_quality_floor", .. })
        ));
    }

    #[test]
    fn zero_attempts_rejected() {
        let config = PipelineConfig {
            vision_retry: RetryPolicy::immediate(0),
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_resolves_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = PipelineConfig::resolve(Some(&tmp.path().join("absent.json"))).unwrap();
        assert_eq!(config.min_usable_ocr_chars, 50);
    }
}
