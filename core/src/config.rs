use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ACCUMULATION_WINDOW_DAYS: u32 = 7;
pub const BUNDLING_THRESHOLD_COUNT: u32 = 5;
pub const BUNDLING_THRESHOLD_MATERIALITY: f64 = 2.5;
pub const MAX_UPDATE_RETRIES: u32 = 16;

pub const PER_COMPARATOR_TIMEOUT_MS: u64 = 5_000;
pub const TOTAL_EVALUATION_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct AccumulationConfig {
    pub window_days: u32,
    /// How far back an accumulating window may have started and still be
    /// reused. Unset means until the window ends. Never shorter than a window.
    pub lookback_days: Option<u32>,
    pub bundling_threshold_count: u32,
    pub bundling_threshold_materiality: f64,
    pub max_update_retries: u32,
    pub bundle_on_expiry: bool,
}

impl Default for AccumulationConfig {
    fn default() -> Self {
        Self {
            window_days: ACCUMULATION_WINDOW_DAYS,
            lookback_days: None,
            bundling_threshold_count: BUNDLING_THRESHOLD_COUNT,
            bundling_threshold_materiality: BUNDLING_THRESHOLD_MATERIALITY,
            max_update_retries: MAX_UPDATE_RETRIES,
            bundle_on_expiry: false,
        }
    }
}

impl AccumulationConfig {
    pub fn thresholds(&self) -> BundlingThresholds {
        BundlingThresholds {
            count: self.bundling_threshold_count,
            materiality: self.bundling_threshold_materiality,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BundlingThresholds {
    pub count: u32,
    pub materiality: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct BatchLimits {
    pub per_comparator_timeout_ms: u64,
    pub total_timeout_ms: u64,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            per_comparator_timeout_ms: PER_COMPARATOR_TIMEOUT_MS,
            total_timeout_ms: TOTAL_EVALUATION_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct DriftConfig {
    pub accumulation: AccumulationConfig,
    pub batch: BatchLimits,
}

impl DriftConfig {
    pub fn from_json_str(json: &str) -> CoreResult<Self> {
        let cfg: DriftConfig = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: impl AsRef<Path>) -> CoreResult<Self> {
        let body = std::fs::read_to_string(path)?;
        Self::from_json_str(&body)
    }

    fn validate(&self) -> CoreResult<()> {
        let acc = &self.accumulation;
        if acc.window_days == 0 {
            return Err(CoreError::InvalidInput(
                "accumulation.window_days must be at least 1".to_string(),
            ));
        }
        if let Some(lookback) = acc.lookback_days {
            if lookback < acc.window_days {
                return Err(CoreError::InvalidInput(format!(
                    "accumulation.lookback_days ({}) must be at least window_days ({})",
                    lookback, acc.window_days
                )));
            }
        }
        if acc.bundling_threshold_count == 0 {
            return Err(CoreError::InvalidInput(
                "accumulation.bundling_threshold_count must be at least 1".to_string(),
            ));
        }
        if !acc.bundling_threshold_materiality.is_finite()
            || acc.bundling_threshold_materiality <= 0.0
        {
            return Err(CoreError::InvalidInput(
                "accumulation.bundling_threshold_materiality must be a positive number"
                    .to_string(),
            ));
        }
        if self.batch.per_comparator_timeout_ms == 0 || self.batch.total_timeout_ms == 0 {
            return Err(CoreError::InvalidInput(
                "batch timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let cfg = DriftConfig::from_json_str(r#"{"accumulation": {"window_days": 14}}"#).unwrap();
        assert_eq!(cfg.accumulation.window_days, 14);
        assert_eq!(
            cfg.accumulation.bundling_threshold_count,
            BUNDLING_THRESHOLD_COUNT
        );
        assert_eq!(cfg.batch, BatchLimits::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(DriftConfig::from_json_str(r#"{"accumulation": {"windowz": 3}}"#).is_err());
    }

    #[test]
    fn zero_window_is_rejected() {
        let err = DriftConfig::from_json_str(r#"{"accumulation": {"window_days": 0}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("window_days"));
    }

    #[test]
    fn lookback_shorter_than_window_is_rejected() {
        for body in [
            r#"{"accumulation": {"lookback_days": 0}}"#,
            r#"{"accumulation": {"window_days": 7, "lookback_days": 3}}"#,
        ] {
            let err = DriftConfig::from_json_str(body).unwrap_err();
            assert!(err.to_string().contains("lookback_days"), "{}", err);
        }
        let cfg = DriftConfig::from_json_str(r#"{"accumulation": {"lookback_days": 10}}"#).unwrap();
        assert_eq!(cfg.accumulation.lookback_days, Some(10));
    }
}
