use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::ConfigError;
use crate::recreation::RecreationConfig;

/// Engine options. Every field has a default; the window sizes and the
/// similarity threshold are empirical and meant to be tuned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiagnosticsConfig {
    pub history_size: usize,
    pub max_records: usize,
    pub frequency_window_ms: f64,
    pub storm_threshold: usize,
    pub recreation_window_ms: f64,
    pub recreation_max_tracked: usize,
    pub similarity_threshold: f64,
    pub sampling_rate: f64,
    pub max_events_per_entity: usize,
    pub max_depth: usize,
    pub duration_window: usize,
    pub stale_entity_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compaction_interval_ms: Option<f64>,
    /// Seed for the event sampler; unset means OS entropy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            history_size: DEFAULT_HISTORY_SIZE,
            max_records: DEFAULT_MAX_RECORDS,
            frequency_window_ms: DEFAULT_FREQUENCY_WINDOW_MS,
            storm_threshold: DEFAULT_STORM_THRESHOLD,
            recreation_window_ms: DEFAULT_RECREATION_WINDOW_MS,
            recreation_max_tracked: DEFAULT_RECREATION_MAX_TRACKED,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            sampling_rate: DEFAULT_SAMPLING_RATE,
            max_events_per_entity: DEFAULT_MAX_EVENTS_PER_ENTITY,
            max_depth: DEFAULT_MAX_DEPTH,
            duration_window: DEFAULT_DURATION_WINDOW,
            stale_entity_ms: DEFAULT_STALE_ENTITY_MS,
            compaction_interval_ms: None,
            seed: None,
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

fn positive_window(field: &'static str, v: f64) -> Result<(), ConfigError> {
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(invalid(field, format!("must be a positive number of ms, got {v}")))
    }
}

impl DiagnosticsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let caps = [
            ("historySize", self.history_size),
            ("maxRecords", self.max_records),
            ("stormThreshold", self.storm_threshold),
            ("recreationMaxTracked", self.recreation_max_tracked),
            ("maxEventsPerEntity", self.max_events_per_entity),
            ("durationWindow", self.duration_window),
        ];
        for (field, v) in caps {
            if v == 0 {
                return Err(invalid(field, "must be at least 1"));
            }
        }

        positive_window("frequencyWindowMs", self.frequency_window_ms)?;
        positive_window("recreationWindowMs", self.recreation_window_ms)?;
        positive_window("staleEntityMs", self.stale_entity_ms)?;
        if let Some(interval) = self.compaction_interval_ms {
            positive_window("compactionIntervalMs", interval)?;
        }

        if !(self.sampling_rate > 0.0 && self.sampling_rate <= 1.0) {
            return Err(invalid(
                "samplingRate",
                format!("must be in (0, 1], got {}", self.sampling_rate),
            ));
        }
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(invalid(
                "similarityThreshold",
                format!("must be in (0, 1], got {}", self.similarity_threshold),
            ));
        }
        Ok(())
    }

    pub fn recreation(&self) -> RecreationConfig {
        RecreationConfig {
            window_ms: self.recreation_window_ms,
            max_tracked: self.recreation_max_tracked,
            similarity_threshold: self.similarity_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let c = DiagnosticsConfig::default();
        assert_eq!(c.history_size, 50);
        assert_eq!(c.max_records, 1000);
        assert_eq!(c.storm_threshold, 5);
        assert_eq!(c.recreation_max_tracked, 100);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let c: DiagnosticsConfig =
            serde_json::from_str(r#"{"stormThreshold": 3, "seed": 7}"#).unwrap();
        assert_eq!(c.storm_threshold, 3);
        assert_eq!(c.seed, Some(7));
        assert_eq!(c.history_size, DEFAULT_HISTORY_SIZE);
    }

    #[test]
    fn test_rejects_bad_values() {
        let c = DiagnosticsConfig {
            max_records: 0,
            ..Default::default()
        };
        assert_eq!(
            c.validate(),
            Err(ConfigError::InvalidValue {
                field: "maxRecords",
                reason: "must be at least 1".into()
            })
        );

        let c = DiagnosticsConfig {
            sampling_rate: 1.5,
            ..Default::default()
        };
        assert!(c.validate().unwrap_err().to_string().contains("samplingRate"));

        let c = DiagnosticsConfig {
            frequency_window_ms: f64::NAN,
            ..Default::default()
        };
        assert!(c.validate().is_err());

        let c = DiagnosticsConfig {
            similarity_threshold: 0.0,
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }
}
