use std::fmt;

use crate::entity::EntityId;

/// Rejected configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    InvalidValue { field: &'static str, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "invalid config value for {field}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Why a snapshot pair could not be classified.
///
/// Never crosses the engine boundary: `classify` degrades these to an
/// `unknown` classification.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifyError {
    EntityMismatch { prev: EntityId, curr: EntityId },
    OutOfOrder { prev_ts: f64, curr_ts: f64 },
    NonFiniteTimestamp,
}

impl fmt::Display for ClassifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifyError::EntityMismatch { prev, curr } => {
                write!(f, "snapshots belong to different entities ({prev} vs {curr})")
            }
            ClassifyError::OutOfOrder { prev_ts, curr_ts } => {
                write!(f, "snapshots out of order ({prev_ts} after {curr_ts})")
            }
            ClassifyError::NonFiniteTimestamp => write!(f, "non-finite snapshot timestamp"),
        }
    }
}

impl std::error::Error for ClassifyError {}

/// Malformed trace input.
#[derive(Debug)]
pub enum TraceError {
    Json(serde_json::Error),
    InvalidMarker(String),
    Line { line: usize, source: Box<TraceError> },
}

impl fmt::Display for TraceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceError::Json(e) => write!(f, "JSON error: {e}"),
            TraceError::InvalidMarker(msg) => write!(f, "invalid marker: {msg}"),
            TraceError::Line { line, source } => write!(f, "line {line}: {source}"),
        }
    }
}

impl std::error::Error for TraceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TraceError::Json(e) => Some(e),
            TraceError::Line { source, .. } => Some(source.as_ref()),
            TraceError::InvalidMarker(_) => None,
        }
    }
}

impl From<serde_json::Error> for TraceError {
    fn from(e: serde_json::Error) -> Self {
        TraceError::Json(e)
    }
}
