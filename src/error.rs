use thiserror::Error;

use crate::types::SampleKind;

/// Orientation engine error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Matrix rank mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("Invalid matrix shape: {len} elements is not a non-empty square")]
    InvalidShape { len: usize },

    #[error("Malformed {kind:?} sample: {reason}")]
    MalformedSample { kind: SampleKind, reason: String },

    #[error("Sensor not available: {0:?}")]
    SensorUnavailable(SampleKind),

    #[error("Sample queue closed")]
    QueueClosed,

    #[error("Session error: {0}")]
    Session(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn malformed(kind: SampleKind, reason: impl Into<String>) -> Self {
        EngineError::MalformedSample {
            kind,
            reason: reason.into(),
        }
    }

    /// True for errors caused by untrusted sensor input rather than a broken precondition.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineError::MalformedSample { .. })
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Session(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Session(err.to_string())
    }
}
