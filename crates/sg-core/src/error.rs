//! Engine error taxonomy.
//!
//! Every error that can cross a worker boundary has a stable [`ErrorCode`]
//! and travels as an [`ErrorPayload`]. Cancellation is deliberately absent:
//! a cancelled job resolves with a cancelled outcome, not an error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable, serializable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Io,
    WorkerUnavailable,
    NotReady,
    Timeout,
    InvalidPattern,
    UnsupportedHash,
    Backend,
    WorkerFault,
    Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A file read failed. Chunk fetches that fail this way are retried on
    /// the next range request.
    #[error("I/O error: {0}")]
    Io(String),

    #[error("{0} worker is unavailable")]
    WorkerUnavailable(String),

    #[error("not ready: {0}")]
    NotReady(String),

    #[error("job timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("unsupported hash type: {0}")]
    UnsupportedHash(String),

    /// A matching, hashing or parsing backend rejected its input.
    #[error("{0}")]
    Backend(String),

    /// The worker crashed; the job's correlation may have been lost.
    #[error("worker fault: {0}")]
    WorkerFault(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Convenient crate-wide result type
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// The `{errorCode, error}` pair that crosses the worker boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub error_code: ErrorCode,
    pub error: String,
}

impl EngineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Io(_) => ErrorCode::Io,
            Self::WorkerUnavailable(_) => ErrorCode::WorkerUnavailable,
            Self::NotReady(_) => ErrorCode::NotReady,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::InvalidPattern(_) => ErrorCode::InvalidPattern,
            Self::UnsupportedHash(_) => ErrorCode::UnsupportedHash,
            Self::Backend(_) => ErrorCode::Backend,
            Self::WorkerFault(_) => ErrorCode::WorkerFault,
            Self::Protocol(_) => ErrorCode::Protocol,
        }
    }

    /// The variant's payload without the display prefix.
    fn detail(&self) -> String {
        match self {
            Self::Io(s)
            | Self::WorkerUnavailable(s)
            | Self::NotReady(s)
            | Self::InvalidPattern(s)
            | Self::UnsupportedHash(s)
            | Self::Backend(s)
            | Self::WorkerFault(s)
            | Self::Protocol(s) => s.clone(),
            Self::Timeout { timeout_ms } => timeout_ms.to_string(),
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            error_code: self.code(),
            error: self.detail(),
        }
    }

    pub fn from_payload(payload: ErrorPayload) -> Self {
        let ErrorPayload { error_code, error } = payload;
        match error_code {
            ErrorCode::Io => Self::Io(error),
            ErrorCode::WorkerUnavailable => Self::WorkerUnavailable(error),
            ErrorCode::NotReady => Self::NotReady(error),
            ErrorCode::Timeout => match error.parse() {
                Ok(timeout_ms) => Self::Timeout { timeout_ms },
                Err(_) => Self::Protocol(format!("malformed timeout payload: {error}")),
            },
            ErrorCode::InvalidPattern => Self::InvalidPattern(error),
            ErrorCode::UnsupportedHash => Self::UnsupportedHash(error),
            ErrorCode::Backend => Self::Backend(error),
            ErrorCode::WorkerFault => Self::WorkerFault(error),
            ErrorCode::Protocol => Self::Protocol(error),
        }
    }

    /// Transient failures are retried silently instead of being shown.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        Self::Io(format!("{:#}", err))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trip_keeps_variant() {
        let errors = [
            EngineError::Io("disk gone".into()),
            EngineError::Timeout { timeout_ms: 1500 },
            EngineError::UnsupportedHash("md4".into()),
            EngineError::WorkerFault("boom".into()),
        ];
        for err in errors {
            assert_eq!(EngineError::from_payload(err.to_payload()), err);
        }
    }

    #[test]
    fn timeout_message_carries_value() {
        let err = EngineError::Timeout { timeout_ms: 250 };
        assert_eq!(err.to_string(), "job timed out after 250 ms");
        assert_eq!(err.code(), ErrorCode::Timeout);
    }

    #[test]
    fn payload_serializes_with_wire_names() {
        let payload = EngineError::InvalidPattern("odd digit count".into()).to_payload();
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["errorCode"], "INVALID_PATTERN");
        assert_eq!(json["error"], "odd digit count");
    }

    #[test]
    fn malformed_timeout_payload_is_protocol_error() {
        let payload = ErrorPayload {
            error_code: ErrorCode::Timeout,
            error: "soon".into(),
        };
        assert_eq!(EngineError::from_payload(payload).code(), ErrorCode::Protocol);
    }

    #[test]
    fn anyhow_context_becomes_io() {
        let err: EngineError = anyhow::anyhow!("inner").context("outer").into();
        assert_eq!(err, EngineError::Io("outer: inner".into()));
        assert!(err.is_transient());
    }
}
