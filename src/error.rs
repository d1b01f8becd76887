// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy for the sync pipeline.
//!
//! Every failure that crosses a component boundary is a [`SyncError`]. The
//! retrier, the circuit breaker and the sync job never probe error types
//! structurally; they ask [`SyncError::kind`] and match on the [`ErrorKind`].
//!
//! | Kind           | Variants                                              | Retried |
//! |----------------|-------------------------------------------------------|---------|
//! | `Retryable`    | `Transport`, `Timeout`, `Http` 5xx / 408 / 429        | yes     |
//! | `NonRetryable` | `Http` other 4xx, `InvalidRequest`, `Decode`          | no      |
//! | `CircuitOpen`  | `CircuitOpen`                                         | no      |
//! | `Cancelled`    | `Cancelled`, `DeadlineExceeded`                       | no      |
//! | `Domain`       | storage, unsupported source/operation, config, panics | no      |

use thiserror::Error;

use crate::source::resilient::classify_status;
use crate::storage::traits::StorageError;

/// Classification used by the retrier and the resilient client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Retryable,
    NonRetryable,
    CircuitOpen,
    Cancelled,
    Domain,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retryable => write!(f, "retryable"),
            Self::NonRetryable => write!(f, "non_retryable"),
            Self::CircuitOpen => write!(f, "circuit_open"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Domain => write!(f, "domain"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// Connection refused, reset, DNS failure...
    #[error("transport error: {0}")]
    Transport(String),

    /// Per-attempt timeout enforced by the transport
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The remote answered with a non-success status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The request could not be built (bad URL, missing parameter)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The response body did not match the expected shape
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The named circuit breaker rejected the call
    #[error("circuit breaker '{0}' is open")]
    CircuitOpen(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("api source '{0}' is not supported")]
    UnsupportedSource(String),

    #[error("operation '{operation}' is not supported for api source '{api_source}'")]
    UnsupportedOperation {
        api_source: String,
        operation: String,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("job panicked: {0}")]
    JobPanicked(String),
}

impl SyncError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) | Self::Timeout(_) => ErrorKind::Retryable,
            Self::Http { status, .. } => classify_status(*status),
            Self::InvalidRequest(_) | Self::Decode(_) => ErrorKind::NonRetryable,
            Self::CircuitOpen(_) => ErrorKind::CircuitOpen,
            Self::Cancelled | Self::DeadlineExceeded => ErrorKind::Cancelled,
            Self::Storage(_)
            | Self::UnsupportedSource(_)
            | Self::UnsupportedOperation { .. }
            | Self::NotFound(_)
            | Self::Config(_)
            | Self::JobPanicked(_) => ErrorKind::Domain,
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }

    /// True for cancellation and deadline expiry.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_builder() {
            Self::InvalidRequest(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
