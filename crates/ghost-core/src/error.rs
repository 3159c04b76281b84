//! Error types for the GHOST client.
//!
//! [`GhostError`] consolidates every failure the transport and the
//! acquisition controller can produce. The variants map onto distinct
//! recovery strategies:
//!
//! - `Connection`: the TCP link could not be established or has been lost.
//!   Fatal; never retried automatically, because the device-side session
//!   state is unknown after a disconnect.
//! - `Transport`: a send or receive failed at the I/O layer while the link
//!   was still up. Retried a bounded number of times during status polling,
//!   fatal everywhere else.
//! - `Timeout`: a reply did not arrive in time, or an acquisition exceeded
//!   its computed ceiling. Surfaced after the retry budget is exhausted.
//! - `Validation`: a command violates protocol constraints or a caller
//!   supplied an invalid parameter. Never retried.
//! - `Acquisition`: the acquisition sequence failed after its retry policy
//!   ran out; carries the last device state seen before the failure.

use thiserror::Error;

/// Convenience alias for results using the client error type.
pub type Result<T> = std::result::Result<T, GhostError>;

/// Primary error type for the GHOST client driver.
#[derive(Error, Debug)]
pub enum GhostError {
    /// The TCP connection could not be established or has been lost.
    #[error("connection error: {0}")]
    Connection(String),

    /// A send/receive operation failed at the I/O layer.
    #[error("transport error: {0}")]
    Transport(String),

    /// A reply did not arrive, or an operation exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// A command violates protocol constraints or a parameter is invalid.
    #[error("validation error: {0}")]
    Validation(String),

    /// The acquisition sequence failed after exhausting its retry policy.
    #[error("acquisition failed: {message} (last device state: {last_state})")]
    Acquisition {
        /// Description of the failure that ended the session.
        message: String,
        /// Last device state observed before the failure.
        last_state: String,
    },
}

impl GhostError {
    /// Whether the error may clear on its own and is worth retrying.
    ///
    /// Only transport-layer hiccups and missing replies qualify; connection
    /// loss, validation failures and exhausted acquisitions are permanent
    /// for the current session.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GhostError::Connection("refused by 127.0.0.1:4000".to_string());
        assert_eq!(err.to_string(), "connection error: refused by 127.0.0.1:4000");

        let err = GhostError::Acquisition {
            message: "SAVE failed twice".to_string(),
            last_state: "IDLE".to_string(),
        };
        assert!(err.to_string().contains("SAVE failed twice"));
        assert!(err.to_string().contains("last device state: IDLE"));
    }

    #[test]
    fn test_transience_classification() {
        assert!(GhostError::Transport("broken pipe".into()).is_transient());
        assert!(GhostError::Timeout("no reply in 5s".into()).is_transient());
        assert!(!GhostError::Connection("lost".into()).is_transient());
        assert!(!GhostError::Validation("command too long".into()).is_transient());
        assert!(!GhostError::Acquisition {
            message: "save failed".into(),
            last_state: "BUSY".into(),
        }
        .is_transient());
    }
}
