//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why a gateway configuration could not be produced.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read settings file {}: {source}", path.display())]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON or does not fit the settings shape.
    #[error("malformed settings: {0}")]
    Json(#[from] serde_json::Error),

    /// Liveness would fire before a client is due to send its next heartbeat.
    #[error("heartbeatTimeoutMs ({timeout_ms}) must exceed heartbeatIntervalMs ({interval_ms})")]
    HeartbeatWindow {
        /// Configured timeout.
        timeout_ms: u64,
        /// Configured interval.
        interval_ms: u64,
    },

    /// A periodic timer was given a zero period.
    #[error("{field} must be positive")]
    ZeroPeriod {
        /// Offending settings key.
        field: &'static str,
    },

    /// A rate-limit rule with an empty window or zero budget.
    #[error("rate limit for {command} needs a positive intervalMs and limit")]
    RateLimitRule {
        /// Command the rule belongs to.
        command: String,
    },

    /// Verification would outlive the handler that awaits it.
    #[error("verifyTimeoutMs ({verify_ms}) must be below handlerTimeoutMs ({handler_ms})")]
    VerifyTimeout {
        /// Configured verification timeout.
        verify_ms: u64,
        /// Configured handler timeout.
        handler_ms: u64,
    },

    /// Public and admin listeners configured on the same fixed port.
    #[error("adminPort {0} collides with the public port")]
    PortCollision(u16),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
