//! Gateway error codes and error type.
//!
//! Every command reports failures on an error channel (an [`Event`]) with a
//! machine-readable `code`. Validation and state errors use the channel of
//! the command that raised them; protocol, collaborator, and internal faults
//! always go out as [`Event::InternalError`].

use serde_json::{Value, json};

use crate::protocol::Event;

// ── Error code constants ────────────────────────────────────────────

/// Opcode not in the dispatch table.
pub const INVALID_OP_CODE: &str = "INVALID_OP_CODE";
/// Payload failed validation.
pub const INVALID_DATA: &str = "INVALID_DATA";
/// Unexpected internal fault.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
/// Caller is not in a group (or the group vanished).
pub const NOT_IN_GROUP: &str = "NOT_IN_GROUP";
/// Caller lacks owner (or admin) rights.
pub const NOT_OWNER: &str = "NOT_OWNER";
/// Transition not allowed from the group's current state.
pub const INVALID_GROUP_STATE: &str = "INVALID_GROUP_STATE";
/// The owner cannot be kicked.
pub const CANNOT_KICK_OWNER: &str = "CANNOT_KICK_OWNER";
/// Target session is not a member of the caller's group.
pub const USER_NOT_IN_GROUP: &str = "USER_NOT_IN_GROUP";
/// Persistent groups can only be deleted by admins.
pub const CANNOT_DELETE_PERSISTENT_GROUP: &str = "CANNOT_DELETE_PERSISTENT_GROUP";
/// No device state is attached to the session.
pub const NO_DEVICE_CONNECTED: &str = "NO_DEVICE_CONNECTED";
/// Caller already belongs to a group.
pub const ALREADY_IN_A_GROUP: &str = "already_in_a_group";
/// Target group does not exist.
pub const INVALID_GROUP: &str = "invalid_group";
/// Resume target missing or token mismatch.
pub const INVALID_SESSION: &str = "INVALID_SESSION";
/// Resume payload malformed.
pub const INVALID_SESSION_RESUME_DATA: &str = "INVALID_SESSION_RESUME_DATA";
/// Identity token rejected by the verifier.
pub const INVALID_TOKEN: &str = "INVALID_TOKEN";
/// Identity verifier unreachable or failed.
pub const VERIFICATION_UNAVAILABLE: &str = "VERIFICATION_UNAVAILABLE";
/// Rate-limit counter store unreachable or failed.
pub const RATE_LIMIT_UNAVAILABLE: &str = "RATE_LIMIT_UNAVAILABLE";

/// Error type returned by command handlers.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Payload was malformed, oversized, or forbidden.
    #[error("validation failed: {code}")]
    Validation {
        /// Machine-readable code.
        code: &'static str,
    },

    /// Operation is not valid for the current membership, ownership, or state.
    #[error("invalid state: {code}")]
    State {
        /// Machine-readable code.
        code: &'static str,
    },

    /// Failure reported on a specific channel rather than the command's own.
    #[error("{code}")]
    Rejected {
        /// Channel the error is reported on.
        event: Event,
        /// Machine-readable code.
        code: &'static str,
    },

    /// Opcode not in the dispatch table.
    #[error("unknown opcode {op}")]
    UnknownOp {
        /// Raw opcode received.
        op: u64,
    },

    /// An external collaborator failed.
    #[error("{code}: {message}")]
    Collaborator {
        /// Machine-readable code.
        code: &'static str,
        /// Underlying failure, for logs only.
        message: String,
    },

    /// Unexpected fault (panic, timeout).
    #[error("internal error: {message}")]
    Internal {
        /// Description, for logs only.
        message: String,
    },
}

impl GatewayError {
    /// Shorthand for a validation failure with [`INVALID_DATA`].
    pub fn invalid_data() -> Self {
        Self::Validation { code: INVALID_DATA }
    }

    /// Shorthand for a state error.
    pub fn state(code: &'static str) -> Self {
        Self::State { code }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { code }
            | Self::State { code }
            | Self::Rejected { code, .. }
            | Self::Collaborator { code, .. } => code,
            Self::UnknownOp { .. } => INVALID_OP_CODE,
            Self::Internal { .. } => INTERNAL_ERROR,
        }
    }

    /// Event the error is reported on, given the command's own error channel.
    pub fn channel(&self, command_channel: Event) -> Event {
        match self {
            Self::Validation { .. } | Self::State { .. } => command_channel,
            Self::Rejected { event, .. } => *event,
            Self::UnknownOp { .. } | Self::Collaborator { .. } | Self::Internal { .. } => {
                Event::InternalError
            }
        }
    }

    /// Wire payload sent to the originating session.
    pub fn to_payload(&self) -> Value {
        json!({ "code": self.code() })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
