//! Wire protocol: opcodes, event names, and frame shapes.
//!
//! Inbound frames are `{"op": <number>, "d": <payload?>}`. Outbound frames are
//! `{"op": <number>, "t": <event?>, "d": <payload?>}`. Every server event is
//! carried under [`Op::Event`] with its name in `t`; the connection greeting is
//! the only frame sent under [`Op::Hello`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{SessionId, SessionToken};

// ── Opcodes ─────────────────────────────────────────────────────────

macro_rules! opcodes {
    ($( $(#[$meta:meta])* $name:ident = $code:literal ),+ $(,)?) => {
        /// Numeric opcode carried in the `op` field of every frame.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(into = "u8", try_from = "u8")]
        #[repr(u8)]
        pub enum Op {
            $( $(#[$meta])* $name = $code ),+
        }

        impl Op {
            /// Every opcode, in numeric order.
            pub const ALL: &'static [Op] = &[$(Op::$name),+];

            /// Stable command name used in rate-limit keys, metrics, and settings.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Op::$name => stringify!($name)),+
                }
            }

            /// Look up an opcode by its numeric code.
            pub fn from_code(code: u64) -> Option<Op> {
                match code {
                    $($code => Some(Op::$name),)+
                    _ => None,
                }
            }

            /// Look up an opcode by its command name.
            pub fn from_name(name: &str) -> Option<Op> {
                match name {
                    $(stringify!($name) => Some(Op::$name),)+
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    /// Server greeting carrying session credentials.
    Hello = 0,
    /// Server event; the event name is carried in `t`.
    Event = 1,
    /// Join an existing group.
    Join = 2,
    /// Create a new group.
    CreateGroup = 3,
    /// Push (partial) device telemetry.
    SendDeviceState = 4,
    /// Update group name, visibility, or persistence.
    UpdateGroup = 5,
    /// Update the member's strain, away, or mobile flags.
    UpdateUser = 6,
    /// Leave the current group.
    LeaveGroup = 7,
    /// Ask the group whether everyone is ready to heat.
    InquireHeating = 8,
    /// Start the cycle with whoever is ready.
    StartWithReady = 9,
    /// Forget the connected device.
    DisconnectDevice = 10,
    /// Chat message to the group.
    SendMessage = 11,
    /// Abort an awaiting or running cycle.
    StopAwaiting = 12,
    /// Reattach this connection to an earlier session.
    ResumeSession = 13,
    /// Emoji reaction to the group.
    SendReaction = 14,
    /// Delete the current group.
    DeleteGroup = 15,
    /// Hand ownership to another member.
    TransferOwnership = 16,
    /// Remove a member from the group.
    KickFromGroup = 17,
    /// Deprecated; superseded by `UpdateUser`.
    AwayState = 18,
    /// Deprecated; superseded by `UpdateUser`.
    GroupStrain = 19,
    /// Link an external account by bearer token.
    LinkUser = 20,
    /// Deprecated; superseded by `UpdateUser`.
    SetMobile = 21,
    /// Client liveness signal.
    Heartbeat = 22,
}

impl From<Op> for u8 {
    fn from(op: Op) -> Self {
        op as u8
    }
}

impl TryFrom<u8> for Op {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Op::from_code(u64::from(code)).ok_or_else(|| format!("unknown opcode {code}"))
    }
}

// ── Events ──────────────────────────────────────────────────────────

/// Server event names, carried in the `t` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum Event {
    GroupCreate,
    GroupCreateError,
    JoinedGroup,
    GroupJoinError,
    GroupUserJoin,
    GroupUserLeft,
    GroupUserKicked,
    GroupUserUpdate,
    GroupUserDeviceUpdate,
    GroupUserDeviceDisconnect,
    GroupUpdate,
    GroupDelete,
    GroupActionError,
    GroupHeatInquiry,
    GroupHeatBegin,
    GroupMessage,
    GroupReaction,
    SessionResumed,
    SessionResumeError,
    RateLimited,
    InternalError,
    Deprecated,
    UserLinkSuccess,
    UserLinkError,
    PublicGroupsUpdate,
    RemoteAction,
}

// ── Frames ──────────────────────────────────────────────────────────

/// A client-to-server frame.
///
/// `op` is kept raw so that unknown opcodes can be answered rather than
/// rejected at parse time.
#[derive(Clone, Debug, Deserialize)]
pub struct InboundFrame {
    /// Raw numeric opcode.
    pub op: u64,
    /// Optional payload.
    #[serde(default)]
    pub d: Option<Value>,
}

impl InboundFrame {
    /// Parse a text frame. Returns `None` for anything that is not a JSON
    /// object with a numeric `op`.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// A server-to-client frame.
#[derive(Clone, Debug, Serialize)]
pub struct OutboundFrame {
    /// Opcode.
    pub op: Op,
    /// Event name, present when `op` is [`Op::Event`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<Event>,
    /// Payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
}

impl OutboundFrame {
    /// Build an event frame.
    pub fn event(event: Event, data: Value) -> Self {
        Self {
            op: Op::Event,
            t: Some(event),
            d: Some(data),
        }
    }

    /// Build an event frame with no payload.
    pub fn bare(event: Event) -> Self {
        Self {
            op: Op::Event,
            t: Some(event),
            d: None,
        }
    }

    /// Build the connection greeting.
    pub fn hello(hello: &Hello) -> Self {
        Self {
            op: Op::Hello,
            t: None,
            d: serde_json::to_value(hello).ok(),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_text(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

/// Greeting payload pushed on connect.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hello {
    /// The new session's id.
    pub session_id: SessionId,
    /// The secret needed to resume this session later.
    pub session_token: SessionToken,
    /// Expected heartbeat cadence, in milliseconds.
    pub heartbeat_interval: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
