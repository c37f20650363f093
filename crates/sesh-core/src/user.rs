//! Linked external identities.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Capability bit set carried on a linked user record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserFlags(pub u64);

impl UserFlags {
    /// May administer any group regardless of ownership.
    pub const ADMIN: u64 = 1 << 0;

    /// Whether every bit in `flag` is set.
    pub fn contains(self, flag: u64) -> bool {
        self.0 & flag == flag
    }
}

/// User record returned by identity verification.
///
/// Only `id` and `flags` are interpreted; every other field is carried
/// through to clients untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkedUser {
    /// External user id.
    pub id: String,
    /// Capability flags.
    #[serde(default)]
    pub flags: UserFlags,
    /// Remaining opaque profile fields.
    #[serde(flatten)]
    pub profile: Map<String, Value>,
}

impl LinkedUser {
    /// Whether this user holds admin rights.
    pub fn is_admin(&self) -> bool {
        self.flags.contains(UserFlags::ADMIN)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
