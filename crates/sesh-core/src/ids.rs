//! Branded ID newtypes for type safety.
//!
//! Sessions and groups are only ever referenced by id through the gateway
//! registries, so each id is a distinct newtype around `String`. A group id
//! can never be passed where a session id is expected.
//!
//! Generators differ per type: session ids are UUID v4, group ids are short
//! numeric codes users can type, and session tokens are random lowercase
//! alphanumeric secrets.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

const TOKEN_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const TOKEN_LEN: usize = 32;
const GROUP_ID_LEN: usize = 6;

fn new_v4() -> String {
    Uuid::new_v4().to_string()
}

fn random_from(charset: &[u8], len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| char::from(charset[rng.random_range(0..charset.len())]))
        .collect()
}

fn new_group_code() -> String {
    random_from(b"0123456789", GROUP_ID_LEN)
}

fn new_token() -> String {
    random_from(TOKEN_CHARSET, TOKEN_LEN)
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $generate:path) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh random value.
            #[must_use]
            pub fn new() -> Self {
                Self($generate())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Unique identifier for a session. Stable across resumes.
    SessionId, new_v4
}

branded_id! {
    /// Six-digit identifier for a group, short enough to share verbally.
    GroupId, new_group_code
}

branded_id! {
    /// Secret presented by a client to resume a session. Rotates per connection.
    SessionToken, new_token
}

impl SessionToken {
    /// Compare against a presented token without short-circuiting on the
    /// first differing byte.
    pub fn matches(&self, presented: &str) -> bool {
        let a = self.0.as_bytes();
        let b = presented.as_bytes();
        if a.len() != b.len() {
            return false;
        }
        a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
