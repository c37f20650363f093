//! Command payload schemas.
//!
//! Every inbound payload is decoded into a typed struct. Decoding failure,
//! unknown fields on partial updates, and constraint violations all surface
//! as [`GatewayError::invalid_data`].

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sesh_core::{GatewayError, GroupId, SessionId};

use crate::group::Visibility;

/// Longest group name accepted.
pub const MAX_GROUP_NAME: usize = 32;
/// Longest strain tag accepted.
pub const MAX_STRAIN: usize = 48;
/// Longest chat message accepted.
pub const MAX_MESSAGE: usize = 1024;

/// Terms rejected in group names.
pub const DEFAULT_BLOCKED_TERMS: &[&str] =
    &["discord.gg", "discord.me", "d.gg", "twitter.com", "x.com"];

/// Decode `data` as `T`. A missing payload decodes as `null`.
pub fn parse_payload<T: DeserializeOwned>(data: Option<Value>) -> Result<T, GatewayError> {
    serde_json::from_value(data.unwrap_or(Value::Null)).map_err(|_| GatewayError::invalid_data())
}

fn check_len(value: &str, max: usize) -> Result<(), GatewayError> {
    if value.chars().count() > max {
        return Err(GatewayError::invalid_data());
    }
    Ok(())
}

fn check_session_id(value: &SessionId) -> Result<(), GatewayError> {
    uuid::Uuid::parse_str(value.as_str())
        .map(|_| ())
        .map_err(|_| GatewayError::invalid_data())
}

/// Longest emoji sequence `emojis` knows, in chars (family ZWJ plus skin tones).
const MAX_EMOJI_CHARS: usize = 16;

/// Whether `value` is one or more complete emoji.
///
/// Each emoji must be a fully formed sequence from the Unicode emoji list,
/// so bare symbols such as dashes are rejected and keycaps are accepted.
pub fn is_emoji(value: &str) -> bool {
    let mut rest = value;
    while !rest.is_empty() {
        let longest = rest
            .char_indices()
            .take(MAX_EMOJI_CHARS)
            .map(|(i, c)| i + c.len_utf8())
            .filter(|&end| emojis::get(&rest[..end]).is_some())
            .last();
        match longest {
            Some(end) => rest = &rest[end..],
            None => return false,
        }
    }
    !value.is_empty()
}

// ── Payloads ────────────────────────────────────────────────────────

/// `CreateGroup`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateGroupPayload {
    /// Display name.
    pub name: Option<String>,
    /// Directory visibility.
    pub visibility: Option<Visibility>,
}

impl CreateGroupPayload {
    /// Decode and check. A missing payload is an empty request.
    pub fn parse(data: Option<Value>) -> Result<Self, GatewayError> {
        let payload: Option<Self> = parse_payload(data)?;
        let payload = payload.unwrap_or_default();
        if let Some(name) = &payload.name {
            check_len(name, MAX_GROUP_NAME)?;
        }
        Ok(payload)
    }
}

/// `Join`.
#[derive(Debug, Deserialize)]
pub struct JoinPayload {
    /// Target group.
    pub group_id: GroupId,
}

/// Partial group update. Only present fields are applied.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupPatch {
    /// New name.
    pub name: Option<String>,
    /// New visibility.
    pub visibility: Option<Visibility>,
    /// New persistence flag (admin only).
    pub persistent: Option<bool>,
}

impl GroupPatch {
    /// Decode and check. An empty patch is rejected.
    pub fn parse(data: Option<Value>) -> Result<Self, GatewayError> {
        let patch: Self = parse_payload(data)?;
        if patch.is_empty() {
            return Err(GatewayError::invalid_data());
        }
        if let Some(name) = &patch.name {
            check_len(name, MAX_GROUP_NAME)?;
        }
        Ok(patch)
    }

    /// No field present.
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.visibility.is_none() && self.persistent.is_none()
    }
}

/// Partial member update. `strain: null` clears the tag.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserPatch {
    /// `Some(None)` clears, `Some(Some(_))` sets.
    #[serde(default, deserialize_with = "double_option")]
    pub strain: Option<Option<String>>,
    /// Away flag.
    pub away: Option<bool>,
    /// Mobile flag.
    pub mobile: Option<bool>,
}

impl UserPatch {
    /// Decode and check. An empty patch is rejected.
    pub fn parse(data: Option<Value>) -> Result<Self, GatewayError> {
        let patch: Self = parse_payload(data)?;
        if patch.strain.is_none() && patch.away.is_none() && patch.mobile.is_none() {
            return Err(GatewayError::invalid_data());
        }
        if let Some(Some(strain)) = &patch.strain {
            check_len(strain, MAX_STRAIN)?;
        }
        Ok(patch)
    }
}

/// Field decoder telling an explicit `null` (`Some(None)`) from an absent
/// field (`None`, via `#[serde(default)]`).
pub(crate) fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Names a target member (`KickFromGroup`, `TransferOwnership`).
#[derive(Debug, Deserialize)]
pub struct TargetPayload {
    /// Target session.
    pub session_id: SessionId,
}

impl TargetPayload {
    /// Decode and check the id shape.
    pub fn parse(data: Option<Value>) -> Result<Self, GatewayError> {
        let payload: Self = parse_payload(data)?;
        check_session_id(&payload.session_id)?;
        Ok(payload)
    }
}

/// `SendMessage`.
#[derive(Debug, Deserialize)]
pub struct MessagePayload {
    /// Message text.
    pub content: String,
}

impl MessagePayload {
    /// Decode and check the length bounds.
    pub fn parse(data: Option<Value>) -> Result<Self, GatewayError> {
        let payload: Self = parse_payload(data)?;
        if payload.content.is_empty() {
            return Err(GatewayError::invalid_data());
        }
        check_len(&payload.content, MAX_MESSAGE)?;
        Ok(payload)
    }
}

/// `SendReaction`.
#[derive(Debug, Deserialize)]
pub struct ReactionPayload {
    /// One or more emoji.
    pub emoji: String,
}

impl ReactionPayload {
    /// Decode and check the emoji.
    pub fn parse(data: Option<Value>) -> Result<Self, GatewayError> {
        let payload: Self = parse_payload(data)?;
        if !is_emoji(&payload.emoji) {
            return Err(GatewayError::invalid_data());
        }
        Ok(payload)
    }
}

/// `ResumeSession`.
#[derive(Debug, Deserialize)]
pub struct ResumePayload {
    /// Session to resume.
    pub session_id: SessionId,
    /// Its current token.
    pub session_token: String,
}

/// `LinkUser`.
#[derive(Debug, Deserialize)]
pub struct LinkPayload {
    /// Opaque bearer token.
    pub token: String,
}

// ── Name filter ─────────────────────────────────────────────────────

/// Case-insensitive blocklist applied to group names.
#[derive(Clone, Debug)]
pub struct NameFilter {
    pattern: Option<Regex>,
}

impl NameFilter {
    /// Build a filter from literal terms.
    pub fn new(terms: &[&str]) -> Result<Self, regex::Error> {
        if terms.is_empty() {
            return Ok(Self { pattern: None });
        }
        let alternation = terms
            .iter()
            .map(|t| regex::escape(t))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = RegexBuilder::new(&alternation)
            .case_insensitive(true)
            .build()?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    /// Whether `name` contains a blocked term.
    pub fn is_blocked(&self, name: &str) -> bool {
        self.pattern.as_ref().is_some_and(|p| p.is_match(name))
    }

    /// Reject blocked names with `INVALID_DATA`.
    pub fn check(&self, name: &str) -> Result<(), GatewayError> {
        if self.is_blocked(name) {
            return Err(GatewayError::invalid_data());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sesh_core::errors::INVALID_DATA;

    #[test]
    fn create_accepts_missing_payload() {
        let payload = CreateGroupPayload::parse(None).unwrap();
        assert!(payload.name.is_none());
        assert!(payload.visibility.is_none());
    }

    #[test]
    fn create_rejects_long_name() {
        let name = "x".repeat(33);
        let err = CreateGroupPayload::parse(Some(json!({ "name": name }))).unwrap_err();
        assert_eq!(err.code(), INVALID_DATA);
        assert!(CreateGroupPayload::parse(Some(json!({ "name": "x".repeat(32) }))).is_ok());
    }

    #[test]
    fn create_rejects_bad_visibility() {
        assert!(CreateGroupPayload::parse(Some(json!({ "visibility": "secret" }))).is_err());
        let ok = CreateGroupPayload::parse(Some(json!({ "visibility": "public" }))).unwrap();
        assert_eq!(ok.visibility, Some(Visibility::Public));
    }

    #[test]
    fn group_patch_rejects_unknown_and_empty() {
        assert!(GroupPatch::parse(Some(json!({ "owner": "x" }))).is_err());
        assert!(GroupPatch::parse(Some(json!({}))).is_err());
        assert!(GroupPatch::parse(None).is_err());
        let patch = GroupPatch::parse(Some(json!({ "persistent": true }))).unwrap();
        assert_eq!(patch.persistent, Some(true));
    }

    #[test]
    fn user_patch_strain_null_clears() {
        let patch = UserPatch::parse(Some(json!({ "strain": null }))).unwrap();
        assert_eq!(patch.strain, Some(None));
        let patch = UserPatch::parse(Some(json!({ "away": true }))).unwrap();
        assert_eq!(patch.strain, None);
        assert!(UserPatch::parse(Some(json!({ "strain": "x".repeat(49) }))).is_err());
        assert!(UserPatch::parse(Some(json!({ "nickname": "x" }))).is_err());
    }

    #[test]
    fn target_requires_uuid() {
        assert!(TargetPayload::parse(Some(json!({ "session_id": "nope" }))).is_err());
        let id = uuid::Uuid::new_v4().to_string();
        assert!(TargetPayload::parse(Some(json!({ "session_id": id }))).is_ok());
    }

    #[test]
    fn message_bounds() {
        assert!(MessagePayload::parse(Some(json!({ "content": "" }))).is_err());
        assert!(MessagePayload::parse(Some(json!({ "content": "x".repeat(1025) }))).is_err());
        assert!(MessagePayload::parse(Some(json!({ "content": "x".repeat(1024) }))).is_ok());
        assert!(MessagePayload::parse(None).is_err());
    }

    #[test]
    fn emoji_check() {
        assert!(is_emoji("🔥"));
        assert!(is_emoji("👍🏽"));
        assert!(is_emoji("❤️"));
        assert!(!is_emoji(""));
        assert!(!is_emoji("hi"));
        assert!(!is_emoji("🔥 x"));
        assert!(is_emoji("🔥🔥"));
    }

    #[test]
    fn emoji_check_keycaps_and_dashes() {
        assert!(is_emoji("1️⃣"));
        assert!(is_emoji("👨‍👩‍👧"));
        assert!(!is_emoji("—"));
        assert!(!is_emoji("é"));
        assert!(!is_emoji("1"));
        assert!(ReactionPayload::parse(Some(json!({ "emoji": "—" }))).is_err());
        assert!(ReactionPayload::parse(Some(json!({ "emoji": "1️⃣" }))).is_ok());
        assert!(ReactionPayload::parse(Some(json!({ "emoji": ":)" }))).is_err());
    }

    #[test]
    fn name_filter_is_case_insensitive() {
        let filter = NameFilter::new(DEFAULT_BLOCKED_TERMS).unwrap();
        assert!(filter.is_blocked("join DISCORD.GG/abc"));
        assert!(filter.is_blocked("x.com/me"));
        assert!(!filter.is_blocked("Blue Dream"));
        // Dots are literal, not wildcards.
        assert!(!filter.is_blocked("xycom"));
        assert!(filter.check("Blue Dream").is_ok());
    }

    #[test]
    fn empty_filter_allows_everything() {
        let filter = NameFilter::new(&[]).unwrap();
        assert!(!filter.is_blocked("discord.gg"));
    }
}
