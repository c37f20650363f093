//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`GatewaySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `SESH_*` environment variable overrides (highest priority)
//! 4. Reject combinations that cannot work (see [`validate`])
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::GatewaySettings;

/// Default settings file name, resolved against the working directory.
pub const DEFAULT_SETTINGS_FILE: &str = "sesh.json";

/// Resolve the settings file path: `SESH_SETTINGS` if set, else `./sesh.json`.
pub fn settings_path() -> PathBuf {
    read_env_string("SESH_SETTINGS").map_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE), PathBuf::from)
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<GatewaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<GatewaySettings> {
    let defaults = serde_json::to_value(GatewaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: GatewaySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Reject settings the gateway cannot run with.
pub fn validate(settings: &GatewaySettings) -> Result<()> {
    let server = &settings.server;
    if server.heartbeat_timeout_ms <= server.heartbeat_interval_ms {
        return Err(SettingsError::HeartbeatWindow {
            timeout_ms: server.heartbeat_timeout_ms,
            interval_ms: server.heartbeat_interval_ms,
        });
    }
    if server.liveness_check_ms == 0 {
        return Err(SettingsError::ZeroPeriod {
            field: "livenessCheckMs",
        });
    }
    if server.port != 0 && server.port == server.admin_port {
        return Err(SettingsError::PortCollision(server.admin_port));
    }
    // LinkUser reports a verification failure only if the verifier gives up
    // before the dispatcher's handler timeout does.
    let verify_ms = settings.services.verify_timeout_ms;
    if verify_ms >= server.handler_timeout_ms {
        return Err(SettingsError::VerifyTimeout {
            verify_ms,
            handler_ms: server.handler_timeout_ms,
        });
    }
    if let Some((command, _)) = settings
        .rate_limits
        .0
        .iter()
        .find(|(_, rule)| rule.interval_ms == 0 || rule.limit == 0)
    {
        return Err(SettingsError::RateLimitRule {
            command: command.clone(),
        });
    }
    Ok(())
}

/// Apply environment variable overrides to loaded settings.
///
/// - Integers must be valid and within the specified range
/// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Invalid values are ignored with a warning (fall back to file/default)
pub fn apply_env_overrides(settings: &mut GatewaySettings) {
    // ── Server settings ─────────────────────────────────────────────
    if let Some(v) = read_env_string("SESH_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("SESH_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_u16("SESH_ADMIN_PORT", 1, 65535) {
        settings.server.admin_port = v;
    }
    if let Some(v) = read_env_u64("SESH_HEARTBEAT_INTERVAL_MS", 500, 600_000) {
        settings.server.heartbeat_interval_ms = v;
    }
    if let Some(v) = read_env_u64("SESH_HEARTBEAT_TIMEOUT_MS", 1_000, 3_600_000) {
        settings.server.heartbeat_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("SESH_DISCONNECT_GRACE_MS", 0, 3_600_000) {
        settings.server.disconnect_grace_ms = v;
    }
    if let Some(v) = read_env_u64("SESH_EMPTY_GROUP_GRACE_MS", 0, 3_600_000) {
        settings.server.empty_group_grace_ms = v;
    }

    // ── Services ────────────────────────────────────────────────────
    if let Some(v) = read_env_string("SESH_INTERNAL_API") {
        settings.services.internal_api_url = v;
    }
    if let Some(v) = read_env_string("SESH_REDIS_URL") {
        settings.services.redis_url = Some(v);
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("SESH_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("SESH_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RateLimitRule;

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({
            "server": {"port": 9000, "host": "0.0.0.0"}
        });
        let source = serde_json::json!({
            "server": {"port": 9100}
        });
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9100);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["items"], serde_json::json!([4]));
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let path = Path::new("/nonexistent/sesh.json");
        let settings = load_settings_from_path(path).unwrap();
        let defaults = GatewaySettings::default();
        assert_eq!(settings.server.admin_port, defaults.server.admin_port);
        assert_eq!(settings.rate_limits, defaults.rate_limits);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sesh.json");
        std::fs::write(
            &path,
            r#"{"server": {"emptyGroupGraceMs": 60000}, "services": {"redisUrl": "redis://cache:6379"}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.server.empty_group_grace_ms, 60_000);
        assert_eq!(
            settings.services.redis_url.as_deref(),
            Some("redis://cache:6379")
        );
        assert_eq!(settings.server.disconnect_grace_ms, 10_000);
    }

    #[test]
    fn rate_limit_file_merges_per_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sesh.json");
        std::fs::write(
            &path,
            r#"{"rateLimits": {"SendMessage": {"intervalMs": 2000, "limit": 1}, "Heartbeat": {"intervalMs": 1000, "limit": 5}}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(
            settings.rate_limits.rule("SendMessage"),
            Some(RateLimitRule::new(2_000, 1))
        );
        assert_eq!(
            settings.rate_limits.rule("Heartbeat"),
            Some(RateLimitRule::new(1_000, 5))
        );
        assert!(settings.rate_limits.rule("CreateGroup").is_some());
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sesh.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn timeout_below_interval_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sesh.json");
        std::fs::write(&path, r#"{"server": {"heartbeatTimeoutMs": 1000}}"#).unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(
            result.unwrap_err(),
            SettingsError::HeartbeatWindow {
                timeout_ms: 1000,
                interval_ms: 5000
            }
        ));
    }

    #[test]
    fn empty_rate_rule_rejected() {
        let mut settings = GatewaySettings::default();
        let _ = settings
            .rate_limits
            .0
            .insert("Join".into(), RateLimitRule::new(0, 1));
        assert!(matches!(
            validate(&settings).unwrap_err(),
            SettingsError::RateLimitRule { command } if command == "Join"
        ));

        let _ = settings
            .rate_limits
            .0
            .insert("Join".into(), RateLimitRule::new(1500, 1));
        assert!(validate(&settings).is_ok());
    }

    #[test]
    fn verify_timeout_must_undercut_handler_timeout() {
        let mut settings = GatewaySettings::default();
        settings.services.verify_timeout_ms = settings.server.handler_timeout_ms;
        assert!(matches!(
            validate(&settings).unwrap_err(),
            SettingsError::VerifyTimeout { .. }
        ));

        settings.services.verify_timeout_ms = settings.server.handler_timeout_ms - 1;
        assert!(validate(&settings).is_ok());
    }

    #[test]
    fn shared_fixed_port_rejected() {
        let mut settings = GatewaySettings::default();
        settings.server.admin_port = settings.server.port;
        assert!(matches!(
            validate(&settings).unwrap_err(),
            SettingsError::PortCollision(9000)
        ));

        settings.server.port = 0;
        settings.server.admin_port = 0;
        assert!(validate(&settings).is_ok());
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("9000", 1, 65535), Some(9000));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
        assert_eq!(parse_u64_range("250", 500, 1000), None);
        assert_eq!(parse_u64_range("abc", 0, 10), None);
    }
}
