//! Settings types with compiled defaults.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// Listener, liveness, and grace-window settings.
    pub server: ServerSettings,
    /// Per-command rate limits, keyed by command name.
    pub rate_limits: RateLimitSettings,
    /// External collaborator endpoints.
    pub services: ServiceSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Listener, liveness, and grace-window settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address for both listeners.
    pub host: String,
    /// Public WebSocket port.
    pub port: u16,
    /// Internal administrative HTTP port.
    pub admin_port: u16,
    /// Heartbeat cadence advertised to clients in Hello, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a connection is force-closed, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// How often the liveness timer checks the last heartbeat, in milliseconds.
    pub liveness_check_ms: u64,
    /// How long a dropped session waits for a resume before eviction.
    pub disconnect_grace_ms: u64,
    /// How long an empty non-persistent group survives before deletion.
    pub empty_group_grace_ms: u64,
    /// Upper bound on a single handler invocation, in milliseconds.
    pub handler_timeout_ms: u64,
    /// Maximum inbound frame size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue depth.
    pub outbound_buffer: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
            admin_port: 9002,
            heartbeat_interval_ms: 5_000,
            heartbeat_timeout_ms: 15_000,
            liveness_check_ms: 1_000,
            disconnect_grace_ms: 10_000,
            empty_group_grace_ms: 30_000,
            handler_timeout_ms: 10_000,
            max_message_size: 64 * 1024,
            outbound_buffer: 256,
        }
    }
}

impl ServerSettings {
    /// Heartbeat timeout as a `Duration`.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Liveness check interval as a `Duration`.
    pub fn liveness_check(&self) -> Duration {
        Duration::from_millis(self.liveness_check_ms)
    }

    /// Disconnect grace window as a `Duration`.
    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    /// Empty-group grace window as a `Duration`.
    pub fn empty_group_grace(&self) -> Duration {
        Duration::from_millis(self.empty_group_grace_ms)
    }

    /// Handler timeout as a `Duration`.
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }
}

/// Fixed-window limit for one command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRule {
    /// Window length in milliseconds.
    pub interval_ms: u64,
    /// Invocations allowed per window.
    pub limit: u32,
}

impl RateLimitRule {
    /// Construct a rule.
    pub const fn new(interval_ms: u64, limit: u32) -> Self {
        Self { interval_ms, limit }
    }

    /// Window length as a `Duration`.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Per-command rate limits keyed by command name (e.g. `"SendMessage"`).
///
/// Commands absent from the map are not rate limited.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateLimitSettings(pub BTreeMap<String, RateLimitRule>);

impl RateLimitSettings {
    /// Rule for a command, if any.
    pub fn rule(&self, command: &str) -> Option<RateLimitRule> {
        self.0.get(command).copied()
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        let rules = [
            ("CreateGroup", RateLimitRule::new(10_000, 3)),
            ("Join", RateLimitRule::new(10_000, 5)),
            ("UpdateGroup", RateLimitRule::new(10_000, 10)),
            ("UpdateUser", RateLimitRule::new(5_000, 10)),
            ("InquireHeating", RateLimitRule::new(10_000, 3)),
            ("SendDeviceState", RateLimitRule::new(1_000, 10)),
            ("SendMessage", RateLimitRule::new(5_000, 10)),
            ("SendReaction", RateLimitRule::new(5_000, 15)),
            ("ResumeSession", RateLimitRule::new(30_000, 5)),
            ("LinkUser", RateLimitRule::new(30_000, 5)),
        ];
        Self(
            rules
                .into_iter()
                .map(|(name, rule)| (name.to_string(), rule))
                .collect(),
        )
    }
}

/// External collaborator endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceSettings {
    /// Base URL of the internal API hosting `/verify`.
    pub internal_api_url: String,
    /// Redis URL for rate-limit counters and device presence. In-memory
    /// stores are used when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
    /// Timeout for identity verification calls, in milliseconds.
    pub verify_timeout_ms: u64,
    /// Timeout for counter and presence store calls, in milliseconds.
    pub store_timeout_ms: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            internal_api_url: "http://127.0.0.1:8002".to_string(),
            redis_url: None,
            verify_timeout_ms: 5_000,
            store_timeout_ms: 2_000,
        }
    }
}

impl ServiceSettings {
    /// Verification timeout as a `Duration`.
    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms)
    }

    /// Store timeout as a `Duration`.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
