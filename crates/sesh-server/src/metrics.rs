//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// Commands dispatched (counter, labels: op).
pub const COMMANDS_TOTAL: &str = "gateway_commands_total";
/// Command failures (counter, labels: op, code).
pub const COMMAND_ERRORS_TOTAL: &str = "gateway_command_errors_total";
/// Command handling duration seconds (histogram, labels: op).
pub const COMMAND_DURATION_SECONDS: &str = "gateway_command_duration_seconds";
/// Commands rejected by the rate limiter (counter, labels: op).
pub const RATE_LIMITED_TOTAL: &str = "gateway_rate_limited_total";
/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Registered sessions, connected or in grace (gauge).
pub const SESSIONS_ACTIVE: &str = "gateway_sessions_active";
/// Registered groups (gauge).
pub const GROUPS_ACTIVE: &str = "gateway_groups_active";
/// Sessions resumed (counter).
pub const SESSIONS_RESUMED_TOTAL: &str = "gateway_sessions_resumed_total";
/// Sessions evicted after the disconnect grace (counter).
pub const SESSIONS_EVICTED_TOTAL: &str = "gateway_sessions_evicted_total";
/// Connections closed for missing heartbeats (counter).
pub const HEARTBEAT_TIMEOUTS_TOTAL: &str = "gateway_heartbeat_timeouts_total";
/// Heat cycles completed (counter).
pub const HEAT_CYCLES_TOTAL: &str = "gateway_heat_cycles_total";
/// Collaborator failures (counter, labels: collaborator).
pub const COLLABORATOR_ERRORS_TOTAL: &str = "gateway_collaborator_errors_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            COMMANDS_TOTAL,
            COMMAND_ERRORS_TOTAL,
            COMMAND_DURATION_SECONDS,
            RATE_LIMITED_TOTAL,
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            SESSIONS_ACTIVE,
            GROUPS_ACTIVE,
            SESSIONS_RESUMED_TOTAL,
            SESSIONS_EVICTED_TOTAL,
            HEARTBEAT_TIMEOUTS_TOTAL,
            HEAT_CYCLES_TOTAL,
            COLLABORATOR_ERRORS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
