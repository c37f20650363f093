//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;

use crate::registry::Registry;

/// Liveness snapshot of the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the gateway answers.
    pub status: &'static str,
    /// Seconds since the gateway started.
    pub uptime_secs: u64,
    /// Sessions whose socket is open.
    pub connections: usize,
    /// Registered sessions, including those in disconnect grace.
    pub sessions: usize,
    /// Registered groups.
    pub groups: usize,
}

impl HealthResponse {
    /// Read the live counts out of `reg`.
    pub fn collect(started: Instant, reg: &Registry) -> Self {
        Self {
            status: "ok",
            uptime_secs: started.elapsed().as_secs(),
            connections: reg.open_connection_count(),
            sessions: reg.session_count(),
            groups: reg.group_count(),
        }
    }
}
