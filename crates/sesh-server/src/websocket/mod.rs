//! WebSocket transport: connection handles, heartbeat liveness, and the
//! per-socket read/write loop.

pub mod connection;
pub mod heartbeat;
pub mod socket;
