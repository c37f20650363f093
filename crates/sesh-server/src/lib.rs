//! # sesh-server
//!
//! Real-time group session coordination behind an Axum `WebSocket` endpoint.
//!
//! - Sessions with heartbeat liveness, disconnect grace, and token resume
//! - Groups with ownership, visibility, persistence, and the heat cycle
//! - Opcode dispatch gated by a fixed-window rate limiter
//! - Collaborator seams: counter store, device presence, identity verification
//! - Admin HTTP router: health, Prometheus metrics, directory, user pushes
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod admin;
pub mod commands;
pub mod dispatch;
pub mod gateway;
pub mod group;
pub mod health;
pub mod identity;
pub mod metrics;
pub mod names;
pub mod presence;
pub mod ratelimit;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod stores;
pub mod validation;
pub mod websocket;

#[cfg(test)]
mod test_support;
