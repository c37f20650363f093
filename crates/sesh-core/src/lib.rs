//! # sesh-core
//!
//! Shared vocabulary for the sesh group gateway.
//!
//! - **Branded IDs**: [`SessionId`], [`GroupId`], [`SessionToken`] newtypes
//! - **Wire protocol**: [`Op`] opcodes, [`Event`] names, inbound/outbound frames
//! - **Errors**: [`GatewayError`] plus machine-readable error codes
//! - **Device model**: [`DeviceState`] telemetry and the state codes the gateway reacts to
//! - **Linked users**: [`LinkedUser`] and capability [`UserFlags`]
//! - **Logging**: [`logging::init_subscriber`]

#![deny(unsafe_code)]

pub mod device;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod protocol;
pub mod user;

pub use device::DeviceState;
pub use errors::GatewayError;
pub use ids::{GroupId, SessionId, SessionToken};
pub use protocol::{Event, InboundFrame, Op, OutboundFrame};
pub use user::{LinkedUser, UserFlags};
