//! Opcode routing, rate-limit gating, and fault isolation.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use metrics::{counter, histogram};
use serde_json::{Value, json};
use sesh_core::errors::{INTERNAL_ERROR, RATE_LIMIT_UNAVAILABLE};
use sesh_core::{Event, GatewayError, InboundFrame, Op, OutboundFrame, SessionId};
use sesh_settings::{RateLimitRule, RateLimitSettings};
use tracing::{debug, error, warn};

use crate::gateway::Gateway;
use crate::metrics::{
    COLLABORATOR_ERRORS_TOTAL, COMMAND_DURATION_SECONDS, COMMAND_ERRORS_TOTAL, COMMANDS_TOTAL,
    RATE_LIMITED_TOTAL,
};
use crate::websocket::connection::ClientConnection;

/// Everything a handler needs to act on behalf of one session.
pub struct CommandContext {
    /// The coordinator.
    pub gateway: Arc<Gateway>,
    /// Session issuing the command.
    pub session_id: SessionId,
}

/// Trait implemented by every command handler.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Event on which this command's validation and state errors are reported.
    fn error_channel(&self) -> Event {
        Event::GroupActionError
    }

    /// Execute the command.
    async fn handle(&self, ctx: &CommandContext, data: Option<Value>) -> Result<(), GatewayError>;
}

/// One dispatch table entry.
pub struct Route {
    handler: Option<Arc<dyn CommandHandler>>,
    rate_limit: Option<RateLimitRule>,
}

impl Route {
    /// Whether the opcode is retired and only answered with `Deprecated`.
    pub fn is_deprecated(&self) -> bool {
        self.handler.is_none()
    }

    /// Rate limit applied before the handler runs.
    pub fn rate_limit(&self) -> Option<RateLimitRule> {
        self.rate_limit
    }
}

/// Static mapping from opcode to handler.
pub struct CommandRegistry {
    routes: HashMap<Op, Route>,
}

impl CommandRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// The full command set, rate limited per `limits`.
    pub fn standard(limits: &RateLimitSettings) -> Self {
        let mut registry = Self::new();
        crate::commands::register_all(&mut registry, limits);
        registry
    }

    /// Register a handler for an opcode.
    pub fn register(
        &mut self,
        op: Op,
        handler: impl CommandHandler + 'static,
        rate_limit: Option<RateLimitRule>,
    ) {
        let route = Route {
            handler: Some(Arc::new(handler)),
            rate_limit,
        };
        let _ = self.routes.insert(op, route);
    }

    /// Register a retired opcode.
    pub fn deprecate(&mut self, op: Op) {
        let route = Route {
            handler: None,
            rate_limit: None,
        };
        let _ = self.routes.insert(op, route);
    }

    /// Route for an opcode.
    pub fn route(&self, op: Op) -> Option<&Route> {
        self.routes.get(&op)
    }

    /// Registered opcodes, in numeric order.
    pub fn ops(&self) -> Vec<Op> {
        let mut ops: Vec<Op> = self.routes.keys().copied().collect();
        ops.sort_by_key(|op| *op as u8);
        ops
    }

    /// Run one inbound frame for `session_id`.
    ///
    /// Every failure is reported on `connection` only; nothing here closes
    /// the connection.
    pub async fn dispatch(
        &self,
        gateway: &Arc<Gateway>,
        connection: &ClientConnection,
        session_id: SessionId,
        frame: InboundFrame,
    ) {
        let Some((op, route)) = Op::from_code(frame.op).and_then(|op| Some((op, self.route(op)?)))
        else {
            debug!(op = frame.op, "unknown opcode");
            let err = GatewayError::UnknownOp { op: frame.op };
            let _ = connection.send_frame(&OutboundFrame::event(
                err.channel(Event::InternalError),
                err.to_payload(),
            ));
            return;
        };
        let command = op.as_str();
        counter!(COMMANDS_TOTAL, "op" => command).increment(1);

        let Some(handler) = &route.handler else {
            let _ = connection.send_frame(&OutboundFrame::bare(Event::Deprecated));
            return;
        };

        if let Some(rule) = route.rate_limit {
            match gateway.limiter.allow(command, &session_id, rule).await {
                Ok(true) => {}
                Ok(false) => {
                    counter!(RATE_LIMITED_TOTAL, "op" => command).increment(1);
                    let _ = connection.send_frame(&OutboundFrame::event(
                        Event::RateLimited,
                        json!({ "op": op }),
                    ));
                    return;
                }
                Err(error) => {
                    warn!(command, %error, "rate limit store unavailable");
                    counter!(COLLABORATOR_ERRORS_TOTAL, "collaborator" => "counters").increment(1);
                    let err = GatewayError::Collaborator {
                        code: RATE_LIMIT_UNAVAILABLE,
                        message: error.to_string(),
                    };
                    report(connection, command, handler.error_channel(), &err);
                    return;
                }
            }
        }

        let ctx = CommandContext {
            gateway: Arc::clone(gateway),
            session_id,
        };
        let limit = gateway.handler_timeout();
        let start = std::time::Instant::now();
        let run = AssertUnwindSafe(handler.handle(&ctx, frame.d)).catch_unwind();
        let outcome = match tokio::time::timeout(limit, run).await {
            Ok(Ok(result)) => result,
            Ok(Err(_panic)) => {
                error!(command, session_id = %ctx.session_id, "command handler panicked");
                Err(GatewayError::Internal {
                    message: format!("handler for {command} panicked"),
                })
            }
            Err(_elapsed) => {
                error!(command, session_id = %ctx.session_id, "command handler timed out after {limit:?}");
                Err(GatewayError::Internal {
                    message: format!("handler for {command} timed out"),
                })
            }
        };
        histogram!(COMMAND_DURATION_SECONDS, "op" => command).record(start.elapsed().as_secs_f64());

        if let Err(err) = outcome {
            report(connection, command, handler.error_channel(), &err);
        }
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn report(connection: &ClientConnection, command: &'static str, channel: Event, err: &GatewayError) {
    counter!(COMMAND_ERRORS_TOTAL, "op" => command, "code" => err.code()).increment(1);
    if err.code() == INTERNAL_ERROR {
        error!(command, %err, "command failed");
    } else {
        debug!(command, %err, "command rejected");
    }
    let _ = connection.send_frame(&OutboundFrame::event(err.channel(channel), err.to_payload()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestClient, gateway_with};
    use sesh_settings::GatewaySettings;

    struct Panics;

    #[async_trait]
    impl CommandHandler for Panics {
        async fn handle(&self, _ctx: &CommandContext, _data: Option<Value>) -> Result<(), GatewayError> {
            panic!("boom");
        }
    }

    struct Sleeps;

    #[async_trait]
    impl CommandHandler for Sleeps {
        async fn handle(&self, _ctx: &CommandContext, _data: Option<Value>) -> Result<(), GatewayError> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    struct Rejects;

    #[async_trait]
    impl CommandHandler for Rejects {
        fn error_channel(&self) -> Event {
            Event::GroupJoinError
        }
        async fn handle(&self, _ctx: &CommandContext, _data: Option<Value>) -> Result<(), GatewayError> {
            Err(GatewayError::invalid_data())
        }
    }

    fn frame(op: u64) -> InboundFrame {
        InboundFrame { op, d: None }
    }

    #[test]
    fn standard_table_covers_every_client_opcode() {
        let registry = CommandRegistry::standard(&RateLimitSettings::default());
        let ops = registry.ops();
        assert!(!ops.contains(&Op::Hello));
        assert!(!ops.contains(&Op::Event));
        assert_eq!(ops.len(), Op::ALL.len() - 2);
        for op in [Op::AwayState, Op::GroupStrain, Op::SetMobile] {
            assert!(registry.route(op).unwrap().is_deprecated());
        }
        assert!(registry.route(Op::SendMessage).unwrap().rate_limit().is_some());
        assert!(registry.route(Op::Heartbeat).unwrap().rate_limit().is_none());
    }

    #[tokio::test]
    async fn unknown_opcode_reports_internal_error() {
        let gateway = gateway_with(GatewaySettings::default());
        let mut client = TestClient::open(&gateway);
        client.drain();
        gateway
            .commands
            .dispatch(&gateway, &client.connection, client.session_id.clone(), frame(99))
            .await;
        let (t, d) = client.next_any().await;
        assert_eq!(t, "INTERNAL_ERROR");
        assert_eq!(d["code"], "INVALID_OP_CODE");
        assert!(client.connection.is_open());
    }

    #[tokio::test]
    async fn deprecated_opcode_answers_bare_event() {
        let gateway = gateway_with(GatewaySettings::default());
        let mut client = TestClient::open(&gateway);
        client.drain();
        gateway
            .commands
            .dispatch(&gateway, &client.connection, client.session_id.clone(), frame(18))
            .await;
        let raw = client.next_frame().await;
        assert_eq!(raw["t"], "DEPRECATED");
        assert!(raw.get("d").is_none());
    }

    #[tokio::test]
    async fn panicking_handler_is_contained() {
        let gateway = gateway_with(GatewaySettings::default());
        let mut client = TestClient::open(&gateway);
        client.drain();
        let mut registry = CommandRegistry::new();
        registry.register(Op::Join, Panics, None);
        registry
            .dispatch(&gateway, &client.connection, client.session_id.clone(), frame(2))
            .await;
        let (t, d) = client.next_any().await;
        assert_eq!(t, "INTERNAL_ERROR");
        assert_eq!(d["code"], "INTERNAL_ERROR");
        assert!(client.connection.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out() {
        let gateway = gateway_with(GatewaySettings::default());
        let mut client = TestClient::open(&gateway);
        client.drain();
        let mut registry = CommandRegistry::new();
        registry.register(Op::Join, Sleeps, None);
        registry
            .dispatch(&gateway, &client.connection, client.session_id.clone(), frame(2))
            .await;
        let (t, d) = client.next_any().await;
        assert_eq!(t, "INTERNAL_ERROR");
        assert_eq!(d["code"], "INTERNAL_ERROR");
    }

    #[tokio::test]
    async fn validation_error_uses_command_channel() {
        let gateway = gateway_with(GatewaySettings::default());
        let mut client = TestClient::open(&gateway);
        client.drain();
        let mut registry = CommandRegistry::new();
        registry.register(Op::Join, Rejects, None);
        registry
            .dispatch(&gateway, &client.connection, client.session_id.clone(), frame(2))
            .await;
        let (t, d) = client.next_any().await;
        assert_eq!(t, "GROUP_JOIN_ERROR");
        assert_eq!(d["code"], "INVALID_DATA");
    }

    #[tokio::test]
    async fn over_budget_is_rate_limited_without_running() {
        let gateway = gateway_with(GatewaySettings::default());
        let mut client = TestClient::open(&gateway);
        client.drain();
        let mut registry = CommandRegistry::new();
        registry.register(Op::Join, Rejects, Some(RateLimitRule::new(10_000, 2)));

        for _ in 0..3 {
            registry
                .dispatch(&gateway, &client.connection, client.session_id.clone(), frame(2))
                .await;
        }
        assert_eq!(client.next_any().await.0, "GROUP_JOIN_ERROR");
        assert_eq!(client.next_any().await.0, "GROUP_JOIN_ERROR");
        let (t, d) = client.next_any().await;
        assert_eq!(t, "RATE_LIMITED");
        assert_eq!(d["op"], 2);
    }
}
