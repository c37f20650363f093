//! Per-socket loop: greet, dispatch inbound frames, forward outbound ones.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use sesh_core::InboundFrame;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, trace};
use uuid::Uuid;

use crate::gateway::Gateway;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};
use crate::websocket::connection::ClientConnection;

/// Time the writer gets to flush and send its close frame.
const WRITER_DRAIN: Duration = Duration::from_secs(5);

/// Drive one upgraded socket until either side closes it.
#[instrument(skip_all, fields(connection_id))]
pub async fn run_socket(gateway: Arc<Gateway>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Arc<String>>(gateway.settings().server.outbound_buffer);
    let connection = Arc::new(ClientConnection::new(Uuid::new_v4().to_string(), tx));
    let _ = tracing::Span::current().record("connection_id", connection.id.as_str());

    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    let session_id = gateway.open_session(Arc::clone(&connection));
    info!(session_id = %session_id, "websocket connected");

    // Writer: forward queued frames, then a close frame once the gateway
    // asks for one.
    let closed = connection.closed_token();
    let writer_connection = Arc::clone(&connection);
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                message = rx.recv() => {
                    let Some(text) = message else { break };
                    if sink.send(Message::Text(text.as_str().into())).await.is_err() {
                        break;
                    }
                }
                () = closed.cancelled() => {
                    while let Ok(text) = rx.try_recv() {
                        if sink.send(Message::Text(text.as_str().into())).await.is_err() {
                            break;
                        }
                    }
                    if let Some(request) = writer_connection.close_request() {
                        let frame = CloseFrame {
                            code: request.code,
                            reason: request.reason.into(),
                        };
                        let _ = sink.send(Message::Close(Some(frame))).await;
                    }
                    break;
                }
            }
        }
        let _ = sink.close().await;
    });

    let closed = connection.closed_token();
    loop {
        let message = tokio::select! {
            message = stream.next() => message,
            () = closed.cancelled() => break,
        };
        let Some(Ok(message)) = message else { break };
        match message {
            Message::Text(text) => {
                let Some(frame) = InboundFrame::parse(text.as_str()) else {
                    debug!(len = text.len(), "dropping unparseable frame");
                    continue;
                };
                // Resume may have moved this connection onto another session.
                let Some(session_id) = connection.session_id() else {
                    break;
                };
                gateway
                    .commands
                    .dispatch(&gateway, &connection, session_id, frame)
                    .await;
            }
            Message::Close(_) => break,
            Message::Binary(_) => trace!("ignoring binary frame"),
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    connection.mark_closed();
    gateway.connection_closed(&connection);
    let _ = tokio::time::timeout(WRITER_DRAIN, writer).await;

    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    info!(
        dropped = connection.drop_count(),
        age_secs = connection.age().as_secs(),
        "websocket disconnected"
    );
}
