//! `GatewayServer`: the public WebSocket listener and the internal admin
//! listener, both on Axum.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::admin;
use crate::gateway::Gateway;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::socket::run_socket;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The coordinator.
    pub gateway: Arc<Gateway>,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Live socket tasks; closed once shutdown begins.
    pub sockets: TaskTracker,
}

/// The gateway's HTTP surface.
pub struct GatewayServer {
    state: AppState,
    shutdown: Arc<ShutdownCoordinator>,
}

impl GatewayServer {
    /// Create a server around `gateway`.
    pub fn new(gateway: Arc<Gateway>, metrics: Option<PrometheusHandle>) -> Self {
        let sockets = TaskTracker::new();
        let shutdown = Arc::new(ShutdownCoordinator::new(Arc::clone(&gateway), sockets.clone()));
        Self {
            state: AppState {
                gateway,
                metrics,
                sockets,
            },
            shutdown,
        }
    }

    /// Public router: the WebSocket endpoint at `/` and `/ws`.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(ws_handler))
            .route("/ws", get(ws_handler))
            .with_state(self.state.clone())
    }

    /// Internal administrative router.
    pub fn admin_router(&self) -> Router {
        admin::router(self.state.clone()).layer(TraceLayer::new_for_http())
    }

    /// The coordinator.
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.state.gateway
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }
}

/// Serve `router` on `listener` until `token` is cancelled.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    token: CancellationToken,
) -> std::io::Result<()> {
    let addr: SocketAddr = listener.local_addr()?;
    info!(%addr, "listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
}

/// GET / and /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.sockets.is_closed() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let max = state.gateway.settings().server.max_message_size;
    let AppState { gateway, sockets, .. } = state;
    ws.max_message_size(max)
        .on_upgrade(move |socket| sockets.track_future(run_socket(gateway, socket)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use sesh_settings::GatewaySettings;
    use tower::ServiceExt;

    use crate::test_support::gateway_with;

    fn make_server() -> GatewayServer {
        GatewayServer::new(gateway_with(GatewaySettings::default()), None)
    }

    #[tokio::test]
    async fn plain_get_on_ws_route_is_rejected() {
        let app = make_server().router();
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let app = make_server().router();
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn serve_stops_on_cancel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = make_server();
        let token = server.shutdown().listener_token();
        let handle = tokio::spawn(serve(listener, server.router(), token));
        let _ = server.shutdown().run(Vec::new(), Duration::from_secs(1)).await;
        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
