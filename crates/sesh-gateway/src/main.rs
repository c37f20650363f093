//! # sesh-gateway
//!
//! Gateway binary: loads settings, wires the collaborator stores, and
//! starts the public WebSocket listener plus the internal admin listener.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use sesh_server::gateway::{Collaborators, Gateway};
use sesh_server::identity::HttpIdentityVerifier;
use sesh_server::server::{GatewayServer, serve};
use sesh_server::shutdown::DEFAULT_DRAIN_TIMEOUT;
use sesh_server::stores::redis::RedisStore;
use sesh_server::validation::{DEFAULT_BLOCKED_TERMS, NameFilter};
use sesh_settings::GatewaySettings;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Real-time group session gateway.
#[derive(Parser, Debug)]
#[command(name = "sesh-gateway", about = "Real-time group session gateway")]
struct Cli {
    /// Host to bind (overrides settings if specified).
    #[arg(long)]
    host: Option<String>,

    /// Public WebSocket port (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Internal admin port.
    #[arg(long)]
    admin_port: Option<u16>,

    /// Settings file. Defaults to `$SESH_SETTINGS` or `sesh.json`.
    #[arg(long)]
    settings: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, settings: &mut GatewaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(port) = self.admin_port {
            settings.server.admin_port = port;
        }
    }
}

/// Pick the counter and presence stores: Redis when configured, in-memory
/// otherwise.
async fn build_collaborators(settings: &GatewaySettings) -> Result<Collaborators> {
    let verifier = Arc::new(HttpIdentityVerifier::new(
        reqwest::Client::new(),
        settings.services.internal_api_url.clone(),
        settings.services.verify_timeout(),
    ));
    let names = NameFilter::new(DEFAULT_BLOCKED_TERMS).context("Invalid name blocklist")?;

    let Some(url) = settings.services.redis_url.as_deref() else {
        tracing::warn!("no redis url configured, rate limits and presence are process-local");
        return Ok(Collaborators::in_memory(verifier, names));
    };
    let store = Arc::new(
        RedisStore::connect(url)
            .await
            .context("Failed to connect to redis")?,
    );
    tracing::info!("redis stores connected");
    Ok(Collaborators {
        counters: store.clone(),
        presence: store,
        verifier,
        names,
    })
}

async fn run_listener(name: &'static str, listener: TcpListener, router: Router, token: CancellationToken) {
    if let Err(error) = serve(listener, router, token).await {
        tracing::error!(listener = name, %error, "listener failed");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = cli.settings.clone().unwrap_or_else(sesh_settings::settings_path);
    let mut settings = sesh_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    cli.apply(&mut settings);
    let _ = sesh_settings::init_settings(settings.clone());

    sesh_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);
    tracing::info!(path = %settings_path.display(), "Starting sesh gateway");

    let metrics = match sesh_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(error) => {
            tracing::warn!(%error, "metrics recorder unavailable, /metrics disabled");
            None
        }
    };

    let collaborators = build_collaborators(&settings).await?;
    let public = TcpListener::bind((settings.server.host.as_str(), settings.server.port))
        .await
        .context("Failed to bind public listener")?;
    let admin = TcpListener::bind((settings.server.host.as_str(), settings.server.admin_port))
        .await
        .context("Failed to bind admin listener")?;

    let server = GatewayServer::new(Gateway::new(settings, collaborators), metrics);
    let token = server.shutdown().listener_token();
    let handles = vec![
        tokio::spawn(run_listener("public", public, server.router(), token.clone())),
        tokio::spawn(run_listener("admin", admin, server.admin_router(), token)),
    ];

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let report = server.shutdown().run(handles, DEFAULT_DRAIN_TIMEOUT).await;

    tracing::info!(
        closed = report.closed,
        sockets_drained = report.sockets_drained,
        listeners_stopped = report.listeners_stopped,
        "Shutdown complete"
    );
    Ok(())
}
