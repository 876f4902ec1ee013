use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::routing::get;
use chatcore::config::Cli;
use chatcore::shutdown::ShutdownService;
use gateway::state::AppState;
use gateway::ws::{healthz, upgrade};
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    chatcore::telemetry::init("gateway");

    let cli = Cli::load();
    let shutdown = Arc::new(ShutdownService::new());
    shutdown.install_signal_handlers();

    let state = AppState::build(&cli, Arc::clone(&shutdown))
        .await
        .context("failed to initialize gateway state")?;

    let app = Router::new()
        .route("/v1/ws", get(upgrade))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(%addr, "gateway listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.wait())
    .await
    .context("gateway server error")?;

    shutdown.drain().await;
    state.postgres.close().await;

    Ok(())
}
