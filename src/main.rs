//! Fairbook - Fair Value Quoter
//!
//! Subscribes to the market channel for the outcome tokens of a binary market,
//! maintains one order book and fair value filter per token, and publishes the
//! resulting desired quotes to the execution side.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fairbook::discovery::DiscoveryClient;
use fairbook::{AppState, Config, EventRouter, Outcome, Publisher, Telemetry, WebSocketManager};

fn init_tracing(json: bool) {
    let filter = EnvFilter::from_default_env().add_directive(Level::INFO.into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Fill in token ids and tick size from the condition id when no assets were configured
async fn discover_assets(config: &mut Config) -> anyhow::Result<()> {
    let Some(condition_id) = config.feed.condition_id.clone() else {
        return Ok(());
    };
    if !config.feed.asset_ids.is_empty() {
        return Ok(());
    }

    let discovery = DiscoveryClient::new(&config.feed.gamma_endpoint, &config.feed.clob_endpoint)?;
    let market = discovery.market_by_condition(&condition_id).await?;
    config.feed.asset_ids = market.asset_ids();

    if let Some(yes_token) = market.token_id(Outcome::Yes) {
        match discovery.tick_size(yes_token).await {
            Ok(tick_size) => {
                info!(tick_size = %tick_size, "Using tick size from CLOB");
                config.book.tick_size = tick_size;
            }
            Err(e) => warn!(error = %e, "Tick size lookup failed, keeping configured value"),
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = Config::load()?;
    init_tracing(config.log_json);

    info!("Starting Fairbook fair value quoter");

    discover_assets(&mut config).await?;
    let config = Arc::new(config);
    info!(
        assets = ?config.feed.asset_ids,
        tick_size = %config.book.tick_size,
        obs_mode = ?config.filter.obs_mode,
        "Configuration loaded"
    );

    let telemetry = Arc::new(Telemetry::new()?);

    // Initialize publisher for IPC
    let publisher = Arc::new(Publisher::new(&config.ipc_socket_path).await?);

    let state = Arc::new(AppState {
        config: config.clone(),
        telemetry: telemetry.clone(),
        publisher: publisher.clone(),
    });

    // Quote sink
    let (quote_tx, quote_rx) = mpsc::channel(config.feed.channel_capacity.max(1));
    let sink = tokio::spawn(async move { publisher.run(quote_rx).await });

    // One consumer per outcome token
    let mut router = EventRouter::new(
        config.pipeline_settings(),
        config.feed.channel_capacity,
        quote_tx,
        telemetry,
    );
    for asset_id in &config.feed.asset_ids {
        router.register(asset_id)?;
    }

    // Start health check server
    let health_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state).await {
            warn!(error = %e, "Health server error");
        }
    });

    let mut ws_manager = WebSocketManager::new(config.clone(), router);
    let outcome = tokio::select! {
        result = ws_manager.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    };

    ws_manager.shutdown().await;
    if let Err(e) = sink.await {
        error!(error = %e, "Quote sink task failed");
    }

    outcome?;
    info!("Fairbook stopped");
    Ok(())
}

/// Start HTTP server for health checks and metrics
async fn start_health_server(state: Arc<AppState>) -> anyhow::Result<()> {
    let port = state.config.health_port;

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "component": "fairbook",
        "assets": state.config.feed.asset_ids,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> Result<String, (StatusCode, String)> {
    state
        .telemetry
        .encode()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
