//! L3 market data handler
//!
//! Connects to an exchange, rebuilds its order books and publishes
//! normalised data to other system components.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use l3_market_data::{
    AppState, BookState, Config, FeedStats, OrderBookManager, Publisher, WebSocketManager,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting L3 Market Data Handler");

    // Load configuration
    let config = Arc::new(Config::load()?);
    info!(exchange = %config.exchange, symbols = ?config.symbols, "Configuration loaded");

    let orderbook_manager = Arc::new(RwLock::new(
        OrderBookManager::with_depth(config.depth_levels)
            .with_journal_capacity(config.journal_capacity),
    ));

    // Initialize publisher for IPC
    let publisher = Arc::new(Publisher::new(&config.ipc_socket_path).await?);

    let state = Arc::new(AppState {
        orderbook_manager,
        publisher,
        config: config.clone(),
        stats: FeedStats::new()?,
    });

    // Start health check server
    let health_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state).await {
            warn!(error = %e, "Health server error");
        }
    });

    tokio::spawn(log_book_status(state.clone()));

    // Start WebSocket manager
    let mut ws_manager = WebSocketManager::new(state);
    ws_manager.run().await?;

    Ok(())
}

/// Start HTTP server for health checks, metrics and book inspection
async fn start_health_server(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.health_port));

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/book/:symbol", get(book))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let books: Vec<serde_json::Value> = {
        let manager = state.orderbook_manager.read().await;
        manager
            .symbols()
            .into_iter()
            .map(|symbol| {
                // two-sided and consistent
                let healthy = matches!(
                    manager.get_state(&symbol),
                    Ok(Some(book_state)) if book_state.metrics.is_healthy()
                );
                serde_json::json!({ "symbol": symbol, "healthy": healthy })
            })
            .collect()
    };
    Json(serde_json::json!({
        "status": "healthy",
        "component": "market-data",
        "exchange": state.config.exchange,
        "ipc_connected": state.publisher.is_connected().await,
        "books": books,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> Result<String, StatusCode> {
    state.stats.encode().map_err(|e| {
        warn!(error = %e, "Failed to encode metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn book(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Result<Json<BookState>, StatusCode> {
    match state.orderbook_manager.read().await.get_state(&symbol) {
        Ok(Some(book_state)) => Ok(Json(book_state)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            warn!(symbol = %symbol, error = %e, "Book state unavailable");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

/// Periodic top-of-book log line per symbol
async fn log_book_status(state: Arc<AppState>) {
    let mut health_interval =
        tokio::time::interval(Duration::from_secs(state.config.health_check_interval_secs.max(1)));
    loop {
        health_interval.tick().await;
        let books = state.orderbook_manager.read().await;
        for symbol in books.symbols() {
            let Some(book) = books.book(&symbol) else {
                continue;
            };
            info!(
                symbol = %symbol,
                best_bid = ?book.best_bid(),
                best_ask = ?book.best_ask(),
                mid_price = ?book.mid_price(),
                spread = ?book.spread(),
                resting_orders = book.order_count(),
                events_applied = book.events_applied(),
                "Order book status"
            );
        }
    }
}
