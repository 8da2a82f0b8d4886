//! Read-only status server

use std::net::SocketAddr;

use axum::{extract::State, response::Json, routing::get, Router};
use log::info;

use super::engine::EngineStatus;
use super::errors::{GridError, GridResult};
use super::runner::SharedView;
use super::types::GridLevel;

/// Routes for the status API
pub fn router(view: SharedView) -> Router {
    Router::new()
        .route("/api/status", get(status_handler))
        .route("/api/levels", get(levels_handler))
        .with_state(view)
}

/// Serve the status API until the process exits
pub async fn start_server(view: SharedView, host: &str, port: u16) -> GridResult<()> {
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| GridError::InvalidConfig(format!("invalid server address {}:{}: {}", host, port, e)))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| GridError::Config(format!("failed to bind {}: {}", addr, e)))?;

    info!("Status server running on http://{}", addr);

    axum::serve(listener, router(view))
        .await
        .map_err(|e| GridError::Config(format!("status server failed: {}", e)))
}

async fn status_handler(State(view): State<SharedView>) -> Json<EngineStatus> {
    let view = view.read().await;
    Json(view.status.clone())
}

async fn levels_handler(State(view): State<SharedView>) -> Json<Vec<GridLevel>> {
    let view = view.read().await;
    Json(view.levels.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::config::GridConfig;
    use crate::grid::executor::mock::MockExchange;
    use crate::grid::runner::{GridRunner, RunnerConfig};

    #[tokio::test]
    async fn test_handlers_read_published_view() {
        let config = GridConfig::new("BTCUSDT", 10000.0, 0.01, 5, 100.0, 10000.0).without_persistence();
        let mut runner = GridRunner::new(config, MockExchange::new(10000.0), RunnerConfig::default()).unwrap();
        let view = runner.view();

        let Json(status) = status_handler(State(view.clone())).await;
        assert_eq!(status.open_buys, 0);
        assert_eq!(status.symbol, "BTCUSDT");

        runner.run_tick().await.unwrap();

        let Json(status) = status_handler(State(view.clone())).await;
        assert_eq!(status.open_buys, 4);

        let Json(levels) = levels_handler(State(view)).await;
        assert_eq!(levels.len(), 9);
        assert_eq!(levels.iter().filter(|l| l.has_open_buy()).count(), 4);
    }

    #[tokio::test]
    async fn test_invalid_address_rejected() {
        let config = GridConfig::new("BTCUSDT", 10000.0, 0.01, 5, 100.0, 10000.0).without_persistence();
        let runner = GridRunner::new(config, MockExchange::new(10000.0), RunnerConfig::default()).unwrap();

        let err = start_server(runner.view(), "not an address", 3000).await.unwrap_err();
        assert!(matches!(err, GridError::InvalidConfig(_)));
    }
}
