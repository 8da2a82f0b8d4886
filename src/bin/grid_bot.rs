//! Grid Trading Bot Binary
//!
//! Runs the grid engine against the simulated exchange (paper trading).
//!
//! ## Setup
//!
//! 1. Optionally create a `.env` file in the project root:
//!    ```
//!    APP_GRID__SYMBOL=BTCUSDT
//!    APP_GRID__GRID_SIZE=0.01
//!    APP_LOG__LEVEL=debug
//!    ```
//!
//! 2. Run the bot:
//!    ```bash
//!    cargo run --bin grid_bot -- --config config.toml
//!    ```

use std::env;
use std::sync::Arc;

use log::{error, info, warn};

use cryptogrid::grid::executor::mock::MockExchange;
use cryptogrid::grid::server::start_server;
use cryptogrid::grid::{ExchangeGateway, GridRunner, StateStore};
use cryptogrid::Settings;

#[tokio::main]
async fn main() {
    // Load .env file before anything reads the environment
    let dotenv = dotenvy::dotenv();

    let args: Vec<String> = env::args().collect();
    let settings = if args.len() > 2 && args[1] == "--config" {
        Settings::new(&args[2])
    } else {
        Settings::from_env()
    };

    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
            error!("Failed to load config: {}", e);
            return;
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(settings.log.level.as_str())).init();

    match dotenv {
        Ok(path) => info!("Loaded environment from: {}", path.display()),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    let paper = &settings.paper;
    let exchange = MockExchange::with_balance(paper.initial_price, paper.quote_balance, paper.base_balance)
        .with_volatility(paper.volatility, paper.seed);
    info!(
        "Paper trading: start price {}, balances {} quote / {} base",
        paper.initial_price, paper.quote_balance, paper.base_balance
    );

    let initial_price = match settings.grid.initial_price {
        Some(price) => price,
        None => match exchange.fetch_ticker(&settings.grid.symbol).await {
            Ok(ticker) => ticker.last,
            Err(e) => {
                error!("Failed to get initial price for {}: {}", settings.grid.symbol, e);
                return;
            }
        },
    };

    let config = settings.grid.to_grid_config(initial_price);
    if let Err(e) = config.validate() {
        error!("Invalid grid configuration: {}", e);
        return;
    }

    info!("Starting grid bot for {}", config.symbol);
    info!("Center price: {:.2}, grid size: {:.2}%", config.initial_price, config.grid_size * 100.0);
    info!("Number of levels: {}", config.num_levels());
    info!("Per-level amount: {}, capital: {}", config.position_amount, config.initial_capital);

    let store = StateStore::new(&config);
    let engine = match store.load_or_create(config) {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to create grid engine: {}", e);
            return;
        }
    };

    let mut runner = GridRunner::with_engine(engine, store, Arc::new(exchange), settings.runner.clone());

    if settings.server.enabled {
        let view = runner.view();
        let host = settings.server.host.clone();
        let port = settings.server.port;
        tokio::spawn(async move {
            if let Err(e) = start_server(view, &host, port).await {
                warn!("Status server stopped: {}", e);
            }
        });
    }

    if let Err(e) = runner.run_until_ctrl_c().await {
        error!("Grid bot failed: {}", e);
    }
}
