use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{handler::AppState, manager::EngineManager};

mod api;
mod config;
mod handler;
mod manager;
mod multipart;
mod session;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .filter_module("mjpeg_bus", log::LevelFilter::Debug)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    let config = config::AppConfig::load().unwrap_or_else(|e| {
        eprintln!("Error loading config: {:#}", e);
        std::process::exit(1);
    });

    let manager = Arc::new(EngineManager::from_config(config.stream.clone()).await);

    let cancel = CancellationToken::new();
    let state = AppState::new(Arc::clone(&manager), config.ptz.clone());
    let server = api::start_api_server(config.listen.clone(), state, cancel.clone());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
            },
        }
    }

    // open MJPEG sessions only end once their engine is gone
    manager.shutdown().await;
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, server).await.is_err() {
        log::warn!("api: server did not finish within {:?}", SHUTDOWN_TIMEOUT);
    }

    std::process::exit(0);
}
