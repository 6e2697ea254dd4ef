mod aggregate;
mod aggregator;
mod api;
mod config;
mod edges;
mod errors;
mod hardware;
mod metrics;
mod model;
mod retry;
mod sensors;
mod socket;
mod socketio;
mod station;
#[cfg(test)]
mod testing;
mod token;

use anyhow::Context;
use api::ApiClient;
use clap::Parser;
use config::Config;
use edges::EdgeWatcher;
use retry::RetryPolicy;
use socket::SocketClient;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use token::TokenManager;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(&config.log_level))
        .with_ansi(true)
        .init();

    info!("Application started");

    let code = match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("CRITICAL: {:#}", e);
            ExitCode::from(1)
        }
    };

    info!("Application finished");
    code
}

/// RUST_LOG wins. A bare level from LOG_LEVEL only applies to this crate so
/// the HTTP stack stays at warn.
fn log_filter(log_level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    EnvFilter::try_new(log_directive(log_level)).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn log_directive(log_level: &str) -> String {
    if log_level.contains('=') || log_level.contains(',') {
        log_level.to_string()
    } else {
        format!("warn,station={}", log_level.to_lowercase())
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!("Environment: {:?}", config.environment);
    info!("Backend: {}", config.root_url);
    info!("Socket: {}", config.socket_url);

    if let Err(e) = metrics::init_metrics() {
        warn!("Failed to register metrics: {}", e);
    }
    if let Some(addr) = config.metrics_addr.clone() {
        tokio::spawn(metrics::serve(addr));
    }

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")?;

    let tokens = Arc::new(TokenManager::new(
        http.clone(),
        config.auth_url(),
        config.user.clone(),
        config.password.clone(),
    ));
    let api = ApiClient::new(http, Arc::clone(&tokens), RetryPolicy::default());
    let socket = SocketClient::new(&config.socket_url, tokens, RetryPolicy::default());

    let sensors = station::build_sensors(&config);
    // interrupts stay armed while this is alive
    let edges = EdgeWatcher::start(
        sensors.rain_ticks.map(|ticks| (config.rain_gauge_port, ticks)),
        sensors.anemometer_pulses.map(|pulses| (config.anemometer_port, pulses)),
    )
    .context("Failed to arm GPIO interrupts")?;
    info!("{} GPIO interrupts armed", edges.armed());

    let station = station::Station::new(&config, sensors.channels, api, socket)?;
    let samplers = station.start_sampling();
    info!("{} samplers running", samplers.len());

    tokio::select! {
        _ = station.run() => {
            info!("Main loop finished");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    station.shutdown().await;
    Ok(())
}
