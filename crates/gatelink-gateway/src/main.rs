//! Gateway client entry point
//!
//! Run with:
//! ```bash
//! GATEWAY_URL=wss://gateway.example.com GATEWAY_TOKEN=... cargo run -p gatelink-gateway
//! ```
//!
//! Configuration is loaded from environment variables.

use std::time::Instant;

use gatelink_common::{
    try_init_tracing, try_init_tracing_with_config, AppConfig, AppError, AppResult, TracingConfig,
};
use gatelink_gateway::Runtime;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Configuration decides the log format, so it loads before tracing
    let config = AppConfig::from_env();
    let tracing = match &config {
        Ok(config) => try_init_tracing_with_config(&TracingConfig::for_environment(config.app.env)),
        Err(_) => try_init_tracing(),
    };
    if let Err(e) = tracing {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    if let Err(e) = run(config.map_err(AppError::from)).await {
        error!(error = %e, code = e.error_code(), "Gateway client failed");
        std::process::exit(e.exit_code());
    }
}

async fn run(config: AppResult<AppConfig>) -> AppResult<()> {
    let config = config?;
    info!(name = %config.app.name, "Starting gateway client...");

    info!(
        env = ?config.app.env,
        url = %config.gateway.url,
        intents = ?config.gateway.intents,
        "Configuration loaded"
    );

    let runtime = Runtime::new(config.websocket.clone());
    let session = runtime
        .create_session(config.gateway.clone())
        .map_err(AppError::gateway)?;

    session.on_ready(|data| {
        info!(
            server_session_id = ?data.get("session_id").and_then(|v| v.as_str()),
            "Session ready"
        );
    });
    session.on_event(|event| {
        info!(event = %event.name, seq = ?event.sequence, "Event received");
    });
    session.on_error(|err| warn!(error = %err, "Gateway error"));
    session.on_close(|frame| info!(code = frame.code, reason = %frame.reason, "Gateway connection closed"));

    // Connecting blocks for the TCP/TLS handshake
    tokio::task::block_in_place(|| session.connect()).map_err(AppError::gateway)?;

    let mut ticker = tokio::time::interval(config.app.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tokio::task::block_in_place(|| runtime.tick(Instant::now()));
                if !runtime.has_active_sessions() {
                    warn!(state = %session.state(), "No active gateway sessions left");
                    break;
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(AppError::internal)?;
                info!("Shutdown signal received");
                break;
            }
        }
    }

    runtime.remove_session(&session);
    info!("Gateway client stopped");
    Ok(())
}
