//! Translation gateway server binary.
//!
//! Loads the three configuration documents, initialises tracing (stderr
//! plus size-rotated files under the configured logs directory), starts the
//! HTTP server and runs the graceful-shutdown sequence on SIGTERM/SIGINT.

use lingo::server::GatewayServer;
use lingo::shutdown;
use lingo::{AppState, GatewayConfig};
use std::path::Path;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_dir = std::env::var("LINGO_CONFIG_DIR").unwrap_or_else(|_| "config".to_owned());
    let config = GatewayConfig::load(Path::new(&config_dir));

    // Keep the appender guard alive for the lifetime of the process.
    let _log_guard = init_tracing(&config);

    tracing::info!("lingo-server starting");

    let state = AppState::from_config(&config);
    let shutdown_state = state.shutdown.clone();
    let queue = state.queue.clone();
    let host = state.host.clone();

    let server = GatewayServer::start(
        state,
        &config.app.server.host,
        config.app.server.port,
    )
    .await
    .map_err(|e| anyhow::anyhow!("server start failed: {e}"))?;

    shutdown::wait_for_signal().await;

    // Stop admissions, let the server wind down, drain and release.
    shutdown_state.begin();
    server.wait().await;
    shutdown_state.drain(&queue).await;
    host.unload().await;
    queue.clear();
    shutdown_state.finish();

    tracing::info!("lingo-server shut down cleanly");
    Ok(())
}

fn init_tracing(config: &GatewayConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let logs_dir = &config.app.paths.logs_dir;
    match std::fs::create_dir_all(logs_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(logs_dir, "lingo.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        Err(e) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .init();
            tracing::warn!("log directory unavailable ({e}), logging to stderr only");
            None
        }
    }
}
