//! Echo server binary for linkprobe.

use anyhow::{Context, Result};
use linkprobe_server::config::{Config, LogFormat};
use linkprobe_server::{Server, ServerError};
use tokio::task::JoinSet;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("loading configuration")?;

    init_logging(&config.log_level, config.log_format);

    info!(
        addr = %config.addr,
        protocols = ?config.protocols,
        buffer_size = config.buffer_size,
        read_timeout = ?config.read_timeout,
        write_timeout = ?config.write_timeout,
        drain_timeout = ?config.drain_timeout,
        "Starting server"
    );

    let server = Server::with_drain_timeout(config.echo_handler(), config.drain_timeout);

    let mut listeners = JoinSet::new();
    for &protocol in &config.protocols {
        let server = server.clone();
        let addr = config.addr.clone();
        listeners.spawn(async move { (protocol, server.listen(protocol, &addr).await) });
    }

    tokio::select! {
        res = shutdown_signal() => res?,
        // A listener that fails on its own (bind error) is fatal.
        Some(joined) = listeners.join_next() => {
            let (protocol, result) = joined.context("listener task panicked")?;
            if let Err(e) = result {
                error!(%protocol, error = %e, "Server error");
                let _ = server.shutdown().await;
                return Err(e).with_context(|| format!("{} listener", protocol));
            }
        }
    }

    info!("Shutting down");
    let outcome = server.shutdown().await;

    while let Some(joined) = listeners.join_next().await {
        let (protocol, result) = joined.context("listener task panicked")?;
        match result {
            Ok(()) | Err(ServerError::Closed) => info!(%protocol, "Server stopped"),
            Err(e) => error!(%protocol, error = %e, "Server error"),
        }
    }

    outcome.context("shutting down")
}

fn init_logging(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}

/// Wait for ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("waiting for ctrl-c")?,
            _ = term.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("waiting for ctrl-c")
    }
}
