//! linkprobe-client binary.

use std::sync::Arc;

use anyhow::{Context, Result};
use linkprobe_client::config::{Config, LogFormat};
use linkprobe_client::{ProbeEngine, TracingObserver};
use linkprobe_net::connector_for;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("loading configuration")?;

    init_logging(&config.log_level, config.log_format);

    info!(
        protocol = %config.protocol,
        addr = %config.addr,
        interval = ?config.interval,
        backoff = ?config.backoff,
        read_timeout = ?config.read_timeout,
        write_timeout = ?config.write_timeout,
        buffer_size = config.buffer_size,
        "Starting linkprobe-client"
    );

    let engine = ProbeEngine::new(
        config.addr.clone(),
        config.engine_config(),
        Arc::from(connector_for(config.protocol)),
        Arc::new(TracingObserver),
    )
    .context("invalid engine configuration")?;

    let cancel = CancellationToken::new();
    let runner = {
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.run(cancel).await })
    };

    shutdown_signal().await?;
    cancel.cancel();
    runner.await.context("probe engine task failed")?;

    Ok(())
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
