//! Standalone Switchyard proxy.
//!
//! Loads the configuration file, applies command-line overrides, and runs
//! the proxy until SIGINT or SIGTERM.

mod cli;
mod settings;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use switchyard::{AllowAll, ProxyError, ProxyServerBuilder};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Args;
use crate::settings::{LoggingSettings, Settings};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let mut settings = match Settings::load(&args.config) {
        Ok(settings) => settings,
        Err(e) => {
            // Logging is configured by this file, so it is not up yet.
            eprintln!("switchyard: {e}");
            return ExitCode::FAILURE;
        }
    };
    settings.apply(&args);
    init_logging(&settings.logging);
    tracing::info!(config = %args.config.display(), "configuration loaded");

    match run(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "proxy stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: Settings) -> Result<(), ProxyError> {
    let server = ProxyServerBuilder::new()
        .config(settings.proxy.clone())
        .router(settings.router())
        .localizer(settings.localizer())
        .connectivity(Arc::new(settings.directory()))
        .build(AllowAll)?;
    let server = Arc::new(server);

    let shutdown = tokio::spawn({
        let server = Arc::clone(&server);
        async move {
            match wait_for_signal().await {
                Ok(()) => server.close(),
                Err(e) => tracing::warn!(error = %e, "cannot listen for shutdown signals"),
            }
        }
    });

    let result = server.listen_and_serve().await;
    shutdown.abort();
    tracing::info!(players = server.context().player_count(), "proxy shut down");
    result
}

fn init_logging(settings: &LoggingSettings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));
    let registry = tracing_subscriber::registry().with(filter);

    if settings.json_format {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigint.recv() => tracing::info!("received SIGINT"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("received Ctrl+C");
    }

    Ok(())
}
