//! cligate binary: load configuration, wire the core, serve HTTP.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cligate::config::GatewayConfig;
use cligate::health::HealthTracker;
use cligate::http::{build_router, AppState};
use cligate::jobs::JobManager;
use cligate::registry::ProviderRegistry;

/// OpenAI-compatible gateway over command-line model providers.
#[derive(Debug, Parser)]
#[command(name = "cligate", version, about)]
struct Args {
    /// Path to the gateway configuration file.
    #[arg(long, default_value = "config.yaml")]
    config: String,

    /// Listen address override, `host:port`.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let config = GatewayConfig::load(&args.config)
        .await
        .with_context(|| format!("loading {}", args.config))?;

    let tracker = Arc::new(HealthTracker::new());
    let registry = Arc::new(ProviderRegistry::from_config(
        config.providers.clone(),
        Arc::clone(&tracker),
    )?);
    let jobs = Arc::new(JobManager::new(
        config.jobs.max_log_lines,
        config.jobs.max_jobs_per_kind,
    ));

    let addr = args
        .listen
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));
    info!(
        providers = registry.list_providers().len(),
        models = registry.list_models().len(),
        %addr,
        "starting cligate"
    );

    let state = AppState {
        registry,
        jobs,
        config: Arc::new(config),
    };
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;
    info!("shut down cleanly");
    Ok(())
}

/// Resolve on SIGTERM or ctrl-c. In-flight requests drain; background jobs
/// keep their own timeouts.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => info!("received ctrl-c, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down gracefully"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
