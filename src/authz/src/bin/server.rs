//! # rowgate server
//!
//! Serves the configured entities from the in-memory store through the
//! authorization layer. Rules are compiled from Logto at startup.
//!
//! ## Endpoints
//!
//! - `GET /:entity`, `POST /:entity`
//! - `PUT /:entity/:id`, `DELETE /:entity/:id`
//! - `GET /health`
//!
//! ## Configuration
//!
//! - `--config` / `ROWGATE_CONFIG` - TOML configuration file
//! - `--listen` / `ROWGATE_LISTEN` - listen address override
//! - `RUST_LOG` - log filter (default: info)

use anyhow::{Context, Result};
use axum::serve;
use clap::Parser;
use rowgate_authz::{
    http::{router, AppState},
    AppConfig, Authorizer, InMemoryDatabase, LogtoDirectory, NoUser, TrustedHeaders,
    UserExtractor,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "rowgate-server", version, about = "Row-level authorization server")]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "ROWGATE_CONFIG", default_value = "rowgate.toml")]
    config: PathBuf,

    /// Listen address, overrides `server.listen`
    #[arg(short, long, env = "ROWGATE_LISTEN")]
    listen: Option<String>,

    /// Debug logging for the authorization layer
    #[arg(short, long)]
    verbose: bool,
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Starting graceful shutdown");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "info,rowgate_authz=debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting rowgate server v{}", rowgate_authz::VERSION);

    let config = AppConfig::load(&cli.config)?;
    let registry = config.registry();
    let listen = cli.listen.unwrap_or_else(|| config.server.listen.clone());

    info!("Configuration:");
    info!("  Directory: {}", config.directory.base_url);
    info!("  Entities: {}", registry.len());
    info!("  Listen: {}", listen);

    let directory = LogtoDirectory::new(config.directory.clone())
        .context("Failed to create directory client")?;

    let extractor: Arc<dyn UserExtractor> = if config.identity.trust_headers {
        Arc::new(TrustedHeaders::new(
            config.identity.role_key.clone(),
            config.identity.user_key.clone(),
        ))
    } else {
        Arc::new(NoUser)
    };

    let authorizer = Authorizer::bootstrap(
        &directory,
        &registry,
        &config.compiler_options(),
        config.rules.static_rules.clone(),
        config.identity.clone(),
        extractor,
    )
    .await
    .context("Failed to build authorization rules")?;

    let mut db = InMemoryDatabase::new(registry);
    authorizer
        .install(&mut db)
        .context("Failed to install authorization hooks")?;

    let app = router(AppState::new(Arc::new(db)));
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("Failed to bind {}", listen))?;

    info!("Starting HTTP server on {}", listen);
    serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Server shut down gracefully");
    Ok(())
}
