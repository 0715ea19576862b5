//! RustPress Accounts server
//!
//! `rustpress-accounts [serve]` runs the HTTP API.
//! `rustpress-accounts sweep` runs one expiry sweep and exits.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rustpress_accounts::{build_state, create_routes, AccountsConfig, LogNotifier, PgStore};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "rustpress_accounts=info,info".into()),
        )
        .with_target(false)
        .json()
        .init();

    let command = std::env::args().nth(1).unwrap_or_else(|| "serve".to_string());

    let config = AccountsConfig::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    info!(
        "Database pool initialized with {} max connections",
        config.database_max_connections
    );

    let store = PgStore::new(db_pool);
    store
        .migrate()
        .await
        .context("Failed to run database migrations")?;

    let notifier = LogNotifier::new(config.password_reset_url.clone());
    let state = build_state(&config, Arc::new(store), Arc::new(notifier))
        .context("Failed to initialize services")?;

    match command.as_str() {
        "serve" => {
            let app = create_routes(state)
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive());

            let listener = tokio::net::TcpListener::bind(&config.bind_address)
                .await
                .with_context(|| format!("Failed to bind {}", config.bind_address))?;

            info!("Accounts service listening on {}", config.bind_address);

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("HTTP server error")?;

            info!("Accounts service shutdown complete");
        }
        "sweep" => {
            let report = state
                .sweeper
                .run(Utc::now())
                .await
                .context("Expiry sweep failed")?;

            info!(
                revocations_purged = report.revocations_purged,
                sessions_expired = report.sessions_expired,
                reset_tokens_removed = report.reset_tokens_removed,
                "Sweep complete"
            );
        }
        other => bail!("Unknown command '{}', expected 'serve' or 'sweep'", other),
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    info!("Shutting down gracefully...");
}
