//! Recordkeeper worker
//!
//! Runs the scheduler loop: every poll interval, due scheduled mutations are
//! applied to their target records. Storage is in-memory unless
//! `STORAGE_BACKEND=postgres` is set.

use recordkeeper::config::{Settings, StorageBackend};
use recordkeeper::db;
use recordkeeper::record::{MemoryRecordStore, PgRecordStore, SharedRecordStore};
use recordkeeper::state::AppState;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("🚀 Starting Recordkeeper worker...");

    let settings = Settings::load()?;
    info!("📋 Configuration loaded successfully");

    let store: SharedRecordStore = match settings.storage {
        StorageBackend::Postgres => {
            let pool = db::connect(&settings.database).await?;
            Arc::new(PgRecordStore::new(pool))
        }
        StorageBackend::Memory => Arc::new(MemoryRecordStore::new()),
    };

    if !settings.storage.is_shared() {
        error!("❌ In-memory storage: nothing else can queue mutations for this worker, so it will never apply any. Set STORAGE_BACKEND=postgres");
    }

    let state = Arc::new(AppState::new(store, &settings));
    info!(
        "📚 Revisions stored as \"{}\", schedules as \"{}\" (load failure policy: {:?})",
        state.revisions.record_type(),
        state.scheduler.schedules().record_type(),
        state.scheduler.processor().policy()
    );

    state.scheduler.run(shutdown_signal()).await;

    info!("👋 Worker shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,recordkeeper=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
