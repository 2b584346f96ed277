//! Stockpile Sync - headless sync daemon.
//!
//! Keeps a local item store in step with the server until interrupted.

use stockpile_client::{runtime, Config, FileStorage, HttpRemote, SyncEngine, WsConnector};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env first so RUST_LOG from it applies
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stockpile_client=debug,stockpile_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    tracing::info!(
        api = %config.api_url,
        live = %config.ws_url,
        data_dir = %config.data_dir.display(),
        remap_policy = ?config.remap_policy,
        "Starting Stockpile sync"
    );

    let storage = FileStorage::open(&config.data_dir)?;
    let engine = SyncEngine::new(HttpRemote::new(&config.api_url), storage)
        .with_remap_policy(config.remap_policy);
    let handle = runtime::spawn(engine, WsConnector::new(config.ws_url.clone()));

    if config.token.is_none() {
        tracing::warn!("STOCKPILE_TOKEN not set, staying offline");
    }
    handle.set_token(config.token.clone()).await?;
    handle.set_connected(true).await?;

    let mut states = handle.watch();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                tracing::info!(
                    phase = ?state.phase(),
                    items = state.items.len(),
                    pending = state.pending().count(),
                    conflicts = state.conflicts().count(),
                    "Sync state changed"
                );
                if let Some(error) = &state.reconcile.error {
                    tracing::warn!("Last reconciliation failed: {}", error);
                }
            }
            _ = &mut ctrl_c => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}
