//! gavel-worker: timer-driven auction lifecycle worker.
//!
//! Polls the durable task queue and applies the start, end,
//! payment-check, and reminder transitions. It shares the database
//! with the serving deployment; deterministic task keys make double
//! scheduling across processes harmless.

use std::sync::Arc;

use tracing::{error, info};

use gavel::bootstrap::init_tracing;
use gavel::config::Config;
use gavel::engine::AuctionEngine;
use gavel::hub::EventHub;
use gavel::notify::{LogSender, QueuedNotifier};
use gavel::orders::UnconfiguredGateway;
use gavel::scheduler::Scheduler;
use gavel::storage::Store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(db = %config.storage.path, "Starting gavel-worker");

    let store = Arc::new(Store::connect(&config.storage.path).await?);
    store.init().await?;

    let hub = Arc::new(EventHub::new(config.hub.clone()));
    let notifier = Arc::new(QueuedNotifier::new(
        Arc::new(LogSender),
        config.notify.clone(),
    ));
    let scheduler = Arc::new(Scheduler::new(store.clone(), config.scheduler.clone()));

    // The worker never completes purchases, so no order gateway.
    let engine = Arc::new(AuctionEngine::new(
        store,
        hub,
        notifier,
        Arc::new(UnconfiguredGateway),
        scheduler.clone(),
        config.business.clone(),
    ));

    tokio::select! {
        _ = scheduler.run(engine) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}
