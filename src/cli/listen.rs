//! Listen command handler — the long-running production mode.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::info;

use triggerclaw::event::DedupCache;
use triggerclaw::session::ConversationStore;
use triggerclaw::subscriber::{HttpEventSource, TriggerSubscriber};

use super::common::{build_components, load_validated_config};

/// Start the trigger subscriber and run until interrupted.
///
/// Exit code 0 on clean shutdown; non-zero when startup fails (missing
/// credentials, unreadable config). Transient network failure never exits;
/// the subscriber reconnects forever.
pub(crate) async fn cmd_listen() -> Result<()> {
    let config = load_validated_config()?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let components = build_components(&config, Some(stop_rx));

    let history = if config.history.enabled {
        Some(Arc::new(
            ConversationStore::new(config.history.recent_window)
                .context("Failed to open conversation store")?,
        ))
    } else {
        None
    };
    let dedup = Arc::new(DedupCache::new(
        Duration::from_secs(config.subscriber.dedup_ttl_secs),
        config.subscriber.dedup_capacity,
    ));
    let source = Arc::new(HttpEventSource::from_config(
        &config.subscriber,
        &config.router,
    ));

    let subscriber = Arc::new(TriggerSubscriber::new(
        source,
        components.sessions,
        components.agent,
        history,
        dedup,
        config.subscriber.clone(),
    ));

    println!("Listening for trigger events. Press Ctrl+C to stop.");

    let run_handle = {
        let subscriber = Arc::clone(&subscriber);
        tokio::spawn(async move { subscriber.run().await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    info!("Interrupt received, shutting down");
    println!("\nShutting down...");

    // Propagate cancellation: in-flight runs abort at their next suspension
    // boundary, then the subscriber drains.
    let _ = stop_tx.send(true);
    subscriber.stop();

    run_handle
        .await
        .context("Subscriber task panicked")?
        .context("Subscriber exited with error")?;

    println!("Goodbye.");
    Ok(())
}
