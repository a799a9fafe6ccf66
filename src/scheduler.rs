//! Fixed-interval driver for a set of watchers.
//!
//! Each watcher runs on its own Tokio task. A task awaits `check()` before
//! waiting for its next tick, and missed ticks are delayed rather than
//! bursted, so checks on one watcher are strictly sequential.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::watcher::Watcher;

/// Run every watcher until `shutdown_rx` reports `true` or closes.
///
/// Returns the watchers, with their failure state, once all tasks stop.
pub async fn run_watchers(
    watchers: BTreeMap<String, Watcher>,
    interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
) -> BTreeMap<String, Watcher> {
    info!(
        watchers = watchers.len(),
        interval_secs = interval.as_secs(),
        "scheduler started"
    );

    let mut tasks = JoinSet::new();
    for (name, watcher) in watchers {
        let rx = shutdown_rx.clone();
        tasks.spawn(async move {
            let watcher = run_watcher(watcher, interval, rx).await;
            (name, watcher)
        });
    }

    let mut stopped = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((name, watcher)) => {
                stopped.insert(name, watcher);
            }
            Err(e) => warn!(error = %e, "watcher task ended abnormally"),
        }
    }

    info!("scheduler stopped");
    stopped
}

/// Drive a single watcher. The first check happens immediately.
pub async fn run_watcher(
    mut watcher: Watcher,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Watcher {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {
                watcher.check().await;
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    info!(service = %watcher.name(), "watcher stopped");
    watcher
}
