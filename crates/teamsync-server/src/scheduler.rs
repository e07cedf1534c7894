//! Background loops: periodic sync cycles and external cache refreshes.
//!
//! Both stop when the shutdown channel flips to `true`; an in-flight cycle
//! is dropped at its next await point.

use std::{sync::Arc, time::Duration};

use teamsync_core::{directory::Directory, platform::Platform, store::MappingStore};
use teamsync_engine::{Error as SyncError, Syncer};
use tokio::{
  sync::watch,
  time::{self, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::cache::ExternalCache;

/// Run full sync cycles every `interval` while auto-sync is enabled.
///
/// The first tick fires immediately.
pub async fn run_sync_loop<S, P, D>(
  syncer: Arc<Syncer<S, P, D>>,
  interval: Duration,
  mut shutdown: watch::Receiver<bool>,
) where
  S: MappingStore,
  P: Platform,
  D: Directory,
{
  info!(interval_secs = interval.as_secs(), "sync scheduler started");
  let mut ticker = time::interval(interval);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      _ = ticker.tick() => {}
      res = shutdown.changed() => {
        if res.is_err() || *shutdown.borrow() { break; }
        continue;
      }
    }

    tokio::select! {
      _ = tick(&syncer) => {}
      res = shutdown.changed() => {
        if res.is_err() || *shutdown.borrow() {
          warn!("shutdown during a sync cycle; the cycle was abandoned");
          break;
        }
      }
    }
  }
  info!("sync scheduler stopped");
}

async fn tick<S, P, D>(syncer: &Syncer<S, P, D>)
where
  S: MappingStore,
  P: Platform,
  D: Directory,
{
  match syncer.auto_sync_enabled().await {
    Ok(true) => {}
    Ok(false) => {
      debug!("auto-sync disabled, skipping tick");
      return;
    }
    Err(e) => {
      error!(error = %e, "failed to read the auto-sync setting");
      return;
    }
  }

  match syncer.run().await {
    Ok(report) => debug!(applied = report.applied, skipped = report.skipped, "scheduled sync done"),
    Err(SyncError::Busy) => info!("sync already running, waiting for the next tick"),
    Err(e) => error!(error = %e, "scheduled sync failed"),
  }
}

/// Refresh `cache` every `interval` until shutdown.
pub async fn run_cache_loop<S, P, D>(
  syncer: Arc<Syncer<S, P, D>>,
  cache: Arc<ExternalCache>,
  interval: Duration,
  mut shutdown: watch::Receiver<bool>,
) where
  S: MappingStore,
  P: Platform,
  D: Directory,
{
  debug!(interval_secs = interval.as_secs(), "external cache refresh started");
  let mut ticker = time::interval(interval);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      _ = ticker.tick() => {
        cache.refresh(&syncer).await;
      }
      res = shutdown.changed() => {
        if res.is_err() || *shutdown.borrow() { break; }
      }
    }
  }
  debug!("external cache refresh stopped");
}
