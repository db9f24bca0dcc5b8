use crate::config::constants::SWEEP_LOCK_KEY_PREFIX;
use crate::services::{QueueEngine, ScanOrchestrator, SweepEngine};
use crate::storage::{Claim, CooldownStore};
use crate::types::chain::Chain;
use crate::types::sweep::SweepReport;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Runs one sweep batch for `chain` while holding `sweep_lock:<chain>`.
/// An unreachable lock store pauses sweeps rather than risking two runners on one chain.
pub async fn run_locked_sweep(
    engine: &SweepEngine,
    locks: &dyn CooldownStore,
    chain: Chain,
    lock_ttl_s: u64,
) -> Option<SweepReport> {
    let key = format!("{}{}", SWEEP_LOCK_KEY_PREFIX, chain);
    let claim = Claim::new(Utc::now().timestamp());
    match locks.try_acquire(&key, &claim, lock_ttl_s).await {
        Ok(None) => {}
        Ok(Some(since)) => {
            debug!("{} sweep already running since {}", chain, since);
            return None;
        }
        Err(e) => {
            warn!("Sweep lock store unavailable, {} sweeps paused: {}", chain, e);
            return None;
        }
    }

    let report = match engine.run_batch(chain).await {
        Ok(report) => report,
        Err(e) => {
            error!("{} sweep run failed: {}", chain, e);
            None
        }
    };
    match locks.release(&key, &claim).await {
        Ok(true) => {}
        Ok(false) => warn!("{} expired during the {} sweep and was not released", key, chain),
        Err(e) => warn!("Failed to release {}, it expires in {}s: {}", key, lock_ttl_s, e),
    }
    report
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

pub fn spawn_sweep_loop(
    engine: Arc<SweepEngine>,
    locks: Arc<dyn CooldownStore>,
    chain: Chain,
    period: Duration,
    lock_ttl_s: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Sweeping {} every {:?}", chain, period);
        let mut interval = ticker(period);
        loop {
            interval.tick().await;
            // drain the backlog one batch at a time
            while run_locked_sweep(&engine, locks.as_ref(), chain, lock_ttl_s)
                .await
                .is_some_and(|report| report.failures.is_empty())
            {}
        }
    })
}

pub fn spawn_decay_loop(queue: Arc<QueueEngine>, decay_percent: u32, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Decaying boost points by {}% every {:?}", decay_percent, period);
        let mut interval = ticker(period);
        // the first tick fires immediately, decay only after a full period
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = queue.apply_decay(decay_percent).await {
                error!("Boost decay failed: {}", e);
            }
        }
    })
}

pub fn spawn_scan_all_loop(scans: Arc<ScanOrchestrator>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Scanning all deposit addresses every {:?}", period);
        let mut interval = ticker(period);
        loop {
            interval.tick().await;
            if let Err(e) = scans.scan_all_users().await {
                error!("Scheduled scan failed: {}", e);
            }
        }
    })
}
