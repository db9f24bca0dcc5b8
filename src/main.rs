use anyhow::Result;
use dotenv::dotenv;
use std::time::Duration;
use tracing::{error, info};
use trench_custody::config::app_context::AppContext;
use trench_custody::scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    // Load settings from config.toml (or CUSTODY_CONFIG), panics in case of error
    let config_name = std::env::var("CUSTODY_CONFIG").unwrap_or_else(|_| "config".to_string());
    let context = AppContext::new(&config_name).await;
    info!("Starting trench custody with settings: {:?}", context.settings);

    let settings = context.settings.clone();
    let mut handles = Vec::new();
    if settings.sweep.enabled {
        for chain in context.sweeps.chains() {
            handles.push(scheduler::spawn_sweep_loop(
                context.sweeps.clone(),
                context.locks.clone(),
                chain,
                Duration::from_secs(settings.sweep.interval_s),
                settings.sweep.lock_ttl_s,
            ));
        }
    } else {
        info!("Sweeping disabled");
    }
    if let Some(interval_s) = settings.queue.decay_interval_s {
        handles.push(scheduler::spawn_decay_loop(
            context.queue.clone(),
            settings.queue.decay_percent,
            Duration::from_secs(interval_s),
        ));
    }
    if let Some(interval_s) = settings.scan.scan_all_interval_s {
        handles.push(scheduler::spawn_scan_all_loop(
            context.scans.clone(),
            Duration::from_secs(interval_s),
        ));
    }
    info!("{} background loops running", handles.len());

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
    for handle in handles {
        handle.abort();
    }
    Ok(())
}
