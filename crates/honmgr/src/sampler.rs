//! Resource usage sampler.
//!
//! Periodically refreshes CPU and memory samples for every instance with a
//! live backing process. The fleet manager stores the samples but does not
//! own the sampling - this loop is the "external sampler" the instance
//! model refers to.

use crate::config::SamplerSettings;
use fleet_manager::FleetManager;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, ProcessExt, System, SystemExt};
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Runs the sampler loop until the shutdown signal fires.
pub async fn run(
    settings: SamplerSettings,
    manager: Arc<FleetManager>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut system = System::new();
    let mut ticker = interval(Duration::from_secs(settings.interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_secs = settings.interval_secs, "resource sampler started");
    loop {
        tokio::select! {
            _ = ticker.tick() => sample(&mut system, &manager).await,
            _ = shutdown.recv() => {
                info!("resource sampler stopping");
                return;
            }
        }
    }
}

async fn sample(system: &mut System, manager: &Arc<FleetManager>) {
    let snapshot = manager.snapshot().await;
    for instance in &snapshot.instances {
        let Some(pid) = instance.process_id else {
            continue;
        };
        let pid = Pid::from(pid as usize);
        system.refresh_process(pid);
        match system.process(pid) {
            Some(process) => {
                let cpu_percent = process.cpu_usage();
                let memory_mb = process.memory() / (1024 * 1024);
                manager
                    .update_resources(instance.id, cpu_percent, memory_mb)
                    .await;
            }
            None => {
                debug!(id = instance.id, ?pid, "process vanished between snapshot and sample");
            }
        }
    }
}
