//! Main application entry point for the HoN fleet manager daemon.
//!
//! Wires the core components together: configuration, logging, the fleet
//! lifecycle manager, the health monitor, the auto-scaler, the resource
//! sampler, and the upstream master/chat sessions - then runs until a
//! termination signal arrives and drains the fleet gracefully.

mod cli;
mod config;
mod logging;
mod sampler;
mod signals;
mod upstream;

use cli::CliArgs;
use config::AppConfig;
use fleet_manager::{AutoScaler, FleetEvent, FleetManager, HealthMonitor};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// The assembled daemon.
pub struct Application {
    config: AppConfig,
    manager: Arc<FleetManager>,
}

impl Application {
    /// Loads configuration, applies CLI overrides, and builds the core.
    pub async fn new(args: CliArgs) -> anyhow::Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        config.apply_cli(&args);
        if let Err(e) = config.validate() {
            anyhow::bail!("configuration validation failed: {e}");
        }
        logging::setup_logging(&config.logging)?;

        info!("🚀 HoN Fleet Manager v{}", env!("CARGO_PKG_VERSION"));
        info!(
            "📂 Config: {} | Install path: {}",
            args.config_path.display(),
            config.manager.install_path.display()
        );

        let manager = FleetManager::new(config.manager.clone());
        Ok(Self { config, manager })
    }

    /// Runs the daemon until a termination signal arrives.
    pub async fn run(self) -> anyhow::Result<()> {
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let manager = self.manager;
        let events = manager.event_sender();

        info!("📋 Fleet configuration:");
        info!("  🖥️ Max instances: {}", self.config.manager.max_servers);
        info!(
            "  🔢 Ports: game {}+, voice {}+, control {}+ (stride {})",
            self.config.manager.game_port_base,
            self.config.manager.voice_port_base,
            self.config.manager.public_port_base,
            self.config.manager.port_stride
        );

        // Health monitor + the task keeping its port registrations in sync
        // with the live fleet.
        let monitor = HealthMonitor::new(self.config.health.clone(), events.clone());
        tokio::spawn(monitor.clone().run(shutdown_tx.subscribe()));
        tokio::spawn(sync_monitored_ports(
            monitor.clone(),
            manager.clone(),
            shutdown_tx.subscribe(),
        ));

        // Restart policy: act on the monitor's recommendations.
        tokio::spawn(restart_policy(
            manager.clone(),
            manager.subscribe(),
            shutdown_tx.subscribe(),
        ));

        // Auto-scaler.
        let scaler = AutoScaler::new(
            self.config.scaling.clone(),
            self.config.manager.clone(),
            events.clone(),
        );
        tokio::spawn(scaler.run(manager.clone(), shutdown_tx.subscribe()));

        // Resource sampler.
        tokio::spawn(sampler::run(
            self.config.sampler.clone(),
            manager.clone(),
            shutdown_tx.subscribe(),
        ));

        // Upstream master auth + chat session.
        tokio::spawn(upstream::run(
            self.config.clone(),
            manager.clone(),
            shutdown_tx.clone(),
        ));

        // Bring the fleet up to its floor.
        for _ in 0..self.config.manager.min_servers {
            match manager.add_server().await {
                Ok(id) => {
                    if let Err(e) = manager.start_server(id).await {
                        warn!(id, error = %e, "initial instance launch failed");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "could not reach the configured instance floor");
                    break;
                }
            }
        }

        info!("✅ Fleet manager is running - press Ctrl+C to shut down");
        signals::wait_for_shutdown_signal().await?;

        info!("🛑 Shutting down - draining the fleet");
        let _ = shutdown_tx.send(());
        drain_fleet(&manager).await;
        info!("✅ Shutdown complete");
        Ok(())
    }
}

/// Keeps the health monitor's registrations matched to the live fleet.
async fn sync_monitored_ports(
    monitor: Arc<HealthMonitor>,
    manager: Arc<FleetManager>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(Duration::from_secs(5));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let live = manager.live_control_ports().await;
                let registered = monitor.registered_ports().await;
                for port in &live {
                    if !registered.contains(port) {
                        monitor.register(*port).await;
                    }
                }
                for port in registered {
                    if !live.contains(&port) {
                        monitor.deregister(port).await;
                    }
                }
            }
            _ = shutdown.recv() => return,
        }
    }
}

/// Restarts instances the health monitor has given up on.
///
/// Detection lives in the monitor; this is the remediation half, kept at
/// the application layer so an operator can replace the policy.
async fn restart_policy(
    manager: Arc<FleetManager>,
    mut events: broadcast::Receiver<FleetEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let event = tokio::select! {
            event = events.recv() => match event {
                Ok(event) => event,
                // Lagged subscribers just miss events; the channel never ends
                // while the manager lives.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            },
            _ = shutdown.recv() => return,
        };
        if let FleetEvent::RestartRecommended { port, consecutive_failures } = event {
            let Some(id) = manager.instance_by_control_port(port).await else {
                continue;
            };
            warn!(
                id,
                port, consecutive_failures, "🔁 restarting unresponsive instance"
            );
            if let Err(e) = manager.restart_server(id).await {
                error!(id, error = %e, "policy restart failed");
            }
        }
    }
}

/// Gracefully stops every live instance, in parallel.
async fn drain_fleet(manager: &Arc<FleetManager>) {
    let snapshot = manager.snapshot().await;
    let stops: Vec<_> = snapshot
        .instances
        .iter()
        .filter(|i| i.status.is_live())
        .map(|i| {
            let manager = manager.clone();
            let id = i.id;
            tokio::spawn(async move {
                if let Err(e) = manager.stop_server(id, true).await {
                    warn!(id, error = %e, "drain stop failed");
                }
            })
        })
        .collect();
    for stop in stops {
        let _ = stop.await;
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    match Application::new(args).await {
        Ok(app) => app.run().await,
        Err(e) => {
            eprintln!("❌ Failed to start: {e:?}");
            std::process::exit(1);
        }
    }
}
