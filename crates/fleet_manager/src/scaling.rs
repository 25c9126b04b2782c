//! Demand-driven auto-scaling.
//!
//! A debounced hysteresis controller: scale-up wants 3 consecutive
//! qualifying checks, scale-down wants 5 (shrinking is the more disruptive
//! direction), any neutral check resets both counters, and a cooldown window
//! separates consecutive actions. The whole evaluation is skipped while any
//! instance is `Starting` so a decision never races a launch.
//!
//! The controller's counters and timestamps are private to its loop; the
//! only shared state it touches is the fleet manager, through the same
//! lifecycle calls an operator would use.

use crate::config::{FleetConfig, ScalingConfig};
use crate::events::FleetEvent;
use crate::instance::InstanceStatus;
use crate::manager::{FleetManager, FleetSnapshot};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Consecutive qualifying checks required before adding an instance.
const SCALE_UP_DEBOUNCE: u32 = 3;
/// Consecutive qualifying checks required before removing an instance.
const SCALE_DOWN_DEBOUNCE: u32 = 5;

/// What one evaluation of the fleet decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Not enough evidence yet, or nothing to do.
    Hold,
    /// Evaluation skipped (launch in flight, or cooling down).
    Skipped,
    /// Add and start one instance.
    Up,
    /// Gracefully retire the given `Ready` instance.
    Down(crate::instance::InstanceId),
}

/// Loop-private scaling state.
#[derive(Debug, Default)]
struct ScalingState {
    last_scale_operation: Option<Instant>,
    consecutive_scale_up_checks: u32,
    consecutive_scale_down_checks: u32,
    last_scale_action: Option<String>,
}

/// The auto-scaling controller.
pub struct AutoScaler {
    config: ScalingConfig,
    fleet: FleetConfig,
    state: ScalingState,
    events: broadcast::Sender<FleetEvent>,
}

impl AutoScaler {
    pub fn new(
        config: ScalingConfig,
        fleet: FleetConfig,
        events: broadcast::Sender<FleetEvent>,
    ) -> Self {
        Self {
            config,
            fleet,
            state: ScalingState::default(),
            events,
        }
    }

    /// Human-readable description of the last action taken, if any.
    pub fn last_scale_action(&self) -> Option<&str> {
        self.state.last_scale_action.as_deref()
    }

    /// Runs the scaling loop until the shutdown signal fires.
    pub async fn run(mut self, manager: Arc<FleetManager>, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            info!("auto-scaling disabled by configuration");
            return;
        }
        let mut ticker = interval(self.config.check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.config.check_interval_secs,
            cooldown_secs = self.config.cooldown_secs,
            "📈 auto-scaler started"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = manager.snapshot().await;
                    let decision = self.evaluate(&snapshot, Instant::now());
                    self.act(&manager, decision).await;
                }
                _ = shutdown.recv() => {
                    info!("auto-scaler stopping");
                    return;
                }
            }
        }
    }

    /// Evaluates one tick against a fleet snapshot.
    ///
    /// Pure state-machine logic, separated from `act` so the debounce and
    /// cooldown semantics are directly testable.
    pub fn evaluate(&mut self, snapshot: &FleetSnapshot, now: Instant) -> ScaleDecision {
        // Never race a launch in flight.
        if snapshot.starting > 0 {
            debug!(starting = snapshot.starting, "scaling skipped: launch in flight");
            return ScaleDecision::Skipped;
        }
        // Respect the cooldown window since the last action.
        if let Some(last) = self.state.last_scale_operation {
            let since = now.saturating_duration_since(last);
            if since < self.config.cooldown() {
                debug!(elapsed_secs = since.as_secs(), "scaling skipped: cooling down");
                return ScaleDecision::Skipped;
            }
        }

        let occupancy = snapshot.occupancy_rate;
        let wants_up = (occupancy >= self.config.scale_up_threshold
            || snapshot.ready < self.config.min_ready_servers)
            && snapshot.total < self.fleet.max_servers;
        let wants_down = occupancy <= self.config.scale_down_threshold
            && snapshot.ready > self.config.min_ready_servers
            && snapshot.total > self.fleet.min_servers;

        if wants_up {
            self.state.consecutive_scale_down_checks = 0;
            self.state.consecutive_scale_up_checks += 1;
            debug!(
                checks = self.state.consecutive_scale_up_checks,
                occupancy, "scale-up qualifying check"
            );
            if self.state.consecutive_scale_up_checks >= SCALE_UP_DEBOUNCE {
                self.state.consecutive_scale_up_checks = 0;
                self.state.last_scale_operation = Some(now);
                return ScaleDecision::Up;
            }
        } else if wants_down {
            self.state.consecutive_scale_up_checks = 0;
            self.state.consecutive_scale_down_checks += 1;
            debug!(
                checks = self.state.consecutive_scale_down_checks,
                occupancy, "scale-down qualifying check"
            );
            if self.state.consecutive_scale_down_checks >= SCALE_DOWN_DEBOUNCE {
                if let Some(victim) = Self::retire_candidate(snapshot) {
                    self.state.consecutive_scale_down_checks = 0;
                    self.state.last_scale_operation = Some(now);
                    return ScaleDecision::Down(victim);
                }
                // Qualified but nothing Ready to retire; hold the counter.
            }
        } else {
            // Neutral tick resets both directions.
            self.state.consecutive_scale_up_checks = 0;
            self.state.consecutive_scale_down_checks = 0;
        }
        ScaleDecision::Hold
    }

    /// The `Ready` instance with the highest id, the one a scale-down
    /// retires.
    fn retire_candidate(snapshot: &FleetSnapshot) -> Option<crate::instance::InstanceId> {
        snapshot
            .instances
            .iter()
            .filter(|i| i.status == InstanceStatus::Ready)
            .map(|i| i.id)
            .max()
    }

    async fn act(&mut self, manager: &Arc<FleetManager>, decision: ScaleDecision) {
        match decision {
            ScaleDecision::Hold | ScaleDecision::Skipped => {}
            ScaleDecision::Up => match manager.add_server().await {
                Ok(id) => {
                    let description = format!("scaled up: added instance {id}");
                    info!(id, "📈 {description}");
                    if let Err(e) = manager.start_server(id).await {
                        warn!(id, error = %e, "scale-up launch failed");
                    }
                    self.record_action(description);
                }
                Err(e) => warn!(error = %e, "scale-up could not add an instance"),
            },
            ScaleDecision::Down(id) => {
                let description = format!("scaled down: retiring instance {id}");
                info!(id, "📉 {description}");
                if let Err(e) = manager.stop_server(id, true).await {
                    warn!(id, error = %e, "scale-down stop failed");
                    return;
                }
                if let Err(e) = manager.remove_server(id).await {
                    warn!(id, error = %e, "scale-down removal failed");
                }
                self.record_action(description);
            }
        }
    }

    fn record_action(&mut self, description: String) {
        let _ = self.events.send(FleetEvent::ScalingAction {
            description: description.clone(),
        });
        self.state.last_scale_action = Some(description);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::Instance;
    use std::time::Duration;

    fn snapshot(statuses: &[InstanceStatus]) -> FleetSnapshot {
        let instances: Vec<Instance> = statuses
            .iter()
            .enumerate()
            .map(|(i, &status)| {
                let mut inst = Instance::new(i as u32, 10001 + i as u16, 11001 + i as u16, 12001 + i as u16);
                inst.status = status;
                inst
            })
            .collect();
        let count = |s: InstanceStatus| instances.iter().filter(|i| i.status == s).count();
        let total = instances.len();
        let occupied = count(InstanceStatus::Occupied);
        FleetSnapshot {
            total,
            ready: count(InstanceStatus::Ready),
            occupied,
            starting: count(InstanceStatus::Starting),
            idle: count(InstanceStatus::Idle),
            crashed: count(InstanceStatus::Crashed),
            occupancy_rate: if total == 0 {
                0.0
            } else {
                occupied as f64 / total as f64
            },
            instances,
        }
    }

    fn scaler() -> AutoScaler {
        let (events, _) = broadcast::channel(16);
        let fleet = FleetConfig {
            max_servers: 10,
            min_servers: 1,
            ..FleetConfig::default()
        };
        AutoScaler::new(ScalingConfig::default(), fleet, events)
    }

    use InstanceStatus::{Occupied, Ready, Starting};

    #[test]
    fn scale_up_requires_three_consecutive_checks() {
        let mut scaler = scaler();
        // 4 of 5 occupied: exactly the 0.8 threshold.
        let busy = snapshot(&[Occupied, Occupied, Occupied, Occupied, Ready]);
        let now = Instant::now();
        assert_eq!(scaler.evaluate(&busy, now), ScaleDecision::Hold);
        assert_eq!(scaler.evaluate(&busy, now), ScaleDecision::Hold);
        assert_eq!(scaler.evaluate(&busy, now), ScaleDecision::Up);
    }

    #[test]
    fn neutral_check_resets_the_up_counter() {
        let mut scaler = scaler();
        let busy = snapshot(&[Occupied, Occupied, Occupied, Occupied, Ready]);
        // Half occupied sits between both thresholds.
        let calm = snapshot(&[Occupied, Occupied, Ready, Ready]);
        let now = Instant::now();
        assert_eq!(scaler.evaluate(&busy, now), ScaleDecision::Hold);
        assert_eq!(scaler.evaluate(&busy, now), ScaleDecision::Hold);
        assert_eq!(scaler.evaluate(&calm, now), ScaleDecision::Hold);
        // Counter went back to zero: three more qualifying ticks needed.
        assert_eq!(scaler.evaluate(&busy, now), ScaleDecision::Hold);
        assert_eq!(scaler.evaluate(&busy, now), ScaleDecision::Hold);
        assert_eq!(scaler.evaluate(&busy, now), ScaleDecision::Up);
    }

    #[test]
    fn scale_down_requires_five_checks_and_picks_highest_ready_id() {
        let mut scaler = scaler();
        // 1 occupied of 4, plenty ready, above min_servers.
        let quiet = snapshot(&[Ready, Ready, Ready, Occupied]);
        let now = Instant::now();
        for _ in 0..4 {
            assert_eq!(scaler.evaluate(&quiet, now), ScaleDecision::Hold);
        }
        assert_eq!(scaler.evaluate(&quiet, now), ScaleDecision::Down(2));
    }

    #[test]
    fn no_action_while_any_instance_is_starting() {
        let mut scaler = scaler();
        let launching = snapshot(&[Occupied, Occupied, Occupied, Starting]);
        let now = Instant::now();
        for _ in 0..10 {
            assert_eq!(scaler.evaluate(&launching, now), ScaleDecision::Skipped);
        }
    }

    #[test]
    fn cooldown_blocks_consecutive_actions() {
        let mut scaler = scaler();
        let busy = snapshot(&[Occupied, Occupied, Occupied, Occupied, Ready]);
        let start = Instant::now();
        for _ in 0..2 {
            scaler.evaluate(&busy, start);
        }
        assert_eq!(scaler.evaluate(&busy, start), ScaleDecision::Up);

        // Within the cooldown window every tick is skipped, qualifying or not.
        let during = start + Duration::from_secs(10);
        assert_eq!(scaler.evaluate(&busy, during), ScaleDecision::Skipped);

        // After the window the debounce starts over.
        let after = start + scaler.config.cooldown() + Duration::from_secs(1);
        assert_eq!(scaler.evaluate(&busy, after), ScaleDecision::Hold);
        assert_eq!(scaler.evaluate(&busy, after), ScaleDecision::Hold);
        assert_eq!(scaler.evaluate(&busy, after), ScaleDecision::Up);
    }

    #[test]
    fn low_ready_count_triggers_scale_up_even_when_quiet() {
        let mut scaler = scaler();
        // Nothing occupied, but zero ready instances violates the floor.
        let no_ready = snapshot(&[InstanceStatus::Crashed, InstanceStatus::Offline]);
        let now = Instant::now();
        scaler.evaluate(&no_ready, now);
        scaler.evaluate(&no_ready, now);
        assert_eq!(scaler.evaluate(&no_ready, now), ScaleDecision::Up);
    }

    #[test]
    fn scale_down_preserves_the_ready_floor_and_min_servers() {
        let mut scaler = scaler();
        let now = Instant::now();
        // Quiet fleet, but only one ready instance: removing it would drop
        // below min_ready_servers.
        let thin = snapshot(&[Ready, InstanceStatus::Offline, InstanceStatus::Offline]);
        for _ in 0..10 {
            let decision = scaler.evaluate(&thin, now);
            assert!(matches!(decision, ScaleDecision::Hold | ScaleDecision::Skipped));
        }

        // A single instance never scales below min_servers.
        let lone = snapshot(&[Ready]);
        for _ in 0..10 {
            let decision = scaler.evaluate(&lone, now);
            assert!(matches!(decision, ScaleDecision::Hold | ScaleDecision::Skipped));
        }
    }

    #[test]
    fn full_fleet_never_scales_up() {
        let (events, _) = broadcast::channel(16);
        let fleet = FleetConfig {
            max_servers: 3,
            min_servers: 1,
            ..FleetConfig::default()
        };
        let mut scaler = AutoScaler::new(ScalingConfig::default(), fleet, events);
        let saturated = snapshot(&[Occupied, Occupied, Occupied]);
        let now = Instant::now();
        for _ in 0..10 {
            let decision = scaler.evaluate(&saturated, now);
            assert!(matches!(decision, ScaleDecision::Hold | ScaleDecision::Skipped));
        }
    }
}
