//! Health monitoring for managed instances.
//!
//! The monitor probes each registered control port on a fixed interval and
//! keeps a rolling health state per port. It detects - it never remediates:
//! unhealthy, recovered, and restart-recommended signals are published on
//! the fleet event channel and the lifecycle layer decides what to do with
//! them.
//!
//! Edge semantics matter here. `Unhealthy` fires exactly once when the
//! failure count reaches the threshold, not once per subsequent failure;
//! `Recovered` fires exactly once on the first successful probe after an
//! unhealthy episode; `RestartRecommended` fires at most once per episode
//! when failures pass the higher watermark.

use crate::config::HealthConfig;
use crate::events::FleetEvent;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Smoothing factor for the response-time EWMA.
const RESPONSE_TIME_ALPHA: f64 = 0.3;

/// Rolling health state for one monitored control port.
#[derive(Debug, Clone)]
pub struct HealthState {
    pub consecutive_failures: u32,
    pub last_ping_time: Option<Instant>,
    pub last_response_time_ms: f64,
    pub average_response_time_ms: f64,
    /// Guards the one-shot restart recommendation for the current episode.
    restart_recommended: bool,
}

impl HealthState {
    fn new() -> Self {
        Self {
            consecutive_failures: 0,
            last_ping_time: None,
            last_response_time_ms: 0.0,
            average_response_time_ms: 0.0,
            restart_recommended: false,
        }
    }
}

/// Periodic liveness prober over the fleet's control ports.
pub struct HealthMonitor {
    config: HealthConfig,
    states: RwLock<HashMap<u16, HealthState>>,
    events: broadcast::Sender<FleetEvent>,
}

impl HealthMonitor {
    /// Creates a monitor publishing its signals on `events` (normally the
    /// fleet manager's event channel).
    pub fn new(config: HealthConfig, events: broadcast::Sender<FleetEvent>) -> Arc<Self> {
        Arc::new(Self {
            config,
            states: RwLock::new(HashMap::new()),
            events,
        })
    }

    /// Starts monitoring a control port. Idempotent; a re-registered port
    /// keeps its existing state.
    pub async fn register(&self, port: u16) {
        let mut states = self.states.write().await;
        if states.contains_key(&port) {
            return;
        }
        debug!(port, "health monitoring registered");
        states.insert(port, HealthState::new());
    }

    /// Stops monitoring a control port and discards its state.
    pub async fn deregister(&self, port: u16) {
        if self.states.write().await.remove(&port).is_some() {
            debug!(port, "health monitoring deregistered");
        }
    }

    /// Ports currently being monitored.
    pub async fn registered_ports(&self) -> Vec<u16> {
        self.states.read().await.keys().copied().collect()
    }

    /// Whether the port is currently considered healthy.
    ///
    /// Exactly `consecutive_failures < max_consecutive_failures`; an
    /// unregistered port has no opinion.
    pub async fn is_healthy(&self, port: u16) -> Option<bool> {
        let states = self.states.read().await;
        states
            .get(&port)
            .map(|s| s.consecutive_failures < self.config.max_consecutive_failures)
    }

    /// Copy of a port's health state, for the status boundary.
    pub async fn state(&self, port: u16) -> Option<HealthState> {
        self.states.read().await.get(&port).cloned()
    }

    /// Runs the probe loop until the shutdown signal fires.
    ///
    /// Each sweep probes all registered ports concurrently; a failing sweep
    /// never terminates the loop.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(self.config.check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.config.check_interval_secs,
            "🏥 health monitor started"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep().await,
                _ = shutdown.recv() => {
                    info!("health monitor stopping");
                    return;
                }
            }
        }
    }

    /// Probes every registered port once, concurrently.
    pub async fn sweep(self: &Arc<Self>) {
        let ports: Vec<u16> = self.states.read().await.keys().copied().collect();
        let probes: Vec<_> = ports
            .into_iter()
            .map(|port| {
                let monitor = self.clone();
                tokio::spawn(async move { monitor.probe(port).await })
            })
            .collect();
        for probe in probes {
            // A panicked probe task only loses that port's sample this tick.
            let _ = probe.await;
        }
    }

    async fn probe(&self, port: u16) {
        let started = Instant::now();
        let connect = TcpStream::connect(("127.0.0.1", port));
        match timeout(self.config.probe_timeout(), connect).await {
            Ok(Ok(_stream)) => {
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                self.record_success(port, elapsed_ms).await;
            }
            Ok(Err(e)) => {
                debug!(port, error = %e, "health probe failed");
                self.record_failure(port).await;
            }
            Err(_) => {
                debug!(
                    port,
                    timeout_secs = self.config.probe_timeout_secs,
                    "health probe timed out"
                );
                self.record_failure(port).await;
            }
        }
    }

    /// Applies a successful probe: failures reset to 0, response time
    /// recorded, recovery edge raised if the port was unhealthy.
    pub async fn record_success(&self, port: u16, response_time_ms: f64) {
        let mut states = self.states.write().await;
        let Some(state) = states.get_mut(&port) else {
            return;
        };
        let was_unhealthy = state.consecutive_failures >= self.config.max_consecutive_failures;
        state.consecutive_failures = 0;
        state.restart_recommended = false;
        state.last_ping_time = Some(Instant::now());
        state.last_response_time_ms = response_time_ms;
        state.average_response_time_ms = if state.average_response_time_ms == 0.0 {
            response_time_ms
        } else {
            RESPONSE_TIME_ALPHA * response_time_ms
                + (1.0 - RESPONSE_TIME_ALPHA) * state.average_response_time_ms
        };
        if was_unhealthy {
            info!(port, "💚 instance recovered");
            let _ = self.events.send(FleetEvent::Recovered { port });
        }
    }

    /// Applies a failed probe: failures increment, unhealthy and
    /// restart-recommended edges raised exactly once each per episode.
    pub async fn record_failure(&self, port: u16) {
        let mut states = self.states.write().await;
        let Some(state) = states.get_mut(&port) else {
            return;
        };
        state.consecutive_failures += 1;
        state.last_ping_time = Some(Instant::now());
        if state.consecutive_failures == self.config.max_consecutive_failures {
            warn!(
                port,
                failures = state.consecutive_failures,
                "🤒 instance unhealthy"
            );
            let _ = self.events.send(FleetEvent::Unhealthy {
                port,
                consecutive_failures: state.consecutive_failures,
            });
        }
        if state.consecutive_failures >= self.config.restart_watermark && !state.restart_recommended
        {
            state.restart_recommended = true;
            warn!(
                port,
                failures = state.consecutive_failures,
                "restart recommended"
            );
            let _ = self.events.send(FleetEvent::RestartRecommended {
                port,
                consecutive_failures: state.consecutive_failures,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> (Arc<HealthMonitor>, broadcast::Receiver<FleetEvent>) {
        let (tx, rx) = broadcast::channel(64);
        (HealthMonitor::new(HealthConfig::default(), tx), rx)
    }

    fn drain(rx: &mut broadcast::Receiver<FleetEvent>) -> Vec<FleetEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn success_resets_failures() {
        let (monitor, _rx) = monitor();
        monitor.register(12001).await;
        monitor.record_failure(12001).await;
        monitor.record_failure(12001).await;
        assert_eq!(monitor.state(12001).await.unwrap().consecutive_failures, 2);

        monitor.record_success(12001, 4.2).await;
        let state = monitor.state(12001).await.unwrap();
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.last_response_time_ms, 4.2);
        assert_eq!(monitor.is_healthy(12001).await, Some(true));
    }

    #[tokio::test]
    async fn is_healthy_tracks_threshold_exactly() {
        let (monitor, _rx) = monitor();
        monitor.register(12001).await;
        // Healthy iff failures < 3 (the default threshold).
        for expected in [true, true, false, false] {
            monitor.record_failure(12001).await;
            assert_eq!(monitor.is_healthy(12001).await, Some(expected));
        }
    }

    #[tokio::test]
    async fn unhealthy_fires_exactly_once() {
        let (monitor, mut rx) = monitor();
        monitor.register(12001).await;
        for _ in 0..5 {
            monitor.record_failure(12001).await;
        }
        let events = drain(&mut rx);
        let unhealthy = events
            .iter()
            .filter(|e| matches!(e, FleetEvent::Unhealthy { .. }))
            .count();
        assert_eq!(unhealthy, 1);
    }

    #[tokio::test]
    async fn recovered_fires_exactly_once() {
        let (monitor, mut rx) = monitor();
        monitor.register(12001).await;
        for _ in 0..4 {
            monitor.record_failure(12001).await;
        }
        drain(&mut rx);

        monitor.record_success(12001, 3.0).await;
        monitor.record_success(12001, 3.0).await;
        let events = drain(&mut rx);
        let recovered = events
            .iter()
            .filter(|e| matches!(e, FleetEvent::Recovered { .. }))
            .count();
        assert_eq!(recovered, 1);
    }

    #[tokio::test]
    async fn restart_recommended_at_watermark_once_per_episode() {
        let (monitor, mut rx) = monitor();
        monitor.register(12001).await;
        for _ in 0..8 {
            monitor.record_failure(12001).await;
        }
        let events = drain(&mut rx);
        let recommended = events
            .iter()
            .filter(|e| matches!(e, FleetEvent::RestartRecommended { .. }))
            .count();
        assert_eq!(recommended, 1);

        // Recovery re-arms the recommendation for the next episode.
        monitor.record_success(12001, 2.0).await;
        for _ in 0..8 {
            monitor.record_failure(12001).await;
        }
        let events = drain(&mut rx);
        let recommended = events
            .iter()
            .filter(|e| matches!(e, FleetEvent::RestartRecommended { .. }))
            .count();
        assert_eq!(recommended, 1);
    }

    #[tokio::test]
    async fn average_response_time_smooths() {
        let (monitor, _rx) = monitor();
        monitor.register(12001).await;
        monitor.record_success(12001, 10.0).await;
        assert_eq!(
            monitor.state(12001).await.unwrap().average_response_time_ms,
            10.0
        );
        monitor.record_success(12001, 20.0).await;
        let avg = monitor.state(12001).await.unwrap().average_response_time_ms;
        assert!((avg - 13.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn deregister_drops_state_without_disturbing_others() {
        let (monitor, _rx) = monitor();
        monitor.register(12001).await;
        monitor.register(12002).await;
        monitor.record_failure(12002).await;

        monitor.deregister(12001).await;
        assert!(monitor.state(12001).await.is_none());
        assert_eq!(monitor.state(12002).await.unwrap().consecutive_failures, 1);

        // Recording against a deregistered port is a no-op.
        monitor.record_failure(12001).await;
        assert!(monitor.state(12001).await.is_none());
    }

    #[tokio::test]
    async fn probe_sweep_detects_dead_and_live_ports() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live_port = listener.local_addr().unwrap().port();
        let accept_loop = tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        // A bound-then-dropped listener gives us a port nobody answers on.
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_port = dead.local_addr().unwrap().port();
        drop(dead);

        let (monitor, _rx) = monitor();
        monitor.register(live_port).await;
        monitor.register(dead_port).await;
        monitor.sweep().await;

        assert_eq!(monitor.state(live_port).await.unwrap().consecutive_failures, 0);
        assert!(monitor.state(live_port).await.unwrap().last_ping_time.is_some());
        assert_eq!(monitor.state(dead_port).await.unwrap().consecutive_failures, 1);
        accept_loop.abort();
    }
}
