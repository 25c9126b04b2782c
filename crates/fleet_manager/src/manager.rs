//! Fleet lifecycle manager.
//!
//! Owns the instance collection behind one coarse `RwLock` and drives every
//! state transition: explicit lifecycle calls (add/start/stop/restart/
//! remove), control-channel event ingestion, and match events relayed from
//! the chat session. Background loops (health, scaling, resource sampler)
//! only ever see point-in-time snapshots.
//!
//! Failure semantics: a process that exits without a preceding requested
//! stop is always `Crashed`, never silently demoted to `Offline`. The
//! manager itself never auto-restarts anything - that call belongs to the
//! restart policy or the operator.

use crate::config::FleetConfig;
use crate::control_channel::{ControlChannel, ControlEventStream};
use crate::error::FleetError;
use crate::events::FleetEvent;
use crate::instance::{Instance, InstanceId, InstanceStatus};
use crate::process;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::process::Child;
use tokio::sync::{broadcast, oneshot, watch, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use wire_protocol::{ControlCommand, ControlEvent};

/// Capacity of the fleet event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Runtime handles for an instance with a live backing process.
struct Runtime {
    /// Write half of the control channel; `None` until the bring-up task
    /// has connected.
    control: Option<Arc<ControlChannel>>,
    /// Fires the process supervisor's kill switch.
    kill_tx: Option<oneshot::Sender<()>>,
    /// Flips to `true` when the supervisor observes process exit.
    exited: watch::Receiver<bool>,
    /// Set by `stop_server` before the shutdown command goes out, so the
    /// exit handler can tell a requested stop from a crash.
    stop_requested: bool,
}

struct Managed {
    info: Instance,
    runtime: Option<Runtime>,
}

/// Read-only fleet state for the dashboard boundary and the control loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSnapshot {
    pub instances: Vec<Instance>,
    pub total: usize,
    pub ready: usize,
    pub occupied: usize,
    pub starting: usize,
    pub idle: usize,
    pub crashed: usize,
    /// Fraction of instances currently `Occupied`; 0 for an empty fleet.
    pub occupancy_rate: f64,
}

/// The fleet lifecycle manager.
///
/// All mutation goes through `&self` methods taking the internal write
/// lock; per-instance control events are applied by a single reader task
/// per channel, so each instance's transitions follow its own event order.
pub struct FleetManager {
    config: FleetConfig,
    instances: RwLock<BTreeMap<InstanceId, Managed>>,
    events: broadcast::Sender<FleetEvent>,
}

impl FleetManager {
    pub fn new(config: FleetConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            config,
            instances: RwLock::new(BTreeMap::new()),
            events,
        })
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// Subscribes to the fleet event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.events.subscribe()
    }

    /// The underlying event channel, shared with the health monitor and
    /// scaler so all core signals arrive on one stream.
    pub fn event_sender(&self) -> broadcast::Sender<FleetEvent> {
        self.events.clone()
    }

    /// Adds a new instance in `Offline`, assigning the lowest free port
    /// slot.
    ///
    /// Slot N maps to `(game_port_base, voice_port_base, public_port_base)
    /// + N * port_stride`; removed instances free their slot for reuse.
    pub async fn add_server(&self) -> Result<InstanceId, FleetError> {
        let mut instances = self.instances.write().await;
        if instances.len() >= self.config.max_servers {
            return Err(FleetError::FleetFull(self.config.max_servers));
        }
        // Lowest slot index not currently occupied. Ids double as slot
        // indexes, which is what makes port reuse after removal work.
        let slot = (0..self.config.max_servers as InstanceId)
            .find(|id| !instances.contains_key(id))
            .ok_or(FleetError::FleetFull(self.config.max_servers))?;
        let stride = self.config.port_stride * slot as u16;
        let instance = Instance::new(
            slot,
            self.config.game_port_base + stride,
            self.config.voice_port_base + stride,
            self.config.public_port_base + stride,
        );
        info!(
            id = slot,
            game_port = instance.game_port,
            voice_port = instance.voice_port,
            public_port = instance.public_port,
            "🆕 instance added to fleet"
        );
        self.publish(FleetEvent::InstanceAdded {
            id: slot,
            game_port: instance.game_port,
        });
        instances.insert(
            slot,
            Managed {
                info: instance,
                runtime: None,
            },
        );
        Ok(slot)
    }

    /// Launches the backing process for an instance and transitions it to
    /// `Starting`.
    ///
    /// Returns as soon as the process is spawned; the control channel is
    /// connected by a background bring-up task and the transition to
    /// `Ready` happens when the announce event arrives. A startup timer is
    /// armed so an instance that never announces resolves to `Crashed`
    /// instead of being forgotten.
    pub async fn start_server(self: &Arc<Self>, id: InstanceId) -> Result<(), FleetError> {
        let public_port;
        {
            let mut instances = self.instances.write().await;
            let managed = instances.get_mut(&id).ok_or(FleetError::UnknownInstance(id))?;
            if !managed.info.status.can_start() {
                return Err(FleetError::InvalidState {
                    id,
                    status: managed.info.status,
                    expected: "offline, crashed, or unknown",
                });
            }

            let child = match process::launch(&self.config, &managed.info) {
                Ok(child) => child,
                Err(e) => {
                    error!(id, error = %e, "💥 failed to launch game server process");
                    self.transition(&mut managed.info, InstanceStatus::Crashed);
                    return Err(FleetError::Launch(e));
                }
            };

            managed.info.process_id = child.id();
            managed.info.start_time = Some(SystemTime::now());
            public_port = managed.info.public_port;
            self.transition(&mut managed.info, InstanceStatus::Starting);
            info!(id, pid = ?child.id(), "🚀 game server process spawned");

            let (exited_tx, exited_rx) = watch::channel(false);
            let (kill_tx, kill_rx) = oneshot::channel();
            managed.runtime = Some(Runtime {
                control: None,
                kill_tx: Some(kill_tx),
                exited: exited_rx,
                stop_requested: false,
            });
            tokio::spawn(Self::supervise_process(
                self.clone(),
                id,
                child,
                exited_tx,
                kill_rx,
            ));
        }

        tokio::spawn(self.clone().bring_up(id, public_port));
        tokio::spawn(self.clone().enforce_startup_timeout(id));
        Ok(())
    }

    /// Stops an instance and transitions it to `Offline`.
    ///
    /// `graceful` sends the shutdown control command and allows the grace
    /// window for the process to exit on its own before killing it; a
    /// non-graceful stop kills immediately. Stopping an instance with no
    /// backing process just forces `Offline`.
    pub async fn stop_server(&self, id: InstanceId, graceful: bool) -> Result<(), FleetError> {
        let (control, mut exited) = {
            let mut instances = self.instances.write().await;
            let managed = instances.get_mut(&id).ok_or(FleetError::UnknownInstance(id))?;
            match managed.runtime.as_mut() {
                Some(runtime) => {
                    runtime.stop_requested = true;
                    (runtime.control.clone(), runtime.exited.clone())
                }
                None => {
                    self.transition(&mut managed.info, InstanceStatus::Offline);
                    managed.info.process_id = None;
                    managed.info.start_time = None;
                    managed.info.match_id = None;
                    return Ok(());
                }
            }
        };

        let mut exit_seen = false;
        if graceful {
            if let Some(control) = control {
                if let Err(e) = control.send(&ControlCommand::Shutdown).await {
                    warn!(id, error = %e, "shutdown command failed, will kill");
                }
            }
            exit_seen = timeout(self.config.stop_grace(), Self::await_exit(&mut exited))
                .await
                .is_ok();
            if !exit_seen {
                warn!(id, "⏱️ grace window elapsed, killing process");
            }
        }

        if !exit_seen {
            self.fire_kill(id).await;
            // A killed process still takes a moment to reap.
            if timeout(self.config.stop_grace(), Self::await_exit(&mut exited))
                .await
                .is_err()
            {
                error!(id, "process survived the kill, leaving state untouched");
                return Err(FleetError::StopTimeout(id));
            }
        }

        let mut instances = self.instances.write().await;
        if let Some(managed) = instances.get_mut(&id) {
            self.transition(&mut managed.info, InstanceStatus::Offline);
            managed.info.process_id = None;
            managed.info.start_time = None;
            managed.info.match_id = None;
            managed.runtime = None;
        }
        info!(id, "🛑 instance stopped");
        Ok(())
    }

    /// Stops (gracefully) and relaunches an instance.
    pub async fn restart_server(self: &Arc<Self>, id: InstanceId) -> Result<(), FleetError> {
        {
            let instances = self.instances.read().await;
            if !instances.contains_key(&id) {
                return Err(FleetError::UnknownInstance(id));
            }
        }
        self.stop_server(id, true).await?;
        self.start_server(id).await
    }

    /// Removes a stopped instance, freeing its port slot for reuse.
    pub async fn remove_server(&self, id: InstanceId) -> Result<(), FleetError> {
        let mut instances = self.instances.write().await;
        let managed = instances.get(&id).ok_or(FleetError::UnknownInstance(id))?;
        if managed.info.status.is_live() || managed.runtime.is_some() {
            return Err(FleetError::NotStopped {
                id,
                status: managed.info.status,
            });
        }
        instances.remove(&id);
        info!(id, "🗑️ instance removed from fleet");
        self.publish(FleetEvent::InstanceRemoved { id });
        Ok(())
    }

    /// Point-in-time snapshot of the whole fleet.
    pub async fn snapshot(&self) -> FleetSnapshot {
        let instances = self.instances.read().await;
        let list: Vec<Instance> = instances.values().map(|m| m.info.clone()).collect();
        let count = |status: InstanceStatus| list.iter().filter(|i| i.status == status).count();
        let total = list.len();
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
            instances: list,
        }
    }

    /// Marks an instance occupied by a match (chat server create-match).
    pub async fn begin_match(&self, id: InstanceId, match_id: u64) -> Result<(), FleetError> {
        let mut instances = self.instances.write().await;
        let managed = instances.get_mut(&id).ok_or(FleetError::UnknownInstance(id))?;
        managed.info.match_id = Some(match_id);
        self.transition(&mut managed.info, InstanceStatus::Occupied);
        info!(id, match_id, "🎮 match started");
        self.publish(FleetEvent::MatchStarted { id, match_id });
        Ok(())
    }

    /// Clears an instance's match (chat server end-match) and returns it to
    /// `Ready` or `Idle` per the configured idle policy.
    pub async fn end_match(&self, id: InstanceId, match_id: u64) -> Result<(), FleetError> {
        let schedule_stop = {
            let mut instances = self.instances.write().await;
            let managed = instances.get_mut(&id).ok_or(FleetError::UnknownInstance(id))?;
            managed.info.match_id = None;
            self.transition(&mut managed.info, self.after_match_status());
            info!(id, match_id, "🏁 match ended");
            self.publish(FleetEvent::MatchEnded { id, match_id });
            managed.info.scheduled_shutdown
        };
        if schedule_stop {
            info!(id, "scheduled shutdown pending, stopping instance");
            self.stop_server(id, true).await?;
        }
        Ok(())
    }

    /// Relays a chat message to an instance.
    pub async fn send_message(&self, id: InstanceId, text: &str) -> Result<(), FleetError> {
        self.send_command(id, ControlCommand::Message(text.to_string()))
            .await
    }

    /// Relays a remote console command to an instance.
    pub async fn send_remote_command(&self, id: InstanceId, command: &str) -> Result<(), FleetError> {
        self.send_command(id, ControlCommand::RemoteCommand(command.to_string()))
            .await
    }

    /// Puts an instance to sleep (stops accepting matches without exiting).
    pub async fn sleep_server(&self, id: InstanceId) -> Result<(), FleetError> {
        self.send_command(id, ControlCommand::Sleep).await?;
        self.set_enabled(id, false).await
    }

    /// Wakes a sleeping instance.
    pub async fn wake_server(&self, id: InstanceId) -> Result<(), FleetError> {
        self.send_command(id, ControlCommand::Wake).await?;
        self.set_enabled(id, true).await
    }

    /// Flags an instance to stop once its current match ends.
    pub async fn schedule_shutdown(&self, id: InstanceId) -> Result<(), FleetError> {
        let mut instances = self.instances.write().await;
        let managed = instances.get_mut(&id).ok_or(FleetError::UnknownInstance(id))?;
        managed.info.scheduled_shutdown = true;
        Ok(())
    }

    /// Surfaces a chat-session loss on the fleet event channel.
    ///
    /// Matches in flight are deliberately not ended here; that decision
    /// belongs to the chat server, observed via a later end-match or a
    /// fresh handshake.
    pub fn report_upstream_loss(&self, reason: String) {
        self.publish(FleetEvent::UpstreamDisconnected { reason });
    }

    /// Refreshes an instance's resource samples (external sampler input).
    pub async fn update_resources(&self, id: InstanceId, cpu_percent: f32, memory_mb: u64) {
        let mut instances = self.instances.write().await;
        if let Some(managed) = instances.get_mut(&id) {
            managed.info.cpu_percent = cpu_percent;
            managed.info.memory_mb = memory_mb;
        }
    }

    /// Control ports of instances that currently have a backing process,
    /// for health monitor registration.
    pub async fn live_control_ports(&self) -> Vec<u16> {
        let instances = self.instances.read().await;
        instances
            .values()
            .filter(|m| m.info.status.is_live())
            .map(|m| m.info.public_port)
            .collect()
    }

    /// Resolves a control port back to its instance id.
    pub async fn instance_by_control_port(&self, port: u16) -> Option<InstanceId> {
        let instances = self.instances.read().await;
        instances
            .values()
            .find(|m| m.info.public_port == port)
            .map(|m| m.info.id)
    }

    // ------------------------------------------------------------------
    // Control-channel plumbing
    // ------------------------------------------------------------------

    /// Connects the control channel for a freshly spawned instance and
    /// starts its single reader task.
    async fn bring_up(self: Arc<Self>, id: InstanceId, public_port: u16) {
        let window = self.config.startup_timeout();
        match ControlChannel::connect(public_port, window).await {
            Ok((channel, events)) => {
                let channel = Arc::new(channel);
                {
                    let mut instances = self.instances.write().await;
                    match instances.get_mut(&id).and_then(|m| m.runtime.as_mut()) {
                        Some(runtime) => runtime.control = Some(channel),
                        // Stopped while we were connecting; nothing to wire up.
                        None => return,
                    }
                }
                tokio::spawn(self.clone().read_control_events(id, events));
            }
            Err(e) => {
                error!(id, port = public_port, error = %e, "💥 control channel never came up");
                self.mark_crashed(id, "control channel connect failed").await;
                self.fire_kill(id).await;
            }
        }
    }

    /// The single reader for one instance's control channel. Events are
    /// applied in arrival order; stream end means the channel is lost.
    async fn read_control_events(self: Arc<Self>, id: InstanceId, mut events: ControlEventStream) {
        while let Some(event) = events.next().await {
            self.handle_control_event(id, event).await;
        }
        self.handle_channel_loss(id).await;
    }

    /// Applies one control-channel event to the instance's state machine.
    pub(crate) async fn handle_control_event(&self, id: InstanceId, event: ControlEvent) {
        let mut instances = self.instances.write().await;
        let Some(managed) = instances.get_mut(&id) else {
            debug!(id, ?event, "control event for unknown instance dropped");
            return;
        };
        match event {
            ControlEvent::Announce { port } => {
                if port != managed.info.game_port as u32 {
                    warn!(
                        id,
                        announced = port,
                        expected = managed.info.game_port,
                        "instance announced an unexpected game port"
                    );
                }
                info!(id, port, "✅ instance announced, ready for matches");
                self.transition(&mut managed.info, InstanceStatus::Ready);
            }
            ControlEvent::Closed => {
                let requested = managed
                    .runtime
                    .as_ref()
                    .map(|r| r.stop_requested)
                    .unwrap_or(true);
                let next = if requested {
                    InstanceStatus::Offline
                } else {
                    warn!(id, "instance reported closed without a requested stop");
                    InstanceStatus::Crashed
                };
                self.transition(&mut managed.info, next);
            }
            ControlEvent::LobbyCreated => {
                debug!(id, "lobby created");
                self.transition(&mut managed.info, InstanceStatus::Occupied);
            }
            ControlEvent::LobbyClosed => {
                debug!(id, "lobby closed");
                managed.info.match_id = None;
                self.transition(&mut managed.info, self.after_match_status());
            }
            ControlEvent::LongFrame { milliseconds } => {
                warn!(id, milliseconds, "🐢 long frame reported");
                self.publish(FleetEvent::LongFrame { id, milliseconds });
            }
            ControlEvent::Status(blob) => {
                debug!(id, bytes = blob.len(), "status report received");
            }
            ControlEvent::Unknown(tag) => {
                // Newer server builds emit tags we have never heard of;
                // tolerated by contract.
                debug!(id, tag, "unknown control event tag dropped");
            }
        }
    }

    /// Control-channel loss without a requested stop is a crash.
    async fn handle_channel_loss(&self, id: InstanceId) {
        let requested = {
            let instances = self.instances.read().await;
            match instances.get(&id) {
                Some(managed) => managed
                    .runtime
                    .as_ref()
                    .map(|r| r.stop_requested)
                    .unwrap_or(true),
                None => return,
            }
        };
        if requested {
            debug!(id, "control channel closed after requested stop");
            return;
        }
        warn!(id, "🔌 control channel lost");
        self.mark_crashed(id, "control channel lost").await;
        self.fire_kill(id).await;
    }

    /// Owns the child process: reports its exit and services the kill
    /// switch.
    async fn supervise_process(
        manager: Arc<Self>,
        id: InstanceId,
        mut child: Child,
        exited_tx: watch::Sender<bool>,
        mut kill_rx: oneshot::Receiver<()>,
    ) {
        let mut kill_armed = true;
        loop {
            tokio::select! {
                status = child.wait() => {
                    let code = status.ok().and_then(|s| s.code());
                    let _ = exited_tx.send(true);
                    manager.on_process_exit(id, code).await;
                    return;
                }
                kill = &mut kill_rx, if kill_armed => {
                    kill_armed = false;
                    if kill.is_ok() {
                        debug!(id, "kill switch fired");
                        let _ = child.start_kill();
                    }
                }
            }
        }
    }

    /// Applies the crash-vs-requested-stop decision when the process exits.
    async fn on_process_exit(&self, id: InstanceId, code: Option<i32>) {
        let mut instances = self.instances.write().await;
        let Some(managed) = instances.get_mut(&id) else {
            return;
        };
        let requested = managed
            .runtime
            .as_ref()
            .map(|r| r.stop_requested)
            .unwrap_or(true);
        managed.info.process_id = None;
        managed.info.start_time = None;
        managed.runtime = None;
        if requested {
            debug!(id, ?code, "process exited after requested stop");
            self.transition(&mut managed.info, InstanceStatus::Offline);
        } else {
            error!(id, ?code, "💥 process exited unexpectedly");
            managed.info.match_id = None;
            self.transition(&mut managed.info, InstanceStatus::Crashed);
        }
    }

    /// Resolves a `Starting` instance that never announced to `Crashed`.
    async fn enforce_startup_timeout(self: Arc<Self>, id: InstanceId) {
        tokio::time::sleep(self.config.startup_timeout()).await;
        let still_starting = {
            let instances = self.instances.read().await;
            instances
                .get(&id)
                .map(|m| m.info.status == InstanceStatus::Starting)
                .unwrap_or(false)
        };
        if still_starting {
            error!(
                id,
                timeout_secs = self.config.startup_timeout_secs,
                "⏰ instance never became ready within the startup timeout"
            );
            self.mark_crashed(id, "startup timeout").await;
            self.fire_kill(id).await;
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn send_command(&self, id: InstanceId, command: ControlCommand) -> Result<(), FleetError> {
        let control = {
            let instances = self.instances.read().await;
            let managed = instances.get(&id).ok_or(FleetError::UnknownInstance(id))?;
            managed
                .runtime
                .as_ref()
                .and_then(|r| r.control.clone())
                .ok_or(FleetError::InvalidState {
                    id,
                    status: managed.info.status,
                    expected: "a live instance with a connected control channel",
                })?
        };
        control
            .send(&command)
            .await
            .map_err(|source| FleetError::ControlChannel { id, source })
    }

    async fn set_enabled(&self, id: InstanceId, enabled: bool) -> Result<(), FleetError> {
        let mut instances = self.instances.write().await;
        let managed = instances.get_mut(&id).ok_or(FleetError::UnknownInstance(id))?;
        managed.info.enabled = enabled;
        Ok(())
    }

    async fn mark_crashed(&self, id: InstanceId, reason: &str) {
        let mut instances = self.instances.write().await;
        if let Some(managed) = instances.get_mut(&id) {
            if managed.info.status != InstanceStatus::Crashed {
                warn!(id, reason, "instance marked crashed");
            }
            managed.info.match_id = None;
            self.transition(&mut managed.info, InstanceStatus::Crashed);
        }
    }

    /// Fires the supervisor's kill switch if it is still armed.
    async fn fire_kill(&self, id: InstanceId) {
        let mut instances = self.instances.write().await;
        if let Some(runtime) = instances.get_mut(&id).and_then(|m| m.runtime.as_mut()) {
            if let Some(kill_tx) = runtime.kill_tx.take() {
                let _ = kill_tx.send(());
            }
        }
    }

    async fn await_exit(exited: &mut watch::Receiver<bool>) {
        while !*exited.borrow() {
            if exited.changed().await.is_err() {
                return;
            }
        }
    }

    fn after_match_status(&self) -> InstanceStatus {
        if self.config.idle_after_lobby_close {
            InstanceStatus::Idle
        } else {
            InstanceStatus::Ready
        }
    }

    fn transition(&self, info: &mut Instance, to: InstanceStatus) {
        if info.status == to {
            return;
        }
        let from = info.status;
        info.status = to;
        debug!(id = info.id, %from, %to, "status transition");
        self.publish(FleetEvent::StatusChanged { id: info.id, from, to });
    }

    fn publish(&self, event: FleetEvent) {
        // Nobody listening is fine; the dashboard boundary is optional.
        let _ = self.events.send(event);
    }
}
