//! Managed instance representation and its status state machine.
//!
//! An [`Instance`] is one managed game-server process plus its metadata:
//! identity, the immutable port triple assigned at creation, the lifecycle
//! status, and the bookkeeping that other loops read (match id, start time,
//! resource samples).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Identifier for a managed instance, unique for the manager's lifetime.
pub type InstanceId = u32;

/// Lifecycle status of a managed instance.
///
/// Normal flow is `Offline -> Starting -> Ready <-> Occupied`, with `Idle`
/// as an optional parking state after a lobby closes and `Crashed` reachable
/// from anywhere on unexpected process exit or control-channel loss.
/// `Offline` is the rest state after an explicit stop; `Unknown` covers a
/// freshly registered instance whose first status report has not arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceStatus {
    Unknown,
    Offline,
    Starting,
    Ready,
    Occupied,
    Idle,
    Crashed,
}

impl InstanceStatus {
    /// Whether a backing process is expected to be alive in this state.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Starting
                | InstanceStatus::Ready
                | InstanceStatus::Occupied
                | InstanceStatus::Idle
        )
    }

    /// Whether `start_server` may be called from this state.
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Offline | InstanceStatus::Crashed | InstanceStatus::Unknown
        )
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceStatus::Unknown => "unknown",
            InstanceStatus::Offline => "offline",
            InstanceStatus::Starting => "starting",
            InstanceStatus::Ready => "ready",
            InstanceStatus::Occupied => "occupied",
            InstanceStatus::Idle => "idle",
            InstanceStatus::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

/// One managed game-server process plus its metadata.
///
/// Owned exclusively by the fleet manager; everything else sees copies via
/// snapshots. The port triple is assigned at creation and immutable for the
/// instance's lifetime - ports are only recycled after `remove_server`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub name: String,
    pub status: InstanceStatus,

    /// UDP port the game clients connect to.
    pub game_port: u16,
    /// Voice chat port.
    pub voice_port: u16,
    /// Loopback TCP "manager port" carrying the local control protocol.
    pub public_port: u16,

    /// OS process id, present only while a backing process exists.
    pub process_id: Option<u32>,

    /// Operator switch; a disabled instance is skipped by the scaler.
    pub enabled: bool,
    /// Set when the instance should stop once its current match ends.
    pub scheduled_shutdown: bool,

    /// Match currently hosted, set on create-match and cleared on end-match.
    pub match_id: Option<u64>,
    /// Set on successful launch, cleared on stop.
    pub start_time: Option<SystemTime>,

    /// Refreshed by the external resource sampler, not owned here.
    pub cpu_percent: f32,
    /// Refreshed by the external resource sampler, not owned here.
    pub memory_mb: u64,
}

impl Instance {
    pub fn new(id: InstanceId, game_port: u16, voice_port: u16, public_port: u16) -> Self {
        Self {
            id,
            name: format!("Server {id}"),
            status: InstanceStatus::Offline,
            game_port,
            voice_port,
            public_port,
            process_id: None,
            enabled: true,
            scheduled_shutdown: false,
            match_id: None,
            start_time: None,
            cpu_percent: 0.0,
            memory_mb: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_instance_starts_offline() {
        let inst = Instance::new(3, 10004, 11004, 12004);
        assert_eq!(inst.status, InstanceStatus::Offline);
        assert!(inst.process_id.is_none());
        assert!(inst.match_id.is_none());
        assert!(inst.enabled);
    }

    #[test]
    fn liveness_by_status() {
        assert!(InstanceStatus::Ready.is_live());
        assert!(InstanceStatus::Occupied.is_live());
        assert!(InstanceStatus::Starting.is_live());
        assert!(InstanceStatus::Idle.is_live());
        assert!(!InstanceStatus::Offline.is_live());
        assert!(!InstanceStatus::Crashed.is_live());
        assert!(!InstanceStatus::Unknown.is_live());
    }

    #[test]
    fn startability_by_status() {
        assert!(InstanceStatus::Offline.can_start());
        assert!(InstanceStatus::Crashed.can_start());
        assert!(!InstanceStatus::Ready.can_start());
        assert!(!InstanceStatus::Starting.can_start());
    }
}
