//! Fleet-wide event stream for the dashboard/notification boundary.
//!
//! Every interesting edge in the core - status transitions, health edges,
//! scaling actions, upstream connection loss - is published on a single
//! `tokio::sync::broadcast` channel. Subscribers that lag simply miss
//! events; nothing in the core ever blocks on a slow consumer.

use crate::instance::{InstanceId, InstanceStatus};
use serde::{Deserialize, Serialize};

/// An event published by the core for external observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FleetEvent {
    /// An instance moved from one lifecycle status to another.
    StatusChanged {
        id: InstanceId,
        from: InstanceStatus,
        to: InstanceStatus,
    },
    /// An instance was added to the fleet.
    InstanceAdded { id: InstanceId, game_port: u16 },
    /// An instance was removed and its ports freed.
    InstanceRemoved { id: InstanceId },
    /// A match started on an instance.
    MatchStarted { id: InstanceId, match_id: u64 },
    /// A match hosted on an instance ended.
    MatchEnded { id: InstanceId, match_id: u64 },
    /// An instance reported a game frame over the lag threshold.
    LongFrame { id: InstanceId, milliseconds: u16 },
    /// An instance's control port failed enough consecutive probes to be
    /// declared unhealthy. Fires once per episode.
    Unhealthy { port: u16, consecutive_failures: u32 },
    /// A previously unhealthy control port answered a probe again. Fires
    /// once per episode.
    Recovered { port: u16 },
    /// Probe failures passed the restart watermark; remediation is left to
    /// the lifecycle layer.
    RestartRecommended { port: u16, consecutive_failures: u32 },
    /// The auto-scaler acted; `description` is human-readable.
    ScalingAction { description: String },
    /// The chat-server session dropped.
    UpstreamDisconnected { reason: String },
}
