//! # Fleet Manager - Game Server Fleet Supervision
//!
//! Owns the collection of managed game-server instances and everything that
//! keeps it honest:
//!
//! * **Lifecycle** - spawning, stopping, and restarting the backing
//!   processes, with a per-instance state machine driven by control-channel
//!   events ([`manager::FleetManager`]).
//! * **Control channels** - one loopback TCP connection per live instance
//!   carrying the local control protocol ([`control_channel`]).
//! * **Health monitoring** - periodic liveness probes with edge-triggered
//!   unhealthy/recovered signals ([`health::HealthMonitor`]).
//! * **Auto-scaling** - a debounced hysteresis controller that grows and
//!   shrinks the fleet to demand ([`scaling::AutoScaler`]).
//!
//! ## Design Philosophy
//!
//! The instance collection is the only shared mutable state: one coarse
//! `RwLock` guards it, and every background loop (health, scaling, control
//! readers) takes point-in-time snapshots rather than holding the lock
//! across I/O. Detection is separated from remediation throughout - the
//! health monitor never restarts anything, the scaler only ever issues
//! lifecycle calls back into the manager, and a crashed process is parked in
//! [`instance::InstanceStatus::Crashed`] for policy to deal with.

pub mod config;
pub mod control_channel;
pub mod events;
pub mod health;
pub mod instance;
pub mod manager;
pub mod process;
pub mod scaling;

mod error;

pub use config::{FleetConfig, HealthConfig, ScalingConfig};
pub use error::FleetError;
pub use events::FleetEvent;
pub use health::HealthMonitor;
pub use instance::{Instance, InstanceId, InstanceStatus};
pub use manager::{FleetManager, FleetSnapshot};
pub use scaling::AutoScaler;
