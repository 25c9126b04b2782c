use crate::instance::{InstanceId, InstanceStatus};
use thiserror::Error;

/// Errors surfaced by fleet lifecycle operations.
///
/// Lifecycle calls return these instead of panicking so that the dashboard
/// boundary always gets a clear success/failure result with a reason.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("no such instance: {0}")]
    UnknownInstance(InstanceId),
    #[error("fleet is at its configured maximum of {0} instances")]
    FleetFull(usize),
    #[error("instance {id} is {status:?}, expected one of {expected}")]
    InvalidState {
        id: InstanceId,
        status: InstanceStatus,
        expected: &'static str,
    },
    #[error("instance {id} must be stopped before removal (currently {status:?})")]
    NotStopped {
        id: InstanceId,
        status: InstanceStatus,
    },
    #[error("failed to launch game server process: {0}")]
    Launch(#[source] std::io::Error),
    #[error("control channel error for instance {id}: {source}")]
    ControlChannel {
        id: InstanceId,
        #[source]
        source: std::io::Error,
    },
    #[error("instance {0} did not stop within the grace window")]
    StopTimeout(InstanceId),
}
