//! Game-server process launching.
//!
//! Builds the command line for a managed instance and spawns it with
//! `tokio::process`. The child's stdout/stderr are discarded - the game
//! server writes its own logs under the install path, and everything the
//! manager needs arrives over the control socket.

use crate::config::FleetConfig;
use crate::instance::Instance;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

/// Spawns the backing process for an instance.
///
/// The instance's port triple and the shared install path fully determine
/// the command line; nothing else about the process is configurable per
/// instance.
pub fn launch(config: &FleetConfig, instance: &Instance) -> std::io::Result<Child> {
    let executable = config.install_path.join(&config.executable);
    let mut command = Command::new(&executable);
    command
        .current_dir(&config.install_path)
        .arg("-dedicated")
        .args(["-register", &format!("127.0.0.1:{}", instance.public_port)])
        .args(["-host", &config.host_address])
        .args(["-port", &instance.game_port.to_string()])
        .args(["-voiceport", &instance.voice_port.to_string()])
        .args(["-name", &instance.name])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    debug!(
        instance = instance.id,
        executable = %executable.display(),
        game_port = instance.game_port,
        "spawning game server process"
    );
    command.spawn()
}
