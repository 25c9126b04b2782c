//! End-to-end lifecycle tests against a scripted fake game server.
//!
//! The "game server" is a shell script that just sleeps; the test itself
//! plays the child's control socket by listening on the instance's manager
//! port, so the full spawn -> connect -> announce -> stop/kill path runs
//! against a real OS process.

#![cfg(unix)]

use fleet_manager::{FleetConfig, FleetManager, InstanceStatus};
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::sleep;

/// Polls the fleet snapshot until the instance reaches `expected`.
async fn wait_for_status(manager: &Arc<FleetManager>, id: u32, expected: InstanceStatus) {
    for _ in 0..200 {
        let snapshot = manager.snapshot().await;
        if let Some(instance) = snapshot.instances.iter().find(|i| i.id == id) {
            if instance.status == expected {
                return;
            }
        }
        sleep(Duration::from_millis(50)).await;
    }
    let snapshot = manager.snapshot().await;
    panic!(
        "instance {id} never reached {expected:?}; fleet: {:?}",
        snapshot
            .instances
            .iter()
            .map(|i| (i.id, i.status))
            .collect::<Vec<_>>()
    );
}

/// A fake install directory whose server binary is a sleeping shell script.
fn fake_install() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("hon_server");
    std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    dir
}

fn config_for(dir: &tempfile::TempDir, control_port: u16) -> FleetConfig {
    FleetConfig {
        install_path: dir.path().to_path_buf(),
        executable: "hon_server".to_string(),
        host_address: "127.0.0.1".to_string(),
        max_servers: 2,
        min_servers: 1,
        game_port_base: 40001,
        voice_port_base: 41001,
        public_port_base: control_port,
        port_stride: 1,
        startup_timeout_secs: 15,
        stop_grace_secs: 1,
        idle_after_lobby_close: false,
    }
}

/// Frames a control event the way the game server does: 2-byte LE payload
/// length, then the tag-prefixed payload.
fn control_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 2);
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

#[tokio::test]
async fn spawn_announce_stop_and_remove() {
    // The test owns the instance's control port, standing in for the child.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let control_port = listener.local_addr().unwrap().port();

    let dir = fake_install();
    let manager = FleetManager::new(config_for(&dir, control_port));
    let id = manager.add_server().await.unwrap();

    manager.start_server(id).await.unwrap();
    {
        let snapshot = manager.snapshot().await;
        let instance = &snapshot.instances[0];
        assert_eq!(instance.status, InstanceStatus::Starting);
        assert!(instance.process_id.is_some());
        assert!(instance.start_time.is_some());
    }

    // Accept the manager's control connection and announce readiness.
    let (mut control, _) = listener.accept().await.unwrap();
    let mut announce = vec![0x40u8];
    announce.extend_from_slice(&(40001u32).to_le_bytes());
    control.write_all(&control_frame(&announce)).await.unwrap();
    wait_for_status(&manager, id, InstanceStatus::Ready).await;

    // Graceful stop: the shutdown byte arrives here; the sleeping script
    // ignores it, so the manager kills it after the grace window.
    let manager2 = manager.clone();
    let stopper = tokio::spawn(async move { manager2.stop_server(id, true).await });
    let mut command = [0u8; 1];
    control.read_exact(&mut command).await.unwrap();
    assert_eq!(command[0], 0x22);
    stopper.await.unwrap().unwrap();

    let snapshot = manager.snapshot().await;
    let instance = &snapshot.instances[0];
    assert_eq!(instance.status, InstanceStatus::Offline);
    assert!(instance.process_id.is_none());
    assert!(instance.start_time.is_none());

    manager.remove_server(id).await.unwrap();
    assert_eq!(manager.snapshot().await.total, 0);
}

#[tokio::test]
async fn killed_process_is_marked_crashed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let control_port = listener.local_addr().unwrap().port();

    let dir = fake_install();
    let manager = FleetManager::new(config_for(&dir, control_port));
    let id = manager.add_server().await.unwrap();
    manager.start_server(id).await.unwrap();

    let (mut control, _) = listener.accept().await.unwrap();
    let mut announce = vec![0x40u8];
    announce.extend_from_slice(&(40001u32).to_le_bytes());
    control.write_all(&control_frame(&announce)).await.unwrap();
    wait_for_status(&manager, id, InstanceStatus::Ready).await;

    // Kill the backing process out from under the manager. No stop was
    // requested, so this must resolve to Crashed, never Offline.
    let pid = manager.snapshot().await.instances[0].process_id.unwrap();
    let killed = std::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .unwrap();
    assert!(killed.success());
    wait_for_status(&manager, id, InstanceStatus::Crashed).await;

    // A crashed instance can be started again.
    let snapshot = manager.snapshot().await;
    assert!(snapshot.instances[0].status.can_start());
}
