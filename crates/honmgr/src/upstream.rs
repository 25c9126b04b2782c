//! Upstream session wiring.
//!
//! Authenticates with the master server once at startup, opens the chat
//! session, and pumps inbound chat events into the fleet manager. Per the
//! error-handling contract, authentication failures are surfaced to the
//! operator and NOT retried in a tight loop - the daemon keeps managing the
//! fleet locally and a fresh attempt requires a restart (an explicit
//! re-trigger).

use crate::config::AppConfig;
use fleet_manager::{FleetManager, InstanceStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};
use upstream_session::{
    master, ChatEvent, ChatSession, ServerInfoEntry, ServerInfoReport, UpstreamError,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Wire status codes for the fleet report, one byte per instance state.
fn status_code(status: InstanceStatus) -> u8 {
    match status {
        InstanceStatus::Unknown => 0,
        InstanceStatus::Offline => 1,
        InstanceStatus::Starting => 2,
        InstanceStatus::Ready => 3,
        InstanceStatus::Occupied => 4,
        InstanceStatus::Idle => 5,
        InstanceStatus::Crashed => 6,
    }
}

/// Runs the whole upstream side: auth, chat session, event pump, status
/// reports. Returns when the session ends or was never established.
pub async fn run(
    config: AppConfig,
    manager: Arc<FleetManager>,
    shutdown: broadcast::Sender<()>,
) {
    let client = match reqwest::Client::builder().timeout(HTTP_TIMEOUT).build() {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "could not build HTTP client");
            return;
        }
    };

    let session = match master::authenticate(&client, &config.master).await {
        Ok(session) => session,
        Err(e) => {
            // Operator-facing taxonomy; each case wants different action.
            match &e {
                UpstreamError::BadCredentials | UpstreamError::NoHostingPermission => {
                    error!(error = %e, "❌ master authentication refused - check credentials")
                }
                UpstreamError::MasterOutage(_) => {
                    error!(error = %e, "❌ master server outage - restart to retry")
                }
                other => error!(error = %other, "❌ master authentication failed"),
            }
            manager.report_upstream_loss(format!("authentication failed: {e}"));
            return;
        }
    };

    let (events_tx, events_rx) = mpsc::channel(64);
    let chat = match ChatSession::connect(
        &session,
        events_tx,
        config.chat.heartbeat(),
        shutdown.subscribe(),
    )
    .await
    {
        Ok(chat) => chat,
        Err(e) => {
            error!(error = %e, "❌ chat server connection failed");
            manager.report_upstream_loss(format!("chat connect failed: {e}"));
            return;
        }
    };

    tokio::spawn(report_server_info(
        chat.clone(),
        manager.clone(),
        config.chat.server_info_interval(),
        shutdown.subscribe(),
    ));

    pump_chat_events(events_rx, manager, shutdown.subscribe()).await;
}

/// Applies inbound chat events to the fleet manager, in arrival order.
async fn pump_chat_events(
    mut events: mpsc::Receiver<ChatEvent>,
    manager: Arc<FleetManager>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => return,
            },
            _ = shutdown.recv() => return,
        };
        match event {
            ChatEvent::CreateMatch { instance_id, match_id } => {
                if let Err(e) = manager.begin_match(instance_id, match_id).await {
                    warn!(instance_id, match_id, error = %e, "create-match dropped");
                }
            }
            ChatEvent::EndMatch { instance_id, match_id } => {
                if let Err(e) = manager.end_match(instance_id, match_id).await {
                    warn!(instance_id, match_id, error = %e, "end-match dropped");
                }
            }
            ChatEvent::RemoteCommand { instance_id, command } => {
                info!(instance_id, %command, "remote command relayed");
                if let Err(e) = manager.send_remote_command(instance_id, &command).await {
                    warn!(instance_id, error = %e, "remote command failed");
                }
            }
            ChatEvent::Options { key, value } => {
                info!(%key, %value, "option update from chat server");
            }
            ChatEvent::Disconnected { reason } => {
                manager.report_upstream_loss(reason);
                return;
            }
        }
    }
}

/// Periodically reports fleet status to the chat server.
async fn report_server_info(
    chat: Arc<ChatSession>,
    manager: Arc<FleetManager>,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !chat.is_connected() {
                    return;
                }
                let snapshot = manager.snapshot().await;
                let report = ServerInfoReport {
                    ready: snapshot.ready as u8,
                    occupied: snapshot.occupied as u8,
                    idle: snapshot.idle as u8,
                    entries: snapshot
                        .instances
                        .iter()
                        .map(|i| ServerInfoEntry {
                            id: i.id,
                            status_code: status_code(i.status),
                            game_port: i.game_port,
                        })
                        .collect(),
                };
                if let Err(e) = chat.send_server_info(&report).await {
                    warn!(error = %e, "fleet status report failed");
                    return;
                }
            }
            _ = shutdown.recv() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_distinct() {
        let all = [
            InstanceStatus::Unknown,
            InstanceStatus::Offline,
            InstanceStatus::Starting,
            InstanceStatus::Ready,
            InstanceStatus::Occupied,
            InstanceStatus::Idle,
            InstanceStatus::Crashed,
        ];
        let mut codes: Vec<u8> = all.iter().map(|s| status_code(*s)).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }
}
