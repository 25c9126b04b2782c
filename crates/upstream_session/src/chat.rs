//! Persistent chat-server session.
//!
//! After master authentication the manager holds one framed TCP connection
//! to the chat server: handshake, periodic heartbeats, pong-on-ping, and a
//! read loop that turns inbound manager-range packets into [`ChatEvent`]s
//! on an mpsc channel. The session never touches fleet state itself.
//!
//! Connection loss flips `is_connected()` immediately and emits
//! [`ChatEvent::Disconnected`]. Matches in flight are deliberately left
//! alone - ending them is the chat server's decision, observed through a
//! later end-match or a fresh handshake. Reconnecting is likewise the
//! supervisor's call; this type never retries on its own.

use crate::error::UpstreamError;
use crate::master::UpstreamSession;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::interval;
use tracing::{debug, info, warn};
use wire_protocol::opcodes::{
    self, OpcodeClass, ReplayStatus, MANAGER_CREATE_MATCH, MANAGER_END_MATCH,
    MANAGER_HANDSHAKE, MANAGER_HANDSHAKE_ACCEPTED, MANAGER_HANDSHAKE_REJECTED,
    MANAGER_HEARTBEAT, MANAGER_OPTIONS, MANAGER_REMOTE_COMMAND, MANAGER_REPLAY_STATUS,
    MANAGER_SERVER_INFO, PING, PONG,
};
use wire_protocol::{build_packet, PacketReader, PacketWriter};

/// Inbound chat-server message, decoded and handed to the fleet manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// Host a match on the given instance.
    CreateMatch { instance_id: u32, match_id: u64 },
    /// The match on the given instance has ended.
    EndMatch { instance_id: u32, match_id: u64 },
    /// Console command to relay to an instance.
    RemoteCommand { instance_id: u32, command: String },
    /// Key/value option pushed by the chat server.
    Options { key: String, value: String },
    /// The session dropped; the manager must treat the channel as gone.
    Disconnected { reason: String },
}

/// One instance's line in a fleet status report.
#[derive(Debug, Clone)]
pub struct ServerInfoEntry {
    pub id: u32,
    pub status_code: u8,
    pub game_port: u16,
}

/// Outbound fleet status report.
#[derive(Debug, Clone, Default)]
pub struct ServerInfoReport {
    pub ready: u8,
    pub occupied: u8,
    pub idle: u8,
    pub entries: Vec<ServerInfoEntry>,
}

/// A live, authenticated chat-server session.
pub struct ChatSession {
    writer: Mutex<OwnedWriteHalf>,
    connected: AtomicBool,
    peer: String,
}

impl ChatSession {
    /// Connects, performs the handshake, and starts the read and heartbeat
    /// loops.
    ///
    /// Fails fast on rejection or connection loss during the handshake;
    /// after that, all failures surface as [`ChatEvent::Disconnected`].
    pub async fn connect(
        session: &UpstreamSession,
        events: mpsc::Sender<ChatEvent>,
        heartbeat: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Arc<Self>, UpstreamError> {
        let peer = format!("{}:{}", session.chat_host, session.chat_port);
        info!(%peer, server_id = session.server_id, "connecting to chat server");
        let stream = TcpStream::connect((session.chat_host.as_str(), session.chat_port)).await?;
        stream.set_nodelay(true).ok();
        let (mut read_half, mut write_half) = stream.into_split();

        // Handshake: server id + session cookie, answered by accept/reject.
        let mut payload = PacketWriter::new();
        payload
            .write_u32(session.server_id as u32)
            .write_string(&session.session_id);
        let frame = build_packet(MANAGER_HANDSHAKE, &payload.into_bytes())?;
        write_half.write_all(&frame).await?;

        loop {
            let (opcode, payload) = match read_frame(&mut read_half).await {
                Ok(frame) => frame,
                Err(_) => return Err(UpstreamError::HandshakeEof),
            };
            match opcode {
                MANAGER_HANDSHAKE_ACCEPTED => break,
                MANAGER_HANDSHAKE_REJECTED => {
                    let reason = PacketReader::new(&payload).read_string();
                    return Err(UpstreamError::HandshakeRejected(reason));
                }
                PING => {
                    let pong = build_packet(PONG, &[])?;
                    write_half.write_all(&pong).await?;
                }
                other => {
                    debug!(opcode = format!("{other:#06x}"), "pre-handshake packet ignored");
                }
            }
        }
        info!(%peer, "💬 chat server handshake accepted");

        let chat = Arc::new(Self {
            writer: Mutex::new(write_half),
            connected: AtomicBool::new(true),
            peer,
        });
        tokio::spawn(chat.clone().read_loop(read_half, events, shutdown.resubscribe()));
        tokio::spawn(chat.clone().heartbeat_loop(heartbeat, shutdown));
        Ok(chat)
    }

    /// Whether the socket was alive as of the last read or write.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Sends a fleet status report.
    pub async fn send_server_info(&self, report: &ServerInfoReport) -> Result<(), UpstreamError> {
        let mut payload = PacketWriter::new();
        payload
            .write_u8(report.entries.len() as u8)
            .write_u8(report.ready)
            .write_u8(report.occupied)
            .write_u8(report.idle);
        for entry in &report.entries {
            payload
                .write_u32(entry.id)
                .write_u8(entry.status_code)
                .write_u16(entry.game_port);
        }
        self.send(MANAGER_SERVER_INFO, &payload.into_bytes()).await
    }

    /// Reports a replay upload status on behalf of the uploader.
    pub async fn send_replay_status(
        &self,
        match_id: u64,
        status: ReplayStatus,
    ) -> Result<(), UpstreamError> {
        let mut payload = PacketWriter::new();
        payload.write_u32(match_id as u32).write_u8(status as u8);
        self.send(MANAGER_REPLAY_STATUS, &payload.into_bytes()).await
    }

    async fn send_heartbeat(&self) -> Result<(), UpstreamError> {
        self.send(MANAGER_HEARTBEAT, &[]).await
    }

    async fn send_pong(&self) -> Result<(), UpstreamError> {
        self.send(PONG, &[]).await
    }

    async fn send(&self, opcode: u16, payload: &[u8]) -> Result<(), UpstreamError> {
        if !self.is_connected() {
            return Err(UpstreamError::NotConnected);
        }
        let frame = build_packet(opcode, payload)?;
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.write_all(&frame).await {
            self.connected.store(false, Ordering::Release);
            return Err(e.into());
        }
        Ok(())
    }

    /// Single reader for the session; frames are dispatched in arrival
    /// order.
    async fn read_loop(
        self: Arc<Self>,
        mut reader: OwnedReadHalf,
        events: mpsc::Sender<ChatEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let reason = loop {
            let frame = tokio::select! {
                frame = read_frame(&mut reader) => frame,
                _ = shutdown.recv() => {
                    debug!(peer = %self.peer, "chat read loop stopping on shutdown");
                    return;
                }
            };
            match frame {
                Ok((opcode, payload)) => {
                    if let Some(event) = self.dispatch(opcode, &payload).await {
                        if events.send(event).await.is_err() {
                            break "event consumer gone".to_string();
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    break "connection closed by chat server".to_string()
                }
                Err(e) => break format!("read error: {e}"),
            }
        };
        warn!(peer = %self.peer, %reason, "📵 chat server connection lost");
        self.connected.store(false, Ordering::Release);
        let _ = events.send(ChatEvent::Disconnected { reason }).await;
    }

    /// Decodes one inbound frame; returns the event to forward, if any.
    async fn dispatch(&self, opcode: u16, payload: &[u8]) -> Option<ChatEvent> {
        let mut reader = PacketReader::new(payload);
        match opcode {
            MANAGER_CREATE_MATCH => {
                let instance_id = reader.read_u32();
                let match_id = reader.read_u32() as u64;
                Some(ChatEvent::CreateMatch { instance_id, match_id })
            }
            MANAGER_END_MATCH => {
                let instance_id = reader.read_u32();
                let match_id = reader.read_u32() as u64;
                Some(ChatEvent::EndMatch { instance_id, match_id })
            }
            MANAGER_REMOTE_COMMAND => {
                let instance_id = reader.read_u32();
                let command = reader.read_string();
                Some(ChatEvent::RemoteCommand { instance_id, command })
            }
            MANAGER_OPTIONS => {
                let key = reader.read_string();
                let value = reader.read_string();
                Some(ChatEvent::Options { key, value })
            }
            PING => {
                if let Err(e) = self.send_pong().await {
                    debug!(error = %e, "pong failed");
                }
                None
            }
            PONG => None,
            other => {
                debug!(
                    opcode = format!("{other:#06x}"),
                    class = ?opcodes::classify(other),
                    "unhandled chat packet dropped"
                );
                None
            }
        }
    }

    /// Sends heartbeats until shutdown or the connection dies.
    async fn heartbeat_loop(self: Arc<Self>, period: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(period);
        // The first tick fires immediately; skip it, the handshake just went out.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.send_heartbeat().await {
                        debug!(error = %e, "heartbeat stopped");
                        return;
                    }
                }
                _ = shutdown.recv() => return,
            }
        }
    }
}

/// Reads one length-prefixed frame: 2-byte total length (opcode + payload),
/// then that many bytes.
async fn read_frame(reader: &mut OwnedReadHalf) -> io::Result<(u16, Vec<u8>)> {
    let mut len_bytes = [0u8; 2];
    reader.read_exact(&mut len_bytes).await?;
    let len = u16::from_le_bytes(len_bytes) as usize;
    if len < 2 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame shorter than its opcode",
        ));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    let opcode = u16::from_le_bytes([body[0], body[1]]);
    Ok((opcode, body[2..].to_vec()))
}
