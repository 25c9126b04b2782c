//! Per-instance control channel.
//!
//! Each live instance exposes a loopback TCP "manager port". Commands are
//! written to it raw (single command byte, optionally followed by a
//! null-terminated string); events come back as 2-byte little-endian
//! length-prefixed frames whose payload starts with a single-byte tag.
//!
//! There is exactly one reader per channel, so events for an instance are
//! processed in arrival order.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, trace};
use wire_protocol::{ControlCommand, ControlEvent};

/// Interval between connection attempts while the child is still booting.
const CONNECT_RETRY: Duration = Duration::from_millis(500);

/// Write half of a control channel, shared by whoever needs to command the
/// instance.
#[derive(Debug)]
pub struct ControlChannel {
    peer: SocketAddr,
    writer: Mutex<OwnedWriteHalf>,
}

impl ControlChannel {
    /// Connects to an instance's manager port, retrying until `window`
    /// elapses - a freshly spawned child takes a moment to start listening.
    pub async fn connect(
        port: u16,
        window: Duration,
    ) -> io::Result<(ControlChannel, ControlEventStream)> {
        let peer: SocketAddr = ([127, 0, 0, 1], port).into();
        let deadline = Instant::now() + window;
        let stream = loop {
            match TcpStream::connect(peer).await {
                Ok(stream) => break stream,
                Err(e) if Instant::now() + CONNECT_RETRY < deadline => {
                    trace!(%peer, error = %e, "control port not accepting yet, retrying");
                    sleep(CONNECT_RETRY).await;
                }
                Err(e) => return Err(e),
            }
        };
        stream.set_nodelay(true).ok();
        let (read_half, write_half) = stream.into_split();
        debug!(%peer, "control channel established");
        Ok((
            ControlChannel {
                peer,
                writer: Mutex::new(write_half),
            },
            ControlEventStream { reader: read_half },
        ))
    }

    /// Sends one command to the instance.
    pub async fn send(&self, command: &ControlCommand) -> io::Result<()> {
        let bytes = command.encode();
        let mut writer = self.writer.lock().await;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        trace!(peer = %self.peer, ?command, "control command sent");
        Ok(())
    }
}

/// Read half of a control channel; owned by the single per-instance reader
/// task.
#[derive(Debug)]
pub struct ControlEventStream {
    reader: OwnedReadHalf,
}

impl ControlEventStream {
    /// Reads the next decodable event.
    ///
    /// Empty frames and frames carrying only noise are skipped in place so
    /// callers only ever see real events. `None` means the channel is gone
    /// (EOF or I/O error) - the caller decides whether that is a crash or a
    /// requested stop.
    pub async fn next(&mut self) -> Option<ControlEvent> {
        loop {
            let payload = self.read_frame().await.ok()?;
            match ControlEvent::decode(&payload) {
                Some(event) => return Some(event),
                None => continue,
            }
        }
    }

    /// Like [`Self::next`] but gives up after `limit`.
    pub async fn next_timeout(&mut self, limit: Duration) -> Option<ControlEvent> {
        timeout(limit, self.next()).await.ok().flatten()
    }

    async fn read_frame(&mut self) -> io::Result<Vec<u8>> {
        let mut len_bytes = [0u8; 2];
        self.reader.read_exact(&mut len_bytes).await?;
        let len = u16::from_le_bytes(len_bytes) as usize;
        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload).await?;
        Ok(payload)
    }
}
