//! Local control protocol spoken to a managed game-server process.
//!
//! Commands sent *to* the process are a single raw byte with no framing;
//! `Message` and `RemoteCommand` append a null-terminated string after the
//! command byte. Events read *back* arrive as length-prefixed frames whose
//! first payload byte is a single-byte tag.
//!
//! The game-server binary is not under this system's control and newer
//! builds emit tags this module has never heard of. Unknown tags therefore
//! decode to [`ControlEvent::Unknown`] and empty payloads decode to `None`,
//! both by contract rather than as error cases.

use crate::codec::PacketReader;

/// Command byte values accepted by the game-server process.
pub const CMD_SLEEP: u8 = 0x20;
pub const CMD_WAKE: u8 = 0x21;
pub const CMD_SHUTDOWN: u8 = 0x22;
pub const CMD_RESTART: u8 = 0x23;
pub const CMD_MESSAGE: u8 = 0x24;
pub const CMD_COMMAND: u8 = 0x25;

/// Event tag values emitted by the game-server process.
pub const EVT_ANNOUNCE: u8 = 0x40;
pub const EVT_CLOSED: u8 = 0x41;
pub const EVT_STATUS: u8 = 0x42;
pub const EVT_LONG_FRAME: u8 = 0x43;
pub const EVT_LOBBY_CREATED: u8 = 0x44;
pub const EVT_LOBBY_CLOSED: u8 = 0x45;

/// A command written to a managed process over its control socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Sleep,
    Wake,
    Shutdown,
    Restart,
    /// Broadcast a chat message to players on the instance.
    Message(String),
    /// Run a console command on the instance.
    RemoteCommand(String),
}

impl ControlCommand {
    /// Encodes the command for the wire: one command byte, plus a
    /// null-terminated string for the two string-carrying variants.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ControlCommand::Sleep => vec![CMD_SLEEP],
            ControlCommand::Wake => vec![CMD_WAKE],
            ControlCommand::Shutdown => vec![CMD_SHUTDOWN],
            ControlCommand::Restart => vec![CMD_RESTART],
            ControlCommand::Message(text) => Self::with_string(CMD_MESSAGE, text),
            ControlCommand::RemoteCommand(cmd) => Self::with_string(CMD_COMMAND, cmd),
        }
    }

    fn with_string(cmd: u8, s: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(s.len() + 2);
        out.push(cmd);
        out.extend_from_slice(s.as_bytes());
        out.push(0);
        out
    }
}

/// An event reported by a managed process over its control socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// The server finished starting and is listening on the given game port.
    Announce { port: u32 },
    /// The server process is shutting down.
    Closed,
    /// Periodic status report; the blob layout is owned by the game server
    /// and treated as opaque here.
    Status(Vec<u8>),
    /// A single game frame took the given number of milliseconds.
    LongFrame { milliseconds: u16 },
    /// A lobby was created on the instance.
    LobbyCreated,
    /// The instance's lobby was closed.
    LobbyClosed,
    /// Tag this build has never heard of; logged and dropped upstream.
    Unknown(u8),
}

impl ControlEvent {
    /// Decodes one event from a control-channel frame payload.
    ///
    /// Returns `None` for an empty payload, which the protocol documents as
    /// a no-op rather than an error.
    pub fn decode(payload: &[u8]) -> Option<Self> {
        let mut reader = PacketReader::new(payload);
        if payload.is_empty() {
            return None;
        }
        let tag = reader.read_u8();
        let event = match tag {
            EVT_ANNOUNCE => ControlEvent::Announce {
                port: reader.read_u32(),
            },
            EVT_CLOSED => ControlEvent::Closed,
            EVT_STATUS => ControlEvent::Status(reader.read_rest().to_vec()),
            EVT_LONG_FRAME => ControlEvent::LongFrame {
                milliseconds: reader.read_u16(),
            },
            EVT_LOBBY_CREATED => ControlEvent::LobbyCreated,
            EVT_LOBBY_CLOSED => ControlEvent::LobbyClosed,
            other => ControlEvent::Unknown(other),
        };
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_byte_commands_encode_bare() {
        assert_eq!(ControlCommand::Sleep.encode(), vec![0x20]);
        assert_eq!(ControlCommand::Wake.encode(), vec![0x21]);
        assert_eq!(ControlCommand::Shutdown.encode(), vec![0x22]);
        assert_eq!(ControlCommand::Restart.encode(), vec![0x23]);
    }

    #[test]
    fn string_commands_append_terminated_text() {
        assert_eq!(
            ControlCommand::Message("hi".into()).encode(),
            vec![0x24, b'h', b'i', 0]
        );
        assert_eq!(
            ControlCommand::RemoteCommand("restart".into()).encode(),
            vec![0x25, b'r', b'e', b's', b't', b'a', b'r', b't', 0]
        );
    }

    #[test]
    fn announce_carries_le_port() {
        let payload = [0x40, 0x39, 0x30, 0x00, 0x00]; // port 12345
        assert_eq!(
            ControlEvent::decode(&payload),
            Some(ControlEvent::Announce { port: 12345 })
        );
    }

    #[test]
    fn long_frame_carries_le_milliseconds() {
        let payload = [0x43, 0xF4, 0x01]; // 500ms
        assert_eq!(
            ControlEvent::decode(&payload),
            Some(ControlEvent::LongFrame { milliseconds: 500 })
        );
    }

    #[test]
    fn bare_tags_decode() {
        assert_eq!(ControlEvent::decode(&[0x41]), Some(ControlEvent::Closed));
        assert_eq!(
            ControlEvent::decode(&[0x44]),
            Some(ControlEvent::LobbyCreated)
        );
        assert_eq!(
            ControlEvent::decode(&[0x45]),
            Some(ControlEvent::LobbyClosed)
        );
    }

    #[test]
    fn status_blob_is_opaque() {
        let payload = [0x42, 1, 2, 3];
        assert_eq!(
            ControlEvent::decode(&payload),
            Some(ControlEvent::Status(vec![1, 2, 3]))
        );
    }

    #[test]
    fn unknown_tag_is_tolerated() {
        assert_eq!(
            ControlEvent::decode(&[0x99, 1, 2]),
            Some(ControlEvent::Unknown(0x99))
        );
    }

    #[test]
    fn empty_payload_is_a_no_op() {
        assert_eq!(ControlEvent::decode(&[]), None);
    }

    #[test]
    fn truncated_announce_still_decodes() {
        // A short announce pads the port with zeroes instead of failing.
        assert_eq!(
            ControlEvent::decode(&[0x40, 0x10]),
            Some(ControlEvent::Announce { port: 0x10 })
        );
    }
}
