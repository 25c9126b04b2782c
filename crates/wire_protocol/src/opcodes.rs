//! Opcode constants for the upstream session protocol.
//!
//! The two-byte opcode space is partitioned by direction:
//!
//! * `0x0C00-0x0CFF` / `0x1C00-0x1CFF` - client <-> chat server
//! * `0x0500-0x05FF` / `0x1500-0x15FF` - game server <-> chat server
//! * `0x1600-0x16FF` - server manager <-> chat server
//! * `0x2A00` / `0x2A01` - bidirectional ping/pong
//!
//! Only the server-manager range and the ping pair are spoken here; the
//! other ranges are listed so inbound traffic can be classified and logged.

/// Manager -> chat: handshake carrying server id + session cookie.
pub const MANAGER_HANDSHAKE: u16 = 0x1600;
/// Chat -> manager: handshake accepted.
pub const MANAGER_HANDSHAKE_ACCEPTED: u16 = 0x1601;
/// Chat -> manager: handshake rejected, payload is a reason string.
pub const MANAGER_HANDSHAKE_REJECTED: u16 = 0x1602;
/// Manager -> chat: periodic heartbeat.
pub const MANAGER_HEARTBEAT: u16 = 0x1603;

/// Chat -> manager: create a match on a managed instance.
pub const MANAGER_CREATE_MATCH: u16 = 0x1610;
/// Chat -> manager: a match hosted on a managed instance has ended.
pub const MANAGER_END_MATCH: u16 = 0x1611;
/// Chat -> manager: remote command to relay to an instance console.
pub const MANAGER_REMOTE_COMMAND: u16 = 0x1612;
/// Chat -> manager: option/key-value update.
pub const MANAGER_OPTIONS: u16 = 0x1613;

/// Manager -> chat: fleet status report.
pub const MANAGER_SERVER_INFO: u16 = 0x1620;
/// Manager -> chat: replay upload status for a match.
pub const MANAGER_REPLAY_STATUS: u16 = 0x1621;

/// Bidirectional keepalive.
pub const PING: u16 = 0x2A00;
pub const PONG: u16 = 0x2A01;

/// Inclusive opcode range bounds, used to classify traffic by direction.
pub const CLIENT_RANGE_LOW: (u16, u16) = (0x0C00, 0x0CFF);
pub const CLIENT_RANGE_HIGH: (u16, u16) = (0x1C00, 0x1CFF);
pub const GAME_SERVER_RANGE_LOW: (u16, u16) = (0x0500, 0x05FF);
pub const GAME_SERVER_RANGE_HIGH: (u16, u16) = (0x1500, 0x15FF);
pub const MANAGER_RANGE: (u16, u16) = (0x1600, 0x16FF);

/// Which protocol partition an opcode belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeClass {
    Client,
    GameServer,
    Manager,
    Ping,
    Unknown,
}

/// Classifies an opcode by its direction partition.
pub fn classify(opcode: u16) -> OpcodeClass {
    let within = |range: (u16, u16)| opcode >= range.0 && opcode <= range.1;
    if opcode == PING || opcode == PONG {
        OpcodeClass::Ping
    } else if within(MANAGER_RANGE) {
        OpcodeClass::Manager
    } else if within(CLIENT_RANGE_LOW) || within(CLIENT_RANGE_HIGH) {
        OpcodeClass::Client
    } else if within(GAME_SERVER_RANGE_LOW) || within(GAME_SERVER_RANGE_HIGH) {
        OpcodeClass::GameServer
    } else {
        OpcodeClass::Unknown
    }
}

/// Replay upload status codes reported to the chat server.
///
/// Reported as single bytes on behalf of the replay uploader collaborator;
/// the manager never computes these itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplayStatus {
    NotFound = 0,
    AlreadyUploaded = 1,
    InQueue = 2,
    Uploading = 3,
    HaveReplay = 4,
    UploadingNow = 5,
    UploadComplete = 6,
}

impl ReplayStatus {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::NotFound),
            1 => Some(Self::AlreadyUploaded),
            2 => Some(Self::InQueue),
            3 => Some(Self::Uploading),
            4 => Some(Self::HaveReplay),
            5 => Some(Self::UploadingNow),
            6 => Some(Self::UploadComplete),
            _ => None,
        }
    }
}
