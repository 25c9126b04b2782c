//! # Upstream Session - Master & Chat Server Connectivity
//!
//! Two independent sessions with the legacy upstream infrastructure:
//!
//! * **Master server** - a one-shot HTTP(S) authentication exchange whose
//!   response body is a legacy PHP-serialized key/value map, parsed
//!   field-by-field ([`master`]).
//! * **Chat server** - a persistent framed TCP session used to register the
//!   fleet, heartbeat, receive match lifecycle and remote-command messages,
//!   and report fleet status and replay upload progress ([`chat`]).
//!
//! Neither session owns fleet state. Inbound chat messages are handed to
//! the fleet manager over a channel; connection loss is surfaced
//! immediately, and matches in flight are left for the remote side to
//! resolve.

pub mod chat;
pub mod master;

mod error;

pub use chat::{ChatEvent, ChatSession, ServerInfoEntry, ServerInfoReport};
pub use error::UpstreamError;
pub use master::{MasterConfig, UpstreamSession};
