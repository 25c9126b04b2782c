//! # Wire Protocol - Shared Binary Codec Foundation
//!
//! Framing and primitive (de)serialization shared by the two protocols the
//! manager speaks:
//!
//! * **Upstream session framing** - length-prefixed, opcode-tagged packets
//!   exchanged with the chat server ([`codec::build_packet`]).
//! * **Local control protocol** - single-byte commands written to a managed
//!   game-server process and tag-dispatched events read back from it
//!   ([`control`]).
//!
//! Everything on the wire is little-endian. Strings are null-terminated
//! UTF-8. The legacy peers on the other end of these sockets are not under
//! our control, so the readers here are deliberately lenient: a missing
//! string terminator yields the remaining bytes, an exhausted buffer yields
//! zero values, and an unrecognized control event tag is reported as
//! [`control::ControlEvent::Unknown`] rather than an error.

pub mod codec;
pub mod control;
pub mod opcodes;

mod error;

pub use codec::{build_packet, split_frame, PacketReader, PacketWriter};
pub use control::{ControlCommand, ControlEvent};
pub use error::WireError;
