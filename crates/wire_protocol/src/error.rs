use thiserror::Error;

/// Errors surfaced by the wire codec.
///
/// These only cover conditions the protocol treats as real faults. Lenient
/// cases (short strings, unknown event tags) are handled in-band by the
/// readers and never produce an error.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame too short: need {need} bytes, have {have}")]
    FrameTooShort { need: usize, have: usize },
    #[error("frame length field {declared} exceeds remaining buffer {remaining}")]
    FrameLengthMismatch { declared: usize, remaining: usize },
    #[error("packet payload of {0} bytes exceeds the u16 length field")]
    PayloadTooLarge(usize),
}
