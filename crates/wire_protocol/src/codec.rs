//! Primitive readers/writers and upstream packet framing.
//!
//! [`PacketReader`] and [`PacketWriter`] advance an explicit cursor over a
//! byte buffer. Readers never panic on well-formed or truncated input:
//! reading past the end of the buffer yields zero values and a
//! null-terminated string without its terminator yields the remaining bytes.
//! That tolerance is part of the protocol contract, not an accident.

use crate::WireError;

/// Cursor-based reader over a received byte buffer.
///
/// All multi-byte integers are little-endian.
#[derive(Debug)]
pub struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// Current cursor position.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn read_u8(&mut self) -> u8 {
        let v = self.buf.get(self.pos).copied().unwrap_or(0);
        self.pos = (self.pos + 1).min(self.buf.len());
        v
    }

    pub fn read_u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take_array())
    }

    pub fn read_i16(&mut self) -> i16 {
        i16::from_le_bytes(self.take_array())
    }

    pub fn read_u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take_array())
    }

    pub fn read_i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take_array())
    }

    /// Reads a null-terminated UTF-8 string.
    ///
    /// If no terminator is found before the end of the buffer, the remaining
    /// bytes are returned as the string with no error. Invalid UTF-8 is
    /// replaced rather than rejected.
    pub fn read_string(&mut self) -> String {
        let rest = &self.buf[self.pos.min(self.buf.len())..];
        match rest.iter().position(|&b| b == 0) {
            Some(nul) => {
                let s = String::from_utf8_lossy(&rest[..nul]).into_owned();
                self.pos += nul + 1;
                s
            }
            None => {
                let s = String::from_utf8_lossy(rest).into_owned();
                self.pos = self.buf.len();
                s
            }
        }
    }

    /// Returns the unconsumed tail of the buffer and exhausts the cursor.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos.min(self.buf.len())..];
        self.pos = self.buf.len();
        rest
    }

    // Short reads are padded with zero bytes, matching the "empty buffer
    // reads as zero" contract.
    fn take_array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        let avail = self.remaining().min(N);
        out[..avail].copy_from_slice(&self.buf[self.pos..self.pos + avail]);
        self.pos += avail;
        out
    }
}

/// Cursor-based writer producing a little-endian byte buffer.
#[derive(Debug, Default)]
pub struct PacketWriter {
    buf: Vec<u8>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn write_u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn write_i16(&mut self, v: i16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn write_i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Writes the string bytes followed by the null terminator.
    pub fn write_string(&mut self, s: &str) -> &mut Self {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Builds an upstream-session frame: 2-byte total length (opcode + payload),
/// 2-byte opcode, payload.
///
/// The length field therefore always equals `payload.len() + 2`.
pub fn build_packet(opcode: u16, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    let total = payload.len() + 2;
    if total > u16::MAX as usize {
        return Err(WireError::PayloadTooLarge(payload.len()));
    }
    let mut out = Vec::with_capacity(total + 2);
    out.extend_from_slice(&(total as u16).to_le_bytes());
    out.extend_from_slice(&opcode.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Splits one upstream-session frame off the front of `buf`.
///
/// Returns the decoded `(opcode, payload)` pair. Unlike the primitive
/// readers this is strict: the chat server is length-prefix framed and a
/// short or inconsistent frame means the stream is desynchronized.
pub fn split_frame(buf: &[u8]) -> Result<(u16, &[u8]), WireError> {
    if buf.len() < 4 {
        return Err(WireError::FrameTooShort {
            need: 4,
            have: buf.len(),
        });
    }
    let declared = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    if declared < 2 || declared > buf.len() - 2 {
        return Err(WireError::FrameLengthMismatch {
            declared,
            remaining: buf.len() - 2,
        });
    }
    let opcode = u16::from_le_bytes([buf[2], buf[3]]);
    Ok((opcode, &buf[4..2 + declared]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_round_trip() {
        let mut w = PacketWriter::new();
        w.write_u8(0xAB)
            .write_u16(0xBEEF)
            .write_i16(-12345)
            .write_u32(0xDEAD_BEEF)
            .write_i32(-7_654_321)
            .write_string("kongor");
        let bytes = w.into_bytes();

        let mut r = PacketReader::new(&bytes);
        assert_eq!(r.read_u8(), 0xAB);
        assert_eq!(r.read_u16(), 0xBEEF);
        assert_eq!(r.read_i16(), -12345);
        assert_eq!(r.read_u32(), 0xDEAD_BEEF);
        assert_eq!(r.read_i32(), -7_654_321);
        assert_eq!(r.read_string(), "kongor");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn string_without_terminator_reads_remaining_bytes() {
        let mut r = PacketReader::new(b"no terminator here");
        assert_eq!(r.read_string(), "no terminator here");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn exhausted_reader_yields_zero_values() {
        let mut r = PacketReader::new(&[]);
        assert_eq!(r.read_u8(), 0);
        assert_eq!(r.read_u16(), 0);
        assert_eq!(r.read_i32(), 0);
        assert_eq!(r.read_string(), "");
    }

    #[test]
    fn short_integer_read_pads_with_zeroes() {
        // One byte left but four requested: the low byte is preserved.
        let mut r = PacketReader::new(&[0x7F]);
        assert_eq!(r.read_u32(), 0x7F);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn build_packet_length_field_is_payload_plus_two() {
        let pkt = build_packet(0x1600, b"abc").unwrap();
        assert_eq!(u16::from_le_bytes([pkt[0], pkt[1]]), 5);
        assert_eq!(u16::from_le_bytes([pkt[2], pkt[3]]), 0x1600);
        assert_eq!(&pkt[4..], b"abc");
    }

    #[test]
    fn build_then_split_round_trips() {
        let pkt = build_packet(0x2A00, &[1, 2, 3, 4]).unwrap();
        let (opcode, payload) = split_frame(&pkt).unwrap();
        assert_eq!(opcode, 0x2A00);
        assert_eq!(payload, &[1, 2, 3, 4]);
    }

    #[test]
    fn empty_payload_packet() {
        let pkt = build_packet(0x1603, &[]).unwrap();
        assert_eq!(u16::from_le_bytes([pkt[0], pkt[1]]), 2);
        let (opcode, payload) = split_frame(&pkt).unwrap();
        assert_eq!(opcode, 0x1603);
        assert!(payload.is_empty());
    }

    #[test]
    fn split_frame_rejects_truncated_input() {
        assert!(matches!(
            split_frame(&[5, 0, 0]),
            Err(WireError::FrameTooShort { .. })
        ));
        // Declares 10 bytes of opcode+payload but only 2 follow the length.
        assert!(matches!(
            split_frame(&[10, 0, 0x00, 0x16]),
            Err(WireError::FrameLengthMismatch { .. })
        ));
    }
}
