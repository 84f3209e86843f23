//! Cursor-based field codecs for the binary wire format
//!
//! Fields are offset-addressed and mostly big-endian; a few legacy fields are
//! little-endian, hence the `_le` variants.
//!
//! # Truncation
//!
//! [`PacketReader`] never fails on a short buffer. Reading past the end yields
//! zero bytes for the missing part and latches [`PacketReader::is_truncated`],
//! so a handler can decode a whole message and check once at the end. The
//! dispatcher turns a truncated read into a `ProtocolError`.

use bytes::{BufMut, Bytes, BytesMut};

use crate::packet_types::ServerOpcode;

/// Sequential reader over an inbound payload
#[derive(Debug, Clone)]
pub struct PacketReader {
    data: Bytes,
    pos: usize,
    truncated: bool,
}

impl PacketReader {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            pos: 0,
            truncated: false,
        }
    }

    /// Bytes left after the cursor
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Whether any read ran past the end of the payload
    #[inline]
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// The complete payload, independent of the cursor
    pub fn payload(&self) -> &[u8] {
        &self.data
    }

    pub fn skip(&mut self, count: usize) {
        if count > self.remaining() {
            self.truncated = true;
        }
        self.pos = (self.pos + count).min(self.data.len());
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        let available = self.remaining().min(N);
        out[..available].copy_from_slice(&self.data[self.pos..self.pos + available]);
        if available < N {
            self.truncated = true;
        }
        self.pos += available;
        out
    }

    pub fn read_u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    pub fn read_u16(&mut self) -> u16 {
        u16::from_be_bytes(self.take())
    }

    pub fn read_u16_le(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    pub fn read_u32(&mut self) -> u32 {
        u32::from_be_bytes(self.take())
    }

    pub fn read_u32_le(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    /// Read `len` raw bytes (zero-filled past the end)
    pub fn read_bytes(&mut self, len: usize) -> Vec<u8> {
        let available = self.remaining().min(len);
        let mut out = self.data[self.pos..self.pos + available].to_vec();
        if available < len {
            self.truncated = true;
            out.resize(len, 0);
        }
        self.pos += available;
        out
    }

    /// Read a string prefixed by a one-byte length
    pub fn read_pascal_string(&mut self) -> String {
        let len = self.read_u8() as usize;
        let raw = self.read_bytes(len);
        String::from_utf8_lossy(&raw).into_owned()
    }

    /// Read a fixed-width field holding a zero-terminated string
    pub fn read_fixed_string(&mut self, width: usize) -> String {
        let raw = self.read_bytes(width);
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }
}

/// Sequential writer for outbound server frames.
///
/// # Format
/// ```text
/// [len:u16 BE][opcode:u8][payload...]
/// ```
/// `len` counts the payload only and is patched by [`PacketWriter::finish`].
#[derive(Debug)]
pub struct PacketWriter {
    buf: BytesMut,
}

/// Header bytes of an outbound frame (length + opcode)
pub const OUT_HEADER_SIZE: usize = 3;

impl PacketWriter {
    pub fn new(opcode: ServerOpcode) -> Self {
        Self::with_capacity(opcode, 64)
    }

    pub fn with_capacity(opcode: ServerOpcode, capacity: usize) -> Self {
        let mut buf = BytesMut::with_capacity(OUT_HEADER_SIZE + capacity);
        buf.put_u16(0);
        buf.put_u8(opcode.as_u8());
        Self { buf }
    }

    pub fn write_u8(&mut self, val: u8) -> &mut Self {
        self.buf.put_u8(val);
        self
    }

    pub fn write_u16(&mut self, val: u16) -> &mut Self {
        self.buf.put_u16(val);
        self
    }

    pub fn write_u16_le(&mut self, val: u16) -> &mut Self {
        self.buf.put_u16_le(val);
        self
    }

    pub fn write_u32(&mut self, val: u32) -> &mut Self {
        self.buf.put_u32(val);
        self
    }

    pub fn write_u32_le(&mut self, val: u32) -> &mut Self {
        self.buf.put_u32_le(val);
        self
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buf.put_slice(data);
        self
    }

    /// Length-prefixed string, cut at 255 bytes
    pub fn write_pascal_string(&mut self, text: &str) -> &mut Self {
        let raw = text.as_bytes();
        let len = raw.len().min(u8::MAX as usize);
        self.buf.put_u8(len as u8);
        self.buf.put_slice(&raw[..len]);
        self
    }

    /// Zero-terminated string
    pub fn write_cstring(&mut self, text: &str) -> &mut Self {
        self.buf.put_slice(text.as_bytes());
        self.buf.put_u8(0);
        self
    }

    /// Fixed-width field, zero padded; the text is cut so a terminator always fits
    pub fn fill_string(&mut self, text: &str, width: usize) -> &mut Self {
        let raw = text.as_bytes();
        let len = raw.len().min(width.saturating_sub(1));
        self.buf.put_slice(&raw[..len]);
        self.buf.put_bytes(0, width - len);
        self
    }

    /// Current frame size including the header
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.len() == OUT_HEADER_SIZE
    }

    /// Patch the length field and hand out the finished frame
    pub fn finish(mut self) -> Bytes {
        let payload_len = (self.buf.len() - OUT_HEADER_SIZE).min(u16::MAX as usize) as u16;
        self.buf[..2].copy_from_slice(&payload_len.to_be_bytes());
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_mixed_endian() {
        let mut reader = PacketReader::new(Bytes::from_static(&[
            0x12, 0x34, 0x34, 0x12, 0xDE, 0xAD, 0xBE, 0xEF, 0x07,
        ]));
        assert_eq!(reader.read_u16(), 0x1234);
        assert_eq!(reader.read_u16_le(), 0x1234);
        assert_eq!(reader.read_u32(), 0xDEADBEEF);
        assert_eq!(reader.read_u8(), 7);
        assert_eq!(reader.remaining(), 0);
        assert!(!reader.is_truncated());
    }

    #[test]
    fn test_reader_truncates_without_panicking() {
        let mut reader = PacketReader::new(Bytes::from_static(&[0xAB]));
        assert_eq!(reader.read_u16(), 0xAB00);
        assert!(reader.is_truncated());
        assert_eq!(reader.read_u32(), 0);
        assert_eq!(reader.read_pascal_string(), "");
        reader.skip(10);
        assert_eq!(reader.position(), 1);
    }

    #[test]
    fn test_reader_strings() {
        let mut reader = PacketReader::new(Bytes::from_static(b"\x05alicebob\0\0\0\0"));
        assert_eq!(reader.read_pascal_string(), "alice");
        assert_eq!(reader.read_fixed_string(7), "bob");
        assert!(!reader.is_truncated());
    }

    #[test]
    fn test_writer_patches_length() {
        let mut writer = PacketWriter::new(ServerOpcode::PingReply);
        writer.write_u32(0x01020304).write_u16(9);
        let frame = writer.finish();
        assert_eq!(&frame[..3], &[0x00, 0x06, ServerOpcode::PingReply.as_u8()]);
        assert_eq!(frame.len(), 9);
    }

    #[test]
    fn test_fill_string_pads_and_cuts() {
        let mut writer = PacketWriter::new(ServerOpcode::Message);
        writer.fill_string("Wizard", 8).fill_string("abcdefgh", 4);
        let frame = writer.finish();
        assert_eq!(&frame[3..11], b"Wizard\0\0");
        assert_eq!(&frame[11..], b"abc\0");
    }
}
