//! # Stream Framing
//!
//! Splits the TCP byte stream into checksummed client frames and writes
//! pre-built server frames back out.
//!
//! # Client Frame Format
//!
//! ```text
//! [len:u16][sequence:u16][session:u16][parameter:u16][pad:u8][opcode:u8]
//! [payload: len bytes]
//! [checksum:u16]
//! ```
//!
//! All header fields are big-endian. The checksum covers every byte of the
//! frame before it. A frame with a bad checksum means the stream is out of
//! sync, so the decoder returns an error and the connection is dropped.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use realmd_core::RealmError;
use tokio_util::codec::{Decoder, Encoder};

use crate::codecs::PacketReader;

/// Header bytes before the payload
pub const HEADER_SIZE: usize = 10;
/// Trailing checksum bytes
pub const CHECKSUM_SIZE: usize = 2;
/// Framing overhead of a client frame
pub const HDR_SIZE: usize = HEADER_SIZE + CHECKSUM_SIZE;

/// Default upper bound for a whole client frame
pub const DEFAULT_MAX_FRAME: usize = 2048;

/// One decoded client frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    /// Wire opcode (already XORed with the family key)
    pub opcode: u8,
    pub sequence: u16,
    pub session: u16,
    pub parameter: u16,
    pub payload: Bytes,
}

impl RawPacket {
    pub fn new(opcode: u8, sequence: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            sequence,
            session: 0,
            parameter: 0,
            payload: payload.into(),
        }
    }

    /// Fresh cursor over the payload
    pub fn reader(&self) -> PacketReader {
        PacketReader::new(self.payload.clone())
    }

    /// Size of the frame on the wire
    pub fn wire_size(&self) -> usize {
        self.payload.len() + HDR_SIZE
    }

    /// Serialize as a client would, checksum included
    pub fn to_frame(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        buf.put_u16(self.payload.len() as u16);
        buf.put_u16(self.sequence);
        buf.put_u16(self.session);
        buf.put_u16(self.parameter);
        buf.put_u8(0);
        buf.put_u8(self.opcode);
        buf.put_slice(&self.payload);
        let sum = checksum(&buf);
        buf.put_u16(sum);
        buf.freeze()
    }
}

/// Rolling checksum of the client framing
pub fn checksum(data: &[u8]) -> u16 {
    let mut val1: u8 = 0x7E;
    let mut val2: u8 = 0x7E;
    for &b in data {
        val1 = val1.wrapping_add(b);
        val2 = val2.wrapping_add(val1);
    }
    (val2 as i32 - ((val1 as i32 + val2 as i32) << 8)) as u16
}

/// tokio-util codec for the session socket
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame: usize,
}

impl FrameCodec {
    pub fn new(max_frame: usize) -> Self {
        Self { max_frame }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}

impl Decoder for FrameCodec {
    type Item = RawPacket;
    type Error = RealmError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RawPacket>, RealmError> {
        if src.len() < HDR_SIZE {
            return Ok(None);
        }

        let payload_len = u16::from_be_bytes([src[0], src[1]]) as usize;
        let total = payload_len + HDR_SIZE;
        if total > self.max_frame {
            return Err(RealmError::Protocol(format!(
                "frame of {} bytes exceeds limit {}",
                total, self.max_frame
            )));
        }

        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(total);
        let expected = checksum(&frame[..total - CHECKSUM_SIZE]);
        let received = u16::from_be_bytes([frame[total - 2], frame[total - 1]]);
        if expected != received {
            return Err(RealmError::Protocol(format!(
                "bad checksum (packet:0x{:04X} calculated:0x{:04X})",
                received, expected
            )));
        }

        frame.advance(2);
        let sequence = frame.get_u16();
        let session = frame.get_u16();
        let parameter = frame.get_u16();
        frame.advance(1);
        let opcode = frame.get_u8();
        frame.truncate(payload_len);

        Ok(Some(RawPacket {
            opcode,
            sequence,
            session,
            parameter,
            payload: frame.freeze(),
        }))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = RealmError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), RealmError> {
        if item.len() > self.max_frame {
            return Err(RealmError::Protocol(format!(
                "outbound frame of {} bytes exceeds limit {}",
                item.len(),
                self.max_frame
            )));
        }
        dst.extend_from_slice(&item);
        Ok(())
    }
}
