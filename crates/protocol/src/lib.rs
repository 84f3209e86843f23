//! # realmd wire protocol
//!
//! - [`codecs`] - cursor reader and length-patching writer
//! - [`framing`] - checksummed client frames and the tokio-util codec
//! - [`packet_types`] - client/server opcodes and the family key
//! - [`position`] - position update message and its dialects
//! - [`packet_builder`] - server frame builders
//! - [`history`] - recent packet ring for diagnostics

pub mod codecs;
pub mod framing;
pub mod history;
pub mod packet_builder;
pub mod packet_types;
pub mod position;

pub use codecs::{PacketReader, PacketWriter, OUT_HEADER_SIZE};
pub use framing::{checksum, FrameCodec, RawPacket, HDR_SIZE};
pub use history::{Direction, PacketHistory};
pub use packet_types::{ChatType, ClientOpcode, LoginDenial, ServerOpcode, FAMILY_KEY};
pub use position::{MovementState, PositionExtras, PositionFrame, PositionUpdate};
