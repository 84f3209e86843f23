//! # Position Update Message
//!
//! The most frequent message on the wire. Clients send it several times per
//! second while moving; the server rebroadcasts a patched copy to everyone in
//! visibility range.
//!
//! # Layout
//!
//! ```text
//! offset  size  field
//!  0      2     session id (ignored on input)
//!  2      2     speed (0x1FF) | reverse (0x200) | state (bits 10..13) | strafe (0xE000)
//!  4      2     z
//!  6      2     x offset inside the zone
//!  8      2     y offset inside the zone
//! 10      2     168: zone id byte + pad    172: zone id u16
//! 12      2     heading (0xFFF) + flags
//! 14      2     fall speed (0xFFF), bit 15 = landed
//! 16      1     status flags
//! 17      1     health percent (bit 0x80 belongs to the client)
//! ```
//!
//! 1.90+ clients may send a 54-byte frame whose last byte is forwarded
//! verbatim to other 1.90+ clients.

use bytes::Bytes;
use realmd_core::Dialect;
use serde::{Deserialize, Serialize};

use crate::codecs::{PacketReader, PacketWriter};
use crate::packet_types::ServerOpcode;

/// Bytes of the position block shared by every dialect
pub const POSITION_FRAME_LEN: usize = 18;
/// Length of the extended frame sent by 1.90+ clients
pub const EXTENDED_FRAME_LEN: usize = 54;

pub const SPEED_MASK: u16 = 0x01FF;
pub const SPEED_REVERSE: u16 = 0x0200;
pub const STRAFE_MASK: u16 = 0xE000;
pub const HEADING_MASK: u16 = 0x0FFF;
pub const FALL_SPEED_MASK: u16 = 0x0FFF;
pub const FALL_LANDED: u16 = 0x8000;

pub const STATUS_WIREFRAME: u8 = 0x01;
pub const STATUS_STEALTH: u8 = 0x02;
/// Inbound meaning of 0x02: the client is under water
pub const STATUS_UNDERWATER: u8 = 0x02;
pub const STATUS_DIVING: u8 = 0x04;
pub const STATUS_GROUND_TARGET_IN_VIEW: u8 = 0x08;
pub const STATUS_TARGET_IN_VIEW: u8 = 0x10;

/// Movement mode packed into bits 10..13 of the speed word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementState {
    Ground,
    Swimming,
    Flying,
    Climbing,
    Other(u8),
}

impl MovementState {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 7 {
            0 => Self::Ground,
            1 => Self::Swimming,
            3 => Self::Flying,
            7 => Self::Climbing,
            other => Self::Other(other),
        }
    }
}

/// Decoded position update, identical for both inbound dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub session: u16,
    pub speed_data: u16,
    pub z: u16,
    pub x_offset: u16,
    pub y_offset: u16,
    pub zone: u16,
    pub heading_data: u16,
    pub fall_data: u16,
    pub status: u8,
    pub health: u8,
}

impl PositionUpdate {
    /// Decode from the cursor; a short payload latches `reader.is_truncated()`
    pub fn decode(reader: &mut PacketReader, dialect: Dialect) -> Self {
        let session = reader.read_u16();
        let speed_data = reader.read_u16();
        let z = reader.read_u16();
        let x_offset = reader.read_u16();
        let y_offset = reader.read_u16();
        let zone = match dialect.inbound() {
            Dialect::V168 => {
                let zone = reader.read_u8() as u16;
                reader.skip(1);
                zone
            }
            _ => reader.read_u16(),
        };
        let heading_data = reader.read_u16();
        let fall_data = reader.read_u16();
        let status = reader.read_u8();
        let health = reader.read_u8();

        Self {
            session,
            speed_data,
            z,
            x_offset,
            y_offset,
            zone,
            heading_data,
            fall_data,
            status,
            health,
        }
    }

    /// Encode into the fixed 18-byte block of `dialect`
    pub fn encode(&self, dialect: Dialect) -> [u8; POSITION_FRAME_LEN] {
        let mut out = [0u8; POSITION_FRAME_LEN];
        out[0..2].copy_from_slice(&self.session.to_be_bytes());
        out[2..4].copy_from_slice(&self.speed_data.to_be_bytes());
        out[4..6].copy_from_slice(&self.z.to_be_bytes());
        out[6..8].copy_from_slice(&self.x_offset.to_be_bytes());
        out[8..10].copy_from_slice(&self.y_offset.to_be_bytes());
        match dialect.inbound() {
            Dialect::V168 => {
                out[10] = self.zone as u8;
                out[11] = 0;
            }
            _ => out[10..12].copy_from_slice(&self.zone.to_be_bytes()),
        }
        out[12..14].copy_from_slice(&self.heading_data.to_be_bytes());
        out[14..16].copy_from_slice(&self.fall_data.to_be_bytes());
        out[16] = self.status;
        out[17] = self.health;
        out
    }

    /// Signed speed; bit 0x200 marks backwards movement
    pub fn speed(&self) -> i16 {
        let speed = (self.speed_data & SPEED_MASK) as i16;
        if self.speed_data & SPEED_REVERSE != 0 {
            -speed
        } else {
            speed
        }
    }

    pub fn is_strafing(&self) -> bool {
        self.speed_data & STRAFE_MASK != 0
    }

    pub fn movement_state(&self) -> MovementState {
        MovementState::from_bits(((self.speed_data >> 10) & 7) as u8)
    }

    pub fn heading(&self) -> u16 {
        self.heading_data & HEADING_MASK
    }

    /// Set on the first update after touching the ground
    pub fn has_landed(&self) -> bool {
        self.fall_data & FALL_LANDED != 0
    }

    pub fn fall_speed(&self) -> u16 {
        self.fall_data & FALL_SPEED_MASK
    }

    pub fn target_in_view(&self) -> bool {
        self.status & STATUS_TARGET_IN_VIEW != 0
    }

    pub fn ground_target_in_view(&self) -> bool {
        self.status & STATUS_GROUND_TARGET_IN_VIEW != 0
    }

    pub fn is_underwater(&self) -> bool {
        self.status & STATUS_UNDERWATER != 0
    }
}

/// Extra fields appended for 1.90+ observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionExtras {
    pub mana_percent: u8,
    pub endurance_percent: u8,
    pub class_name: String,
    pub roleplay: bool,
}

/// Byte copy of an inbound position block, patched in place for rebroadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionFrame {
    bytes: [u8; POSITION_FRAME_LEN],
    source: Dialect,
    trailer: u8,
}

impl PositionFrame {
    /// Copy the first 18 bytes of an inbound payload
    pub fn from_payload(payload: &[u8], source: Dialect) -> Self {
        let mut bytes = [0u8; POSITION_FRAME_LEN];
        let len = payload.len().min(POSITION_FRAME_LEN);
        bytes[..len].copy_from_slice(&payload[..len]);
        let trailer = if payload.len() == EXTENDED_FRAME_LEN {
            payload[EXTENDED_FRAME_LEN - 1]
        } else {
            0
        };
        Self {
            bytes,
            source: source.inbound(),
            trailer,
        }
    }

    pub fn as_bytes(&self) -> &[u8; POSITION_FRAME_LEN] {
        &self.bytes
    }

    /// Mounted: the heading field carries the steed id
    pub fn patch_ride(&mut self, steed_object_id: u16, rider_slot: u8) {
        self.bytes[2] = 0x18;
        self.bytes[3] = 0;
        self.bytes[12..14].copy_from_slice(&steed_object_id.to_be_bytes());
        self.bytes[14] = 0;
        self.bytes[15] = rider_slot;
    }

    pub fn patch_dead(&mut self) {
        self.bytes[2] &= 0xE3;
        self.bytes[2] |= 0x14;
    }

    /// Rewrite the status byte; returns whether the actor is diving
    pub fn patch_status(&mut self, wireframe: bool, stealth: bool) -> bool {
        self.bytes[16] &= !STATUS_DIVING;
        let diving = self.bytes[16] & STATUS_UNDERWATER != 0;
        if diving {
            self.bytes[16] |= STATUS_DIVING;
        }
        self.bytes[16] &= !(STATUS_WIREFRAME | STATUS_STEALTH);
        if wireframe {
            self.bytes[16] |= STATUS_WIREFRAME;
        }
        if stealth {
            self.bytes[16] |= STATUS_STEALTH;
        }
        diving
    }

    pub fn patch_health(&mut self, health_percent: u8) {
        self.bytes[17] = (self.bytes[17] & 0x80) | (health_percent & 0x7F);
    }

    /// The block as a client speaking `dialect` expects it
    pub fn to_dialect(&self, dialect: Dialect) -> [u8; POSITION_FRAME_LEN] {
        let mut out = self.bytes;
        match (self.source, dialect.inbound()) {
            (Dialect::V168, Dialect::V172) => {
                out[10] = 0;
                out[11] = self.bytes[10];
            }
            (Dialect::V172, Dialect::V168) => {
                out[10] = self.bytes[11];
                out[11] = 0;
            }
            _ => {}
        }
        out
    }

    /// Build the outbound `PlayerPosition` frame for one dialect
    pub fn build(&self, dialect: Dialect, extras: &PositionExtras) -> Bytes {
        let block = self.to_dialect(dialect);
        let mut writer = PacketWriter::with_capacity(ServerOpcode::PlayerPosition, 64);
        writer.write_bytes(&block);
        if dialect == Dialect::V190 {
            writer
                .write_u8(extras.mana_percent)
                .write_u8(extras.endurance_percent)
                .fill_string(&extras.class_name, 32)
                .write_u8(extras.roleplay as u8)
                .write_u8(self.trailer);
        }
        writer.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::OUT_HEADER_SIZE;

    fn sample() -> PositionUpdate {
        PositionUpdate {
            session: 3,
            speed_data: 200 | (1 << 10),
            z: 50,
            x_offset: 100,
            y_offset: 200,
            zone: 5,
            heading_data: 0x1234,
            fall_data: FALL_LANDED | 450,
            status: STATUS_TARGET_IN_VIEW | STATUS_UNDERWATER,
            health: 0x80 | 77,
        }
    }

    #[test]
    fn test_roundtrip_both_dialects() {
        for dialect in [Dialect::V168, Dialect::V172] {
            let update = sample();
            let bytes = update.encode(dialect);
            let mut reader = PacketReader::new(Bytes::copy_from_slice(&bytes));
            let decoded = PositionUpdate::decode(&mut reader, dialect);
            assert!(!reader.is_truncated());
            assert_eq!(decoded, update);
            assert_eq!(decoded.heading(), 0x234);
        }
    }

    #[test]
    fn test_zone_byte_placement() {
        let update = sample();
        assert_eq!(&update.encode(Dialect::V168)[10..12], &[5, 0]);
        assert_eq!(&update.encode(Dialect::V172)[10..12], &[0, 5]);
    }

    #[test]
    fn test_field_accessors() {
        let mut update = sample();
        assert_eq!(update.speed(), 200);
        assert_eq!(update.movement_state(), MovementState::Swimming);
        assert!(update.has_landed());
        assert_eq!(update.fall_speed(), 450);
        assert!(update.target_in_view());
        assert!(!update.ground_target_in_view());
        update.speed_data = 35 | SPEED_REVERSE | 0x2000 | (7 << 10);
        assert_eq!(update.speed(), -35);
        assert!(update.is_strafing());
        assert_eq!(update.movement_state(), MovementState::Climbing);
    }

    #[test]
    fn test_short_payload_is_flagged() {
        let mut reader = PacketReader::new(Bytes::from_static(&[0, 1, 0, 2]));
        let _ = PositionUpdate::decode(&mut reader, Dialect::V172);
        assert!(reader.is_truncated());
    }

    #[test]
    fn test_redialect_168_to_172() {
        let frame = PositionFrame::from_payload(&sample().encode(Dialect::V168), Dialect::V168);
        let block = frame.to_dialect(Dialect::V172);
        let mut reader = PacketReader::new(Bytes::copy_from_slice(&block));
        let decoded = PositionUpdate::decode(&mut reader, Dialect::V172);
        assert_eq!(decoded, sample());
        assert_eq!(frame.to_dialect(Dialect::V168), sample().encode(Dialect::V168));
    }

    #[test]
    fn test_redialect_172_to_168() {
        let frame = PositionFrame::from_payload(&sample().encode(Dialect::V172), Dialect::V190);
        assert_eq!(frame.to_dialect(Dialect::V168), sample().encode(Dialect::V168));
    }

    #[test]
    fn test_patches() {
        let mut frame = PositionFrame::from_payload(&sample().encode(Dialect::V168), Dialect::V168);
        let diving = frame.patch_status(true, true);
        assert!(diving);
        assert_eq!(
            frame.as_bytes()[16],
            STATUS_TARGET_IN_VIEW | STATUS_DIVING | STATUS_WIREFRAME | STATUS_STEALTH
        );
        frame.patch_health(12);
        assert_eq!(frame.as_bytes()[17], 0x80 | 12);

        frame.patch_dead();
        assert_eq!(frame.as_bytes()[2] & 0x1C, 0x14);

        frame.patch_ride(0x0102, 1);
        assert_eq!(&frame.as_bytes()[2..4], &[0x18, 0]);
        assert_eq!(&frame.as_bytes()[12..16], &[0x01, 0x02, 0, 1]);
    }

    #[test]
    fn test_build_190_trailer() {
        let mut payload = sample().encode(Dialect::V172).to_vec();
        payload.resize(EXTENDED_FRAME_LEN, 0);
        payload[EXTENDED_FRAME_LEN - 1] = 0x5A;
        let frame = PositionFrame::from_payload(&payload, Dialect::V190);
        let extras = PositionExtras {
            mana_percent: 40,
            endurance_percent: 90,
            class_name: "Cleric".into(),
            roleplay: true,
        };

        let out = frame.build(Dialect::V190, &extras);
        let body = &out[OUT_HEADER_SIZE..];
        assert_eq!(body.len(), POSITION_FRAME_LEN + 2 + 32 + 2);
        assert_eq!(body[18], 40);
        assert_eq!(body[19], 90);
        assert_eq!(&body[20..26], b"Cleric");
        assert_eq!(body[52], 1);
        assert_eq!(body[53], 0x5A);

        let short = frame.build(Dialect::V168, &extras);
        assert_eq!(short.len(), OUT_HEADER_SIZE + POSITION_FRAME_LEN);
        assert_eq!(short[2], ServerOpcode::PlayerPosition.as_u8());
    }
}
