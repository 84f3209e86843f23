//! # Packet Builder
//!
//! Builder functions for server-to-client frames other than the position
//! rebroadcast (see [`crate::position::PositionFrame::build`]).
//!
//! Every builder returns a finished frame with its length already patched,
//! ready to be queued on a session.

use bytes::Bytes;
use realmd_core::{ActorId, ClientVersion, Point3D, SessionId, ZoneId};

use crate::codecs::PacketWriter;
use crate::packet_types::{ChatType, LoginDenial, ServerOpcode};

/// Build a login granted packet
///
/// # Packet Format
/// ```text
/// {0x2A}{u16 session}{pstring account}
/// ```
pub fn build_login_granted(session: SessionId, account: &str) -> Bytes {
    let mut writer = PacketWriter::new(ServerOpcode::LoginGranted);
    writer.write_u16(session.get()).write_pascal_string(account);
    writer.finish()
}

/// Build a login denied packet
///
/// # Purpose
/// Tells the client why its login was refused. The client version is echoed
/// back so that old clients can render the matching message.
///
/// # Packet Format
/// ```text
/// {0x2C}{u8 reason}{u8 1}{u16 version}
/// ```
pub fn build_login_denied(reason: LoginDenial, version: ClientVersion) -> Bytes {
    let mut writer = PacketWriter::new(ServerOpcode::LoginDenied);
    writer
        .write_u8(reason.code())
        .write_u8(0x01)
        .write_u16(version.get());
    writer.finish()
}

/// Build a ping reply echoing the client timestamp
pub fn build_ping_reply(timestamp: u32, sequence: u16) -> Bytes {
    let mut writer = PacketWriter::new(ServerOpcode::PingReply);
    writer.write_u32(timestamp).write_u32(0).write_u16(sequence.wrapping_add(1)).write_u16(0);
    writer.finish()
}

/// Build an object delete packet ("remove from view")
///
/// # Purpose
/// Sent instead of a position update when an observer may no longer see an
/// actor, e.g. because it stealthed.
pub fn build_object_delete(actor: ActorId) -> Bytes {
    let mut writer = PacketWriter::new(ServerOpcode::ObjectDelete);
    writer.write_u16(actor.get()).write_u16(0);
    writer.finish()
}

/// Build a chat/system message
///
/// # Packet Format
/// ```text
/// {0xAF}{u16 0}{u16 0}{u8 type}{u8 0}{u8 0}{u8 0}{cstring text}
/// ```
pub fn build_message(text: &str, chat_type: ChatType) -> Bytes {
    let mut writer = PacketWriter::with_capacity(ServerOpcode::Message, text.len() + 8);
    writer
        .write_u16(0)
        .write_u16(0)
        .write_u8(chat_type as u8)
        .write_u8(0)
        .write_u8(0)
        .write_u8(0)
        .write_cstring(text);
    writer.finish()
}

/// Build the self position packet sent on world entry and zone change
///
/// # Packet Format
/// ```text
/// {0x20}{u16 object id}{u16 z}{u32 x}{u32 y}{u16 heading}{u8 flags}{u8 0}{u16 zone}{u16 region}
/// ```
/// `flags` bit 0x01 marks the actor as diving.
pub fn build_position_and_object_id(
    actor: ActorId,
    point: Point3D,
    heading: u16,
    zone: ZoneId,
    region: u16,
    diving: bool,
) -> Bytes {
    let mut writer = PacketWriter::new(ServerOpcode::PositionAndObjectId);
    writer
        .write_u16(actor.get())
        .write_u16(point.z.clamp(0, u16::MAX as i32) as u16)
        .write_u32(point.x.max(0) as u32)
        .write_u32(point.y.max(0) as u32)
        .write_u16(heading)
        .write_u8(diving as u8)
        .write_u8(0)
        .write_u16(zone.get())
        .write_u16(region);
    writer.finish()
}

/// Build a combat animation carrying only a health update
///
/// # Packet Format
/// ```text
/// {0xBC}{u16 attacker=0}{u16 defender}{u16 weapon}{u16 shield}{u16 style}
///       {u8 stance}{u8 result}{u8 health%}{u8 0}
/// ```
pub fn build_health_update(defender: ActorId, health_percent: u8) -> Bytes {
    let mut writer = PacketWriter::new(ServerOpcode::CombatAnimation);
    writer
        .write_u16(0)
        .write_u16(defender.get())
        .write_u16(0)
        .write_u16(0)
        .write_u16(0)
        .write_u8(0)
        .write_u8(0)
        .write_u8(health_percent)
        .write_u8(0);
    writer.finish()
}

/// Build the quit acknowledgement
pub fn build_quit(totally: bool) -> Bytes {
    let mut writer = PacketWriter::new(ServerOpcode::Quit);
    writer.write_u8(totally as u8).write_u8(0);
    writer.finish()
}

/// Build the ability list reply
///
/// # Packet Format
/// ```text
/// {0x16}{u8 count}{pstring name}*
/// ```
pub fn build_ability_list(abilities: &[String]) -> Bytes {
    let count = abilities.len().min(u8::MAX as usize);
    let mut writer = PacketWriter::new(ServerOpcode::AbilityList);
    writer.write_u8(count as u8);
    for name in abilities.iter().take(count) {
        writer.write_pascal_string(name);
    }
    writer.finish()
}
