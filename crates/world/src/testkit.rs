//! Shared fixtures for the world tests

use bytes::Bytes;
use parking_lot::Mutex;
use realmd_config::{AreaShapeSpec, AreaSpec, RealmConfig, ZoneSpec};
use realmd_core::{ClientVersion, Position, SessionId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::actor::{Actor, ClientLink};
use crate::collaborators::{ActorRecord, GameplayHooks};
use crate::world::World;

/// Region 1: zone 1 at the origin, zone 5 right of it with a town square.
/// Region 2: zone 10.
pub fn config() -> RealmConfig {
    let zone = |id, region, x_offset, description: &str| ZoneSpec {
        id,
        region,
        x_offset,
        y_offset: 0,
        width: 65536,
        height: 65536,
        description: description.to_string(),
    };
    RealmConfig {
        zones: vec![
            zone(1, 1, 0, "Salisbury Plains"),
            zone(5, 1, 65536, "Camelot Hills"),
            zone(10, 2, 0, "Avalon Marsh"),
        ],
        areas: vec![AreaSpec {
            region: 1,
            description: "Cotswold".into(),
            shape: AreaShapeSpec::Square {
                x: 65536,
                y: 0,
                width: 4096,
                height: 4096,
            },
        }],
        ..RealmConfig::default()
    }
}

pub fn world(hooks: Arc<dyn GameplayHooks>) -> World {
    World::from_config(&config(), hooks).unwrap()
}

pub fn record(character_id: u32, position: Position) -> ActorRecord {
    ActorRecord {
        character_id,
        account: format!("account{}", character_id),
        name: format!("Player{}", character_id),
        position,
        bind: position,
        health: 1000,
        max_health: 1000,
        endurance: 100,
        max_endurance: 100,
        mana_percent: 80,
        max_speed: 191,
        safe_fall_level: 0,
        class_name: "Armsman".into(),
        roleplay: false,
        can_fly: false,
        detects_stealth: false,
    }
}

/// Player actor controlled by `link`, registered but not yet indexed
pub fn player(world: &World, link: &Arc<RecordingLink>, position: Position) -> Arc<Actor> {
    let id = world.allocate_actor_id().unwrap();
    let link: Arc<dyn ClientLink> = link.clone();
    let actor = Arc::new(Actor::from_record(id, &record(id.get() as u32, position), link));
    world.add_actor(actor.clone());
    actor
}

/// Client link that records every frame sent to it
pub struct RecordingLink {
    session: SessionId,
    version: ClientVersion,
    connected: AtomicBool,
    frames: Mutex<Vec<Bytes>>,
}

impl RecordingLink {
    pub fn new(session: u16, version: u16) -> Arc<Self> {
        Arc::new(Self {
            session: SessionId::new(session),
            version: ClientVersion::new(version),
            connected: AtomicBool::new(true),
            frames: Mutex::new(Vec::new()),
        })
    }

    pub fn frames(&self) -> Vec<Bytes> {
        self.frames.lock().clone()
    }

    /// Opcode byte of every frame, in send order
    pub fn opcodes(&self) -> Vec<u8> {
        self.frames.lock().iter().map(|frame| frame[2]).collect()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }
}

impl ClientLink for RecordingLink {
    fn session_id(&self) -> SessionId {
        self.session
    }

    fn version(&self) -> ClientVersion {
        self.version
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn send(&self, frame: Bytes) {
        self.frames.lock().push(frame);
    }
}
