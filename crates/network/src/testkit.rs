//! In-process harness: sessions without sockets, driven through the dispatcher

use bytes::Bytes;
use realmd_config::{RealmConfig, ZoneSpec};
use realmd_core::{Position, RegionId, Result};
use realmd_protocol::{ClientOpcode, RawPacket};
use realmd_world::{ActorRecord, MemoryPersistence, NoopHooks, World};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::context::ServerContext;
use crate::dispatcher::Dispatcher;
use crate::handlers::build_registry;
use crate::session::Session;

pub const CAMELOT_HILLS: u16 = 5;
pub const ZONE_X: i32 = 65536;

/// Region 1 with zones 1 and 5 side by side
pub fn config() -> RealmConfig {
    let zone = |id, x_offset, description: &str| ZoneSpec {
        id,
        region: 1,
        x_offset,
        y_offset: 0,
        width: 65536,
        height: 65536,
        description: description.to_string(),
    };
    RealmConfig {
        zones: vec![zone(1, 0, "Salisbury Plains"), zone(CAMELOT_HILLS, ZONE_X, "Camelot Hills")],
        ..RealmConfig::default()
    }
}

pub fn record(character_id: u32, account: &str, x_offset: i32, y_offset: i32) -> ActorRecord {
    let position = Position::new(RegionId::new(1), ZONE_X + x_offset, y_offset, 50, 0);
    ActorRecord {
        character_id,
        account: account.to_string(),
        name: format!("{}{}", account, character_id),
        position,
        bind: position,
        health: 1000,
        max_health: 1000,
        endurance: 100,
        max_endurance: 100,
        mana_percent: 100,
        max_speed: 191,
        safe_fall_level: 0,
        class_name: "Paladin".into(),
        roleplay: false,
        can_fly: false,
        detects_stealth: false,
    }
}

/// `arthur`/`excalibur` and `merlin`/`wizard`, both in Camelot Hills
pub fn store() -> Arc<MemoryPersistence> {
    let store = Arc::new(MemoryPersistence::new());
    store.add_account("excalibur", record(1, "arthur", 100, 2100));
    store.add_account("wizard", record(2, "merlin", 300, 300));
    store
}

pub fn context(config: RealmConfig) -> Arc<ServerContext> {
    context_with(config, store())
}

fn context_with(config: RealmConfig, store: Arc<MemoryPersistence>) -> Arc<ServerContext> {
    let world = Arc::new(World::from_config(&config, Arc::new(NoopHooks)).unwrap());
    ServerContext::new(Arc::new(config), world, store)
}

pub fn login_payload(major: u8, minor: u8, account: &str, password: &str) -> Vec<u8> {
    let mut payload = vec![1, major, minor, 0];
    payload.push(account.len() as u8);
    payload.extend_from_slice(account.as_bytes());
    payload.push(password.len() as u8);
    payload.extend_from_slice(password.as_bytes());
    payload
}

pub struct Harness {
    pub ctx: Arc<ServerContext>,
    pub store: Arc<MemoryPersistence>,
    pub dispatcher: Dispatcher,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(config())
    }

    pub fn with_config(config: RealmConfig) -> Self {
        let store = store();
        let max_bad_packets = config.max_bad_packets;
        Self {
            ctx: context_with(config, store.clone()),
            store,
            dispatcher: Dispatcher::new(build_registry().unwrap(), max_bad_packets),
        }
    }

    pub fn connect(&self) -> Client {
        let (session, outbound) = self.ctx.open_session("127.0.0.1:4000".parse().unwrap()).unwrap();
        Client {
            session,
            outbound,
            sequence: 0,
        }
    }

    /// Run everything queued on region 1 up to `ahead_ms` past its clock
    pub fn run_region(&self, ahead_ms: u64) -> usize {
        let world = self.ctx.world();
        let region = world.region(RegionId::new(1)).unwrap();
        region.scheduler.run_due(world, region, region.now() + ahead_ms)
    }

    /// Connect, log in and enter the world
    pub async fn play(&self, major: u8, minor: u8, account: &str, password: &str) -> Client {
        let mut client = self.connect();
        client
            .send(self, ClientOpcode::LoginRequest, login_payload(major, minor, account, password))
            .await
            .unwrap();
        client.send(self, ClientOpcode::WorldInitRequest, Vec::new()).await.unwrap();
        self.run_region(0);
        client.drain();
        client
    }
}

pub struct Client {
    pub session: Arc<Session>,
    outbound: mpsc::UnboundedReceiver<Bytes>,
    sequence: u16,
}

impl Client {
    pub async fn send(&mut self, harness: &Harness, opcode: ClientOpcode, payload: Vec<u8>) -> Result<()> {
        self.sequence = self.sequence.wrapping_add(1);
        let packet = RawPacket::new(opcode.wire(), self.sequence, payload);
        harness.dispatcher.dispatch(&harness.ctx, &self.session, packet).await
    }

    /// Frames queued for the socket since the last drain
    pub fn drain(&mut self) -> Vec<Bytes> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            frames.push(frame);
        }
        frames
    }

    pub fn opcodes(&mut self) -> Vec<u8> {
        self.drain().iter().map(|frame| frame[2]).collect()
    }
}
