//! # Actors
//!
//! Every movable entity in the world (player, NPC, door) is one flat
//! [`Actor`] record. Behavior that used to differ per entity class is
//! expressed through the capability traits [`Movable`], [`Damageable`] and
//! [`Interactable`], which switch on [`ActorKind`] where needed.

use bytes::Bytes;
use parking_lot::Mutex;
use realmd_core::{ActorId, ClientVersion, Dialect, ObjectType, Point3D, Position, RegionId, SessionId, ZoneId};
use realmd_protocol::MovementState;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::area::AreaEvents;
use crate::collaborators::ActorRecord;
use crate::zone::SubZoneRef;

/// How many distinct past positions an actor remembers
pub const RECENT_LOCATIONS: usize = 4;

/// Default interaction range in world units
pub const INTERACT_DISTANCE: u32 = 512;

/// Outbound side of a client connection as seen by the world
///
/// # Purpose
/// Lets the world push frames to the session controlling an actor without
/// depending on the network crate. Implementations must queue the frame and
/// return immediately; writes to one session are never interleaved.
pub trait ClientLink: Send + Sync {
    fn session_id(&self) -> SessionId;

    fn version(&self) -> ClientVersion;

    /// False once the session reached its terminal state
    fn is_connected(&self) -> bool;

    fn send(&self, frame: Bytes);
}

/// Tagged union of actor flavors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorKind {
    Player { session: SessionId },
    Npc { template: u32 },
    Door { door_id: u32 },
}

impl ActorKind {
    pub fn object_type(&self) -> ObjectType {
        match self {
            Self::Player { .. } => ObjectType::Player,
            Self::Npc { .. } => ObjectType::Npc,
            Self::Door { .. } => ObjectType::Door,
        }
    }

    pub fn is_player(&self) -> bool {
        matches!(self, Self::Player { .. })
    }
}

/// Mount the actor is riding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Steed {
    pub object_id: ActorId,
    pub max_speed: u32,
    pub rider_slot: u8,
}

/// Ring of the last few distinct positions
#[derive(Debug, Clone, Default)]
pub struct RecentLocations {
    points: VecDeque<Point3D>,
}

impl RecentLocations {
    /// Record `point` unless it equals the newest entry
    pub fn push(&mut self, point: Point3D) {
        if self.points.back() == Some(&point) {
            return;
        }
        if self.points.len() == RECENT_LOCATIONS {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn latest(&self) -> Option<Point3D> {
        self.points.back().copied()
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Point3D> {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Mutable part of an actor
///
/// # Thread Safety
/// Guarded by the actor's mutex. Only the owning region's scheduler writes
/// it; when the spatial index is also involved, its lock is taken first.
#[derive(Debug, Clone)]
pub struct ActorState {
    pub position: Position,
    pub zone: Option<ZoneId>,
    /// Sub-zone the spatial index registered the actor in
    pub sub_zone: Option<SubZoneRef>,
    pub bind: Position,

    pub max_speed: u32,
    pub current_speed: i16,
    pub steed: Option<Steed>,

    pub stealthed: bool,
    pub detects_stealth: bool,
    pub wireframe: bool,
    pub can_fly: bool,

    pub health: u32,
    pub max_health: u32,
    pub endurance: u32,
    pub max_endurance: u32,
    pub mana_percent: u8,
    pub safe_fall_level: i32,
    pub class_name: String,
    pub roleplay: bool,

    /// Region tick of the last accepted position update
    pub last_update_tick: Option<u64>,
    /// Region tick of the last update with a non-zero speed
    pub last_movement_tick: u64,
    /// Highest Z since the actor last stood on the ground
    pub max_last_z: i32,
    pub infractions: u32,
    pub movement: MovementState,
    pub strafing: bool,
    pub diving: bool,
    pub target_in_view: bool,
    pub ground_target_in_view: bool,

    pub areas: Vec<realmd_core::AreaId>,
    pub area_update_tick: u64,
    pub last_locations: RecentLocations,
}

impl ActorState {
    pub fn new(position: Position) -> Self {
        Self {
            position,
            zone: None,
            sub_zone: None,
            bind: position,
            max_speed: 191,
            current_speed: 0,
            steed: None,
            stealthed: false,
            detects_stealth: false,
            wireframe: false,
            can_fly: false,
            health: 100,
            max_health: 100,
            endurance: 100,
            max_endurance: 100,
            mana_percent: 100,
            safe_fall_level: 0,
            class_name: String::new(),
            roleplay: false,
            last_update_tick: None,
            last_movement_tick: 0,
            max_last_z: i32::MIN,
            infractions: 0,
            movement: MovementState::Ground,
            strafing: false,
            diving: false,
            target_in_view: false,
            ground_target_in_view: false,
            areas: Vec::new(),
            area_update_tick: 0,
            last_locations: RecentLocations::default(),
        }
    }

    pub fn health_percent(&self) -> u8 {
        if self.max_health == 0 {
            return 0;
        }
        ((self.health as u64 * 100) / self.max_health as u64).min(100) as u8
    }

    pub fn endurance_percent(&self) -> u8 {
        if self.max_endurance == 0 {
            return 0;
        }
        ((self.endurance as u64 * 100) / self.max_endurance as u64).min(100) as u8
    }

    /// Apply a change of area membership
    pub fn apply_area_events(&mut self, events: &AreaEvents) {
        self.areas.retain(|id| !events.left.contains(id));
        self.areas.extend(events.entered.iter().copied());
    }
}

/// An entity living in a region
///
/// # Purpose
/// Identity and kind are immutable; everything that changes lives in
/// [`ActorState`]. Actors are shared as `Arc<Actor>` between the world
/// registry, the spatial index, scheduler queues and sessions.
///
/// # Validity
/// An actor stays valid until it is removed from the world. Queued actions
/// check [`Actor::is_valid`] before running and become no-ops afterwards.
pub struct Actor {
    pub id: ActorId,
    pub kind: ActorKind,
    pub name: String,
    pub account: Option<String>,
    /// Persistent record this actor was loaded from, 0 for transient actors
    pub character_id: u32,
    link: Option<Arc<dyn ClientLink>>,
    valid: AtomicBool,
    pub state: Mutex<ActorState>,
}

impl Actor {
    pub fn new(id: ActorId, kind: ActorKind, name: impl Into<String>, position: Position) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            account: None,
            character_id: 0,
            link: None,
            valid: AtomicBool::new(true),
            state: Mutex::new(ActorState::new(position)),
        }
    }

    /// Build a player actor from its persistent record
    pub fn from_record(id: ActorId, record: &ActorRecord, link: Arc<dyn ClientLink>) -> Self {
        let mut state = ActorState::new(record.position);
        state.bind = record.bind;
        state.health = record.health.min(record.max_health);
        state.max_health = record.max_health;
        state.endurance = record.endurance.min(record.max_endurance);
        state.max_endurance = record.max_endurance;
        state.mana_percent = record.mana_percent.min(100);
        state.max_speed = record.max_speed;
        state.safe_fall_level = record.safe_fall_level;
        state.class_name = record.class_name.clone();
        state.roleplay = record.roleplay;
        state.can_fly = record.can_fly;
        state.detects_stealth = record.detects_stealth;

        Self {
            id,
            kind: ActorKind::Player {
                session: link.session_id(),
            },
            name: record.name.clone(),
            account: Some(record.account.clone()),
            character_id: record.character_id,
            link: Some(link),
            valid: AtomicBool::new(true),
            state: Mutex::new(state),
        }
    }

    /// Snapshot for persistence
    pub fn to_record(&self) -> ActorRecord {
        let state = self.state.lock();
        ActorRecord {
            character_id: self.character_id,
            account: self.account.clone().unwrap_or_default(),
            name: self.name.clone(),
            position: state.position,
            bind: state.bind,
            health: state.health,
            max_health: state.max_health,
            endurance: state.endurance,
            max_endurance: state.max_endurance,
            mana_percent: state.mana_percent,
            max_speed: state.max_speed,
            safe_fall_level: state.safe_fall_level,
            class_name: state.class_name.clone(),
            roleplay: state.roleplay,
            can_fly: state.can_fly,
            detects_stealth: state.detects_stealth,
        }
    }

    pub fn with_link(mut self, link: Arc<dyn ClientLink>) -> Self {
        self.link = Some(link);
        self
    }

    pub fn link(&self) -> Option<&Arc<dyn ClientLink>> {
        self.link.as_ref()
    }

    pub fn object_type(&self) -> ObjectType {
        self.kind.object_type()
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Mark the actor gone; pending actions turn into no-ops
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }

    pub fn region(&self) -> RegionId {
        self.state.lock().position.region
    }

    pub fn client_version(&self) -> Option<ClientVersion> {
        self.link.as_ref().map(|link| link.version())
    }

    pub fn dialect(&self) -> Option<Dialect> {
        self.client_version().map(|version| version.dialect())
    }

    /// Whether a connected client controls this actor
    pub fn is_connected(&self) -> bool {
        self.link.as_ref().is_some_and(|link| link.is_connected())
    }

    /// Queue a frame for the controlling client; dropped for NPCs and dead links
    pub fn send(&self, frame: Bytes) {
        if let Some(link) = &self.link {
            if link.is_connected() {
                link.send(frame);
            }
        }
    }
}

impl std::fmt::Debug for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actor")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// Something with a position and a speed
pub trait Movable {
    fn position(&self) -> Position;

    /// Speed used for plausibility checks: the steed's when mounted
    fn effective_speed(&self) -> u32;
}

pub trait Damageable {
    fn health(&self) -> u32;

    fn max_health(&self) -> u32;

    fn health_percent(&self) -> u8;

    /// Subtract up to `amount` health; returns what was actually removed
    fn take_damage(&self, amount: u32) -> u32;

    fn is_alive(&self) -> bool {
        self.health() > 0
    }
}

pub trait Interactable {
    fn display_name(&self) -> &str;

    fn interaction_radius(&self) -> u32;

    /// Whether `other` stands close enough to interact with this actor
    fn can_interact_with(&self, other: &Position) -> bool;
}

impl Movable for Actor {
    fn position(&self) -> Position {
        self.state.lock().position
    }

    fn effective_speed(&self) -> u32 {
        let state = self.state.lock();
        match state.steed {
            Some(steed) => steed.max_speed,
            None => state.max_speed,
        }
    }
}

impl Damageable for Actor {
    fn health(&self) -> u32 {
        self.state.lock().health
    }

    fn max_health(&self) -> u32 {
        self.state.lock().max_health
    }

    fn health_percent(&self) -> u8 {
        self.state.lock().health_percent()
    }

    fn take_damage(&self, amount: u32) -> u32 {
        if let ActorKind::Door { .. } = self.kind {
            return 0;
        }
        let mut state = self.state.lock();
        let applied = amount.min(state.health);
        state.health -= applied;
        applied
    }
}

impl Interactable for Actor {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn interaction_radius(&self) -> u32 {
        match self.kind {
            ActorKind::Door { .. } => INTERACT_DISTANCE / 2,
            _ => INTERACT_DISTANCE,
        }
    }

    fn can_interact_with(&self, other: &Position) -> bool {
        let own = self.state.lock().position;
        own.region == other.region && own.point.is_within(other.point, self.interaction_radius(), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(x: i32, y: i32) -> Position {
        Position::new(RegionId::new(1), x, y, 0, 0)
    }

    #[test]
    fn test_kind_maps_to_object_type() {
        let npc = Actor::new(ActorId::new(1), ActorKind::Npc { template: 7 }, "guard", position(0, 0));
        assert_eq!(npc.object_type(), ObjectType::Npc);
        assert!(!npc.kind.is_player());
        assert!(!npc.is_connected());
    }

    #[test]
    fn test_effective_speed_prefers_steed() {
        let actor = Actor::new(ActorId::new(1), ActorKind::Npc { template: 0 }, "rider", position(0, 0));
        assert_eq!(actor.effective_speed(), 191);
        actor.state.lock().steed = Some(Steed {
            object_id: ActorId::new(9),
            max_speed: 400,
            rider_slot: 0,
        });
        assert_eq!(actor.effective_speed(), 400);
    }

    #[test]
    fn test_door_ignores_damage() {
        let door = Actor::new(ActorId::new(2), ActorKind::Door { door_id: 1 }, "gate", position(0, 0));
        assert_eq!(door.take_damage(50), 0);
        assert_eq!(door.health(), 100);

        let npc = Actor::new(ActorId::new(3), ActorKind::Npc { template: 0 }, "rat", position(0, 0));
        assert_eq!(npc.take_damage(150), 100);
        assert!(!npc.is_alive());
    }

    #[test]
    fn test_interaction_range() {
        let npc = Actor::new(ActorId::new(3), ActorKind::Npc { template: 0 }, "merchant", position(1000, 1000));
        assert!(npc.can_interact_with(&position(1000, 1500)));
        assert!(!npc.can_interact_with(&position(1000, 1600)));
        let elsewhere = Position::new(RegionId::new(2), 1000, 1000, 0, 0);
        assert!(!npc.can_interact_with(&elsewhere));
    }

    #[test]
    fn test_recent_locations_keeps_four_distinct() {
        let mut ring = RecentLocations::default();
        for x in 0..6 {
            ring.push(Point3D::new(x, 0, 0));
            ring.push(Point3D::new(x, 0, 0));
        }
        assert_eq!(ring.len(), RECENT_LOCATIONS);
        assert_eq!(ring.iter().next(), Some(&Point3D::new(2, 0, 0)));
        assert_eq!(ring.latest(), Some(Point3D::new(5, 0, 0)));
    }

    #[test]
    fn test_invalidate() {
        let npc = Actor::new(ActorId::new(3), ActorKind::Npc { template: 0 }, "rat", position(0, 0));
        assert!(npc.is_valid());
        npc.invalidate();
        assert!(!npc.is_valid());
    }
}
