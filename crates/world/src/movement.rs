//! # Movement Validator
//!
//! Applies one client position update to the authoritative world state and
//! rebroadcasts it. Runs as a scheduled action on the mover's region.
//!
//! # Steps
//! 1. Resolve the zone; unknown zones, zones of another region and `z == 0`
//!    send the actor to its bind point.
//! 2. Anti-speedhack check (detection only, the move is always applied).
//! 3. Relocate in the spatial index.
//! 4. Area membership, at most once per throttle window.
//! 5. Movement flags and fall damage.
//! 6. Patch the inbound frame and fan it out once per observer dialect.

use bytes::Bytes;
use realmd_config::MovementConfig;
use realmd_core::{ClientVersion, Dialect, ObjectType, Point3D, Position, ZoneId};
use realmd_protocol::packet_builder::{build_health_update, build_message, build_object_delete};
use realmd_protocol::{ChatType, MovementState, PositionExtras, PositionFrame, PositionUpdate};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::actor::{Actor, Damageable, Movable};
use crate::area::{diff_membership, AreaEvents};
use crate::region::Region;
use crate::spatial::Transition;
use crate::world::World;

/// A decoded position update plus the raw block it came from
#[derive(Debug, Clone)]
pub struct MovementInput {
    pub update: PositionUpdate,
    pub frame: PositionFrame,
    /// Version of the client that sent it
    pub version: ClientVersion,
}

impl MovementInput {
    pub fn new(update: PositionUpdate, frame: PositionFrame, version: ClientVersion) -> Self {
        Self { update, frame, version }
    }
}

/// Why an update was not applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    UnknownZone(u16),
    /// The zone exists but belongs to another region
    ForeignZone(ZoneId),
    FellThroughFloor,
    /// The target position lies in no sub-zone
    NoSubZone,
}

/// What one position update did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovementOutcome {
    pub rejection: Option<Rejection>,
    pub moved_to_bind: bool,
    pub transition: Option<Transition>,
    pub zone_changed: bool,
    pub speedhack: bool,
    pub fall_damage: u32,
    pub areas: AreaEvents,
    /// Observers that received the position frame
    pub recipients: usize,
    /// Observers that received "remove from view" instead
    pub hidden_from: usize,
    /// Distinct dialects the frame was encoded in
    pub dialects: usize,
}

impl MovementOutcome {
    pub fn applied(&self) -> bool {
        self.rejection.is_none()
    }

    fn rejected(rejection: Rejection, moved_to_bind: bool) -> Self {
        Self {
            rejection: Some(rejection),
            moved_to_bind,
            ..Self::default()
        }
    }
}

/// Largest distance plausible after `elapsed_ms` at `speed` units per second
pub fn max_allowed_distance(elapsed_ms: u64, speed: u32, tolerance_percent: u32) -> u64 {
    elapsed_ms * speed as u64 / 1000 * tolerance_percent as u64 / 100
}

/// Displacements at or under the floor never count
pub fn is_speedhack(distance: u64, max_allowed: u64, ignore_distance: u32) -> bool {
    distance > ignore_distance as u64 && distance > max_allowed
}

/// Percentage of health lost for a landing at `fall_speed`
///
/// `fall_speed` must already be reduced by safe fall. Clients from 1.88 on
/// report faster fall speeds and use their own constants. Never above 99.
pub fn fall_damage_percent(fall_speed: i32, version: ClientVersion, config: &MovementConfig) -> i32 {
    let (min_speed, divide) = if version >= ClientVersion::V188 {
        (config.fall_min_speed_188, config.fall_divide_188)
    } else {
        (config.fall_min_speed, config.fall_divide)
    };
    if fall_speed <= min_speed || divide <= 0 {
        return 0;
    }
    ((fall_speed - (min_speed + 1)) / divide).min(99)
}

/// Health lost for `percent`; at most `max_health - 1`
pub fn fall_damage(percent: i32, max_health: u32) -> u32 {
    if percent <= 0 || max_health == 0 {
        return 0;
    }
    (0.01 * percent.min(99) as f64 * (max_health - 1) as f64) as u32
}

pub struct MovementValidator {
    config: MovementConfig,
}

impl MovementValidator {
    pub fn new(config: MovementConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MovementConfig {
        &self.config
    }

    /// Apply one position update of `actor`
    ///
    /// # Purpose
    /// Must run on `region`'s scheduler, the region the actor currently
    /// lives in. Never fails: implausible input is logged or bounced to the
    /// bind point, and the outcome says what happened.
    pub fn process(
        &self,
        world: &World,
        region: &Region,
        actor: &Arc<Actor>,
        input: MovementInput,
        now: u64,
    ) -> MovementOutcome {
        let update = input.update;

        let zone = match world.zone(ZoneId::new(update.zone)) {
            Some(zone) if zone.region == region.id => zone.clone(),
            Some(zone) => {
                warn!("{} reported zone {:?} outside region {}", actor.id, zone.id, region.id.get());
                world.move_to_bind(actor);
                return MovementOutcome::rejected(Rejection::ForeignZone(zone.id), true);
            }
            None => {
                warn!("{} reported unknown zone {}", actor.id, update.zone);
                let at_bind = {
                    let state = actor.state.lock();
                    state.position == state.bind
                };
                if !at_bind {
                    world.move_to_bind(actor);
                }
                return MovementOutcome::rejected(Rejection::UnknownZone(update.zone), !at_bind);
            }
        };

        if update.z == 0 {
            debug!("{} fell through the floor", actor.id);
            world.move_to_bind(actor);
            return MovementOutcome::rejected(Rejection::FellThroughFloor, true);
        }

        let point = Point3D::new(
            zone.x_offset + update.x_offset as i32,
            zone.y_offset + update.y_offset as i32,
            update.z as i32,
        );
        let heading = update.heading();
        let mut outcome = MovementOutcome::default();

        // Plausibility against the last accepted update
        {
            let speed = actor.effective_speed();
            let mut state = actor.state.lock();
            if let Some(last) = state.last_update_tick {
                let elapsed = now.saturating_sub(last);
                let distance = state.position.point.distance_2d(point).max(0) as u64;
                let allowed = max_allowed_distance(elapsed, speed, self.config.speed_tolerance_percent);
                if is_speedhack(distance, allowed, self.config.speed_ignore_distance) {
                    state.infractions += 1;
                    outcome.speedhack = true;
                    if state.infractions % self.config.speedhack_log_every.max(1) == 0 {
                        warn!(
                            target: "realmd::cheat",
                            "SPEEDHACK[{}]: {} ({}) account={} moved {} in {}ms, allowed {}",
                            state.infractions,
                            actor.name,
                            actor.id,
                            actor.account.as_deref().unwrap_or("-"),
                            distance,
                            elapsed,
                            allowed
                        );
                    }
                }
            }
            outcome.zone_changed = state.zone != Some(zone.id);
        }

        let target = Position {
            region: region.id,
            point,
            heading,
        };
        match region.spatial.relocate(actor, target) {
            Ok(transition) => outcome.transition = Some(transition),
            Err(e) => {
                warn!("{} cannot be placed at {:?}: {}", actor.id, point, e);
                world.move_to_bind(actor);
                outcome.rejection = Some(Rejection::NoSubZone);
                outcome.moved_to_bind = true;
                return outcome;
            }
        }

        if outcome.zone_changed {
            world.send_self_position(actor);
            actor.send(build_message(&format!("You have entered {}.", zone.description), ChatType::System));
            actor.send(build_message(&zone.description, ChatType::ScreenCenterSmaller));
        }

        let (flying_cheat, fall_percent, extras, stealthed) = {
            let mut state = actor.state.lock();
            state.last_update_tick = Some(now);
            state.last_locations.push(point);

            if now > state.area_update_tick {
                let current = region.areas_at(zone.id, point);
                outcome.areas = diff_membership(&state.areas, &current);
                state.apply_area_events(&outcome.areas);
                state.area_update_tick = now.saturating_add(self.config.area_update_interval_ms);
            }

            state.current_speed = update.speed();
            if update.speed() != 0 {
                state.last_movement_tick = now;
            }
            state.movement = update.movement_state();
            state.strafing = update.is_strafing();
            state.target_in_view = update.target_in_view();
            state.ground_target_in_view = update.ground_target_in_view();
            let flying_cheat = state.movement == MovementState::Flying && !state.can_fly;

            let mut fall_percent = 0;
            if state.movement != MovementState::Swimming {
                if update.has_landed() {
                    let fall_speed = update.fall_speed() as i32 - self.config.safe_fall_step * state.safe_fall_level;
                    fall_percent = fall_damage_percent(fall_speed, input.version, &self.config);
                    state.max_last_z = point.z;
                } else if update.fall_data == 0 || state.max_last_z < point.z {
                    state.max_last_z = point.z;
                }
            }

            let extras = PositionExtras {
                mana_percent: state.mana_percent,
                endurance_percent: state.endurance_percent(),
                class_name: state.class_name.clone(),
                roleplay: state.roleplay,
            };
            (flying_cheat, fall_percent, extras, state.stealthed)
        };

        if flying_cheat {
            warn!(target: "realmd::cheat", "FLYHACK: {} ({}) flying without the capability", actor.name, actor.id);
        }

        self.fire_area_events(world, region, actor, &outcome.areas);

        if fall_percent > 0 {
            outcome.fall_damage = self.apply_fall_damage(region, actor, fall_percent);
        }

        let mut frame = input.frame;
        {
            let mut state = actor.state.lock();
            if let Some(steed) = state.steed {
                frame.patch_ride(steed.object_id.get(), steed.rider_slot);
            } else if state.health == 0 {
                frame.patch_dead();
            }
            state.diving = frame.patch_status(state.wireframe, state.stealthed);
            frame.patch_health(state.health_percent());
        }

        self.fan_out(region, actor, point, &frame, &extras, stealthed, &mut outcome);
        trace!(
            "{} moved to {:?}: {} recipients, {} hidden, {} dialects",
            actor.id,
            point,
            outcome.recipients,
            outcome.hidden_from,
            outcome.dialects
        );
        outcome
    }

    fn fire_area_events(&self, world: &World, region: &Region, actor: &Actor, events: &AreaEvents) {
        let hooks = world.hooks();
        for id in &events.left {
            if let Some(area) = region.area(*id) {
                debug!("{} left area '{}'", actor.id, area.description);
                hooks.on_area_leave(actor, area);
            }
        }
        for id in &events.entered {
            if let Some(area) = region.area(*id) {
                debug!("{} entered area '{}'", actor.id, area.description);
                hooks.on_area_enter(actor, area);
            }
        }
    }

    fn apply_fall_damage(&self, region: &Region, actor: &Actor, percent: i32) -> u32 {
        let damage = fall_damage(percent, actor.max_health());
        let applied = actor.take_damage(damage);
        let (point, health_percent) = {
            let mut state = actor.state.lock();
            let endurance_loss = state.max_endurance * percent as u32 / 100;
            state.endurance = state.endurance.saturating_sub(endurance_loss);
            (state.position.point, state.health_percent())
        };

        actor.send(build_message(
            &format!("You take {}% damage from the fall and lose {} hit points.", percent, applied),
            ChatType::Damaged,
        ));
        let update = build_health_update(actor.id, health_percent);
        for observer in region
            .spatial
            .query_radius(point, self.config.visibility_distance, Some(ObjectType::Player))
        {
            observer.send(update.clone());
        }
        debug!("{} took {} fall damage ({}%)", actor.id, applied, percent);
        applied
    }

    #[allow(clippy::too_many_arguments)]
    fn fan_out(
        &self,
        region: &Region,
        actor: &Actor,
        point: Point3D,
        frame: &PositionFrame,
        extras: &PositionExtras,
        stealthed: bool,
        outcome: &mut MovementOutcome,
    ) {
        let observers = region
            .spatial
            .query_radius(point, self.config.visibility_distance, Some(ObjectType::Player));
        let mut encoded: HashMap<Dialect, Bytes> = HashMap::new();
        let mut delete: Option<Bytes> = None;

        for observer in observers {
            if observer.id == actor.id {
                continue;
            }
            let Some(link) = observer.link() else {
                continue;
            };
            if !link.is_connected() {
                continue;
            }
            if stealthed && !observer.state.lock().detects_stealth {
                let frame = delete.get_or_insert_with(|| build_object_delete(actor.id)).clone();
                link.send(frame);
                outcome.hidden_from += 1;
                continue;
            }
            let dialect = link.version().dialect();
            let bytes = encoded
                .entry(dialect)
                .or_insert_with(|| frame.build(dialect, extras))
                .clone();
            link.send(bytes);
            outcome.recipients += 1;
        }
        outcome.dialects = encoded.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Steed;
    use crate::area::Area;
    use crate::collaborators::{GameplayHooks, NoopHooks};
    use crate::testkit::{self, RecordingLink};
    use parking_lot::Mutex;
    use realmd_core::{ActorId, RegionId};
    use realmd_protocol::position::{FALL_LANDED, STATUS_STEALTH};
    use realmd_protocol::{PacketReader, ServerOpcode, OUT_HEADER_SIZE};

    const CAMELOT_HILLS: u16 = 5;
    const ZONE_X: i32 = 65536;

    fn update(zone: u16, x_offset: u16, y_offset: u16, z: u16, speed: u16) -> PositionUpdate {
        PositionUpdate {
            session: 1,
            speed_data: speed,
            z,
            x_offset,
            y_offset,
            zone,
            heading_data: 0x0800,
            fall_data: 0,
            status: 0,
            health: 100,
        }
    }

    fn input(update: PositionUpdate, version: u16) -> MovementInput {
        let version = ClientVersion::new(version);
        let dialect = version.dialect();
        let frame = PositionFrame::from_payload(&update.encode(dialect), dialect);
        MovementInput::new(update, frame, version)
    }

    struct Fixture {
        world: World,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_hooks(Arc::new(NoopHooks))
        }

        fn with_hooks(hooks: Arc<dyn GameplayHooks>) -> Self {
            Self {
                world: testkit::world(hooks),
            }
        }

        fn region(&self) -> Arc<Region> {
            self.world.region(RegionId::new(1)).unwrap().clone()
        }

        /// Player already indexed at (x, y) inside Camelot Hills
        fn spawn(&self, link: &Arc<RecordingLink>, x_offset: i32, y_offset: i32) -> Arc<Actor> {
            let position = Position::new(RegionId::new(1), ZONE_X + x_offset, y_offset, 50, 0);
            let actor = testkit::player(&self.world, link, position);
            self.region().spatial.enter(&actor).unwrap();
            link.clear();
            actor
        }

        fn process(&self, actor: &Arc<Actor>, input: MovementInput, now: u64) -> MovementOutcome {
            let region = self.region();
            self.world.validator().process(&self.world, &region, actor, input, now)
        }
    }

    #[test]
    fn test_speedhack_floor_and_bound() {
        assert_eq!(max_allowed_distance(1000, 200, 180), 360);
        assert!(!is_speedhack(100, 0, 100));
        assert!(!is_speedhack(360, 360, 100));
        assert!(is_speedhack(361, 360, 100));
        assert!(!is_speedhack(90, 10, 100));
    }

    #[test]
    fn test_fall_damage_never_kills_from_full() {
        let config = MovementConfig::default();
        for fall_speed in [0, 400, 401, 1000, 4095, i32::MAX / 2] {
            for version in [ClientVersion::V168, ClientVersion::V190] {
                let percent = fall_damage_percent(fall_speed, version, &config);
                assert!((0..=99).contains(&percent));
                for max_health in [1u32, 2, 100, 5000] {
                    assert!(fall_damage(percent, max_health) < max_health);
                }
            }
        }
        assert_eq!(fall_damage_percent(400, ClientVersion::V168, &config), 0);
        assert_eq!(fall_damage_percent(1000, ClientVersion::V168, &config), 99);
        assert_eq!(fall_damage_percent(1000, ClientVersion::V188, &config), 33);
        assert_eq!(fall_damage(50, 1001), 500);
    }

    #[test]
    fn test_168_update_reaches_172_observer() {
        let fixture = Fixture::new();
        let mover_link = RecordingLink::new(1, 168);
        let observer_link = RecordingLink::new(2, 172);
        let mover = fixture.spawn(&mover_link, 100, 2100);
        let _observer = fixture.spawn(&observer_link, 300, 300);

        let sent = update(CAMELOT_HILLS, 100, 200, 50, 200);
        let outcome = fixture.process(&mover, input(sent, 168), 1000);

        assert!(outcome.applied());
        let transition = outcome.transition.unwrap();
        assert!(transition.crossed());
        assert_eq!(transition.from.unwrap().index, 32);
        assert_eq!(transition.to.index, 0);
        assert_eq!(mover.state.lock().position.point, Point3D::new(ZONE_X + 100, 200, 50));

        assert!(mover_link.frames().is_empty());
        let frames = observer_link.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][2], ServerOpcode::PlayerPosition.as_u8());
        let mut reader = PacketReader::new(frames[0].slice(OUT_HEADER_SIZE..));
        let decoded = PositionUpdate::decode(&mut reader, Dialect::V172);
        assert_eq!(decoded.zone, CAMELOT_HILLS);
        assert_eq!((decoded.x_offset, decoded.y_offset, decoded.z), (100, 200, 50));
        assert_eq!(decoded.speed(), 200);
        assert_eq!(outcome.recipients, 1);
        assert_eq!(outcome.dialects, 1);
    }

    #[test]
    fn test_one_encode_per_dialect() {
        let fixture = Fixture::new();
        let mover_link = RecordingLink::new(1, 172);
        let mover = fixture.spawn(&mover_link, 100, 100);
        let links: Vec<_> = [168, 170, 172, 190, 1124]
            .into_iter()
            .enumerate()
            .map(|(i, version)| RecordingLink::new(10 + i as u16, version))
            .collect();
        for link in &links {
            fixture.spawn(link, 200, 200);
        }

        let outcome = fixture.process(&mover, input(update(CAMELOT_HILLS, 110, 100, 50, 10), 172), 1000);
        assert_eq!(outcome.recipients, 5);
        assert_eq!(outcome.dialects, 3);
        assert_eq!(links[0].frames()[0], links[1].frames()[0]);
        assert_eq!(links[3].frames()[0], links[4].frames()[0]);
        assert!(links[3].frames()[0].len() > links[2].frames()[0].len());
    }

    #[test]
    fn test_stealth_hides_from_non_detectors() {
        let fixture = Fixture::new();
        let mover_link = RecordingLink::new(1, 172);
        let plain_link = RecordingLink::new(2, 172);
        let seer_link = RecordingLink::new(3, 172);
        let mover = fixture.spawn(&mover_link, 100, 100);
        fixture.spawn(&plain_link, 200, 200);
        let seer = fixture.spawn(&seer_link, 250, 250);
        mover.state.lock().stealthed = true;
        seer.state.lock().detects_stealth = true;

        let outcome = fixture.process(&mover, input(update(CAMELOT_HILLS, 110, 100, 50, 10), 172), 1000);
        assert_eq!(outcome.hidden_from, 1);
        assert_eq!(outcome.recipients, 1);
        assert_eq!(plain_link.opcodes(), vec![ServerOpcode::ObjectDelete.as_u8()]);
        let seen = &seer_link.frames()[0];
        assert_eq!(seen[2], ServerOpcode::PlayerPosition.as_u8());
        assert_ne!(seen[OUT_HEADER_SIZE + 16] & STATUS_STEALTH, 0);
    }

    #[test]
    fn test_speedhack_counts_once_and_still_moves() {
        let fixture = Fixture::new();
        let link = RecordingLink::new(1, 172);
        let mover = fixture.spawn(&link, 100, 100);

        fixture.process(&mover, input(update(CAMELOT_HILLS, 100, 100, 50, 0), 172), 1000);
        // 1s at 191 speed allows 343 units
        let outcome = fixture.process(&mover, input(update(CAMELOT_HILLS, 100, 600, 50, 191), 172), 2000);
        assert!(outcome.speedhack);
        assert!(outcome.applied());
        assert_eq!(mover.state.lock().infractions, 1);
        assert_eq!(mover.state.lock().position.point.y, 600);

        // Within the bound on the next tick
        let outcome = fixture.process(&mover, input(update(CAMELOT_HILLS, 100, 900, 50, 191), 172), 3000);
        assert!(!outcome.speedhack);
        assert_eq!(mover.state.lock().infractions, 1);
    }

    #[test]
    fn test_mounted_speed_is_used() {
        let fixture = Fixture::new();
        let link = RecordingLink::new(1, 172);
        let mover = fixture.spawn(&link, 100, 100);
        mover.state.lock().steed = Some(Steed {
            object_id: ActorId::new(500),
            max_speed: 800,
            rider_slot: 0,
        });

        fixture.process(&mover, input(update(CAMELOT_HILLS, 100, 100, 50, 0), 172), 1000);
        let outcome = fixture.process(&mover, input(update(CAMELOT_HILLS, 100, 1000, 50, 250), 172), 2000);
        assert!(!outcome.speedhack);
    }

    #[test]
    fn test_fall_damage_applied_and_broadcast() {
        let fixture = Fixture::new();
        let link = RecordingLink::new(1, 172);
        let observer_link = RecordingLink::new(2, 172);
        let mover = fixture.spawn(&link, 100, 100);
        fixture.spawn(&observer_link, 200, 200);

        let mut landing = update(CAMELOT_HILLS, 100, 100, 50, 0);
        landing.fall_data = FALL_LANDED | 1000;
        let outcome = fixture.process(&mover, input(landing, 172), 1000);

        // (1000 - 401) / 6 = 99%
        assert_eq!(outcome.fall_damage, 989);
        let state = mover.state.lock();
        assert_eq!(state.health, 11);
        assert_eq!(state.endurance, 1);
        drop(state);
        assert!(link.opcodes().contains(&ServerOpcode::CombatAnimation.as_u8()));
        assert!(observer_link.opcodes().contains(&ServerOpcode::CombatAnimation.as_u8()));
    }

    #[test]
    fn test_safe_fall_and_swimming_prevent_damage() {
        let fixture = Fixture::new();
        let link = RecordingLink::new(1, 172);
        let mover = fixture.spawn(&link, 100, 100);
        mover.state.lock().safe_fall_level = 6;

        let mut landing = update(CAMELOT_HILLS, 100, 100, 50, 0);
        landing.fall_data = FALL_LANDED | 1000;
        assert_eq!(fixture.process(&mover, input(landing, 172), 1000).fall_damage, 0);

        mover.state.lock().safe_fall_level = 0;
        landing.speed_data = 1 << 10;
        assert_eq!(fixture.process(&mover, input(landing, 172), 2000).fall_damage, 0);
    }

    #[test]
    fn test_unknown_zone_and_floor_go_to_bind() {
        let fixture = Fixture::new();
        let link = RecordingLink::new(1, 172);
        let mover = fixture.spawn(&link, 100, 100);
        let bind = mover.state.lock().bind;

        fixture.process(&mover, input(update(CAMELOT_HILLS, 4000, 100, 50, 0), 172), 1000);
        let outcome = fixture.process(&mover, input(update(99, 100, 100, 50, 0), 172), 2000);
        assert_eq!(outcome.rejection, Some(Rejection::UnknownZone(99)));
        assert!(outcome.moved_to_bind);
        assert_eq!(mover.state.lock().position, bind);

        let outcome = fixture.process(&mover, input(update(CAMELOT_HILLS, 100, 100, 0, 0), 172), 3000);
        assert_eq!(outcome.rejection, Some(Rejection::FellThroughFloor));

        let outcome = fixture.process(&mover, input(update(10, 100, 100, 50, 0), 172), 4000);
        assert_eq!(outcome.rejection, Some(Rejection::ForeignZone(ZoneId::new(10))));
        fixture.region().spatial.check_consistency().unwrap();
    }

    #[test]
    fn test_zone_change_notifies_mover() {
        let fixture = Fixture::new();
        let link = RecordingLink::new(1, 172);
        let mover = fixture.spawn(&link, 100, 100);

        let outcome = fixture.process(&mover, input(update(1, 65000, 100, 50, 0), 172), 1000);
        assert!(outcome.zone_changed);
        assert!(outcome.transition.unwrap().zone_changed());
        let opcodes = link.opcodes();
        assert_eq!(opcodes[0], ServerOpcode::PositionAndObjectId.as_u8());
        assert_eq!(opcodes[1], ServerOpcode::Message.as_u8());

        link.clear();
        let outcome = fixture.process(&mover, input(update(1, 65010, 100, 50, 0), 172), 2000);
        assert!(!outcome.zone_changed);
        assert!(link.frames().is_empty());
    }

    #[test]
    fn test_random_updates_keep_index_consistent() {
        use crate::zone::SUBZONE_SIZE;
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let fixture = Fixture::new();
        let mut rng = StdRng::seed_from_u64(0xCA3E107);
        let movers: Vec<_> = (1..=8u16)
            .map(|id| {
                let link = RecordingLink::new(id, if id % 2 == 0 { 168 } else { 172 });
                fixture.spawn(&link, id as i32 * 700, id as i32 * 900)
            })
            .collect();

        let near_edge = |rng: &mut StdRng| -> u16 {
            let edge = rng.gen_range(0..=32) * SUBZONE_SIZE + rng.gen_range(-2..=2);
            edge.clamp(0, 65535) as u16
        };
        let mut now = 1000;
        for step in 0..3000 {
            let mover = &movers[rng.gen_range(0..movers.len())];
            let zone = match rng.gen_range(0..40) {
                0 => 10,
                1 => 99,
                n if n < 20 => 1,
                _ => CAMELOT_HILLS,
            };
            let (x, y) = if rng.gen_bool(0.7) {
                (near_edge(&mut rng), near_edge(&mut rng))
            } else {
                (rng.gen(), rng.gen())
            };
            let z = if rng.gen_ratio(1, 100) { 0 } else { rng.gen_range(1..200) };
            let version = if rng.gen_bool(0.5) { 168 } else { 172 };
            now += rng.gen_range(1..500);

            fixture.process(mover, input(update(zone, x, y, z, rng.gen_range(0..400)), version), now);

            let region = fixture.region();
            if let Err(e) = region.spatial.check_consistency() {
                panic!("step {}: {}", step, e);
            }
        }

        let region = fixture.region();
        for mover in &movers {
            let state = mover.state.lock();
            assert_eq!(region.spatial.sub_zone_for(state.position.point), state.sub_zone);
        }
    }

    #[derive(Default)]
    struct AreaLog {
        events: Mutex<Vec<String>>,
    }

    impl GameplayHooks for AreaLog {
        fn on_area_enter(&self, _actor: &Actor, area: &Area) {
            self.events.lock().push(format!("enter {}", area.description));
        }

        fn on_area_leave(&self, _actor: &Actor, area: &Area) {
            self.events.lock().push(format!("leave {}", area.description));
        }
    }

    #[test]
    fn test_area_events_are_throttled() {
        let log = Arc::new(AreaLog::default());
        let fixture = Fixture::with_hooks(log.clone());
        let link = RecordingLink::new(1, 172);
        let mover = fixture.spawn(&link, 100, 100);

        // Inside the town square
        let outcome = fixture.process(&mover, input(update(CAMELOT_HILLS, 100, 100, 50, 0), 172), 1000);
        assert_eq!(outcome.areas.entered.len(), 1);

        // Outside, but still inside the throttle window
        let outcome = fixture.process(&mover, input(update(CAMELOT_HILLS, 5000, 100, 50, 0), 172), 2000);
        assert!(outcome.areas.is_empty());

        let outcome = fixture.process(&mover, input(update(CAMELOT_HILLS, 5000, 100, 50, 0), 172), 3500);
        assert_eq!(outcome.areas.left.len(), 1);
        assert_eq!(*log.events.lock(), vec!["enter Cotswold", "leave Cotswold"]);
    }

    #[test]
    fn test_ride_patch_on_rebroadcast() {
        let fixture = Fixture::new();
        let mover_link = RecordingLink::new(1, 172);
        let observer_link = RecordingLink::new(2, 172);
        let mover = fixture.spawn(&mover_link, 100, 100);
        fixture.spawn(&observer_link, 200, 200);
        mover.state.lock().steed = Some(Steed {
            object_id: ActorId::new(0x0102),
            max_speed: 400,
            rider_slot: 2,
        });

        fixture.process(&mover, input(update(CAMELOT_HILLS, 110, 100, 50, 0), 172), 1000);
        let frame = &observer_link.frames()[0];
        let body = &frame[OUT_HEADER_SIZE..];
        assert_eq!(body[2], 0x18);
        assert_eq!(&body[12..16], &[0x01, 0x02, 0, 2]);
    }
}
