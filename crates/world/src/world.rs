//! # World
//!
//! Owner of every region, the global zone table, and the actor registry.
//! Passed explicitly to the scheduler, the movement validator and the
//! network layer; there is no global instance.

use dashmap::DashMap;
use realmd_config::{MovementConfig, RealmConfig};
use realmd_core::{ActorId, AreaId, IdGenerator, Position, RegionId, ZoneId};
use realmd_protocol::packet_builder::build_position_and_object_id;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::actor::Actor;
use crate::area::Area;
use crate::collaborators::GameplayHooks;
use crate::error::{Result, WorldError};
use crate::movement::MovementValidator;
use crate::region::Region;
use crate::scheduler::Action;
use crate::zone::Zone;

pub struct World {
    regions: HashMap<RegionId, Arc<Region>>,
    zones: HashMap<ZoneId, Arc<Zone>>,
    actors: DashMap<ActorId, Arc<Actor>>,
    ids: IdGenerator,
    hooks: Arc<dyn GameplayHooks>,
    validator: MovementValidator,
}

impl World {
    /// Build regions, zones and areas from the configured layout
    ///
    /// # Errors
    /// `InvalidLayout` for oversized zones, malformed polygons, or areas in a
    /// region that has no zone.
    pub fn from_config(config: &RealmConfig, hooks: Arc<dyn GameplayHooks>) -> Result<Self> {
        let mut by_region: BTreeMap<RegionId, Vec<Arc<Zone>>> = BTreeMap::new();
        let mut zones = HashMap::new();
        for spec in &config.zones {
            let zone = Arc::new(Zone::from_spec(spec)?);
            by_region.entry(zone.region).or_default().push(zone.clone());
            zones.insert(zone.id, zone);
        }

        let mut areas: HashMap<RegionId, Vec<Area>> = HashMap::new();
        for spec in &config.areas {
            let region = RegionId::new(spec.region);
            if !by_region.contains_key(&region) {
                return Err(WorldError::InvalidLayout(format!(
                    "area '{}' is in region {} which has no zones",
                    spec.description, spec.region
                )));
            }
            let list = areas.entry(region).or_default();
            let id = AreaId::new(list.len() as u32 + 1);
            list.push(Area::from_spec(id, spec)?);
        }

        let regions = by_region
            .into_iter()
            .map(|(id, zones)| {
                let region = Region::new(id, zones, areas.remove(&id).unwrap_or_default());
                (id, Arc::new(region))
            })
            .collect::<HashMap<_, _>>();

        if regions.is_empty() {
            warn!("World has no zones; every position will be rejected");
        }
        info!("World built: {} regions, {} zones", regions.len(), zones.len());

        Ok(Self {
            regions,
            zones,
            actors: DashMap::new(),
            ids: IdGenerator::new(u16::MAX),
            hooks,
            validator: MovementValidator::new(config.movement.clone()),
        })
    }

    pub fn region(&self, id: RegionId) -> Option<&Arc<Region>> {
        self.regions.get(&id)
    }

    pub fn regions(&self) -> impl Iterator<Item = &Arc<Region>> {
        self.regions.values()
    }

    pub fn zone(&self, id: ZoneId) -> Option<&Arc<Zone>> {
        self.zones.get(&id)
    }

    pub fn hooks(&self) -> &Arc<dyn GameplayHooks> {
        &self.hooks
    }

    pub fn validator(&self) -> &MovementValidator {
        &self.validator
    }

    pub fn movement_config(&self) -> &MovementConfig {
        self.validator.config()
    }

    /// Reserve an object id for a new actor
    pub fn allocate_actor_id(&self) -> Option<ActorId> {
        self.ids.acquire().map(ActorId::new)
    }

    /// Register an actor; it enters the spatial index only via [`World::enter_world`]
    pub fn add_actor(&self, actor: Arc<Actor>) {
        self.actors.insert(actor.id, actor);
    }

    pub fn actor(&self, id: ActorId) -> Option<Arc<Actor>> {
        self.actors.get(&id).map(|entry| entry.value().clone())
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    /// Remove an actor from the world
    ///
    /// # Purpose
    /// Invalidates the actor first so every queued action becomes a no-op,
    /// then unregisters it from its spatial index and frees its object id.
    pub fn remove_actor(&self, id: ActorId) -> Option<Arc<Actor>> {
        let (_, actor) = self.actors.remove(&id)?;
        actor.invalidate();
        if let Some(region) = self.region(actor.region()) {
            region.spatial.leave(id);
        }
        self.ids.release(id.get());
        debug!("Removed {} ({})", id, actor.name);
        Some(actor)
    }

    /// Queue `action` on the scheduler of the actor's current region
    pub fn enqueue(&self, actor: &Arc<Actor>, delay_ms: u64, action: Action) -> Result<()> {
        let region_id = actor.region();
        let region = self.region(region_id).ok_or(WorldError::UnknownRegion(region_id))?;
        region.scheduler.enqueue(actor.clone(), delay_ms, action);
        Ok(())
    }

    /// Register `actor` and schedule its entry into the spatial index
    pub fn enter_world(&self, actor: Arc<Actor>) -> Result<()> {
        self.add_actor(actor.clone());
        self.enqueue(&actor, 0, Box::new(|ctx| ctx.world.enter_region(ctx.actor, ctx.region)))
    }

    /// Index the actor in `region` at its cached position
    ///
    /// Runs on `region`'s scheduler. An unresolvable position sends the actor
    /// to its bind point.
    pub fn enter_region(&self, actor: &Arc<Actor>, region: &Region) {
        match region.spatial.enter(actor) {
            Ok(sub_zone) => {
                debug!("{} entered region {} at {:?}", actor.id, region.id.get(), sub_zone);
                {
                    let mut state = actor.state.lock();
                    let point = state.position.point;
                    state.last_locations.push(point);
                    state.max_last_z = point.z;
                }
                self.send_self_position(actor);
            }
            Err(WorldError::AlreadyRegistered(_)) => {
                debug!("{} already indexed in region {}", actor.id, region.id.get());
            }
            Err(e) => {
                let (position, bind) = {
                    let state = actor.state.lock();
                    (state.position, state.bind)
                };
                if position == bind {
                    error!("{} cannot enter region {} even at its bind point: {}", actor.id, region.id.get(), e);
                } else {
                    warn!("{} cannot enter region {}: {}; moving to bind", actor.id, region.id.get(), e);
                    self.move_to_bind(actor);
                }
            }
        }
    }

    /// Teleport an actor to `target`
    ///
    /// # Purpose
    /// Inside one region the index is updated immediately. Across regions the
    /// actor leaves its old index now (firing area leave events) and enters
    /// the new one from the destination region's scheduler.
    ///
    /// # Errors
    /// `UnknownRegion` for an unknown destination, `NoSubZone` when the
    /// target is outside every zone of the current region.
    pub fn move_to(&self, actor: &Arc<Actor>, target: Position) -> Result<()> {
        let current = actor.region();
        if target.region == current {
            let region = self.region(current).ok_or(WorldError::UnknownRegion(current))?;
            region.spatial.relocate(actor, target)?;
            {
                let mut state = actor.state.lock();
                state.last_update_tick = None;
                state.max_last_z = target.point.z;
                state.last_locations.push(target.point);
            }
            self.send_self_position(actor);
            return Ok(());
        }

        let destination = self
            .region(target.region)
            .ok_or(WorldError::UnknownRegion(target.region))?;
        let old_region = self.region(current);
        if let Some(old) = old_region {
            old.spatial.leave(actor.id);
        }
        let left = {
            let mut state = actor.state.lock();
            state.position = target;
            state.zone = None;
            state.last_update_tick = None;
            state.max_last_z = i32::MIN;
            state.area_update_tick = 0;
            std::mem::take(&mut state.areas)
        };
        if let Some(old) = old_region {
            for id in left {
                if let Some(area) = old.area(id) {
                    self.hooks.on_area_leave(actor, area);
                }
            }
        }
        info!("{} moving from region {} to region {}", actor.id, current.get(), target.region.get());
        destination
            .scheduler
            .enqueue(actor.clone(), 0, Box::new(|ctx| ctx.world.enter_region(ctx.actor, ctx.region)));
        Ok(())
    }

    /// Teleport the actor to its bind point, logging instead of failing
    pub fn move_to_bind(&self, actor: &Arc<Actor>) {
        let bind = actor.state.lock().bind;
        if let Err(e) = self.move_to(actor, bind) {
            error!("{} cannot be moved to its bind point: {}", actor.id, e);
        }
    }

    /// Send the actor's own client its authoritative position
    pub fn send_self_position(&self, actor: &Actor) {
        let frame = {
            let state = actor.state.lock();
            build_position_and_object_id(
                actor.id,
                state.position.point,
                state.position.heading,
                state.zone.unwrap_or(ZoneId::new(0)),
                state.position.region.get(),
                state.diving,
            )
        };
        actor.send(frame);
    }

    /// Start one ticking task per region
    ///
    /// # Returns
    /// Handles of the spawned tasks; abort them to stop the schedulers.
    pub fn spawn_schedulers(self: &Arc<Self>, tick: Duration) -> Vec<JoinHandle<()>> {
        self.regions
            .values()
            .map(|region| {
                let world = Arc::clone(self);
                let region = Arc::clone(region);
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(tick);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    debug!("Scheduler for region {} started", region.id.get());
                    loop {
                        interval.tick().await;
                        region.tick(&world);
                    }
                })
            })
            .collect()
    }
}
