//! # Spatial Index
//!
//! Region-wide index of actors by sub-zone.
//!
//! # Invariants
//! - An actor is a member of at most one sub-zone bucket.
//! - The bucket, the cached point kept here, and the actor's own
//!   `position`/`sub_zone` always agree: they are changed together under the
//!   index write lock, so a concurrent radius query sees the actor either in
//!   its old bucket at the old point or in its new bucket at the new point.
//!
//! # Lock Order
//! Index lock first, then the actor's state mutex. Radius queries read only
//! the index and never touch actor state.

use parking_lot::RwLock;
use realmd_core::{ActorId, ObjectType, Point3D, Position, RegionId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::trace;

use crate::actor::Actor;
use crate::error::{Result, WorldError};
use crate::zone::{SubZoneRef, Zone};

/// Result of moving an actor inside the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Bucket before the move, `None` when the actor was not indexed
    pub from: Option<SubZoneRef>,
    pub to: SubZoneRef,
}

impl Transition {
    /// Whether the move left one bucket and entered another
    pub fn crossed(&self) -> bool {
        self.from != Some(self.to)
    }

    pub fn zone_changed(&self) -> bool {
        self.from.map(|from| from.zone) != Some(self.to.zone)
    }
}

#[derive(Default)]
struct Bucket {
    members: [HashSet<ActorId>; ObjectType::COUNT],
}

impl Bucket {
    fn is_empty(&self) -> bool {
        self.members.iter().all(HashSet::is_empty)
    }
}

struct Member {
    actor: Arc<Actor>,
    sub_zone: SubZoneRef,
    point: Point3D,
}

#[derive(Default)]
struct IndexState {
    buckets: HashMap<SubZoneRef, Bucket>,
    members: HashMap<ActorId, Member>,
}

impl IndexState {
    fn unlink(&mut self, id: ActorId, object_type: ObjectType, sub_zone: SubZoneRef) {
        if let Some(bucket) = self.buckets.get_mut(&sub_zone) {
            bucket.members[object_type.index()].remove(&id);
            if bucket.is_empty() {
                self.buckets.remove(&sub_zone);
            }
        }
    }

    fn link(&mut self, id: ActorId, object_type: ObjectType, sub_zone: SubZoneRef) {
        self.buckets.entry(sub_zone).or_default().members[object_type.index()].insert(id);
    }
}

/// Sub-zone buckets of one region
pub struct SpatialIndex {
    region: RegionId,
    zones: Vec<Arc<Zone>>,
    inner: RwLock<IndexState>,
}

impl SpatialIndex {
    pub fn new(region: RegionId, zones: Vec<Arc<Zone>>) -> Self {
        Self {
            region,
            zones,
            inner: RwLock::new(IndexState::default()),
        }
    }

    pub fn region(&self) -> RegionId {
        self.region
    }

    pub fn zones(&self) -> &[Arc<Zone>] {
        &self.zones
    }

    pub fn zone_at(&self, point: Point3D) -> Option<&Arc<Zone>> {
        self.zones.iter().find(|zone| zone.contains(point))
    }

    /// Sub-zone holding `point`, `None` outside every zone of the region
    pub fn sub_zone_for(&self, point: Point3D) -> Option<SubZoneRef> {
        self.zones.iter().find_map(|zone| zone.sub_zone_for(point))
    }

    fn resolve(&self, point: Point3D) -> Result<SubZoneRef> {
        self.sub_zone_for(point).ok_or(WorldError::NoSubZone {
            region: self.region.get(),
            x: point.x,
            y: point.y,
        })
    }

    /// Register `actor` at its current position
    ///
    /// # Errors
    /// `AlreadyRegistered` when the actor is indexed already, `NoSubZone`
    /// when its position lies outside every zone.
    pub fn enter(&self, actor: &Arc<Actor>) -> Result<SubZoneRef> {
        let mut inner = self.inner.write();
        if inner.members.contains_key(&actor.id) {
            return Err(WorldError::AlreadyRegistered(actor.id));
        }
        let mut state = actor.state.lock();
        let point = state.position.point;
        let sub_zone = self.resolve(point)?;

        inner.link(actor.id, actor.object_type(), sub_zone);
        inner.members.insert(
            actor.id,
            Member {
                actor: actor.clone(),
                sub_zone,
                point,
            },
        );
        state.sub_zone = Some(sub_zone);
        state.zone = Some(sub_zone.zone);
        trace!("{} entered {:?}", actor.id, sub_zone);
        Ok(sub_zone)
    }

    /// Unregister an actor; returns the bucket it left
    pub fn leave(&self, id: ActorId) -> Option<SubZoneRef> {
        let mut inner = self.inner.write();
        let member = inner.members.remove(&id)?;
        inner.unlink(id, member.actor.object_type(), member.sub_zone);
        member.actor.state.lock().sub_zone = None;
        trace!("{} left {:?}", id, member.sub_zone);
        Some(member.sub_zone)
    }

    /// Move an actor to `position`, switching buckets when needed
    ///
    /// # Purpose
    /// Leave, enter and the actor's cached position update happen in one
    /// write-locked step. An actor not yet indexed is entered.
    ///
    /// # Errors
    /// `NoSubZone` when `position` is outside every zone; nothing changes.
    pub fn relocate(&self, actor: &Arc<Actor>, position: Position) -> Result<Transition> {
        let to = self.resolve(position.point)?;
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let object_type = actor.object_type();

        let from = match inner.members.get_mut(&actor.id) {
            Some(member) => {
                let from = member.sub_zone;
                member.sub_zone = to;
                member.point = position.point;
                Some(from)
            }
            None => {
                inner.members.insert(
                    actor.id,
                    Member {
                        actor: actor.clone(),
                        sub_zone: to,
                        point: position.point,
                    },
                );
                None
            }
        };
        if from != Some(to) {
            if let Some(from) = from {
                inner.unlink(actor.id, object_type, from);
            }
            inner.link(actor.id, object_type, to);
        }

        let mut state = actor.state.lock();
        state.position = position;
        state.sub_zone = Some(to);
        state.zone = Some(to.zone);
        Ok(Transition { from, to })
    }

    /// Actors of `object_type` (all types when `None`) within `radius` of `center`
    pub fn query_radius(&self, center: Point3D, radius: u32, object_type: Option<ObjectType>) -> Vec<Arc<Actor>> {
        let inner = self.inner.read();
        let mut found = Vec::new();
        for zone in &self.zones {
            if !zone.bounds().intersects_circle(center, radius) {
                continue;
            }
            for index in zone.sub_zones_in_radius(center, radius) {
                let Some(bucket) = inner.buckets.get(&SubZoneRef { zone: zone.id, index }) else {
                    continue;
                };
                for (slot, ids) in bucket.members.iter().enumerate() {
                    if object_type.is_some_and(|t| t.index() != slot) {
                        continue;
                    }
                    for id in ids {
                        if let Some(member) = inner.members.get(id) {
                            if member.point.is_within(center, radius, false) {
                                found.push(member.actor.clone());
                            }
                        }
                    }
                }
            }
        }
        found
    }

    pub fn contains(&self, id: ActorId) -> bool {
        self.inner.read().members.contains_key(&id)
    }

    pub fn sub_zone_of(&self, id: ActorId) -> Option<SubZoneRef> {
        self.inner.read().members.get(&id).map(|m| m.sub_zone)
    }

    /// Members of one bucket
    pub fn members_of(&self, sub_zone: SubZoneRef) -> Vec<ActorId> {
        let inner = self.inner.read();
        inner
            .buckets
            .get(&sub_zone)
            .map(|bucket| bucket.members.iter().flatten().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Verify bucket membership against cached and actor positions
    ///
    /// # Returns
    /// A description of the first inconsistency found.
    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        let inner = self.inner.read();
        let mut seen = HashSet::new();
        for (sub_zone, bucket) in &inner.buckets {
            for id in bucket.members.iter().flatten() {
                if !seen.insert(*id) {
                    return Err(format!("{} is in more than one bucket", id));
                }
                match inner.members.get(id) {
                    Some(member) if member.sub_zone == *sub_zone => {}
                    _ => return Err(format!("{} is in {:?} without a matching member entry", id, sub_zone)),
                }
            }
        }
        for (id, member) in &inner.members {
            if !seen.contains(id) {
                return Err(format!("{} is indexed but in no bucket", id));
            }
            if self.sub_zone_for(member.point) != Some(member.sub_zone) {
                return Err(format!("{} cached at {:?} outside {:?}", id, member.point, member.sub_zone));
            }
            let state = member.actor.state.lock();
            if state.position.point != member.point || state.sub_zone != Some(member.sub_zone) {
                return Err(format!("{} disagrees with its own position", id));
            }
        }
        Ok(())
    }
}
