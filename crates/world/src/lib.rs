//! # realmd World Layer
//!
//! Authoritative world state and everything that mutates it.
//!
//! ## Modules
//!
//! - `zone` - zones and their sub-zone grid
//! - `area` - named shapes with enter/leave events
//! - `actor` - actors, their mutable state and capability traits
//! - `spatial` - per-region sub-zone index with radius queries
//! - `scheduler` - per-region deferred action queues
//! - `movement` - position update validation and rebroadcast
//! - `region` - region = zones + areas + index + scheduler
//! - `world` - region table and actor registry
//! - `collaborators` - persistence and gameplay hooks

pub mod actor;
pub mod area;
pub mod collaborators;
pub mod error;
pub mod movement;
pub mod region;
pub mod scheduler;
pub mod spatial;
pub mod world;
pub mod zone;

#[cfg(test)]
mod testkit;

pub use actor::{Actor, ActorKind, ActorState, ClientLink, Damageable, Interactable, Movable, Steed};
pub use area::{Area, AreaEvents, AreaShape};
pub use collaborators::{
    AbilityCommand, ActorRecord, AuthOutcome, GameplayHooks, JsonFilePersistence, MemoryPersistence, NoopHooks,
    Persistence,
};
pub use error::{Result, WorldError};
pub use movement::{MovementInput, MovementOutcome, MovementValidator, Rejection};
pub use region::Region;
pub use scheduler::{Action, ActionContext, Scheduler, SchedulerCounts};
pub use spatial::{SpatialIndex, Transition};
pub use world::World;
pub use zone::{SubZoneRef, Zone};
