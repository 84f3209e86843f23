//! Error types for the world crate

use realmd_core::{ActorId, RealmError, RegionId, ZoneId};

/// World-specific error types
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// The position lies outside every zone / sub-zone
    #[error("No sub-zone at ({x}, {y}) in region {region}")]
    NoSubZone { region: u16, x: i32, y: i32 },

    #[error("Unknown zone {0:?}")]
    UnknownZone(ZoneId),

    #[error("Unknown region {0:?}")]
    UnknownRegion(RegionId),

    #[error("Unknown actor {0}")]
    UnknownActor(ActorId),

    /// Actor already registered in the spatial index
    #[error("Actor {0} is already registered")]
    AlreadyRegistered(ActorId),

    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Storage file error: {0}")]
    StorageFile(#[from] std::io::Error),

    #[error("Storage format error: {0}")]
    StorageFormat(#[from] serde_json::Error),
}

impl From<WorldError> for RealmError {
    fn from(err: WorldError) -> Self {
        match err {
            WorldError::NoSubZone { .. } | WorldError::UnknownZone(_) => {
                RealmError::SpatialInconsistency(err.to_string())
            }
            WorldError::UnknownActor(_) | WorldError::UnknownRegion(_) => {
                RealmError::NotFound(err.to_string())
            }
            WorldError::InvalidLayout(_) => RealmError::Config(err.to_string()),
            WorldError::Persistence(_) | WorldError::StorageFile(_) | WorldError::StorageFormat(_) => {
                RealmError::Persistence(err.to_string())
            }
            WorldError::AlreadyRegistered(_) => RealmError::InvalidData(err.to_string()),
        }
    }
}

/// Result type for world operations
pub type Result<T> = std::result::Result<T, WorldError>;
