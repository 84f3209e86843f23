//! realmd core - shared types, identifiers and the error taxonomy

mod error;
mod types;
mod version;
mod idgen;
mod positions;

pub use error::*;
pub use types::*;
pub use version::*;
pub use idgen::*;
pub use positions::*;
