//! Core type definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Session ID (16-bit, allocated per connection, never 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u16);

impl SessionId {
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u16 {
        self.0
    }
}

impl From<u16> for SessionId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Actor (object) ID, also the object id sent on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub u16);

impl ActorId {
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u16 {
        self.0
    }
}

impl From<u16> for ActorId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor:{}", self.0)
    }
}

/// Region ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionId(pub u16);

impl RegionId {
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u16 {
        self.0
    }
}

impl From<u16> for RegionId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}

/// Zone ID (global across regions, as clients address zones directly)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneId(pub u16);

impl ZoneId {
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u16 {
        self.0
    }
}

impl From<u16> for ZoneId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}

/// Area ID (unique within a region)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AreaId(pub u32);

impl AreaId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

/// Object type buckets kept per sub-zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    Item = 0,
    Npc = 1,
    Player = 2,
    Door = 3,
}

impl ObjectType {
    pub const COUNT: usize = 4;

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Item),
            1 => Some(Self::Npc),
            2 => Some(Self::Player),
            3 => Some(Self::Door),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Item => "item",
            Self::Npc => "npc",
            Self::Player => "player",
            Self::Door => "door",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_type_roundtrip() {
        for raw in 0..ObjectType::COUNT as u8 {
            let ty = ObjectType::from_u8(raw).unwrap();
            assert_eq!(ty.index(), raw as usize);
        }
        assert!(ObjectType::from_u8(4).is_none());
    }

    #[test]
    fn test_id_display() {
        assert_eq!(SessionId::new(7).to_string(), "#7");
        assert_eq!(ActorId::from(12).to_string(), "actor:12");
    }
}
