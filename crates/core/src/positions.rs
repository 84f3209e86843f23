//! Position types for world objects

use crate::RegionId;
use serde::{Deserialize, Serialize};

/// Absolute world coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point3D {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Point3D {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Planar distance, ignoring Z
    pub fn distance_2d(self, other: Point3D) -> i32 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        (dx * dx + dy * dy).sqrt() as i32
    }

    /// Squared distance; Z is ignored when `check_z` is false
    pub fn square_distance(self, other: Point3D, check_z: bool) -> i64 {
        let dx = (self.x - other.x) as i64;
        let dy = (self.y - other.y) as i64;
        let mut sq = dx * dx + dy * dy;
        if check_z {
            let dz = (self.z - other.z) as i64;
            sq += dz * dz;
        }
        sq
    }

    /// Whether `other` lies within `radius`, compared on squares
    pub fn is_within(self, other: Point3D, radius: u32, check_z: bool) -> bool {
        let r = radius as i64;
        self.square_distance(other, check_z) <= r * r
    }
}

/// Full placement of an actor in the world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub region: RegionId,
    pub point: Point3D,
    /// 0..4096, one full turn
    pub heading: u16,
}

impl Position {
    pub const fn new(region: RegionId, x: i32, y: i32, z: i32, heading: u16) -> Self {
        Self {
            region,
            point: Point3D::new(x, y, z),
            heading,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_calculation() {
        let a = Point3D::new(0, 0, 0);
        let b = Point3D::new(3, 4, 100);
        assert_eq!(a.distance_2d(b), 5);
        assert_eq!(a.square_distance(b, false), 25);
        assert_eq!(a.square_distance(b, true), 10025);
    }

    #[test]
    fn test_within_radius() {
        let a = Point3D::new(1000, 1000, 0);
        assert!(a.is_within(Point3D::new(1000, 1100, 0), 100, false));
        assert!(!a.is_within(Point3D::new(1000, 1101, 0), 100, false));
        assert!(!a.is_within(Point3D::new(1000, 1000, 200), 100, true));
    }
}
