//! Zone geometry and the sub-zone grid
//!
//! A zone is a rectangle of at most 65536 x 65536 units cut into a 32 x 32
//! grid of 2048-unit sub-zones. Sub-zone indexes are `(row << 5) | column`.

use realmd_config::ZoneSpec;
use realmd_core::{Point3D, RegionId, ZoneId};

use crate::error::{Result, WorldError};

/// Largest zone side
pub const MAX_ZONE_SIZE: i32 = 65536;
/// Sub-zones per zone side
pub const SUBZONES_PER_SIDE: i32 = 32;
/// log2 of the sub-zone side length
pub const SUBZONE_SHIFT: u32 = 11;
pub const SUBZONE_SIZE: i32 = 1 << SUBZONE_SHIFT;
const ROW_SHIFT: u32 = 5;

/// Address of one sub-zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubZoneRef {
    pub zone: ZoneId,
    pub index: u16,
}

/// Axis-aligned rectangle, `max` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl Rect {
    /// Squared distance from `point` to the closest point of the rectangle
    pub fn square_distance_to(&self, point: Point3D) -> i64 {
        let dx = if point.x < self.min_x {
            (self.min_x - point.x) as i64
        } else if point.x >= self.max_x {
            (point.x - (self.max_x - 1)) as i64
        } else {
            0
        };
        let dy = if point.y < self.min_y {
            (self.min_y - point.y) as i64
        } else if point.y >= self.max_y {
            (point.y - (self.max_y - 1)) as i64
        } else {
            0
        };
        dx * dx + dy * dy
    }

    pub fn intersects_circle(&self, center: Point3D, radius: u32) -> bool {
        let r = radius as i64;
        self.square_distance_to(center) <= r * r
    }
}

/// Rectangular partition of a region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    pub id: ZoneId,
    pub region: RegionId,
    pub x_offset: i32,
    pub y_offset: i32,
    pub width: i32,
    pub height: i32,
    pub description: String,
}

impl Zone {
    pub fn from_spec(spec: &ZoneSpec) -> Result<Self> {
        if spec.width <= 0 || spec.height <= 0 || spec.width > MAX_ZONE_SIZE || spec.height > MAX_ZONE_SIZE {
            return Err(WorldError::InvalidLayout(format!(
                "zone {} must be between 1 and {} units per side",
                spec.id, MAX_ZONE_SIZE
            )));
        }
        Ok(Self {
            id: ZoneId::new(spec.id),
            region: RegionId::new(spec.region),
            x_offset: spec.x_offset,
            y_offset: spec.y_offset,
            width: spec.width,
            height: spec.height,
            description: spec.description.clone(),
        })
    }

    pub fn bounds(&self) -> Rect {
        Rect {
            min_x: self.x_offset,
            min_y: self.y_offset,
            max_x: self.x_offset + self.width,
            max_y: self.y_offset + self.height,
        }
    }

    pub fn contains(&self, point: Point3D) -> bool {
        self.sub_zone_index(point).is_some()
    }

    /// Grid index of the sub-zone holding `point`, `None` outside the zone
    pub fn sub_zone_index(&self, point: Point3D) -> Option<u16> {
        let x_diff = point.x - self.x_offset;
        let y_diff = point.y - self.y_offset;
        if x_diff < 0 || x_diff >= self.width || y_diff < 0 || y_diff >= self.height {
            return None;
        }
        let column = x_diff >> SUBZONE_SHIFT;
        let row = y_diff >> SUBZONE_SHIFT;
        Some(((row << ROW_SHIFT) | column) as u16)
    }

    pub fn sub_zone_for(&self, point: Point3D) -> Option<SubZoneRef> {
        self.sub_zone_index(point).map(|index| SubZoneRef { zone: self.id, index })
    }

    /// World rectangle covered by one sub-zone, clipped to the zone
    pub fn sub_zone_bounds(&self, index: u16) -> Rect {
        let column = (index as i32) & (SUBZONES_PER_SIDE - 1);
        let row = (index as i32) >> ROW_SHIFT;
        let min_x = self.x_offset + (column << SUBZONE_SHIFT);
        let min_y = self.y_offset + (row << SUBZONE_SHIFT);
        Rect {
            min_x,
            min_y,
            max_x: (min_x + SUBZONE_SIZE).min(self.x_offset + self.width),
            max_y: (min_y + SUBZONE_SIZE).min(self.y_offset + self.height),
        }
    }

    /// Sub-zones whose rectangle intersects the circle
    pub fn sub_zones_in_radius(&self, center: Point3D, radius: u32) -> Vec<u16> {
        let r = radius as i32;
        let columns = self.grid_span(center.x - self.x_offset, r, self.width);
        let rows = self.grid_span(center.y - self.y_offset, r, self.height);
        let (Some((c0, c1)), Some((r0, r1))) = (columns, rows) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for row in r0..=r1 {
            for column in c0..=c1 {
                let index = ((row << ROW_SHIFT) | column) as u16;
                if self.sub_zone_bounds(index).intersects_circle(center, radius) {
                    out.push(index);
                }
            }
        }
        out
    }

    fn grid_span(&self, offset: i32, radius: i32, extent: i32) -> Option<(i32, i32)> {
        let lo = offset.saturating_sub(radius).max(0);
        let hi = offset.saturating_add(radius).min(extent - 1);
        if lo > hi {
            return None;
        }
        Some((lo >> SUBZONE_SHIFT, hi >> SUBZONE_SHIFT))
    }
}
