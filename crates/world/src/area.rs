//! Areas: named shapes inside a region that actors enter and leave
//!
//! Membership is recomputed by the movement validator at most once per
//! throttle window. [`diff_membership`] turns two membership snapshots into
//! enter/leave events.

use realmd_config::{AreaShapeSpec, AreaSpec};
use realmd_core::{AreaId, Point3D, RegionId};

use crate::error::{Result, WorldError};
use crate::zone::Zone;

#[derive(Debug, Clone, PartialEq)]
pub enum AreaShape {
    /// Inclusive rectangle
    Square { x: i32, y: i32, width: i32, height: i32 },
    Circle { center: Point3D, radius: i32, check_z: bool },
    /// Vertices plus a bounding radius around `center` for zone tests
    Polygon { center: Point3D, radius: i32, points: Vec<(i32, i32)> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Area {
    pub id: AreaId,
    pub region: RegionId,
    pub description: String,
    pub shape: AreaShape,
}

impl Area {
    pub fn from_spec(id: AreaId, spec: &AreaSpec) -> Result<Self> {
        let shape = match &spec.shape {
            AreaShapeSpec::Square { x, y, width, height } => AreaShape::Square {
                x: *x,
                y: *y,
                width: *width,
                height: *height,
            },
            AreaShapeSpec::Circle { x, y, z, radius, check_z } => AreaShape::Circle {
                center: Point3D::new(*x, *y, *z),
                radius: *radius,
                check_z: *check_z,
            },
            AreaShapeSpec::Polygon { x, y, radius, points } => AreaShape::Polygon {
                center: Point3D::new(*x, *y, 0),
                radius: *radius,
                points: parse_points(points)?,
            },
        };
        Ok(Self {
            id,
            region: RegionId::new(spec.region),
            description: spec.description.clone(),
            shape,
        })
    }

    pub fn contains(&self, point: Point3D) -> bool {
        match &self.shape {
            AreaShape::Square { x, y, width, height } => {
                point.x >= *x && point.x <= x + width && point.y >= *y && point.y <= y + height
            }
            AreaShape::Circle { center, radius, check_z } => {
                center.is_within(point, (*radius).max(0) as u32, *check_z)
            }
            AreaShape::Polygon { points, .. } => polygon_contains(points, point),
        }
    }

    /// Whether any part of the area may lie inside `zone`
    pub fn intersects_zone(&self, zone: &Zone) -> bool {
        let bounds = zone.bounds();
        match &self.shape {
            AreaShape::Square { x, y, width, height } => {
                *x < bounds.max_x && x + width >= bounds.min_x && *y < bounds.max_y && y + height >= bounds.min_y
            }
            AreaShape::Circle { center, radius, .. } => {
                bounds.intersects_circle(*center, (*radius).max(0) as u32)
            }
            AreaShape::Polygon { center, radius, .. } => {
                center.x + radius >= bounds.min_x
                    && center.x - radius < bounds.max_x
                    && center.y + radius >= bounds.min_y
                    && center.y - radius < bounds.max_y
            }
        }
    }
}

/// Parse `"x;y|x;y|..."`, dropping duplicate vertices
pub fn parse_points(raw: &str) -> Result<Vec<(i32, i32)>> {
    let mut points = Vec::new();
    for pair in raw.split('|').map(str::trim).filter(|p| !p.is_empty()) {
        let mut coords = pair.split(';');
        let parsed = match (coords.next(), coords.next(), coords.next()) {
            (Some(x), Some(y), None) => x.trim().parse::<i32>().ok().zip(y.trim().parse::<i32>().ok()),
            _ => None,
        };
        let point = parsed.ok_or_else(|| WorldError::InvalidLayout(format!("bad polygon point '{}'", pair)))?;
        if !points.contains(&point) {
            points.push(point);
        }
    }
    Ok(points)
}

/// Even-odd ray casting; polygons with fewer than 3 vertices contain nothing
fn polygon_contains(points: &[(i32, i32)], point: Point3D) -> bool {
    if points.len() < 3 {
        return false;
    }
    let (px, py) = (point.x as i64, point.y as i64);
    let mut inside = false;
    let mut old = points[points.len() - 1];
    for &new in points {
        let (p1, p2) = if new.0 > old.0 { (old, new) } else { (new, old) };
        let crosses = ((new.0 as i64) < px) == (px <= old.0 as i64);
        if crosses
            && (py - p1.1 as i64) * (p2.0 as i64 - p1.0 as i64)
                < (p2.1 as i64 - p1.1 as i64) * (px - p1.0 as i64)
        {
            inside = !inside;
        }
        old = new;
    }
    inside
}

/// Areas entered and left between two membership snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AreaEvents {
    pub entered: Vec<AreaId>,
    pub left: Vec<AreaId>,
}

impl AreaEvents {
    pub fn is_empty(&self) -> bool {
        self.entered.is_empty() && self.left.is_empty()
    }
}

pub fn diff_membership(old: &[AreaId], new: &[AreaId]) -> AreaEvents {
    AreaEvents {
        left: old.iter().filter(|id| !new.contains(id)).copied().collect(),
        entered: new.iter().filter(|id| !old.contains(id)).copied().collect(),
    }
}
