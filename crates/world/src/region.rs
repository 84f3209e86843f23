//! Regions: top-level world partitions
//!
//! A region owns its zones, its areas, the spatial index over both, and the
//! scheduler that serializes every mutation of actors living in it. The
//! scheduler's clock is the region clock used for movement and area
//! throttling.

use realmd_core::{AreaId, Point3D, RegionId, ZoneId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::area::Area;
use crate::scheduler::Scheduler;
use crate::spatial::SpatialIndex;
use crate::world::World;
use crate::zone::Zone;

pub struct Region {
    pub id: RegionId,
    areas: Vec<Arc<Area>>,
    /// Areas that may overlap each zone
    zone_areas: HashMap<ZoneId, Vec<Arc<Area>>>,
    pub spatial: SpatialIndex,
    pub scheduler: Scheduler,
}

impl Region {
    pub fn new(id: RegionId, zones: Vec<Arc<Zone>>, areas: Vec<Area>) -> Self {
        let areas: Vec<Arc<Area>> = areas.into_iter().map(Arc::new).collect();
        let zone_areas = zones
            .iter()
            .map(|zone| {
                let overlapping = areas.iter().filter(|a| a.intersects_zone(zone)).cloned().collect();
                (zone.id, overlapping)
            })
            .collect();

        Self {
            id,
            areas,
            zone_areas,
            spatial: SpatialIndex::new(id, zones),
            scheduler: Scheduler::new(id),
        }
    }

    /// Region clock in milliseconds
    pub fn now(&self) -> u64 {
        self.scheduler.now()
    }

    pub fn zones(&self) -> &[Arc<Zone>] {
        self.spatial.zones()
    }

    pub fn areas(&self) -> &[Arc<Area>] {
        &self.areas
    }

    pub fn area(&self, id: AreaId) -> Option<&Arc<Area>> {
        self.areas.iter().find(|area| area.id == id)
    }

    /// Areas containing `point`, checking only those cached for `zone`
    pub fn areas_at(&self, zone: ZoneId, point: Point3D) -> Vec<AreaId> {
        self.zone_areas
            .get(&zone)
            .map(|areas| areas.iter().filter(|a| a.contains(point)).map(|a| a.id).collect())
            .unwrap_or_default()
    }

    /// Run the actions due now
    pub fn tick(&self, world: &World) -> usize {
        self.scheduler.run_due(world, self, self.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use realmd_config::{AreaShapeSpec, AreaSpec, ZoneSpec};

    #[test]
    fn test_areas_cached_per_zone() {
        let zones: Vec<_> = [(1u16, 0), (2, 65536)]
            .into_iter()
            .map(|(id, x_offset)| {
                Arc::new(
                    Zone::from_spec(&ZoneSpec {
                        id,
                        region: 1,
                        x_offset,
                        y_offset: 0,
                        width: 65536,
                        height: 65536,
                        description: String::new(),
                    })
                    .unwrap(),
                )
            })
            .collect();
        let town = Area::from_spec(
            AreaId::new(1),
            &AreaSpec {
                region: 1,
                description: "Town".into(),
                shape: AreaShapeSpec::Circle { x: 1000, y: 1000, z: 0, radius: 500, check_z: false },
            },
        )
        .unwrap();
        let region = Region::new(RegionId::new(1), zones, vec![town]);

        assert_eq!(region.areas_at(ZoneId::new(1), Point3D::new(1200, 1000, 0)), vec![AreaId::new(1)]);
        assert!(region.areas_at(ZoneId::new(1), Point3D::new(3000, 1000, 0)).is_empty());
        // Not cached for the far zone even if asked about a matching point
        assert!(region.areas_at(ZoneId::new(2), Point3D::new(1200, 1000, 0)).is_empty());
        assert!(region.area(AreaId::new(1)).is_some());
    }
}
