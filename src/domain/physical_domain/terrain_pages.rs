use nalgebra::{DMatrix, Unit};

use crate::domain::terrain::TerrainMod;
use super::*;

impl PhysicalDomain {
    /// Reacts to a property change on the containing entity.
    pub fn entity_property_applied(&mut self, name: &str) {
        match name {
            "friction" => self.apply_terrain_friction(),
            "friction_roll" => {
                debug!(domain = self.domain_id, "rolling friction has no effect on terrain");
            }
            "friction_spin" => {
                if let Some(value) = self.domain_entity.borrow().property_f32("friction_spin") {
                    Self::warn_spinning_friction(self.domain_id, value);
                }
            }
            "terrain" => self.load_terrain(),
            "bbox" => {
                for handle in std::mem::take(&mut self.border_planes) {
                    self.dynamics.remove_collider(handle);
                }
                self.create_domain_borders();
            }
            _ => {}
        }
    }

    /// Mutable access to the terrain model. Call [`Self::refresh_terrain`] with
    /// the edited areas afterwards.
    pub fn terrain_mut(&mut self) -> Option<&mut Terrain> {
        self.terrain.as_mut()
    }

    /// Schedules the terrain pages covering `areas` for rebuild on the next tick.
    pub fn refresh_terrain(&mut self, areas: &[Area]) {
        self.dirty_terrain_areas.extend_from_slice(areas);
    }

    /// Six planes enclosing the containing entity's bbox.
    pub(super) fn create_domain_borders(&mut self) {
        let Some(bbox) = self.domain_entity.borrow().location.valid_bbox() else {
            return;
        };
        let (low, high) = (bbox.low, bbox.high);
        let planes = [
            (Vector3::y(), Vector3::new(0.0, low.y, 0.0)),
            (-Vector3::y(), Vector3::new(0.0, high.y, 0.0)),
            (Vector3::x(), Vector3::new(low.x, 0.0, 0.0)),
            (-Vector3::x(), Vector3::new(high.x, 0.0, 0.0)),
            (Vector3::z(), Vector3::new(0.0, 0.0, low.z)),
            (-Vector3::z(), Vector3::new(0.0, 0.0, high.z)),
        ];
        for (normal, translation) in planes {
            let collider = ColliderBuilder::halfspace(Unit::new_unchecked(normal))
                .translation(translation)
                .collision_groups(terrain_groups())
                .build();
            let handle = self.dynamics.insert_parentless(None, collider);
            self.border_planes.push(handle);
        }
    }

    /// (Re)loads the terrain from the containing entity's "terrain" property and
    /// rebuilds every page. Modifiers of planted entities are re-applied.
    pub(super) fn load_terrain(&mut self) {
        for (_, page) in std::mem::take(&mut self.terrain_pages) {
            self.dynamics.remove_body(page.body);
        }
        self.dirty_terrain_areas.clear();
        self.terrain_mods.clear();

        let descriptor = self.domain_entity.borrow().property("terrain").cloned();
        self.terrain = descriptor.and_then(|value| match Terrain::from_property(&value) {
            Ok(terrain) => Some(terrain),
            Err(e) => {
                error!(domain = self.domain_id, "invalid terrain: {e}");
                None
            }
        });
        let Some(keys) = self.terrain.as_ref().map(Terrain::segment_keys) else {
            return;
        };
        for key in keys {
            self.build_terrain_page(key);
        }

        let mut planted: Vec<EntityId> = self
            .entries
            .iter()
            .filter(|(id, e)| **id != self.domain_id && e.mode == Mode::Planted)
            .map(|(id, _)| *id)
            .collect();
        planted.sort_unstable();
        for id in planted {
            self.update_terrain_mod(id, true);
        }
        info!(
            domain = self.domain_id,
            pages = self.terrain_pages.len(),
            "terrain loaded"
        );
    }

    /// Replaces the static heightfield body of one segment.
    fn build_terrain_page(&mut self, key: SegmentKey) {
        let friction = self.domain_entity.borrow().property_f32("friction");
        let Some(terrain) = self.terrain.as_mut() else {
            return;
        };
        let area = terrain.segment_area(key);
        let resolution = terrain.resolution();
        let Some(heights) = terrain.segment_heights(key) else {
            return;
        };

        let n = (resolution + 1) as usize;
        let matrix = DMatrix::from_fn(n, n, |row, col| heights.heights[row * n + col]);
        let scale = Vector3::new(resolution as f32, 1.0, resolution as f32);
        // Heightfields are centered on their body
        let center = area.center();
        let body = RigidBodyBuilder::fixed()
            .translation(Vector3::new(center.x, 0.0, center.y))
            .build();
        let mut collider = ColliderBuilder::heightfield(matrix, scale).collision_groups(terrain_groups());
        if let Some(friction) = friction {
            collider = collider.friction(friction);
        }

        if let Some(old) = self.terrain_pages.remove(&key) {
            self.dynamics.remove_body(old.body);
        }
        let (body, collider) = self.dynamics.insert_unowned(body, collider.build());
        self.terrain_pages.insert(key, TerrainPage { body, collider });
        debug!(
            domain = self.domain_id,
            segment = ?key,
            min = heights.min,
            max = heights.max,
            "terrain page built"
        );
    }

    fn apply_terrain_friction(&mut self) {
        let Some(friction) = self.domain_entity.borrow().property_f32("friction") else {
            return;
        };
        for page in self.terrain_pages.values() {
            if let Some(collider) = self.dynamics.collider_set.get_mut(page.collider) {
                collider.set_friction(friction);
            }
        }
    }

    /// Rebuilds the pages under every dirty area, then asks each entity standing on
    /// them to correct its position.
    pub(super) fn process_dirty_terrain_areas(&mut self) {
        let Some(terrain) = self.terrain.as_ref() else {
            self.dirty_terrain_areas.clear();
            return;
        };
        if self.dirty_terrain_areas.is_empty() {
            return;
        }

        let keys: BTreeSet<SegmentKey> = self
            .dirty_terrain_areas
            .drain(..)
            .flat_map(|area| terrain.segments_in(&area))
            .collect();
        for key in &keys {
            self.build_terrain_page(*key);
        }
        self.dynamics.update_queries();

        let world_height = self
            .domain_entity
            .borrow()
            .location
            .valid_bbox()
            .map_or(self.config.world_height, |b| b.size().y);

        let mut affected = BTreeSet::new();
        for key in &keys {
            let Some(area) = self.terrain.as_ref().map(|t| t.segment_area(*key)) else {
                continue;
            };
            let size = area.size();
            let center = area.center();
            let footprint = Cuboid::new(Vector3::new(size.x * 0.5, world_height, size.y * 0.5));
            let position = Isometry3::translation(center.x, 0.0, center.y);
            affected.extend(
                self.dynamics
                    .entities_intersecting(&position, &footprint, terrain_groups()),
            );
        }

        for id in affected {
            if !self.entries.contains_key(&id) {
                continue;
            }
            let Some(pos) = self.entity(id).borrow().location.pos else {
                continue;
            };
            debug!(entity = id, "position correction after terrain change");
            self.notify(Notification::PositionCorrection {
                entity: id,
                position: pos.coords.into(),
            });
        }
    }

    /// Keeps the terrain modifier of a planted entity in sync with its placement.
    /// `forced` re-parses the modifier even if the entity didn't move.
    pub(super) fn update_terrain_mod(&mut self, id: EntityId, forced: bool) {
        if id == self.domain_id || self.terrain.is_none() {
            return;
        }
        let entity_ref = self.entity(id);
        let (planted, descriptor, pos, orientation) = {
            let entity = entity_ref.borrow();
            (
                entity.has_mode() && entity.mode() == Mode::Planted,
                entity.property("terrainmod").cloned(),
                entity.location.pos,
                entity.location.orientation,
            )
        };

        let (true, Some(descriptor), Some(pos)) = (planted, descriptor, pos) else {
            self.remove_terrain_mod(id);
            return;
        };
        let Some(terrain) = self.terrain.as_mut() else {
            return;
        };
        // Modifiers sit on the unmodified ground
        let Some(ground) = terrain.base_height_at(pos.x, pos.z) else {
            return;
        };
        let mod_pos = Point3::new(pos.x, ground, pos.z);

        let previous = self.terrain_mods.get(&id);
        let moved = previous.map_or(true, |record| {
            record.pos != mod_pos || record.orientation != orientation
        });
        if !forced && !moved {
            return;
        }

        let mut areas: Vec<Area> = previous.map(|record| record.area).into_iter().collect();
        match TerrainMod::from_descriptor(&descriptor, mod_pos, orientation.as_ref()) {
            Ok(modifier) => {
                let area = modifier.footprint();
                terrain.update_mod(id, modifier);
                self.terrain_mods.insert(
                    id,
                    TerrainModRecord {
                        pos: mod_pos,
                        orientation,
                        area,
                    },
                );
                areas.push(area);
            }
            Err(e) => {
                error!(entity = id, "invalid terrain modifier: {e}");
                terrain.remove_mod(id);
                self.terrain_mods.remove(&id);
            }
        }
        self.refresh_terrain(&areas);
    }

    fn remove_terrain_mod(&mut self, id: EntityId) {
        let Some(record) = self.terrain_mods.remove(&id) else {
            return;
        };
        if let Some(terrain) = self.terrain.as_mut() {
            terrain.remove_mod(id);
        }
        self.dirty_terrain_areas.push(record.area);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_terrain(height: f32) -> PropertyValue {
        serde_json::from_value(serde_json::json!({
            "points": [[0, 0, height], [1, 0, height], [0, 1, height], [1, 1, height]],
            "resolution": 16
        }))
        .unwrap()
    }

    fn domain_with_terrain(height: f32) -> (EntityRef, PhysicalDomain) {
        let container = LocatedEntity::new(0)
            .with_bbox([-100.0, -50.0, -100.0], [100.0, 50.0, 100.0])
            .with_property("terrain", flat_terrain(height))
            .into_ref();
        let domain = PhysicalDomain::new(&container, DomainConfig::default());
        (container, domain)
    }

    fn crater() -> PropertyValue {
        serde_json::from_value(serde_json::json!({
            "type": "levelmod",
            "height": -1.0,
            "shape": {"type": "ball", "radius": 2.0}
        }))
        .unwrap()
    }

    #[test]
    fn test_terrain_pages_and_borders_are_built() {
        let (_container, mut domain) = domain_with_terrain(3.0);
        assert_eq!(domain.terrain_page_count(), 1);
        assert_eq!(domain.border_planes.len(), 6);
        assert_eq!(domain.get_terrain_height(8.0, 8.0), Some(3.0));
        assert_eq!(domain.get_terrain_height(-8.0, 8.0), None);
    }

    #[test]
    fn test_invalid_terrain_leaves_domain_without_terrain() {
        let container = LocatedEntity::new(0)
            .with_property("terrain", "hills")
            .into_ref();
        let mut domain = PhysicalDomain::new(&container, DomainConfig::default());
        assert_eq!(domain.terrain_page_count(), 0);
        assert_eq!(domain.get_terrain_height(1.0, 1.0), None);
    }

    #[test]
    fn test_planted_entity_installs_and_moves_its_modifier() {
        let (_container, mut domain) = domain_with_terrain(3.0);
        let house = LocatedEntity::new(1)
            .with_pos(8.0, 0.0, 8.0)
            .with_property("mode", "planted")
            .with_property("terrainmod", crater())
            .into_ref();
        domain.add_entity(&house);

        assert!(domain.terrain_mods.contains_key(&1));
        assert_eq!(domain.pending_terrain_areas().len(), 1);
        assert_eq!(domain.get_terrain_height(8.0, 8.0), Some(2.0));
        // Planted on the unmodified ground
        assert_eq!(house.borrow().location.pos.unwrap().y, 3.0);

        domain.process_dirty_terrain_areas();
        assert!(domain.pending_terrain_areas().is_empty());

        // Unchanged placement doesn't churn the terrain
        domain.update_terrain_mod(1, false);
        assert!(domain.pending_terrain_areas().is_empty());

        domain.apply_transform(1, None, Some(Point3::new(12.0, 0.0, 8.0)), None);
        assert_eq!(
            domain.pending_terrain_areas().len(),
            2,
            "old and new footprints are both dirty"
        );
        assert_eq!(domain.get_terrain_height(8.0, 8.0), Some(3.0));
        assert_eq!(domain.get_terrain_height(12.0, 8.0), Some(2.0));
    }

    #[test]
    fn test_modifier_is_removed_when_no_longer_planted() {
        let (_container, mut domain) = domain_with_terrain(3.0);
        let house = LocatedEntity::new(1)
            .with_pos(8.0, 0.0, 8.0)
            .with_property("mode", "planted")
            .with_property("terrainmod", crater())
            .into_ref();
        domain.add_entity(&house);
        domain.process_dirty_terrain_areas();

        house.borrow_mut().set_property("mode", "free".into());
        domain.child_entity_property_applied(1, "mode");
        domain.update_terrain_mod(1, false);

        assert!(!domain.terrain_mods.contains_key(&1));
        assert_eq!(domain.get_terrain_height(8.0, 8.0), Some(3.0));
        assert!(!domain.pending_terrain_areas().is_empty());
    }

    #[test]
    fn test_invalid_modifier_is_dropped() {
        let (_container, mut domain) = domain_with_terrain(3.0);
        let house = LocatedEntity::new(1)
            .with_pos(8.0, 0.0, 8.0)
            .with_property("mode", "planted")
            .with_property("terrainmod", crater())
            .into_ref();
        domain.add_entity(&house);

        house.borrow_mut().set_property("terrainmod", "not a modifier".into());
        domain.child_entity_property_applied(1, "terrainmod");
        assert!(!domain.terrain_mods.contains_key(&1));
        assert_eq!(domain.get_terrain_height(8.0, 8.0), Some(3.0));
    }

    #[test]
    fn test_terrain_rebuild_corrects_entities_on_it() {
        let (_container, mut domain) = domain_with_terrain(0.0);
        let crate_box = LocatedEntity::new(1)
            .with_pos(4.0, 0.0, 4.0)
            .with_bbox([-0.5, 0.0, -0.5], [0.5, 1.0, 0.5])
            .with_property("mass", 2.0)
            .into_ref();
        domain.add_entity(&crate_box);
        domain.drain_notifications();

        if let Some(terrain) = domain.terrain_mut() {
            terrain.set_base_point(0, 0, 2.0);
        }
        domain.refresh_terrain(&[Area::new(
            nalgebra::Point2::new(0.0, 0.0),
            nalgebra::Point2::new(16.0, 16.0),
        )]);
        domain.process_dirty_terrain_areas();

        let notifications = domain.drain_notifications();
        assert_eq!(
            notifications,
            vec![Notification::PositionCorrection {
                entity: 1,
                position: [4.0, 0.0, 4.0]
            }]
        );
    }

    #[test]
    fn test_terrain_friction_follows_container() {
        let (container, mut domain) = domain_with_terrain(0.0);
        container.borrow_mut().set_property("friction", PropertyValue::from(0.2));
        domain.entity_property_applied("friction");

        let page = domain.terrain_pages.values().next().unwrap();
        assert_eq!(domain.dynamics.collider_set[page.collider].friction(), 0.2);
    }
}
