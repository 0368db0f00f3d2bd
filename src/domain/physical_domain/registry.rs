use super::*;

impl PhysicalDomain {
    /// Registers an entity with the domain.
    ///
    /// Panics if the entity is already registered.
    pub fn add_entity(&mut self, entity_ref: &EntityRef) {
        let id = entity_ref.borrow().id;
        assert!(
            !self.entries.contains_key(&id),
            "entity {id} is already registered in the domain"
        );

        // Mesh geometry supplies a bbox to entities that don't declare one
        let geometry = self.geometry_for(&entity_ref.borrow());
        if let Some(bounds) = geometry.as_ref().and_then(|g| g.mesh_bounds()) {
            let mut entity = entity_ref.borrow_mut();
            if entity.location.valid_bbox().is_none() {
                entity.set_bbox(bounds);
            }
        }

        let mut entry = {
            let entity = entity_ref.borrow();
            let kind = if entity.property_i64("water_body") == Some(1) {
                match entity.location.valid_bbox() {
                    Some(bbox) => EntryKind::Water(WaterShape::Box {
                        half_extents: bbox.size() / 2.0,
                    }),
                    None => EntryKind::Water(WaterShape::Plane),
                }
            } else {
                EntryKind::Rigid
            };
            let mut entry = SimulationEntry::new(entity_ref, kind);
            entry.mode = entity.mode();
            entry.mass = if entry.mode.is_static() {
                0.0
            } else {
                entity.mass()
            };
            Self::refresh_speeds(&mut entry, &entity);
            entry.observable_radius = Self::observable_radius(&entity, self.visibility.scaling_factor());
            entry
        };

        // Initial position follows the mode's height policy
        let pos = {
            let entity = entity_ref.borrow();
            entity
                .location
                .pos
                .filter(|_| entity.location.is_valid())
                .map(|pos| self.resolve_position(&entity, pos))
        };
        if let Some(pos) = pos {
            entity_ref.borrow_mut().location.pos = Some(pos);
        }

        let bbox = entity_ref.borrow().location.valid_bbox();
        if let Some(bbox) = bbox {
            entry.shape = Some(self.build_shape(&entity_ref.borrow(), &bbox, entry.mass));
        }
        let kind = entry.kind;
        self.entries.insert(id, entry);

        match kind {
            EntryKind::Water(_) => {
                self.spawn_water_ghost(id);
                self.water_bodies.insert(id);
            }
            _ => self.spawn_body(id),
        }

        let propel = entity_ref
            .borrow()
            .property("propel")
            .and_then(PropertyValue::as_vector3)
            .filter(|v| *v != Vector3::zeros());
        if let Some(velocity) = propel {
            self.apply_velocity(id, velocity);
        }

        self.update_terrain_mod(id, true);

        // Containment-level perception links
        let (perceptive, domain_perceptive) = (
            entity_ref.borrow().perceptive,
            self.domain_entity.borrow().perceptive,
        );
        if domain_perceptive {
            self.link_observation(self.domain_id, id);
        }
        if perceptive {
            self.link_observation(id, self.domain_id);
        }

        self.create_visibility_proxies(id);
        self.update_observer_entry(id, true);
        self.update_observed_entry(id, false);

        let in_world = self.entries.get(&id).map_or(false, |e| e.has_body());
        Self::log_entry_created(id, kind, in_world);
    }

    /// Unregisters an entity, releasing its physics and visibility objects and
    /// unlinking it from every observer.
    ///
    /// Panics if the entity isn't registered or is the containing entity.
    pub fn remove_entity(&mut self, id: EntityId) {
        assert!(
            id != self.domain_id,
            "the containing entity can't be removed from its own domain"
        );
        assert!(
            self.entries.contains_key(&id),
            "entity {id} is not registered in the domain"
        );

        if let Some(record) = self.terrain_mods.remove(&id) {
            if let Some(terrain) = self.terrain.as_mut() {
                terrain.remove_mod(id);
            }
            self.dirty_terrain_areas.push(record.area);
        }

        self.submerged.remove(&id);
        if self.water_bodies.remove(&id) {
            for water in self.submerged.values_mut() {
                if *water == Some(id) {
                    *water = None;
                }
            }
        }
        self.propelling.remove(&id);
        self.moving.remove(&id);
        self.last_moving.remove(&id);
        self.dirty.remove(&id);

        self.despawn_body(id);
        self.destroy_visibility_proxies(id);

        let Some(entry) = self.entries.remove(&id) else {
            return;
        };
        for observer in &entry.observing_this {
            if let Some(other) = self.entries.get_mut(observer) {
                other.observed_by_this.remove(&id);
            }
        }
        for observed in &entry.observed_by_this {
            if let Some(other) = self.entries.get_mut(observed) {
                other.observing_this.remove(&id);
            }
        }
        debug!(entity = id, "simulation entry removed");
    }

    /// Reacts to a property change on a child entity.
    pub fn child_entity_property_applied(&mut self, id: EntityId, name: &str) {
        let Some(entry) = self.entries.get(&id) else {
            warn!(entity = id, property = name, "property change for unknown entity");
            return;
        };
        let is_rigid = entry.kind == EntryKind::Rigid;
        let entity_ref = self.entity(id);

        match name {
            "friction" => {
                let friction = entity_ref.borrow().property_f32("friction");
                if let Some(friction) = friction {
                    if let Some(collider) = self.collider_mut(id) {
                        collider.set_friction(friction);
                    }
                    self.wake_if_dynamic(id);
                }
            }
            "friction_roll" => {
                let friction = entity_ref.borrow().property_f32("friction_roll");
                if let Some(friction) = friction {
                    if let Some(body) = self.body_mut(id) {
                        body.set_angular_damping(friction);
                    }
                    self.wake_if_dynamic(id);
                }
            }
            "friction_spin" => {
                if let Some(value) = entity_ref.borrow().property_f32("friction_spin") {
                    Self::warn_spinning_friction(id, value);
                }
            }
            "mode" if is_rigid => self.apply_mode_change(id),
            "solid" if is_rigid => {
                let groups = {
                    let entity = entity_ref.borrow();
                    Self::collision_groups(entity.mode(), entity.is_solid())
                };
                if let Some(collider) = self.collider_mut(id) {
                    collider.set_collision_groups(groups);
                }
            }
            "mass" if is_rigid => {
                let mode = self.entries.get(&id).map_or(Mode::Free, |e| e.mode);
                if !mode.is_static() {
                    let mass = entity_ref.borrow().mass();
                    self.reclassify_body(id, mass);
                }
            }
            "bbox" => self.apply_bbox_change(id),
            "planted-offset" | "planted-scaled-offset" => {
                let pos = entity_ref.borrow().location.pos;
                if let Some(pos) = pos {
                    self.apply_new_position(id, pos);
                }
            }
            "terrainmod" => self.update_terrain_mod(id, true),
            "speed-ground" | "speed-water" | "speed-flight" => {
                let entity = entity_ref.borrow();
                if let Some(entry) = self.entries.get_mut(&id) {
                    Self::refresh_speeds(entry, &entity);
                }
            }
            _ => {}
        }
    }

    /// Full reclassification after the "mode" property changed.
    fn apply_mode_change(&mut self, id: EntityId) {
        let entity_ref = self.entity(id);
        let (new_mode, declared_mass, pos) = {
            let entity = entity_ref.borrow();
            (entity.mode(), entity.mass(), entity.location.pos)
        };
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        if entry.mode == new_mode {
            return;
        }
        entry.mode = new_mode;
        entry.mode_changed = true;

        if let Some(pos) = pos {
            self.apply_new_position(id, pos);
        }

        let mass = if new_mode.is_static() {
            0.0
        } else {
            declared_mass
        };
        self.reclassify_body(id, mass);

        let groups = Self::collision_groups(new_mode, entity_ref.borrow().is_solid());
        if let Some(collider) = self.collider_mut(id) {
            collider.set_collision_groups(groups);
        }
        // Static bodies can't propel themselves
        if new_mode.is_static() {
            self.propelling.remove(&id);
        }
        self.moving.insert(id);
    }

    /// Applies a new effective mass: swaps mesh shape variants, switches between
    /// fixed and dynamic, and recomputes mass properties.
    fn reclassify_body(&mut self, id: EntityId, mass: f32) {
        let entity_ref = self.entity(id);
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        let needs_new_shape = matches!(
            (entry.shape_class(), mass == 0.0),
            (Some(ShapeClass::ConvexHull), true) | (Some(ShapeClass::StaticMesh), false)
        );
        let bbox = entity_ref.borrow().location.valid_bbox();
        let new_shape = match (needs_new_shape, bbox) {
            (true, Some(bbox)) => Some(self.build_shape(&entity_ref.borrow(), &bbox, mass)),
            _ => None,
        };

        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        entry.mass = mass;
        if let Some(shape) = new_shape {
            entry.shape = Some(shape);
        }
        let shared_shape = entry.shape.as_ref().map(|s| s.shape.clone());
        let (Some(body_handle), Some(collider_handle)) = (entry.body, entry.collider) else {
            return;
        };

        if let Some(collider) = self.dynamics.collider_set.get_mut(collider_handle) {
            if let Some(shape) = shared_shape.filter(|_| needs_new_shape) {
                collider.set_shape(shape);
            }
            collider.set_mass(mass);
        }
        if let Some(body) = self.dynamics.rigid_body_set.get_mut(body_handle) {
            let body_type = if mass == 0.0 {
                RigidBodyType::Fixed
            } else {
                RigidBodyType::Dynamic
            };
            body.set_body_type(body_type, true);
            body.enable_ccd(mass > 0.0);
            body.recompute_mass_properties_from_colliders(&self.dynamics.collider_set);
            if mass > 0.0 {
                body.wake_up(true);
            }
        }
    }

    /// Rescales the shape to a new bbox and re-places the body.
    fn apply_bbox_change(&mut self, id: EntityId) {
        let entity_ref = self.entity(id);
        let Some(bbox) = entity_ref.borrow().location.valid_bbox() else {
            return;
        };
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        let (kind, mass) = (entry.kind, entry.mass);

        let built = match kind {
            EntryKind::Container => return,
            EntryKind::Water(WaterShape::Plane) => return,
            EntryKind::Water(WaterShape::Box { .. }) => create_box_shape(&bbox),
            EntryKind::Rigid => self.build_shape(&entity_ref.borrow(), &bbox, mass),
        };
        let shape = built.shape.clone();
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        if let EntryKind::Water(WaterShape::Box { .. }) = kind {
            entry.kind = EntryKind::Water(WaterShape::Box {
                half_extents: bbox.size() / 2.0,
            });
        }
        entry.shape = Some(built);
        let (body, collider) = (entry.body, entry.collider);

        if let Some(collider) = collider.and_then(|h| self.dynamics.collider_set.get_mut(h)) {
            collider.set_shape(shape);
        }
        if let Some(body) = body.and_then(|h| self.dynamics.rigid_body_set.get_mut(h)) {
            body.recompute_mass_properties_from_colliders(&self.dynamics.collider_set);
        }

        // Re-places the body for the new center offset and reapplies terrain clamping
        let pos = entity_ref.borrow().location.pos;
        if let Some(pos) = pos {
            self.apply_new_position(id, pos);
        }
        self.wake_if_dynamic(id);
    }

    /// Creates the rigid body of an entry, if it has a shape and a valid position.
    pub(super) fn spawn_body(&mut self, id: EntityId) {
        let entity_ref = self.entity(id);
        let entity = entity_ref.borrow();
        let Some(pos) = entity.location.pos.filter(|_| entity.location.is_valid()) else {
            return;
        };
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        if entry.body.is_some() || entry.kind != EntryKind::Rigid {
            return;
        }
        let Some(built) = entry.shape.as_ref() else {
            return;
        };

        let orientation = entity
            .location
            .orientation
            .unwrap_or_else(UnitQuaternion::identity);
        let position = Self::body_isometry(&pos, &orientation, &built.center_of_mass_offset);
        let is_static = entry.mass == 0.0;

        let mut builder = if is_static {
            RigidBodyBuilder::fixed()
        } else {
            RigidBodyBuilder::dynamic()
        }
        .position(position);

        if !is_static {
            let min_dimension = entity.location.valid_bbox().map_or(0.0, |b| b.size().min());
            builder = builder
                .ccd_enabled(true)
                .soft_ccd_prediction(min_dimension * consts::CCD_MOTION_FACTOR);
            if let Some(velocity) = entity.location.velocity {
                builder = builder.linvel(velocity);
            }
            if entry.mode == Mode::Submerged {
                builder = builder
                    .gravity_scale(0.0)
                    .linear_damping(consts::SUBMERGED_DAMPING);
            }
        }
        if let Some(rolling) = entity.property_f32("friction_roll") {
            builder = builder.angular_damping(rolling);
        }
        if let Some(spinning) = entity.property_f32("friction_spin") {
            Self::warn_spinning_friction(id, spinning);
        }

        let collider = ColliderBuilder::new(built.shape.clone())
            .mass(entry.mass)
            .friction(Self::declared_friction(&entity))
            .collision_groups(Self::collision_groups(entry.mode, entity.is_solid()))
            .build();
        drop(entity);

        let (body, collider) = self.dynamics.insert_body(id, builder.build(), collider);
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.body = Some(body);
            entry.collider = Some(collider);
        }
    }

    /// Creates the non-colliding ghost of a water body.
    fn spawn_water_ghost(&mut self, id: EntityId) {
        let entity_ref = self.entity(id);
        let entity = entity_ref.borrow();
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        let EntryKind::Water(water) = entry.kind else {
            return;
        };

        // Water without a position sits at the domain origin
        let pos = entity.location.pos.unwrap_or_else(Point3::origin);
        let orientation = entity
            .location
            .orientation
            .unwrap_or_else(UnitQuaternion::identity);
        let (shape, offset) = match (water, entity.location.valid_bbox()) {
            (WaterShape::Box { .. }, Some(bbox)) => {
                let built = create_box_shape(&bbox);
                let offset = built.center_of_mass_offset;
                let shape = built.shape.clone();
                entry.shape = Some(built);
                (shape, offset)
            }
            _ => (SharedShape::halfspace(Vector::y_axis()), Vector3::zeros()),
        };

        let collider = ColliderBuilder::new(shape)
            .sensor(true)
            .position(Self::body_isometry(&pos, &orientation, &offset))
            .collision_groups(Self::water_groups())
            .build();
        drop(entity);
        let handle = self.dynamics.insert_parentless(Some(id), collider);
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.collider = Some(handle);
        }
    }

    /// Removes the entry's body or ghost from the dynamics world.
    fn despawn_body(&mut self, id: EntityId) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        let (body, collider) = (entry.body.take(), entry.collider.take());
        match (body, collider) {
            (Some(body), _) => self.dynamics.remove_body(body),
            (None, Some(collider)) => self.dynamics.remove_collider(collider),
            (None, None) => {}
        }
    }

    fn refresh_speeds(entry: &mut SimulationEntry, entity: &LocatedEntity) {
        entry.speed_ground = entity.property_f32("speed-ground").unwrap_or(0.0);
        entry.speed_water = entity.property_f32("speed-water").unwrap_or(0.0);
        entry.speed_flight = entity.property_f32("speed-flight").unwrap_or(0.0);
    }

    /// Scaled observable radius: declared visibility, else bounding sphere, else a default.
    fn observable_radius(entity: &LocatedEntity, scaling_factor: f32) -> f32 {
        if let Some(visibility) = entity.property_f32("visibility") {
            return visibility / scaling_factor;
        }
        match entity.location.valid_bbox().map(|b| b.bounding_radius()) {
            Some(radius) if radius > 0.0 => radius,
            _ => visibility_consts::DEFAULT_OBSERVABLE_RADIUS,
        }
    }

    pub(super) fn body_mut(&mut self, id: EntityId) -> Option<&mut RigidBody> {
        let handle = self.entries.get(&id)?.body?;
        self.dynamics.rigid_body_set.get_mut(handle)
    }

    pub(super) fn collider_mut(&mut self, id: EntityId) -> Option<&mut Collider> {
        let handle = self.entries.get(&id)?.collider?;
        self.dynamics.collider_set.get_mut(handle)
    }

    pub(super) fn wake_if_dynamic(&mut self, id: EntityId) {
        if let Some(body) = self.body_mut(id) {
            if body.is_dynamic() {
                body.wake_up(true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain() -> (EntityRef, PhysicalDomain) {
        let container = LocatedEntity::new(0).into_ref();
        let domain = PhysicalDomain::new(&container, DomainConfig::default());
        (container, domain)
    }

    fn crate_box(id: EntityId) -> LocatedEntity {
        LocatedEntity::new(id)
            .with_pos(0.0, 5.0, 0.0)
            .with_bbox([-0.5, -0.5, -0.5], [0.5, 0.5, 0.5])
            .with_property("mass", 10.0)
    }

    #[test]
    fn test_add_entity_creates_body_only_with_valid_position() {
        let (_container, mut domain) = domain();
        let placed = crate_box(1).into_ref();
        let unplaced = LocatedEntity::new(2)
            .with_bbox([-0.5, -0.5, -0.5], [0.5, 0.5, 0.5])
            .into_ref();

        domain.add_entity(&placed);
        domain.add_entity(&unplaced);

        assert!(domain.entry(1).unwrap().has_body());
        assert!(domain.entry(1).unwrap().has_observable_proxy());
        assert!(!domain.entry(2).unwrap().has_body(), "no position, no body");
        assert!(!domain.entry(2).unwrap().has_observable_proxy());

        // Giving it a position puts it in the world
        domain.apply_transform(2, None, Some(Point3::new(3.0, 1.0, 0.0)), None);
        assert!(domain.entry(2).unwrap().has_body());
        assert!(domain.entry(2).unwrap().has_observable_proxy());
    }

    #[test]
    fn test_static_modes_force_zero_mass() {
        let (_container, mut domain) = domain();
        for (id, mode) in [(1, "fixed"), (2, "planted"), (3, "floating"), (4, "free")] {
            let entity = crate_box(id).with_property("mode", mode).into_ref();
            domain.add_entity(&entity);
        }

        for id in 1..=3 {
            assert_eq!(domain.entry(id).unwrap().mass(), 0.0);
            assert_eq!(domain.body_mass(id), Some(0.0), "entity {id} must be static");
        }
        assert_eq!(domain.entry(4).unwrap().mass(), 10.0);
        let mass = domain.body_mass(4).unwrap();
        assert!((mass - 10.0).abs() < 1e-3, "free body keeps declared mass, got {mass}");
    }

    #[test]
    fn test_mode_change_reclassifies_body() {
        let (_container, mut domain) = domain();
        let entity = crate_box(1).into_ref();
        domain.add_entity(&entity);

        entity.borrow_mut().set_property("mode", "fixed".into());
        domain.child_entity_property_applied(1, "mode");
        let entry = domain.entry(1).unwrap();
        assert_eq!(entry.mode(), Mode::Fixed);
        assert_eq!(entry.mass(), 0.0);
        assert_eq!(domain.body_mass(1), Some(0.0));

        entity.borrow_mut().set_property("mode", "free".into());
        domain.child_entity_property_applied(1, "mode");
        assert_eq!(domain.entry(1).unwrap().mass(), 10.0);
        let handle = domain.entry(1).unwrap().body.unwrap();
        assert!(domain.dynamics.rigid_body_set[handle].is_dynamic());
    }

    #[test]
    fn test_mesh_swaps_between_static_and_convex_variants() {
        let (_container, mut domain) = domain();
        let mesh: PropertyValue = serde_json::from_str(
            r#"{"type": "mesh",
                "vertices": [0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1],
                "indices": [0, 1, 2, 0, 1, 3, 0, 2, 3, 1, 2, 3]}"#,
        )
        .unwrap();
        let entity = LocatedEntity::new(1)
            .with_pos(0.0, 0.0, 0.0)
            .with_property("geometry", mesh)
            .with_property("mode", "planted")
            .with_property("mass", 4.0)
            .into_ref();
        domain.add_entity(&entity);

        let entry = domain.entry(1).unwrap();
        assert_eq!(entry.shape_class(), Some(ShapeClass::StaticMesh));
        assert!(
            entity.borrow().location.bbox.is_some(),
            "mesh bounds fill in the missing bbox"
        );

        entity.borrow_mut().set_property("mode", "free".into());
        domain.child_entity_property_applied(1, "mode");
        assert_eq!(domain.entry(1).unwrap().shape_class(), Some(ShapeClass::ConvexHull));
    }

    #[test]
    fn test_mass_change_is_ignored_while_planted() {
        let (_container, mut domain) = domain();
        let entity = crate_box(1).with_property("mode", "planted").into_ref();
        domain.add_entity(&entity);

        entity.borrow_mut().set_property("mass", PropertyValue::from(50.0));
        domain.child_entity_property_applied(1, "mass");
        assert_eq!(domain.entry(1).unwrap().mass(), 0.0);
    }

    #[test]
    fn test_bbox_change_rescales_shape() {
        let (_container, mut domain) = domain();
        let entity = crate_box(1).into_ref();
        domain.add_entity(&entity);

        entity.borrow_mut().set_bbox(BBox::new(
            Point3::new(-1.0, 0.0, -1.0),
            Point3::new(1.0, 4.0, 1.0),
        ));
        domain.child_entity_property_applied(1, "bbox");

        let entry = domain.entry(1).unwrap();
        let built = entry.shape.as_ref().unwrap();
        assert_eq!(built.center_of_mass_offset, Vector3::new(0.0, -2.0, 0.0));
        let collider = &domain.dynamics.collider_set[entry.collider.unwrap()];
        let cuboid = collider.shape().as_cuboid().expect("cuboid");
        assert_eq!(cuboid.half_extents, Vector3::new(1.0, 2.0, 1.0));
        let body = &domain.dynamics.rigid_body_set[entry.body.unwrap()];
        assert!((body.translation().y - 7.0).abs() < 1e-4, "body center sits at pos + center");
    }

    #[test]
    fn test_remove_entity_releases_everything() {
        let (_container, mut domain) = domain();
        let entity = crate_box(1).perceptive().into_ref();
        domain.add_entity(&entity);
        assert_eq!(domain.visibility.proxy_count(), 2);

        domain.remove_entity(1);
        assert!(domain.entry(1).is_none());
        assert_eq!(domain.visibility.proxy_count(), 0);
        assert!(domain.dynamics.body_to_entity.is_empty());
        assert!(!domain.entry(0).unwrap().observing_this().contains(&1));
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_duplicate_add_is_fatal() {
        let (_container, mut domain) = domain();
        let entity = crate_box(1).into_ref();
        domain.add_entity(&entity);
        domain.add_entity(&entity);
    }

    #[test]
    #[should_panic(expected = "not registered")]
    fn test_removing_unknown_entity_is_fatal() {
        let (_container, mut domain) = domain();
        domain.remove_entity(42);
    }

    #[test]
    fn test_water_body_is_a_ghost() {
        let (_container, mut domain) = domain();
        let ocean = LocatedEntity::new(5)
            .with_pos(0.0, 0.0, 0.0)
            .with_property("water_body", 1i64)
            .into_ref();
        domain.add_entity(&ocean);

        let entry = domain.entry(5).unwrap();
        assert_eq!(entry.kind(), EntryKind::Water(WaterShape::Plane));
        assert!(!entry.has_body());
        let collider = &domain.dynamics.collider_set[entry.collider.unwrap()];
        assert!(collider.is_sensor());
    }
}
