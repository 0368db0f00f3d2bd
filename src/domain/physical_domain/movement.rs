use super::*;

/// Inputs of the planted height rule.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PlantedOffsets {
    pub offset: f32,
    /// Multiplied by the bbox height
    pub scaled_offset: f32,
    pub bbox_height: f32,
}

/// Height clamping rule of each mode. `terrain_height` is the ground under `pos`.
///
/// Returns `None` for modes that keep the requested position as is.
pub(crate) fn clamp_to_mode(
    mode: Mode,
    pos: &Point3<f32>,
    terrain_height: Option<f32>,
    planted: PlantedOffsets,
    water_level: f32,
) -> Option<Point3<f32>> {
    let mut clamped = *pos;
    match mode {
        Mode::Planted => {
            let ground = terrain_height.unwrap_or(pos.y);
            clamped.y = ground + planted.offset + planted.scaled_offset * planted.bbox_height;
        }
        Mode::Free | Mode::Submerged => {
            clamped.y = pos.y.max(terrain_height?);
        }
        Mode::Floating => {
            let ground = terrain_height.unwrap_or(pos.y);
            clamped.y = if ground > water_level { ground } else { water_level };
        }
        Mode::Fixed => return None,
        Mode::Unknown => {
            warn!("unknown mode, position left unchanged");
            return None;
        }
    }
    Some(clamped)
}

impl PhysicalDomain {
    /// Resolves where an entity asking for `pos` ends up, following its mode.
    pub(crate) fn resolve_position(&mut self, entity: &LocatedEntity, pos: Point3<f32>) -> Point3<f32> {
        let terrain_height = self
            .terrain
            .as_mut()
            .and_then(|terrain| terrain.height_at(pos.x, pos.z));
        let planted = PlantedOffsets {
            offset: entity.property_f32("planted-offset").unwrap_or(0.0),
            scaled_offset: entity.property_f32("planted-scaled-offset").unwrap_or(0.0),
            bbox_height: entity.location.valid_bbox().map_or(0.0, |b| b.size().y),
        };
        clamp_to_mode(
            entity.mode(),
            &pos,
            terrain_height,
            planted,
            self.config.water_level,
        )
        .unwrap_or(pos)
    }

    /// Moves an entity to `pos` after height resolution and re-places its body and proxies.
    pub(super) fn apply_new_position(&mut self, id: EntityId, pos: Point3<f32>) {
        let entity_ref = self.entity(id);
        let new_pos = self.resolve_position(&entity_ref.borrow(), pos);
        entity_ref.borrow_mut().location.pos = Some(new_pos);

        let has_body = self.entries.get(&id).map_or(false, |e| e.body.is_some());
        if !has_body {
            // First valid position puts the entity in the world
            self.spawn_body(id);
            self.create_visibility_proxies(id);
        }
        self.place_in_world(id);
        self.move_visibility_proxies(id, &new_pos);
        self.dirty.insert(id);
    }

    /// Sets the body or ghost transform from the entity's location.
    fn place_in_world(&mut self, id: EntityId) {
        let entity_ref = self.entity(id);
        let entity = entity_ref.borrow();
        let Some(pos) = entity.location.pos else {
            return;
        };
        let orientation = entity
            .location
            .orientation
            .unwrap_or_else(UnitQuaternion::identity);
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        let offset = entry
            .shape
            .as_ref()
            .map_or_else(Vector3::zeros, |s| s.center_of_mass_offset);
        let position = Self::body_isometry(&pos, &orientation, &offset);

        match (entry.body, entry.collider) {
            (Some(body), _) => {
                if let Some(body) = self.dynamics.rigid_body_set.get_mut(body) {
                    body.set_position(position, false);
                }
            }
            (None, Some(collider)) => {
                if let Some(collider) = self.dynamics.collider_set.get_mut(collider) {
                    collider.set_position(position);
                }
            }
            (None, None) => {}
        }
    }

    /// Sets the continuous velocity of an entity.
    ///
    /// A non-zero velocity registers a propel record (with a jump when grounded and
    /// asked to go up). A zero velocity stops horizontal motion and restores friction.
    pub(super) fn apply_velocity(&mut self, id: EntityId, velocity: Vector3<f32>) {
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        let (Some(body_handle), Some(collider_handle)) = (entry.body, entry.collider) else {
            return;
        };
        let is_dynamic = self
            .dynamics
            .rigid_body_set
            .get(body_handle)
            .map_or(false, |b| b.is_dynamic());
        if !is_dynamic {
            return;
        }
        let entity_ref = self.entity(id);
        let entity = entity_ref.borrow();

        if velocity != Vector3::zeros() {
            if velocity.y > 0.0 {
                let jump = entity.property_f32("speed-jump").unwrap_or(0.0);
                if jump > 0.0 && self.dynamics.is_grounded(collider_handle) {
                    if let Some(body) = self.dynamics.rigid_body_set.get_mut(body_handle) {
                        let mut linvel = *body.linvel();
                        linvel.y = velocity.y * jump;
                        body.set_linvel(linvel, true);
                    }
                }
            }
            // Continuous velocity is horizontal only
            let horizontal = Vector3::new(velocity.x, 0.0, velocity.z);

            match self.propelling.get_mut(&id) {
                Some(record) => record.velocity = horizontal,
                None => {
                    let step_height = match (
                        entity.property_f32("step_factor"),
                        entity.location.valid_bbox(),
                    ) {
                        (Some(factor), Some(bbox)) => bbox.size().y * factor,
                        _ => 0.0,
                    };
                    self.propelling.insert(
                        id,
                        PropelRecord {
                            velocity: horizontal,
                            step_height,
                        },
                    );
                }
            }
        } else {
            let water_level = self.config.water_level;
            if let Some(body) = self.dynamics.rigid_body_set.get_mut(body_handle) {
                let mut linvel = *body.linvel();
                linvel.x = 0.0;
                linvel.z = 0.0;
                if body.center_of_mass().y <= water_level {
                    linvel.y = 0.0;
                }
                body.set_linvel(linvel, true);
            }
            if let Some(collider) = self.dynamics.collider_set.get_mut(collider_handle) {
                collider.set_friction(Self::declared_friction(&entity));
            }
            self.propelling.remove(&id);
        }
    }

    /// Externally requested transform. Entities resting on top of this one are carried
    /// along by the same displacement.
    ///
    /// Panics if the entity isn't registered.
    pub fn apply_transform(
        &mut self,
        id: EntityId,
        orientation: Option<UnitQuaternion<f32>>,
        pos: Option<Point3<f32>>,
        velocity: Option<Vector3<f32>>,
    ) {
        let mut transformed = BTreeSet::new();
        self.apply_transform_tracked(id, orientation, pos, velocity, &mut transformed);
    }

    fn apply_transform_tracked(
        &mut self,
        id: EntityId,
        orientation: Option<UnitQuaternion<f32>>,
        pos: Option<Point3<f32>>,
        velocity: Option<Vector3<f32>>,
        transformed: &mut BTreeSet<EntityId>,
    ) {
        assert!(
            self.entries.contains_key(&id),
            "entity {id} is not registered in the domain"
        );
        let entity_ref = self.entity(id);
        let old_pos = entity_ref.borrow().location.pos;

        if let Some(velocity) = velocity {
            self.apply_velocity(id, velocity);
        }

        let mut had_change = false;
        if let Some(orientation) = orientation {
            let current = entity_ref.borrow().location.orientation;
            if current != Some(orientation) {
                entity_ref.borrow_mut().location.orientation = Some(orientation);
                self.place_in_world(id);
                had_change = true;
            }
        }
        if let Some(pos) = pos {
            self.apply_new_position(id, pos);
            if entity_ref.borrow().location.pos != old_pos {
                had_change = true;
            }
        }

        if !had_change {
            return;
        }
        transformed.insert(id);
        let new_pos = entity_ref.borrow().location.pos;
        if let (Some(old_pos), Some(new_pos)) = (old_pos, new_pos) {
            let displacement = new_pos - old_pos;
            if displacement != Vector3::zeros() {
                self.transform_resting_entities(id, displacement, transformed);
            }
        }
        self.update_terrain_mod(id, false);
        self.wake_if_dynamic(id);
    }

    fn transform_resting_entities(
        &mut self,
        id: EntityId,
        displacement: Vector3<f32>,
        transformed: &mut BTreeSet<EntityId>,
    ) {
        let Some(collider) = self.entries.get(&id).and_then(|e| e.collider) else {
            return;
        };
        let resting = self.dynamics.entities_resting_on(collider);
        for other in resting {
            // Complex shapes may rest on each other
            if transformed.contains(&other) || !self.entries.contains_key(&other) {
                continue;
            }
            let pos = self.entity(other).borrow().location.pos;
            if let Some(pos) = pos {
                self.apply_transform_tracked(other, None, Some(pos + displacement), None, transformed);
            }
        }
    }

    /// Drives every propelling entity. Runs before each physics sub-step.
    pub(super) fn apply_propulsion(&mut self) {
        let gravity = self.config.physics.gravity;
        let records: Vec<(EntityId, PropelRecord)> =
            self.propelling.iter().map(|(id, r)| (*id, *r)).collect();

        for (id, record) in records {
            let Some(entry) = self.entries.get(&id) else {
                continue;
            };
            let (Some(body_handle), Some(collider_handle)) = (entry.body, entry.collider) else {
                continue;
            };
            let grounded = self.dynamics.is_grounded(collider_handle);
            let speed = match entry.mode {
                Mode::Submerged | Mode::Floating => entry.speed_water,
                Mode::Free if !grounded && entry.speed_flight > 0.0 => entry.speed_flight,
                _ => entry.speed_ground,
            };
            let climb = (grounded && record.step_height > 0.0)
                .then(|| self.step_in_the_way(collider_handle, &record))
                .flatten()
                .map(|step| (2.0 * gravity * step).sqrt());

            if let Some(body) = self.dynamics.rigid_body_set.get_mut(body_handle) {
                let mut vertical = body.linvel().y;
                if let Some(climb) = climb {
                    vertical = vertical.max(climb);
                }
                body.set_linvel(record.velocity * speed + Vector3::new(0.0, vertical, 0.0), true);
            }
            // Friction goes back to the declared value when propelling stops
            if let Some(collider) = self.dynamics.collider_set.get_mut(collider_handle) {
                collider.set_friction(consts::PROPEL_FRICTION);
            }
        }
    }

    /// Height of an obstacle blocking the propelling direction that is low enough to
    /// step onto.
    fn step_in_the_way(&self, collider_handle: ColliderHandle, record: &PropelRecord) -> Option<f32> {
        let direction = record.velocity.try_normalize(f32::EPSILON)?;
        let collider = self.dynamics.collider_set.get(collider_handle)?;
        let bottom = collider.shape().compute_local_aabb().mins.y;
        let rotation = collider.position().rotation;

        self.dynamics
            .contact_points(collider_handle)
            .into_iter()
            .filter_map(|(point, normal)| {
                let normal = rotation * normal;
                let rise = point.y - bottom;
                let facing = Vector3::new(normal.x, 0.0, normal.z).dot(&direction);
                // Side contacts only; floor contacts point straight down
                (normal.y.abs() < 0.5 && facing > 0.5 && rise > 0.01 && rise <= record.step_height)
                    .then_some(rise)
            })
            .reduce(f32::max)
    }
}
