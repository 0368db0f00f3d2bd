use super::*;

/// True if `point` (world space) lies inside the water body placed at `water_position`.
fn contains_point(shape: &WaterShape, water_position: &Isometry3<f32>, point: &Point3<f32>) -> bool {
    match shape {
        WaterShape::Plane => point.y <= water_position.translation.y,
        WaterShape::Box { half_extents } => {
            let local = water_position.inverse_transform_point(point);
            local.x.abs() <= half_extents.x
                && local.y.abs() <= half_extents.y
                && local.z.abs() <= half_extents.z
        }
    }
}

impl PhysicalDomain {
    /// Submerges dynamic entities whose center entered a body of water and frees those
    /// that left.
    pub(super) fn process_water_bodies(&mut self) {
        let mut previously = std::mem::take(&mut self.submerged);

        for water_id in self.water_bodies.iter().copied().collect::<Vec<_>>() {
            let Some(water) = self.entries.get(&water_id) else {
                continue;
            };
            let EntryKind::Water(shape) = water.kind else {
                continue;
            };
            let Some(water_position) = water
                .collider
                .and_then(|h| self.dynamics.collider_set.get(h))
                .map(|c| *c.position())
            else {
                continue;
            };

            let mut inside: Vec<EntityId> = self
                .entries
                .iter()
                .filter(|(_, e)| e.kind == EntryKind::Rigid)
                .filter_map(|(id, e)| {
                    let body = self.dynamics.rigid_body_set.get(e.body?)?;
                    let center = Point3::from(*body.translation());
                    (body.is_dynamic() && contains_point(&shape, &water_position, &center))
                        .then_some(*id)
                })
                .collect();
            inside.sort_unstable();

            for id in inside {
                self.submerged.insert(id, Some(water_id));
                previously.remove(&id);
                self.set_submerged(id, true);
            }
        }

        // Anything left was submerged last time but isn't inside any water now
        for id in previously.into_keys() {
            if self.submerged.contains_key(&id) {
                continue;
            }
            self.set_submerged(id, false);
        }
    }

    /// Submerges a dynamic entity, or frees one that is currently submerged. Entities
    /// whose mode was changed to something else meanwhile keep it.
    fn set_submerged(&mut self, id: EntityId, submerged: bool) {
        let (mode, gravity_scale, damping) = if submerged {
            (Mode::Submerged, 0.0, consts::SUBMERGED_DAMPING)
        } else {
            (Mode::Free, 1.0, 0.0)
        };

        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        if submerged == (entry.mode == Mode::Submerged) {
            return;
        }
        entry.mode = mode;
        entry.mode_changed = true;
        self.entity(id)
            .borrow_mut()
            .set_property("mode", PropertyValue::from(mode.as_str()));

        if let Some(body) = self.body_mut(id) {
            body.set_gravity_scale(gravity_scale, true);
            body.set_linear_damping(damping);
        }
        self.moving.insert(id);
        debug!(entity = id, submerged, "water transition");
    }
}
