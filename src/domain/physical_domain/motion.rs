use super::*;

impl PhysicalDomain {
    /// Advances the dynamics world by whole fixed sub-steps, keeping the remainder
    /// for the next tick. Propulsion is applied before every sub-step.
    pub(super) fn step_simulation(&mut self, tick_size: f32) {
        let dt = self.config.physics.fixed_timestep;
        let max_steps = self.config.physics.max_substeps;

        self.step_accumulator += tick_size;
        if self.step_accumulator > dt * max_steps as f32 {
            warn!(
                accumulated = self.step_accumulator,
                max_steps, "physics falling behind, dropping simulation time"
            );
            self.step_accumulator = dt * max_steps as f32;
        }

        // Absorbs rounding so that whole multiples of dt give whole steps
        let steps = ((self.step_accumulator + 1e-6) / dt).floor() as u32;
        self.step_accumulator = (self.step_accumulator - steps as f32 * dt).max(0.0);

        for _ in 0..steps {
            self.apply_propulsion();
            self.dynamics.step(dt);
        }
        if steps > 0 {
            self.sync_motion_states();
        }
    }

    /// Copies the transforms of every awake dynamic body back to its entity.
    pub(super) fn sync_motion_states(&mut self) {
        let active: Vec<RigidBodyHandle> = self.dynamics.island_manager.active_dynamic_bodies().to_vec();

        for handle in active {
            let Some(&id) = self.dynamics.body_to_entity.get(&handle) else {
                continue;
            };
            let Some(entry) = self.entries.get(&id) else {
                continue;
            };
            let Some(body) = self.dynamics.rigid_body_set.get(handle) else {
                continue;
            };
            let offset = entry
                .shape
                .as_ref()
                .map_or_else(Vector3::zeros, |s| s.center_of_mass_offset);

            // Inverse of the center-of-mass shift applied when placing the body
            let placed = body.position() * Translation3::from(offset);
            let settle = |v: Vector3<f32>| {
                if v.norm_squared() < consts::MIN_VELOCITY_SQUARED {
                    Vector3::zeros()
                } else {
                    v
                }
            };
            let linvel = settle(*body.linvel());
            let angvel = settle(*body.angvel());

            let pos = Point3::from(placed.translation.vector);
            {
                let entity_ref = self.entity(id);
                let mut entity = entity_ref.borrow_mut();
                entity.location.pos = Some(pos);
                entity.location.orientation = Some(placed.rotation);
                entity.location.velocity = Some(linvel);
                entity.location.angular_velocity = Some(angvel);
            }

            self.move_visibility_proxies(id, &pos);
            self.moving.insert(id);
            self.dirty.insert(id);
        }
    }

    /// Sends a movement to every observer of `id` if its location changed noticeably.
    pub(super) fn process_moved_entity(&mut self, id: EntityId) {
        let entity_ref = self.entity(id);
        let time = self.time;
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };

        // Unobserved moves aren't recorded; the next observer gets the full difference
        if entry.observing_this.is_empty() {
            self.update_terrain_mod(id, false);
            return;
        }
        let mode = entry.mode_changed.then_some(entry.mode);
        let movement = entry
            .last_sent
            .diff(id, &entity_ref.borrow().location, mode, time);
        if let Some(movement) = movement {
            entry.mode_changed = false;
            let observers: Vec<EntityId> = entry.observing_this.iter().copied().collect();
            for observer in observers {
                self.notify(Notification::Sight {
                    observer,
                    movement: movement.clone(),
                });
            }
        }

        self.update_terrain_mod(id, false);
    }
}
