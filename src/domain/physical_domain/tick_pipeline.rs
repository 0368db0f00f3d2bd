use super::*;

impl PhysicalDomain {
    /// Advances the domain by `tick_size` seconds.
    pub fn tick(&mut self, tick_size: f64) {
        run_tick_phases(self, tick_size);
    }
}

/// Executes simulation phases for one tick.
/// physics sub-steps -> visibility -> water -> moved -> stopped -> terrain.
fn run_tick_phases(domain: &mut PhysicalDomain, tick_size: f64) {
    // Propulsion runs inside, before every sub-step.
    domain.step_simulation(tick_size as f32);

    // Visibility is only recomputed every few seconds.
    domain.visibility_countdown -= tick_size as f32;
    if domain.visibility_countdown <= 0.0 {
        domain.update_visibility_of_dirty_entries();
        domain.visibility_countdown = domain.config.visibility.check_interval;
    }

    domain.process_water_bodies();

    let moved: Vec<EntityId> = domain.moving.iter().copied().collect();
    for id in moved {
        if domain.entries.contains_key(&id) {
            domain.process_moved_entity(id);
        }
    }

    // Entities that moved last tick but not this one have come to rest.
    let stopped: Vec<EntityId> = domain
        .last_moving
        .difference(&domain.moving)
        .copied()
        .collect();
    for id in stopped {
        if !domain.entries.contains_key(&id) {
            continue;
        }
        {
            let entity_ref = domain.entity(id);
            let mut entity = entity_ref.borrow_mut();
            entity.location.velocity = Some(Vector3::zeros());
            entity.location.angular_velocity = Some(Vector3::zeros());
        }
        domain.process_moved_entity(id);
    }
    domain.last_moving = std::mem::take(&mut domain.moving);

    // Rebuild terrain touched by modifiers or edits during this tick.
    domain.process_dirty_terrain_areas();

    domain.time += tick_size;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moving_entity_is_reported_to_observers_then_stops() {
        let container = LocatedEntity::new(0).into_ref();
        let mut domain = PhysicalDomain::new(&container, DomainConfig::default());
        let watcher = LocatedEntity::new(1)
            .with_pos(5.0, 0.0, 0.0)
            .with_property("mode", "fixed")
            .perceptive()
            .into_ref();
        let ball = LocatedEntity::new(2)
            .with_pos(0.0, 3.0, 0.0)
            .with_bbox([-0.25, 0.0, -0.25], [0.25, 0.5, 0.25])
            .with_property("mass", 1.0)
            .into_ref();
        domain.add_entity(&watcher);
        domain.add_entity(&ball);
        assert!(domain.is_entity_visible_for(1, 2));
        domain.drain_notifications();

        domain.tick(0.1);
        let sights: Vec<Notification> = domain
            .drain_notifications()
            .into_iter()
            .filter(|n| matches!(n, Notification::Sight { observer: 1, .. }))
            .collect();
        assert_eq!(sights.len(), 1, "the falling ball is seen once per tick");
        assert!(domain.last_moving.contains(&2));

        // Pinning the ball stops it; the next tick reports the stop
        ball.borrow_mut().set_property("mode", "fixed".into());
        domain.child_entity_property_applied(2, "mode");
        domain.tick(0.1);
        domain.tick(0.1);

        let stop = domain.drain_notifications().into_iter().find_map(|n| match n {
            Notification::Sight { movement, .. } if movement.velocity == Some([0.0; 3]) => {
                Some(movement)
            }
            _ => None,
        });
        assert!(stop.is_some(), "observers learn the ball stopped");
        assert!(domain.last_moving.is_empty());
    }

    #[test]
    fn test_time_advances_by_tick_size() {
        let container = LocatedEntity::new(0).into_ref();
        let mut domain = PhysicalDomain::new(&container, DomainConfig::default());
        domain.tick(0.25);
        domain.tick(0.5);
        assert!((domain.time - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_visibility_pass_waits_for_interval() {
        let container = LocatedEntity::new(0).into_ref();
        let mut domain = PhysicalDomain::new(&container, DomainConfig::default());
        let watcher = LocatedEntity::new(1)
            .with_pos(0.0, 0.0, 0.0)
            .with_property("mode", "fixed")
            .perceptive()
            .into_ref();
        let rock = LocatedEntity::new(2)
            .with_pos(500.0, 0.0, 0.0)
            .with_property("mode", "fixed")
            .into_ref();
        domain.add_entity(&watcher);
        domain.add_entity(&rock);
        assert!(!domain.is_entity_visible_for(1, 2));

        domain.apply_transform(2, None, Some(Point3::new(1.0, 0.0, 0.0)), None);
        domain.tick(0.5);
        assert!(!domain.is_entity_visible_for(1, 2), "not yet checked");

        for _ in 0..4 {
            domain.tick(0.5);
        }
        assert!(domain.is_entity_visible_for(1, 2));
    }
}
