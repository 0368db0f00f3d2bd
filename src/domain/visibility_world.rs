//! Secondary collision world holding the perception proxies.
//!
//! Proxies are parentless ball colliders. Coordinates are divided by the
//! scaling factor so that a whole domain fits a small numeric range.

use nalgebra::Point3;
use rapier3d::prelude::*;
use std::collections::{BTreeSet, HashMap};

use super::entity::EntityId;

const GROUP_OBSERVABLE: Group = Group::GROUP_1;
const GROUP_VIEW: Group = Group::GROUP_2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    /// "This entity can be observed"
    Observable,
    /// "This entity can observe"
    View,
}

impl ProxyKind {
    fn groups(self) -> InteractionGroups {
        match self {
            ProxyKind::Observable => InteractionGroups::new(GROUP_OBSERVABLE, GROUP_VIEW),
            ProxyKind::View => InteractionGroups::new(GROUP_VIEW, GROUP_OBSERVABLE),
        }
    }
}

pub struct VisibilityWorld {
    scaling_factor: f32,
    rigid_body_set: RigidBodySet,
    collider_set: ColliderSet,
    island_manager: IslandManager,
    query_pipeline: QueryPipeline,
    proxy_owner: HashMap<ColliderHandle, EntityId>,
    needs_update: bool,
}

impl VisibilityWorld {
    pub fn new(scaling_factor: f32) -> Self {
        Self {
            scaling_factor,
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            island_manager: IslandManager::new(),
            query_pipeline: QueryPipeline::new(),
            proxy_owner: HashMap::new(),
            needs_update: false,
        }
    }

    pub fn scaling_factor(&self) -> f32 {
        self.scaling_factor
    }

    fn scaled(&self, pos: &Point3<f32>) -> Vector<Real> {
        pos.coords / self.scaling_factor
    }

    /// Adds a proxy for `owner` at world position `pos`. `radius` is already scaled.
    pub fn insert_proxy(
        &mut self,
        owner: EntityId,
        kind: ProxyKind,
        radius: f32,
        pos: &Point3<f32>,
    ) -> ColliderHandle {
        let collider = ColliderBuilder::ball(radius)
            .translation(self.scaled(pos))
            .collision_groups(kind.groups())
            .sensor(true)
            .build();
        let handle = self.collider_set.insert(collider);
        self.proxy_owner.insert(handle, owner);
        self.needs_update = true;
        handle
    }

    pub fn remove_proxy(&mut self, handle: ColliderHandle) {
        self.proxy_owner.remove(&handle);
        self.collider_set.remove(
            handle,
            &mut self.island_manager,
            &mut self.rigid_body_set,
            false,
        );
        self.needs_update = true;
    }

    pub fn move_proxy(&mut self, handle: ColliderHandle, pos: &Point3<f32>) {
        let translation = self.scaled(pos);
        if let Some(collider) = self.collider_set.get_mut(handle) {
            collider.set_translation(translation);
            self.needs_update = true;
        }
    }

    /// Owners of the opposite proxy kind touching the proxy `handle`.
    pub fn contact_test(&mut self, handle: ColliderHandle, kind: ProxyKind) -> BTreeSet<EntityId> {
        if self.needs_update {
            self.query_pipeline.update(&self.collider_set);
            self.needs_update = false;
        }

        let mut found = BTreeSet::new();
        let Some(collider) = self.collider_set.get(handle) else {
            return found;
        };
        let filter = QueryFilter::default()
            .groups(kind.groups())
            .exclude_collider(handle);
        self.query_pipeline.intersections_with_shape(
            &self.rigid_body_set,
            &self.collider_set,
            collider.position(),
            collider.shape(),
            filter,
            |other| {
                if let Some(&owner) = self.proxy_owner.get(&other) {
                    found.insert(owner);
                }
                true
            },
        );
        found
    }

    pub fn proxy_count(&self) -> usize {
        self.proxy_owner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_sees_overlapping_observables_only() {
        let mut world = VisibilityWorld::new(100.0);
        let view = world.insert_proxy(1, ProxyKind::View, 0.005, &Point3::new(0.0, 0.0, 0.0));
        world.insert_proxy(1, ProxyKind::Observable, 0.01, &Point3::new(0.0, 0.0, 0.0));
        world.insert_proxy(2, ProxyKind::Observable, 0.01, &Point3::new(1.0, 0.0, 0.0));
        world.insert_proxy(3, ProxyKind::Observable, 0.01, &Point3::new(500.0, 0.0, 0.0));
        world.insert_proxy(4, ProxyKind::View, 0.005, &Point3::new(1.0, 0.0, 0.0));

        let seen = world.contact_test(view, ProxyKind::View);
        assert_eq!(seen.into_iter().collect::<Vec<_>>(), vec![1, 2], "views never see views");
    }

    #[test]
    fn test_moved_and_removed_proxies_are_tracked() {
        let mut world = VisibilityWorld::new(100.0);
        let observable = world.insert_proxy(2, ProxyKind::Observable, 0.01, &Point3::origin());
        world.insert_proxy(1, ProxyKind::View, 0.005, &Point3::new(300.0, 0.0, 0.0));
        let view = world.insert_proxy(5, ProxyKind::View, 0.005, &Point3::origin());

        let watchers = world.contact_test(observable, ProxyKind::Observable);
        assert_eq!(watchers.into_iter().collect::<Vec<_>>(), vec![5]);

        world.move_proxy(observable, &Point3::new(300.0, 0.0, 0.0));
        let watchers = world.contact_test(observable, ProxyKind::Observable);
        assert_eq!(watchers.into_iter().collect::<Vec<_>>(), vec![1]);

        world.remove_proxy(observable);
        assert!(world.contact_test(view, ProxyKind::View).is_empty());
        assert_eq!(world.proxy_count(), 2);
    }
}
