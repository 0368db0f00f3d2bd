use rapier3d::prelude::*;
use std::collections::{BTreeSet, HashMap};

use super::entity::EntityId;

// Collision groups for the dynamics world
pub const GROUP_PHYSICAL: Group = Group::GROUP_1; // Solid simulated entities
pub const GROUP_NON_PHYSICAL: Group = Group::GROUP_2; // Non-solid simulated entities
pub const GROUP_TERRAIN: Group = Group::GROUP_3; // Terrain pages, borders, water
pub const GROUP_STATIC: Group = Group::GROUP_4; // Fixed, planted and floating entities

/// Collision groups for terrain pages and domain borders.
pub fn terrain_groups() -> InteractionGroups {
    InteractionGroups::new(GROUP_TERRAIN, GROUP_PHYSICAL | GROUP_NON_PHYSICAL)
}

/// Wrapper around the Rapier3D pipeline that simulates domain entities.
/// Every collider belonging to an entity is registered in `collider_to_entity`.
pub struct DynamicsWorld {
    pub gravity: Vector<Real>,
    pub rigid_body_set: RigidBodySet,
    pub collider_set: ColliderSet,
    pub integration_parameters: IntegrationParameters,
    pub physics_pipeline: PhysicsPipeline,
    pub island_manager: IslandManager,
    pub broad_phase: DefaultBroadPhase,
    pub narrow_phase: NarrowPhase,
    pub impulse_joint_set: ImpulseJointSet,
    pub multibody_joint_set: MultibodyJointSet,
    pub ccd_solver: CCDSolver,
    pub query_pipeline: QueryPipeline,

    /// Maps Rapier collider handle to the owning entity
    pub collider_to_entity: HashMap<ColliderHandle, EntityId>,
    /// Maps Rapier rigid body handle to the owning entity
    pub body_to_entity: HashMap<RigidBodyHandle, EntityId>,
}

impl DynamicsWorld {
    pub fn new(gravity_y: f32) -> Self {
        Self {
            gravity: vector![0.0, -gravity_y, 0.0],
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            integration_parameters: IntegrationParameters::default(),
            physics_pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            collider_to_entity: HashMap::new(),
            body_to_entity: HashMap::new(),
        }
    }

    /// Steps the physics simulation forward by dt seconds
    pub fn step(&mut self, dt: f32) {
        self.integration_parameters.dt = dt;
        self.physics_pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &(),
            &(),
        );
    }

    /// Inserts a body with a single collider owned by `entity`.
    pub fn insert_body(
        &mut self,
        entity: EntityId,
        body: RigidBody,
        collider: Collider,
    ) -> (RigidBodyHandle, ColliderHandle) {
        let body_handle = self.rigid_body_set.insert(body);
        let collider_handle =
            self.collider_set
                .insert_with_parent(collider, body_handle, &mut self.rigid_body_set);
        self.collider_to_entity.insert(collider_handle, entity);
        self.body_to_entity.insert(body_handle, entity);
        (body_handle, collider_handle)
    }

    /// Inserts a body that doesn't belong to any entity, such as a terrain page.
    pub fn insert_unowned(&mut self, body: RigidBody, collider: Collider) -> (RigidBodyHandle, ColliderHandle) {
        let body_handle = self.rigid_body_set.insert(body);
        let collider_handle =
            self.collider_set
                .insert_with_parent(collider, body_handle, &mut self.rigid_body_set);
        (body_handle, collider_handle)
    }

    /// Inserts a collider without a body. Used for water ghosts and domain borders.
    pub fn insert_parentless(&mut self, entity: Option<EntityId>, collider: Collider) -> ColliderHandle {
        let handle = self.collider_set.insert(collider);
        if let Some(entity) = entity {
            self.collider_to_entity.insert(handle, entity);
        }
        handle
    }

    /// Removes a body together with its colliders
    pub fn remove_body(&mut self, handle: RigidBodyHandle) {
        self.body_to_entity.remove(&handle);
        // Remove collider->entity mappings before destroying the body
        if let Some(body) = self.rigid_body_set.get(handle) {
            for ch in body.colliders() {
                self.collider_to_entity.remove(ch);
            }
        }
        self.rigid_body_set.remove(
            handle,
            &mut self.island_manager,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            true,
        );
    }

    pub fn remove_collider(&mut self, handle: ColliderHandle) {
        self.collider_to_entity.remove(&handle);
        self.collider_set.remove(
            handle,
            &mut self.island_manager,
            &mut self.rigid_body_set,
            true,
        );
    }

    /// Refreshes the query pipeline after bodies were added or moved outside a step.
    pub fn update_queries(&mut self) {
        self.query_pipeline.update(&self.collider_set);
    }

    /// Entities whose colliders intersect `shape` placed at `position`.
    pub fn entities_intersecting(
        &self,
        position: &Isometry<Real>,
        shape: &dyn Shape,
        groups: InteractionGroups,
    ) -> BTreeSet<EntityId> {
        let mut found = BTreeSet::new();
        let filter = QueryFilter::default().groups(groups);
        self.query_pipeline.intersections_with_shape(
            &self.rigid_body_set,
            &self.collider_set,
            position,
            shape,
            filter,
            |handle| {
                if let Some(&entity) = self.collider_to_entity.get(&handle) {
                    found.insert(entity);
                }
                true
            },
        );
        found
    }

    /// True if any contact point on `collider` lies at or below its local origin.
    pub fn is_grounded(&self, collider: ColliderHandle) -> bool {
        for pair in self.narrow_phase.contact_pairs_with(collider) {
            if !pair.has_any_active_contact {
                continue;
            }
            let ours_is_first = pair.collider1 == collider;
            for manifold in &pair.manifolds {
                for point in &manifold.points {
                    let local = if ours_is_first {
                        point.local_p1
                    } else {
                        point.local_p2
                    };
                    if local.y <= 0.0 {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Local-space contact points on `collider` from penetrating contacts, with contact normals.
    /// Normals point away from `collider`.
    pub fn contact_points(&self, collider: ColliderHandle) -> Vec<(Point<Real>, Vector<Real>)> {
        let mut points = Vec::new();
        for pair in self.narrow_phase.contact_pairs_with(collider) {
            let ours_is_first = pair.collider1 == collider;
            for manifold in &pair.manifolds {
                for point in &manifold.points {
                    if point.dist > 0.0 {
                        continue;
                    }
                    if ours_is_first {
                        points.push((point.local_p1, manifold.local_n1));
                    } else {
                        points.push((point.local_p2, manifold.local_n2));
                    }
                }
            }
        }
        points
    }

    /// Entities resting on top of `collider`: for a penetrating contact, the point
    /// on our collider sits above the point on the other one.
    pub fn entities_resting_on(&self, collider: ColliderHandle) -> BTreeSet<EntityId> {
        let mut resting = BTreeSet::new();
        for pair in self.narrow_phase.contact_pairs_with(collider) {
            let (ours, other) = if pair.collider1 == collider {
                (pair.collider1, pair.collider2)
            } else {
                (pair.collider2, pair.collider1)
            };
            let Some(&other_entity) = self.collider_to_entity.get(&other) else {
                continue;
            };
            let (Some(ours_co), Some(other_co)) =
                (self.collider_set.get(ours), self.collider_set.get(other))
            else {
                continue;
            };
            if other_co.is_sensor() {
                continue;
            }
            let first_is_ours = pair.collider1 == collider;
            let supports = pair.manifolds.iter().any(|manifold| {
                manifold.points.iter().any(|point| {
                    if point.dist >= 0.0 {
                        return false;
                    }
                    let (local_ours, local_other) = if first_is_ours {
                        (point.local_p1, point.local_p2)
                    } else {
                        (point.local_p2, point.local_p1)
                    };
                    let world_ours = ours_co.position() * local_ours;
                    let world_other = other_co.position() * local_other;
                    world_ours.y > world_other.y
                })
            });
            if supports {
                resting.insert(other_entity);
            }
        }
        resting
    }
}
