//! Checks of the Rapier3D 0.25 behaviors the domain builds on: heightfield layout,
//! sensor ghosts and half-space borders. These use Rapier directly, with no
//! dependency on DynamicsWorld.
//!
//! Run with: cargo test --test rapier_behavior_test -- --nocapture

use nalgebra::{DMatrix, Unit};
use rapier3d::prelude::*;

// ---------------------------------------------------------------------------
// Shared test pipeline
// ---------------------------------------------------------------------------

/// Minimal Rapier pipeline mirroring DynamicsWorld's fields.
struct TestPipeline {
    gravity: Vector<Real>,
    rigid_body_set: RigidBodySet,
    collider_set: ColliderSet,
    integration_parameters: IntegrationParameters,
    physics_pipeline: PhysicsPipeline,
    island_manager: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    impulse_joint_set: ImpulseJointSet,
    multibody_joint_set: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,
}

impl TestPipeline {
    fn new() -> Self {
        Self {
            gravity: vector![0.0, -9.81, 0.0],
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
        }
    }

    fn step(&mut self) {
        self.integration_parameters.dt = 1.0 / 60.0;
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

    fn step_n(&mut self, n: usize) {
        for _ in 0..n {
            self.step();
        }
    }

    fn drop_ball(&mut self, y: f32) -> RigidBodyHandle {
        let body = self
            .rigid_body_set
            .insert(RigidBodyBuilder::dynamic().translation(vector![0.0, y, 0.0]).build());
        self.collider_set
            .insert_with_parent(ColliderBuilder::ball(0.25).build(), body, &mut self.rigid_body_set);
        body
    }

    fn ground_distance(&mut self, x: f32, z: f32) -> Option<f32> {
        self.query_pipeline.update(&self.collider_set);
        let ray = Ray::new(point![x, 10.0, z], vector![0.0, -1.0, 0.0]);
        self.query_pipeline
            .cast_ray(
                &self.rigid_body_set,
                &self.collider_set,
                &ray,
                100.0,
                true,
                QueryFilter::default(),
            )
            .map(|(_, toi)| toi)
    }
}

// ===========================================================================
// Heightfield matrix layout
// ===========================================================================
#[test]
fn test_heightfield_rows_run_along_z() {
    println!("\n=== Heightfield layout ===");
    let mut tp = TestPipeline::new();

    // Last row raised; 2x2 world units centered on the body
    let heights = DMatrix::from_fn(3, 3, |row, _col| if row == 2 { 4.0 } else { 0.0 });
    let body = tp.rigid_body_set.insert(RigidBodyBuilder::fixed().build());
    tp.collider_set.insert_with_parent(
        ColliderBuilder::heightfield(heights, vector![2.0, 1.0, 2.0]).build(),
        body,
        &mut tp.rigid_body_set,
    );

    let toward_z = tp.ground_distance(0.0, 0.9).expect("hit the heightfield");
    let toward_x = tp.ground_distance(0.9, 0.0).expect("hit the heightfield");
    println!("  ray distance at z=0.9: {toward_z}, at x=0.9: {toward_x}");

    assert!((toward_x - 10.0).abs() < 1e-3, "x direction stays flat");
    assert!((toward_z - 6.4).abs() < 0.05, "z direction climbs the raised row");
}

// ===========================================================================
// Sensors as water ghosts
// ===========================================================================
#[test]
fn test_sensor_collider_lets_bodies_through() {
    println!("\n=== Sensor pass-through ===");
    let mut tp = TestPipeline::new();

    let water = tp.rigid_body_set.insert(RigidBodyBuilder::fixed().translation(vector![0.0, -2.0, 0.0]).build());
    tp.collider_set.insert_with_parent(
        ColliderBuilder::cuboid(5.0, 2.0, 5.0).sensor(true).build(),
        water,
        &mut tp.rigid_body_set,
    );
    let ball = tp.drop_ball(1.0);

    tp.step_n(60);

    let y = tp.rigid_body_set[ball].translation().y;
    println!("  ball after 1s: y = {y}");
    assert!(y < -2.0, "ball fell into the sensor volume");
}

// ===========================================================================
// Half-space borders
// ===========================================================================
#[test]
fn test_halfspace_stops_falling_bodies() {
    println!("\n=== Half-space floor ===");
    let mut tp = TestPipeline::new();

    let floor = tp.rigid_body_set.insert(RigidBodyBuilder::fixed().build());
    tp.collider_set.insert_with_parent(
        ColliderBuilder::halfspace(Unit::new_normalize(vector![0.0, 1.0, 0.0])).build(),
        floor,
        &mut tp.rigid_body_set,
    );
    let ball = tp.drop_ball(2.0);

    tp.step_n(120);

    let body = &tp.rigid_body_set[ball];
    println!("  ball after 2s: y = {}, vy = {}", body.translation().y, body.linvel().y);
    assert!((body.translation().y - 0.25).abs() < 0.05);
    assert!(body.linvel().y.abs() < 0.1);
}
