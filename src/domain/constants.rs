//! Simulation, visibility and movement constants shared across the domain.

/// Physics constants
pub mod physics {
    /// Default downward gravity in m/s²
    pub const DEFAULT_GRAVITY: f32 = 9.81;

    /// Fixed sub-step for physics simulation (60 Hz)
    pub const TIMESTEP: f32 = 1.0 / 60.0;

    /// Upper bound on sub-steps per tick
    pub const MAX_SUBSTEPS: u32 = 8;

    /// Height of the terrain contact volume when the domain has no bounds
    pub const DEFAULT_WORLD_HEIGHT: f32 = 1000.0;

    /// CCD motion threshold as a fraction of the smallest bbox dimension
    pub const CCD_MOTION_FACTOR: f32 = 0.2;

    /// Velocities with a smaller squared magnitude are snapped to zero
    pub const MIN_VELOCITY_SQUARED: f32 = 0.001;

    /// Linear damping applied to submerged bodies
    pub const SUBMERGED_DAMPING: f32 = 0.8;

    /// Friction used while an entity is propelling itself
    pub const PROPEL_FRICTION: f32 = 0.5;

    /// Friction restored when no "friction" property is present
    pub const DEFAULT_FRICTION: f32 = 1.0;

    /// Segments used for the hull approximating a cylinder
    pub const CYLINDER_SEGMENTS: usize = 16;
}

/// Visibility world constants
pub mod visibility {
    /// World coordinates are divided by this in the visibility world
    pub const SCALING_FACTOR: f32 = 100.0;

    /// Seconds between two visibility passes
    pub const CHECK_INTERVAL_SECONDS: f32 = 2.0;

    /// Radius of the view sphere, before scaling
    pub const VIEW_SPHERE_RADIUS: f32 = 0.5;

    /// Observable radius used when neither visibility nor bbox is known
    pub const DEFAULT_OBSERVABLE_RADIUS: f32 = 0.25;
}

/// Move notification tolerances
pub mod notify {
    /// Velocity and angular velocity comparison epsilon
    pub const FUZZY_EPSILON: f32 = 0.01;

    /// Orientation comparison epsilon
    pub const ORIENTATION_EPSILON: f32 = 0.1;
}

/// Terrain constants
pub mod terrain {
    /// Samples per segment edge, minus one
    pub const DEFAULT_RESOLUTION: i32 = 64;
}
