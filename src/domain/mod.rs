//! Spatial simulation of the entities inside a containing entity: rigid-body
//! physics, terrain, water, self-propulsion and perception.

pub mod constants;
pub mod entity;
pub mod geometry;
pub mod notifications;
pub mod physical_domain;
pub mod physics;
pub mod terrain;
pub mod visibility_world;

pub use entity::{BBox, EntityId, EntityRef, LocatedEntity, Location, Mode, PropertyValue};
pub use notifications::{Move, Notification};
pub use physical_domain::{EntryKind, PhysicalDomain, SimulationEntry, WaterShape};
pub use terrain::{Area, Terrain};
