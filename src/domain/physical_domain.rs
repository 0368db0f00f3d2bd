use crossbeam_channel::{Receiver, Sender};
use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion, Vector3};
use rapier3d::prelude::*;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::constants::{physics as consts, visibility as visibility_consts};
use super::entity::{BBox, EntityId, EntityRef, LocatedEntity, Mode, PropertyValue};
use super::geometry::{create_box_shape, BuiltShape, Geometry, ShapeClass};
use super::notifications::{LastSentLocation, Notification};
use super::physics::{
    terrain_groups, DynamicsWorld, GROUP_NON_PHYSICAL, GROUP_PHYSICAL, GROUP_STATIC, GROUP_TERRAIN,
};
use super::terrain::{Area, SegmentKey, Terrain};
use super::visibility_world::{ProxyKind, VisibilityWorld};
use crate::config::DomainConfig;

mod motion;
mod movement;
mod registry;
mod terrain_pages;
mod tick_pipeline;
mod visibility;
mod water;

/// Shape of a body of water.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WaterShape {
    /// Box with the given half-extents, centered on the ghost collider
    Box { half_extents: Vector3<f32> },
    /// Everything at or below the ghost collider's height
    Plane,
}

/// What kind of simulation object an entry carries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntryKind {
    /// The entity owning the domain
    Container,
    Rigid,
    Water(WaterShape),
}

/// Simulation-side record for one entity.
pub struct SimulationEntry {
    entity: Weak<RefCell<LocatedEntity>>,
    pub(crate) kind: EntryKind,
    pub(crate) body: Option<RigidBodyHandle>,
    pub(crate) collider: Option<ColliderHandle>,
    pub(crate) shape: Option<BuiltShape>,
    pub(crate) mode: Mode,
    pub(crate) mass: f32,
    pub(crate) speed_ground: f32,
    pub(crate) speed_water: f32,
    pub(crate) speed_flight: f32,
    pub(crate) observable_radius: f32,
    pub(crate) observable_proxy: Option<ColliderHandle>,
    pub(crate) view_proxy: Option<ColliderHandle>,
    /// Entities this entry currently observes
    pub(crate) observed_by_this: BTreeSet<EntityId>,
    /// Entities currently observing this entry
    pub(crate) observing_this: BTreeSet<EntityId>,
    pub(crate) last_sent: LastSentLocation,
    pub(crate) mode_changed: bool,
}

impl SimulationEntry {
    fn new(entity: &EntityRef, kind: EntryKind) -> Self {
        Self {
            entity: Rc::downgrade(entity),
            kind,
            body: None,
            collider: None,
            shape: None,
            mode: Mode::Free,
            mass: 0.0,
            speed_ground: 0.0,
            speed_water: 0.0,
            speed_flight: 0.0,
            observable_radius: visibility_consts::DEFAULT_OBSERVABLE_RADIUS,
            observable_proxy: None,
            view_proxy: None,
            observed_by_this: BTreeSet::new(),
            observing_this: BTreeSet::new(),
            last_sent: LastSentLocation::default(),
            mode_changed: false,
        }
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Effective mass; zero for static bodies.
    pub fn mass(&self) -> f32 {
        self.mass
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    pub fn shape_class(&self) -> Option<ShapeClass> {
        self.shape.as_ref().map(|s| s.class)
    }

    pub fn observed_by_this(&self) -> &BTreeSet<EntityId> {
        &self.observed_by_this
    }

    pub fn observing_this(&self) -> &BTreeSet<EntityId> {
        &self.observing_this
    }

    pub fn has_view_proxy(&self) -> bool {
        self.view_proxy.is_some()
    }

    pub fn has_observable_proxy(&self) -> bool {
        self.observable_proxy.is_some()
    }
}

/// Steering applied before every physics sub-step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PropelRecord {
    /// Desired horizontal velocity, before speed scaling
    pub velocity: Vector3<f32>,
    /// Height of obstacles the entity may climb while propelling
    pub step_height: f32,
}

/// Terrain modifier applied on behalf of a planted entity.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TerrainModRecord {
    pub pos: Point3<f32>,
    pub orientation: Option<UnitQuaternion<f32>>,
    pub area: Area,
}

/// Static collision geometry built from one terrain segment.
pub(crate) struct TerrainPage {
    pub body: RigidBodyHandle,
    pub collider: ColliderHandle,
}

/// Simulates every entity inside a containing entity and tracks who can see whom.
pub struct PhysicalDomain {
    pub(crate) config: DomainConfig,
    pub(crate) domain_id: EntityId,
    domain_entity: EntityRef,
    pub(crate) dynamics: DynamicsWorld,
    pub(crate) visibility: VisibilityWorld,
    pub(crate) entries: HashMap<EntityId, SimulationEntry>,

    pub(crate) terrain: Option<Terrain>,
    pub(crate) terrain_pages: BTreeMap<SegmentKey, TerrainPage>,
    pub(crate) terrain_mods: HashMap<EntityId, TerrainModRecord>,
    pub(crate) dirty_terrain_areas: Vec<Area>,
    pub(crate) border_planes: Vec<ColliderHandle>,

    pub(crate) propelling: BTreeMap<EntityId, PropelRecord>,
    pub(crate) water_bodies: BTreeSet<EntityId>,
    /// Submerged entity -> water body it is in; None once that body is gone
    pub(crate) submerged: BTreeMap<EntityId, Option<EntityId>>,

    /// Entries awaiting a visibility pass
    pub(crate) dirty: BTreeSet<EntityId>,
    pub(crate) moving: BTreeSet<EntityId>,
    pub(crate) last_moving: BTreeSet<EntityId>,

    pub(crate) visibility_countdown: f32,
    pub(crate) step_accumulator: f32,
    pub(crate) time: f64,

    geometry_cache: HashMap<String, Arc<Geometry>>,
    notification_sender: Sender<Notification>,
    notification_receiver: Receiver<Notification>,
}

impl PhysicalDomain {
    /// Creates the domain for `domain_entity`, building terrain pages and borders.
    pub fn new(domain_entity: &EntityRef, config: DomainConfig) -> Self {
        let (notification_sender, notification_receiver) = crossbeam_channel::unbounded();
        let domain_id = domain_entity.borrow().id;

        let mut domain = Self {
            dynamics: DynamicsWorld::new(config.physics.gravity),
            visibility: VisibilityWorld::new(config.visibility.scaling_factor),
            visibility_countdown: config.visibility.check_interval,
            config,
            domain_id,
            domain_entity: Rc::clone(domain_entity),
            entries: HashMap::new(),
            terrain: None,
            terrain_pages: BTreeMap::new(),
            terrain_mods: HashMap::new(),
            dirty_terrain_areas: Vec::new(),
            border_planes: Vec::new(),
            propelling: BTreeMap::new(),
            water_bodies: BTreeSet::new(),
            submerged: BTreeMap::new(),
            dirty: BTreeSet::new(),
            moving: BTreeSet::new(),
            last_moving: BTreeSet::new(),
            step_accumulator: 0.0,
            time: 0.0,
            geometry_cache: HashMap::new(),
            notification_sender,
            notification_receiver,
        };

        domain
            .entries
            .insert(domain_id, SimulationEntry::new(domain_entity, EntryKind::Container));
        domain.create_domain_borders();
        domain.load_terrain();

        info!(
            domain = domain_id,
            terrain_pages = domain.terrain_pages.len(),
            "physical domain created"
        );
        domain
    }

    /// Id of the entity owning this domain.
    pub fn domain_id(&self) -> EntityId {
        self.domain_id
    }

    pub fn config(&self) -> &DomainConfig {
        &self.config
    }

    pub fn entry(&self, id: EntityId) -> Option<&SimulationEntry> {
        self.entries.get(&id)
    }

    /// Registered entity ids, in ascending order.
    pub fn entity_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Receiver for every notification produced by this domain.
    pub fn notifications(&self) -> Receiver<Notification> {
        self.notification_receiver.clone()
    }

    /// Takes all notifications produced so far.
    pub fn drain_notifications(&self) -> Vec<Notification> {
        self.notification_receiver.try_iter().collect()
    }

    pub(crate) fn notify(&self, notification: Notification) {
        // The domain holds its own receiver, so the channel is never disconnected
        let _ = self.notification_sender.send(notification);
    }

    /// Strong handle to a registered entity. Entities must outlive their entries.
    pub(crate) fn entity(&self, id: EntityId) -> EntityRef {
        if id == self.domain_id {
            return Rc::clone(&self.domain_entity);
        }
        let entry = self
            .entries
            .get(&id)
            .unwrap_or_else(|| panic!("entity {id} is not registered in the domain"));
        entry
            .entity
            .upgrade()
            .unwrap_or_else(|| panic!("entity {id} was dropped while still in the domain"))
    }

    /// Mass of the simulated body, if the entity currently has one.
    pub fn body_mass(&self, id: EntityId) -> Option<f32> {
        let handle = self.entries.get(&id)?.body?;
        self.dynamics.rigid_body_set.get(handle).map(|b| b.mass())
    }

    /// Terrain footprints queued for page rebuild.
    pub fn pending_terrain_areas(&self) -> &[Area] {
        &self.dirty_terrain_areas
    }

    pub fn terrain_page_count(&self) -> usize {
        self.terrain_pages.len()
    }

    // ---------------------------------------------------------------
    // Collaborator queries
    // ---------------------------------------------------------------

    /// True if `observer` currently observes `observed`.
    pub fn is_entity_visible_for(&self, observer: EntityId, observed: EntityId) -> bool {
        self.entries
            .get(&observer)
            .map_or(false, |e| e.observed_by_this.contains(&observed))
    }

    /// Entities currently observed by `observer`.
    pub fn get_visible_entities_for(&self, observer: EntityId) -> Vec<EntityId> {
        self.entries
            .get(&observer)
            .map(|e| e.observed_by_this.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Entities currently observing `observed`.
    pub fn get_observing_entities_for(&self, observed: EntityId) -> Vec<EntityId> {
        self.entries
            .get(&observed)
            .map(|e| e.observing_this.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Terrain height at (x, z). None when there's no terrain there.
    pub fn get_terrain_height(&mut self, x: f32, z: f32) -> Option<f32> {
        self.terrain.as_mut()?.height_at(x, z)
    }

    // ---------------------------------------------------------------
    // Shared helpers
    // ---------------------------------------------------------------

    /// Parses the entity's geometry, sharing parsed meshes between entities.
    pub(crate) fn geometry_for(&mut self, entity: &LocatedEntity) -> Option<Arc<Geometry>> {
        let value = entity.property("geometry")?;
        let key = serde_json::to_string(value).unwrap_or_default();
        if let Some(geometry) = self.geometry_cache.get(&key) {
            return Some(Arc::clone(geometry));
        }
        let geometry = Arc::new(Geometry::from_property(
            value,
            self.config.mesh_asset_dir.as_deref(),
        ));
        self.geometry_cache.insert(key, Arc::clone(&geometry));
        Some(geometry)
    }

    /// Builds the entity's shape from its geometry, or a plain box.
    pub(crate) fn build_shape(&mut self, entity: &LocatedEntity, bbox: &BBox, mass: f32) -> BuiltShape {
        match self.geometry_for(entity) {
            Some(geometry) => geometry.create_shape(bbox, mass),
            None => create_box_shape(bbox),
        }
    }

    /// World transform of the body for an entity at `pos`/`orientation`.
    pub(crate) fn body_isometry(
        pos: &Point3<f32>,
        orientation: &UnitQuaternion<f32>,
        center_of_mass_offset: &Vector3<f32>,
    ) -> Isometry3<f32> {
        Isometry3::from_parts(Translation3::from(pos.coords), *orientation)
            * Translation3::from(-center_of_mass_offset)
    }

    /// Collision groups for an entity in `mode`.
    pub(crate) fn collision_groups(mode: Mode, solid: bool) -> InteractionGroups {
        if mode.is_static() {
            if solid {
                InteractionGroups::new(GROUP_STATIC, GROUP_PHYSICAL)
            } else {
                InteractionGroups::none()
            }
        } else if solid {
            InteractionGroups::new(GROUP_PHYSICAL, GROUP_PHYSICAL | GROUP_TERRAIN | GROUP_STATIC)
        } else {
            InteractionGroups::new(GROUP_NON_PHYSICAL, GROUP_TERRAIN)
        }
    }

    pub(crate) fn water_groups() -> InteractionGroups {
        InteractionGroups::new(GROUP_TERRAIN, GROUP_PHYSICAL | GROUP_NON_PHYSICAL)
    }

    /// Friction restored when an entity stops propelling.
    pub(crate) fn declared_friction(entity: &LocatedEntity) -> f32 {
        entity
            .property_f32("friction")
            .unwrap_or(consts::DEFAULT_FRICTION)
    }

    pub(crate) fn warn_spinning_friction(id: EntityId, value: f32) {
        warn!(
            entity = id,
            value, "spinning friction is not supported by the physics engine, ignoring"
        );
    }

    pub(crate) fn log_entry_created(id: EntityId, kind: EntryKind, in_world: bool) {
        debug!(entity = id, ?kind, in_world, "simulation entry created");
    }
}
