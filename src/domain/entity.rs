//! Entity data the domain reads from: location, typed properties and movement mode.
//!
//! Entities are owned by the caller. The domain only keeps weak references and
//! re-reads properties whenever it is told one of them changed.

use nalgebra::{Point3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

pub type EntityId = u64;

/// Shared handle to an entity, as held by the caller.
pub type EntityRef = Rc<RefCell<LocatedEntity>>;

/// A dynamically typed property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<PropertyValue>),
    Map(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Int(v) => Some(*v as f64),
            PropertyValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[PropertyValue]> {
        match self {
            PropertyValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, PropertyValue>> {
        match self {
            PropertyValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Reads a list of numbers, failing if any element isn't numeric.
    pub fn as_f32_list(&self) -> Option<Vec<f32>> {
        self.as_list()?
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect()
    }

    pub fn as_vector3(&self) -> Option<Vector3<f32>> {
        match self.as_f32_list()?.as_slice() {
            [x, y, z] => Some(Vector3::new(*x, *y, *z)),
            _ => None,
        }
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

/// Axis-aligned bounding box in entity-local coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub low: Point3<f32>,
    pub high: Point3<f32>,
}

impl BBox {
    pub fn new(low: Point3<f32>, high: Point3<f32>) -> Self {
        Self { low, high }
    }

    /// Parses `[lx, ly, lz, hx, hy, hz]`.
    pub fn from_property(value: &PropertyValue) -> Option<Self> {
        match value.as_f32_list()?.as_slice() {
            [lx, ly, lz, hx, hy, hz] => Some(Self::new(
                Point3::new(*lx, *ly, *lz),
                Point3::new(*hx, *hy, *hz),
            )),
            _ => None,
        }
    }

    pub fn to_property(&self) -> PropertyValue {
        PropertyValue::List(
            [
                self.low.x, self.low.y, self.low.z, self.high.x, self.high.y, self.high.z,
            ]
            .iter()
            .map(|v| PropertyValue::Float(*v as f64))
            .collect(),
        )
    }

    /// A box is valid when it isn't inverted and all corners are finite.
    pub fn is_valid(&self) -> bool {
        self.low.iter().chain(self.high.iter()).all(|v| v.is_finite())
            && self.low.x <= self.high.x
            && self.low.y <= self.high.y
            && self.low.z <= self.high.z
    }

    pub fn size(&self) -> Vector3<f32> {
        self.high - self.low
    }

    pub fn center(&self) -> Point3<f32> {
        nalgebra::center(&self.low, &self.high)
    }

    /// Radius of the bounding sphere centered on the box center.
    pub fn bounding_radius(&self) -> f32 {
        self.size().norm() / 2.0
    }

    pub fn union(&self, other: &BBox) -> BBox {
        BBox::new(self.low.inf(&other.low), self.high.sup(&other.high))
    }
}

/// Where an entity is and how it moves. Unset fields are "not known yet".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Location {
    pub pos: Option<Point3<f32>>,
    pub orientation: Option<UnitQuaternion<f32>>,
    pub velocity: Option<Vector3<f32>>,
    pub angular_velocity: Option<Vector3<f32>>,
    pub bbox: Option<BBox>,
}

impl Location {
    pub fn is_valid(&self) -> bool {
        self.pos.map_or(false, |p| p.iter().all(|v| v.is_finite()))
    }

    pub fn valid_bbox(&self) -> Option<BBox> {
        self.bbox.filter(BBox::is_valid)
    }
}

/// Movement classification of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Free,
    Planted,
    Fixed,
    Floating,
    Submerged,
    Unknown,
}

impl Mode {
    pub fn parse(s: &str) -> Mode {
        match s {
            "free" => Mode::Free,
            "planted" => Mode::Planted,
            "fixed" => Mode::Fixed,
            "floating" => Mode::Floating,
            "submerged" => Mode::Submerged,
            _ => Mode::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Free => "free",
            Mode::Planted => "planted",
            Mode::Fixed => "fixed",
            Mode::Floating => "floating",
            Mode::Submerged => "submerged",
            Mode::Unknown => "unknown",
        }
    }

    /// Modes that never move under simulation, and so carry zero mass.
    pub fn is_static(&self) -> bool {
        matches!(self, Mode::Planted | Mode::Fixed | Mode::Floating)
    }
}

/// An entity placed inside a domain.
#[derive(Debug, Clone)]
pub struct LocatedEntity {
    pub id: EntityId,
    /// Version stamp reported in appearance notifications
    pub seq: i64,
    pub location: Location,
    pub perceptive: bool,
    properties: BTreeMap<String, PropertyValue>,
}

impl LocatedEntity {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            seq: 0,
            location: Location::default(),
            perceptive: false,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_pos(mut self, x: f32, y: f32, z: f32) -> Self {
        self.location.pos = Some(Point3::new(x, y, z));
        self
    }

    pub fn with_bbox(mut self, low: [f32; 3], high: [f32; 3]) -> Self {
        self.set_bbox(BBox::new(low.into(), high.into()));
        self
    }

    pub fn with_property(mut self, name: &str, value: impl Into<PropertyValue>) -> Self {
        self.set_property(name, value.into());
        self
    }

    pub fn perceptive(mut self) -> Self {
        self.perceptive = true;
        self
    }

    pub fn into_ref(self) -> EntityRef {
        Rc::new(RefCell::new(self))
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    pub fn property_f32(&self, name: &str) -> Option<f32> {
        self.property(name)?.as_f64().map(|v| v as f32)
    }

    pub fn property_i64(&self, name: &str) -> Option<i64> {
        self.property(name)?.as_i64()
    }

    /// Stores a property. The "bbox" property is mirrored into the location.
    pub fn set_property(&mut self, name: &str, value: PropertyValue) {
        if name == "bbox" {
            self.location.bbox = BBox::from_property(&value);
        }
        self.properties.insert(name.to_string(), value);
    }

    pub fn remove_property(&mut self, name: &str) -> Option<PropertyValue> {
        if name == "bbox" {
            self.location.bbox = None;
        }
        self.properties.remove(name)
    }

    pub fn set_bbox(&mut self, bbox: BBox) {
        self.set_property("bbox", bbox.to_property());
    }

    /// Mode from the "mode" property; an absent property means Free.
    pub fn mode(&self) -> Mode {
        self.property("mode")
            .and_then(PropertyValue::as_str)
            .map_or(Mode::Free, Mode::parse)
    }

    pub fn has_mode(&self) -> bool {
        self.property("mode").is_some()
    }

    pub fn is_solid(&self) -> bool {
        self.property_i64("solid").map_or(true, |v| v != 0)
    }

    pub fn mass(&self) -> f32 {
        self.property_f32("mass").unwrap_or(0.0)
    }
}
