//! Terrain height model: base points at segment corners, lazily populated
//! height grids per segment, and per-entity terrain modifiers.

use nalgebra::{Point2, Point3, UnitQuaternion, Vector2, Vector3};
use std::collections::{BTreeMap, BTreeSet};

use super::constants::terrain as consts;
use super::entity::{EntityId, PropertyValue};

pub type SegmentKey = (i32, i32);

/// Horizontal footprint on the (x, z) plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Area {
    pub low: Point2<f32>,
    pub high: Point2<f32>,
}

impl Area {
    pub fn new(low: Point2<f32>, high: Point2<f32>) -> Self {
        Self { low, high }
    }

    pub fn around(points: impl IntoIterator<Item = Point2<f32>>) -> Option<Self> {
        points.into_iter().fold(None, |acc: Option<Area>, p| {
            Some(match acc {
                None => Area::new(p, p),
                Some(a) => Area::new(a.low.inf(&p), a.high.sup(&p)),
            })
        })
    }

    pub fn intersects(&self, other: &Area) -> bool {
        self.low.x <= other.high.x
            && other.low.x <= self.high.x
            && self.low.y <= other.high.y
            && other.low.y <= self.high.y
    }

    pub fn union(&self, other: &Area) -> Area {
        Area::new(self.low.inf(&other.low), self.high.sup(&other.high))
    }

    pub fn center(&self) -> Point2<f32> {
        nalgebra::center(&self.low, &self.high)
    }

    pub fn size(&self) -> Vector2<f32> {
        self.high - self.low
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TerrainError {
    #[error("terrain descriptor is not a map")]
    NotAMap,
    #[error("terrain descriptor has no points list")]
    MissingPoints,
    #[error("terrain point {0} is not a [x, z, height] triple")]
    InvalidPoint(usize),
    #[error("terrain resolution {0} must be positive")]
    InvalidResolution(i64),
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TerrainModError {
    #[error("terrain modifier is not a map")]
    NotAMap,
    #[error("terrain modifier has no type")]
    MissingType,
    #[error("unknown terrain modifier type '{0}'")]
    UnknownType(String),
    #[error("terrain modifier has no shape")]
    MissingShape,
    #[error("unknown terrain modifier shape '{0}'")]
    UnknownShape(String),
    #[error("invalid {0} shape")]
    InvalidShape(&'static str),
    #[error("slope modifier needs two slopes")]
    InvalidSlopes,
    #[error("crater modifier needs a ball shape")]
    CraterNeedsBall,
}

/// Modifier footprint in modifier-local (x, z) coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum ModShape {
    Ball { radius: f32 },
    /// Box spanning `point` to `point + size`
    RotBox { point: Point2<f32>, size: Vector2<f32> },
    Polygon { points: Vec<Point2<f32>> },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModKind {
    Level { height: f32 },
    Adjust { height: f32 },
    Crater,
    Slope { height: f32, dx: f32, dz: f32 },
}

/// A terrain modifier placed in the world.
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainMod {
    pub kind: ModKind,
    pub shape: ModShape,
    pub origin: Point3<f32>,
    /// Rotation about the vertical axis, radians
    pub yaw: f32,
}

/// Rotation about the vertical axis encoded in `orientation`.
pub fn yaw_of(orientation: &UnitQuaternion<f32>) -> f32 {
    let x_axis = orientation * Vector3::x();
    (-x_axis.z).atan2(x_axis.x)
}

fn point2(value: &PropertyValue) -> Option<Point2<f32>> {
    match value.as_f32_list()?.as_slice() {
        [x, z] => Some(Point2::new(*x, *z)),
        _ => None,
    }
}

impl TerrainMod {
    /// Parses a "terrainmod" descriptor and places it at `pos`.
    pub fn from_descriptor(
        value: &PropertyValue,
        pos: Point3<f32>,
        orientation: Option<&UnitQuaternion<f32>>,
    ) -> Result<Self, TerrainModError> {
        let map = value.as_map().ok_or(TerrainModError::NotAMap)?;
        let kind_name = map
            .get("type")
            .and_then(PropertyValue::as_str)
            .ok_or(TerrainModError::MissingType)?;
        let height = map
            .get("height")
            .and_then(PropertyValue::as_f64)
            .unwrap_or(0.0) as f32;

        let shape_map = map
            .get("shape")
            .and_then(PropertyValue::as_map)
            .ok_or(TerrainModError::MissingShape)?;
        let shape = match shape_map.get("type").and_then(PropertyValue::as_str) {
            Some("ball") => {
                let radius = shape_map
                    .get("radius")
                    .and_then(PropertyValue::as_f64)
                    .filter(|r| *r > 0.0)
                    .ok_or(TerrainModError::InvalidShape("ball"))?;
                ModShape::Ball {
                    radius: radius as f32,
                }
            }
            Some("rotbox") => {
                let point = shape_map
                    .get("point")
                    .and_then(point2)
                    .ok_or(TerrainModError::InvalidShape("rotbox"))?;
                let size = shape_map
                    .get("size")
                    .and_then(point2)
                    .ok_or(TerrainModError::InvalidShape("rotbox"))?;
                ModShape::RotBox {
                    point,
                    size: size.coords,
                }
            }
            Some("polygon") => {
                let points = shape_map
                    .get("points")
                    .and_then(PropertyValue::as_list)
                    .and_then(|l| l.iter().map(point2).collect::<Option<Vec<_>>>())
                    .filter(|p| p.len() >= 3)
                    .ok_or(TerrainModError::InvalidShape("polygon"))?;
                ModShape::Polygon { points }
            }
            Some(other) => return Err(TerrainModError::UnknownShape(other.to_string())),
            None => return Err(TerrainModError::MissingShape),
        };

        let kind = match kind_name {
            "levelmod" => ModKind::Level { height },
            "adjustmod" => ModKind::Adjust { height },
            "cratermod" => {
                if !matches!(shape, ModShape::Ball { .. }) {
                    return Err(TerrainModError::CraterNeedsBall);
                }
                ModKind::Crater
            }
            "slopemod" => {
                let slopes = map
                    .get("slopes")
                    .and_then(PropertyValue::as_f32_list)
                    .ok_or(TerrainModError::InvalidSlopes)?;
                match slopes.as_slice() {
                    [dx, dz] => ModKind::Slope {
                        height,
                        dx: *dx,
                        dz: *dz,
                    },
                    _ => return Err(TerrainModError::InvalidSlopes),
                }
            }
            other => return Err(TerrainModError::UnknownType(other.to_string())),
        };

        Ok(Self {
            kind,
            shape,
            origin: pos,
            yaw: orientation.map_or(0.0, yaw_of),
        })
    }

    fn to_local(&self, x: f32, z: f32) -> Point2<f32> {
        let (s, c) = self.yaw.sin_cos();
        let dx = x - self.origin.x;
        let dz = z - self.origin.z;
        Point2::new(c * dx - s * dz, s * dx + c * dz)
    }

    fn to_world(&self, local: &Point2<f32>) -> Point2<f32> {
        let (s, c) = self.yaw.sin_cos();
        Point2::new(
            self.origin.x + c * local.x + s * local.y,
            self.origin.z - s * local.x + c * local.y,
        )
    }

    pub fn contains(&self, x: f32, z: f32) -> bool {
        let p = self.to_local(x, z);
        match &self.shape {
            ModShape::Ball { radius } => p.coords.norm_squared() <= radius * radius,
            ModShape::RotBox { point, size } => {
                let low = point.inf(&(point + size));
                let high = point.sup(&(point + size));
                p.x >= low.x && p.x <= high.x && p.y >= low.y && p.y <= high.y
            }
            ModShape::Polygon { points } => polygon_contains(points, &p),
        }
    }

    /// World-space bounding footprint.
    pub fn footprint(&self) -> Area {
        let corners: Vec<Point2<f32>> = match &self.shape {
            ModShape::Ball { radius } => {
                let r = *radius;
                let c = Point2::new(self.origin.x, self.origin.z);
                return Area::new(c - Vector2::repeat(r), c + Vector2::repeat(r));
            }
            ModShape::RotBox { point, size } => vec![
                *point,
                point + Vector2::new(size.x, 0.0),
                point + Vector2::new(0.0, size.y),
                point + size,
            ],
            ModShape::Polygon { points } => points.clone(),
        };
        let world = corners.iter().map(|p| self.to_world(p));
        Area::around(world).unwrap_or_else(|| {
            let c = Point2::new(self.origin.x, self.origin.z);
            Area::new(c, c)
        })
    }

    /// Applies the modifier to a height sample at (x, z), if inside the footprint.
    pub fn apply(&self, x: f32, z: f32, height: f32) -> f32 {
        if !self.contains(x, z) {
            return height;
        }
        match self.kind {
            ModKind::Level { height: h } => self.origin.y + h,
            ModKind::Adjust { height: h } => height + h,
            ModKind::Crater => {
                let ModShape::Ball { radius } = self.shape else {
                    return height;
                };
                let d2 = self.to_local(x, z).coords.norm_squared();
                let bowl = self.origin.y - (radius * radius - d2).max(0.0).sqrt();
                height.min(bowl)
            }
            ModKind::Slope { height: h, dx, dz } => {
                self.origin.y + h + dx * (x - self.origin.x) + dz * (z - self.origin.z)
            }
        }
    }
}

fn polygon_contains(points: &[Point2<f32>], p: &Point2<f32>) -> bool {
    let mut inside = false;
    let mut j = points.len() - 1;
    for i in 0..points.len() {
        let (a, b) = (points[i], points[j]);
        if (a.y > p.y) != (b.y > p.y) && p.x < (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[derive(Debug, Clone)]
struct Segment {
    heights: Option<Vec<f32>>,
    min: f32,
    max: f32,
    mods: BTreeSet<EntityId>,
}

/// Populated height grid of one segment, `(resolution + 1)²` samples, rows along z.
#[derive(Debug, Clone)]
pub struct SegmentHeights {
    pub heights: Vec<f32>,
    pub min: f32,
    pub max: f32,
}

#[derive(Debug, Clone)]
pub struct Terrain {
    resolution: i32,
    base_points: BTreeMap<SegmentKey, f32>,
    segments: BTreeMap<SegmentKey, Segment>,
    mods: BTreeMap<EntityId, TerrainMod>,
}

impl Terrain {
    pub fn new(resolution: i32) -> Self {
        Self {
            resolution,
            base_points: BTreeMap::new(),
            segments: BTreeMap::new(),
            mods: BTreeMap::new(),
        }
    }

    /// Parses `{ "points": [[xi, zi, height], ...], "resolution"?: int }`.
    pub fn from_property(value: &PropertyValue) -> Result<Self, TerrainError> {
        let map = value.as_map().ok_or(TerrainError::NotAMap)?;
        let resolution = match map.get("resolution").and_then(PropertyValue::as_i64) {
            Some(r) if r > 0 => r as i32,
            Some(r) => return Err(TerrainError::InvalidResolution(r)),
            None => consts::DEFAULT_RESOLUTION,
        };
        let points = map
            .get("points")
            .and_then(PropertyValue::as_list)
            .ok_or(TerrainError::MissingPoints)?;

        let mut terrain = Terrain::new(resolution);
        for (i, point) in points.iter().enumerate() {
            match point.as_f32_list().as_deref() {
                Some([x, z, h]) => terrain.set_base_point(*x as i32, *z as i32, *h),
                _ => return Err(TerrainError::InvalidPoint(i)),
            }
        }
        Ok(terrain)
    }

    pub fn resolution(&self) -> i32 {
        self.resolution
    }

    /// Sets a base point and creates every segment whose four corners now exist.
    pub fn set_base_point(&mut self, xi: i32, zi: i32, height: f32) {
        self.base_points.insert((xi, zi), height);
        for key in [(xi - 1, zi - 1), (xi - 1, zi), (xi, zi - 1), (xi, zi)] {
            let (sx, sz) = key;
            let complete = [(sx, sz), (sx + 1, sz), (sx, sz + 1), (sx + 1, sz + 1)]
                .iter()
                .all(|corner| self.base_points.contains_key(corner));
            if !complete {
                continue;
            }
            let mods = self.mods_overlapping(&self.segment_area(key));
            let segment = self.segments.entry(key).or_insert_with(|| Segment {
                heights: None,
                min: 0.0,
                max: 0.0,
                mods: BTreeSet::new(),
            });
            segment.heights = None;
            segment.mods = mods;
        }
    }

    fn mods_overlapping(&self, area: &Area) -> BTreeSet<EntityId> {
        self.mods
            .iter()
            .filter(|(_, m)| m.footprint().intersects(area))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn segment_keys(&self) -> Vec<SegmentKey> {
        self.segments.keys().copied().collect()
    }

    pub fn segment_area(&self, (xi, zi): SegmentKey) -> Area {
        let res = self.resolution as f32;
        Area::new(
            Point2::new(xi as f32 * res, zi as f32 * res),
            Point2::new((xi + 1) as f32 * res, (zi + 1) as f32 * res),
        )
    }

    /// Keys of existing segments overlapping `area`.
    pub fn segments_in(&self, area: &Area) -> Vec<SegmentKey> {
        self.segments
            .keys()
            .copied()
            .filter(|key| self.segment_area(*key).intersects(area))
            .collect()
    }

    fn compute_heights(&self, key: SegmentKey, with_mods: bool) -> Option<SegmentHeights> {
        let segment = self.segments.get(&key)?;
        let (xi, zi) = key;
        let c00 = *self.base_points.get(&(xi, zi))?;
        let c10 = *self.base_points.get(&(xi + 1, zi))?;
        let c01 = *self.base_points.get(&(xi, zi + 1))?;
        let c11 = *self.base_points.get(&(xi + 1, zi + 1))?;

        let res = self.resolution;
        let n = (res + 1) as usize;
        let origin = self.segment_area(key).low;
        let mods: Vec<&TerrainMod> = if with_mods {
            segment.mods.iter().filter_map(|id| self.mods.get(id)).collect()
        } else {
            Vec::new()
        };

        let mut heights = Vec::with_capacity(n * n);
        let (mut min, mut max) = (f32::MAX, f32::MIN);
        for j in 0..n {
            let fz = j as f32 / res as f32;
            for i in 0..n {
                let fx = i as f32 / res as f32;
                let mut h = c00 * (1.0 - fx) * (1.0 - fz)
                    + c10 * fx * (1.0 - fz)
                    + c01 * (1.0 - fx) * fz
                    + c11 * fx * fz;
                let (x, z) = (origin.x + i as f32, origin.y + j as f32);
                for m in &mods {
                    h = m.apply(x, z, h);
                }
                min = min.min(h);
                max = max.max(h);
                heights.push(h);
            }
        }
        Some(SegmentHeights { heights, min, max })
    }

    /// Populates the segment if needed and returns its heights.
    pub fn segment_heights(&mut self, key: SegmentKey) -> Option<SegmentHeights> {
        let cached = self.segments.get(&key)?.heights.is_some();
        if !cached {
            let computed = self.compute_heights(key, true)?;
            let segment = self.segments.get_mut(&key)?;
            segment.min = computed.min;
            segment.max = computed.max;
            segment.heights = Some(computed.heights);
        }
        let segment = self.segments.get(&key)?;
        Some(SegmentHeights {
            heights: segment.heights.clone()?,
            min: segment.min,
            max: segment.max,
        })
    }

    fn segment_key_at(&self, x: f32, z: f32) -> Option<SegmentKey> {
        let res = self.resolution as f32;
        let xi = (x / res).floor() as i32;
        let zi = (z / res).floor() as i32;
        // Points on the far edge of the last segment belong to that segment
        [(xi, zi), (xi - 1, zi), (xi, zi - 1), (xi - 1, zi - 1)]
            .into_iter()
            .find(|key| {
                let area = self.segment_area(*key);
                self.segments.contains_key(key)
                    && x >= area.low.x
                    && x <= area.high.x
                    && z >= area.low.y
                    && z <= area.high.y
            })
    }

    fn sample(&self, key: SegmentKey, heights: &[f32], x: f32, z: f32) -> f32 {
        let res = self.resolution;
        let n = (res + 1) as usize;
        let origin = self.segment_area(key).low;
        let lx = (x - origin.x).clamp(0.0, res as f32);
        let lz = (z - origin.y).clamp(0.0, res as f32);
        let i = (lx.floor() as i32).min(res - 1).max(0) as usize;
        let j = (lz.floor() as i32).min(res - 1).max(0) as usize;
        let fx = lx - i as f32;
        let fz = lz - j as f32;
        let h = |i: usize, j: usize| heights[j * n + i];
        h(i, j) * (1.0 - fx) * (1.0 - fz)
            + h(i + 1, j) * fx * (1.0 - fz)
            + h(i, j + 1) * (1.0 - fx) * fz
            + h(i + 1, j + 1) * fx * fz
    }

    /// Height at (x, z), or None outside the terrain.
    pub fn height_at(&mut self, x: f32, z: f32) -> Option<f32> {
        let key = self.segment_key_at(x, z)?;
        let heights = self.segment_heights(key)?.heights;
        Some(self.sample(key, &heights, x, z))
    }

    /// Height at (x, z) without any modifiers applied.
    pub fn base_height_at(&mut self, x: f32, z: f32) -> Option<f32> {
        let key = self.segment_key_at(x, z)?;
        if self.segments.get(&key)?.mods.is_empty() {
            return self.height_at(x, z);
        }
        let heights = self.compute_heights(key, false)?.heights;
        Some(self.sample(key, &heights, x, z))
    }

    pub fn has_mod(&self, id: EntityId) -> bool {
        self.mods.contains_key(&id)
    }

    /// Installs or replaces the modifier owned by `id`, invalidating covered segments.
    pub fn update_mod(&mut self, id: EntityId, modifier: TerrainMod) {
        self.remove_mod(id);
        let area = modifier.footprint();
        let keys = self.segments_in(&area);
        self.mods.insert(id, modifier);
        for key in keys {
            if let Some(segment) = self.segments.get_mut(&key) {
                segment.mods.insert(id);
                segment.heights = None;
            }
        }
    }

    /// Removes the modifier owned by `id`, returning its footprint.
    pub fn remove_mod(&mut self, id: EntityId) -> Option<Area> {
        let modifier = self.mods.remove(&id)?;
        let area = modifier.footprint();
        for segment in self.segments.values_mut() {
            if segment.mods.remove(&id) {
                segment.heights = None;
            }
        }
        Some(area)
    }
}
