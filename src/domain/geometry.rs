//! Collision shape construction from declarative geometry descriptors.
//!
//! A descriptor is parsed once into a [`Geometry`], which can then build shapes
//! for any bounding box. Parsing never fails hard: malformed descriptors leave
//! the geometry without a kind, and [`Geometry::create_shape`] falls back to a box.

use nalgebra::{Isometry3, Point3, Quaternion, UnitQuaternion, Vector3};
use rapier3d::prelude::*;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, warn};

use super::constants::physics as consts;
use super::entity::{BBox, PropertyValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

/// Size classification of a built shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeClass {
    Box,
    Sphere,
    Capsule,
    Cylinder,
    /// Scaled triangle mesh, only used for static bodies
    StaticMesh,
    /// Convex hull of a mesh, used for dynamic bodies
    ConvexHull,
    Compound,
}

/// Triangle data shared by every entry built from the same mesh descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshGeometry {
    pub vertices: Vec<Point3<f32>>,
    pub indices: Vec<[u32; 3]>,
    pub bounds: BBox,
}

/// One "box" child of a compound geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundChild {
    pub bounds: BBox,
    pub orientation: UnitQuaternion<f32>,
}

impl CompoundChild {
    /// Axis-aligned bounds of the child after rotation about its own center.
    fn rotated_bounds(&self) -> BBox {
        let center = self.bounds.center();
        let half = self.bounds.size() / 2.0;
        let mut low = Point3::new(f32::MAX, f32::MAX, f32::MAX);
        let mut high = Point3::new(f32::MIN, f32::MIN, f32::MIN);
        for sx in [-1.0, 1.0] {
            for sy in [-1.0, 1.0] {
                for sz in [-1.0, 1.0] {
                    let corner = center
                        + self.orientation * Vector3::new(sx * half.x, sy * half.y, sz * half.z);
                    low = low.inf(&corner);
                    high = high.sup(&corner);
                }
            }
        }
        BBox::new(low, high)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GeometryKind {
    Box,
    Sphere,
    Capsule(Axis),
    Cylinder(Axis),
    Mesh(Arc<MeshGeometry>),
    Compound(Vec<CompoundChild>),
}

/// Result of building a shape for a bounding box.
#[derive(Clone)]
pub struct BuiltShape {
    pub shape: SharedShape,
    /// Full mesh kept alive for as long as the derived shape is in use
    pub backing: Option<Arc<MeshGeometry>>,
    /// Offset from the entity origin to the body origin, negated
    pub center_of_mass_offset: Vector3<f32>,
    pub class: ShapeClass,
}

#[derive(Debug, thiserror::Error)]
pub enum GeometryError {
    #[error("mesh has no vertices")]
    EmptyVertices,
    #[error("vertex list length {0} is not a multiple of three")]
    VerticesNotTriples(usize),
    #[error("mesh has no indices")]
    EmptyIndices,
    #[error("index list length {0} is not a multiple of three")]
    IndicesNotTriples(usize),
    #[error("vertex list contains a non-numeric value")]
    VertexNotNumber,
    #[error("index list contains a non-integer value")]
    IndexNotInteger,
    #[error("index {index} is out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: i64, vertex_count: usize },
    #[error("mesh geometry needs either inline data or a path")]
    MissingData,
    #[error("mesh asset {0} can't be resolved without a mesh asset directory")]
    NoAssetDir(String),
    #[error("failed to read mesh asset {}: {1}", .0.display())]
    AssetIo(PathBuf, #[source] std::io::Error),
    #[error("failed to parse mesh asset {}: {1}", .0.display())]
    AssetParse(PathBuf, #[source] serde_json::Error),
}

/// On-disk mesh asset layout.
#[derive(Debug, Deserialize)]
struct MeshAsset {
    vertices: Vec<f32>,
    indices: Vec<i64>,
}

/// Parsed geometry descriptor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Geometry {
    kind: Option<GeometryKind>,
}

impl Geometry {
    pub fn from_kind(kind: GeometryKind) -> Self {
        Self { kind: Some(kind) }
    }

    /// Parses a geometry map. Problems are logged and leave the geometry without a kind.
    pub fn from_property(value: &PropertyValue, mesh_asset_dir: Option<&Path>) -> Self {
        let Some(map) = value.as_map() else {
            warn!("geometry property is not a map, using box shape");
            return Self::default();
        };
        let Some(kind_name) = map.get("type").and_then(PropertyValue::as_str) else {
            warn!("geometry property has no type, using box shape");
            return Self::default();
        };

        let kind = match kind_name {
            "box" => Some(GeometryKind::Box),
            "sphere" => Some(GeometryKind::Sphere),
            "capsule-x" => Some(GeometryKind::Capsule(Axis::X)),
            "capsule-y" => Some(GeometryKind::Capsule(Axis::Y)),
            "capsule-z" => Some(GeometryKind::Capsule(Axis::Z)),
            "cylinder-x" => Some(GeometryKind::Cylinder(Axis::X)),
            "cylinder-y" => Some(GeometryKind::Cylinder(Axis::Y)),
            "cylinder-z" => Some(GeometryKind::Cylinder(Axis::Z)),
            "mesh" => match parse_mesh(map, mesh_asset_dir) {
                Ok(mesh) => Some(GeometryKind::Mesh(Arc::new(mesh))),
                Err(e) => {
                    error!("invalid mesh geometry: {e}");
                    None
                }
            },
            "compound" => parse_compound(map),
            other => {
                warn!("unsupported geometry type '{other}', using box shape");
                None
            }
        };
        Self { kind }
    }

    pub fn kind(&self) -> Option<&GeometryKind> {
        self.kind.as_ref()
    }

    /// Bounds of the source mesh, if this is a mesh geometry.
    pub fn mesh_bounds(&self) -> Option<BBox> {
        match &self.kind {
            Some(GeometryKind::Mesh(mesh)) => Some(mesh.bounds),
            _ => None,
        }
    }

    /// Builds a shape filling `bbox`. A zero `mass` selects the static mesh variant.
    pub fn create_shape(&self, bbox: &BBox, mass: f32) -> BuiltShape {
        let Some(kind) = &self.kind else {
            return create_box_shape(bbox);
        };
        let size = bbox.size();
        let center = bbox.center().coords;

        match kind {
            GeometryKind::Box => create_box_shape(bbox),
            GeometryKind::Sphere => {
                let radius = size.min() / 2.0;
                BuiltShape {
                    shape: SharedShape::ball(radius),
                    backing: None,
                    center_of_mass_offset: -(bbox.low.coords + Vector3::repeat(radius)),
                    class: ShapeClass::Sphere,
                }
            }
            GeometryKind::Capsule(axis) => {
                let (along, cross_a, cross_b) = split_axis(size, *axis);
                let radius = cross_a.min(cross_b) / 2.0;
                let height = along - radius * 2.0;
                let (shape, class) = if height > 0.0 {
                    let half_height = height / 2.0;
                    let shape = match axis {
                        Axis::X => SharedShape::capsule_x(half_height, radius),
                        Axis::Y => SharedShape::capsule_y(half_height, radius),
                        Axis::Z => SharedShape::capsule_z(half_height, radius),
                    };
                    (shape, ShapeClass::Capsule)
                } else {
                    (SharedShape::ball(radius), ShapeClass::Sphere)
                };
                BuiltShape {
                    shape,
                    backing: None,
                    center_of_mass_offset: -center,
                    class,
                }
            }
            GeometryKind::Cylinder(axis) => match cylinder_hull(size / 2.0, *axis) {
                Some(shape) => BuiltShape {
                    shape,
                    backing: None,
                    center_of_mass_offset: -center,
                    class: ShapeClass::Cylinder,
                },
                None => create_box_shape(bbox),
            },
            GeometryKind::Mesh(mesh) => create_mesh_shape(mesh, bbox, mass),
            GeometryKind::Compound(children) => create_compound_shape(children, bbox),
        }
    }
}

/// Default shape: a cuboid filling the bounding box.
pub fn create_box_shape(bbox: &BBox) -> BuiltShape {
    let half = bbox.size().abs() / 2.0;
    BuiltShape {
        shape: SharedShape::cuboid(half.x, half.y, half.z),
        backing: None,
        center_of_mass_offset: -bbox.center().coords,
        class: ShapeClass::Box,
    }
}

/// Returns (axis dimension, first cross dimension, second cross dimension).
fn split_axis(size: Vector3<f32>, axis: Axis) -> (f32, f32, f32) {
    match axis {
        Axis::X => (size.x, size.y, size.z),
        Axis::Y => (size.y, size.x, size.z),
        Axis::Z => (size.z, size.x, size.y),
    }
}

/// Unit cylinder along `axis`, scaled to the half-extents.
fn cylinder_hull(half: Vector3<f32>, axis: Axis) -> Option<SharedShape> {
    let mut points = Vec::with_capacity(consts::CYLINDER_SEGMENTS * 2);
    for i in 0..consts::CYLINDER_SEGMENTS {
        let angle = i as f32 / consts::CYLINDER_SEGMENTS as f32 * std::f32::consts::TAU;
        let (c, s) = (angle.cos(), angle.sin());
        for cap in [-1.0, 1.0] {
            let unit = match axis {
                Axis::X => Vector3::new(cap, c, s),
                Axis::Y => Vector3::new(c, cap, s),
                Axis::Z => Vector3::new(c, s, cap),
            };
            points.push(Point3::from(unit.component_mul(&half)));
        }
    }
    SharedShape::convex_hull(&points)
}

fn ratio(target: f32, source: f32) -> f32 {
    if source.abs() > f32::EPSILON {
        target / source
    } else {
        1.0
    }
}

fn scaling_between(target: Vector3<f32>, source: Vector3<f32>) -> Vector3<f32> {
    Vector3::new(
        ratio(target.x, source.x),
        ratio(target.y, source.y),
        ratio(target.z, source.z),
    )
}

fn create_mesh_shape(mesh: &Arc<MeshGeometry>, bbox: &BBox, mass: f32) -> BuiltShape {
    let scaling = scaling_between(bbox.size(), mesh.bounds.size());
    let vertices: Vec<Point3<f32>> = mesh
        .vertices
        .iter()
        .map(|v| Point3::from(v.coords.component_mul(&scaling)))
        .collect();

    let built = if mass == 0.0 {
        match SharedShape::trimesh(vertices, mesh.indices.clone()) {
            Ok(shape) => Some((shape, ShapeClass::StaticMesh)),
            Err(e) => {
                error!("failed to build triangle mesh: {e:?}");
                None
            }
        }
    } else {
        let hull = SharedShape::convex_hull(&vertices);
        if hull.is_none() {
            error!("failed to build convex hull from {} vertices", vertices.len());
        }
        hull.map(|shape| (shape, ShapeClass::ConvexHull))
    };

    match built {
        Some((shape, class)) => BuiltShape {
            shape,
            backing: Some(Arc::clone(mesh)),
            center_of_mass_offset: Vector3::zeros(),
            class,
        },
        None => create_box_shape(bbox),
    }
}

fn create_compound_shape(children: &[CompoundChild], bbox: &BBox) -> BuiltShape {
    let Some(union) = children
        .iter()
        .map(CompoundChild::rotated_bounds)
        .reduce(|a, b| a.union(&b))
    else {
        warn!("compound geometry has no usable children, using box shape");
        return create_box_shape(bbox);
    };
    let scaling = scaling_between(bbox.size(), union.size());

    let parts = children
        .iter()
        .map(|child| {
            let half = (child.bounds.size() / 2.0).component_mul(&scaling);
            let translation = child.bounds.center().coords.component_mul(&scaling);
            (
                Isometry3::from_parts(translation.into(), child.orientation),
                SharedShape::cuboid(half.x, half.y, half.z),
            )
        })
        .collect();

    BuiltShape {
        shape: SharedShape::compound(parts),
        backing: None,
        center_of_mass_offset: Vector3::zeros(),
        class: ShapeClass::Compound,
    }
}

fn parse_compound(
    map: &std::collections::BTreeMap<String, PropertyValue>,
) -> Option<GeometryKind> {
    let Some(shapes) = map.get("shapes").and_then(PropertyValue::as_list) else {
        warn!("compound geometry has no shapes list, using box shape");
        return None;
    };

    let mut children = Vec::new();
    for shape in shapes {
        let Some(shape_map) = shape.as_map() else {
            warn!("skipping compound child that is not a map");
            continue;
        };
        match shape_map.get("type").and_then(PropertyValue::as_str) {
            Some("box") => {}
            other => {
                warn!("skipping unsupported compound child type {:?}", other);
                continue;
            }
        }
        let Some(bounds) = shape_map.get("points").and_then(BBox::from_property) else {
            warn!("skipping compound box child without valid points");
            continue;
        };
        let orientation = shape_map
            .get("orientation")
            .and_then(PropertyValue::as_f32_list)
            .and_then(|q| match q.as_slice() {
                [x, y, z, w] => Some(UnitQuaternion::from_quaternion(Quaternion::new(
                    *w, *x, *y, *z,
                ))),
                _ => None,
            })
            .unwrap_or_else(UnitQuaternion::identity);
        children.push(CompoundChild {
            bounds,
            orientation,
        });
    }
    Some(GeometryKind::Compound(children))
}

fn parse_mesh(
    map: &std::collections::BTreeMap<String, PropertyValue>,
    mesh_asset_dir: Option<&Path>,
) -> Result<MeshGeometry, GeometryError> {
    if let (Some(vertices), Some(indices)) = (map.get("vertices"), map.get("indices")) {
        let vertices = vertices
            .as_f32_list()
            .ok_or(GeometryError::VertexNotNumber)?;
        let indices = indices
            .as_list()
            .ok_or(GeometryError::IndexNotInteger)?
            .iter()
            .map(|v| v.as_i64().ok_or(GeometryError::IndexNotInteger))
            .collect::<Result<Vec<_>, _>>()?;
        return validate_mesh(vertices, indices);
    }

    let Some(path) = map.get("path").and_then(PropertyValue::as_str) else {
        return Err(GeometryError::MissingData);
    };
    let dir = mesh_asset_dir.ok_or_else(|| GeometryError::NoAssetDir(path.to_string()))?;
    load_mesh_asset(&dir.join(path))
}

/// Reads a JSON mesh asset with flat `vertices` and `indices` arrays.
pub fn load_mesh_asset(path: &Path) -> Result<MeshGeometry, GeometryError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| GeometryError::AssetIo(path.to_path_buf(), e))?;
    let asset: MeshAsset = serde_json::from_str(&content)
        .map_err(|e| GeometryError::AssetParse(path.to_path_buf(), e))?;
    validate_mesh(asset.vertices, asset.indices)
}

/// Checks vertex/index data and computes the mesh bounds.
pub fn validate_mesh(vertices: Vec<f32>, indices: Vec<i64>) -> Result<MeshGeometry, GeometryError> {
    if vertices.is_empty() {
        return Err(GeometryError::EmptyVertices);
    }
    if vertices.len() % 3 != 0 {
        return Err(GeometryError::VerticesNotTriples(vertices.len()));
    }
    if indices.is_empty() {
        return Err(GeometryError::EmptyIndices);
    }
    if indices.len() % 3 != 0 {
        return Err(GeometryError::IndicesNotTriples(indices.len()));
    }

    let vertex_count = vertices.len() / 3;
    if let Some(&index) = indices
        .iter()
        .find(|&&i| i < 0 || i as usize >= vertex_count)
    {
        return Err(GeometryError::IndexOutOfRange {
            index,
            vertex_count,
        });
    }

    let vertices: Vec<Point3<f32>> = vertices
        .chunks_exact(3)
        .map(|c| Point3::new(c[0], c[1], c[2]))
        .collect();
    let bounds = vertices
        .iter()
        .skip(1)
        .fold(BBox::new(vertices[0], vertices[0]), |b, v| {
            BBox::new(b.low.inf(v), b.high.sup(v))
        });
    let indices = indices
        .chunks_exact(3)
        .map(|c| [c[0] as u32, c[1] as u32, c[2] as u32])
        .collect();

    Ok(MeshGeometry {
        vertices,
        indices,
        bounds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_bbox() -> BBox {
        BBox::new(Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0))
    }

    fn descriptor(json: &str) -> PropertyValue {
        serde_json::from_str(json).unwrap()
    }

    fn tetrahedron() -> PropertyValue {
        descriptor(
            r#"{"type": "mesh",
                "vertices": [0, 0, 0, 2, 0, 0, 0, 2, 0, 0, 0, 2],
                "indices": [0, 1, 2, 0, 1, 3, 0, 2, 3, 1, 2, 3]}"#,
        )
    }

    #[test]
    fn test_missing_geometry_builds_box() {
        let built = Geometry::default().create_shape(&unit_bbox(), 1.0);
        assert_eq!(built.class, ShapeClass::Box);
        let cuboid = built.shape.as_cuboid().expect("cuboid");
        assert_eq!(cuboid.half_extents, Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(built.center_of_mass_offset, Vector3::zeros());
    }

    #[test]
    fn test_box_offset_recenters_shape() {
        let bbox = BBox::new(Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 4.0, 2.0));
        let built = create_box_shape(&bbox);
        assert_eq!(built.center_of_mass_offset, Vector3::new(-1.0, -2.0, -1.0));
    }

    #[test]
    fn test_sphere_uses_smallest_dimension() {
        let geometry = Geometry::from_property(&descriptor(r#"{"type": "sphere"}"#), None);
        let bbox = BBox::new(Point3::new(0.0, 0.0, 0.0), Point3::new(4.0, 2.0, 6.0));
        let built = geometry.create_shape(&bbox, 1.0);
        assert_eq!(built.class, ShapeClass::Sphere);
        assert_eq!(built.shape.as_ball().expect("ball").radius, 1.0);
        assert_eq!(built.center_of_mass_offset, Vector3::new(-1.0, -1.0, -1.0));
    }

    #[test]
    fn test_capsule_degenerates_to_sphere_for_flat_boxes() {
        let geometry = Geometry::from_property(&descriptor(r#"{"type": "capsule-y"}"#), None);

        // Axis dimension equal to twice the cross radius
        let flat = BBox::new(Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0));
        let built = geometry.create_shape(&flat, 1.0);
        assert_eq!(built.class, ShapeClass::Sphere, "height 0 must not build a capsule");
        assert!(built.shape.as_capsule().is_none());

        let tall = BBox::new(Point3::new(-0.5, 0.0, -0.5), Point3::new(0.5, 3.0, 0.5));
        let built = geometry.create_shape(&tall, 1.0);
        assert_eq!(built.class, ShapeClass::Capsule);
        let capsule = built.shape.as_capsule().expect("capsule");
        assert!((capsule.radius - 0.5).abs() < 1e-6);
        assert!((capsule.half_height() - 1.0).abs() < 1e-6);
        assert_eq!(built.center_of_mass_offset, Vector3::new(0.0, -1.5, 0.0));
    }

    #[test]
    fn test_cylinder_hull_fills_half_extents() {
        let geometry = Geometry::from_property(&descriptor(r#"{"type": "cylinder-z"}"#), None);
        let bbox = BBox::new(Point3::new(-1.0, -2.0, 0.0), Point3::new(1.0, 2.0, 6.0));
        let built = geometry.create_shape(&bbox, 1.0);
        assert_eq!(built.class, ShapeClass::Cylinder);
        let aabb = built.shape.compute_local_aabb();
        assert!((aabb.maxs.z - 3.0).abs() < 1e-4);
        assert!((aabb.maxs.y - 2.0).abs() < 1e-4);
        assert_eq!(built.center_of_mass_offset, Vector3::new(0.0, 0.0, -3.0));
    }

    #[test]
    fn test_mesh_static_and_dynamic_variants() {
        let geometry = Geometry::from_property(&tetrahedron(), None);
        let bounds = geometry.mesh_bounds().expect("mesh bounds");
        assert_eq!(bounds.high, Point3::new(2.0, 2.0, 2.0));

        let bbox = BBox::new(Point3::new(0.0, 0.0, 0.0), Point3::new(4.0, 4.0, 4.0));
        let static_shape = geometry.create_shape(&bbox, 0.0);
        assert_eq!(static_shape.class, ShapeClass::StaticMesh);
        assert!(static_shape.shape.as_trimesh().is_some());

        let dynamic_shape = geometry.create_shape(&bbox, 5.0);
        assert_eq!(dynamic_shape.class, ShapeClass::ConvexHull);
        let aabb = dynamic_shape.shape.compute_local_aabb();
        assert!((aabb.maxs.x - 4.0).abs() < 1e-4, "hull is scaled to the bbox");

        let backing_a = static_shape.backing.expect("backing");
        let backing_b = dynamic_shape.backing.expect("backing");
        assert!(Arc::ptr_eq(&backing_a, &backing_b), "variants share one backing mesh");
    }

    #[test]
    fn test_malformed_mesh_falls_back_to_box() {
        let cases = [
            r#"{"type": "mesh", "vertices": [], "indices": [0, 1, 2]}"#,
            r#"{"type": "mesh", "vertices": [0, 0, 0, 1, 1], "indices": [0, 1, 2]}"#,
            r#"{"type": "mesh", "vertices": [0, 0, 0, 1, 0, 0, 0, 1, 0], "indices": [0, 1]}"#,
            r#"{"type": "mesh", "vertices": [0, 0, 0, 1, 0, 0, 0, 1, 0], "indices": [0, 1, 7]}"#,
            r#"{"type": "mesh"}"#,
        ];
        for case in cases {
            let geometry = Geometry::from_property(&descriptor(case), None);
            assert!(geometry.kind().is_none(), "{case} should not install a shape");
            assert_eq!(geometry.create_shape(&unit_bbox(), 0.0).class, ShapeClass::Box);
        }
    }

    #[test]
    fn test_validate_mesh_reports_out_of_range_index() {
        let err = validate_mesh(vec![0.0; 9], vec![0, 1, 3]).unwrap_err();
        assert!(matches!(
            err,
            GeometryError::IndexOutOfRange {
                index: 3,
                vertex_count: 3
            }
        ));
    }

    #[test]
    fn test_mesh_asset_is_loaded_from_asset_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("wedge.json"),
            r#"{"vertices": [0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1], "indices": [0, 1, 2, 0, 2, 3]}"#,
        )
        .unwrap();
        let value = descriptor(r#"{"type": "mesh", "path": "wedge.json"}"#);

        let geometry = Geometry::from_property(&value, Some(dir.path()));
        assert!(matches!(geometry.kind(), Some(GeometryKind::Mesh(_))));

        let without_dir = Geometry::from_property(&value, None);
        assert!(without_dir.kind().is_none());
    }

    #[test]
    fn test_compound_skips_unsupported_children() {
        let value = descriptor(
            r#"{"type": "compound", "shapes": [
                {"type": "box", "points": [-1, 0, -1, 1, 1, 1]},
                {"type": "sphere", "points": [0, 0, 0, 1, 1, 1]},
                {"type": "box", "points": [-1, 1, -1, 1, 2, 1]}
            ]}"#,
        );
        let geometry = Geometry::from_property(&value, None);
        match geometry.kind() {
            Some(GeometryKind::Compound(children)) => assert_eq!(children.len(), 2),
            other => panic!("expected compound, got {other:?}"),
        }

        let bbox = BBox::new(Point3::new(-1.0, 0.0, -1.0), Point3::new(1.0, 4.0, 1.0));
        let built = geometry.create_shape(&bbox, 1.0);
        assert_eq!(built.class, ShapeClass::Compound);
        let compound = built.shape.as_compound().expect("compound");
        assert_eq!(compound.shapes().len(), 2);
        let aabb = built.shape.compute_local_aabb();
        assert!((aabb.maxs.y - 4.0).abs() < 1e-4, "children are stretched to the bbox");
    }

    #[test]
    fn test_create_shape_is_deterministic() {
        let geometry = Geometry::from_property(&tetrahedron(), None);
        let bbox = unit_bbox();
        let a = geometry.create_shape(&bbox, 2.0);
        let b = geometry.create_shape(&bbox, 2.0);
        assert_eq!(a.class, b.class);
        let (aabb_a, aabb_b) = (a.shape.compute_local_aabb(), b.shape.compute_local_aabb());
        assert_eq!(aabb_a.mins, aabb_b.mins);
        assert_eq!(aabb_a.maxs, aabb_b.maxs);
        assert_eq!(a.center_of_mass_offset, b.center_of_mass_offset);
    }
}
