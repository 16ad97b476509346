//! Geometry descriptions and the immutable physics shapes produced from them.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rapier3d::prelude::SharedShape;
use serde::{Deserialize, Serialize};

/// Position or size in scene units
pub type Vec3 = [f32; 3];

/// Rotation quaternion as [x, y, z, w]
pub type Quat = [f32; 4];

pub const IDENTITY_ROTATION: Quat = [0.0, 0.0, 0.0, 1.0];

/// Collision representation requested for a geometry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapePreference {
    /// No collision shape at all
    None,
    /// Exact primitive or decomposed hulls
    #[default]
    Prim,
    /// A single convex hull around the whole geometry
    ConvexHull,
}

/// Base geometry of an object, in unit scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PrimKind {
    Box,
    Sphere,
    Cylinder,
    Wedge,
    /// Arbitrary geometry already split into convex pieces
    Hulls { hulls: Vec<Vec<Vec3>> },
}

impl PrimKind {
    /// Primitives the engine represents directly, cheap enough to rebuild every time.
    pub fn is_basic(&self) -> bool {
        matches!(self, PrimKind::Box | PrimKind::Sphere | PrimKind::Cylinder)
    }
}

/// What the meshing stage is asked to turn into a [`PhysicsShape`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryDesc {
    pub kind: PrimKind,
    #[serde(default)]
    pub preference: ShapePreference,
    /// Flexible objects never carry collision geometry
    #[serde(default)]
    pub flexible: bool,
}

impl GeometryDesc {
    pub fn new(kind: PrimKind) -> Self {
        Self {
            kind,
            preference: ShapePreference::Prim,
            flexible: false,
        }
    }

    pub fn cube() -> Self {
        Self::new(PrimKind::Box)
    }

    pub fn sphere() -> Self {
        Self::new(PrimKind::Sphere)
    }

    pub fn hulls(hulls: Vec<Vec<Vec3>>) -> Self {
        Self::new(PrimKind::Hulls { hulls })
    }

    pub fn with_preference(mut self, preference: ShapePreference) -> Self {
        self.preference = preference;
        self
    }

    pub fn with_flexible(mut self, flexible: bool) -> Self {
        self.flexible = flexible;
        self
    }

    /// True when this geometry produces no collision shape.
    pub fn is_degenerate(&self) -> bool {
        self.preference == ShapePreference::None || self.flexible
    }

    /// The same base geometry with a default collision representation.
    pub fn coerced(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            preference: ShapePreference::Prim,
            flexible: false,
        }
    }

    /// Content hash used to key the shape cache.
    pub fn content_hash(&self, size: Vec3, lod: f32, physical: bool) -> u64 {
        let mut hasher = DefaultHasher::new();
        match &self.kind {
            PrimKind::Box => 0u8.hash(&mut hasher),
            PrimKind::Sphere => 1u8.hash(&mut hasher),
            PrimKind::Cylinder => 2u8.hash(&mut hasher),
            PrimKind::Wedge => 3u8.hash(&mut hasher),
            PrimKind::Hulls { hulls } => {
                4u8.hash(&mut hasher);
                hulls.len().hash(&mut hasher);
                for hull in hulls {
                    hull.len().hash(&mut hasher);
                    for point in hull {
                        hash_vec3(*point, &mut hasher);
                    }
                }
            }
        }
        self.preference.hash(&mut hasher);
        self.flexible.hash(&mut hasher);
        hash_vec3(size, &mut hasher);
        lod.to_bits().hash(&mut hasher);
        physical.hash(&mut hasher);
        hasher.finish()
    }
}

fn hash_vec3(v: Vec3, hasher: &mut DefaultHasher) {
    for c in v {
        c.to_bits().hash(hasher);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShapeKind {
    Null,
    Box,
    Sphere,
    Cylinder,
    SingleConvex,
    DecomposedHulls,
}

struct ShapeData {
    kind: ShapeKind,
    parts: Vec<SharedShape>,
    complexity: usize,
    hash: u64,
    physical: bool,
}

/// Immutable collision shape shared between actors, caches and commands.
///
/// Cloning is a reference-count bump. A null shape has no parts and
/// complexity zero; primitives count as one; decomposed hulls count one per
/// hull.
#[derive(Clone)]
pub struct PhysicsShape {
    inner: Arc<ShapeData>,
}

impl PhysicsShape {
    pub fn null() -> Self {
        Self::new(ShapeKind::Null, Vec::new(), 0, false)
    }

    pub fn new(kind: ShapeKind, parts: Vec<SharedShape>, hash: u64, physical: bool) -> Self {
        let complexity = match kind {
            ShapeKind::Null => 0,
            ShapeKind::DecomposedHulls => parts.len(),
            _ => 1,
        };
        Self {
            inner: Arc::new(ShapeData {
                kind,
                parts,
                complexity,
                hash,
                physical,
            }),
        }
    }

    pub fn kind(&self) -> ShapeKind {
        self.inner.kind
    }

    pub fn is_null(&self) -> bool {
        self.inner.kind == ShapeKind::Null || self.inner.parts.is_empty()
    }

    pub fn parts(&self) -> &[SharedShape] {
        &self.inner.parts
    }

    pub fn complexity(&self) -> usize {
        self.inner.complexity
    }

    pub fn hash(&self) -> u64 {
        self.inner.hash
    }

    /// Whether the shape was generated for a physical (dynamic) body
    pub fn is_physical(&self) -> bool {
        self.inner.physical
    }

    /// Total mass of all parts at the given density
    pub fn mass(&self, density: f32) -> f32 {
        self.inner
            .parts
            .iter()
            .map(|part| part.mass_properties(density).mass())
            .sum()
    }

    pub fn ptr_eq(&self, other: &PhysicsShape) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for PhysicsShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicsShape")
            .field("kind", &self.inner.kind)
            .field("parts", &self.inner.parts.len())
            .field("complexity", &self.inner.complexity)
            .field("hash", &format_args!("{:016x}", self.inner.hash))
            .field("physical", &self.inner.physical)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_shape_has_no_complexity() {
        let shape = PhysicsShape::null();
        assert!(shape.is_null());
        assert_eq!(shape.complexity(), 0);
        assert_eq!(shape.mass(1000.0), 0.0);
    }

    #[test]
    fn test_decomposed_complexity_counts_parts() {
        let parts = vec![
            SharedShape::cuboid(0.5, 0.5, 0.5),
            SharedShape::cuboid(0.5, 0.5, 0.5),
            SharedShape::ball(0.5),
        ];
        let shape = PhysicsShape::new(ShapeKind::DecomposedHulls, parts, 7, true);
        assert_eq!(shape.complexity(), 3);
        assert!(shape.is_physical());

        let single = PhysicsShape::new(ShapeKind::Box, vec![SharedShape::cuboid(1.0, 1.0, 1.0)], 0, false);
        assert_eq!(single.complexity(), 1);
    }

    #[test]
    fn test_box_mass_matches_volume() {
        let shape = PhysicsShape::new(ShapeKind::Box, vec![SharedShape::cuboid(0.5, 0.5, 0.5)], 0, true);
        assert!((shape.mass(1000.0) - 1000.0).abs() < 0.01);
    }

    #[test]
    fn test_degenerate_geometry() {
        assert!(!GeometryDesc::cube().is_degenerate());
        assert!(GeometryDesc::cube().with_flexible(true).is_degenerate());
        let none = GeometryDesc::sphere().with_preference(ShapePreference::None);
        assert!(none.is_degenerate());
        let coerced = none.coerced();
        assert!(!coerced.is_degenerate());
        assert_eq!(coerced.kind, PrimKind::Sphere);
    }

    #[test]
    fn test_content_hash_distinguishes_size_and_physical() {
        let geometry = GeometryDesc::cube();
        let a = geometry.content_hash([1.0, 1.0, 1.0], 32.0, false);
        assert_eq!(a, geometry.content_hash([1.0, 1.0, 1.0], 32.0, false));
        assert_ne!(a, geometry.content_hash([1.0, 2.0, 1.0], 32.0, false));
        assert_ne!(a, geometry.content_hash([1.0, 1.0, 1.0], 32.0, true));
    }

    #[test]
    fn test_clone_shares_data() {
        let shape = PhysicsShape::new(ShapeKind::Sphere, vec![SharedShape::ball(1.0)], 3, false);
        let copy = shape.clone();
        assert!(shape.ptr_eq(&copy));
        assert!(!shape.ptr_eq(&PhysicsShape::null()));
    }
}
