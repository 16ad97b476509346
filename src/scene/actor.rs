//! Prim and character actors owned by the scene.

use std::fmt;

use rapier3d::prelude::{ColliderHandle, RigidBodyHandle};
use serde::{Deserialize, Serialize};

use super::arena::Index;
use super::constants::character;
use super::material::Material;
use super::physics::CollisionGroup;
use super::shape::{GeometryDesc, PhysicsShape, Quat, ShapeKind, Vec3, IDENTITY_ROTATION};

/// Handle to a prim actor. Stops resolving once the actor is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub(crate) Index);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor#{}v{}", self.0.slot(), self.0.generation())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CharacterId(pub(crate) Index);

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "character#{}v{}", self.0.slot(), self.0.generation())
    }
}

/// How the engine simulates a body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DynamicsMode {
    /// Never moves (scene startup geometry)
    Static,
    /// Moved by the owner, not by the solver
    Kinematic,
    /// Simulated by the solver
    Dynamic,
}

impl DynamicsMode {
    pub fn is_physical(self) -> bool {
        self == DynamicsMode::Dynamic
    }

    /// Mode a body takes when toggled to or from physical, keeping static bodies static.
    pub fn toggled(self, physical: bool) -> DynamicsMode {
        match (self, physical) {
            (_, true) => DynamicsMode::Dynamic,
            (DynamicsMode::Static, false) => DynamicsMode::Static,
            (_, false) => DynamicsMode::Kinematic,
        }
    }
}

/// Creation options for a prim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddPrimFlags {
    pub physical: bool,
    /// Collides with nothing but static geometry
    pub phantom: bool,
    /// Arriving from a neighbouring region; meshed as a box first
    pub from_crossing: bool,
    /// Loaded with the scene; becomes a static body
    pub from_scene_startup: bool,
    /// Created kinematic and resumed later
    pub start_suspended: bool,
    /// Resume immediately after creation, keeping the initial velocities
    pub interpolate: bool,
}

impl AddPrimFlags {
    pub fn physical() -> Self {
        Self {
            physical: true,
            ..Default::default()
        }
    }

    /// Dynamics mode the new body starts with.
    pub fn dynamics(&self) -> DynamicsMode {
        if self.physical {
            DynamicsMode::Dynamic
        } else if self.from_scene_startup {
            DynamicsMode::Static
        } else {
            DynamicsMode::Kinematic
        }
    }
}

/// Everything needed to create a prim actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimShapeData {
    pub name: String,
    pub geometry: GeometryDesc,
    pub position: Vec3,
    pub rotation: Quat,
    pub size: Vec3,
    #[serde(default)]
    pub velocity: Vec3,
    #[serde(default)]
    pub angular_velocity: Vec3,
    #[serde(default)]
    pub material: Material,
    #[serde(default)]
    pub volume_detect: bool,
    /// Serialized hulls from an earlier meshing pass
    #[serde(skip)]
    pub precomputed: Option<Vec<u8>>,
}

impl PrimShapeData {
    pub fn new(name: impl Into<String>, geometry: GeometryDesc, position: Vec3, size: Vec3) -> Self {
        Self {
            name: name.into(),
            geometry,
            position,
            rotation: IDENTITY_ROTATION,
            size,
            velocity: [0.0; 3],
            angular_velocity: [0.0; 3],
            material: Material::default(),
            volume_detect: false,
            precomputed: None,
        }
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_velocity(mut self, velocity: Vec3, angular_velocity: Vec3) -> Self {
        self.velocity = velocity;
        self.angular_velocity = angular_velocity;
        self
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    pub fn with_volume_detect(mut self, volume_detect: bool) -> Self {
        self.volume_detect = volume_detect;
        self
    }

    pub fn with_precomputed(mut self, bytes: Vec<u8>) -> Self {
        self.precomputed = Some(bytes);
        self
    }
}

/// A prim in the scene. Roots own a rigid body; children attach their
/// colliders to the root body at their local pose.
#[derive(Debug)]
pub struct PrimActor {
    pub(crate) name: String,
    pub(crate) geometry: GeometryDesc,
    pub(crate) size: Vec3,
    /// World pose for roots, local pose for children
    pub(crate) position: Vec3,
    pub(crate) rotation: Quat,
    pub(crate) shape: PhysicsShape,
    pub(crate) colliders: Vec<ColliderHandle>,
    pub(crate) body: Option<RigidBodyHandle>,
    pub(crate) parent: Option<ActorId>,
    pub(crate) children: Vec<ActorId>,
    pub(crate) dynamics: DynamicsMode,
    pub(crate) volume_detect: bool,
    pub(crate) material: Material,
    pub(crate) group: CollisionGroup,
    pub(crate) suspended: bool,
    pub(crate) velocity: Vec3,
    pub(crate) angular_velocity: Vec3,
    /// Cached mass of the body and its children, roots only
    pub(crate) mass: f32,
}

impl PrimActor {
    pub(crate) fn from_data(data: &PrimShapeData, flags: &AddPrimFlags) -> Self {
        Self {
            name: data.name.clone(),
            geometry: data.geometry.clone(),
            size: data.size,
            position: data.position,
            rotation: data.rotation,
            shape: PhysicsShape::null(),
            colliders: Vec::new(),
            body: None,
            parent: None,
            children: Vec::new(),
            dynamics: flags.dynamics(),
            volume_detect: false,
            material: data.material,
            group: if flags.phantom {
                CollisionGroup::Phantom
            } else {
                CollisionGroup::Normal
            },
            suspended: false,
            velocity: data.velocity,
            angular_velocity: data.angular_velocity,
            mass: 0.0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn geometry(&self) -> &GeometryDesc {
        &self.geometry
    }

    pub fn size(&self) -> Vec3 {
        self.size
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    pub fn shape(&self) -> &PhysicsShape {
        &self.shape
    }

    pub fn colliders(&self) -> &[ColliderHandle] {
        &self.colliders
    }

    pub fn body(&self) -> Option<RigidBodyHandle> {
        self.body
    }

    pub fn parent(&self) -> Option<ActorId> {
        self.parent
    }

    pub fn children(&self) -> &[ActorId] {
        &self.children
    }

    pub fn dynamics(&self) -> DynamicsMode {
        self.dynamics
    }

    pub fn is_physical(&self) -> bool {
        self.dynamics.is_physical()
    }

    pub fn is_volume_detect(&self) -> bool {
        self.volume_detect
    }

    pub fn material(&self) -> &Material {
        &self.material
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn mass(&self) -> f32 {
        self.mass
    }

    /// Group the actor's colliders are placed in
    pub(crate) fn effective_group(&self) -> CollisionGroup {
        if self.volume_detect {
            CollisionGroup::Trigger
        } else {
            self.group
        }
    }

    /// Comparable copy of the observable state.
    pub fn snapshot(&self) -> ActorSnapshot {
        ActorSnapshot {
            name: self.name.clone(),
            geometry: self.geometry.clone(),
            size: self.size,
            position: self.position,
            rotation: self.rotation,
            shape_kind: self.shape.kind(),
            shape_hash: self.shape.hash(),
            colliders: self.colliders.clone(),
            body: self.body,
            parent: self.parent,
            children: self.children.clone(),
            dynamics: self.dynamics,
            volume_detect: self.volume_detect,
            material: self.material,
            suspended: self.suspended,
            mass: self.mass,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActorSnapshot {
    pub name: String,
    pub geometry: GeometryDesc,
    pub size: Vec3,
    pub position: Vec3,
    pub rotation: Quat,
    pub shape_kind: ShapeKind,
    pub shape_hash: u64,
    pub colliders: Vec<ColliderHandle>,
    pub body: Option<RigidBodyHandle>,
    pub parent: Option<ActorId>,
    pub children: Vec<ActorId>,
    pub dynamics: DynamicsMode,
    pub volume_detect: bool,
    pub material: Material,
    pub suspended: bool,
    pub mass: f32,
}

/// Parameters of an avatar capsule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterSpec {
    pub position: Vec3,
    pub rotation: Quat,
    pub height: f32,
    pub radius: f32,
    #[serde(default)]
    pub flying: bool,
    #[serde(default)]
    pub velocity: Vec3,
}

impl CharacterSpec {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            rotation: IDENTITY_ROTATION,
            height: character::DEFAULT_HEIGHT,
            radius: character::DEFAULT_RADIUS,
            flying: false,
            velocity: [0.0; 3],
        }
    }
}

#[derive(Debug)]
pub struct CharacterActor {
    pub(crate) spec: CharacterSpec,
    pub(crate) body: RigidBodyHandle,
    pub(crate) collider: ColliderHandle,
}

impl CharacterActor {
    pub fn spec(&self) -> &CharacterSpec {
        &self.spec
    }

    pub fn body(&self) -> RigidBodyHandle {
        self.body
    }

    pub fn collider(&self) -> ColliderHandle {
        self.collider
    }
}
