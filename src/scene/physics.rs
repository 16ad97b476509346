use nalgebra::{Isometry3, Quaternion, Translation3, UnitQuaternion};
use rapier3d::prelude::*;

use super::actor::DynamicsMode;
use super::material::Material;
use super::shape::{PhysicsShape, Quat, Vec3};
use crate::error::EngineError;

// Collision groups for prim and avatar bodies
// Phantoms and triggers only meet static geometry and avatars
// Note: rapier3d uses InteractionGroups (not CollisionGroups like bevy_rapier)
const GROUP_NORMAL: Group = Group::GROUP_1; // Solid prims
const GROUP_PHANTOM: Group = Group::GROUP_2; // Phantom prims
const GROUP_TRIGGER: Group = Group::GROUP_3; // Volume-detect prims
const GROUP_CHARACTER: Group = Group::GROUP_4; // Avatars

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollisionGroup {
    Normal,
    Phantom,
    Trigger,
    Character,
}

impl CollisionGroup {
    pub fn interaction_groups(self) -> InteractionGroups {
        match self {
            CollisionGroup::Normal => InteractionGroups::new(GROUP_NORMAL, Group::ALL),
            CollisionGroup::Phantom => InteractionGroups::new(GROUP_PHANTOM, GROUP_CHARACTER),
            CollisionGroup::Trigger => {
                InteractionGroups::new(GROUP_TRIGGER, GROUP_NORMAL | GROUP_CHARACTER)
            }
            CollisionGroup::Character => {
                InteractionGroups::new(GROUP_CHARACTER, GROUP_NORMAL | GROUP_PHANTOM | GROUP_TRIGGER)
            }
        }
    }
}

/// Converts an [x, y, z, w] array to a UnitQuaternion, falling back to identity when degenerate.
pub fn to_unit_quaternion(q: Quat) -> UnitQuaternion<f32> {
    let quat = Quaternion::new(q[3], q[0], q[1], q[2]);
    if !quat.norm().is_finite() || quat.norm() < 1.0e-6 {
        return UnitQuaternion::identity();
    }
    UnitQuaternion::from_quaternion(quat)
}

pub fn from_unit_quaternion(q: &UnitQuaternion<f32>) -> Quat {
    [q.i, q.j, q.k, q.w]
}

pub fn pose(position: Vec3, rotation: Quat) -> Isometry3<f32> {
    Isometry3::from_parts(
        Translation3::new(position[0], position[1], position[2]),
        to_unit_quaternion(rotation),
    )
}

/// Composes `local` under `parent`, returning the resulting position and rotation.
pub fn compose(parent: (Vec3, Quat), local: (Vec3, Quat)) -> (Vec3, Quat) {
    let combined = pose(parent.0, parent.1) * pose(local.0, local.1);
    let t = combined.translation.vector;
    ([t.x, t.y, t.z], from_unit_quaternion(&combined.rotation))
}

/// Expresses a world pose in the frame of `parent`.
pub fn relative(parent: (Vec3, Quat), world: (Vec3, Quat)) -> (Vec3, Quat) {
    let local = pose(parent.0, parent.1).inverse() * pose(world.0, world.1);
    let t = local.translation.vector;
    ([t.x, t.y, t.z], from_unit_quaternion(&local.rotation))
}

fn body_type(mode: DynamicsMode) -> RigidBodyType {
    match mode {
        DynamicsMode::Static => RigidBodyType::Fixed,
        DynamicsMode::Kinematic => RigidBodyType::KinematicPositionBased,
        DynamicsMode::Dynamic => RigidBodyType::Dynamic,
    }
}

/// Collider settings shared by every part of one shape attachment.
#[derive(Debug, Clone, Copy)]
pub struct AttachParams<'a> {
    pub name: &'a str,
    pub material: &'a Material,
    pub group: CollisionGroup,
    pub sensor: bool,
}

/// Wrapper around Rapier3D physics world.
/// Only the scene consumer thread touches it.
pub struct PhysicsWorld {
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
    /// Largest collider half-extent accepted by `attach_shape`
    pub max_shape_extent: f32,
}

impl PhysicsWorld {
    pub fn new(gravity_y: f32, max_shape_extent: f32) -> Self {
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
            max_shape_extent,
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

    /// Creates an empty rigid body at the given pose
    /// - Static bodies are fixed
    /// - Kinematic bodies are position-based, not simulated
    /// - Dynamic bodies are affected by gravity and collisions
    pub fn create_body(&mut self, mode: DynamicsMode, position: Vec3, rotation: Quat) -> RigidBodyHandle {
        let quat = to_unit_quaternion(rotation);
        let body = RigidBodyBuilder::new(body_type(mode))
            .translation(vector![position[0], position[1], position[2]])
            .rotation(quat.scaled_axis())
            .build();
        self.rigid_body_set.insert(body)
    }

    /// Attaches every part of `shape` to `body` at `local`. All parts are
    /// validated before any collider is inserted, so a failure leaves the
    /// body untouched.
    pub fn attach_shape(
        &mut self,
        body: RigidBodyHandle,
        shape: &PhysicsShape,
        local: Isometry3<f32>,
        params: AttachParams<'_>,
    ) -> Result<Vec<ColliderHandle>, EngineError> {
        if !self.rigid_body_set.contains(body) {
            return Err(EngineError::MissingBody(params.name.to_string()));
        }
        for part in shape.parts() {
            self.validate_part(part, params.name)?;
        }

        let mut handles = Vec::with_capacity(shape.parts().len());
        for part in shape.parts() {
            let collider = ColliderBuilder::new(part.clone())
                .position(local)
                .density(params.material.density)
                .friction(params.material.dynamic_friction)
                .restitution(params.material.restitution)
                .sensor(params.sensor)
                .collision_groups(params.group.interaction_groups())
                .build();
            handles.push(
                self.collider_set
                    .insert_with_parent(collider, body, &mut self.rigid_body_set),
            );
        }
        Ok(handles)
    }

    fn validate_part(&self, part: &SharedShape, name: &str) -> Result<(), EngineError> {
        let aabb = part.compute_local_aabb();
        let half = aabb.half_extents();
        let finite = half.iter().chain(aabb.center().coords.iter()).all(|v| v.is_finite());
        if !finite {
            return Err(EngineError::InvalidGeometry {
                name: name.to_string(),
                reason: "non-finite bounds".to_string(),
            });
        }
        let largest = half.iter().fold(0.0f32, |acc, v| acc.max(*v));
        if largest > self.max_shape_extent {
            return Err(EngineError::InvalidGeometry {
                name: name.to_string(),
                reason: format!("half extent {} exceeds {}", largest, self.max_shape_extent),
            });
        }
        Ok(())
    }

    /// Removes colliders from whatever body they are attached to
    pub fn detach_colliders(&mut self, colliders: &[ColliderHandle]) {
        for &handle in colliders {
            self.collider_set.remove(
                handle,
                &mut self.island_manager,
                &mut self.rigid_body_set,
                true,
            );
        }
    }

    /// Removes a body together with every collider still attached to it
    pub fn remove_body(&mut self, handle: RigidBodyHandle) -> bool {
        self.rigid_body_set
            .remove(
                handle,
                &mut self.island_manager,
                &mut self.collider_set,
                &mut self.impulse_joint_set,
                &mut self.multibody_joint_set,
                true,
            )
            .is_some()
    }

    /// Updates whether a body is static, kinematic or dynamic
    pub fn set_body_mode(&mut self, handle: RigidBodyHandle, mode: DynamicsMode) {
        if let Some(body) = self.rigid_body_set.get_mut(handle) {
            body.set_body_type(body_type(mode), true);
            if !mode.is_physical() {
                body.set_linvel(vector![0.0, 0.0, 0.0], false);
                body.set_angvel(vector![0.0, 0.0, 0.0], false);
            }
        }
    }

    pub fn body_mode(&self, handle: RigidBodyHandle) -> Option<DynamicsMode> {
        self.rigid_body_set.get(handle).map(|body| match body.body_type() {
            RigidBodyType::Fixed => DynamicsMode::Static,
            RigidBodyType::Dynamic => DynamicsMode::Dynamic,
            _ => DynamicsMode::Kinematic,
        })
    }

    /// Sets the velocities of a dynamic body
    pub fn set_velocities(&mut self, handle: RigidBodyHandle, linear: Vec3, angular: Vec3) {
        if let Some(body) = self.rigid_body_set.get_mut(handle) {
            if body.is_dynamic() {
                body.set_linvel(vector![linear[0], linear[1], linear[2]], true);
                body.set_angvel(vector![angular[0], angular[1], angular[2]], true);
            }
        }
    }

    /// Linear and angular velocity of a dynamic body.
    pub fn velocities(&self, handle: RigidBodyHandle) -> Option<(Vec3, Vec3)> {
        let body = self.rigid_body_set.get(handle)?;
        if !body.is_dynamic() {
            return None;
        }
        let (l, a) = (body.linvel(), body.angvel());
        Some(([l.x, l.y, l.z], [a.x, a.y, a.z]))
    }

    pub fn set_gravity_scale(&mut self, handle: RigidBodyHandle, scale: f32) {
        if let Some(body) = self.rigid_body_set.get_mut(handle) {
            body.set_gravity_scale(scale, true);
        }
    }

    /// Toggles sensor mode and collision group on a set of colliders
    pub fn set_sensor(&mut self, colliders: &[ColliderHandle], sensor: bool, group: CollisionGroup) {
        for &handle in colliders {
            if let Some(collider) = self.collider_set.get_mut(handle) {
                collider.set_sensor(sensor);
                collider.set_collision_groups(group.interaction_groups());
            }
        }
    }

    /// Moves colliders to a new pose relative to their parent body
    pub fn set_local_pose(&mut self, colliders: &[ColliderHandle], local: Isometry3<f32>) {
        for &handle in colliders {
            if let Some(collider) = self.collider_set.get_mut(handle) {
                collider.set_position_wrt_parent(local);
            }
        }
    }

    pub fn set_material(&mut self, colliders: &[ColliderHandle], material: &Material) {
        for &handle in colliders {
            if let Some(collider) = self.collider_set.get_mut(handle) {
                collider.set_density(material.density);
                collider.set_friction(material.dynamic_friction);
                collider.set_restitution(material.restitution);
            }
        }
    }

    pub fn is_sensor(&self, handle: ColliderHandle) -> Option<bool> {
        self.collider_set.get(handle).map(|c| c.is_sensor())
    }

    /// Collider handles currently attached to a body
    pub fn colliders_of(&self, handle: RigidBodyHandle) -> Vec<ColliderHandle> {
        self.rigid_body_set
            .get(handle)
            .map(|body| body.colliders().to_vec())
            .unwrap_or_default()
    }

    /// Gets the position of a rigid body
    pub fn get_position(&self, handle: RigidBodyHandle) -> Option<[f32; 3]> {
        self.rigid_body_set.get(handle).map(|body| {
            let pos = body.translation();
            [pos.x, pos.y, pos.z]
        })
    }

    /// Gets the rotation of a rigid body as quaternion [x, y, z, w]
    pub fn get_rotation(&self, handle: RigidBodyHandle) -> Option<[f32; 4]> {
        self.rigid_body_set
            .get(handle)
            .map(|body| from_unit_quaternion(body.rotation()))
    }

    /// Adds a kinematic capsule body for an avatar
    /// Uses a capsule shape for smooth collisions with environment
    pub fn add_character(
        &mut self,
        position: Vec3,
        rotation: Quat,
        radius: f32,
        height: f32,
    ) -> (RigidBodyHandle, ColliderHandle) {
        let quat = to_unit_quaternion(rotation);
        let body = RigidBodyBuilder::kinematic_position_based()
            .translation(vector![position[0], position[1], position[2]])
            .rotation(quat.scaled_axis())
            .build();
        let body_handle = self.rigid_body_set.insert(body);

        // half-height is the cylinder part, total height = 2*half_height + 2*radius
        let half_height = (height - 2.0 * radius).max(0.0) / 2.0;
        let collider = ColliderBuilder::capsule_y(half_height, radius)
            .collision_groups(CollisionGroup::Character.interaction_groups())
            .build();
        let collider_handle = self
            .collider_set
            .insert_with_parent(collider, body_handle, &mut self.rigid_body_set);
        (body_handle, collider_handle)
    }

    pub fn body_count(&self) -> usize {
        self.rigid_body_set.len()
    }

    pub fn collider_count(&self) -> usize {
        self.collider_set.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::shape::{ShapeKind, IDENTITY_ROTATION};

    fn cube(half: f32) -> PhysicsShape {
        PhysicsShape::new(ShapeKind::Box, vec![SharedShape::cuboid(half, half, half)], 1, false)
    }

    fn params(material: &Material) -> AttachParams<'_> {
        AttachParams {
            name: "test",
            material,
            group: CollisionGroup::Normal,
            sensor: false,
        }
    }

    #[test]
    fn test_dynamic_body_falls() {
        let mut world = PhysicsWorld::new(9.8, 1000.0);
        let body = world.create_body(DynamicsMode::Dynamic, [0.0, 10.0, 0.0], IDENTITY_ROTATION);
        let material = Material::default();
        world
            .attach_shape(body, &cube(0.5), Isometry3::identity(), params(&material))
            .unwrap();
        for _ in 0..30 {
            world.step(1.0 / 60.0);
        }
        let pos = world.get_position(body).unwrap();
        assert!(pos[1] < 10.0, "dynamic body should fall, got {}", pos[1]);
    }

    #[test]
    fn test_oversized_shape_rejected_without_side_effects() {
        let mut world = PhysicsWorld::new(9.8, 100.0);
        let body = world.create_body(DynamicsMode::Kinematic, [0.0; 3], IDENTITY_ROTATION);
        let material = Material::default();
        let err = world
            .attach_shape(body, &cube(500.0), Isometry3::identity(), params(&material))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidGeometry { .. }));
        assert_eq!(world.collider_count(), 0);
    }

    #[test]
    fn test_attach_to_missing_body() {
        let mut world = PhysicsWorld::new(9.8, 100.0);
        let body = world.create_body(DynamicsMode::Kinematic, [0.0; 3], IDENTITY_ROTATION);
        world.remove_body(body);
        let material = Material::default();
        let err = world
            .attach_shape(body, &cube(1.0), Isometry3::identity(), params(&material))
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingBody(_)));
    }

    #[test]
    fn test_body_mode_transitions() {
        let mut world = PhysicsWorld::new(9.8, 100.0);
        let body = world.create_body(DynamicsMode::Static, [0.0; 3], IDENTITY_ROTATION);
        assert_eq!(world.body_mode(body), Some(DynamicsMode::Static));
        world.set_body_mode(body, DynamicsMode::Dynamic);
        assert_eq!(world.body_mode(body), Some(DynamicsMode::Dynamic));
        world.set_body_mode(body, DynamicsMode::Kinematic);
        assert_eq!(world.body_mode(body), Some(DynamicsMode::Kinematic));
    }

    #[test]
    fn test_compose_translates_in_parent_frame() {
        // 90 degrees about Y
        let half = std::f32::consts::FRAC_PI_4;
        let rot = [0.0, half.sin(), 0.0, half.cos()];
        let (pos, _) = compose(([1.0, 0.0, 0.0], rot), ([1.0, 0.0, 0.0], IDENTITY_ROTATION));
        assert!((pos[0] - 1.0).abs() < 1e-5);
        assert!((pos[2] + 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_relative_inverts_compose() {
        let half = std::f32::consts::FRAC_PI_4;
        let parent = ([3.0, 1.0, 0.0], [0.0, half.sin(), 0.0, half.cos()]);
        let world = compose(parent, ([1.0, 2.0, 3.0], IDENTITY_ROTATION));
        let (pos, rot) = relative(parent, world);
        assert!((pos[0] - 1.0).abs() < 1e-4);
        assert!((pos[1] - 2.0).abs() < 1e-4);
        assert!((pos[2] - 3.0).abs() < 1e-4);
        assert!((rot[3].abs() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_degenerate_quaternion_is_identity() {
        assert_eq!(to_unit_quaternion([0.0; 4]), UnitQuaternion::identity());
    }
}
