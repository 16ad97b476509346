//! Actor graph and engine state mutated by commands on the consumer thread.

use std::collections::HashMap;

use nalgebra::Isometry3;
use serde::Serialize;

use super::actor::{ActorId, CharacterActor, CharacterId, CharacterSpec, DynamicsMode, PrimActor};
use super::arena::Arena;
use super::material::Material;
use super::physics::{compose, pose, AttachParams, CollisionGroup, PhysicsWorld};
use super::shape::{PhysicsShape, Quat, Vec3};
use crate::config::LimitsConfig;
use crate::error::{EngineError, PrecheckFailure};

/// Counters exposed for monitoring and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SceneStats {
    /// Root bodies added to the engine
    pub actors_added: u64,
    pub actors_removed: u64,
    pub commands_executed: u64,
    /// Times a command was parked behind a latch
    pub commands_delayed: u64,
    pub commands_culled: u64,
    pub mesh_requests: u64,
    pub engine_failures: u64,
    /// Dynamics transitions refused by the pre-check
    pub rejected_transitions: u64,
    pub panics: u64,
}

pub struct World {
    pub(crate) physics: PhysicsWorld,
    pub(crate) actors: Arena<PrimActor>,
    pub(crate) characters: Arena<CharacterActor>,
    pub(crate) limits: LimitsConfig,
    pub(crate) stats: SceneStats,
}

impl World {
    pub fn new(gravity: f32, limits: LimitsConfig) -> Self {
        Self {
            physics: PhysicsWorld::new(gravity, limits.max_shape_extent),
            actors: Arena::new(),
            characters: Arena::new(),
            limits,
            stats: SceneStats::default(),
        }
    }

    pub fn physics(&self) -> &PhysicsWorld {
        &self.physics
    }

    pub fn stats(&self) -> SceneStats {
        self.stats
    }

    pub fn actor(&self, id: ActorId) -> Option<&PrimActor> {
        self.actors.get(id.0)
    }

    pub(crate) fn actor_mut(&mut self, id: ActorId) -> Option<&mut PrimActor> {
        self.actors.get_mut(id.0)
    }

    pub fn character(&self, id: CharacterId) -> Option<&CharacterActor> {
        self.characters.get(id.0)
    }

    pub fn is_disposed(&self, id: ActorId) -> bool {
        !self.actors.contains(id.0)
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    pub fn character_count(&self) -> usize {
        self.characters.len()
    }

    /// Live actor ids in slot order
    pub fn actor_ids(&self) -> Vec<ActorId> {
        self.actors.iter().map(|(index, _)| ActorId(index)).collect()
    }

    /// The actor followed by its children, in link order.
    pub fn composing_prims(&self, id: ActorId) -> Vec<ActorId> {
        let mut prims = vec![id];
        if let Some(actor) = self.actor(id) {
            prims.extend_from_slice(&actor.children);
        }
        prims
    }

    /// Root of the body `id` belongs to
    pub fn root_of(&self, id: ActorId) -> ActorId {
        self.actor(id).and_then(|a| a.parent).unwrap_or(id)
    }

    fn missing(id: ActorId) -> EngineError {
        EngineError::MissingActor(id.to_string())
    }

    /// Creates the rigid body for a new root actor and inserts it into the scene.
    pub fn add_actor_to_scene(&mut self, mut actor: PrimActor, shape: PhysicsShape) -> Result<ActorId, EngineError> {
        let body = self.physics.create_body(actor.dynamics, actor.position, actor.rotation);
        let params = AttachParams {
            name: &actor.name,
            material: &actor.material,
            group: actor.effective_group(),
            sensor: actor.volume_detect,
        };
        let colliders = match self.physics.attach_shape(body, &shape, Isometry3::identity(), params) {
            Ok(colliders) => colliders,
            Err(e) => {
                self.physics.remove_body(body);
                return Err(e);
            }
        };
        self.physics.set_gravity_scale(body, actor.material.gravity_multiplier);

        actor.body = Some(body);
        actor.parent = None;
        actor.mass = shape.mass(actor.material.density);
        actor.shape = shape;
        actor.colliders = colliders;
        let id = ActorId(self.actors.insert(actor));
        self.stats.actors_added += 1;
        Ok(id)
    }

    /// Inserts a new actor directly as a child of `parent`.
    pub fn add_child_to_scene(
        &mut self,
        parent: ActorId,
        actor: PrimActor,
        shape: PhysicsShape,
        delay_mass: bool,
    ) -> Result<ActorId, EngineError> {
        if self.is_disposed(parent) {
            return Err(Self::missing(parent));
        }
        let (position, rotation) = (actor.position, actor.rotation);
        let id = ActorId(self.actors.insert(actor));
        if let Err(e) = self.link_child(parent, id, shape, position, rotation, delay_mass) {
            self.actors.remove(id.0);
            return Err(e);
        }
        Ok(id)
    }

    /// Attaches `child` to `parent`'s body at the given local pose.
    ///
    /// A child that was a root loses its own body. Its former children are
    /// re-attached directly to `parent` with their poses composed.
    pub fn link_child(
        &mut self,
        parent: ActorId,
        child: ActorId,
        shape: PhysicsShape,
        local_position: Vec3,
        local_rotation: Quat,
        delay_mass: bool,
    ) -> Result<(), EngineError> {
        let parent_actor = self.actor(parent).ok_or_else(|| Self::missing(parent))?;
        let parent_body = parent_actor.body.ok_or_else(|| EngineError::MissingBody(parent_actor.name.clone()))?;
        let parent_dynamics = parent_actor.dynamics;
        let parent_vd = parent_actor.volume_detect;

        let child_actor = self.actor(child).ok_or_else(|| Self::missing(child))?;
        let old_parent = child_actor.parent;
        let old_body = child_actor.body;
        let old_colliders = child_actor.colliders.clone();
        let grandchildren = child_actor.children.clone();

        let shape = self.fit_complexity(parent, shape, &child_actor.name);
        let child_actor = self.actors.get(child.0).ok_or_else(|| Self::missing(child))?;
        let params = AttachParams {
            name: &child_actor.name,
            material: &child_actor.material,
            group: if parent_vd { CollisionGroup::Trigger } else { child_actor.group },
            sensor: parent_vd,
        };
        let colliders = self
            .physics
            .attach_shape(parent_body, &shape, pose(local_position, local_rotation), params)?;

        match (old_body, old_parent) {
            (Some(body), _) => {
                self.physics.remove_body(body);
            }
            (None, Some(previous)) => {
                self.physics.detach_colliders(&old_colliders);
                if let Some(p) = self.actor_mut(previous) {
                    p.children.retain(|c| *c != child);
                }
                if previous != parent {
                    self.update_mass(previous);
                }
            }
            (None, None) => {}
        }

        if let Some(c) = self.actor_mut(child) {
            c.parent = Some(parent);
            c.body = None;
            c.colliders = colliders;
            c.shape = shape;
            c.position = local_position;
            c.rotation = local_rotation;
            c.dynamics = parent_dynamics;
            c.volume_detect = parent_vd;
            c.suspended = false;
            c.mass = 0.0;
            c.children.clear();
        }
        if let Some(p) = self.actor_mut(parent) {
            if !p.children.contains(&child) {
                p.children.push(child);
            }
        }

        for grandchild in grandchildren {
            let Some(gc) = self.actor(grandchild) else {
                continue;
            };
            let (position, rotation) = compose((local_position, local_rotation), (gc.position, gc.rotation));
            let gc_shape = gc.shape.clone();
            if let Err(e) = self.link_child(parent, grandchild, gc_shape, position, rotation, true) {
                log::error!("[World] failed to re-attach {} to {}: {}", grandchild, parent, e);
            }
        }

        if !delay_mass {
            self.update_mass(parent);
        }
        Ok(())
    }

    /// Drops the shape of a child that would push a physical body past the
    /// complexity limit.
    fn fit_complexity(&self, parent: ActorId, shape: PhysicsShape, name: &str) -> PhysicsShape {
        let Some(p) = self.actor(parent) else {
            return shape;
        };
        if !p.dynamics.is_physical() {
            return shape;
        }
        let total = self.total_complexity(parent) + shape.complexity();
        if total > self.limits.max_dynamic_complexity {
            log::warn!(
                "[World] {} not attached to {}: too complex ({} of {} hulls)",
                name,
                p.name,
                total,
                self.limits.max_dynamic_complexity
            );
            return PhysicsShape::null();
        }
        shape
    }

    /// Sum of hull counts over a root and its children
    pub fn total_complexity(&self, root: ActorId) -> usize {
        self.composing_prims(root)
            .into_iter()
            .filter_map(|id| self.actor(id))
            .map(|a| a.shape.complexity())
            .sum()
    }

    /// Recomputes the cached mass of a root from its own and its children's shapes.
    pub fn update_mass(&mut self, root: ActorId) {
        let mass: f32 = self
            .composing_prims(root)
            .into_iter()
            .filter_map(|id| self.actor(id))
            .map(|a| a.shape.mass(a.material.density))
            .sum();
        if let Some(actor) = self.actor_mut(root) {
            if actor.body.is_some() {
                actor.mass = mass;
            }
        }
    }

    /// Checks that a body built from these shapes may become dynamic.
    pub fn dynamics_precheck(
        &self,
        root: ActorId,
        root_shape: &PhysicsShape,
        child_shapes: &HashMap<ActorId, PhysicsShape>,
    ) -> Result<(), PrecheckFailure> {
        let Some(actor) = self.actor(root) else {
            return Ok(());
        };
        let mut total = root_shape.complexity();
        let mut mass = root_shape.mass(actor.material.density);
        for child in &actor.children {
            let Some(c) = self.actor(*child) else {
                continue;
            };
            let shape = child_shapes.get(child).unwrap_or(&c.shape);
            total += shape.complexity();
            mass += shape.mass(c.material.density);
        }
        if total > self.limits.max_dynamic_complexity {
            return Err(PrecheckFailure::TooComplex {
                total,
                limit: self.limits.max_dynamic_complexity,
            });
        }
        if !mass.is_finite() || mass <= 0.0 {
            return Err(PrecheckFailure::UnknownMass(mass));
        }
        Ok(())
    }

    /// Turns a dynamic body kinematic when any of its parts is too small or too large to simulate.
    pub fn dynamics_postcheck(&mut self, root: ActorId) {
        let Some(actor) = self.actor(root) else {
            return;
        };
        if !actor.dynamics.is_physical() {
            return;
        }
        let (min, max) = (self.limits.min_dynamic_size, self.limits.max_dynamic_size);
        let out_of_range = self
            .composing_prims(root)
            .into_iter()
            .filter_map(|id| self.actor(id))
            .any(|a| a.size.iter().any(|s| *s < min || *s > max));
        let total = self.total_complexity(root);
        if out_of_range {
            log::warn!("[World] {} has dimensions outside {}..{}, making it non-physical", actor.name, min, max);
            self.set_dynamics(root, DynamicsMode::Kinematic);
        } else if total > self.limits.max_dynamic_complexity {
            log::warn!(
                "[World] {} is too complex ({} of {} hulls), making it non-physical",
                actor.name,
                total,
                self.limits.max_dynamic_complexity
            );
            self.set_dynamics(root, DynamicsMode::Kinematic);
        }
    }

    /// Switches the body of a root and the recorded mode of it and its children.
    pub fn set_dynamics(&mut self, root: ActorId, mode: DynamicsMode) {
        let Some(body) = self.actor(root).and_then(|a| a.body) else {
            return;
        };
        self.physics.set_body_mode(body, mode);
        for id in self.composing_prims(root) {
            if let Some(a) = self.actor_mut(id) {
                a.dynamics = mode;
                if !mode.is_physical() {
                    a.suspended = false;
                }
            }
        }
    }

    /// Replaces the shapes of a body. A root switches to `physical`; children
    /// listed in `child_shapes` get their new shape at their current local pose.
    pub fn rebuild_with_new_shape(
        &mut self,
        id: ActorId,
        shape: PhysicsShape,
        child_shapes: Option<&HashMap<ActorId, PhysicsShape>>,
        physical: bool,
    ) -> Result<(), EngineError> {
        let actor = self.actors.get(id.0).ok_or_else(|| Self::missing(id))?;
        let Some(body) = actor.body else {
            let (parent, name) = (actor.parent, actor.name.clone());
            return match parent {
                Some(parent) => self.replace_child_shape(parent, id, shape),
                None => Err(EngineError::MissingBody(name)),
            };
        };
        let mode = actor.dynamics.toggled(physical);
        let old_colliders = actor.colliders.clone();
        let params = AttachParams {
            name: &actor.name,
            material: &actor.material,
            group: actor.effective_group(),
            sensor: actor.volume_detect,
        };
        let colliders = self.physics.attach_shape(body, &shape, Isometry3::identity(), params)?;
        self.physics.detach_colliders(&old_colliders);
        if let Some(a) = self.actor_mut(id) {
            a.shape = shape;
            a.colliders = colliders;
        }

        if let Some(child_shapes) = child_shapes {
            let children = self.actor(id).map(|a| a.children.clone()).unwrap_or_default();
            for child in children {
                if let Some(child_shape) = child_shapes.get(&child) {
                    self.replace_child_shape(id, child, child_shape.clone())?;
                }
            }
        }

        self.set_dynamics(id, mode);
        self.update_mass(id);
        Ok(())
    }

    /// Swaps a child's colliders for `shape`, keeping its local pose. A null
    /// shape simply detaches the child's collision geometry.
    pub fn replace_child_shape(&mut self, parent: ActorId, child: ActorId, shape: PhysicsShape) -> Result<(), EngineError> {
        let parent_actor = self.actor(parent).ok_or_else(|| Self::missing(parent))?;
        let body = parent_actor
            .body
            .ok_or_else(|| EngineError::MissingBody(parent_actor.name.clone()))?;
        let c = self.actors.get(child.0).ok_or_else(|| Self::missing(child))?;
        let old_colliders = c.colliders.clone();
        let local = pose(c.position, c.rotation);
        let params = AttachParams {
            name: &c.name,
            material: &c.material,
            group: c.effective_group(),
            sensor: c.volume_detect,
        };
        let colliders = self.physics.attach_shape(body, &shape, local, params)?;
        self.physics.detach_colliders(&old_colliders);
        if let Some(c) = self.actor_mut(child) {
            c.shape = shape;
            c.colliders = colliders;
        }
        self.update_mass(parent);
        Ok(())
    }

    /// Applies volume-detect mode to a root and all of its children.
    pub fn set_volume_detect(&mut self, root: ActorId, volume_detect: bool) -> Result<(), EngineError> {
        let actor = self.actor(root).ok_or_else(|| Self::missing(root))?;
        if volume_detect && actor.dynamics.is_physical() {
            return Err(EngineError::InvalidGeometry {
                name: actor.name.clone(),
                reason: "volume detect on a dynamic body".to_string(),
            });
        }
        for id in self.composing_prims(root) {
            let Some(a) = self.actor_mut(id) else {
                continue;
            };
            a.volume_detect = volume_detect;
            let group = a.effective_group();
            let colliders = a.colliders.clone();
            self.physics.set_sensor(&colliders, volume_detect, group);
        }
        Ok(())
    }

    /// Applies `material` to one actor, or to its whole body when `whole_object` is set.
    pub fn set_material(&mut self, id: ActorId, material: Material, whole_object: bool) {
        let root = self.root_of(id);
        let targets = if whole_object { self.composing_prims(root) } else { vec![id] };
        for target in targets {
            let Some(a) = self.actor_mut(target) else {
                continue;
            };
            a.material = material;
            let colliders = a.colliders.clone();
            let body = a.body;
            self.physics.set_material(&colliders, &material);
            if let Some(body) = body {
                self.physics.set_gravity_scale(body, material.gravity_multiplier);
            }
        }
        self.update_mass(root);
    }

    /// Moves a linked child to a new local pose. Returns false when `child`
    /// is not linked to `parent`.
    pub fn set_child_offset(&mut self, parent: ActorId, child: ActorId, position: Vec3, rotation: Quat) -> bool {
        let linked = self.actor(child).is_some_and(|c| c.parent == Some(parent))
            && self.actor(parent).is_some_and(|p| p.children.contains(&child));
        if !linked {
            return false;
        }
        let Some(c) = self.actor_mut(child) else {
            return false;
        };
        c.position = position;
        c.rotation = rotation;
        let colliders = c.colliders.clone();
        self.physics.set_local_pose(&colliders, pose(position, rotation));
        self.update_mass(parent);
        true
    }

    /// Detaches `child` from `parent` and makes it a root with its own body at a world pose.
    pub fn unlink_child(&mut self, parent: ActorId, child: ActorId, position: Vec3, rotation: Quat) -> Result<(), EngineError> {
        let mode = self
            .actor(parent)
            .map(|p| p.dynamics)
            .ok_or_else(|| Self::missing(parent))?;
        let c = self.actor(child).ok_or_else(|| Self::missing(child))?;
        let old_colliders = c.colliders.clone();
        let shape = c.shape.clone();

        self.physics.detach_colliders(&old_colliders);
        if let Some(p) = self.actor_mut(parent) {
            p.children.retain(|id| *id != child);
        }
        self.update_mass(parent);

        let body = self.physics.create_body(mode, position, rotation);
        let c = self.actors.get(child.0).ok_or_else(|| Self::missing(child))?;
        let params = AttachParams {
            name: &c.name,
            material: &c.material,
            group: c.effective_group(),
            sensor: c.volume_detect,
        };
        let gravity = c.material.gravity_multiplier;
        let colliders = match self.physics.attach_shape(body, &shape, Isometry3::identity(), params) {
            Ok(colliders) => colliders,
            Err(e) => {
                self.physics.remove_body(body);
                if let Some(c) = self.actor_mut(child) {
                    c.parent = None;
                    c.colliders.clear();
                }
                return Err(e);
            }
        };
        self.physics.set_gravity_scale(body, gravity);

        if let Some(c) = self.actor_mut(child) {
            c.parent = None;
            c.body = Some(body);
            c.colliders = colliders;
            c.position = position;
            c.rotation = rotation;
            c.dynamics = mode;
        }
        self.update_mass(child);
        self.stats.actors_added += 1;
        Ok(())
    }

    /// Removes an actor from the scene. Removing a root removes its children too.
    /// Returns every id that stopped resolving.
    pub fn remove_actor(&mut self, id: ActorId) -> Vec<ActorId> {
        let Some(actor) = self.actors.remove(id.0) else {
            return Vec::new();
        };
        let mut removed = vec![id];
        match (actor.body, actor.parent) {
            (Some(body), _) => {
                self.physics.remove_body(body);
                for child in actor.children {
                    if self.actors.remove(child.0).is_some() {
                        removed.push(child);
                    }
                }
            }
            (None, Some(parent)) => {
                self.physics.detach_colliders(&actor.colliders);
                if let Some(p) = self.actor_mut(parent) {
                    p.children.retain(|c| *c != id);
                }
                self.update_mass(parent);
            }
            (None, None) => {}
        }
        self.stats.actors_removed += removed.len() as u64;
        removed
    }

    /// Holds a dynamic body kinematic until `resume` is called.
    pub fn suspend(&mut self, root: ActorId) {
        let Some(actor) = self.actor(root) else {
            return;
        };
        if !actor.dynamics.is_physical() || actor.suspended {
            return;
        }
        let body = actor.body;
        let moving = body.and_then(|b| self.physics.velocities(b));
        if let Some(body) = body {
            self.physics.set_body_mode(body, DynamicsMode::Kinematic);
        }
        if let Some(a) = self.actor_mut(root) {
            a.suspended = true;
            if let Some((velocity, angular)) = moving {
                a.velocity = velocity;
                a.angular_velocity = angular;
            }
        }
    }

    /// Returns a suspended body to dynamic simulation with its stored velocities.
    pub fn resume(&mut self, root: ActorId) {
        let Some(actor) = self.actor(root) else {
            return;
        };
        if !actor.suspended {
            return;
        }
        let (velocity, angular) = (actor.velocity, actor.angular_velocity);
        // A postcheck may have demoted the body while it was held
        if let (true, Some(body)) = (actor.dynamics.is_physical(), actor.body) {
            self.physics.set_body_mode(body, DynamicsMode::Dynamic);
            self.physics.set_velocities(body, velocity, angular);
        }
        if let Some(a) = self.actor_mut(root) {
            a.suspended = false;
        }
    }

    /// Stores initial velocities and applies them to a running dynamic body.
    pub fn set_initial_velocities(&mut self, root: ActorId, velocity: Vec3, angular: Vec3) {
        let Some(a) = self.actor_mut(root) else {
            return;
        };
        a.velocity = velocity;
        a.angular_velocity = angular;
        let apply = a.dynamics.is_physical() && !a.suspended;
        if let (true, Some(body)) = (apply, a.body) {
            self.physics.set_velocities(body, velocity, angular);
        }
    }

    pub fn add_character(&mut self, spec: CharacterSpec) -> CharacterId {
        let (body, collider) = self
            .physics
            .add_character(spec.position, spec.rotation, spec.radius, spec.height);
        CharacterId(self.characters.insert(CharacterActor { spec, body, collider }))
    }

    pub fn remove_character(&mut self, id: CharacterId) -> bool {
        match self.characters.remove(id.0) {
            Some(character) => {
                self.physics.remove_body(character.body);
                true
            }
            None => false,
        }
    }
}
