//! Caller-facing side of the scene.
//!
//! A `SceneHandle` is cheap to clone and may be used from any thread.
//! Every method only validates its arguments and queues a command; the
//! work happens later on the consumer thread. Creation methods return a
//! [`CompletionHandle`] to wait on, everything else is fire-and-forget.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;

use super::actor::{ActorId, AddPrimFlags, CharacterId, CharacterSpec, PrimShapeData};
use super::command::{
    BulkCreateObject, ChangeChildOffset, ChangeShape, ChangeVolumeDetect, Command, CommandId, CreateCharacter,
    CreateObject, LinkChild, RemoveActor, RemoveCharacter, SetMaterial, SetPhysicality, SuspendResume, UnlinkChild,
};
use super::completion::CompletionHandle;
use super::material::MaterialSpec;
use super::scheduler::Inbound;
use super::shape::{GeometryDesc, Quat, Vec3};
use crate::error::SchedulerError;

#[derive(Clone)]
pub struct SceneHandle {
    tx: Sender<Inbound>,
    next_id: Arc<AtomicU64>,
}

impl SceneHandle {
    pub(crate) fn new(tx: Sender<Inbound>, next_id: Arc<AtomicU64>) -> Self {
        Self { tx, next_id }
    }

    /// Queues any command. Fails only when the scene has shut down.
    pub fn queue_command<C: Command>(&self, command: C) -> Result<CommandId, SchedulerError> {
        self.queue_boxed(Box::new(command))
    }

    pub fn queue_boxed(&self, command: Box<dyn Command>) -> Result<CommandId, SchedulerError> {
        let id = CommandId(self.next_id.fetch_add(1, Ordering::Relaxed));
        log::trace!("[SceneHandle] queue {} ({:?})", id, command.kind());
        self.tx
            .send(Inbound::Command(id, command))
            .map_err(|_| SchedulerError::Disconnected)?;
        Ok(id)
    }

    pub fn add_prim_shape(
        &self,
        data: PrimShapeData,
        flags: AddPrimFlags,
    ) -> Result<CompletionHandle<ActorId>, SchedulerError> {
        let (command, handle) = CreateObject::new(data, flags)?;
        self.queue_command(command)?;
        Ok(handle)
    }

    /// Creates a prim directly inside `parent`'s body. Position and
    /// rotation in `data` are local to the parent.
    pub fn add_child_prim(
        &self,
        parent: ActorId,
        data: PrimShapeData,
        flags: AddPrimFlags,
    ) -> Result<CompletionHandle<ActorId>, SchedulerError> {
        let (command, handle) = CreateObject::child_of(parent, data, flags)?;
        self.queue_command(command)?;
        Ok(handle)
    }

    /// Creates a linked set; the first shape becomes the root.
    pub fn bulk_add_prim_shapes(
        &self,
        shapes: Vec<PrimShapeData>,
        flags: AddPrimFlags,
    ) -> Result<CompletionHandle<Vec<ActorId>>, SchedulerError> {
        let (command, handle) = BulkCreateObject::new(shapes, flags)?;
        self.queue_command(command)?;
        Ok(handle)
    }

    pub fn add_character(&self, spec: CharacterSpec) -> Result<CompletionHandle<CharacterId>, SchedulerError> {
        let (command, handle) = CreateCharacter::new(spec)?;
        self.queue_command(command)?;
        Ok(handle)
    }

    pub fn set_physical(&self, actor: ActorId, physical: bool) -> Result<CommandId, SchedulerError> {
        self.queue_command(SetPhysicality::new(actor, physical))
    }

    pub fn change_shape(&self, actor: ActorId, geometry: GeometryDesc, size: Vec3) -> Result<CommandId, SchedulerError> {
        self.queue_command(ChangeShape::new(actor, geometry, size)?)
    }

    pub fn set_volume_detect(&self, actor: ActorId, volume_detect: bool) -> Result<CommandId, SchedulerError> {
        self.queue_command(ChangeVolumeDetect::new(actor, volume_detect))
    }

    pub fn set_material(
        &self,
        actor: ActorId,
        material: MaterialSpec,
        whole_object: bool,
    ) -> Result<CommandId, SchedulerError> {
        self.queue_command(SetMaterial::new(actor, material, whole_object))
    }

    pub fn link(&self, parent: ActorId, child: ActorId, position: Vec3, rotation: Quat) -> Result<CommandId, SchedulerError> {
        self.queue_command(LinkChild::new(parent, child, position, rotation)?)
    }

    pub fn set_child_offset(
        &self,
        parent: ActorId,
        child: ActorId,
        position: Vec3,
        rotation: Quat,
    ) -> Result<CommandId, SchedulerError> {
        self.queue_command(ChangeChildOffset::new(parent, child, position, rotation)?)
    }

    /// Detaches `child` from `parent`, leaving it at a world pose.
    pub fn unlink(&self, parent: ActorId, child: ActorId, position: Vec3, rotation: Quat) -> Result<CommandId, SchedulerError> {
        self.queue_command(UnlinkChild::new(parent, child, position, rotation)?)
    }

    /// Holds `actor`'s body kinematic until [`SceneHandle::resume`].
    pub fn suspend(&self, actor: ActorId) -> Result<CommandId, SchedulerError> {
        self.queue_command(SuspendResume::suspend(actor))
    }

    pub fn resume(&self, actor: ActorId) -> Result<CommandId, SchedulerError> {
        self.queue_command(SuspendResume::resume(actor))
    }

    pub fn remove_prim(&self, actor: ActorId) -> Result<CommandId, SchedulerError> {
        self.queue_command(RemoveActor::new(actor))
    }

    pub fn remove_character(&self, character: CharacterId) -> Result<CommandId, SchedulerError> {
        self.queue_command(RemoveCharacter::new(character))
    }
}
