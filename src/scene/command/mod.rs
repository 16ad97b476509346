//! Scene commands.
//!
//! Every mutation of the scene is a [`Command`]. Commands are built on
//! caller threads, queued through the scene handle, and executed on the
//! consumer thread. A command that needs shapes issues mesh requests from
//! its first stage and returns [`Progress::AwaitingMesh`]; the scheduler
//! keeps it until [`Command::deliver`] reports that every shape has
//! arrived, then runs it again to commit.

mod bulk_create;
mod change_shape;
mod character;
mod create;
mod link;
mod material;
mod physicality;
mod remesh;
mod remove;
mod suspend;
mod volume_detect;

pub use bulk_create::BulkCreateObject;
pub use change_shape::ChangeShape;
pub use character::{CreateCharacter, RemoveCharacter};
pub use create::CreateObject;
pub use link::{ChangeChildOffset, LinkChild, UnlinkChild};
pub use material::SetMaterial;
pub use physicality::SetPhysicality;
pub use remove::RemoveActor;
pub use suspend::SuspendResume;
pub use volume_detect::ChangeVolumeDetect;

use std::fmt;

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

use super::actor::{ActorId, PrimActor};
use super::latch::DelayCoordinator;
use super::meshing::{Branch, MeshReply, MeshRequest, MeshingService};
use super::scheduler::Inbound;
use super::shape::{PhysicsShape, Quat, Vec3};
use super::world::World;
use crate::error::{EngineError, SchedulerError};

/// Identifies a queued command for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandId(pub u64);

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmd#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    CreateObject,
    BulkCreateObject,
    CreateCharacter,
    RemoveCharacter,
    ChangeShape,
    SetPhysicality,
    ChangeVolumeDetect,
    SetMaterial,
    LinkChild,
    ChangeChildOffset,
    UnlinkChild,
    RemoveActor,
    SuspendResume,
}

/// Actors a command must have exclusive access to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    None,
    Single(ActorId),
    Multi(Vec<ActorId>),
}

impl Targets {
    pub fn as_slice(&self) -> &[ActorId] {
        match self {
            Targets::None => &[],
            Targets::Single(id) => std::slice::from_ref(id),
            Targets::Multi(ids) => ids,
        }
    }

    pub fn affects_multiple_prims(&self) -> bool {
        matches!(self, Targets::Multi(_))
    }

    pub fn target_prim(&self) -> Option<ActorId> {
        match self {
            Targets::Single(id) => Some(*id),
            _ => None,
        }
    }

    pub fn target_prims(&self) -> &[ActorId] {
        match self {
            Targets::Multi(ids) => ids,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The command is finished and can be dropped
    Completed,
    /// Waiting for mesh results; resume once `deliver` reports ready
    AwaitingMesh,
}

pub trait Command: Send + 'static {
    fn kind(&self) -> CommandKind;

    /// Actors this command needs, resolved against the current actor graph.
    fn targets(&self, world: &World) -> Targets;

    /// A newer cullable command may replace an older equivalent one while both wait on a latch.
    fn is_cullable(&self) -> bool {
        false
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Progress;

    /// Deposits a mesh result. Returns true once every outstanding shape has arrived.
    fn deliver(&mut self, branch: Branch, shape: PhysicsShape) -> bool {
        let _ = shape;
        log::warn!("[{:?}] unexpected mesh result for branch {}", self.kind(), branch.0);
        false
    }
}

/// Mutable view of the scene handed to a command while it executes.
pub struct ExecContext<'a> {
    pub(crate) world: &'a mut World,
    pub(crate) latches: &'a mut DelayCoordinator,
    pub(crate) mesher: &'a dyn MeshingService,
    pub(crate) inbound: &'a Sender<Inbound>,
    pub(crate) command: CommandId,
    pub(crate) lod: f32,
}

impl ExecContext<'_> {
    pub fn command_id(&self) -> CommandId {
        self.command
    }

    pub fn world(&self) -> &World {
        &*self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut *self.world
    }

    /// Builds a mesh request for an actor's current geometry.
    pub fn mesh_request_for(&self, actor: &PrimActor, physical: bool) -> MeshRequest {
        MeshRequest {
            name: actor.name.clone(),
            geometry: actor.geometry.clone(),
            size: actor.size,
            lod: self.lod,
            wants_physical: physical,
            precomputed: None,
            region_crossing: false,
        }
    }

    pub fn lod(&self) -> f32 {
        self.lod
    }

    pub fn request_mesh(&mut self, branch: Branch, request: MeshRequest) {
        self.world.stats.mesh_requests += 1;
        let reply = MeshReply::new(self.command, branch, self.inbound.clone());
        self.mesher.request_mesh(request, reply);
    }

    /// Latches `actors` for the executing command.
    pub fn begin_delay(&mut self, actors: &[ActorId]) -> Vec<ActorId> {
        self.latches.begin_delay(self.command, actors)
    }

    pub fn end_delay(&mut self, actors: &[ActorId]) {
        self.latches.end_delay(self.command, actors);
    }

    /// Removes an actor (and its children) and releases their latches.
    pub fn remove_actor(&mut self, id: ActorId) -> Vec<ActorId> {
        let removed = self.world.remove_actor(id);
        for actor in &removed {
            self.latches.release_actor(*actor);
        }
        removed
    }

    /// Logs an engine failure and removes the affected actor.
    pub fn engine_failure(&mut self, component: &str, actor: ActorId, err: EngineError) {
        self.world.stats.engine_failures += 1;
        log::error!("[{}] engine failure on {}: {}", component, actor, err);
        if self.remove_actor(actor).is_empty() {
            log::error!("[{}] recovery could not remove {}", component, actor);
        }
    }
}

pub(crate) fn check_finite(what: &str, values: &[f32]) -> Result<(), SchedulerError> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(SchedulerError::InvalidArgument(format!("{} must be finite", what)))
    }
}

pub(crate) fn check_pose(position: Vec3, rotation: Quat) -> Result<(), SchedulerError> {
    check_finite("position", &position)?;
    check_finite("rotation", &rotation)
}

pub(crate) fn check_size(size: Vec3) -> Result<(), SchedulerError> {
    check_finite("size", &size)?;
    if size.iter().any(|s| *s <= 0.0) {
        return Err(SchedulerError::InvalidArgument("size must be positive".to_string()));
    }
    Ok(())
}

pub(crate) fn check_distinct(parent: ActorId, child: ActorId) -> Result<(), SchedulerError> {
    if parent == child {
        return Err(SchedulerError::InvalidArgument(format!(
            "{} cannot be its own parent",
            child
        )));
    }
    Ok(())
}
