use super::{check_pose, check_size, Command, CommandKind, ExecContext, Progress, Targets};
use crate::error::SchedulerError;
use crate::scene::actor::{ActorId, AddPrimFlags, PrimActor, PrimShapeData};
use crate::scene::completion::{Completion, CompletionHandle};
use crate::scene::meshing::{Branch, MeshRequest};
use crate::scene::shape::PhysicsShape;
use crate::scene::world::World;

#[derive(Debug)]
enum Stage {
    Pending,
    AwaitingMesh,
    Ready(PhysicsShape),
    Committed,
}

/// Creates one prim, either as a new root body or as a child of an existing one.
pub struct CreateObject {
    data: PrimShapeData,
    flags: AddPrimFlags,
    /// Child position and rotation in `data` are local to this parent
    parent: Option<ActorId>,
    stage: Stage,
    latched: Vec<ActorId>,
    completion: Completion<ActorId>,
}

impl CreateObject {
    pub fn new(data: PrimShapeData, flags: AddPrimFlags) -> Result<(Self, CompletionHandle<ActorId>), SchedulerError> {
        Self::build(data, flags, None)
    }

    pub fn child_of(
        parent: ActorId,
        data: PrimShapeData,
        flags: AddPrimFlags,
    ) -> Result<(Self, CompletionHandle<ActorId>), SchedulerError> {
        Self::build(data, flags, Some(parent))
    }

    fn build(
        data: PrimShapeData,
        flags: AddPrimFlags,
        parent: Option<ActorId>,
    ) -> Result<(Self, CompletionHandle<ActorId>), SchedulerError> {
        check_pose(data.position, data.rotation)?;
        check_size(data.size)?;
        let (completion, handle) = Completion::channel();
        let command = Self {
            data,
            flags,
            parent,
            stage: Stage::Pending,
            latched: Vec::new(),
            completion,
        };
        Ok((command, handle))
    }

    fn request(&mut self, ctx: &mut ExecContext<'_>) -> Progress {
        let physical = match self.parent {
            Some(parent) => {
                let Some(p) = ctx.world().actor(parent) else {
                    log::trace!("[CreateObject] parent {} is gone", parent);
                    return Progress::Completed;
                };
                p.is_physical()
            }
            None => self.flags.physical && !self.data.volume_detect,
        };
        if let Some(parent) = self.parent {
            self.latched = ctx.begin_delay(&[parent]);
        }

        let request = MeshRequest {
            name: self.data.name.clone(),
            geometry: self.data.geometry.clone(),
            size: self.data.size,
            lod: ctx.lod(),
            wants_physical: physical,
            precomputed: self.data.precomputed.take(),
            region_crossing: self.flags.from_crossing,
        };
        ctx.request_mesh(Branch(0), request);
        self.stage = Stage::AwaitingMesh;
        Progress::AwaitingMesh
    }

    fn commit(&mut self, ctx: &mut ExecContext<'_>, shape: PhysicsShape) {
        let id = match self.parent {
            None => {
                let mut actor = PrimActor::from_data(&self.data, &self.flags);
                if self.data.volume_detect {
                    actor.volume_detect = true;
                    actor.dynamics = actor.dynamics.toggled(false);
                }
                match ctx.world_mut().add_actor_to_scene(actor, shape) {
                    Ok(id) => id,
                    Err(e) => {
                        ctx.world_mut().stats.engine_failures += 1;
                        log::error!("[CreateObject] could not add {}: {}", self.data.name, e);
                        return;
                    }
                }
            }
            Some(parent) => {
                if ctx.world().is_disposed(parent) {
                    log::trace!("[CreateObject] parent {} is gone", parent);
                    return;
                }
                let actor = PrimActor::from_data(&self.data, &self.flags);
                match ctx.world_mut().add_child_to_scene(parent, actor, shape, false) {
                    Ok(id) => id,
                    Err(e) => {
                        ctx.world_mut().stats.engine_failures += 1;
                        log::error!("[CreateObject] could not link {} to {}: {}", self.data.name, parent, e);
                        return;
                    }
                }
            }
        };

        if self.parent.is_none() {
            settle_new_body(ctx.world_mut(), id, &self.data, &self.flags);
        }
        self.completion.signal(id);
    }
}

/// Applies the creation flags that only make sense once the body exists.
pub(super) fn settle_new_body(world: &mut World, root: ActorId, data: &PrimShapeData, flags: &AddPrimFlags) {
    if flags.start_suspended {
        world.suspend(root);
    }
    world.dynamics_postcheck(root);
    world.set_initial_velocities(root, data.velocity, data.angular_velocity);
    if flags.interpolate {
        world.suspend(root);
        world.resume(root);
    }
}

impl Command for CreateObject {
    fn kind(&self) -> CommandKind {
        CommandKind::CreateObject
    }

    fn targets(&self, _world: &World) -> Targets {
        match self.parent {
            Some(parent) => Targets::Single(parent),
            None => Targets::None,
        }
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Progress {
        match std::mem::replace(&mut self.stage, Stage::Committed) {
            Stage::Pending => self.request(ctx),
            Stage::Ready(shape) => {
                self.commit(ctx, shape);
                let latched = std::mem::take(&mut self.latched);
                ctx.end_delay(&latched);
                Progress::Completed
            }
            stage => {
                log::warn!("[CreateObject] {} resumed in stage {:?}", self.data.name, stage);
                let latched = std::mem::take(&mut self.latched);
                ctx.end_delay(&latched);
                Progress::Completed
            }
        }
    }

    fn deliver(&mut self, branch: Branch, shape: PhysicsShape) -> bool {
        match self.stage {
            Stage::AwaitingMesh if branch.0 == 0 => {
                self.stage = Stage::Ready(shape);
                true
            }
            _ => {
                log::warn!("[CreateObject] unexpected mesh result for {}", self.data.name);
                false
            }
        }
    }
}
