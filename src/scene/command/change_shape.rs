use super::{check_size, Command, CommandKind, ExecContext, Progress, Targets};
use crate::error::SchedulerError;
use crate::scene::actor::ActorId;
use crate::scene::meshing::Branch;
use crate::scene::shape::{GeometryDesc, PhysicsShape, Vec3};
use crate::scene::world::World;

#[derive(Debug)]
enum Stage {
    Pending,
    AwaitingMesh,
    Ready(PhysicsShape),
    Committed,
}

/// Replaces the geometry of one prim.
///
/// Geometry that produces no collision shape is coerced to a default shape
/// on a root, which must always have one. On a child it simply detaches
/// the child's collision geometry.
pub struct ChangeShape {
    actor: ActorId,
    geometry: GeometryDesc,
    size: Vec3,
    stage: Stage,
    latched: Vec<ActorId>,
}

impl ChangeShape {
    pub fn new(actor: ActorId, geometry: GeometryDesc, size: Vec3) -> Result<Self, SchedulerError> {
        check_size(size)?;
        Ok(Self {
            actor,
            geometry,
            size,
            stage: Stage::Pending,
            latched: Vec::new(),
        })
    }

    fn request(&mut self, ctx: &mut ExecContext<'_>) -> Progress {
        let Some(actor) = ctx.world().actor(self.actor) else {
            log::trace!("[ChangeShape] {} is gone", self.actor);
            return Progress::Completed;
        };
        let parent = actor.parent();

        if self.geometry.is_degenerate() {
            match parent {
                Some(parent) => {
                    self.detach_child(ctx, parent);
                    return Progress::Completed;
                }
                None => {
                    log::debug!("[ChangeShape] {} root geometry has no shape, using default", self.actor);
                    self.geometry = self.geometry.coerced();
                }
            }
        }

        let physical = ctx
            .world()
            .actor(ctx.world().root_of(self.actor))
            .is_some_and(|root| root.is_physical());
        let targets = ctx.world().composing_prims(self.actor);
        self.latched = ctx.begin_delay(&targets);

        let Some(actor) = ctx.world().actor(self.actor) else {
            return Progress::Completed;
        };
        let mut request = ctx.mesh_request_for(actor, physical);
        request.geometry = self.geometry.clone();
        request.size = self.size;
        ctx.request_mesh(Branch(0), request);
        self.stage = Stage::AwaitingMesh;
        Progress::AwaitingMesh
    }

    fn detach_child(&mut self, ctx: &mut ExecContext<'_>, parent: ActorId) {
        let world = ctx.world_mut();
        if let Some(actor) = world.actor_mut(self.actor) {
            actor.geometry = self.geometry.clone();
            actor.size = self.size;
        }
        if let Err(e) = world.replace_child_shape(parent, self.actor, PhysicsShape::null()) {
            ctx.engine_failure("ChangeShape", self.actor, e);
        }
    }

    fn commit(&mut self, ctx: &mut ExecContext<'_>, shape: PhysicsShape) {
        let world = ctx.world_mut();
        let Some(actor) = world.actor_mut(self.actor) else {
            log::trace!("[ChangeShape] {} is gone", self.actor);
            return;
        };
        actor.geometry = self.geometry.clone();
        actor.size = self.size;
        let is_root = actor.is_root();
        let physical = actor.is_physical();

        match world.rebuild_with_new_shape(self.actor, shape, None, physical) {
            Ok(()) if is_root => world.dynamics_postcheck(self.actor),
            Ok(()) => {}
            Err(e) => ctx.engine_failure("ChangeShape", self.actor, e),
        }
    }
}

impl Command for ChangeShape {
    fn kind(&self) -> CommandKind {
        CommandKind::ChangeShape
    }

    fn targets(&self, world: &World) -> Targets {
        Targets::Multi(world.composing_prims(self.actor))
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
                log::warn!("[ChangeShape] {} resumed in stage {:?}", self.actor, stage);
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
                log::warn!("[ChangeShape] unexpected mesh result for {}", self.actor);
                false
            }
        }
    }
}
