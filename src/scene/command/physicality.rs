use super::remesh::BodyRemesh;
use super::{Command, CommandKind, ExecContext, Progress, Targets};
use crate::scene::actor::ActorId;
use crate::scene::meshing::Branch;
use crate::scene::shape::PhysicsShape;
use crate::scene::world::World;

#[derive(Debug)]
enum Stage {
    Pending,
    Remeshing(BodyRemesh),
    Ready(BodyRemesh),
    Committed,
}

/// Switches a whole body between dynamic and non-dynamic simulation.
///
/// Every prim of the body is remeshed for the new mode. Becoming dynamic
/// is refused, leaving the body untouched, when the new shapes are too
/// complex or have no usable mass.
pub struct SetPhysicality {
    actor: ActorId,
    physical: bool,
    root: ActorId,
    stage: Stage,
    latched: Vec<ActorId>,
}

impl SetPhysicality {
    pub fn new(actor: ActorId, physical: bool) -> Self {
        Self {
            actor,
            physical,
            root: actor,
            stage: Stage::Pending,
            latched: Vec::new(),
        }
    }

    fn request(&mut self, ctx: &mut ExecContext<'_>) -> Progress {
        self.root = ctx.world().root_of(self.actor);
        let Some(root) = ctx.world().actor(self.root) else {
            log::trace!("[SetPhysicality] {} is gone", self.actor);
            return Progress::Completed;
        };
        if root.is_physical() == self.physical {
            log::trace!("[SetPhysicality] {} already in requested mode", self.root);
            return Progress::Completed;
        }
        if self.physical && root.is_volume_detect() {
            log::warn!("[SetPhysicality] {} is volume detect and cannot become physical", self.root);
            ctx.world_mut().stats.rejected_transitions += 1;
            return Progress::Completed;
        }

        let targets = ctx.world().composing_prims(self.root);
        self.latched = ctx.begin_delay(&targets);
        match BodyRemesh::start(ctx, self.root, self.physical) {
            Some(remesh) => {
                self.stage = Stage::Remeshing(remesh);
                Progress::AwaitingMesh
            }
            None => {
                self.release(ctx);
                Progress::Completed
            }
        }
    }

    fn commit(&mut self, ctx: &mut ExecContext<'_>, remesh: BodyRemesh) {
        let world = ctx.world_mut();
        if world.is_disposed(self.root) {
            log::trace!("[SetPhysicality] {} is gone", self.root);
            return;
        }
        let root_shape = remesh.root_shape();
        if self.physical {
            if let Err(reason) = world.dynamics_precheck(self.root, &root_shape, remesh.child_shapes()) {
                log::warn!("[SetPhysicality] {} cannot become physical: {}", self.root, reason);
                world.stats.rejected_transitions += 1;
                return;
            }
        }
        match world.rebuild_with_new_shape(self.root, root_shape, Some(remesh.child_shapes()), self.physical) {
            Ok(()) if self.physical => world.dynamics_postcheck(self.root),
            Ok(()) => {}
            Err(e) => ctx.engine_failure("SetPhysicality", self.root, e),
        }
    }

    fn release(&mut self, ctx: &mut ExecContext<'_>) {
        let latched = std::mem::take(&mut self.latched);
        ctx.end_delay(&latched);
    }
}

impl Command for SetPhysicality {
    fn kind(&self) -> CommandKind {
        CommandKind::SetPhysicality
    }

    fn targets(&self, world: &World) -> Targets {
        Targets::Multi(world.composing_prims(world.root_of(self.actor)))
    }

    fn is_cullable(&self) -> bool {
        true
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Progress {
        match std::mem::replace(&mut self.stage, Stage::Committed) {
            Stage::Pending => self.request(ctx),
            Stage::Ready(remesh) => {
                self.commit(ctx, remesh);
                self.release(ctx);
                Progress::Completed
            }
            stage => {
                log::warn!("[SetPhysicality] {} resumed in stage {:?}", self.actor, stage);
                self.release(ctx);
                Progress::Completed
            }
        }
    }

    fn deliver(&mut self, branch: Branch, shape: PhysicsShape) -> bool {
        let Stage::Remeshing(remesh) = &mut self.stage else {
            log::warn!("[SetPhysicality] unexpected mesh result for {}", self.actor);
            return false;
        };
        if !remesh.deliver(branch, shape) {
            return false;
        }
        if let Stage::Remeshing(remesh) = std::mem::replace(&mut self.stage, Stage::Committed) {
            self.stage = Stage::Ready(remesh);
        }
        true
    }
}
