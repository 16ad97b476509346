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

/// Turns a body into a trigger volume or back. A volume-detect body is
/// never dynamic, so enabling it rebuilds a dynamic body as kinematic.
pub struct ChangeVolumeDetect {
    actor: ActorId,
    volume_detect: bool,
    root: ActorId,
    was_physical: bool,
    stage: Stage,
    latched: Vec<ActorId>,
}

impl ChangeVolumeDetect {
    pub fn new(actor: ActorId, volume_detect: bool) -> Self {
        Self {
            actor,
            volume_detect,
            root: actor,
            was_physical: false,
            stage: Stage::Pending,
            latched: Vec::new(),
        }
    }

    fn physical_after(&self) -> bool {
        !self.volume_detect && self.was_physical
    }

    fn request(&mut self, ctx: &mut ExecContext<'_>) -> Progress {
        self.root = ctx.world().root_of(self.actor);
        let Some(root) = ctx.world().actor(self.root) else {
            log::trace!("[ChangeVolumeDetect] {} is gone", self.actor);
            return Progress::Completed;
        };
        if root.is_volume_detect() == self.volume_detect {
            return Progress::Completed;
        }
        self.was_physical = root.is_physical();

        let targets = ctx.world().composing_prims(self.root);
        self.latched = ctx.begin_delay(&targets);
        match BodyRemesh::start(ctx, self.root, self.physical_after()) {
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
        let physical = self.physical_after();
        let world = ctx.world_mut();
        if world.is_disposed(self.root) {
            log::trace!("[ChangeVolumeDetect] {} is gone", self.root);
            return;
        }
        let root_shape = remesh.root_shape();
        if self.was_physical && physical {
            if let Err(reason) = world.dynamics_precheck(self.root, &root_shape, remesh.child_shapes()) {
                log::warn!("[ChangeVolumeDetect] {} cannot stay physical: {}", self.root, reason);
                world.stats.rejected_transitions += 1;
                return;
            }
        }
        let result = world
            .rebuild_with_new_shape(self.root, root_shape, Some(remesh.child_shapes()), physical)
            .and_then(|()| world.set_volume_detect(self.root, self.volume_detect));
        if let Err(e) = result {
            ctx.engine_failure("ChangeVolumeDetect", self.root, e);
        }
    }

    fn release(&mut self, ctx: &mut ExecContext<'_>) {
        let latched = std::mem::take(&mut self.latched);
        ctx.end_delay(&latched);
    }
}

impl Command for ChangeVolumeDetect {
    fn kind(&self) -> CommandKind {
        CommandKind::ChangeVolumeDetect
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
                log::warn!("[ChangeVolumeDetect] {} resumed in stage {:?}", self.actor, stage);
                self.release(ctx);
                Progress::Completed
            }
        }
    }

    fn deliver(&mut self, branch: Branch, shape: PhysicsShape) -> bool {
        let Stage::Remeshing(remesh) = &mut self.stage else {
            log::warn!("[ChangeVolumeDetect] unexpected mesh result for {}", self.actor);
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
