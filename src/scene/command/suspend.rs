use super::{Command, CommandKind, ExecContext, Progress, Targets};
use crate::scene::actor::ActorId;
use crate::scene::world::World;

/// Holds a dynamic body still, or lets it move again with the velocities it had.
pub struct SuspendResume {
    actor: ActorId,
    suspend: bool,
}

impl SuspendResume {
    pub fn suspend(actor: ActorId) -> Self {
        Self { actor, suspend: true }
    }

    pub fn resume(actor: ActorId) -> Self {
        Self { actor, suspend: false }
    }
}

impl Command for SuspendResume {
    fn kind(&self) -> CommandKind {
        CommandKind::SuspendResume
    }

    fn targets(&self, world: &World) -> Targets {
        Targets::Single(world.root_of(self.actor))
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Progress {
        let world = ctx.world_mut();
        if world.is_disposed(self.actor) {
            log::trace!("[SuspendResume] {} is gone", self.actor);
            return Progress::Completed;
        }
        let root = world.root_of(self.actor);
        if self.suspend {
            world.suspend(root);
        } else {
            world.resume(root);
        }
        Progress::Completed
    }
}
