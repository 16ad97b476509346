use super::{Command, CommandKind, ExecContext, Progress, Targets};
use crate::scene::actor::ActorId;
use crate::scene::world::World;

/// Removes a prim. A root takes its children with it.
pub struct RemoveActor {
    actor: ActorId,
}

impl RemoveActor {
    pub fn new(actor: ActorId) -> Self {
        Self { actor }
    }
}

impl Command for RemoveActor {
    fn kind(&self) -> CommandKind {
        CommandKind::RemoveActor
    }

    fn targets(&self, _world: &World) -> Targets {
        Targets::Single(self.actor)
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Progress {
        let removed = ctx.remove_actor(self.actor);
        if removed.is_empty() {
            log::trace!("[RemoveActor] {} is gone", self.actor);
        } else {
            log::debug!("[RemoveActor] removed {:?}", removed);
        }
        Progress::Completed
    }
}
