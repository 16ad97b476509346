use super::{Command, CommandKind, ExecContext, Progress, Targets};
use crate::scene::actor::ActorId;
use crate::scene::material::MaterialSpec;
use crate::scene::world::World;

/// Assigns a material to one prim, or to every prim of its body.
pub struct SetMaterial {
    actor: ActorId,
    material: MaterialSpec,
    whole_object: bool,
}

impl SetMaterial {
    pub fn new(actor: ActorId, material: MaterialSpec, whole_object: bool) -> Self {
        Self {
            actor,
            material,
            whole_object,
        }
    }
}

impl Command for SetMaterial {
    fn kind(&self) -> CommandKind {
        CommandKind::SetMaterial
    }

    fn targets(&self, _world: &World) -> Targets {
        Targets::Single(self.actor)
    }

    fn is_cullable(&self) -> bool {
        true
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Progress {
        let world = ctx.world_mut();
        let Some(actor) = world.actor(self.actor) else {
            log::trace!("[SetMaterial] {} is gone", self.actor);
            return Progress::Completed;
        };
        let material = self.material.resolve(actor.material());
        world.set_material(self.actor, material, self.whole_object);
        Progress::Completed
    }
}
