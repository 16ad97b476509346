use super::{check_finite, check_pose, Command, CommandKind, ExecContext, Progress, Targets};
use crate::error::SchedulerError;
use crate::scene::actor::{CharacterId, CharacterSpec};
use crate::scene::completion::{Completion, CompletionHandle};
use crate::scene::world::World;

/// Adds an avatar capsule. Needs no meshing, so it runs in one step.
pub struct CreateCharacter {
    spec: CharacterSpec,
    completion: Completion<CharacterId>,
}

impl CreateCharacter {
    pub fn new(spec: CharacterSpec) -> Result<(Self, CompletionHandle<CharacterId>), SchedulerError> {
        check_pose(spec.position, spec.rotation)?;
        check_finite("velocity", &spec.velocity)?;
        if !(spec.radius > 0.0 && spec.height > 0.0) {
            return Err(SchedulerError::InvalidArgument(format!(
                "character needs a positive radius and height, got {} and {}",
                spec.radius, spec.height
            )));
        }
        let (completion, handle) = Completion::channel();
        Ok((Self { spec, completion }, handle))
    }
}

impl Command for CreateCharacter {
    fn kind(&self) -> CommandKind {
        CommandKind::CreateCharacter
    }

    fn targets(&self, _world: &World) -> Targets {
        Targets::None
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Progress {
        let id = ctx.world_mut().add_character(self.spec.clone());
        self.completion.signal(id);
        Progress::Completed
    }
}

pub struct RemoveCharacter {
    character: CharacterId,
}

impl RemoveCharacter {
    pub fn new(character: CharacterId) -> Self {
        Self { character }
    }
}

impl Command for RemoveCharacter {
    fn kind(&self) -> CommandKind {
        CommandKind::RemoveCharacter
    }

    fn targets(&self, _world: &World) -> Targets {
        Targets::None
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Progress {
        if !ctx.world_mut().remove_character(self.character) {
            log::trace!("[RemoveCharacter] {} is gone", self.character);
        }
        Progress::Completed
    }
}
