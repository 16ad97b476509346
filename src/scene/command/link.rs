use super::{check_distinct, check_pose, Command, CommandKind, ExecContext, Progress, Targets};
use crate::error::SchedulerError;
use crate::scene::actor::ActorId;
use crate::scene::meshing::Branch;
use crate::scene::shape::{PhysicsShape, Quat, Vec3};
use crate::scene::world::World;

#[derive(Debug)]
enum Stage {
    Pending,
    AwaitingMesh,
    Ready(PhysicsShape),
    Committed,
}

/// Attaches `child` (and anything linked to it) to `parent`'s body at a
/// local pose. The child is remeshed for the parent's dynamics first.
pub struct LinkChild {
    parent: ActorId,
    child: ActorId,
    position: Vec3,
    rotation: Quat,
    stage: Stage,
    latched: Vec<ActorId>,
}

impl LinkChild {
    pub fn new(parent: ActorId, child: ActorId, position: Vec3, rotation: Quat) -> Result<Self, SchedulerError> {
        check_distinct(parent, child)?;
        check_pose(position, rotation)?;
        Ok(Self {
            parent,
            child,
            position,
            rotation,
            stage: Stage::Pending,
            latched: Vec::new(),
        })
    }

    fn request(&mut self, ctx: &mut ExecContext<'_>) -> Progress {
        let world = ctx.world();
        let (Some(parent), Some(child)) = (world.actor(self.parent), world.actor(self.child)) else {
            log::trace!("[LinkChild] {} or {} is gone", self.parent, self.child);
            return Progress::Completed;
        };
        if !parent.is_root() {
            log::warn!("[LinkChild] {} is not a root and cannot take children", self.parent);
            return Progress::Completed;
        }
        if child.parent() == Some(self.parent) {
            log::trace!("[LinkChild] {} already linked to {}", self.child, self.parent);
            return Progress::Completed;
        }
        let physical = parent.is_physical();
        let request = ctx.mesh_request_for(child, physical);

        let targets = self.targets(ctx.world());
        self.latched = ctx.begin_delay(targets.as_slice());
        ctx.request_mesh(Branch(0), request);
        self.stage = Stage::AwaitingMesh;
        Progress::AwaitingMesh
    }

    fn commit(&mut self, ctx: &mut ExecContext<'_>, shape: PhysicsShape) {
        let world = ctx.world_mut();
        let parent_is_root = world.actor(self.parent).is_some_and(|p| p.is_root());
        if !parent_is_root || world.is_disposed(self.child) {
            log::trace!("[LinkChild] {} or {} changed while meshing", self.parent, self.child);
            return;
        }
        match world.link_child(self.parent, self.child, shape, self.position, self.rotation, false) {
            Ok(()) => world.dynamics_postcheck(self.parent),
            Err(e) => ctx.engine_failure("LinkChild", self.child, e),
        }
    }
}

impl Command for LinkChild {
    fn kind(&self) -> CommandKind {
        CommandKind::LinkChild
    }

    fn targets(&self, world: &World) -> Targets {
        let mut targets = vec![self.parent, self.child];
        if let Some(child) = world.actor(self.child) {
            targets.extend(child.children().iter().copied());
        }
        Targets::Multi(targets)
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
                log::warn!("[LinkChild] {} resumed in stage {:?}", self.child, stage);
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
                log::warn!("[LinkChild] unexpected mesh result for {}", self.child);
                false
            }
        }
    }
}

/// Moves a linked child to a new pose relative to its parent.
pub struct ChangeChildOffset {
    parent: ActorId,
    child: ActorId,
    position: Vec3,
    rotation: Quat,
}

impl ChangeChildOffset {
    pub fn new(parent: ActorId, child: ActorId, position: Vec3, rotation: Quat) -> Result<Self, SchedulerError> {
        check_distinct(parent, child)?;
        check_pose(position, rotation)?;
        Ok(Self {
            parent,
            child,
            position,
            rotation,
        })
    }
}

impl Command for ChangeChildOffset {
    fn kind(&self) -> CommandKind {
        CommandKind::ChangeChildOffset
    }

    fn targets(&self, _world: &World) -> Targets {
        Targets::Multi(vec![self.parent, self.child])
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Progress {
        if !ctx
            .world_mut()
            .set_child_offset(self.parent, self.child, self.position, self.rotation)
        {
            log::trace!("[ChangeChildOffset] {} is not linked to {}", self.child, self.parent);
        }
        Progress::Completed
    }
}

/// Detaches a child and gives it its own body at a world pose.
///
/// The parent is captured when the command is built; if the child has
/// since been re-linked elsewhere the command does nothing.
pub struct UnlinkChild {
    parent: ActorId,
    child: ActorId,
    position: Vec3,
    rotation: Quat,
}

impl UnlinkChild {
    pub fn new(parent: ActorId, child: ActorId, position: Vec3, rotation: Quat) -> Result<Self, SchedulerError> {
        check_distinct(parent, child)?;
        check_pose(position, rotation)?;
        Ok(Self {
            parent,
            child,
            position,
            rotation,
        })
    }
}

impl Command for UnlinkChild {
    fn kind(&self) -> CommandKind {
        CommandKind::UnlinkChild
    }

    fn targets(&self, _world: &World) -> Targets {
        Targets::Multi(vec![self.child, self.parent])
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Progress {
        let world = ctx.world_mut();
        let linked = !world.is_disposed(self.parent)
            && world.actor(self.child).is_some_and(|c| c.parent() == Some(self.parent));
        if !linked {
            log::trace!("[UnlinkChild] {} is not linked to {}", self.child, self.parent);
            return Progress::Completed;
        }
        match world.unlink_child(self.parent, self.child, self.position, self.rotation) {
            Ok(()) => world.dynamics_postcheck(self.child),
            Err(e) => ctx.engine_failure("UnlinkChild", self.child, e),
        }
        Progress::Completed
    }
}
