use super::create::settle_new_body;
use super::{check_pose, check_size, Command, CommandKind, ExecContext, Progress, Targets};
use crate::error::SchedulerError;
use crate::scene::actor::{ActorId, AddPrimFlags, PrimActor, PrimShapeData};
use crate::scene::completion::{Completion, CompletionHandle};
use crate::scene::latch::DelayCounter;
use crate::scene::meshing::{Branch, MeshRequest};
use crate::scene::physics::relative;
use crate::scene::shape::PhysicsShape;
use crate::scene::world::World;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Pending,
    AwaitingMeshes,
    Ready,
    Committed,
}

/// Creates a linked set in one step. The first member becomes the root and
/// the rest are linked to it in order. All members are meshed in parallel
/// and the body is only built once every shape has arrived.
pub struct BulkCreateObject {
    members: Vec<PrimShapeData>,
    flags: AddPrimFlags,
    shapes: Vec<Option<PhysicsShape>>,
    fan_in: DelayCounter,
    stage: Stage,
    completion: Completion<Vec<ActorId>>,
}

impl BulkCreateObject {
    pub fn new(
        members: Vec<PrimShapeData>,
        flags: AddPrimFlags,
    ) -> Result<(Self, CompletionHandle<Vec<ActorId>>), SchedulerError> {
        if members.is_empty() {
            return Err(SchedulerError::InvalidArgument(
                "bulk create needs at least one shape".to_string(),
            ));
        }
        for data in &members {
            check_pose(data.position, data.rotation)?;
            check_size(data.size)?;
        }
        let (completion, handle) = Completion::channel();
        let shapes = vec![None; members.len()];
        let command = Self {
            members,
            flags,
            shapes,
            fan_in: DelayCounter::new(),
            stage: Stage::Pending,
            completion,
        };
        Ok((command, handle))
    }

    fn physical(&self) -> bool {
        self.flags.physical && !self.members.iter().any(|m| m.volume_detect)
    }

    fn request(&mut self, ctx: &mut ExecContext<'_>) -> Progress {
        let physical = self.physical();
        self.fan_in = DelayCounter::with_count(self.members.len() as u32);
        for (i, data) in self.members.iter_mut().enumerate() {
            let request = MeshRequest {
                name: data.name.clone(),
                geometry: data.geometry.clone(),
                size: data.size,
                lod: ctx.lod(),
                wants_physical: physical,
                precomputed: data.precomputed.take(),
                region_crossing: self.flags.from_crossing,
            };
            ctx.request_mesh(Branch(i), request);
        }
        self.stage = Stage::AwaitingMeshes;
        Progress::AwaitingMesh
    }

    fn commit(&mut self, ctx: &mut ExecContext<'_>) {
        let shapes: Vec<PhysicsShape> = self
            .shapes
            .iter_mut()
            .map(|s| s.take().unwrap_or_else(PhysicsShape::null))
            .collect();
        let mut shapes = shapes.into_iter();
        let root_data = &self.members[0];
        let mut root_actor = PrimActor::from_data(root_data, &self.flags);
        if !self.physical() {
            root_actor.dynamics = root_actor.dynamics.toggled(false);
        }
        let root_shape = shapes.next().unwrap_or_else(PhysicsShape::null);
        let root = match ctx.world_mut().add_actor_to_scene(root_actor, root_shape) {
            Ok(id) => id,
            Err(e) => {
                ctx.world_mut().stats.engine_failures += 1;
                log::error!("[BulkCreateObject] could not add {}: {}", root_data.name, e);
                return;
            }
        };

        let root_pose = (root_data.position, root_data.rotation);
        let mut ids = Vec::with_capacity(self.members.len());
        ids.push(root);
        for (data, shape) in self.members[1..].iter().zip(shapes) {
            let mut actor = PrimActor::from_data(data, &self.flags);
            let (position, rotation) = relative(root_pose, (data.position, data.rotation));
            actor.position = position;
            actor.rotation = rotation;
            match ctx.world_mut().add_child_to_scene(root, actor, shape, true) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    ctx.engine_failure("BulkCreateObject", root, e);
                    return;
                }
            }
        }
        ctx.world_mut().update_mass(root);

        if self.members.iter().any(|m| m.volume_detect) {
            if let Err(e) = ctx.world_mut().set_volume_detect(root, true) {
                ctx.engine_failure("BulkCreateObject", root, e);
                return;
            }
        }
        settle_new_body(ctx.world_mut(), root, &self.members[0], &self.flags);
        self.completion.signal(ids);
    }
}

impl Command for BulkCreateObject {
    fn kind(&self) -> CommandKind {
        CommandKind::BulkCreateObject
    }

    fn targets(&self, _world: &World) -> Targets {
        Targets::None
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Progress {
        match self.stage {
            Stage::Pending => self.request(ctx),
            Stage::Ready => {
                self.stage = Stage::Committed;
                self.commit(ctx);
                Progress::Completed
            }
            stage => {
                log::warn!("[BulkCreateObject] resumed in stage {:?}", stage);
                Progress::Completed
            }
        }
    }

    fn deliver(&mut self, branch: Branch, shape: PhysicsShape) -> bool {
        if self.stage != Stage::AwaitingMeshes {
            log::warn!("[BulkCreateObject] mesh result after commit");
            return false;
        }
        match self.shapes.get_mut(branch.0) {
            Some(slot) if slot.is_none() => *slot = Some(shape),
            _ => {
                log::warn!("[BulkCreateObject] ignoring duplicate or unknown branch {}", branch.0);
                return false;
            }
        }
        if self.fan_in.remove_wait_and_check_ready() {
            self.stage = Stage::Ready;
            return true;
        }
        false
    }
}
