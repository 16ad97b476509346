use std::collections::HashMap;

use super::ExecContext;
use crate::scene::actor::ActorId;
use crate::scene::latch::DelayCounter;
use crate::scene::meshing::Branch;
use crate::scene::shape::PhysicsShape;

/// Fan-in of mesh requests for a root and every one of its children.
///
/// Branch 0 is the root; branch `i` is the `i - 1`th child captured when
/// the requests were issued. Shapes may arrive in any order.
#[derive(Debug)]
pub(crate) struct BodyRemesh {
    members: Vec<ActorId>,
    root_shape: Option<PhysicsShape>,
    child_shapes: HashMap<ActorId, PhysicsShape>,
    fan_in: DelayCounter,
}

impl BodyRemesh {
    /// Issues one request per prim of the body. Returns None if `root` is gone.
    pub(crate) fn start(ctx: &mut ExecContext<'_>, root: ActorId, physical: bool) -> Option<Self> {
        let world = ctx.world();
        let actor = world.actor(root)?;
        let mut members = Vec::with_capacity(actor.children.len());
        let mut requests = vec![(Branch(0), ctx.mesh_request_for(actor, physical))];
        for child in &actor.children {
            if let Some(c) = world.actor(*child) {
                members.push(*child);
                requests.push((Branch(members.len()), ctx.mesh_request_for(c, physical)));
            }
        }

        let fan_in = DelayCounter::with_count(requests.len() as u32);
        for (branch, request) in requests {
            ctx.request_mesh(branch, request);
        }
        Some(Self {
            members,
            root_shape: None,
            child_shapes: HashMap::new(),
            fan_in,
        })
    }

    /// Stores a result; true when the last outstanding shape arrived.
    pub(crate) fn deliver(&mut self, branch: Branch, shape: PhysicsShape) -> bool {
        match branch.0 {
            0 if self.root_shape.is_none() => self.root_shape = Some(shape),
            i => match self.members.get(i.wrapping_sub(1)) {
                Some(child) if !self.child_shapes.contains_key(child) => {
                    self.child_shapes.insert(*child, shape);
                }
                _ => {
                    log::warn!("[Remesh] ignoring duplicate or unknown branch {}", i);
                    return false;
                }
            },
        }
        self.fan_in.remove_wait_and_check_ready()
    }

    pub(crate) fn root_shape(&self) -> PhysicsShape {
        self.root_shape.clone().unwrap_or_else(PhysicsShape::null)
    }

    pub(crate) fn child_shapes(&self) -> &HashMap<ActorId, PhysicsShape> {
        &self.child_shapes
    }
}
