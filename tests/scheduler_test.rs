//! Scheduling behaviour of `PhysicsScene`: latching, fan-in, culling and
//! the freed queue. Mesh results are released by hand through
//! `DeferredMesher` so every interleaving is deterministic.
//!
//! Run with: cargo test --test scheduler_test

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use physics_scheduler::config::{LimitsConfig, SceneConfig};
use physics_scheduler::scene::meshing::{mesh_geometry, Branch, MeshReply, MeshRequest};
use physics_scheduler::scene::shape::IDENTITY_ROTATION;
use physics_scheduler::scene::{
    ActorId, AddPrimFlags, Command, CommandKind, DeferredMesher, DynamicsMode, ExecContext, GeometryDesc,
    MaterialPreset, MaterialSpec, PhysicsScene, PhysicsShape, PrimShapeData, Progress, SceneHandle, SceneStats,
    ShapeKind, Targets, World,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn setup(config: SceneConfig) -> (PhysicsScene, SceneHandle, Arc<DeferredMesher>) {
    let mesher = Arc::new(DeferredMesher::new());
    let (scene, handle) = PhysicsScene::new(&config, mesher.clone());
    (scene, handle, mesher)
}

/// Alternates processing and meshing until nothing is left to do.
fn settle(scene: &mut PhysicsScene, mesher: &DeferredMesher) {
    loop {
        let handled = scene.process_commands();
        let completed = mesher.complete_all();
        if handled == 0 && completed == 0 {
            break;
        }
    }
}

fn cube(name: &str, position: [f32; 3], size: f32) -> PrimShapeData {
    PrimShapeData::new(name, GeometryDesc::cube(), position, [size; 3])
}

fn create(scene: &mut PhysicsScene, handle: &SceneHandle, mesher: &DeferredMesher, data: PrimShapeData) -> ActorId {
    let mut completion = handle.add_prim_shape(data, AddPrimFlags::default()).unwrap();
    settle(scene, mesher);
    completion.try_take().unwrap().expect("prim was not created")
}

fn create_body(scene: &mut PhysicsScene, handle: &SceneHandle, mesher: &DeferredMesher, children: usize) -> Vec<ActorId> {
    let mut shapes = vec![cube("root", [0.0, 2.0, 0.0], 1.0)];
    for i in 0..children {
        shapes.push(cube(&format!("child{}", i), [i as f32 + 1.0, 2.0, 0.0], 0.5));
    }
    let mut completion = handle.bulk_add_prim_shapes(shapes, AddPrimFlags::default()).unwrap();
    settle(scene, mesher);
    completion.try_take().unwrap().expect("body was not created")
}

fn complete(pending: Vec<(MeshRequest, MeshReply)>) {
    for (request, reply) in pending {
        reply.complete(mesh_geometry(&request));
    }
}

fn metal() -> MaterialSpec {
    MaterialSpec::Native(MaterialPreset::Metal.material())
}

fn assert_monotonic(before: &SceneStats, after: &SceneStats) {
    let pairs = [
        (before.actors_added, after.actors_added),
        (before.actors_removed, after.actors_removed),
        (before.commands_executed, after.commands_executed),
        (before.commands_delayed, after.commands_delayed),
        (before.commands_culled, after.commands_culled),
        (before.mesh_requests, after.mesh_requests),
        (before.engine_failures, after.engine_failures),
        (before.rejected_transitions, after.rejected_transitions),
        (before.panics, after.panics),
    ];
    for (b, a) in pairs {
        assert!(a >= b, "counter went from {} to {}", b, a);
    }
}

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

#[test]
fn test_bulk_create_waits_for_every_shape_in_any_order() {
    for seed in 0..5 {
        let (mut scene, handle, mesher) = setup(SceneConfig::default());
        let shapes = vec![
            cube("root", [0.0, 2.0, 0.0], 1.0),
            cube("left", [-1.0, 2.0, 0.0], 0.5),
            cube("right", [1.0, 2.0, 0.0], 0.5),
        ];
        let mut completion = handle.bulk_add_prim_shapes(shapes, AddPrimFlags::default()).unwrap();
        scene.process_commands();
        assert_eq!(mesher.pending(), 3);

        let mut pending = mesher.take_pending();
        pending.shuffle(&mut StdRng::seed_from_u64(seed));
        let last = pending.len() - 1;
        for (i, (request, reply)) in pending.into_iter().enumerate() {
            reply.complete(mesh_geometry(&request));
            scene.process_commands();
            if i < last {
                assert_eq!(completion.try_take().unwrap(), None);
                assert_eq!(scene.world().actor_count(), 0);
            }
        }

        let ids = completion.try_take().unwrap().expect("bulk create did not signal");
        assert_eq!(ids.len(), 3);
        let stats = scene.stats();
        assert_eq!(stats.actors_added, 1);
        assert_eq!(stats.mesh_requests, 3);
        assert_eq!(scene.world().physics().body_count(), 1);

        let root = scene.world().actor(ids[0]).unwrap();
        assert_eq!(root.name(), "root");
        assert_eq!(root.children(), &ids[1..]);
        let left = scene.world().actor(ids[1]).unwrap();
        assert_eq!(left.parent(), Some(ids[0]));
        assert!((left.position()[0] + 1.0).abs() < 1e-5);
        assert!(left.position()[1].abs() < 1e-5);
        assert_eq!(scene.waiting_commands(), 0);
    }
}

// ---------------------------------------------------------------------------
// Latching
// ---------------------------------------------------------------------------

#[test]
fn test_failed_precheck_leaves_body_unchanged() {
    let config = SceneConfig {
        limits: LimitsConfig {
            max_dynamic_complexity: 2,
            ..Default::default()
        },
        ..Default::default()
    };
    let (mut scene, handle, mesher) = setup(config);
    let hulls: Vec<Vec<[f32; 3]>> = (0..3)
        .map(|i| {
            let x = i as f32 * 0.3 - 0.45;
            vec![[x, -0.5, -0.5], [x + 0.3, -0.5, -0.5], [x, 0.5, -0.5], [x, -0.5, 0.5]]
        })
        .collect();
    let data = PrimShapeData::new("rock", GeometryDesc::hulls(hulls), [0.0; 3], [1.0; 3]);
    let id = create(&mut scene, &handle, &mesher, data);
    assert_eq!(scene.world().actor(id).unwrap().shape().complexity(), 3);
    let before = scene.world().actor(id).unwrap().snapshot();

    handle.set_physical(id, true).unwrap();
    scene.process_commands();
    assert!(scene.latches().is_latched(id));
    settle(&mut scene, &mesher);

    assert_eq!(scene.world().actor(id).unwrap().snapshot(), before);
    assert_eq!(scene.stats().rejected_transitions, 1);
    assert_eq!(scene.latches().latch_count(), 0);

    let delayed = scene.stats().commands_delayed;
    handle
        .set_material(id, MaterialSpec::Native(MaterialPreset::Stone.material()), false)
        .unwrap();
    scene.process_commands();
    assert_eq!(scene.stats().commands_delayed, delayed);
    assert_eq!(scene.world().actor(id).unwrap().material().preset, Some(MaterialPreset::Stone));
}

#[test]
fn test_unlink_with_stale_parent_is_noop() {
    let (mut scene, handle, mesher) = setup(SceneConfig::default());
    let a = create(&mut scene, &handle, &mesher, cube("a", [0.0, 0.0, 0.0], 1.0));
    let b = create(&mut scene, &handle, &mesher, cube("b", [5.0, 0.0, 0.0], 1.0));
    let c = create(&mut scene, &handle, &mesher, cube("c", [10.0, 0.0, 0.0], 1.0));

    handle.link(a, c, [1.0, 0.0, 0.0], IDENTITY_ROTATION).unwrap();
    settle(&mut scene, &mesher);
    assert_eq!(scene.world().actor(c).unwrap().parent(), Some(a));

    // The unlink captured `a`, but the link ahead of it moves `c` to `b`
    handle.link(b, c, [0.0, 1.0, 0.0], IDENTITY_ROTATION).unwrap();
    handle.unlink(a, c, [20.0, 0.0, 0.0], IDENTITY_ROTATION).unwrap();
    scene.process_commands();
    assert!(scene.stats().commands_delayed >= 1);
    settle(&mut scene, &mesher);

    let world = scene.world();
    assert_eq!(world.actor(c).unwrap().parent(), Some(b));
    assert_eq!(world.actor(b).unwrap().children(), &[c]);
    assert!(world.actor(a).unwrap().children().is_empty());
    assert_eq!(world.physics().body_count(), 2);
    assert_eq!(scene.stats().actors_added, 3);
}

#[test]
fn test_latched_actor_blocks_only_its_own_commands() {
    let (mut scene, handle, mesher) = setup(SceneConfig::default());
    let busy = create(&mut scene, &handle, &mesher, cube("busy", [0.0; 3], 1.0));
    let idle = create(&mut scene, &handle, &mesher, cube("idle", [3.0, 0.0, 0.0], 1.0));

    handle.change_shape(busy, GeometryDesc::sphere(), [2.0; 3]).unwrap();
    handle.set_material(busy, metal(), false).unwrap();
    handle
        .set_material(idle, MaterialSpec::Native(MaterialPreset::Glass.material()), false)
        .unwrap();
    scene.process_commands();

    assert_eq!(scene.stats().commands_delayed, 1);
    assert!(scene.latches().holder(busy).is_some());
    assert_eq!(scene.world().actor(idle).unwrap().material().preset, Some(MaterialPreset::Glass));
    assert_ne!(scene.world().actor(busy).unwrap().material().preset, Some(MaterialPreset::Metal));

    mesher.complete_all();
    scene.process_commands();
    let actor = scene.world().actor(busy).unwrap();
    assert_eq!(actor.shape().kind(), ShapeKind::Sphere);
    assert_eq!(actor.material().preset, Some(MaterialPreset::Metal));
    assert_eq!(scene.stats().commands_delayed, 1);
    assert_eq!(scene.latches().latch_count(), 0);
    assert_eq!(scene.waiting_commands(), 0);
}

#[test]
fn test_physicality_commits_after_last_branch() {
    let (mut scene, handle, mesher) = setup(SceneConfig::default());
    let ids = create_body(&mut scene, &handle, &mesher, 2);
    let root = ids[0];
    let body = scene.world().actor(root).unwrap().body().unwrap();

    handle.set_physical(root, true).unwrap();
    scene.process_commands();
    assert_eq!(mesher.pending(), 3);

    let mut pending = mesher.take_pending();
    pending.reverse();
    let last = pending.len() - 1;
    for (i, entry) in pending.into_iter().enumerate() {
        complete(vec![entry]);
        scene.process_commands();
        if i < last {
            assert_eq!(scene.world().actor(root).unwrap().dynamics(), DynamicsMode::Kinematic);
            assert!(scene.latches().is_latched(ids[2]));
        }
    }

    for id in &ids {
        assert_eq!(scene.world().actor(*id).unwrap().dynamics(), DynamicsMode::Dynamic);
    }
    assert_eq!(scene.world().physics().body_mode(body), Some(DynamicsMode::Dynamic));
    assert_eq!(scene.latches().latch_count(), 0);
}

// ---------------------------------------------------------------------------
// Culling and release
// ---------------------------------------------------------------------------

#[test]
fn test_newer_cullable_replaces_parked_one() {
    let (mut scene, handle, mesher) = setup(SceneConfig::default());
    let id = create(&mut scene, &handle, &mesher, cube("box", [0.0; 3], 1.0));

    handle.change_shape(id, GeometryDesc::cube(), [2.0; 3]).unwrap();
    handle.set_physical(id, true).unwrap();
    handle.set_material(id, metal(), false).unwrap();
    handle.set_physical(id, false).unwrap();
    handle.set_physical(id, true).unwrap();
    scene.process_commands();
    assert_eq!(scene.stats().commands_culled, 2);
    // change shape in flight, one physicality and the material parked
    assert_eq!(scene.waiting_commands(), 3);

    settle(&mut scene, &mesher);
    let actor = scene.world().actor(id).unwrap();
    assert_eq!(actor.dynamics(), DynamicsMode::Dynamic);
    assert_eq!(actor.material().preset, Some(MaterialPreset::Metal));
    assert_eq!(actor.size(), [2.0; 3]);
    // create, change shape and the surviving physicality
    assert_eq!(mesher.requests_issued(), 3);
    assert_eq!(scene.stats().commands_culled, 2);
    assert_eq!(scene.waiting_commands(), 0);
}

#[test]
fn test_non_cullable_commands_are_never_dropped() {
    let (mut scene, handle, mesher) = setup(SceneConfig::default());
    let id = create(&mut scene, &handle, &mesher, cube("box", [0.0; 3], 1.0));

    handle.change_shape(id, GeometryDesc::cube(), [2.0; 3]).unwrap();
    handle.change_shape(id, GeometryDesc::cube(), [3.0; 3]).unwrap();
    handle.change_shape(id, GeometryDesc::sphere(), [4.0; 3]).unwrap();
    settle(&mut scene, &mesher);

    let actor = scene.world().actor(id).unwrap();
    assert_eq!(actor.shape().kind(), ShapeKind::Sphere);
    assert_eq!(actor.size(), [4.0; 3]);
    assert_eq!(scene.stats().commands_culled, 0);
    assert_eq!(mesher.requests_issued(), 4);
}

#[test]
fn test_removing_actor_releases_parked_commands() {
    let (mut scene, handle, mesher) = setup(SceneConfig::default());
    let id = create(&mut scene, &handle, &mesher, cube("box", [0.0; 3], 1.0));

    handle.change_shape(id, GeometryDesc::sphere(), [2.0; 3]).unwrap();
    handle.set_material(id, metal(), false).unwrap();
    scene.process_commands();
    assert_eq!(scene.waiting_commands(), 2);

    assert_eq!(scene.remove_actor(id), vec![id]);
    // the material change ran against a missing actor; the shape change is still meshing
    assert_eq!(scene.waiting_commands(), 1);
    assert!(!scene.latches().is_latched(id));

    settle(&mut scene, &mesher);
    assert_eq!(scene.waiting_commands(), 0);
    assert_eq!(scene.latches().latch_count(), 0);
    assert_eq!(scene.stats().actors_removed, 1);
    assert_eq!(scene.stats().engine_failures, 0);
    assert_eq!(scene.world().physics().body_count(), 0);
}

/// Latches its targets, waits for one mesh, then panics while committing.
struct FailsOnCommit {
    targets: Vec<ActorId>,
    meshed: bool,
}

impl Command for FailsOnCommit {
    fn kind(&self) -> CommandKind {
        CommandKind::ChangeShape
    }

    fn targets(&self, _world: &World) -> Targets {
        match self.targets.as_slice() {
            [only] => Targets::Single(*only),
            many => Targets::Multi(many.to_vec()),
        }
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Progress {
        if self.meshed {
            panic!("commit failed");
        }
        ctx.begin_delay(&self.targets);
        let actor = ctx.world().actor(self.targets[0]).expect("target exists");
        let request = ctx.mesh_request_for(actor, false);
        ctx.request_mesh(Branch(0), request);
        Progress::AwaitingMesh
    }

    fn deliver(&mut self, _branch: Branch, _shape: PhysicsShape) -> bool {
        self.meshed = true;
        true
    }
}

#[test]
fn test_panicking_holder_releases_single_latch() {
    let (mut scene, handle, mesher) = setup(SceneConfig::default());
    let id = create(&mut scene, &handle, &mesher, cube("box", [0.0; 3], 1.0));

    handle
        .queue_command(FailsOnCommit {
            targets: vec![id],
            meshed: false,
        })
        .unwrap();
    handle.set_material(id, metal(), false).unwrap();
    scene.process_commands();
    assert!(scene.latches().holder(id).is_some());
    assert_eq!(scene.latches().parked_count(), 1);

    settle(&mut scene, &mesher);
    assert_eq!(scene.stats().panics, 1);
    assert_eq!(scene.latches().latch_count(), 0);
    assert_eq!(scene.latches().parked_count(), 0);
    assert_eq!(scene.waiting_commands(), 0);
    assert_eq!(scene.world().actor(id).unwrap().material().preset, Some(MaterialPreset::Metal));
}

#[test]
fn test_panicking_holder_releases_every_latch() {
    let (mut scene, handle, mesher) = setup(SceneConfig::default());
    let ids = create_body(&mut scene, &handle, &mesher, 2);

    handle
        .queue_command(FailsOnCommit {
            targets: ids.clone(),
            meshed: false,
        })
        .unwrap();
    handle.set_material(ids[2], metal(), false).unwrap();
    handle.set_physical(ids[0], true).unwrap();
    scene.process_commands();
    assert!(ids.iter().all(|id| scene.latches().is_latched(*id)));
    assert_eq!(scene.latches().parked_count(), 2);

    settle(&mut scene, &mesher);
    assert_eq!(scene.stats().panics, 1);
    assert_eq!(scene.latches().latch_count(), 0);
    assert_eq!(scene.latches().parked_count(), 0);
    assert_eq!(scene.waiting_commands(), 0);
    assert_eq!(scene.world().actor(ids[2]).unwrap().material().preset, Some(MaterialPreset::Metal));
    assert_eq!(scene.world().actor(ids[0]).unwrap().dynamics(), DynamicsMode::Dynamic);
}

#[test]
fn test_stale_targets_are_noops() {
    let (mut scene, handle, mesher) = setup(SceneConfig::default());
    let gone = create(&mut scene, &handle, &mesher, cube("gone", [0.0; 3], 1.0));
    let other = create(&mut scene, &handle, &mesher, cube("other", [2.0, 0.0, 0.0], 1.0));
    handle.remove_prim(gone).unwrap();
    scene.process_commands();
    let requests = mesher.requests_issued();

    handle.set_physical(gone, true).unwrap();
    handle.change_shape(gone, GeometryDesc::sphere(), [1.0; 3]).unwrap();
    handle.set_volume_detect(gone, true).unwrap();
    handle.set_material(gone, metal(), true).unwrap();
    handle.link(other, gone, [1.0, 0.0, 0.0], IDENTITY_ROTATION).unwrap();
    handle.set_child_offset(other, gone, [1.0, 0.0, 0.0], IDENTITY_ROTATION).unwrap();
    handle.unlink(other, gone, [1.0, 0.0, 0.0], IDENTITY_ROTATION).unwrap();
    handle.remove_prim(gone).unwrap();
    scene.process_commands();

    assert_eq!(mesher.requests_issued(), requests);
    assert_eq!(scene.waiting_commands(), 0);
    assert_eq!(scene.latches().latch_count(), 0);
    assert_eq!(scene.stats().engine_failures, 0);
    assert_eq!(scene.stats().actors_removed, 1);
    assert!(scene.world().actor(other).unwrap().children().is_empty());
}

#[test]
fn test_counters_never_decrease() {
    let (mut scene, handle, mesher) = setup(SceneConfig::default());
    let mut rng = StdRng::seed_from_u64(42);
    let mut actors = Vec::new();
    for i in 0..3 {
        actors.push(create(&mut scene, &handle, &mesher, cube(&format!("box{}", i), [i as f32 * 3.0, 0.0, 0.0], 1.0)));
    }

    let mut held: Vec<(MeshRequest, MeshReply)> = Vec::new();
    let mut previous = scene.stats();
    for _ in 0..60 {
        for _ in 0..rng.gen_range(1..=3) {
            let id = actors[rng.gen_range(0..actors.len())];
            match rng.gen_range(0..4) {
                0 => handle.set_physical(id, rng.gen_bool(0.5)).unwrap(),
                1 => handle.set_material(id, metal(), rng.gen_bool(0.5)).unwrap(),
                2 => handle
                    .change_shape(id, GeometryDesc::cube(), [rng.gen_range(0.5..2.0); 3])
                    .unwrap(),
                _ => handle.set_volume_detect(id, rng.gen_bool(0.5)).unwrap(),
            };
        }
        scene.process_commands();

        held.extend(mesher.take_pending());
        held.shuffle(&mut rng);
        let keep = held.len() / 2;
        complete(held.split_off(keep));
        scene.process_commands();

        let stats = scene.stats();
        assert_monotonic(&previous, &stats);
        previous = stats;
    }

    complete(std::mem::take(&mut held));
    settle(&mut scene, &mesher);
    assert_monotonic(&previous, &scene.stats());
    assert_eq!(scene.waiting_commands(), 0);
    assert_eq!(scene.latches().latch_count(), 0);
    assert_eq!(scene.stats().engine_failures, 0);
}
