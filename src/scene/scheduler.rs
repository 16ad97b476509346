//! The consumer side of the scene: the only place commands run.
//!
//! Callers push commands through a [`SceneHandle`]; mesh workers push
//! `MeshReady` messages through their replies. Both land in one inbound
//! channel drained here, so every mutation of the world happens on the
//! thread that owns the `PhysicsScene`.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use super::actor::{ActorId, AddPrimFlags, PrimActor, PrimShapeData};
use super::command::{Command, CommandId, ExecContext, Progress};
use super::handle::SceneHandle;
use super::latch::{DelayCoordinator, ParkOutcome};
use super::meshing::{Branch, MeshingService};
use super::panic_reporting::log_panic;
use super::shape::PhysicsShape;
use super::world::{SceneStats, World};
use crate::config::SceneConfig;
use crate::error::EngineError;

/// Messages consumed by the scene, in arrival order.
pub(crate) enum Inbound {
    Command(CommandId, Box<dyn Command>),
    MeshReady {
        command: CommandId,
        branch: Branch,
        shape: PhysicsShape,
    },
}

pub struct PhysicsScene {
    world: World,
    latches: DelayCoordinator,
    mesher: Arc<dyn MeshingService>,
    inbound_tx: Sender<Inbound>,
    inbound_rx: Receiver<Inbound>,
    /// Commands parked behind a latch or awaiting mesh results
    waiting: HashMap<CommandId, Box<dyn Command>>,
    next_id: Arc<AtomicU64>,
    lod: f32,
    timestep: f32,
    tick_rate: u32,
}

impl PhysicsScene {
    pub fn new(config: &SceneConfig, mesher: Arc<dyn MeshingService>) -> (Self, SceneHandle) {
        let (inbound_tx, inbound_rx) = crossbeam_channel::unbounded();
        let next_id = Arc::new(AtomicU64::new(1));
        let handle = SceneHandle::new(inbound_tx.clone(), Arc::clone(&next_id));
        let scene = Self {
            world: World::new(config.scene.gravity, config.limits.clone()),
            latches: DelayCoordinator::new(),
            mesher,
            inbound_tx,
            inbound_rx,
            waiting: HashMap::new(),
            next_id,
            lod: config.meshing.lod,
            timestep: config.timestep(),
            tick_rate: config.scene.tick_rate.max(1),
        };
        (scene, handle)
    }

    /// Another handle feeding this scene.
    pub fn handle(&self) -> SceneHandle {
        SceneHandle::new(self.inbound_tx.clone(), Arc::clone(&self.next_id))
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn stats(&self) -> SceneStats {
        self.world.stats()
    }

    pub fn latches(&self) -> &DelayCoordinator {
        &self.latches
    }

    /// Commands that are parked or in flight
    pub fn waiting_commands(&self) -> usize {
        self.waiting.len()
    }

    /// Handles every message queued when the call starts, in FIFO order.
    /// Messages arriving meanwhile wait for the next call. Returns the
    /// number of messages handled.
    pub fn process_commands(&mut self) -> usize {
        let queued = self.inbound_rx.len();
        let mut handled = 0;
        for _ in 0..queued {
            let Ok(message) = self.inbound_rx.try_recv() else {
                break;
            };
            match message {
                Inbound::Command(id, command) => self.delay_or_execute(id, command),
                Inbound::MeshReady { command, branch, shape } => self.mesh_ready(command, branch, shape),
            }
            self.drain_freed();
            handled += 1;
        }
        handled
    }

    /// Processes queued commands, then advances the simulation one step.
    pub fn tick(&mut self) {
        self.process_commands();
        self.world.physics.step(self.timestep);
    }

    /// Ticks at the configured rate until `stop` is raised.
    pub fn run(mut self, stop: Arc<AtomicBool>) -> SceneStats {
        let tick_duration = Duration::from_secs_f64(1.0 / f64::from(self.tick_rate));
        log::info!("[PhysicsScene] running at {} Hz", self.tick_rate);

        while !stop.load(Ordering::Relaxed) {
            let start = Instant::now();
            self.tick();

            let elapsed = start.elapsed();
            if elapsed < tick_duration {
                thread::sleep(tick_duration - elapsed);
            }
        }
        self.process_commands();
        log::info!("[PhysicsScene] stopped with {} actors", self.world.actor_count());
        self.world.stats()
    }

    /// Inserts a root actor with an already built shape, bypassing the queue.
    pub fn add_actor_to_scene(
        &mut self,
        data: &PrimShapeData,
        flags: &AddPrimFlags,
        shape: PhysicsShape,
    ) -> Result<ActorId, EngineError> {
        self.world.add_actor_to_scene(PrimActor::from_data(data, flags), shape)
    }

    /// Removes an actor immediately. Commands parked on it are resumed and
    /// find it gone.
    pub fn remove_actor(&mut self, id: ActorId) -> Vec<ActorId> {
        let removed = self.world.remove_actor(id);
        for actor in &removed {
            self.latches.release_actor(*actor);
        }
        self.drain_freed();
        removed
    }

    fn delay_or_execute(&mut self, id: CommandId, command: Box<dyn Command>) {
        let targets = command.targets(&self.world);
        let kind = command.kind();
        let cullable = command.is_cullable();

        let mut parked = false;
        for &target in targets.as_slice() {
            match self
                .latches
                .check_add_delay(id, kind, cullable, targets.as_slice(), target)
            {
                ParkOutcome::Clear => {}
                ParkOutcome::Parked => parked = true,
                ParkOutcome::Replaced(old) => {
                    parked = true;
                    self.cull(old, id);
                }
            }
        }

        if parked {
            log::debug!("[PhysicsScene] {} ({:?}) delayed", id, kind);
            self.world.stats.commands_delayed += 1;
            self.waiting.insert(id, command);
            return;
        }
        self.execute(id, command);
    }

    fn execute(&mut self, id: CommandId, mut command: Box<dyn Command>) {
        let kind = command.kind();
        let mut ctx = ExecContext {
            world: &mut self.world,
            latches: &mut self.latches,
            mesher: self.mesher.as_ref(),
            inbound: &self.inbound_tx,
            command: id,
            lod: self.lod,
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| command.execute(&mut ctx)));

        match outcome {
            Ok(Progress::Completed) => {
                self.world.stats.commands_executed += 1;
            }
            Ok(Progress::AwaitingMesh) => {
                self.waiting.insert(id, command);
            }
            Err(payload) => {
                log_panic("PhysicsScene", &format!("{} ({:?})", id, kind), payload.as_ref());
                self.world.stats.panics += 1;
                self.latches.release_holder(id);
            }
        }
    }

    fn mesh_ready(&mut self, id: CommandId, branch: Branch, shape: PhysicsShape) {
        let Some(mut command) = self.waiting.remove(&id) else {
            log::debug!("[PhysicsScene] mesh result for unknown {}", id);
            return;
        };
        if command.deliver(branch, shape) {
            self.delay_or_execute(id, command);
        } else {
            self.waiting.insert(id, command);
        }
    }

    fn cull(&mut self, old: CommandId, replacement: CommandId) {
        self.latches.forget(old);
        if self.waiting.remove(&old).is_some() {
            log::debug!("[PhysicsScene] {} culled in favour of {}", old, replacement);
            self.world.stats.commands_culled += 1;
            self.latches.release_holder(old);
        }
    }

    fn drain_freed(&mut self) {
        while let Some(id) = self.latches.pop_freed() {
            match self.waiting.remove(&id) {
                Some(command) => self.delay_or_execute(id, command),
                None => log::debug!("[PhysicsScene] freed {} is no longer waiting", id),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::command::{CommandKind, Targets};
    use crate::scene::meshing::{mesh_geometry, DeferredMesher, MeshRequest};
    use crate::scene::shape::GeometryDesc;

    struct Exploding;

    impl Command for Exploding {
        fn kind(&self) -> CommandKind {
            CommandKind::SetMaterial
        }

        fn targets(&self, _world: &World) -> Targets {
            Targets::None
        }

        fn execute(&mut self, _ctx: &mut ExecContext<'_>) -> Progress {
            panic!("boom");
        }
    }

    fn scene() -> (PhysicsScene, SceneHandle, Arc<DeferredMesher>) {
        let mesher = Arc::new(DeferredMesher::new());
        let (scene, handle) = PhysicsScene::new(&SceneConfig::default(), mesher.clone());
        (scene, handle, mesher)
    }

    fn cube_shape() -> PhysicsShape {
        mesh_geometry(&MeshRequest {
            name: "cube".to_string(),
            geometry: GeometryDesc::cube(),
            size: [1.0; 3],
            lod: 32.0,
            wants_physical: false,
            precomputed: None,
            region_crossing: false,
        })
    }

    #[test]
    fn test_panicking_command_is_contained() {
        let (mut scene, handle, _mesher) = scene();
        handle.queue_command(Exploding).unwrap();
        assert_eq!(scene.process_commands(), 1);
        assert_eq!(scene.stats().panics, 1);
        assert_eq!(scene.waiting_commands(), 0);
    }

    #[test]
    fn test_messages_queued_during_processing_wait_for_next_call() {
        let (mut scene, handle, mesher) = scene();
        let data = PrimShapeData::new("box", GeometryDesc::cube(), [0.0; 3], [1.0; 3]);
        let mut created = handle.add_prim_shape(data, AddPrimFlags::default()).unwrap();

        assert_eq!(scene.process_commands(), 1);
        assert_eq!(mesher.pending(), 1);
        mesher.complete_all();
        assert_eq!(created.try_take().unwrap(), None);

        assert_eq!(scene.process_commands(), 1);
        let id = created.try_take().unwrap().unwrap();
        assert!(scene.world().actor(id).is_some());
        assert_eq!(scene.stats().commands_executed, 1);
    }

    #[test]
    fn test_unknown_mesh_result_is_ignored() {
        let (mut scene, _handle, _mesher) = scene();
        scene
            .inbound_tx
            .send(Inbound::MeshReady {
                command: CommandId(42),
                branch: Branch(0),
                shape: PhysicsShape::null(),
            })
            .unwrap();
        assert_eq!(scene.process_commands(), 1);
        assert_eq!(scene.waiting_commands(), 0);
    }

    #[test]
    fn test_direct_add_and_remove() {
        let (mut scene, _handle, _mesher) = scene();
        let data = PrimShapeData::new("box", GeometryDesc::cube(), [0.0; 3], [1.0; 3]);
        let id = scene
            .add_actor_to_scene(&data, &AddPrimFlags::physical(), cube_shape())
            .unwrap();
        assert_eq!(scene.world().actor_count(), 1);
        assert_eq!(scene.remove_actor(id), vec![id]);
        assert!(scene.world().is_disposed(id));
    }

    #[test]
    fn test_tick_steps_the_world() {
        let (mut scene, _handle, _mesher) = scene();
        let data = PrimShapeData::new("box", GeometryDesc::cube(), [0.0, 10.0, 0.0], [1.0; 3]);
        let id = scene
            .add_actor_to_scene(&data, &AddPrimFlags::physical(), cube_shape())
            .unwrap();
        let body = scene.world().actor(id).unwrap().body().unwrap();
        for _ in 0..30 {
            scene.tick();
        }
        let y = scene.world().physics().get_position(body).unwrap()[1];
        assert!(y < 10.0);
    }
}
