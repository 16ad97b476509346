//! Physics scene: actor graph, command scheduling and the meshing boundary.

pub mod actor;
pub mod arena;
pub mod command;
pub mod completion;
pub mod constants;
pub mod handle;
pub mod latch;
pub mod material;
pub mod meshing;
pub mod panic_reporting;
pub mod physics;
pub mod scheduler;
pub mod shape;
pub mod world;

pub use actor::{ActorId, ActorSnapshot, AddPrimFlags, CharacterId, CharacterSpec, DynamicsMode, PrimShapeData};
pub use command::{Command, CommandId, CommandKind, ExecContext, Progress, Targets};
pub use completion::CompletionHandle;
pub use handle::SceneHandle;
pub use material::{ForeignMaterial, Material, MaterialChanges, MaterialPreset, MaterialSpec};
pub use meshing::{DeferredMesher, MeshReply, MeshRequest, MeshingService, WorkerMesher};
pub use scheduler::PhysicsScene;
pub use shape::{GeometryDesc, PhysicsShape, PrimKind, ShapeKind, ShapePreference};
pub use world::{SceneStats, World};
