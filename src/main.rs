//! physics-scheduler: drives a scene through the command API and reports its counters.

use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;

use physics_scheduler::config::SceneConfig;
use physics_scheduler::scene::meshing::MeshingStats;
use physics_scheduler::scene::{
    ActorId, AddPrimFlags, CharacterSpec, GeometryDesc, MaterialPreset, MaterialSpec, PhysicsScene, PrimShapeData,
    SceneStats, WorkerMesher,
};

#[derive(Parser)]
#[command(name = "physics-scheduler")]
#[command(about = "Builds composite bodies in a physics scene and reports scheduler counters", long_about = None)]
struct Cli {
    /// Path to a scene.toml (defaults apply when omitted)
    #[arg(short, long, env = "PHYSICS_SCENE_CONFIG")]
    config: Option<PathBuf>,
    /// Number of composite bodies to build
    #[arg(short, long, default_value = "4")]
    bodies: usize,
    /// Children linked to each body
    #[arg(long, default_value = "2")]
    children: usize,
    /// Physicality toggles issued back to back per body
    #[arg(short, long, default_value = "6")]
    toggles: usize,
    /// Seconds to keep simulating after the last command
    #[arg(long, default_value = "1.0")]
    settle: f32,
}

#[derive(Serialize)]
struct Report {
    scene: SceneStats,
    meshing: MeshingStats,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(report) => match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => log::error!("failed to serialize report: {}", e),
        },
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> Result<Report, Box<dyn Error>> {
    let config = match &cli.config {
        Some(path) => SceneConfig::from_file(path)?,
        None => SceneConfig::default(),
    };
    let mesher = Arc::new(WorkerMesher::new(&config.meshing)?);
    let (scene, handle) = PhysicsScene::new(&config, mesher.clone());

    let stop = Arc::new(AtomicBool::new(false));
    let scene_stop = Arc::clone(&stop);
    let scene_thread = thread::Builder::new()
        .name("physics-scene".to_string())
        .spawn(move || scene.run(scene_stop))?;

    let wait = Duration::from_secs(5);
    let mut roots: Vec<ActorId> = Vec::with_capacity(cli.bodies);
    for i in 0..cli.bodies {
        let mut completion = handle.bulk_add_prim_shapes(composite(i, cli.children), AddPrimFlags::default())?;
        let ids = completion.wait_timeout(wait)?;
        log::info!("body {} built with {} prims", i, ids.len());
        roots.extend(ids.first().copied());
    }

    let mut avatar = handle.add_character(CharacterSpec::at([0.0, 1.0, -5.0]))?;
    let avatar = avatar.wait_timeout(wait)?;

    for root in &roots {
        for toggle in 0..cli.toggles {
            handle.set_physical(*root, toggle % 2 == 0)?;
        }
        handle.set_material(*root, MaterialSpec::Native(MaterialPreset::Metal.material()), true)?;
    }
    if let Some(first) = roots.first() {
        handle.change_shape(*first, GeometryDesc::sphere(), [1.5; 3])?;
    }

    thread::sleep(Duration::from_secs_f32(cli.settle.max(0.0)));
    handle.remove_character(avatar)?;
    stop.store(true, Ordering::Relaxed);
    let scene = scene_thread
        .join()
        .map_err(|_| "scene thread panicked".to_string())?;

    Ok(Report {
        scene,
        meshing: mesher.stats(),
    })
}

/// A root cube with `children` smaller cubes stacked on top of it.
fn composite(index: usize, children: usize) -> Vec<PrimShapeData> {
    let x = index as f32 * 4.0;
    let mut shapes = vec![PrimShapeData::new(
        format!("body{}-root", index),
        GeometryDesc::cube(),
        [x, 2.0, 0.0],
        [1.0; 3],
    )];
    for c in 0..children {
        shapes.push(PrimShapeData::new(
            format!("body{}-child{}", index, c),
            GeometryDesc::cube(),
            [x, 2.75 + c as f32 * 0.5, 0.0],
            [0.5; 3],
        ));
    }
    shapes
}
