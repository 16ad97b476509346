//! Scene configuration parsing from scene.toml files

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;
use crate::scene::constants::{limits, meshing, physics};

/// Simulation loop section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Ticks per second of the consumer loop
    pub tick_rate: u32,
    /// Downward gravity in m/s²
    pub gravity: f32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_rate: physics::DEFAULT_TICK_RATE,
            gravity: physics::DEFAULT_GRAVITY,
        }
    }
}

/// Meshing worker pool section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshingConfig {
    pub workers: usize,
    /// Maximum number of generated shapes kept for reuse
    pub cache_capacity: usize,
    /// Level of detail requested for every mesh
    pub lod: f32,
}

impl Default for MeshingConfig {
    fn default() -> Self {
        Self {
            workers: meshing::DEFAULT_WORKERS,
            cache_capacity: meshing::DEFAULT_CACHE_CAPACITY,
            lod: meshing::SCULPT_MESH_LOD,
        }
    }
}

/// Limits applied before a body is allowed to become dynamic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum total convex hulls across a dynamic body and its children
    pub max_dynamic_complexity: usize,
    pub min_dynamic_size: f32,
    pub max_dynamic_size: f32,
    /// Half-extent beyond which the engine refuses a collider
    pub max_shape_extent: f32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_dynamic_complexity: limits::MAX_DYNAMIC_COMPLEXITY,
            min_dynamic_size: limits::MIN_SIZE_FOR_DYNAMIC,
            max_dynamic_size: limits::MAX_PHYSICAL_DIMENSION,
            max_shape_extent: limits::MAX_SHAPE_EXTENT,
        }
    }
}

/// Scene configuration from scene.toml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub scene: SimulationConfig,
    pub meshing: MeshingConfig,
    pub limits: LimitsConfig,
}

impl SceneConfig {
    /// Load scene configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;

        Self::from_toml(&content).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Seconds per consumer tick
    pub fn timestep(&self) -> f32 {
        1.0 / self.scene.tick_rate.max(1) as f32
    }
}
