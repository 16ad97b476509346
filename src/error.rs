//! Error types shared across the scene, the engine wrapper and the config loader.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced to callers of the scene API.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Rejected when the command is constructed, before it reaches the queue.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The command was dropped without signalling its completion.
    #[error("command was dropped before it completed")]
    Abandoned,
    /// The scene consumer is gone.
    #[error("physics scene is no longer accepting commands")]
    Disconnected,
    #[error("timed out waiting for command completion")]
    Timeout,
    #[error("failed to start a waiting runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("failed to start meshing workers: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Failures raised by the rapier wrapper while building or changing bodies.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("shape for {name} has invalid geometry: {reason}")]
    InvalidGeometry { name: String, reason: String },
    #[error("rigid body for {0} is missing")]
    MissingBody(String),
    #[error("actor {0} is not in the scene")]
    MissingActor(String),
}

/// Reasons a body may not become dynamic.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PrecheckFailure {
    #[error("object is too complex: {total} convex hulls, limit {limit}")]
    TooComplex { total: usize, limit: usize },
    #[error("mass could not be computed (got {0})")]
    UnknownMass(f32),
}

/// Errors that can occur when loading scene configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse {}: {}", .0.display(), .1)]
    Parse(PathBuf, #[source] toml::de::Error),
}
