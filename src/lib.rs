//! Physics command scheduler library
//!
//! Serializes every mutation of a rigid-body scene onto a single consumer
//! thread while shape meshing runs on worker threads. Exposes the scene,
//! the command set and the meshing boundary for embedding and testing.

pub mod config;
pub mod error;
pub mod scene;
