//! Scene physics and scheduling constants shared by config defaults and engine checks.

/// Physics constants
pub mod physics {
    /// Default gravity in m/s²
    pub const DEFAULT_GRAVITY: f32 = 9.8;

    /// Consumer loop rate (45 Hz)
    pub const DEFAULT_TICK_RATE: u32 = 45;
}

/// Limits checked before a body may become dynamic
pub mod limits {
    /// Total convex hulls allowed across a dynamic body and its children
    pub const MAX_DYNAMIC_COMPLEXITY: usize = 256;

    /// Smallest edge a dynamic object may have
    pub const MIN_SIZE_FOR_DYNAMIC: f32 = 0.009;

    /// Largest edge a dynamic object may have
    pub const MAX_PHYSICAL_DIMENSION: f32 = 128.0;

    /// Largest collider half-extent the engine wrapper accepts
    pub const MAX_SHAPE_EXTENT: f32 = 10_000.0;
}

/// Meshing stage defaults
pub mod meshing {
    /// Level of detail used for every sculpted or hull mesh
    pub const SCULPT_MESH_LOD: f32 = 32.0;

    pub const DEFAULT_WORKERS: usize = 2;

    pub const DEFAULT_CACHE_CAPACITY: usize = 4096;
}

/// Material clamp ranges applied to foreign materials
pub mod material {
    pub const DENSITY_RANGE: (f32, f32) = (1.0, 22587.0);
    pub const FRICTION_RANGE: (f32, f32) = (0.0, 255.0);
    pub const RESTITUTION_RANGE: (f32, f32) = (0.0, 1.0);
    pub const GRAVITY_MULTIPLIER_RANGE: (f32, f32) = (-1.0, 28.0);
}

/// Character capsule defaults
pub mod character {
    pub const DEFAULT_RADIUS: f32 = 0.37;

    /// Total capsule height
    pub const DEFAULT_HEIGHT: f32 = 1.8;
}
