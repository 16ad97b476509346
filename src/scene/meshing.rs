//! Meshing stage: turns geometry descriptions into physics shapes off the
//! consumer thread.
//!
//! Flow:
//! 1. A command stage builds a `MeshRequest` and calls `request_mesh` with a `MeshReply`
//! 2. The service builds the shape on a worker (or whenever a test decides to)
//! 3. `MeshReply::complete` sends a `MeshReady` message into the scene inbound channel
//! 4. The consumer deposits the shape into the waiting command and resumes it

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use dashmap::DashMap;
use parking_lot::Mutex;
use rapier3d::prelude::*;
use serde::Serialize;

use super::command::CommandId;
use super::scheduler::Inbound;
use super::shape::{GeometryDesc, PhysicsShape, PrimKind, ShapeKind, ShapePreference, Vec3};
use crate::config::MeshingConfig;
use crate::error::SchedulerError;

/// Which of a command's outstanding mesh requests a reply answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Branch(pub usize);

#[derive(Debug, Clone)]
pub struct MeshRequest {
    pub name: String,
    pub geometry: GeometryDesc,
    pub size: Vec3,
    pub lod: f32,
    /// Shape will back a dynamic body
    pub wants_physical: bool,
    /// Serialized hulls to use instead of generating
    pub precomputed: Option<Vec<u8>>,
    /// Object is crossing in from a neighbouring region
    pub region_crossing: bool,
}

/// One-shot route back to the command that asked for a shape.
///
/// `complete` consumes the reply, so each request is answered at most once.
/// It may be called from any thread.
#[derive(Debug)]
pub struct MeshReply {
    command: CommandId,
    branch: Branch,
    tx: Sender<Inbound>,
}

impl MeshReply {
    pub(crate) fn new(command: CommandId, branch: Branch, tx: Sender<Inbound>) -> Self {
        Self { command, branch, tx }
    }

    pub fn command(&self) -> CommandId {
        self.command
    }

    pub fn branch(&self) -> Branch {
        self.branch
    }

    pub fn complete(self, shape: PhysicsShape) {
        let message = Inbound::MeshReady {
            command: self.command,
            branch: self.branch,
            shape,
        };
        if self.tx.send(message).is_err() {
            log::debug!("[Meshing] scene gone, dropping shape for {}", self.command);
        }
    }
}

/// Asynchronous shape builder used by the scene.
pub trait MeshingService: Send + Sync {
    fn request_mesh(&self, request: MeshRequest, reply: MeshReply);
}

/// Builds the shape for a request. Runs on worker threads.
pub fn mesh_geometry(request: &MeshRequest) -> PhysicsShape {
    let geometry = &request.geometry;
    if geometry.preference == ShapePreference::None {
        return PhysicsShape::null();
    }

    let physical = request.wants_physical;
    let hash = geometry.content_hash(request.size, request.lod, physical);

    if let Some(bytes) = &request.precomputed {
        match decode_hulls(bytes) {
            Ok(hulls) => {
                if let Some(shape) = hulls_shape(&request.name, &hulls, request.size, geometry, hash, physical) {
                    return shape;
                }
                log::warn!("[Meshing] precomputed shape for {} had no usable hulls", request.name);
            }
            Err(e) => {
                log::warn!("[Meshing] could not decode precomputed shape for {}: {}", request.name, e);
            }
        }
    }

    let [sx, sy, sz] = request.size;
    let kind = if request.region_crossing {
        &PrimKind::Box
    } else {
        &geometry.kind
    };

    match kind {
        PrimKind::Box => box_shape(request.size, hash, physical),
        PrimKind::Sphere => PhysicsShape::new(ShapeKind::Sphere, vec![SharedShape::ball(sx / 2.0)], hash, physical),
        PrimKind::Cylinder => PhysicsShape::new(
            ShapeKind::Cylinder,
            vec![SharedShape::cylinder(sy / 2.0, sx / 2.0)],
            hash,
            physical,
        ),
        PrimKind::Wedge => {
            // Triangular prism: flat bottom, slope rises from +X to -X
            let hx = sx / 2.0;
            let hy = sy / 2.0;
            let hz = sz / 2.0;
            let points = [
                point![-hx, -hy, -hz],
                point![hx, -hy, -hz],
                point![-hx, -hy, hz],
                point![hx, -hy, hz],
                point![-hx, hy, -hz],
                point![-hx, hy, hz],
            ];
            match SharedShape::convex_hull(&points) {
                Some(hull) => PhysicsShape::new(ShapeKind::SingleConvex, vec![hull], hash, physical),
                None => {
                    log::warn!("[Meshing] wedge hull failed for {}, using box", request.name);
                    box_shape(request.size, hash, physical)
                }
            }
        }
        PrimKind::Hulls { hulls } => hulls_shape(&request.name, hulls, request.size, geometry, hash, physical)
            .unwrap_or_else(|| {
                log::warn!("[Meshing] no usable hulls for {}, using box", request.name);
                box_shape(request.size, hash, physical)
            }),
    }
}

fn box_shape(size: Vec3, hash: u64, physical: bool) -> PhysicsShape {
    let [sx, sy, sz] = size;
    PhysicsShape::new(
        ShapeKind::Box,
        vec![SharedShape::cuboid(sx / 2.0, sy / 2.0, sz / 2.0)],
        hash,
        physical,
    )
}

/// Physical convex-hull preference merges every point into one hull;
/// otherwise each hull becomes its own part.
fn hulls_shape(
    name: &str,
    hulls: &[Vec<Vec3>],
    size: Vec3,
    geometry: &GeometryDesc,
    hash: u64,
    physical: bool,
) -> Option<PhysicsShape> {
    let scaled: Vec<Vec<Point<Real>>> = hulls
        .iter()
        .map(|hull| {
            hull.iter()
                .map(|p| point![p[0] * size[0], p[1] * size[1], p[2] * size[2]])
                .collect()
        })
        .collect();

    let merge = scaled.len() == 1 || (physical && geometry.preference == ShapePreference::ConvexHull);
    if merge {
        let all: Vec<Point<Real>> = scaled.into_iter().flatten().collect();
        let hull = SharedShape::convex_hull(&all)?;
        return Some(PhysicsShape::new(ShapeKind::SingleConvex, vec![hull], hash, physical));
    }

    let mut parts = Vec::with_capacity(scaled.len());
    for (i, points) in scaled.iter().enumerate() {
        match SharedShape::convex_hull(points) {
            Some(hull) => parts.push(hull),
            None => log::warn!("[Meshing] skipping degenerate hull {} of {}", i, name),
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(PhysicsShape::new(ShapeKind::DecomposedHulls, parts, hash, physical))
}

/// Precomputed shapes are a JSON array of hulls of [x, y, z] points at unit scale.
pub fn decode_hulls(bytes: &[u8]) -> Result<Vec<Vec<Vec3>>, serde_json::Error> {
    serde_json::from_slice(bytes)
}

pub fn encode_hulls(hulls: &[Vec<Vec3>]) -> Vec<u8> {
    serde_json::to_vec(hulls).unwrap_or_default()
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct MeshingStats {
    pub requests: u64,
    pub cache_hits: u64,
}

#[derive(Default)]
struct MeshingCounters {
    requests: AtomicU64,
    cache_hits: AtomicU64,
}

/// Basic primitives and crossing substitutes are never cached. Precomputed
/// bytes are not part of the key.
fn is_cacheable(request: &MeshRequest) -> bool {
    !request.region_crossing && request.precomputed.is_none() && !request.geometry.kind.is_basic()
}

/// Meshing service backed by a rayon pool with a shared shape cache.
pub struct WorkerMesher {
    pool: rayon::ThreadPool,
    cache: Arc<DashMap<u64, PhysicsShape>>,
    cache_capacity: usize,
    counters: Arc<MeshingCounters>,
}

impl WorkerMesher {
    pub fn new(config: &MeshingConfig) -> Result<Self, SchedulerError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers.max(1))
            .thread_name(|i| format!("mesher-{}", i))
            .build()?;
        Ok(Self {
            pool,
            cache: Arc::new(DashMap::new()),
            cache_capacity: config.cache_capacity,
            counters: Arc::new(MeshingCounters::default()),
        })
    }

    pub fn stats(&self) -> MeshingStats {
        MeshingStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
        }
    }

    pub fn cached_shapes(&self) -> usize {
        self.cache.len()
    }
}

impl MeshingService for WorkerMesher {
    fn request_mesh(&self, request: MeshRequest, reply: MeshReply) {
        let cache = Arc::clone(&self.cache);
        let counters = Arc::clone(&self.counters);
        let capacity = self.cache_capacity;
        self.pool.spawn(move || {
            counters.requests.fetch_add(1, Ordering::Relaxed);
            let key = is_cacheable(&request).then(|| {
                request
                    .geometry
                    .content_hash(request.size, request.lod, request.wants_physical)
            });

            if let Some(key) = key {
                let cached = cache.get(&key).map(|entry| entry.value().clone());
                if let Some(shape) = cached {
                    counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                    reply.complete(shape);
                    return;
                }
            }

            let shape = mesh_geometry(&request);
            if let Some(key) = key {
                if !shape.is_null() && cache.len() < capacity {
                    cache.insert(key, shape.clone());
                }
            }
            reply.complete(shape);
        });
    }
}

/// Meshing service that holds requests until the owner completes them.
///
/// Lets tests and tools decide exactly when, and in which order, shapes
/// arrive.
#[derive(Default)]
pub struct DeferredMesher {
    pending: Mutex<Vec<(MeshRequest, MeshReply)>>,
    issued: AtomicU64,
}

impl DeferredMesher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Total requests received so far
    pub fn requests_issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }

    pub fn pending_names(&self) -> Vec<String> {
        self.pending.lock().iter().map(|(r, _)| r.name.clone()).collect()
    }

    /// Takes every pending request, leaving the caller responsible for replying.
    pub fn take_pending(&self) -> Vec<(MeshRequest, MeshReply)> {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Meshes and completes the oldest pending request.
    pub fn complete_next(&self) -> bool {
        self.complete_at(0)
    }

    /// Meshes and completes the pending request at `index`.
    pub fn complete_at(&self, index: usize) -> bool {
        let entry = {
            let mut pending = self.pending.lock();
            if index >= pending.len() {
                return false;
            }
            pending.remove(index)
        };
        let (request, reply) = entry;
        reply.complete(mesh_geometry(&request));
        true
    }

    /// Completes everything pending in arrival order, returning how many.
    pub fn complete_all(&self) -> usize {
        let pending = self.take_pending();
        let count = pending.len();
        for (request, reply) in pending {
            reply.complete(mesh_geometry(&request));
        }
        count
    }
}

impl MeshingService for DeferredMesher {
    fn request_mesh(&self, request: MeshRequest, reply: MeshReply) {
        self.issued.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().push((request, reply));
    }
}
