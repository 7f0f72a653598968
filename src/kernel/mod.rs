//! Geometry/meshing kernel seam
//!
//! A kernel session holds the whole model state of one case: geometric
//! entities, physical groups and the generated mesh. Sessions are opened by a
//! [`KernelProvider`], owned by exactly one worker and finalized when dropped,
//! so no model state ever leaks from one case into another.
//!
//! [`builtin`] provides the in-crate kernel used by the pipeline; [`msh`]
//! contains the MSH 2.2 text codec it writes with.

pub mod builtin;
pub mod msh;

use crate::error::MeshResult;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use builtin::{BuiltinKernel, BuiltinSession};

/// Topological dimension of a model entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Dim {
    Point = 0,
    Curve = 1,
    Surface = 2,
    Volume = 3,
}

impl Dim {
    /// Numeric dimension as written to mesh files
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

macro_rules! entity_tag {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            /// Raw entity tag
            #[must_use]
            pub const fn get(self) -> u32 {
                self.0
            }
        }
    };
}

entity_tag!(
    /// Tag of a geometric point
    PointTag
);
entity_tag!(
    /// Tag of a curve
    CurveTag
);
entity_tag!(
    /// Tag of a closed curve loop
    LoopTag
);
entity_tag!(
    /// Tag of a surface
    SurfaceTag
);
entity_tag!(
    /// Tag of a volume
    VolumeTag
);

/// Entities created by extruding one surface.
///
/// `laterals[i]` is the surface swept from the i-th curve of the source
/// surface's boundary loop, in loop order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extrusion {
    pub cap: SurfaceTag,
    pub volume: VolumeTag,
    pub laterals: Vec<SurfaceTag>,
}

/// Named, numbered tag over entities of one dimension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalGroup {
    pub dim: Dim,
    pub id: u32,
    pub name: String,
    pub entities: Vec<u32>,
}

/// Mesh optimization passes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Optimizer {
    /// Laplacian smoothing of 2D mesh nodes
    Laplace2D,
}

/// Session-wide kernel behavior
#[derive(Debug, Clone, PartialEq)]
pub struct KernelOptions {
    /// Declared MSH file version
    pub msh_version: String,
    /// Sweeps performed by one Laplacian smoothing pass
    pub laplace_iterations: usize,
    /// Write every meshed entity even when physical groups exist
    pub save_all: bool,
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self {
            msh_version: crate::defaults::MSH_VERSION.to_string(),
            laplace_iterations: crate::defaults::LAPLACE_ITERATIONS,
            save_all: false,
        }
    }
}

impl KernelOptions {
    /// Set the number of smoothing sweeps
    #[must_use]
    pub fn with_laplace_iterations(mut self, iterations: usize) -> Self {
        self.laplace_iterations = iterations;
        self
    }

    /// Write all meshed entities regardless of physical groups
    #[must_use]
    pub fn with_save_all(mut self, save_all: bool) -> Self {
        self.save_all = save_all;
        self
    }
}

/// Model construction and meshing operations of one kernel session.
///
/// Geometry becomes visible to physical groups and meshing only after
/// [`MeshingKernel::synchronize`]. `generate(dim)` meshes every dimension up
/// to `dim` that is not meshed yet.
pub trait MeshingKernel {
    fn add_point(&mut self, position: Point3<f64>, mesh_size: f64) -> MeshResult<PointTag>;

    /// Circular arc from `start` to `end` around `center`, shorter than a half turn
    fn add_circle_arc(
        &mut self,
        start: PointTag,
        center: PointTag,
        end: PointTag,
    ) -> MeshResult<CurveTag>;

    /// Closed loop of curves chained head to tail
    fn add_curve_loop(&mut self, curves: &[CurveTag]) -> MeshResult<LoopTag>;

    fn add_plane_surface(&mut self, boundary: LoopTag) -> MeshResult<SurfaceTag>;

    /// Translate a surface into a volume, split into `layers` structured
    /// layers. With `recombine` the layers are made of prisms instead of
    /// tetrahedra.
    fn extrude(
        &mut self,
        surface: SurfaceTag,
        translation: Vector3<f64>,
        layers: usize,
        recombine: bool,
    ) -> MeshResult<Extrusion>;

    fn synchronize(&mut self) -> MeshResult<()>;

    fn add_physical_group(&mut self, group: &PhysicalGroup) -> MeshResult<()>;

    /// Entity tags bound to a physical group
    fn physical_group_entities(&self, dim: Dim, id: u32) -> MeshResult<Vec<u32>>;

    fn generate(&mut self, dim: Dim) -> MeshResult<()>;

    fn optimize(&mut self, method: Optimizer) -> MeshResult<()>;

    fn write(&self, path: &Path) -> MeshResult<()>;

    /// Number of mesh elements of dimension `dim` on entity `tag`
    fn element_count(&self, dim: Dim, tag: u32) -> MeshResult<usize>;
}

/// Opens independent kernel sessions.
///
/// Providers are shared across worker threads; sessions are not.
pub trait KernelProvider: Send + Sync {
    type Session: MeshingKernel;

    fn initialize(&self) -> MeshResult<Self::Session>;
}

/// Run `f` inside a fresh session. The session is finalized when this
/// returns or unwinds.
pub fn with_session<P, T, F>(provider: &P, f: F) -> MeshResult<T>
where
    P: KernelProvider + ?Sized,
    F: FnOnce(&mut P::Session) -> MeshResult<T>,
{
    let mut session = provider.initialize()?;
    f(&mut session)
}
