//! `Pipe2Mesh` - Parametric pipe meshes and CFD case provisioning
//!
//! Builds a straight circular pipe from a single resolution knob (the number
//! of cells around the circumference), meshes it into structured prism
//! layers, tags inlet, outlet, walls and the internal volume for the solver,
//! and provisions one complete simulation case per resolution of a sweep.
//!
//! # Architecture
//!
//! - **params**: cell size and axial layer count derived from `ncells`
//! - **kernel**: geometry/meshing kernel seam, builtin kernel and MSH 2.2 codec
//! - **extrusion**: circular cross-section extruded along the pipe axis
//! - **tagging**: physical groups consumed by the case setup
//! - **mesh**: the fixed meshing sequence for one resolution
//! - **statistics**: element counts of the tagged regions
//! - **template**: cluster job-script rendering
//! - **case**: case directory provisioning
//! - **batch**: resolution sweeps on a bounded worker pool
//!
//! # Examples
//!
//! ## Single Mesh
//!
//! ```rust,no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use pipe2mesh::{BuiltinKernel, MeshPipeline, ResolutionSpec};
//!
//! let pipeline = MeshPipeline::new(BuiltinKernel::new());
//! let outcome = pipeline.run(ResolutionSpec::new(32)?, "pipe-32.msh".as_ref())?;
//! println!("{} prisms", outcome.volume_elements());
//! # Ok(())
//! # }
//! ```
//!
//! ## Resolution Sweep
//!
//! ```rust,no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use pipe2mesh::prelude::*;
//!
//! let provisioner = CaseProvisioner::new(
//!     BuiltinKernel::new(),
//!     CaseLayout::new("."),
//!     JobResources::default().with_partition("batch"),
//! );
//! let report = BatchScheduler::default().run(&RESOLUTION_SWEEP, &provisioner)?;
//! report.write_json(&provisioner.layout().summary_path())?;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod case;
pub mod error;
pub mod extrusion;
pub mod kernel;
pub mod mesh;
pub mod params;
pub mod statistics;
pub mod tagging;
pub mod template;

// Re-export commonly used types
pub use batch::{BatchReport, BatchScheduler, CaseOutcome, CaseStatus};
pub use case::{CaseLayout, CaseProvisioner, CaseSummary};
pub use error::{ErrorKind, MeshError, MeshResult};
pub use extrusion::{PipeBuilder, PipeEntities};
pub use kernel::{BuiltinKernel, KernelOptions, KernelProvider, MeshingKernel};
pub use mesh::{MeshOutcome, MeshPipeline};
pub use params::{MeshParameters, ResolutionSpec};
pub use statistics::MeshStatistics;
pub use tagging::BoundaryRole;
pub use template::{JobResources, JobScriptConfig};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default pipe, meshing and case parameters
pub mod defaults {
    /// Pipe radius (m)
    pub const PIPE_RADIUS: f64 = 0.00227;

    /// Pipe length (m)
    pub const PIPE_LENGTH: f64 = 0.14;

    /// Declared version of written mesh files
    pub const MSH_VERSION: &str = "2.2";

    /// Sweeps of one Laplacian smoothing pass
    pub const LAPLACE_ITERATIONS: usize = 5;

    /// Resolutions provisioned by a batch run
    pub const RESOLUTION_SWEEP: [u32; 5] = [16, 32, 64, 128, 256];

    pub const DEFAULT_PARTITION: &str = "debug-cpu";
    pub const DEFAULT_NODES: u32 = 1;
    pub const DEFAULT_NTASKS: u32 = 40;
    /// `days-hours:minutes:seconds`
    pub const DEFAULT_TIME_LIMIT: &str = "0-04:00:00";

    // Case layout, relative to the project root
    pub const CASE_TEMPLATE_DIR: &str = "misc/case.template";
    pub const JOB_TEMPLATE_FILE: &str = "misc/job.sh.template";
    pub const CASES_DIR: &str = "cases";
    pub const SUMMARY_FILE: &str = "summary.json";

    // Names inside a case directory
    pub const CASE_PREFIX: &str = "airflow-pipe-";
    pub const MARKER_EXTENSION: &str = "foam";
    pub const MESH_FILE: &str = "mesh.msh";
    pub const JOB_SCRIPT: &str = "job.sh";
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        BatchReport, BatchScheduler, BoundaryRole, BuiltinKernel, CaseLayout, CaseOutcome,
        CaseProvisioner, CaseStatus, CaseSummary, ErrorKind, JobResources, JobScriptConfig,
        KernelOptions, KernelProvider, MeshError, MeshOutcome, MeshParameters, MeshPipeline,
        MeshResult, MeshStatistics, MeshingKernel, PipeBuilder, PipeEntities, ResolutionSpec,
    };

    pub use crate::defaults::*;
}

/// Quick-start functions for common use cases
pub mod quickstart {
    use crate::batch::{BatchReport, BatchScheduler};
    use crate::case::{CaseLayout, CaseProvisioner};
    use crate::defaults::RESOLUTION_SWEEP;
    use crate::error::MeshResult;
    use crate::kernel::BuiltinKernel;
    use crate::mesh::{MeshOutcome, MeshPipeline};
    use crate::params::ResolutionSpec;
    use crate::template::JobResources;
    use std::path::{Path, PathBuf};

    /// File name of a standalone mesh, e.g. `pipe-32.msh`
    #[must_use]
    pub fn mesh_file_name(ncells: u32) -> String {
        format!("pipe-{ncells}.msh")
    }

    /// Mesh the pipe at `ncells` into `<prefix>/pipe-<ncells>.msh`
    pub fn create_mesh<P: AsRef<Path>>(ncells: u32, prefix: P) -> MeshResult<MeshOutcome> {
        let spec = ResolutionSpec::new(ncells)?;
        let path: PathBuf = prefix.as_ref().join(mesh_file_name(ncells));
        MeshPipeline::new(BuiltinKernel::new()).run(spec, &path)
    }

    /// Provision the standard sweep under `root` and write its report
    pub fn create_cases<P: AsRef<Path>>(root: P, resources: JobResources) -> MeshResult<BatchReport> {
        let provisioner =
            CaseProvisioner::new(BuiltinKernel::new(), CaseLayout::new(root.as_ref()), resources);
        let report = BatchScheduler::default().run(&RESOLUTION_SWEEP, &provisioner)?;
        report.write_json(&provisioner.layout().summary_path())?;
        Ok(report)
    }
}
