//! Meshing pipeline for one resolution
//!
//! The kernel is driven through a fixed sequence:
//!
//! 1. build and synchronize the geometry
//! 2. register the physical groups
//! 3. 1D mesh
//! 4. 2D mesh
//! 5. Laplacian smoothing of the 2D mesh, so no degenerate cells are swept
//!    into the volume
//! 6. 3D mesh
//! 7. write the MSH 2.2 file
//!
//! Every run opens its own kernel session and drops it at the end, whether
//! the run succeeded or not.

use crate::error::MeshResult;
use crate::extrusion::{PipeBuilder, PipeEntities};
use crate::kernel::{with_session, Dim, KernelProvider, MeshingKernel, Optimizer};
use crate::params::{MeshParameters, ResolutionSpec};
use crate::statistics::MeshStatistics;
use crate::tagging::tag_boundaries;
use std::path::{Path, PathBuf};

/// Result of meshing one resolution
#[derive(Debug, Clone)]
pub struct MeshOutcome {
    pub parameters: MeshParameters,
    pub entities: PipeEntities,
    pub statistics: MeshStatistics,
    pub path: PathBuf,
}

impl MeshOutcome {
    /// Number of 3D elements in the pipe volume
    #[must_use]
    pub fn volume_elements(&self) -> usize {
        self.statistics.volume_elements
    }
}

/// Runs the meshing sequence in fresh kernel sessions
#[derive(Debug, Clone, Default)]
pub struct MeshPipeline<P> {
    provider: P,
}

impl<P: KernelProvider> MeshPipeline<P> {
    #[must_use]
    pub const fn new(provider: P) -> Self {
        Self { provider }
    }

    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Mesh the pipe for `spec` and write it to `path`
    pub fn run(&self, spec: ResolutionSpec, path: &Path) -> MeshResult<MeshOutcome> {
        let parameters = spec.derive();
        parameters.log_summary();

        with_session(&self.provider, |kernel| {
            let entities = generate(kernel, &parameters)?;
            kernel.write(path)?;
            let statistics = MeshStatistics::collect(kernel)?;
            log::info!(
                "ncells={}: {} volume elements written to {}",
                parameters.ncells,
                statistics.volume_elements,
                path.display()
            );
            Ok(MeshOutcome {
                parameters,
                entities,
                statistics,
                path: path.to_path_buf(),
            })
        })
    }
}

/// Build, tag and mesh the pipe in an open session (steps 1-6)
pub fn generate<K: MeshingKernel + ?Sized>(
    kernel: &mut K,
    parameters: &MeshParameters,
) -> MeshResult<PipeEntities> {
    let entities = PipeBuilder::new(parameters).build(kernel)?;
    kernel.synchronize()?;
    tag_boundaries(kernel, &entities)?;

    kernel.generate(Dim::Curve)?;
    kernel.generate(Dim::Surface)?;
    kernel.optimize(Optimizer::Laplace2D)?;
    kernel.generate(Dim::Volume)?;
    Ok(entities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::msh::{ElementType, MshSummary};
    use crate::kernel::BuiltinKernel;

    #[test]
    fn test_run_writes_tagged_mesh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipe-16.msh");
        let pipeline = MeshPipeline::new(BuiltinKernel::new());

        let outcome = pipeline
            .run(ResolutionSpec::new(16).unwrap(), &path)
            .unwrap();
        assert_eq!(outcome.parameters.nz, 157);
        assert!(outcome.volume_elements() > 0);

        let summary = MshSummary::read(&path).unwrap();
        assert_eq!(summary.version, "2.2");
        assert_eq!(summary.count(ElementType::Prism), outcome.volume_elements());
        assert_eq!(summary.count(ElementType::Tetrahedron), 0);
        assert_eq!(summary.count(ElementType::Line), 0);
        assert_eq!(
            summary.count(ElementType::Quadrilateral),
            outcome.statistics.wall_faces
        );
        assert_eq!(
            summary.count(ElementType::Triangle),
            outcome.statistics.inlet_faces + outcome.statistics.outlet_faces
        );
        assert_eq!(summary.elements_by_physical.get(&0), None);
        assert_eq!(
            summary.elements_by_physical.get(&999),
            Some(&outcome.volume_elements())
        );

        let names: Vec<_> = summary.physical_names.iter().collect();
        assert_eq!(names.len(), 4);
        assert_eq!(summary.physical_names[&(2, 1)], "inlet");
        assert_eq!(summary.physical_names[&(2, 2)], "outlet");
        assert_eq!(summary.physical_names[&(2, 3)], "walls");
        assert_eq!(summary.physical_names[&(3, 999)], "internal");
    }

    #[test]
    fn test_unwritable_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("pipe.msh");
        let pipeline = MeshPipeline::new(BuiltinKernel::new());
        let err = pipeline
            .run(ResolutionSpec::new(8).unwrap(), &path)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
    }

    #[test]
    fn test_generate_without_write() {
        let params = ResolutionSpec::new(32).unwrap().derive();
        let mut session = BuiltinKernel::new().initialize().unwrap();
        generate(&mut session, &params).unwrap();
        assert_eq!(session.meshed_dimension(), Some(Dim::Volume));
        let stats = MeshStatistics::collect(&session).unwrap();
        assert_eq!(stats.wall_faces, 32 * params.nz);
    }
}
