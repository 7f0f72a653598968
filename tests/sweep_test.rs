//! Resolution sweep properties of the meshing pipeline.
//!
//! Meshes are generated in memory only; the finest resolutions would produce
//! multi-gigabyte files.

use approx::assert_relative_eq;
use pipe2mesh::defaults::{PIPE_RADIUS, RESOLUTION_SWEEP};
use pipe2mesh::kernel::{Dim, KernelProvider, MeshingKernel};
use pipe2mesh::mesh::generate;
use pipe2mesh::tagging::BoundaryRole;
use pipe2mesh::{BuiltinKernel, MeshStatistics, ResolutionSpec};
use std::f64::consts::PI;

#[test]
fn test_cell_size_recovers_circumference() {
    for ncells in [1, 3, 16, 100, 256, 10_000] {
        let params = ResolutionSpec::new(ncells).unwrap().derive();
        assert_relative_eq!(
            params.dr * f64::from(ncells),
            2.0 * PI * PIPE_RADIUS,
            max_relative = 1e-12
        );
        assert!(params.nz >= 1);
    }
}

#[test]
fn test_volume_elements_grow_with_resolution() {
    let mut previous = 0;
    for ncells in RESOLUTION_SWEEP {
        let params = ResolutionSpec::new(ncells).unwrap().derive();
        let mut session = BuiltinKernel::new().initialize().unwrap();
        generate(&mut session, &params).unwrap();
        let stats = MeshStatistics::collect(&session).unwrap();

        assert!(stats.volume_elements > 0, "ncells={ncells}");
        assert!(
            stats.volume_elements >= previous,
            "ncells={ncells}: {} < {previous}",
            stats.volume_elements
        );
        assert_eq!(stats.volume_elements, stats.inlet_faces * params.nz);
        assert_eq!(stats.inlet_faces, stats.outlet_faces);
        previous = stats.volume_elements;
    }
}

#[test]
fn test_group_ids_stable_across_resolutions() {
    for ncells in RESOLUTION_SWEEP {
        let params = ResolutionSpec::new(ncells).unwrap().derive();
        let mut session = BuiltinKernel::new().initialize().unwrap();
        let entities = generate(&mut session, &params).unwrap();

        assert_eq!(
            session.physical_group_entities(Dim::Surface, 1).unwrap(),
            vec![entities.inlet.get()]
        );
        assert_eq!(
            session.physical_group_entities(Dim::Surface, 2).unwrap(),
            vec![entities.outlet.get()]
        );
        assert_eq!(
            session.physical_group_entities(Dim::Surface, 3).unwrap(),
            entities.walls.iter().map(|w| w.get()).collect::<Vec<_>>()
        );
        assert_eq!(
            session.physical_group_entities(Dim::Volume, 999).unwrap(),
            vec![entities.volume.get()]
        );
    }
    let ids: Vec<u32> = BoundaryRole::ALL.iter().map(|r| r.id()).collect();
    assert_eq!(ids, vec![1, 2, 3, 999]);
}

#[test]
fn test_out_of_order_steps_fail() {
    let params = ResolutionSpec::new(16).unwrap().derive();
    let mut session = BuiltinKernel::new().initialize().unwrap();
    pipe2mesh::PipeBuilder::new(&params).build(&mut session).unwrap();

    assert!(session.generate(Dim::Surface).is_err());
    session.synchronize().unwrap();
    assert!(session
        .optimize(pipe2mesh::kernel::Optimizer::Laplace2D)
        .is_err());
    session.generate(Dim::Volume).unwrap();
    assert!(session
        .optimize(pipe2mesh::kernel::Optimizer::Laplace2D)
        .is_err());
}
