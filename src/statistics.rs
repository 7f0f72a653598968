//! Element counts per physical group, for reporting

use crate::error::{MeshError, MeshResult};
use crate::kernel::MeshingKernel;
use crate::tagging::BoundaryRole;
use serde::{Deserialize, Serialize};

/// Number of mesh elements tagged with each boundary role
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshStatistics {
    pub inlet_faces: usize,
    pub outlet_faces: usize,
    pub wall_faces: usize,
    pub volume_elements: usize,
}

impl MeshStatistics {
    /// Count the elements of every tagged region of a meshed model
    pub fn collect<K: MeshingKernel + ?Sized>(kernel: &K) -> MeshResult<Self> {
        Ok(Self {
            inlet_faces: count_tagged(kernel, BoundaryRole::Inlet)?,
            outlet_faces: count_tagged(kernel, BoundaryRole::Outlet)?,
            wall_faces: count_tagged(kernel, BoundaryRole::Walls)?,
            volume_elements: count_volume_elements(kernel)?,
        })
    }
}

/// Number of 3D elements in the "internal" volume group
pub fn count_volume_elements<K: MeshingKernel + ?Sized>(kernel: &K) -> MeshResult<usize> {
    let count = count_tagged(kernel, BoundaryRole::Internal)?;
    if count == 0 {
        return Err(MeshError::mesh_generation(
            "the internal volume contains no 3D elements",
        ));
    }
    Ok(count)
}

fn count_tagged<K: MeshingKernel + ?Sized>(kernel: &K, role: BoundaryRole) -> MeshResult<usize> {
    kernel
        .physical_group_entities(role.dim(), role.id())?
        .into_iter()
        .map(|tag| kernel.element_count(role.dim(), tag))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extrusion::PipeBuilder;
    use crate::kernel::{BuiltinKernel, Dim, KernelProvider};
    use crate::params::ResolutionSpec;
    use crate::tagging::tag_boundaries;

    #[test]
    fn test_counts_follow_structure() {
        let params = ResolutionSpec::new(16).unwrap().derive();
        let mut session = BuiltinKernel::new().initialize().unwrap();
        let entities = PipeBuilder::new(&params).build(&mut session).unwrap();
        session.synchronize().unwrap();
        tag_boundaries(&mut session, &entities).unwrap();

        assert!(count_volume_elements(&session).is_err());

        session.generate(Dim::Volume).unwrap();
        let stats = MeshStatistics::collect(&session).unwrap();
        assert_eq!(stats.inlet_faces, stats.outlet_faces);
        assert_eq!(stats.volume_elements, stats.inlet_faces * params.nz);
        assert_eq!(stats.wall_faces, 16 * params.nz);
    }

    #[test]
    fn test_missing_group_is_an_error() {
        let session = BuiltinKernel::new().initialize().unwrap();
        assert!(count_volume_elements(&session).is_err());
    }
}
