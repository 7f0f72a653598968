//! Physical groups consumed by the CFD case setup
//!
//! The ids and names below are an interface: boundary conditions in the case
//! template refer to them, so they are identical for every resolution.

use crate::error::MeshResult;
use crate::extrusion::PipeEntities;
use crate::kernel::{Dim, MeshingKernel, PhysicalGroup};
use serde::{Deserialize, Serialize};

/// Semantic role of a tagged region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryRole {
    Inlet,
    Outlet,
    Walls,
    Internal,
}

impl BoundaryRole {
    pub const ALL: [Self; 4] = [Self::Inlet, Self::Outlet, Self::Walls, Self::Internal];

    /// Physical group id
    #[must_use]
    pub const fn id(self) -> u32 {
        match self {
            Self::Inlet => 1,
            Self::Outlet => 2,
            Self::Walls => 3,
            Self::Internal => 999,
        }
    }

    /// Physical group name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Inlet => "inlet",
            Self::Outlet => "outlet",
            Self::Walls => "walls",
            Self::Internal => "internal",
        }
    }

    #[must_use]
    pub const fn dim(self) -> Dim {
        match self {
            Self::Internal => Dim::Volume,
            _ => Dim::Surface,
        }
    }
}

/// The four physical groups of a pipe, in registration order
#[must_use]
pub fn physical_groups(entities: &PipeEntities) -> Vec<PhysicalGroup> {
    BoundaryRole::ALL
        .iter()
        .map(|&role| {
            let members = match role {
                BoundaryRole::Inlet => vec![entities.inlet.get()],
                BoundaryRole::Outlet => vec![entities.outlet.get()],
                BoundaryRole::Walls => entities.walls.iter().map(|w| w.get()).collect(),
                BoundaryRole::Internal => vec![entities.volume.get()],
            };
            PhysicalGroup {
                dim: role.dim(),
                id: role.id(),
                name: role.name().to_string(),
                entities: members,
            }
        })
        .collect()
}

/// Register the pipe's physical groups in a synchronized model
pub fn tag_boundaries<K: MeshingKernel + ?Sized>(
    kernel: &mut K,
    entities: &PipeEntities,
) -> MeshResult<()> {
    for group in physical_groups(entities) {
        log::debug!(
            "physical group {} ({:?}, id {}) -> {:?}",
            group.name,
            group.dim,
            group.id,
            group.entities
        );
        kernel.add_physical_group(&group)?;
    }
    Ok(())
}
