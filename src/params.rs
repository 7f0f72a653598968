//! Meshing parameters derived from a single resolution knob
//!
//! The only free input is the number of cells around the circular edge of
//! the pipe. The cell size follows from the circumference, and the number of
//! axial layers is chosen so that cells stay roughly isotropic along the pipe.

use crate::defaults::{PIPE_LENGTH, PIPE_RADIUS};
use crate::error::{MeshError, MeshResult};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Requested resolution of one case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolutionSpec {
    ncells: u32,
}

/// Full set of parameters used to build and mesh one pipe
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeshParameters {
    /// Pipe radius (m)
    pub radius: f64,
    /// Pipe length (m)
    pub length: f64,
    /// Number of cells on the circular edge
    pub ncells: u32,
    /// Target cell size (m)
    pub dr: f64,
    /// Number of axial layers
    pub nz: usize,
}

impl ResolutionSpec {
    /// Create a resolution spec, rejecting zero cells
    pub fn new(ncells: u32) -> MeshResult<Self> {
        if ncells == 0 {
            return Err(MeshError::invalid_parameter(
                "number of cells on the circular edge must be positive",
            ));
        }
        Ok(Self { ncells })
    }

    /// Number of cells around the circular edge
    #[must_use]
    pub const fn ncells(&self) -> u32 {
        self.ncells
    }

    /// Derive the cell size and axial layering for the fixed pipe dimensions
    #[must_use]
    pub fn derive(&self) -> MeshParameters {
        MeshParameters::for_pipe(PIPE_RADIUS, PIPE_LENGTH, self.ncells)
    }
}

impl MeshParameters {
    /// Derive parameters for arbitrary pipe dimensions.
    ///
    /// `nz` uses round-half-up: add one half, then truncate toward zero.
    #[must_use]
    pub fn for_pipe(radius: f64, length: f64, ncells: u32) -> Self {
        let dr = 2.0 * PI * radius / f64::from(ncells);
        let nz = ((length / dr + 0.5).trunc() as usize).max(1);
        Self {
            radius,
            length,
            ncells,
            dr,
            nz,
        }
    }

    /// Log the derived values
    pub fn log_summary(&self) {
        log::info!("cylinder radius {}", self.radius);
        log::info!("cylinder length {}", self.length);
        log::info!("cell size on a cylinder edge {}", self.dr);
        log::info!("number of cells on a cylinder edge = {}", self.ncells);
        log::info!("number of cells in z = {}", self.nz);
    }
}
