//! Pipe geometry: circular cross-section extruded into a prism
//!
//! The cross-section is a circle built from four quarter arcs around a shared
//! center point. Each quadrant point is shared by the two arcs meeting there,
//! so the loop closes without gaps. Every point carries the derived cell size
//! as its target mesh size.
//!
//! The extrusion result is turned into a [`PipeEntities`] mapping, so
//! boundary tagging never depends on the order in which a kernel numbers
//! the entities it creates.

use crate::error::{MeshError, MeshResult};
use crate::kernel::{MeshingKernel, SurfaceTag, VolumeTag};
use crate::params::MeshParameters;
use nalgebra::{Point3, Vector3};

/// Semantic role -> entity mapping of a built pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeEntities {
    /// Un-extruded cross-section
    pub inlet: SurfaceTag,
    /// Cap produced at the far end of the extrusion
    pub outlet: SurfaceTag,
    /// Lateral surfaces, one per quarter arc, in arc order
    pub walls: [SurfaceTag; 4],
    /// The swept flow region
    pub volume: VolumeTag,
}

/// Builds the pipe geometry in a kernel session
#[derive(Debug, Clone)]
pub struct PipeBuilder {
    radius: f64,
    length: f64,
    cell_size: f64,
    layers: usize,
    axis: Vector3<f64>,
    recombine: bool,
}

impl PipeBuilder {
    /// Builder for the dimensions and resolution in `params`, extruded along +z
    #[must_use]
    pub fn new(params: &MeshParameters) -> Self {
        Self {
            radius: params.radius,
            length: params.length,
            cell_size: params.dr,
            layers: params.nz,
            axis: Vector3::z(),
            recombine: true,
        }
    }

    /// Extrude along another unit direction
    #[must_use]
    pub fn with_axis(mut self, axis: Vector3<f64>) -> Self {
        self.axis = axis;
        self
    }

    /// Split layers into tetrahedra instead of prisms
    #[must_use]
    pub fn with_recombine(mut self, recombine: bool) -> Self {
        self.recombine = recombine;
        self
    }

    /// Create the cross-section and extrude it.
    ///
    /// The section lies in the plane through the origin normal to the axis.
    pub fn build<K: MeshingKernel + ?Sized>(&self, kernel: &mut K) -> MeshResult<PipeEntities> {
        let axis = self
            .axis
            .try_normalize(f64::EPSILON)
            .ok_or_else(|| MeshError::geometry("extrusion axis has zero length"))?;
        let (e1, e2) = section_basis(&axis);
        let r = self.radius;
        let size = self.cell_size;

        let center = kernel.add_point(Point3::origin(), size)?;
        let quadrants = [e1 * r, e2 * r, -e1 * r, -e2 * r];
        let mut points = Vec::with_capacity(quadrants.len());
        for offset in quadrants {
            points.push(kernel.add_point(Point3::from(offset), size)?);
        }

        let mut arcs = Vec::with_capacity(points.len());
        for i in 0..points.len() {
            let next = points[(i + 1) % points.len()];
            arcs.push(kernel.add_circle_arc(points[i], center, next)?);
        }
        let boundary = kernel.add_curve_loop(&arcs)?;
        let inlet = kernel.add_plane_surface(boundary)?;

        let extrusion = kernel.extrude(inlet, axis * self.length, self.layers, self.recombine)?;
        let walls: [SurfaceTag; 4] = extrusion.laterals.as_slice().try_into().map_err(|_| {
            MeshError::geometry(format!(
                "extrusion produced {} lateral surfaces, expected 4",
                extrusion.laterals.len()
            ))
        })?;

        let entities = PipeEntities {
            inlet,
            outlet: extrusion.cap,
            walls,
            volume: extrusion.volume,
        };
        log::debug!("pipe geometry built: {entities:?}");
        Ok(entities)
    }
}

/// Orthonormal in-plane basis (e1, e2) with e1 x e2 = axis
fn section_basis(axis: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let helper = if axis.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    let e1 = (helper - axis * axis.dot(&helper)).normalize();
    let e2 = axis.cross(&e1);
    (e1, e2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{BuiltinKernel, Dim, KernelProvider};
    use crate::params::ResolutionSpec;
    use approx::assert_relative_eq;

    #[test]
    fn test_basis_along_z() {
        let (e1, e2) = section_basis(&Vector3::z());
        assert_relative_eq!(e1, Vector3::x());
        assert_relative_eq!(e2, Vector3::y());
    }

    #[test]
    fn test_basis_is_right_handed() {
        let axis = Vector3::new(1.0, 1.0, 0.0).normalize();
        let (e1, e2) = section_basis(&axis);
        assert_relative_eq!(e1.dot(&axis), 0.0, epsilon = 1e-12);
        assert_relative_eq!(e1.cross(&e2), axis, epsilon = 1e-12);
    }

    #[test]
    fn test_explicit_role_mapping() {
        let params = ResolutionSpec::new(16).unwrap().derive();
        let mut session = BuiltinKernel::new().initialize().unwrap();
        let entities = PipeBuilder::new(&params).build(&mut session).unwrap();

        let mut surfaces = vec![entities.inlet, entities.outlet];
        surfaces.extend(entities.walls);
        surfaces.sort();
        surfaces.dedup();
        assert_eq!(surfaces.len(), 6);

        session.synchronize().unwrap();
        session.generate(Dim::Volume).unwrap();
        let inlet = session.element_count(Dim::Surface, entities.inlet.0).unwrap();
        let outlet = session.element_count(Dim::Surface, entities.outlet.0).unwrap();
        assert_eq!(inlet, outlet);
        // each wall is one quarter of the circumference swept through nz layers
        for wall in entities.walls {
            assert_eq!(
                session.element_count(Dim::Surface, wall.0).unwrap(),
                4 * params.nz
            );
        }
    }

    #[test]
    fn test_zero_axis_rejected() {
        let params = ResolutionSpec::new(8).unwrap().derive();
        let mut session = BuiltinKernel::new().initialize().unwrap();
        let result = PipeBuilder::new(&params)
            .with_axis(Vector3::zeros())
            .build(&mut session);
        assert!(matches!(result, Err(MeshError::GeometryConstruction { .. })));
    }
}
