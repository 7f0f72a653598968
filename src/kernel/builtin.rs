//! In-crate meshing kernel
//!
//! Handles the geometry this crate builds: plane surfaces bounded by circular
//! arcs around one shared center, translated into structured layers.
//!
//! - 1D: arcs are split into segments close to the mean target size of their
//!   end points.
//! - 2D: a circular surface is filled with concentric rings whose node counts
//!   grow linearly with the radius; neighbouring rings are stitched by
//!   walking both rings in angular order.
//! - 3D: each surface triangle is swept through every layer into a prism, or
//!   into three tetrahedra without recombination.
//!
//! Layer nodes are never stored; their positions are derived from the base
//! node and the layer index when the mesh is written.

use super::msh::{ElementType, MshWriter};
use super::{
    CurveTag, Dim, Extrusion, KernelOptions, KernelProvider, LoopTag, MeshingKernel, Optimizer,
    PhysicalGroup, PointTag, SurfaceTag, VolumeTag,
};
use crate::error::{IoResultExt, MeshError, MeshResult};
use nalgebra::{Point3, Vector3};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::f64::consts::TAU;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Relative tolerance for geometric comparisons
const TOLERANCE: f64 = 1e-9;

/// Provider of [`BuiltinSession`]s
#[derive(Debug, Clone, Default)]
pub struct BuiltinKernel {
    options: KernelOptions,
}

impl BuiltinKernel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_options(options: KernelOptions) -> Self {
        Self { options }
    }

    #[must_use]
    pub fn options(&self) -> &KernelOptions {
        &self.options
    }
}

impl KernelProvider for BuiltinKernel {
    type Session = BuiltinSession;

    fn initialize(&self) -> MeshResult<BuiltinSession> {
        if self.options.msh_version != crate::defaults::MSH_VERSION {
            return Err(MeshError::invalid_parameter(format!(
                "unsupported MSH version {}",
                self.options.msh_version
            )));
        }
        log::debug!("kernel session initialized");
        Ok(BuiltinSession::new(self.options.clone()))
    }
}

#[derive(Debug, Clone, Copy)]
struct GeoPoint {
    position: Point3<f64>,
    mesh_size: f64,
}

#[derive(Debug, Clone)]
struct CircleArc {
    start: PointTag,
    center: PointTag,
    end: PointTag,
    radius: f64,
    angle: f64,
    normal: Vector3<f64>,
}

#[derive(Debug, Clone)]
enum Surface {
    Plane { boundary: LoopTag },
    Lateral { volume: VolumeTag, curve: CurveTag },
    Cap { volume: VolumeTag },
}

#[derive(Debug, Clone)]
struct ExtrudedVolume {
    source: SurfaceTag,
    translation: Vector3<f64>,
    layers: usize,
    recombine: bool,
}

#[derive(Debug)]
struct SurfaceMesh {
    nodes: Vec<usize>,
    triangles: Vec<[usize; 3]>,
    fixed: HashSet<usize>,
    normal: Vector3<f64>,
}

#[derive(Debug)]
struct VolumeMesh {
    base: Vec<usize>,
    local: HashMap<usize, usize>,
    first_layer_node: usize,
}

#[derive(Debug, Default)]
struct MeshData {
    nodes: Vec<Point3<f64>>,
    point_nodes: HashMap<PointTag, usize>,
    curves: BTreeMap<CurveTag, Vec<usize>>,
    surfaces: BTreeMap<SurfaceTag, SurfaceMesh>,
    volumes: BTreeMap<VolumeTag, VolumeMesh>,
    layer_nodes: usize,
}

/// Model and mesh state of one case
#[derive(Debug)]
pub struct BuiltinSession {
    options: KernelOptions,
    points: Vec<GeoPoint>,
    curves: Vec<CircleArc>,
    loops: Vec<Vec<CurveTag>>,
    surfaces: Vec<Surface>,
    volumes: Vec<ExtrudedVolume>,
    groups: Vec<PhysicalGroup>,
    synchronized: bool,
    meshed: Option<Dim>,
    mesh: MeshData,
}

impl BuiltinSession {
    fn new(options: KernelOptions) -> Self {
        Self {
            options,
            points: Vec::new(),
            curves: Vec::new(),
            loops: Vec::new(),
            surfaces: Vec::new(),
            volumes: Vec::new(),
            groups: Vec::new(),
            synchronized: false,
            meshed: None,
            mesh: MeshData::default(),
        }
    }

    /// Total number of mesh nodes, including extruded layers
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.mesh.nodes.len() + self.mesh.layer_nodes
    }

    /// Highest dimension meshed so far
    #[must_use]
    pub fn meshed_dimension(&self) -> Option<Dim> {
        self.meshed
    }

    /// Geometry changes discard the mesh and require a new synchronization
    fn invalidate(&mut self) {
        self.synchronized = false;
        self.meshed = None;
        self.mesh = MeshData::default();
    }

    fn point(&self, tag: PointTag) -> MeshResult<&GeoPoint> {
        lookup(&self.points, tag.0)
            .ok_or_else(|| MeshError::geometry(format!("unknown point {}", tag.0)))
    }

    fn curve(&self, tag: CurveTag) -> MeshResult<&CircleArc> {
        lookup(&self.curves, tag.0)
            .ok_or_else(|| MeshError::geometry(format!("unknown curve {}", tag.0)))
    }

    fn curve_loop(&self, tag: LoopTag) -> MeshResult<&Vec<CurveTag>> {
        lookup(&self.loops, tag.0)
            .ok_or_else(|| MeshError::geometry(format!("unknown curve loop {}", tag.0)))
    }

    fn surface(&self, tag: SurfaceTag) -> MeshResult<&Surface> {
        lookup(&self.surfaces, tag.0)
            .ok_or_else(|| MeshError::geometry(format!("unknown surface {}", tag.0)))
    }

    fn volume(&self, tag: VolumeTag) -> MeshResult<&ExtrudedVolume> {
        lookup(&self.volumes, tag.0)
            .ok_or_else(|| MeshError::geometry(format!("unknown volume {}", tag.0)))
    }

    fn entity_exists(&self, dim: Dim, tag: u32) -> bool {
        match dim {
            Dim::Point => lookup(&self.points, tag).is_some(),
            Dim::Curve => lookup(&self.curves, tag).is_some(),
            Dim::Surface => lookup(&self.surfaces, tag).is_some(),
            Dim::Volume => lookup(&self.volumes, tag).is_some(),
        }
    }

    fn require_synchronized(&self, operation: &str) -> MeshResult<()> {
        if self.synchronized {
            Ok(())
        } else {
            Err(MeshError::mesh_generation(format!(
                "model must be synchronized before {operation}"
            )))
        }
    }

    fn is_meshed(&self, dim: Dim) -> bool {
        self.meshed.is_some_and(|m| m >= dim)
    }

    fn point_node(&mut self, tag: PointTag) -> MeshResult<usize> {
        if let Some(&node) = self.mesh.point_nodes.get(&tag) {
            return Ok(node);
        }
        let position = self.point(tag)?.position;
        let node = self.mesh.nodes.len();
        self.mesh.nodes.push(position);
        self.mesh.point_nodes.insert(tag, node);
        Ok(node)
    }

    fn mesh_curves(&mut self) -> MeshResult<()> {
        for index in 0..self.curves.len() {
            let tag = CurveTag(index as u32 + 1);
            let arc = self.curves[index].clone();
            let start = self.point(arc.start)?;
            let end = self.point(arc.end)?;
            let center = self.point(arc.center)?.position;
            let size = 0.5 * (start.mesh_size + end.mesh_size);
            let u = start.position - center;
            let w = arc.normal.cross(&u);
            let segments = ((arc.radius * arc.angle / size).round() as usize).max(1);

            let mut nodes = Vec::with_capacity(segments + 1);
            nodes.push(self.point_node(arc.start)?);
            for k in 1..segments {
                let phi = arc.angle * k as f64 / segments as f64;
                let position = center + u * phi.cos() + w * phi.sin();
                nodes.push(self.mesh.nodes.len());
                self.mesh.nodes.push(position);
            }
            nodes.push(self.point_node(arc.end)?);
            self.mesh.curves.insert(tag, nodes);
        }
        log::debug!(
            "meshed {} curves with {} nodes",
            self.mesh.curves.len(),
            self.mesh.nodes.len()
        );
        Ok(())
    }

    fn mesh_surfaces(&mut self) -> MeshResult<()> {
        for index in 0..self.surfaces.len() {
            if let Surface::Plane { boundary } = self.surfaces[index] {
                let tag = SurfaceTag(index as u32 + 1);
                let mesh = self.mesh_disk(boundary)?;
                log::debug!(
                    "meshed surface {} with {} triangles",
                    tag.0,
                    mesh.triangles.len()
                );
                self.mesh.surfaces.insert(tag, mesh);
            }
        }
        Ok(())
    }

    /// Fill a circular loop with concentric rings of triangles
    fn mesh_disk(&mut self, boundary: LoopTag) -> MeshResult<SurfaceMesh> {
        let curves = self.curve_loop(boundary)?.clone();
        let first = self.curve(curves[0])?.clone();
        let center = self.point(first.center)?.position;
        let radius = first.radius;
        let normal = first.normal;

        let mut size = 0.0;
        let mut ring = Vec::new();
        for tag in &curves {
            let arc = self.curve(*tag)?;
            let arc_center = self.point(arc.center)?.position;
            if (arc_center - center).norm() > TOLERANCE * radius
                || (arc.radius - radius).abs() > TOLERANCE * radius
                || arc.normal.dot(&normal) < 1.0 - TOLERANCE
            {
                return Err(MeshError::mesh_generation(
                    "builtin kernel meshes only circular plane surfaces",
                ));
            }
            size += self.point(arc.start)?.mesh_size;
            let nodes = self.mesh.curves.get(tag).ok_or_else(|| {
                MeshError::mesh_generation(format!("curve {} has no 1D mesh", tag.0))
            })?;
            ring.extend_from_slice(&nodes[..nodes.len() - 1]);
        }
        size /= curves.len() as f64;

        let e1 = (self.mesh.nodes[ring[0]] - center) / radius;
        let e2 = normal.cross(&e1);
        let rings = ((radius / size).round() as usize).max(1);
        let boundary_nodes = ring.len();

        let center_node = self.mesh.nodes.len();
        self.mesh.nodes.push(center);
        let mut nodes = vec![center_node];
        let mut triangles = Vec::new();
        let mut previous: Vec<(usize, f64)> = Vec::new();

        for k in 1..rings {
            let r = radius * k as f64 / rings as f64;
            let count = ((boundary_nodes * k) as f64 / rings as f64).round() as usize;
            let count = count.max(3);
            let current: Vec<(usize, f64)> = (0..count)
                .map(|i| {
                    let theta = TAU * i as f64 / count as f64;
                    let position = center + (e1 * theta.cos() + e2 * theta.sin()) * r;
                    self.mesh.nodes.push(position);
                    (self.mesh.nodes.len() - 1, theta)
                })
                .collect();
            nodes.extend(current.iter().map(|(node, _)| *node));
            if previous.is_empty() {
                fan(center_node, &current, &mut triangles);
            } else {
                stitch(&previous, &current, &mut triangles);
            }
            previous = current;
        }

        let mut outer: Vec<(usize, f64)> = ring
            .iter()
            .map(|&node| {
                let d = self.mesh.nodes[node] - center;
                (node, d.dot(&e2).atan2(d.dot(&e1)).rem_euclid(TAU))
            })
            .collect();
        outer[0].1 = 0.0;
        nodes.extend_from_slice(&ring);
        if previous.is_empty() {
            fan(center_node, &outer, &mut triangles);
        } else {
            stitch(&previous, &outer, &mut triangles);
        }

        let mesh = SurfaceMesh {
            nodes,
            triangles,
            fixed: ring.into_iter().collect(),
            normal,
        };
        if let Some(bad) = mesh
            .triangles
            .iter()
            .find(|t| signed_area(&self.mesh.nodes, t, &normal) <= 0.0)
        {
            return Err(MeshError::mesh_generation(format!(
                "inverted triangle {bad:?} in surface mesh"
            )));
        }
        Ok(mesh)
    }

    fn smooth_surfaces(&mut self) {
        let iterations = self.options.laplace_iterations;
        let MeshData {
            nodes, surfaces, ..
        } = &mut self.mesh;

        for surface in surfaces.values() {
            let mut neighbours: HashMap<usize, HashSet<usize>> = HashMap::new();
            let mut incident: HashMap<usize, Vec<usize>> = HashMap::new();
            for (index, triangle) in surface.triangles.iter().enumerate() {
                for k in 0..3 {
                    let node = triangle[k];
                    let entry = neighbours.entry(node).or_default();
                    entry.insert(triangle[(k + 1) % 3]);
                    entry.insert(triangle[(k + 2) % 3]);
                    incident.entry(node).or_default().push(index);
                }
            }

            let mut moved = 0usize;
            for _ in 0..iterations {
                for &node in &surface.nodes {
                    if surface.fixed.contains(&node) {
                        continue;
                    }
                    let Some(adjacent) = neighbours.get(&node) else {
                        continue;
                    };
                    let sum = adjacent
                        .iter()
                        .fold(Vector3::<f64>::zeros(), |acc, &n| acc + nodes[n].coords);
                    let candidate = Point3::from(sum / adjacent.len() as f64);
                    let previous = nodes[node];
                    nodes[node] = candidate;
                    let positions: &[Point3<f64>] = nodes;
                    let valid = incident[&node].iter().all(|&t| {
                        signed_area(positions, &surface.triangles[t], &surface.normal) > 0.0
                    });
                    if valid {
                        moved += 1;
                    } else {
                        nodes[node] = previous;
                    }
                }
            }
            log::debug!("laplacian smoothing applied {moved} node moves");
        }
    }

    fn mesh_volumes(&mut self) -> MeshResult<()> {
        for index in 0..self.volumes.len() {
            let tag = VolumeTag(index as u32 + 1);
            let volume = self.volumes[index].clone();
            let source = self.mesh.surfaces.get(&volume.source).ok_or_else(|| {
                MeshError::mesh_generation(format!(
                    "surface {} has no 2D mesh to extrude",
                    volume.source.0
                ))
            })?;

            let height = source.normal.dot(&volume.translation);
            for triangle in &source.triangles {
                let area = signed_area(&self.mesh.nodes, triangle, &source.normal);
                if area <= 0.0 || height.abs() <= TOLERANCE * volume.translation.norm() {
                    return Err(MeshError::mesh_generation(format!(
                        "degenerate volume element above triangle {triangle:?}"
                    )));
                }
            }

            let base = source.nodes.clone();
            let local = base.iter().enumerate().map(|(i, &n)| (n, i)).collect();
            let first_layer_node = self.mesh.nodes.len() + self.mesh.layer_nodes;
            self.mesh.layer_nodes += base.len() * volume.layers;
            log::debug!(
                "meshed volume {} with {} layers of {} triangles",
                tag.0,
                volume.layers,
                source.triangles.len()
            );
            self.mesh.volumes.insert(
                tag,
                VolumeMesh {
                    base,
                    local,
                    first_layer_node,
                },
            );
        }
        Ok(())
    }

    /// 0-based node index of base node `node` at `layer`
    fn layer_node(mesh: &VolumeMesh, node: usize, layer: usize) -> usize {
        if layer == 0 {
            node
        } else {
            mesh.first_layer_node + (layer - 1) * mesh.base.len() + mesh.local[&node]
        }
    }

    fn layer_position(&self, volume: &ExtrudedVolume, node: usize, layer: usize) -> Point3<f64> {
        self.mesh.nodes[node] + volume.translation * (layer as f64 / volume.layers as f64)
    }

    /// Emit every element of one entity with 1-based node ids
    fn for_each_element<F>(&self, dim: Dim, tag: u32, mut emit: F) -> MeshResult<()>
    where
        F: FnMut(ElementType, &[usize]) -> MeshResult<()>,
    {
        match dim {
            Dim::Point => Ok(()),
            Dim::Curve => {
                if let Some(nodes) = self.mesh.curves.get(&CurveTag(tag)) {
                    for pair in nodes.windows(2) {
                        emit(ElementType::Line, &[pair[0] + 1, pair[1] + 1])?;
                    }
                }
                Ok(())
            }
            Dim::Surface => match self.surface(SurfaceTag(tag))? {
                Surface::Plane { .. } => {
                    if let Some(mesh) = self.mesh.surfaces.get(&SurfaceTag(tag)) {
                        for t in &mesh.triangles {
                            emit(ElementType::Triangle, &[t[0] + 1, t[1] + 1, t[2] + 1])?;
                        }
                    }
                    Ok(())
                }
                Surface::Cap { volume } => {
                    let Some((extruded, mesh, source)) = self.extruded(*volume)? else {
                        return Ok(());
                    };
                    let top = extruded.layers;
                    for t in &source.triangles {
                        let ids = t.map(|n| Self::layer_node(mesh, n, top) + 1);
                        emit(ElementType::Triangle, &ids)?;
                    }
                    Ok(())
                }
                Surface::Lateral { volume, curve } => {
                    let Some((extruded, mesh, _)) = self.extruded(*volume)? else {
                        return Ok(());
                    };
                    let Some(nodes) = self.mesh.curves.get(curve) else {
                        return Ok(());
                    };
                    for pair in nodes.windows(2) {
                        for l in 0..extruded.layers {
                            let a0 = Self::layer_node(mesh, pair[0], l) + 1;
                            let b0 = Self::layer_node(mesh, pair[1], l) + 1;
                            let a1 = Self::layer_node(mesh, pair[0], l + 1) + 1;
                            let b1 = Self::layer_node(mesh, pair[1], l + 1) + 1;
                            if extruded.recombine {
                                emit(ElementType::Quadrilateral, &[a0, b0, b1, a1])?;
                            } else {
                                let (lo0, hi0, lo1, hi1) = if pair[0] < pair[1] {
                                    (a0, b0, a1, b1)
                                } else {
                                    (b0, a0, b1, a1)
                                };
                                emit(ElementType::Triangle, &[lo0, hi0, hi1])?;
                                emit(ElementType::Triangle, &[lo0, hi1, lo1])?;
                            }
                        }
                    }
                    Ok(())
                }
            },
            Dim::Volume => {
                let Some((extruded, mesh, source)) = self.extruded(VolumeTag(tag))? else {
                    return Ok(());
                };
                for t in &source.triangles {
                    for l in 0..extruded.layers {
                        if extruded.recombine {
                            let ids = [
                                Self::layer_node(mesh, t[0], l) + 1,
                                Self::layer_node(mesh, t[1], l) + 1,
                                Self::layer_node(mesh, t[2], l) + 1,
                                Self::layer_node(mesh, t[0], l + 1) + 1,
                                Self::layer_node(mesh, t[1], l + 1) + 1,
                                Self::layer_node(mesh, t[2], l + 1) + 1,
                            ];
                            emit(ElementType::Prism, &ids)?;
                        } else {
                            for tet in self.split_prism(extruded, mesh, t, l) {
                                emit(ElementType::Tetrahedron, &tet)?;
                            }
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Split one prism into three tetrahedra. Each lateral quad is cut from
    /// its lower-numbered bottom node to its higher-numbered top node, which
    /// keeps neighbouring prisms conforming.
    fn split_prism(
        &self,
        extruded: &ExtrudedVolume,
        mesh: &VolumeMesh,
        triangle: &[usize; 3],
        layer: usize,
    ) -> [[usize; 4]; 3] {
        let mut sorted = *triangle;
        sorted.sort_unstable();
        let [i, j, k] = sorted;
        let bottom = |n| (n, layer);
        let top = |n| (n, layer + 1);
        let tets = [
            [bottom(i), bottom(j), bottom(k), top(k)],
            [bottom(i), bottom(j), top(j), top(k)],
            [bottom(i), top(i), top(j), top(k)],
        ];
        tets.map(|tet| {
            let p = tet.map(|(n, l)| self.layer_position(extruded, n, l));
            let volume = (p[1] - p[0]).cross(&(p[2] - p[0])).dot(&(p[3] - p[0]));
            let mut ids = tet.map(|(n, l)| Self::layer_node(mesh, n, l) + 1);
            if volume < 0.0 {
                ids.swap(0, 1);
            }
            ids
        })
    }

    fn extruded(
        &self,
        tag: VolumeTag,
    ) -> MeshResult<Option<(&ExtrudedVolume, &VolumeMesh, &SurfaceMesh)>> {
        let extruded = self.volume(tag)?;
        let Some(mesh) = self.mesh.volumes.get(&tag) else {
            return Ok(None);
        };
        let source = self.mesh.surfaces.get(&extruded.source).ok_or_else(|| {
            MeshError::mesh_generation(format!("surface {} lost its mesh", extruded.source.0))
        })?;
        Ok(Some((extruded, mesh, source)))
    }

    /// (dimension, entity, physical id) blocks in file order
    fn element_blocks(&self) -> Vec<(Dim, u32, u32)> {
        let entities = (1..=self.curves.len() as u32)
            .map(|t| (Dim::Curve, t))
            .chain((1..=self.surfaces.len() as u32).map(|t| (Dim::Surface, t)))
            .chain((1..=self.volumes.len() as u32).map(|t| (Dim::Volume, t)));

        let mut blocks = Vec::new();
        for (dim, tag) in entities {
            let mut tagged = false;
            for group in &self.groups {
                if group.dim == dim && group.entities.contains(&tag) {
                    blocks.push((dim, tag, group.id));
                    tagged = true;
                }
            }
            if !tagged && (self.groups.is_empty() || self.options.save_all) {
                blocks.push((dim, tag, 0));
            }
        }
        blocks
    }
}

impl MeshingKernel for BuiltinSession {
    fn add_point(&mut self, position: Point3<f64>, mesh_size: f64) -> MeshResult<PointTag> {
        if !position.coords.iter().all(|c| c.is_finite()) {
            return Err(MeshError::geometry("point coordinates must be finite"));
        }
        if !(mesh_size.is_finite() && mesh_size > 0.0) {
            return Err(MeshError::geometry(format!(
                "target mesh size must be positive, got {mesh_size}"
            )));
        }
        self.invalidate();
        self.points.push(GeoPoint {
            position,
            mesh_size,
        });
        Ok(PointTag(self.points.len() as u32))
    }

    fn add_circle_arc(
        &mut self,
        start: PointTag,
        center: PointTag,
        end: PointTag,
    ) -> MeshResult<CurveTag> {
        let c = self.point(center)?.position;
        let u = self.point(start)?.position - c;
        let v = self.point(end)?.position - c;
        let radius = u.norm();
        if radius <= TOLERANCE {
            return Err(MeshError::geometry("arc start coincides with its center"));
        }
        if (v.norm() - radius).abs() > TOLERANCE * radius {
            return Err(MeshError::geometry(
                "arc end points are not equidistant from the center",
            ));
        }
        let cross = u.cross(&v);
        if cross.norm() <= TOLERANCE * radius * radius {
            return Err(MeshError::geometry(
                "arc end points are collinear with the center",
            ));
        }

        self.invalidate();
        self.curves.push(CircleArc {
            start,
            center,
            end,
            radius,
            angle: cross.norm().atan2(u.dot(&v)),
            normal: cross.normalize(),
        });
        Ok(CurveTag(self.curves.len() as u32))
    }

    fn add_curve_loop(&mut self, curves: &[CurveTag]) -> MeshResult<LoopTag> {
        if curves.is_empty() {
            return Err(MeshError::geometry("curve loop needs at least one curve"));
        }
        for (i, tag) in curves.iter().enumerate() {
            let next = curves[(i + 1) % curves.len()];
            let here = self.curve(*tag)?;
            let there = self.curve(next)?;
            let gap = (self.point(here.end)?.position - self.point(there.start)?.position).norm();
            if here.end != there.start && gap > TOLERANCE * here.radius {
                return Err(MeshError::geometry(format!(
                    "curve loop is not closed between curves {} and {}",
                    tag.0, next.0
                )));
            }
        }
        self.invalidate();
        self.loops.push(curves.to_vec());
        Ok(LoopTag(self.loops.len() as u32))
    }

    fn add_plane_surface(&mut self, boundary: LoopTag) -> MeshResult<SurfaceTag> {
        let curves = self.curve_loop(boundary)?;
        let first = self.curve(curves[0])?;
        let normal = first.normal;
        let origin = self.point(first.start)?.position;
        for tag in curves {
            let arc = self.curve(*tag)?;
            let off_plane = (self.point(arc.end)?.position - origin).dot(&normal).abs();
            if arc.normal.dot(&normal).abs() < 1.0 - TOLERANCE
                || off_plane > TOLERANCE * arc.radius
            {
                return Err(MeshError::geometry(format!(
                    "curve loop {} is not planar",
                    boundary.0
                )));
            }
        }
        self.invalidate();
        self.surfaces.push(Surface::Plane { boundary });
        Ok(SurfaceTag(self.surfaces.len() as u32))
    }

    fn extrude(
        &mut self,
        surface: SurfaceTag,
        translation: Vector3<f64>,
        layers: usize,
        recombine: bool,
    ) -> MeshResult<Extrusion> {
        let Surface::Plane { boundary } = *self.surface(surface)? else {
            return Err(MeshError::geometry(
                "builtin kernel extrudes plane surfaces only",
            ));
        };
        if layers == 0 {
            return Err(MeshError::invalid_parameter(
                "extrusion needs at least one layer",
            ));
        }
        if self.volumes.iter().any(|v| v.source == surface) {
            return Err(MeshError::geometry(format!(
                "surface {} is already extruded",
                surface.0
            )));
        }
        let curves = self.curve_loop(boundary)?.clone();
        let normal = self.curve(curves[0])?.normal;
        let length = translation.norm();
        if !length.is_finite() || normal.dot(&translation).abs() <= TOLERANCE * length {
            return Err(MeshError::geometry(
                "extrusion direction lies in the surface plane",
            ));
        }

        self.invalidate();
        let volume = VolumeTag(self.volumes.len() as u32 + 1);
        let mut laterals = Vec::with_capacity(curves.len());
        for curve in curves {
            self.surfaces.push(Surface::Lateral { volume, curve });
            laterals.push(SurfaceTag(self.surfaces.len() as u32));
        }
        self.surfaces.push(Surface::Cap { volume });
        let cap = SurfaceTag(self.surfaces.len() as u32);
        self.volumes.push(ExtrudedVolume {
            source: surface,
            translation,
            layers,
            recombine,
        });
        Ok(Extrusion {
            cap,
            volume,
            laterals,
        })
    }

    fn synchronize(&mut self) -> MeshResult<()> {
        self.synchronized = true;
        log::debug!(
            "synchronized {} points, {} curves, {} surfaces, {} volumes",
            self.points.len(),
            self.curves.len(),
            self.surfaces.len(),
            self.volumes.len()
        );
        Ok(())
    }

    fn add_physical_group(&mut self, group: &PhysicalGroup) -> MeshResult<()> {
        self.require_synchronized("adding physical groups")?;
        if group.name.is_empty() {
            return Err(MeshError::invalid_parameter("physical group name is empty"));
        }
        if group.entities.is_empty() {
            return Err(MeshError::invalid_parameter(format!(
                "physical group {} has no entities",
                group.name
            )));
        }
        if let Some(missing) = group
            .entities
            .iter()
            .find(|&&tag| !self.entity_exists(group.dim, tag))
        {
            return Err(MeshError::invalid_parameter(format!(
                "physical group {} references unknown {:?} entity {missing}",
                group.name, group.dim
            )));
        }
        if self
            .groups
            .iter()
            .any(|g| g.dim == group.dim && g.id == group.id)
        {
            return Err(MeshError::invalid_parameter(format!(
                "physical group ({:?}, {}) already exists",
                group.dim, group.id
            )));
        }
        self.groups.push(group.clone());
        Ok(())
    }

    fn physical_group_entities(&self, dim: Dim, id: u32) -> MeshResult<Vec<u32>> {
        self.groups
            .iter()
            .find(|g| g.dim == dim && g.id == id)
            .map(|g| g.entities.clone())
            .ok_or_else(|| {
                MeshError::invalid_parameter(format!("no physical group ({dim:?}, {id})"))
            })
    }

    fn generate(&mut self, dim: Dim) -> MeshResult<()> {
        self.require_synchronized("meshing")?;
        for target in [Dim::Curve, Dim::Surface, Dim::Volume] {
            if target > dim || self.is_meshed(target) {
                continue;
            }
            match target {
                Dim::Curve => self.mesh_curves()?,
                Dim::Surface => self.mesh_surfaces()?,
                Dim::Volume => self.mesh_volumes()?,
                Dim::Point => {}
            }
            self.meshed = Some(target);
        }
        Ok(())
    }

    fn optimize(&mut self, method: Optimizer) -> MeshResult<()> {
        match method {
            Optimizer::Laplace2D => {
                if !self.is_meshed(Dim::Surface) {
                    return Err(MeshError::mesh_generation(
                        "2D mesh must be generated before smoothing",
                    ));
                }
                if self.is_meshed(Dim::Volume) {
                    return Err(MeshError::mesh_generation(
                        "2D smoothing must run before the volume mesh is generated",
                    ));
                }
                self.smooth_surfaces();
                Ok(())
            }
        }
    }

    fn write(&self, path: &Path) -> MeshResult<()> {
        let file = File::create(path).at_path(path)?;
        let mut writer = MshWriter::new(BufWriter::new(file));
        writer.write_header(&self.options.msh_version)?;

        let names: Vec<(u8, u32, &str)> = self
            .groups
            .iter()
            .map(|g| (g.dim.as_u8(), g.id, g.name.as_str()))
            .collect();
        writer.write_physical_names(&names)?;

        writer.begin_nodes(self.node_count())?;
        for (i, position) in self.mesh.nodes.iter().enumerate() {
            writer.write_node(i + 1, position)?;
        }
        for (tag, mesh) in &self.mesh.volumes {
            let extruded = self.volume(*tag)?;
            for layer in 1..=extruded.layers {
                for &node in &mesh.base {
                    let id = Self::layer_node(mesh, node, layer) + 1;
                    writer.write_node(id, &self.layer_position(extruded, node, layer))?;
                }
            }
        }
        writer.end_nodes()?;

        let blocks = self.element_blocks();
        let mut count = 0;
        for (dim, tag, _) in &blocks {
            count += self.element_count(*dim, *tag)?;
        }
        writer.begin_elements(count)?;
        for (dim, tag, physical) in blocks {
            self.for_each_element(dim, tag, |element_type, nodes| {
                writer.write_element(element_type, physical, tag, nodes)
            })?;
        }
        let written = writer.elements_written();
        writer.end_elements()?;
        writer.finish()?;

        if written != count {
            return Err(MeshError::mesh_generation(format!(
                "declared {count} elements but wrote {written}"
            )));
        }
        log::info!(
            "wrote {} nodes and {} elements to {}",
            self.node_count(),
            written,
            path.display()
        );
        Ok(())
    }

    fn element_count(&self, dim: Dim, tag: u32) -> MeshResult<usize> {
        if !self.entity_exists(dim, tag) {
            return Err(MeshError::invalid_parameter(format!(
                "unknown {dim:?} entity {tag}"
            )));
        }
        let count = match dim {
            Dim::Point => 0,
            Dim::Curve => self
                .mesh
                .curves
                .get(&CurveTag(tag))
                .map_or(0, |nodes| nodes.len() - 1),
            Dim::Surface => match self.surface(SurfaceTag(tag))? {
                Surface::Plane { .. } => self
                    .mesh
                    .surfaces
                    .get(&SurfaceTag(tag))
                    .map_or(0, |m| m.triangles.len()),
                Surface::Cap { volume } => self
                    .extruded(*volume)?
                    .map_or(0, |(_, _, source)| source.triangles.len()),
                Surface::Lateral { volume, curve } => match self.extruded(*volume)? {
                    Some((extruded, _, _)) => {
                        let segments = self.mesh.curves.get(curve).map_or(0, |n| n.len() - 1);
                        let per_quad = if extruded.recombine { 1 } else { 2 };
                        segments * extruded.layers * per_quad
                    }
                    None => 0,
                },
            },
            Dim::Volume => match self.extruded(VolumeTag(tag))? {
                Some((extruded, _, source)) => {
                    let per_prism = if extruded.recombine { 1 } else { 3 };
                    source.triangles.len() * extruded.layers * per_prism
                }
                None => 0,
            },
        };
        Ok(count)
    }
}

impl Drop for BuiltinSession {
    fn drop(&mut self) {
        log::debug!(
            "kernel session finalized ({} nodes released)",
            self.node_count()
        );
    }
}

fn lookup<T>(items: &[T], tag: u32) -> Option<&T> {
    (tag as usize).checked_sub(1).and_then(|i| items.get(i))
}

/// Twice the triangle area, signed by orientation around `normal`
fn signed_area(nodes: &[Point3<f64>], triangle: &[usize; 3], normal: &Vector3<f64>) -> f64 {
    let [a, b, c] = triangle.map(|n| nodes[n]);
    (b - a).cross(&(c - a)).dot(normal)
}

/// Triangles between a center node and the first ring
fn fan(center: usize, ring: &[(usize, f64)], triangles: &mut Vec<[usize; 3]>) {
    for i in 0..ring.len() {
        triangles.push([center, ring[i].0, ring[(i + 1) % ring.len()].0]);
    }
}

/// Triangles between two concentric rings, both ordered by increasing angle
/// and starting at angle zero. Produces `inner.len() + outer.len()` triangles.
fn stitch(inner: &[(usize, f64)], outer: &[(usize, f64)], triangles: &mut Vec<[usize; 3]>) {
    let param = |ring: &[(usize, f64)], k: usize| {
        if k == ring.len() {
            TAU + ring[0].1
        } else {
            ring[k].1
        }
    };
    let (a, b) = (inner.len(), outer.len());
    let (mut i, mut j) = (0, 0);
    while i < a || j < b {
        let advance_outer = if i == a {
            true
        } else if j == b {
            false
        } else {
            param(outer, j + 1) <= param(inner, i + 1)
        };
        if advance_outer {
            triangles.push([inner[i % a].0, outer[j].0, outer[(j + 1) % b].0]);
            j += 1;
        } else {
            triangles.push([inner[i].0, outer[j % b].0, inner[(i + 1) % a].0]);
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::msh::MshSummary;

    /// Quarter-arc disk of radius 1 with the given target size
    fn disk(session: &mut BuiltinSession, size: f64) -> SurfaceTag {
        let c = session.add_point(Point3::origin(), size).unwrap();
        let p = [(1.0, 0.0), (0.0, 1.0), (-1.0, 0.0), (0.0, -1.0)]
            .map(|(x, y)| session.add_point(Point3::new(x, y, 0.0), size).unwrap());
        let arcs: Vec<CurveTag> = (0..4)
            .map(|i| session.add_circle_arc(p[i], c, p[(i + 1) % 4]).unwrap())
            .collect();
        let boundary = session.add_curve_loop(&arcs).unwrap();
        session.add_plane_surface(boundary).unwrap()
    }

    fn session() -> BuiltinSession {
        BuiltinKernel::new().initialize().unwrap()
    }

    #[test]
    fn test_tags_are_sequential() {
        let mut s = session();
        let surface = disk(&mut s, 0.5);
        assert_eq!(surface, SurfaceTag(1));
        let extrusion = s
            .extrude(surface, Vector3::new(0.0, 0.0, 2.0), 4, true)
            .unwrap();
        assert_eq!(
            extrusion.laterals,
            vec![SurfaceTag(2), SurfaceTag(3), SurfaceTag(4), SurfaceTag(5)]
        );
        assert_eq!(extrusion.cap, SurfaceTag(6));
        assert_eq!(extrusion.volume, VolumeTag(1));
    }

    #[test]
    fn test_arc_validation() {
        let mut s = session();
        let c = s.add_point(Point3::origin(), 0.1).unwrap();
        let a = s.add_point(Point3::new(1.0, 0.0, 0.0), 0.1).unwrap();
        let b = s.add_point(Point3::new(-1.0, 0.0, 0.0), 0.1).unwrap();
        let far = s.add_point(Point3::new(0.0, 2.0, 0.0), 0.1).unwrap();
        assert!(matches!(
            s.add_circle_arc(a, c, b),
            Err(MeshError::GeometryConstruction { .. })
        ));
        assert!(s.add_circle_arc(a, c, far).is_err());
        assert!(s.add_circle_arc(a, c, PointTag(42)).is_err());
        assert!(s.add_point(Point3::origin(), 0.0).is_err());
    }

    #[test]
    fn test_open_loop_rejected() {
        let mut s = session();
        let c = s.add_point(Point3::origin(), 0.1).unwrap();
        let a = s.add_point(Point3::new(1.0, 0.0, 0.0), 0.1).unwrap();
        let b = s.add_point(Point3::new(0.0, 1.0, 0.0), 0.1).unwrap();
        let d = s.add_point(Point3::new(-1.0, 0.0, 0.0), 0.1).unwrap();
        let first = s.add_circle_arc(a, c, b).unwrap();
        let second = s.add_circle_arc(b, c, d).unwrap();
        assert!(s.add_curve_loop(&[first, second]).is_err());
    }

    #[test]
    fn test_meshing_requires_synchronize() {
        let mut s = session();
        disk(&mut s, 0.5);
        assert!(matches!(
            s.generate(Dim::Curve),
            Err(MeshError::MeshGeneration { .. })
        ));
        s.synchronize().unwrap();
        s.generate(Dim::Curve).unwrap();
        assert_eq!(s.meshed_dimension(), Some(Dim::Curve));
    }

    #[test]
    fn test_disk_mesh_counts() {
        let mut s = session();
        let surface = disk(&mut s, TAU / 16.0);
        s.synchronize().unwrap();
        s.generate(Dim::Surface).unwrap();

        for curve in 1..=4 {
            assert_eq!(s.element_count(Dim::Curve, curve).unwrap(), 4);
        }
        // rings of 5 and 11 nodes inside a 16-node boundary
        let triangles = s.element_count(Dim::Surface, surface.0).unwrap();
        assert_eq!(triangles, 5 + (5 + 11) + (11 + 16));
    }

    #[test]
    fn test_smoothing_order() {
        let mut s = session();
        let surface = disk(&mut s, 0.3);
        s.extrude(surface, Vector3::new(0.0, 0.0, 1.0), 3, true)
            .unwrap();
        s.synchronize().unwrap();
        assert!(s.optimize(Optimizer::Laplace2D).is_err());
        s.generate(Dim::Surface).unwrap();
        s.optimize(Optimizer::Laplace2D).unwrap();
        s.generate(Dim::Volume).unwrap();
        assert!(s.optimize(Optimizer::Laplace2D).is_err());
    }

    #[test]
    fn test_extruded_counts() {
        let mut s = session();
        let surface = disk(&mut s, 0.3);
        let extrusion = s
            .extrude(surface, Vector3::new(0.0, 0.0, 1.0), 5, true)
            .unwrap();
        s.synchronize().unwrap();
        s.generate(Dim::Volume).unwrap();

        let triangles = s.element_count(Dim::Surface, surface.0).unwrap();
        assert!(triangles > 0);
        assert_eq!(
            s.element_count(Dim::Surface, extrusion.cap.0).unwrap(),
            triangles
        );
        assert_eq!(
            s.element_count(Dim::Volume, extrusion.volume.0).unwrap(),
            triangles * 5
        );
        for (i, lateral) in extrusion.laterals.iter().enumerate() {
            let segments = s.element_count(Dim::Curve, i as u32 + 1).unwrap();
            assert_eq!(
                s.element_count(Dim::Surface, lateral.0).unwrap(),
                segments * 5
            );
        }
        assert!(s.element_count(Dim::Volume, 7).is_err());
    }

    #[test]
    fn test_tetrahedral_extrusion_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tets.msh");

        let mut s = session();
        let surface = disk(&mut s, 0.5);
        let extrusion = s
            .extrude(surface, Vector3::new(0.0, 0.0, 1.0), 2, false)
            .unwrap();
        s.synchronize().unwrap();
        s.generate(Dim::Volume).unwrap();
        s.write(&path).unwrap();

        let triangles = s.element_count(Dim::Surface, surface.0).unwrap();
        let tets = s.element_count(Dim::Volume, extrusion.volume.0).unwrap();
        assert_eq!(tets, triangles * 2 * 3);

        let summary = MshSummary::read(&path).unwrap();
        assert_eq!(summary.count(ElementType::Tetrahedron), tets);
        assert_eq!(summary.node_count, s.node_count());
        assert!(summary.physical_names.is_empty());
    }

    #[test]
    fn test_in_plane_extrusion_rejected() {
        let mut s = session();
        let surface = disk(&mut s, 0.5);
        assert!(s
            .extrude(surface, Vector3::new(1.0, 0.0, 0.0), 2, true)
            .is_err());
        assert!(s
            .extrude(surface, Vector3::new(0.0, 0.0, 1.0), 0, true)
            .is_err());
    }

    #[test]
    fn test_physical_group_validation() {
        let mut s = session();
        let surface = disk(&mut s, 0.5);
        let group = PhysicalGroup {
            dim: Dim::Surface,
            id: 1,
            name: "inlet".to_string(),
            entities: vec![surface.0],
        };
        assert!(s.add_physical_group(&group).is_err());
        s.synchronize().unwrap();
        s.add_physical_group(&group).unwrap();
        assert!(s.add_physical_group(&group).is_err());

        let missing = PhysicalGroup {
            entities: vec![9],
            id: 2,
            ..group
        };
        assert!(s.add_physical_group(&missing).is_err());
        assert_eq!(
            s.physical_group_entities(Dim::Surface, 1).unwrap(),
            vec![surface.0]
        );
        assert!(s.physical_group_entities(Dim::Volume, 1).is_err());
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let options = KernelOptions {
            msh_version: "4.1".to_string(),
            ..KernelOptions::default()
        };
        assert!(BuiltinKernel::with_options(options).initialize().is_err());
    }
}
