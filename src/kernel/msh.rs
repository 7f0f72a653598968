//! MSH 2.2 ASCII codec.
//!
//! The writer streams sections in the order gmsh-compatible readers expect:
//! `$MeshFormat`, `$PhysicalNames`, `$Nodes`, `$Elements`. Every element
//! carries two tags, the physical id followed by the elementary entity tag.
//!
//! The reader only summarizes a file (version, physical names, node and
//! element counts); it is used to inspect written cases.

use crate::error::{IoResultExt, MeshError, MeshResult};
use nalgebra::Point3;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// Element types this crate emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementType {
    Line = 1,
    Triangle = 2,
    Quadrilateral = 3,
    Tetrahedron = 4,
    Prism = 6,
}

impl ElementType {
    /// MSH element type number
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Nodes per element
    #[must_use]
    pub const fn node_count(self) -> usize {
        match self {
            Self::Line => 2,
            Self::Triangle => 3,
            Self::Quadrilateral | Self::Tetrahedron => 4,
            Self::Prism => 6,
        }
    }

    /// Topological dimension of the element
    #[must_use]
    pub const fn dimension(self) -> u8 {
        match self {
            Self::Line => 1,
            Self::Triangle | Self::Quadrilateral => 2,
            Self::Tetrahedron | Self::Prism => 3,
        }
    }

    fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Line),
            2 => Some(Self::Triangle),
            3 => Some(Self::Quadrilateral),
            4 => Some(Self::Tetrahedron),
            6 => Some(Self::Prism),
            _ => None,
        }
    }
}

/// Streaming MSH 2.2 writer
pub struct MshWriter<W: Write> {
    writer: W,
    next_element: usize,
}

impl<W: Write> MshWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            next_element: 1,
        }
    }

    /// `$MeshFormat` section for ASCII output with 8-byte floats
    pub fn write_header(&mut self, version: &str) -> MeshResult<()> {
        writeln!(self.writer, "$MeshFormat")?;
        writeln!(self.writer, "{version} 0 8")?;
        writeln!(self.writer, "$EndMeshFormat")?;
        Ok(())
    }

    /// `$PhysicalNames` section; skipped when there are no names
    pub fn write_physical_names(&mut self, names: &[(u8, u32, &str)]) -> MeshResult<()> {
        if names.is_empty() {
            return Ok(());
        }
        writeln!(self.writer, "$PhysicalNames")?;
        writeln!(self.writer, "{}", names.len())?;
        for (dim, id, name) in names {
            writeln!(self.writer, "{dim} {id} \"{name}\"")?;
        }
        writeln!(self.writer, "$EndPhysicalNames")?;
        Ok(())
    }

    pub fn begin_nodes(&mut self, count: usize) -> MeshResult<()> {
        writeln!(self.writer, "$Nodes")?;
        writeln!(self.writer, "{count}")?;
        Ok(())
    }

    /// Node line; `id` is 1-based
    pub fn write_node(&mut self, id: usize, position: &Point3<f64>) -> MeshResult<()> {
        writeln!(
            self.writer,
            "{id} {} {} {}",
            position.x, position.y, position.z
        )?;
        Ok(())
    }

    pub fn end_nodes(&mut self) -> MeshResult<()> {
        writeln!(self.writer, "$EndNodes")?;
        Ok(())
    }

    pub fn begin_elements(&mut self, count: usize) -> MeshResult<()> {
        writeln!(self.writer, "$Elements")?;
        writeln!(self.writer, "{count}")?;
        Ok(())
    }

    /// Element line with physical and elementary tags; `nodes` are 1-based
    pub fn write_element(
        &mut self,
        element_type: ElementType,
        physical: u32,
        elementary: u32,
        nodes: &[usize],
    ) -> MeshResult<()> {
        debug_assert_eq!(nodes.len(), element_type.node_count());
        write!(
            self.writer,
            "{} {} 2 {physical} {elementary}",
            self.next_element,
            element_type.code()
        )?;
        for node in nodes {
            write!(self.writer, " {node}")?;
        }
        writeln!(self.writer)?;
        self.next_element += 1;
        Ok(())
    }

    pub fn end_elements(&mut self) -> MeshResult<()> {
        writeln!(self.writer, "$EndElements")?;
        Ok(())
    }

    /// Number of elements written so far
    #[must_use]
    pub fn elements_written(&self) -> usize {
        self.next_element - 1
    }

    pub fn finish(mut self) -> MeshResult<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Summary of an MSH 2.2 file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MshSummary {
    pub version: String,
    /// (dimension, id) -> name
    pub physical_names: BTreeMap<(u8, u32), String>,
    pub node_count: usize,
    pub elements_by_type: BTreeMap<ElementType, usize>,
    /// physical id -> number of elements tagged with it
    pub elements_by_physical: BTreeMap<u32, usize>,
}

impl MshSummary {
    /// Read and summarize an MSH 2.2 ASCII file
    pub fn read(path: impl AsRef<Path>) -> MeshResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).at_path(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> MeshResult<Self> {
        let mut summary = Self::default();
        let mut lines = reader.lines();

        while let Some(line) = lines.next() {
            let line = line?;
            match line.trim() {
                "$MeshFormat" => {
                    let format = next_line(&mut lines, "MeshFormat")?;
                    summary.version = format
                        .split_whitespace()
                        .next()
                        .unwrap_or_default()
                        .to_string();
                }
                "$PhysicalNames" => {
                    let count = parse_count(&next_line(&mut lines, "PhysicalNames")?)?;
                    for _ in 0..count {
                        let entry = next_line(&mut lines, "PhysicalNames")?;
                        let mut parts = entry.splitn(3, ' ');
                        let dim = parse_field::<u8>(parts.next(), &entry)?;
                        let id = parse_field::<u32>(parts.next(), &entry)?;
                        let name = parts.next().unwrap_or_default().trim().trim_matches('"');
                        summary.physical_names.insert((dim, id), name.to_string());
                    }
                }
                "$Nodes" => {
                    summary.node_count = parse_count(&next_line(&mut lines, "Nodes")?)?;
                    for _ in 0..summary.node_count {
                        next_line(&mut lines, "Nodes")?;
                    }
                }
                "$Elements" => {
                    let count = parse_count(&next_line(&mut lines, "Elements")?)?;
                    for _ in 0..count {
                        let entry = next_line(&mut lines, "Elements")?;
                        let mut parts = entry.split_whitespace().skip(1);
                        let code = parse_field::<u32>(parts.next(), &entry)?;
                        let ntags = parse_field::<usize>(parts.next(), &entry)?;
                        let physical = if ntags > 0 {
                            parse_field::<u32>(parts.next(), &entry)?
                        } else {
                            0
                        };
                        let element_type = ElementType::from_code(code).ok_or_else(|| {
                            MeshError::mesh_generation(format!("unsupported element type {code}"))
                        })?;
                        *summary.elements_by_type.entry(element_type).or_default() += 1;
                        *summary.elements_by_physical.entry(physical).or_default() += 1;
                    }
                }
                _ => {}
            }
        }

        if summary.version.is_empty() {
            return Err(MeshError::mesh_generation("missing $MeshFormat section"));
        }
        Ok(summary)
    }

    /// Number of elements of a given type
    #[must_use]
    pub fn count(&self, element_type: ElementType) -> usize {
        self.elements_by_type.get(&element_type).copied().unwrap_or(0)
    }

    /// Number of 3D elements
    #[must_use]
    pub fn volume_elements(&self) -> usize {
        self.elements_by_type
            .iter()
            .filter(|(t, _)| t.dimension() == 3)
            .map(|(_, n)| n)
            .sum()
    }
}

fn next_line<I>(lines: &mut I, section: &str) -> MeshResult<String>
where
    I: Iterator<Item = std::io::Result<String>>,
{
    match lines.next() {
        Some(line) => Ok(line?),
        None => Err(MeshError::mesh_generation(format!(
            "unexpected end of file in ${section}"
        ))),
    }
}

fn parse_count(line: &str) -> MeshResult<usize> {
    line.trim()
        .parse()
        .map_err(|_| MeshError::mesh_generation(format!("invalid count line: {line}")))
}

fn parse_field<T: std::str::FromStr>(field: Option<&str>, line: &str) -> MeshResult<T> {
    field
        .and_then(|f| f.trim().parse().ok())
        .ok_or_else(|| MeshError::mesh_generation(format!("invalid line: {line}")))
}
