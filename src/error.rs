//! Error handling for the pipe2mesh pipeline
//!
//! Every stage of case generation reports failures through [`MeshError`].
//! Within one case an error aborts the remaining steps; at batch scale the
//! scheduler records the error per resolution and keeps going.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for pipe2mesh operations
pub type MeshResult<T> = Result<T, MeshError>;

/// Error types for pipe2mesh operations
#[derive(Error, Debug)]
pub enum MeshError {
    /// Invalid resolution, flag value or sweep definition
    #[error("Invalid parameter: {message}")]
    InvalidParameter { message: String },

    /// The kernel rejected the requested topology
    #[error("Geometry construction error: {message}")]
    GeometryConstruction { message: String },

    /// A meshing or optimization pass failed or produced an invalid mesh
    #[error("Mesh generation error: {message}")]
    MeshGeneration { message: String },

    /// Job-script rendering failed
    #[error("Template error: {message}")]
    Template { message: String },

    /// File I/O errors without path context
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// File I/O errors tied to a specific path
    #[error("I/O error at {path:?}: {source}")]
    IoAt {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Report serialization errors
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

/// Coarse classification of a [`MeshError`], used in batch reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidParameter,
    GeometryConstruction,
    MeshGeneration,
    Template,
    Io,
}

impl MeshError {
    /// Create an invalid parameter error
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    /// Create a geometry construction error
    pub fn geometry(message: impl Into<String>) -> Self {
        Self::GeometryConstruction {
            message: message.into(),
        }
    }

    /// Create a mesh generation error
    pub fn mesh_generation(message: impl Into<String>) -> Self {
        Self::MeshGeneration {
            message: message.into(),
        }
    }

    /// Create a template rendering error
    pub fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
        }
    }

    /// Attach a path to an I/O error
    pub fn io_at(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::IoAt {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Classification of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            Self::GeometryConstruction { .. } => ErrorKind::GeometryConstruction,
            Self::MeshGeneration { .. } => ErrorKind::MeshGeneration,
            Self::Template { .. } => ErrorKind::Template,
            Self::Io { .. } | Self::IoAt { .. } | Self::Json { .. } => ErrorKind::Io,
        }
    }
}

/// Extension trait for attaching a path to `std::io::Result`
pub trait IoResultExt<T> {
    fn at_path(self, path: impl AsRef<Path>) -> MeshResult<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at_path(self, path: impl AsRef<Path>) -> MeshResult<T> {
        self.map_err(|e| MeshError::io_at(path, e))
    }
}
