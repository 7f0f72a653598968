//! Simulation case provisioning
//!
//! A case is a directory `cases/<prefix><ncells>` holding a copy of the case
//! template tree, a zero-byte marker file for post-processing viewers, the
//! mesh, and a rendered cluster job script. Re-running a resolution
//! overwrites the files in place. A failure partway through leaves whatever
//! was already written.

use crate::defaults;
use crate::error::{IoResultExt, MeshResult};
use crate::kernel::KernelProvider;
use crate::mesh::MeshPipeline;
use crate::params::{MeshParameters, ResolutionSpec};
use crate::statistics::MeshStatistics;
use crate::template::{JobResources, JobScriptConfig};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Where case inputs are read from and cases are written to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseLayout {
    /// Project root; relative entries below are resolved against it
    pub root: PathBuf,
    pub case_template: PathBuf,
    pub job_template: PathBuf,
    pub cases_dir: PathBuf,
    pub case_prefix: String,
    pub marker_extension: String,
    pub mesh_file: String,
    pub job_script: String,
}

impl Default for CaseLayout {
    fn default() -> Self {
        Self::new(".")
    }
}

impl CaseLayout {
    /// Standard layout under `root`: `misc/` inputs, `cases/` outputs
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            case_template: PathBuf::from(defaults::CASE_TEMPLATE_DIR),
            job_template: PathBuf::from(defaults::JOB_TEMPLATE_FILE),
            cases_dir: PathBuf::from(defaults::CASES_DIR),
            case_prefix: defaults::CASE_PREFIX.to_string(),
            marker_extension: defaults::MARKER_EXTENSION.to_string(),
            mesh_file: defaults::MESH_FILE.to_string(),
            job_script: defaults::JOB_SCRIPT.to_string(),
        }
    }

    #[must_use]
    pub fn with_case_template(mut self, path: impl Into<PathBuf>) -> Self {
        self.case_template = path.into();
        self
    }

    #[must_use]
    pub fn with_job_template(mut self, path: impl Into<PathBuf>) -> Self {
        self.job_template = path.into();
        self
    }

    #[must_use]
    pub fn with_cases_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.cases_dir = path.into();
        self
    }

    #[must_use]
    pub fn with_case_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.case_prefix = prefix.into();
        self
    }

    /// Case name for a resolution, e.g. `airflow-pipe-64`
    #[must_use]
    pub fn case_name(&self, ncells: u32) -> String {
        format!("{}{ncells}", self.case_prefix)
    }

    #[must_use]
    pub fn case_template_dir(&self) -> PathBuf {
        self.root.join(&self.case_template)
    }

    #[must_use]
    pub fn job_template_path(&self) -> PathBuf {
        self.root.join(&self.job_template)
    }

    #[must_use]
    pub fn cases_root(&self) -> PathBuf {
        self.root.join(&self.cases_dir)
    }

    #[must_use]
    pub fn case_dir(&self, ncells: u32) -> PathBuf {
        self.cases_root().join(self.case_name(ncells))
    }

    /// Location of the batch report
    #[must_use]
    pub fn summary_path(&self) -> PathBuf {
        self.cases_root().join(defaults::SUMMARY_FILE)
    }
}

/// Files and mesh figures of one provisioned case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseSummary {
    pub name: String,
    pub case_dir: PathBuf,
    pub marker: PathBuf,
    pub mesh_path: PathBuf,
    pub job_script: PathBuf,
    pub parameters: MeshParameters,
    pub statistics: MeshStatistics,
}

impl CaseSummary {
    /// Number of 3D elements in the case mesh
    #[must_use]
    pub fn elements_3d(&self) -> usize {
        self.statistics.volume_elements
    }
}

/// Materializes complete simulation cases
#[derive(Debug, Clone)]
pub struct CaseProvisioner<P> {
    pipeline: MeshPipeline<P>,
    layout: CaseLayout,
    resources: JobResources,
}

impl<P: KernelProvider> CaseProvisioner<P> {
    #[must_use]
    pub fn new(provider: P, layout: CaseLayout, resources: JobResources) -> Self {
        Self {
            pipeline: MeshPipeline::new(provider),
            layout,
            resources,
        }
    }

    #[must_use]
    pub fn layout(&self) -> &CaseLayout {
        &self.layout
    }

    #[must_use]
    pub fn resources(&self) -> &JobResources {
        &self.resources
    }

    /// Create or refresh the case for `spec`
    pub fn provision(&self, spec: ResolutionSpec) -> MeshResult<CaseSummary> {
        self.resources.validate()?;

        let ncells = spec.ncells();
        let name = self.layout.case_name(ncells);
        let case_dir = self.layout.case_dir(ncells);
        log::info!("provisioning {name} in {}", case_dir.display());

        let copied = copy_tree(&self.layout.case_template_dir(), &case_dir)?;
        log::debug!("{name}: {copied} template files copied");

        let marker = case_dir.join(format!("{name}.{}", self.layout.marker_extension));
        File::create(&marker).at_path(&marker)?;

        let mesh_path = case_dir.join(&self.layout.mesh_file);
        let outcome = self.pipeline.run(spec, &mesh_path)?;

        let job_template = self.layout.job_template_path();
        let template = fs::read_to_string(&job_template).at_path(&job_template)?;
        let script = JobScriptConfig::for_case(name.as_str(), &self.resources).render(&template)?;
        let job_script = case_dir.join(&self.layout.job_script);
        fs::write(&job_script, script).at_path(&job_script)?;

        log::info!(
            "{name}: {} 3D elements, job script {}",
            outcome.volume_elements(),
            job_script.display()
        );
        Ok(CaseSummary {
            name,
            case_dir,
            marker,
            mesh_path,
            job_script,
            parameters: outcome.parameters,
            statistics: outcome.statistics,
        })
    }
}

/// Recursively copy `src` into `dst`, overwriting existing files.
///
/// Returns the number of files copied.
pub fn copy_tree(src: &Path, dst: &Path) -> MeshResult<usize> {
    let entries = fs::read_dir(src).at_path(src)?;
    fs::create_dir_all(dst).at_path(dst)?;

    let mut copied = 0;
    for entry in entries {
        let entry = entry.at_path(src)?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if entry.file_type().at_path(&from)?.is_dir() {
            copied += copy_tree(&from, &to)?;
        } else {
            fs::copy(&from, &to).at_path(&from)?;
            copied += 1;
        }
    }
    Ok(copied)
}
