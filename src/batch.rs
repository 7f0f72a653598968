//! Resolution sweeps on a bounded worker pool
//!
//! Every case runs on one pool thread with its own kernel session. Cases write
//! disjoint directories, which holds as long as the resolutions of a sweep
//! are pairwise distinct; the sweep is validated before anything is
//! scheduled. A failing case is recorded in the [`BatchReport`] and does not
//! stop the other cases.

use crate::case::{CaseProvisioner, CaseSummary};
use crate::error::{ErrorKind, IoResultExt, MeshError, MeshResult};
use crate::kernel::KernelProvider;
use crate::params::ResolutionSpec;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::Path;

/// Final state of one case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaseStatus {
    Succeeded { summary: CaseSummary },
    Failed { kind: ErrorKind, message: String },
}

/// Outcome of one resolution of a sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseOutcome {
    pub ncells: u32,
    #[serde(flatten)]
    pub status: CaseStatus,
}

impl CaseOutcome {
    fn from_result(ncells: u32, result: MeshResult<CaseSummary>) -> Self {
        let status = match result {
            Ok(summary) => CaseStatus::Succeeded { summary },
            Err(e) => {
                log::error!("case ncells={ncells} failed: {e}");
                CaseStatus::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                }
            }
        };
        Self { ncells, status }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.status, CaseStatus::Succeeded { .. })
    }

    /// 3D element count of a successful case
    #[must_use]
    pub fn elements_3d(&self) -> Option<usize> {
        match &self.status {
            CaseStatus::Succeeded { summary } => Some(summary.elements_3d()),
            CaseStatus::Failed { .. } => None,
        }
    }
}

/// Per-resolution results of a sweep, in sweep order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub workers: usize,
    pub cases: Vec<CaseOutcome>,
}

impl BatchReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.cases.iter().all(CaseOutcome::is_success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CaseOutcome> {
        self.cases.iter().filter(|c| !c.is_success())
    }

    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.cases.iter().filter(|c| c.is_success()).count()
    }

    /// Write the report as pretty-printed JSON
    pub fn write_json(&self, path: &Path) -> MeshResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).at_path(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).at_path(path)
    }

    pub fn log_summary(&self) {
        for case in &self.cases {
            match &case.status {
                CaseStatus::Succeeded { summary } => log::info!(
                    "{:>6} cells: {} 3D elements in {}",
                    case.ncells,
                    summary.elements_3d(),
                    summary.case_dir.display()
                ),
                CaseStatus::Failed { kind, message } => {
                    log::warn!("{:>6} cells: failed ({kind:?}) {message}", case.ncells);
                }
            }
        }
        log::info!(
            "{} of {} cases succeeded",
            self.succeeded(),
            self.cases.len()
        );
    }
}

/// Dispatches one case per resolution onto a fixed-size pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchScheduler {
    workers: usize,
}

impl Default for BatchScheduler {
    fn default() -> Self {
        Self::from_available_parallelism()
    }
}

impl BatchScheduler {
    /// Half of the available hardware threads, at least one
    #[must_use]
    pub fn from_available_parallelism() -> Self {
        let threads = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        Self {
            workers: (threads / 2).max(1),
        }
    }

    /// Fixed pool size; zero is raised to one
    #[must_use]
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Provision every resolution of `sweep`.
    ///
    /// Fails only if the sweep itself is invalid or the pool cannot be
    /// built; individual case failures are part of the report.
    pub fn run<P: KernelProvider>(
        &self,
        sweep: &[u32],
        provisioner: &CaseProvisioner<P>,
    ) -> MeshResult<BatchReport> {
        let specs = validate_sweep(sweep)?;
        provisioner.resources().validate()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("case-worker-{i}"))
            .build()
            .map_err(|e| MeshError::invalid_parameter(format!("cannot build worker pool: {e}")))?;
        log::info!(
            "provisioning {} cases on {} workers",
            specs.len(),
            self.workers
        );

        let cases = pool.install(|| {
            specs
                .par_iter()
                .with_max_len(1)
                .map(|&spec| CaseOutcome::from_result(spec.ncells(), provisioner.provision(spec)))
                .collect()
        });
        Ok(BatchReport {
            workers: self.workers,
            cases,
        })
    }
}

/// Reject zero and repeated resolutions
pub fn validate_sweep(sweep: &[u32]) -> MeshResult<Vec<ResolutionSpec>> {
    if sweep.is_empty() {
        return Err(MeshError::invalid_parameter("resolution sweep is empty"));
    }
    let mut seen = HashSet::with_capacity(sweep.len());
    sweep
        .iter()
        .map(|&ncells| {
            if !seen.insert(ncells) {
                return Err(MeshError::invalid_parameter(format!(
                    "resolution {ncells} appears more than once in the sweep"
                )));
            }
            ResolutionSpec::new(ncells)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::CaseLayout;
    use crate::kernel::BuiltinKernel;
    use crate::template::JobResources;
    use std::fs;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("misc/case.template/constant")).unwrap();
        fs::write(
            dir.path().join("misc/case.template/constant/transportProperties"),
            "nu 1.5e-05;\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("misc/job.sh.template"),
            "#SBATCH -J <jobname>\n#SBATCH -p <partition>\n",
        )
        .unwrap();
        dir
    }

    fn provisioner(root: &Path) -> CaseProvisioner<BuiltinKernel> {
        CaseProvisioner::new(
            BuiltinKernel::new(),
            CaseLayout::new(root),
            JobResources::default(),
        )
    }

    #[test]
    fn test_pool_size() {
        assert!(BatchScheduler::from_available_parallelism().workers() >= 1);
        assert_eq!(BatchScheduler::with_workers(0).workers(), 1);
        assert_eq!(BatchScheduler::with_workers(3).workers(), 3);
    }

    #[test]
    fn test_sweep_validation() {
        assert_eq!(validate_sweep(&[16, 32]).unwrap().len(), 2);
        assert!(validate_sweep(&[]).is_err());
        assert!(validate_sweep(&[16, 0]).is_err());
        let err = validate_sweep(&[16, 32, 16]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn test_duplicates_rejected_before_scheduling() {
        let dir = project();
        let result = BatchScheduler::with_workers(2).run(&[4, 8, 4], &provisioner(dir.path()));
        assert!(result.is_err());
        assert!(!dir.path().join("cases").exists());
    }

    #[test]
    fn test_report_in_sweep_order() {
        let dir = project();
        let report = BatchScheduler::with_workers(2)
            .run(&[8, 4, 6], &provisioner(dir.path()))
            .unwrap();
        assert!(report.is_success());
        let order: Vec<u32> = report.cases.iter().map(|c| c.ncells).collect();
        assert_eq!(order, vec![8, 4, 6]);
        for case in &report.cases {
            assert!(case.elements_3d().unwrap() > 0);
            let dir = dir.path().join(format!("cases/airflow-pipe-{}", case.ncells));
            assert!(dir.join("job.sh").is_file());
        }
    }

    #[test]
    fn test_failure_is_isolated() {
        let dir = project();
        // a plain file where the case directory should go
        fs::create_dir_all(dir.path().join("cases")).unwrap();
        fs::write(dir.path().join("cases/airflow-pipe-6"), "blocked").unwrap();

        let report = BatchScheduler::with_workers(2)
            .run(&[4, 6, 8], &provisioner(dir.path()))
            .unwrap();
        assert!(!report.is_success());
        assert_eq!(report.succeeded(), 2);
        let failed: Vec<_> = report.failures().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].ncells, 6);
        assert!(matches!(
            failed[0].status,
            CaseStatus::Failed {
                kind: ErrorKind::Io,
                ..
            }
        ));
    }

    #[test]
    fn test_report_json() {
        let dir = project();
        let layout = CaseLayout::new(dir.path());
        let report = BatchScheduler::with_workers(2)
            .run(&[15, 16, 31], &provisioner(dir.path()))
            .unwrap();
        report.write_json(&layout.summary_path()).unwrap();

        let text = fs::read_to_string(layout.summary_path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["workers"], 2);
        assert_eq!(value["cases"][0]["ncells"], 15);
        assert_eq!(value["cases"][0]["status"], "succeeded");

        let parsed: BatchReport = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, report);
    }
}
