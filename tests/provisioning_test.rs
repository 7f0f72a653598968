//! Case provisioning with the templates shipped under `misc/`.

use pipe2mesh::case::copy_tree;
use pipe2mesh::kernel::msh::{ElementType, MshSummary};
use pipe2mesh::prelude::*;
use std::fs;
use std::path::Path;

/// Project root in a scratch directory with a copy of `misc/`
fn scratch_project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let misc = Path::new(env!("CARGO_MANIFEST_DIR")).join("misc");
    copy_tree(&misc, &dir.path().join("misc")).unwrap();
    dir
}

/// `<identifier>` tokens left in rendered text
fn unresolved(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find('<') {
        rest = &rest[open + 1..];
        if let Some(close) = rest.find('>') {
            let name = &rest[..close];
            if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                tokens.push(name.to_string());
            }
        }
    }
    tokens
}

#[test]
fn test_provision_64() {
    let dir = scratch_project();
    let provisioner = CaseProvisioner::new(
        BuiltinKernel::new(),
        CaseLayout::new(dir.path()),
        JobResources::default(),
    );
    let summary = provisioner.provision(ResolutionSpec::new(64).unwrap()).unwrap();

    let case_dir = dir.path().join("cases/airflow-pipe-64");
    assert_eq!(summary.case_dir, case_dir);
    assert!(case_dir.join("system/controlDict").is_file());
    assert!(case_dir.join("0/U").is_file());

    let marker = case_dir.join("airflow-pipe-64.foam");
    assert_eq!(fs::metadata(&marker).unwrap().len(), 0);

    let mesh = MshSummary::read(case_dir.join("mesh.msh")).unwrap();
    assert_eq!(mesh.version, "2.2");
    assert_eq!(mesh.count(ElementType::Prism), summary.elements_3d());
    assert!(summary.elements_3d() > 0);

    let script = fs::read_to_string(case_dir.join("job.sh")).unwrap();
    assert!(script.contains("--job-name=airflow-pipe-64"));
    assert!(script.contains("debug-cpu"));
    assert!(script.contains("--nodes=1\n"));
    assert!(script.contains("--ntasks=40\n"));
    assert!(script.contains("0-04:00:00"));
    assert!(unresolved(&script).is_empty(), "{:?}", unresolved(&script));
}

#[test]
fn test_batch_report_written() {
    let dir = scratch_project();
    let provisioner = CaseProvisioner::new(
        BuiltinKernel::new(),
        CaseLayout::new(dir.path()),
        JobResources::default().with_partition("compute").with_ntasks(8),
    );
    let report = BatchScheduler::with_workers(2)
        .run(&[8, 12, 16], &provisioner)
        .unwrap();
    assert!(report.is_success());
    report
        .write_json(&provisioner.layout().summary_path())
        .unwrap();

    let counts: Vec<usize> = report.cases.iter().filter_map(|c| c.elements_3d()).collect();
    assert_eq!(counts.len(), 3);
    assert!(counts.windows(2).all(|w| w[0] <= w[1]));

    for ncells in [8, 12, 16] {
        let script =
            fs::read_to_string(dir.path().join(format!("cases/airflow-pipe-{ncells}/job.sh")))
                .unwrap();
        assert!(script.contains("--partition=compute"));
        assert!(script.contains("mpiexec -n 8 "));
    }
    assert!(dir.path().join("cases/summary.json").is_file());
}

#[test]
fn test_duplicate_sweep_touches_nothing() {
    let dir = scratch_project();
    let provisioner = CaseProvisioner::new(
        BuiltinKernel::new(),
        CaseLayout::new(dir.path()),
        JobResources::default(),
    );
    let err = BatchScheduler::with_workers(2)
        .run(&[16, 32, 16], &provisioner)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    assert!(!dir.path().join("cases").exists());
}
