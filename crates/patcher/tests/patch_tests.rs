//! End-to-end patch runs against the mock build engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use layerfix_core::reference::ImageRef;
use layerfix_core::state::Op;
use layerfix_core::testing::MockBuildEngine;
use layerfix_core::types::{PatchPlatform, PatchStatus, Platform};
use layerfix_patcher::{
    LayoutAssembler, PatchError, PatchSummary, Patcher, PatcherConfig, PatcherConfigBuilder,
};
use layerfix_pkgmgr::{ManagerSettings, PkgMgrError};
use tokio_util::sync::CancellationToken;

const STATUS_BEFORE: &str = include_str!("fixtures/status_before");
const STATUS_UPGRADED: &str = include_str!("fixtures/status_upgraded");

fn fixtures() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn amd64_report() -> PathBuf {
    fixtures().join("reports/report-linux-amd64.json")
}

fn arm64_report() -> PathBuf {
    fixtures().join("reports/report-linux-arm64-v8.json")
}

fn image() -> ImageRef {
    ImageRef::parse("debian:12").unwrap()
}

fn apt_engine() -> MockBuildEngine {
    MockBuildEngine::new()
        .with_file("/var/lib/dpkg/status", STATUS_BEFORE)
        .with_file_after_run("apt-upgrade", "/var/lib/dpkg/status", STATUS_UPGRADED)
}

fn config(work: &Path) -> PatcherConfigBuilder {
    PatcherConfigBuilder::new().work_dir(work)
}

fn patcher(engine: MockBuildEngine, config: PatcherConfig) -> Patcher<MockBuildEngine> {
    Patcher::from_config(Arc::new(engine), config, ManagerSettings::default()).unwrap()
}

fn with_report(platform: Platform, report: PathBuf) -> PatchPlatform {
    PatchPlatform {
        platform,
        report_file: Some(report),
        should_preserve: false,
    }
}

fn without_report(platform: Platform) -> PatchPlatform {
    PatchPlatform {
        platform,
        report_file: None,
        should_preserve: true,
    }
}

fn leftover_scratch(work: &Path) -> Vec<String> {
    std::fs::read_dir(work)
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn two_platforms_one_report_assemble_into_two_entries() {
    let work = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let output_dir = out.path().join("layout");
    let p = patcher(apt_engine(), config(work.path()).build().unwrap());

    let platforms = vec![
        with_report(Platform::new("linux", "amd64"), amd64_report()),
        without_report(Platform::new("linux", "arm64")),
    ];
    let summary = p
        .patch_all(&image(), platforms.clone(), CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.is_total_success());
    assert_eq!(summary.results.len(), 2);

    let amd = &summary.results[0];
    assert_eq!(amd.status, PatchStatus::Patched);
    assert_eq!(amd.patched_ref, "docker.io/library/debian:12-patched-amd64");
    assert_eq!(amd.os_family, "debian");
    assert_eq!(amd.updated_packages.len(), 1);
    assert_eq!(amd.updated_packages[0].package.name, "libssl3");

    let arm = &summary.results[1];
    assert_eq!(arm.status, PatchStatus::Preserved);
    assert_eq!(arm.effective_ref(), "docker.io/library/debian:12");

    let commits = p.engine().commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].state.runs().len(), 1);
    assert_eq!(commits[0].target, "docker.io/library/debian:12-patched-amd64");

    let assembler = LayoutAssembler::new(Arc::clone(p.engine()), work.path());
    let mapping = assembler
        .assemble(&summary.results, &platforms, &output_dir)
        .await
        .unwrap();

    assert_eq!(mapping.len(), 2);
    assert_eq!(mapping["linux/amd64"], "docker.io/library/debian:12-patched-amd64");
    assert_eq!(mapping["linux/arm64"], "docker.io/library/debian:12");

    let exports = p.engine().exports();
    assert_eq!(exports.len(), 1);
    let references: Vec<String> = exports[0]
        .targets
        .iter()
        .map(|(_, state)| match state.op() {
            Op::Image { reference, .. } => reference.clone(),
            other => panic!("unexpected op {other:?}"),
        })
        .collect();
    assert_eq!(
        references,
        ["docker.io/library/debian:12-patched-amd64", "docker.io/library/debian:12"]
    );

    let index: serde_json::Value =
        serde_json::from_slice(&std::fs::read(output_dir.join("index.json")).unwrap()).unwrap();
    assert_eq!(index["manifests"].as_array().unwrap().len(), 2);
    assert!(output_dir.join("oci-layout").is_file());

    // scratch directories and the staging archive are gone
    assert!(leftover_scratch(work.path()).is_empty());
}

#[tokio::test]
async fn assembling_twice_replaces_the_output() {
    let work = tempfile::tempdir().unwrap();
    let output_dir = work.path().join("layout");
    let engine = Arc::new(MockBuildEngine::new());
    let platforms = vec![without_report(Platform::new("linux", "amd64"))];
    let summary = PatchSummary::from_results(vec![layerfix_core::types::PatchResult::passthrough(
        "docker.io/library/debian:12",
        Platform::new("linux", "amd64"),
        PatchStatus::Preserved,
    )]);

    std::fs::create_dir_all(output_dir.join("stale")).unwrap();
    let assembler = LayoutAssembler::new(engine, work.path());
    assembler.assemble(&summary.results, &platforms, &output_dir).await.unwrap();
    assembler.assemble(&summary.results, &platforms, &output_dir).await.unwrap();

    assert!(!output_dir.join("stale").exists());
    assert!(output_dir.join("index.json").is_file());
}

#[tokio::test]
async fn nothing_to_assemble() {
    let work = tempfile::tempdir().unwrap();
    let assembler = LayoutAssembler::new(Arc::new(MockBuildEngine::new()), work.path());
    let err = assembler
        .assemble(&[], &[without_report(Platform::new("linux", "amd64"))], &work.path().join("out"))
        .await
        .unwrap_err();
    assert!(matches!(err, PatchError::NoPlatformImages));
}

#[tokio::test]
async fn export_failure_is_an_assembly_error() {
    let work = tempfile::tempdir().unwrap();
    let engine = Arc::new(MockBuildEngine::new().with_failing_export());
    let assembler = LayoutAssembler::new(engine, work.path());
    let results = vec![layerfix_core::types::PatchResult::passthrough(
        "docker.io/library/debian:12",
        Platform::new("linux", "amd64"),
        PatchStatus::Preserved,
    )];
    let err = assembler
        .assemble(
            &results,
            &[without_report(Platform::new("linux", "amd64"))],
            &work.path().join("out"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PatchError::Assembly(_)));
    assert!(!work.path().join("out").join("index.json").exists());
}

#[tokio::test]
async fn failed_platform_aborts_the_run_by_default() {
    let work = tempfile::tempdir().unwrap();
    let p = patcher(
        apt_engine().with_failing_commit("linux/amd64"),
        config(work.path()).max_concurrent_platforms(1).build().unwrap(),
    );
    let platforms = vec![
        with_report(Platform::new("linux", "amd64"), amd64_report()),
        with_report(Platform::new("linux", "arm64"), arm64_report()),
    ];

    let err = p
        .patch_all(&image(), platforms, CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        PatchError::Aborted { reason, partial } => {
            assert!(reason.contains("linux/amd64"), "{reason}");
            assert!(partial.results.iter().all(|r| r.platform.key() != "linux/amd64"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn failed_platform_keeps_original_when_continuing() {
    let work = tempfile::tempdir().unwrap();
    let p = patcher(
        apt_engine().with_failing_commit("linux/amd64"),
        config(work.path())
            .continue_on_platform_error(true)
            .build()
            .unwrap(),
    );
    let platforms = vec![
        with_report(Platform::new("linux", "amd64"), amd64_report()),
        with_report(Platform::new("linux", "arm64"), arm64_report()),
    ];

    let summary = p
        .patch_all(&image(), platforms, CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.is_partial());
    assert_eq!(summary.failed_platforms, ["linux/amd64"]);
    let amd = &summary.results[0];
    assert!(matches!(&amd.status, PatchStatus::Failed { reason } if reason.contains("mock commit failure")));
    assert_eq!(amd.effective_ref(), "docker.io/library/debian:12");
    assert_eq!(summary.results[1].status, PatchStatus::Patched);
    assert_eq!(summary.results[1].patched_ref, "docker.io/library/debian:12-patched-arm64");
}

#[tokio::test]
async fn cancellation_aborts_in_flight_platforms() {
    let work = tempfile::tempdir().unwrap();
    let p = patcher(
        apt_engine().with_commit_delay(Duration::from_secs(30)),
        config(work.path()).build().unwrap(),
    );
    let platforms = vec![
        with_report(Platform::new("linux", "amd64"), amd64_report()),
        with_report(Platform::new("linux", "arm64"), arm64_report()),
    ];

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = p.patch_all(&image(), platforms, cancel).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(10));
    match err {
        PatchError::Aborted { reason, partial } => {
            assert_eq!(reason, "cancelled");
            assert!(partial.results.is_empty());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(p.engine().commits().is_empty());
    assert!(leftover_scratch(work.path()).is_empty());
}

#[tokio::test]
async fn package_failure_names_platform_and_package() {
    let work = tempfile::tempdir().unwrap();
    // the status file never changes, so libssl3 stays behind
    let engine = MockBuildEngine::new().with_file("/var/lib/dpkg/status", STATUS_BEFORE);
    let p = patcher(engine, config(work.path()).build().unwrap());

    let err = p
        .patch_platform(
            &image(),
            &with_report(Platform::new("linux", "amd64"), amd64_report()),
        )
        .await
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("linux/amd64"), "{msg}");
    assert!(msg.contains("libssl3"), "{msg}");
    assert!(matches!(
        err.root(),
        PatchError::Package(PkgMgrError::PartialUpdateFailure { .. })
    ));
    // the failed platform still cleans up its scratch directory
    assert!(leftover_scratch(work.path()).is_empty());
}

#[tokio::test]
async fn ignored_package_failure_is_a_partial_success() {
    let work = tempfile::tempdir().unwrap();
    let engine = MockBuildEngine::new().with_file("/var/lib/dpkg/status", STATUS_BEFORE);
    let p = patcher(engine, config(work.path()).ignore_errors(true).build().unwrap());

    let summary = p
        .patch_all(
            &image(),
            vec![with_report(Platform::new("linux", "amd64"), amd64_report())],
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(summary.is_partial());
    assert!(summary.failed_platforms.is_empty());
    assert_eq!(summary.results[0].failed_packages, ["libssl3"]);
}

#[tokio::test]
async fn single_report_commits_the_plain_patched_tag() {
    let work = tempfile::tempdir().unwrap();
    let p = patcher(apt_engine(), config(work.path()).build().unwrap());

    let result = p
        .patch_single(&image(), &amd64_report(), Platform::new("linux", "amd64"))
        .await
        .unwrap();
    assert_eq!(result.status, PatchStatus::Patched);
    assert_eq!(result.patched_ref, "docker.io/library/debian:12-patched");

    let tagged = patcher(apt_engine(), config(work.path()).tag("2024-03").build().unwrap());
    let result = tagged
        .patch_single(&image(), &amd64_report(), Platform::new("linux", "amd64"))
        .await
        .unwrap();
    assert_eq!(result.patched_ref, "docker.io/library/debian:2024-03");
}
