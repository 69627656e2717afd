//! Node manager integration tests against the mock build engine.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use layerfix_core::state::FsState;
use layerfix_core::testing::MockBuildEngine;
use layerfix_core::types::{Ecosystem, Platform, UpdateManifest, UpdatePackage};
use layerfix_pkgmgr::{InstallContext, NodeManager, PackageManager, PkgMgrError};

const PACKAGE_JSON: &str = include_str!("fixtures/package.json");
const LOCK_BEFORE: &str = include_str!("fixtures/package-lock.before.json");
const LOCK_AFTER: &str = include_str!("fixtures/package-lock.after.json");
const LOCK_LAGGING: &str = include_str!("fixtures/package-lock.lagging.json");

fn pkg(name: &str, installed: &str, fixed: &str) -> UpdatePackage {
    UpdatePackage {
        name: name.to_owned(),
        installed_version: installed.to_owned(),
        fixed_version: fixed.to_owned(),
        vulnerability_id: format!("GHSA-{name}"),
    }
}

fn node_manifest(updates: Vec<UpdatePackage>) -> UpdateManifest {
    let mut lang = BTreeMap::new();
    lang.insert(Ecosystem::Node, updates);
    UpdateManifest {
        arch: "arm64".to_owned(),
        lang_updates: lang,
        ..Default::default()
    }
}

fn ctx(ignore_errors: bool) -> InstallContext {
    InstallContext {
        platform: Platform::new("linux", "arm64"),
        scratch_id: "layerfix-3-linux-arm64".to_owned(),
        scratch_dir: PathBuf::from("/tmp/layerfix-node-test"),
        ignore_errors,
    }
}

fn base_state() -> FsState {
    FsState::image("docker.io/library/storefront:1.0", Platform::new("linux", "arm64"))
}

fn app_engine(root: &str, lock_after: &'static str) -> MockBuildEngine {
    MockBuildEngine::new()
        .with_file(format!("{root}/package.json"), PACKAGE_JSON)
        .with_file(format!("{root}/package-lock.json"), LOCK_BEFORE)
        .with_file_after_run("npm-update", format!("{root}/package-lock.json"), lock_after)
}

#[tokio::test]
async fn no_manifest_is_a_no_op() {
    let engine = Arc::new(MockBuildEngine::new());
    let manager = NodeManager::new(Arc::clone(&engine));
    let state = base_state();

    let outcome = manager.install_updates(&state, None, &ctx(false)).await.unwrap();
    assert!(outcome.state.same_as(&state));
    assert!(outcome.failed.is_empty());
    assert!(engine.reads().is_empty());
}

#[tokio::test]
async fn scoped_direct_dependency_is_pinned_and_transitive_is_updated() {
    let engine = Arc::new(app_engine("/app", LOCK_AFTER));
    let manager = NodeManager::new(Arc::clone(&engine));
    let m = node_manifest(vec![
        pkg("@scope/name", "1.0.4", "1.2.0"),
        pkg("semver", "7.5.1", "7.5.2"),
    ]);

    let outcome = manager
        .install_updates(&base_state(), Some(&m), &ctx(false))
        .await
        .unwrap();
    assert!(outcome.failed.is_empty());
    assert_eq!(outcome.updated.len(), 2);

    let runs = outcome.state.runs();
    assert_eq!(runs.len(), 1);
    let script = &runs[0].script;
    assert!(script.contains("cd '/app'"));
    assert!(script.contains("npm install --save-exact --no-audit --no-fund '@scope/name@1.2.0'"));
    assert!(script.contains("npm update --no-audit --no-fund 'semver'"));
    assert!(!script.contains("semver@"));
    assert!(script.contains("npm install --package-lock-only"));
    assert!(script.contains("npm cache clean --force"));
}

#[tokio::test]
async fn unpinned_direct_dependency_fails_but_transitive_shortfall_does_not() {
    let engine = Arc::new(app_engine("/app", LOCK_BEFORE));
    let manager = NodeManager::new(engine);
    let m = node_manifest(vec![
        pkg("@scope/name", "1.0.4", "1.2.0"),
        pkg("semver", "7.5.1", "7.5.2"),
    ]);

    let err = manager
        .install_updates(&base_state(), Some(&m), &ctx(false))
        .await
        .unwrap_err();
    let (platform, packages) = match err {
        PkgMgrError::PartialUpdateFailure { platform, packages } => (platform, packages),
        other => panic!("unexpected error: {other}"),
    };
    assert_eq!(platform, "linux/arm64");
    assert_eq!(packages, ["@scope/name"]);
}

#[tokio::test]
async fn transitive_update_below_fixed_version_still_patches() {
    // jest keeps its nested semver 6.3.0 after `npm update`
    let engine = Arc::new(app_engine("/app", LOCK_LAGGING));
    let manager = NodeManager::new(engine);
    let m = node_manifest(vec![
        pkg("@scope/name", "1.0.4", "1.2.0"),
        pkg("semver", "6.3.0", "7.5.2"),
    ]);

    let outcome = manager
        .install_updates(&base_state(), Some(&m), &ctx(false))
        .await
        .expect("transitive shortfall is not a failure");
    assert!(outcome.failed.is_empty());
    let updated: Vec<&str> = outcome.updated.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(updated, ["@scope/name"]);
    assert_eq!(outcome.state.runs().len(), 1);
}

#[tokio::test]
async fn package_absent_from_every_root_is_failed() {
    let engine = Arc::new(app_engine("/app", LOCK_AFTER));
    let manager = NodeManager::new(engine);
    let m = node_manifest(vec![
        pkg("semver", "7.5.1", "7.5.2"),
        pkg("left-pad", "1.1.0", "1.3.0"),
    ]);

    let outcome = manager
        .install_updates(&base_state(), Some(&m), &ctx(true))
        .await
        .unwrap();
    assert_eq!(outcome.failed, ["left-pad"]);
    assert_eq!(outcome.updated.len(), 1);
    assert!(!outcome.state.runs()[0].script.contains("left-pad"));
}

#[tokio::test]
async fn conventional_roots_are_checked_in_order_before_searching() {
    let engine = Arc::new(app_engine("/usr/src/app", LOCK_AFTER));
    let manager = NodeManager::new(Arc::clone(&engine));
    let m = node_manifest(vec![pkg("semver", "7.5.1", "7.5.2")]);

    let outcome = manager
        .install_updates(&base_state(), Some(&m), &ctx(false))
        .await
        .unwrap();
    assert!(outcome.failed.is_empty());

    let reads: Vec<String> = engine.reads().into_iter().map(|(_, p)| p).collect();
    assert_eq!(reads[0], "/app/package.json");
    assert_eq!(reads[1], "/usr/src/app/package.json");
    assert!(!reads.iter().any(|p| p == "/tmp/layerfix-node-roots"));
}

#[tokio::test]
async fn falls_back_to_bounded_search() {
    let engine = Arc::new(
        app_engine("/srv/storefront", LOCK_AFTER).with_file_after_run(
            "node-find-roots",
            "/tmp/layerfix-node-roots",
            "/srv/storefront\n/srv/storefront/node_modules/x\n",
        ),
    );
    let manager = NodeManager::new(Arc::clone(&engine)).with_search_max_depth(4);
    let state = base_state();
    let m = node_manifest(vec![pkg("@scope/name", "1.0.4", "1.2.0")]);

    let outcome = manager
        .install_updates(&state, Some(&m), &ctx(false))
        .await
        .unwrap();
    assert!(outcome.failed.is_empty());

    // the probe never lands in the result
    let runs = outcome.state.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].name, "npm-update");
    assert!(runs[0].script.contains("cd '/srv/storefront'"));
    assert!(outcome.state.parent().unwrap().same_as(&state));

    let reads: Vec<String> = engine.reads().into_iter().map(|(_, p)| p).collect();
    assert!(reads.iter().any(|p| p == "/tmp/layerfix-node-roots"));
    assert!(!reads.iter().any(|p| p.contains("node_modules")));
}

#[tokio::test]
async fn no_root_found_fails_every_package() {
    let manager = NodeManager::new(Arc::new(MockBuildEngine::new()));
    let state = base_state();
    let m = node_manifest(vec![pkg("semver", "7.5.1", "7.5.2")]);

    let outcome = manager
        .install_updates(&state, Some(&m), &ctx(true))
        .await
        .unwrap();
    assert!(outcome.state.same_as(&state));
    assert_eq!(outcome.failed, ["semver"]);
}
