//! Node.js (npm) 패키지 매니저
//!
//! `package.json`과 잠금 파일(`package-lock.json` 또는 `npm-shrinkwrap.json`)이
//! 함께 있는 디렉토리만 애플리케이션 루트로 취급합니다. `node_modules` 안은
//! 잠금 파일 무결성을 깨뜨리므로 절대 건드리지 않습니다.
//!
//! # 루트 탐색
//!
//! 1. 설정된 관례 경로를 순서대로 확인합니다.
//! 2. 하나도 맞지 않으면 버리는 파생 상태에서 깊이 제한 `find`를 한 번 실행합니다.
//!
//! # 업데이트
//!
//! `package.json`에 선언된 패키지는 수정 버전으로 정확히 고정하고, 선언되지 않은
//! 전이 의존성은 `npm update`를 시도합니다. 실행 후 잠금 파일을 다시 읽어 검증하며,
//! 고정에 실패한 직접 의존성만 실패로 보고합니다. 전이 의존성 미달은 경고로 남깁니다.

pub mod plan;

use std::collections::BTreeSet;
use std::sync::Arc;

use layerfix_core::engine::BuildEngine;
use layerfix_core::state::{FsState, RunSpec};
use layerfix_core::types::{Ecosystem, UpdateManifest, UpdatePackage};
use tracing::{debug, info, warn};

use crate::error::PkgMgrError;
use crate::manager::{InstallContext, InstallOutcome, PackageManager, updates_for};
use crate::unique::unique_latest;

use self::plan::{PlannedUpdate, RootPlan, UpdateKind};

/// 잠금 파일 이름 (우선순위 순)
pub const LOCKFILES: [&str; 2] = ["package-lock.json", "npm-shrinkwrap.json"];

/// 기본 재귀 탐색 깊이
pub const DEFAULT_SEARCH_MAX_DEPTH: u32 = 6;

/// 탐색 결과를 기록하는 이미지 내 경로
const ROOTS_OUTPUT: &str = "/tmp/layerfix-node-roots";

const FIND_ROOTS_SCRIPT: &str = r#"set -u
: > /tmp/layerfix-node-roots
find / -maxdepth "$LAYERFIX_MAX_DEPTH" \( -name node_modules -o -path /proc -o -path /sys -o -path /dev \) -prune \
  -o -type f -name package.json -print 2>/dev/null | while read -r f; do
  d=$(dirname "$f")
  if [ -f "$d/package-lock.json" ] || [ -f "$d/npm-shrinkwrap.json" ]; then
    echo "$d" >> /tmp/layerfix-node-roots
  fi
done
"#;

/// 탐색된 애플리케이션 루트
#[derive(Debug, Clone)]
struct AppRoot {
    dir: String,
    lockfile: String,
    manifest: Vec<u8>,
    lock: Vec<u8>,
}

/// npm 패키지 매니저
pub struct NodeManager<E> {
    engine: Arc<E>,
    app_roots: Vec<String>,
    search_max_depth: u32,
}

impl<E: BuildEngine> NodeManager<E> {
    /// 기본 관례 경로로 생성합니다.
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            engine,
            app_roots: ["/app", "/usr/src/app", "/opt/app", "/src", "/workspace"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            search_max_depth: DEFAULT_SEARCH_MAX_DEPTH,
        }
    }

    /// 관례 경로를 바꿉니다.
    pub fn with_app_roots(mut self, roots: Vec<String>) -> Self {
        self.app_roots = roots;
        self
    }

    /// 재귀 탐색 깊이를 바꿉니다.
    pub fn with_search_max_depth(mut self, depth: u32) -> Self {
        self.search_max_depth = depth.max(1);
        self
    }

    /// 디렉토리가 애플리케이션 루트이면 매니페스트와 잠금 파일을 읽어 반환합니다.
    async fn probe_root(
        &self,
        state: &FsState,
        ctx: &InstallContext,
        dir: &str,
    ) -> Result<Option<AppRoot>, PkgMgrError> {
        let dir = dir.trim().trim_end_matches('/');
        if dir.is_empty() || dir.split('/').any(|c| c == "node_modules") {
            return Ok(None);
        }
        let Some(manifest) = self
            .engine
            .read_file(state, &ctx.platform, &format!("{dir}/package.json"))
            .await?
        else {
            return Ok(None);
        };
        for name in LOCKFILES {
            let lockfile = format!("{dir}/{name}");
            if let Some(lock) = self.engine.read_file(state, &ctx.platform, &lockfile).await? {
                return Ok(Some(AppRoot {
                    dir: dir.to_owned(),
                    lockfile,
                    manifest: manifest.to_vec(),
                    lock: lock.to_vec(),
                }));
            }
        }
        Ok(None)
    }

    async fn find_roots(
        &self,
        state: &FsState,
        ctx: &InstallContext,
    ) -> Result<Vec<AppRoot>, PkgMgrError> {
        let mut roots = Vec::new();
        for dir in &self.app_roots {
            if let Some(root) = self.probe_root(state, ctx, dir).await? {
                roots.push(root);
            }
        }
        if !roots.is_empty() {
            return Ok(roots);
        }

        debug!(platform = %ctx.platform, depth = self.search_max_depth, "no conventional node root, searching");
        let probe = state.run(
            RunSpec::new("node-find-roots", FIND_ROOTS_SCRIPT)
                .env("LAYERFIX_MAX_DEPTH", self.search_max_depth.to_string()),
        );
        let listing = self
            .engine
            .read_file(&probe, &ctx.platform, ROOTS_OUTPUT)
            .await?
            .unwrap_or_default();

        let mut seen = BTreeSet::new();
        for dir in String::from_utf8_lossy(&listing).lines() {
            if !seen.insert(dir.trim().to_owned()) {
                continue;
            }
            if let Some(root) = self.probe_root(state, ctx, dir).await? {
                roots.push(root);
            }
        }
        Ok(roots)
    }
}

impl<E: BuildEngine> PackageManager for NodeManager<E> {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Node
    }

    async fn install_updates(
        &self,
        state: &FsState,
        manifest: Option<&UpdateManifest>,
        ctx: &InstallContext,
    ) -> Result<InstallOutcome, PkgMgrError> {
        let requested = updates_for(manifest, Ecosystem::Node);
        if requested.is_empty() {
            return Ok(InstallOutcome::unchanged(state));
        }

        let (valid, invalid): (Vec<UpdatePackage>, Vec<UpdatePackage>) = requested
            .iter()
            .cloned()
            .partition(|p| plan::is_valid_package_name(&p.name));
        let mut failed: Vec<String> = invalid.into_iter().map(|p| p.name).collect();
        let updates = unique_latest(&valid, plan::compare_versions);

        let roots = if updates.is_empty() {
            Vec::new()
        } else {
            self.find_roots(state, ctx).await?
        };
        if roots.is_empty() && !updates.is_empty() {
            warn!(platform = %ctx.platform, "no node application root with a lock file found");
        }

        let mut plans = Vec::with_capacity(roots.len());
        let mut covered = BTreeSet::new();
        for root in &roots {
            let declared = plan::declared_dependencies(&root.manifest);
            let locked: BTreeSet<String> = plan::locked_packages(&root.lock)
                .into_iter()
                .map(|p| p.name)
                .collect();
            let planned: Vec<PlannedUpdate> = updates
                .iter()
                .filter(|u| declared.contains(&u.name) || locked.contains(&u.name))
                .map(|u| PlannedUpdate {
                    package: u.clone(),
                    kind: plan::classify(&u.name, &declared),
                })
                .collect();
            if planned.is_empty() {
                continue;
            }
            for p in &planned {
                covered.insert(p.package.name.clone());
                debug!(
                    platform = %ctx.platform,
                    root = %root.dir,
                    package = %p.package.name,
                    direct = p.kind == UpdateKind::Direct,
                    "planned npm update"
                );
            }
            plans.push(RootPlan {
                root: root.dir.clone(),
                lockfile: root.lockfile.clone(),
                updates: planned,
            });
        }

        failed.extend(
            updates
                .iter()
                .filter(|u| !covered.contains(&u.name))
                .map(|u| u.name.clone()),
        );

        let mut outcome = if plans.is_empty() {
            InstallOutcome::unchanged(state)
        } else {
            let updated_state = state.run(RunSpec::new("npm-update", plan::render_script(&plans)));
            let mut root_failures = BTreeSet::new();
            let mut lagging = BTreeSet::new();
            for p in &plans {
                let lock = self
                    .engine
                    .read_file(&updated_state, &ctx.platform, &p.lockfile)
                    .await?
                    .unwrap_or_default();
                let verification = plan::verify(p, &lock);
                for l in &verification.lagging {
                    warn!(
                        platform = %ctx.platform,
                        root = %p.root,
                        package = %l.name,
                        locked = %l.locked_version,
                        fixed = %l.fixed_version,
                        "transitive npm update did not reach the fixed version"
                    );
                    lagging.insert(l.name.clone());
                }
                root_failures.extend(verification.failed);
            }
            info!(
                platform = %ctx.platform,
                roots = plans.len(),
                failed = root_failures.len(),
                lagging = lagging.len(),
                "npm updates applied"
            );
            failed.extend(root_failures.iter().cloned());
            InstallOutcome {
                state: updated_state,
                failed: Vec::new(),
                updated: updates
                    .iter()
                    .filter(|u| {
                        covered.contains(&u.name)
                            && !root_failures.contains(&u.name)
                            && !lagging.contains(&u.name)
                    })
                    .cloned()
                    .collect(),
            }
        };

        outcome.failed = failed;
        if !outcome.failed.is_empty() {
            warn!(
                platform = %ctx.platform,
                failed = %outcome.failed.join(", "),
                "some node packages were not updated"
            );
        }
        outcome.into_result(ctx)
    }
}
