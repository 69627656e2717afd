//! 플랫폼별 패치 파이프라인과 멀티 플랫폼 오케스트레이션
//!
//! [`Patcher`]는 플랫폼 하나를 다음 상태 기계로 처리합니다.
//!
//! ```text
//! Discovered ──(should_preserve)──────────────────────────► Preserved
//!     │
//!     ▼
//! ReportParsed ──(NoPatchableResults / 업데이트 없음)──────► Recorded
//!     │
//!     ▼
//! Patched (OS 매니저 → 언어 생태계 매니저 순서) ──► commit ──► Recorded
//! ```
//!
//! [`Patcher::patch_all`]은 플랫폼마다 독립된 task를 띄우고
//! `Semaphore`로 동시 실행 수를 제한합니다. 공유 `CancellationToken`이
//! 취소되거나 치명적 플랫폼 실패가 나면 진행 중인 모든 플랫폼을 중단합니다.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use layerfix_core::engine::BuildEngine;
use layerfix_core::metrics as m;
use layerfix_core::reference::ImageRef;
use layerfix_core::state::FsState;
use layerfix_core::types::{
    Ecosystem, PatchPlatform, PatchResult, PatchStatus, Platform, UpdateManifest, UpdatedPackage,
};
use layerfix_pkgmgr::{
    DynPackageManager, InstallContext, ManagerRegistry, ManagerSettings, PkgMgrError,
};
use layerfix_report::{ReportError, ReportParser, parser_for};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PatcherConfig;
use crate::emulation::emulation_available;
use crate::error::PatchError;
use crate::summary::PatchSummary;

/// 플랫폼 파이프라인 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformStage {
    /// 탐색됨
    Discovered,
    /// 리포트 파싱 완료
    ReportParsed,
    /// 업데이트 단계가 그래프에 추가됨
    Patched,
    /// 결과 기록됨 (종료)
    Recorded,
    /// 리포트가 없어 원본 보존 (종료)
    Preserved,
}

impl std::fmt::Display for PlatformStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Discovered => "discovered",
            Self::ReportParsed => "report_parsed",
            Self::Patched => "patched",
            Self::Recorded => "recorded",
            Self::Preserved => "preserved",
        };
        f.write_str(s)
    }
}

/// 패치 오케스트레이터
///
/// 모든 필드가 `Arc`이므로 복제 비용이 작고, 플랫폼 task마다 하나씩 복제해 넘깁니다.
pub struct Patcher<E: BuildEngine> {
    engine: Arc<E>,
    registry: Arc<ManagerRegistry>,
    parser: Arc<dyn ReportParser>,
    config: Arc<PatcherConfig>,
    seq: Arc<AtomicU64>,
}

impl<E: BuildEngine> Clone for Patcher<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            registry: Arc::clone(&self.registry),
            parser: Arc::clone(&self.parser),
            config: Arc::clone(&self.config),
            seq: Arc::clone(&self.seq),
        }
    }
}

impl<E: BuildEngine> Patcher<E> {
    /// 구성 요소를 직접 지정해 생성합니다.
    pub fn new(
        engine: Arc<E>,
        registry: ManagerRegistry,
        parser: Arc<dyn ReportParser>,
        config: PatcherConfig,
    ) -> Self {
        Self {
            engine,
            registry: Arc::new(registry),
            parser,
            config: Arc::new(config),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 설정에서 파서와 기본 매니저 레지스트리를 만들어 생성합니다.
    pub fn from_config(
        engine: Arc<E>,
        config: PatcherConfig,
        settings: ManagerSettings,
    ) -> Result<Self, PatchError> {
        config.validate()?;
        let parser: Arc<dyn ReportParser> =
            Arc::from(parser_for(&config.scanner, config.parse_options())?);
        let registry = ManagerRegistry::with_defaults(Arc::clone(&engine), settings);
        Ok(Self::new(engine, registry, parser, config))
    }

    /// 빌드 엔진
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// 리포트 파서
    pub fn parser(&self) -> Arc<dyn ReportParser> {
        Arc::clone(&self.parser)
    }

    /// 설정
    pub fn config(&self) -> &PatcherConfig {
        &self.config
    }

    /// 플랫폼 하나의 결과 이미지 참조
    ///
    /// `<tag>-<suffix>-<arch>[-<variant>]`, 태그가 지정되었으면 `<tag>-<arch>[-<variant>]`.
    pub fn platform_target(&self, image: &ImageRef, platform: &Platform) -> String {
        let tag = format!("{}{}", self.base_tag(image), platform.tag_suffix());
        image.with_tag(tag).to_string()
    }

    /// 단일 플랫폼 실행의 결과 이미지 참조
    pub fn single_target(&self, image: &ImageRef) -> String {
        image.with_tag(self.base_tag(image)).to_string()
    }

    fn base_tag(&self, image: &ImageRef) -> String {
        self.config
            .tag
            .clone()
            .unwrap_or_else(|| image.patched_tag(&self.config.tag_suffix))
    }

    /// 플랫폼 하나를 처리합니다.
    ///
    /// 반환된 에러에는 항상 플랫폼 키가 붙어 있습니다.
    pub async fn patch_platform(
        &self,
        image: &ImageRef,
        platform: &PatchPlatform,
    ) -> Result<PatchResult, PatchError> {
        let scratch = self.reserve_scratch(&platform.platform);
        let result = self.patch_platform_in(image, platform, &scratch).await;
        scratch.remove().await;
        result
    }

    async fn patch_platform_in(
        &self,
        image: &ImageRef,
        platform: &PatchPlatform,
        scratch: &ScratchDir,
    ) -> Result<PatchResult, PatchError> {
        let target = self.platform_target(image, &platform.platform);
        self.run_platform(image, platform, &target, scratch).await
    }

    /// 단일 플랫폼 이미지를 리포트 파일 하나로 패치합니다.
    pub async fn patch_single(
        &self,
        image: &ImageRef,
        report: &Path,
        platform: Platform,
    ) -> Result<PatchResult, PatchError> {
        let candidate = PatchPlatform {
            platform: platform.normalized(),
            report_file: Some(report.to_path_buf()),
            should_preserve: false,
        };
        let target = self.single_target(image);
        let scratch = self.reserve_scratch(&candidate.platform);
        let result = self.run_platform(image, &candidate, &target, &scratch).await;
        scratch.remove().await;
        result
    }

    async fn run_platform(
        &self,
        image: &ImageRef,
        platform: &PatchPlatform,
        target: &str,
        scratch: &ScratchDir,
    ) -> Result<PatchResult, PatchError> {
        let key = platform.platform.key();
        let started = Instant::now();
        let result = self.advance(image, platform, target, scratch).await;
        metrics::histogram!(m::PATCH_PLATFORM_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(r) => match r.status {
                PatchStatus::Patched => {
                    metrics::counter!(m::PATCH_PLATFORMS_PATCHED_TOTAL).increment(1)
                }
                PatchStatus::Preserved | PatchStatus::Unchanged => {
                    metrics::counter!(m::PATCH_PLATFORMS_PRESERVED_TOTAL).increment(1)
                }
                PatchStatus::Failed { .. } => {
                    metrics::counter!(m::PATCH_PLATFORMS_FAILED_TOTAL).increment(1)
                }
            },
            Err(_) => metrics::counter!(m::PATCH_PLATFORMS_FAILED_TOTAL).increment(1),
        }
        result.map_err(|e| e.for_platform(key))
    }

    async fn advance(
        &self,
        image: &ImageRef,
        platform: &PatchPlatform,
        target: &str,
        scratch: &ScratchDir,
    ) -> Result<PatchResult, PatchError> {
        let original = image.to_string();
        let key = platform.platform.key();
        debug!(platform = %key, stage = %PlatformStage::Discovered, "platform stage");

        let report = match (&platform.report_file, platform.should_preserve) {
            (Some(report), false) => report.clone(),
            _ => {
                info!(platform = %key, stage = %PlatformStage::Preserved, "no report, preserving platform");
                return Ok(PatchResult::passthrough(
                    original,
                    platform.platform.clone(),
                    PatchStatus::Preserved,
                ));
            }
        };

        let manifest = match self.parse_report(report).await {
            Ok(manifest) => manifest,
            Err(PatchError::Report(ReportError::NoPatchableResults { path })) => {
                info!(platform = %key, report = %path, "no patchable results, keeping original");
                return Ok(PatchResult::passthrough(
                    original,
                    platform.platform.clone(),
                    PatchStatus::Unchanged,
                ));
            }
            Err(e) => return Err(e),
        };
        info!(
            platform = %key,
            stage = %PlatformStage::ReportParsed,
            os = %manifest.os.family,
            updates = manifest.update_count(),
            rejected = manifest.rejected.len(),
            "report parsed"
        );

        let mut result = PatchResult::passthrough(
            original.clone(),
            platform.platform.clone(),
            PatchStatus::Unchanged,
        );
        result.os_family = manifest.os.family.clone();
        result
            .failed_packages
            .extend(manifest.rejected.iter().map(|p| p.name.clone()));

        if manifest.is_empty() {
            self.check_failures(&key, &result.failed_packages)?;
            debug!(platform = %key, stage = %PlatformStage::Recorded, "nothing to update");
            return Ok(result);
        }

        if !emulation_available(&platform.platform) {
            warn!(platform = %key, "no emulation for foreign platform, run steps may fail");
        }

        scratch.create().await?;
        let ctx = InstallContext {
            platform: platform.platform.clone(),
            scratch_id: scratch.id.clone(),
            scratch_dir: scratch.path.clone(),
            ignore_errors: self.config.ignore_errors,
        };

        let base = FsState::image(original.clone(), platform.platform.clone());
        let mut state = base.clone();

        // OS 먼저: 언어 생태계 업데이트가 갱신된 런타임에 의존할 수 있음
        if !manifest.os_updates.is_empty() {
            let manager = self.registry.for_os_family(&manifest.os.family)?;
            state = self
                .install(manager.as_ref(), &state, &manifest, &ctx, &mut result)
                .await?;
        }
        for (ecosystem, updates) in &manifest.lang_updates {
            if updates.is_empty() {
                continue;
            }
            let manager = self.registry.for_ecosystem(*ecosystem)?;
            state = self
                .install(manager.as_ref(), &state, &manifest, &ctx, &mut result)
                .await?;
        }
        debug!(platform = %key, stage = %PlatformStage::Patched, depth = state.depth(), "updates applied");

        self.check_failures(&key, &result.failed_packages)?;

        if state.same_as(&base) {
            info!(platform = %key, stage = %PlatformStage::Recorded, "no package changed, keeping original");
            return Ok(result);
        }

        result.patched_ref = self
            .engine
            .commit(&state, &platform.platform, target)
            .await?;
        result.status = PatchStatus::Patched;

        info!(
            platform = %key,
            stage = %PlatformStage::Recorded,
            image = %result.patched_ref,
            updated = result.updated_packages.len(),
            failed = result.failed_packages.len(),
            "platform patched"
        );
        Ok(result)
    }

    async fn install(
        &self,
        manager: &dyn DynPackageManager,
        state: &FsState,
        manifest: &UpdateManifest,
        ctx: &InstallContext,
        result: &mut PatchResult,
    ) -> Result<FsState, PatchError> {
        let ecosystem: Ecosystem = manager.ecosystem();
        let outcome = manager.install_updates(state, Some(manifest), ctx).await?;

        let label = ecosystem.to_string();
        metrics::counter!(m::PACKAGES_UPDATED_TOTAL, m::LABEL_ECOSYSTEM => label.clone(), m::LABEL_RESULT => "success")
            .increment(outcome.updated.len() as u64);
        metrics::counter!(m::PACKAGES_UPDATED_TOTAL, m::LABEL_ECOSYSTEM => label, m::LABEL_RESULT => "failure")
            .increment(outcome.failed.len() as u64);

        for name in &outcome.failed {
            warn!(platform = %ctx.platform, ecosystem = %ecosystem, package = %name, "package not updated");
        }
        result.failed_packages.extend(outcome.failed);
        result
            .updated_packages
            .extend(outcome.updated.into_iter().map(|package| UpdatedPackage {
                ecosystem,
                package,
            }));
        Ok(outcome.state)
    }

    fn check_failures(&self, key: &str, failed: &[String]) -> Result<(), PatchError> {
        if failed.is_empty() || self.config.ignore_errors {
            return Ok(());
        }
        Err(PkgMgrError::PartialUpdateFailure {
            platform: key.to_owned(),
            packages: failed.to_vec(),
        }
        .into())
    }

    async fn parse_report(&self, report: PathBuf) -> Result<UpdateManifest, PatchError> {
        let parser = Arc::clone(&self.parser);
        let source = report.display().to_string();
        let manifest = tokio::task::spawn_blocking(move || parser.parse(&report))
            .await
            .map_err(|e| PatchError::Io {
                path: source,
                source: std::io::Error::other(format!("report parse task failed: {e}")),
            })??;
        Ok(manifest)
    }

    /// 프로세스 안에서 유일하고 플랫폼이 드러나는 scratch 이름
    fn scratch_id(&self, key: &str) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let platform: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        format!("layerfix-{}-{seq}-{platform}", std::process::id())
    }

    fn reserve_scratch(&self, platform: &Platform) -> ScratchDir {
        let id = self.scratch_id(&platform.key());
        ScratchDir {
            path: self.config.work_dir.join(&id),
            id,
        }
    }

    /// 여러 플랫폼을 동시에 처리합니다.
    ///
    /// 결과는 입력 순서를 따릅니다. `continue_on_platform_error`가 켜져 있으면
    /// 실패한 플랫폼은 원본을 가리키는 `Failed` 결과로 기록되고 나머지는 계속됩니다.
    /// 꺼져 있으면 첫 실패에서 나머지를 모두 취소하고 `Aborted`를 반환합니다.
    pub async fn patch_all(
        &self,
        image: &ImageRef,
        platforms: Vec<PatchPlatform>,
        cancel: CancellationToken,
    ) -> Result<PatchSummary, PatchError> {
        let total = platforms.len();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_platforms));
        let token = cancel.child_token();
        let mut tasks = JoinSet::new();

        info!(image = %image, platforms = total, max_concurrent = self.config.max_concurrent_platforms, "patch run started");

        for (idx, platform) in platforms.into_iter().enumerate() {
            let patcher = self.clone();
            let image = image.clone();
            let semaphore = Arc::clone(&semaphore);
            let token = token.clone();
            tasks.spawn(async move {
                let scratch = patcher.reserve_scratch(&platform.platform);
                let work = async {
                    let _permit = semaphore.acquire_owned().await.map_err(|e| {
                        PatchError::Aborted {
                            reason: format!("scheduler closed: {e}"),
                            partial: Box::default(),
                        }
                    })?;
                    patcher.patch_platform_in(&image, &platform, &scratch).await
                };
                let outcome = tokio::select! {
                    biased;
                    () = token.cancelled() => None,
                    r = work => Some(r),
                };
                // also runs when the platform was cancelled mid-step
                scratch.remove().await;
                (idx, platform, outcome)
            });
        }

        let mut slots: Vec<Option<PatchResult>> = vec![None; total];
        let mut abort: Option<String> = None;

        while let Some(joined) = tasks.join_next().await {
            let (idx, platform, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!(error = %e, "platform task failed");
                    if abort.is_none() {
                        abort = Some(format!("platform task failed: {e}"));
                        token.cancel();
                    }
                    continue;
                }
            };

            match outcome {
                Some(Ok(result)) => slots[idx] = Some(result),
                Some(Err(e)) if self.config.continue_on_platform_error && abort.is_none() => {
                    warn!(platform = %platform.platform, error = %e, "platform failed, keeping original");
                    slots[idx] = Some(PatchResult::passthrough(
                        image.to_string(),
                        platform.platform,
                        PatchStatus::Failed {
                            reason: e.to_string(),
                        },
                    ));
                }
                Some(Err(e)) => {
                    error!(platform = %platform.platform, error = %e, "platform failed, aborting run");
                    if abort.is_none() {
                        abort = Some(e.to_string());
                        token.cancel();
                    }
                }
                None => debug!(platform = %platform.platform, "platform cancelled"),
            }
        }

        let summary = PatchSummary::from_results(slots.into_iter().flatten().collect());

        if let Some(reason) = abort {
            return Err(PatchError::Aborted {
                reason,
                partial: Box::new(summary),
            });
        }
        if cancel.is_cancelled() {
            return Err(PatchError::Aborted {
                reason: "cancelled".to_owned(),
                partial: Box::new(summary),
            });
        }

        info!(
            image = %image,
            patched = summary.patched_count(),
            preserved = summary.preserved_count(),
            unchanged = summary.unchanged_count(),
            failed = summary.failed_count(),
            "patch run finished"
        );
        Ok(summary)
    }
}

/// 플랫폼 전용 호스트 scratch 디렉토리
///
/// 커밋이 끝날 때까지 빌드 컨텍스트로 쓰입니다. 경로는 미리 예약하고
/// 업데이트가 있을 때만 만들며, 플랫폼 task가 성공, 실패, 취소 어느 경우든
/// 마지막에 [`ScratchDir::remove`]를 기다립니다.
struct ScratchDir {
    id: String,
    path: PathBuf,
}

impl ScratchDir {
    async fn create(&self) -> Result<(), PatchError> {
        tokio::fs::create_dir_all(&self.path)
            .await
            .map_err(|source| PatchError::Io {
                path: self.path.display().to_string(),
                source,
            })
    }

    async fn remove(&self) {
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => debug!(dir = %self.path.display(), "scratch directory removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(dir = %self.path.display(), error = %e, "failed to remove scratch directory")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layerfix_core::testing::MockBuildEngine;
    use layerfix_report::{ParseOptions, TrivyParser};

    fn patcher(config: PatcherConfig) -> Patcher<MockBuildEngine> {
        Patcher::new(
            Arc::new(MockBuildEngine::new()),
            ManagerRegistry::new(),
            Arc::new(TrivyParser::new(ParseOptions::default())),
            config,
        )
    }

    #[test]
    fn per_platform_tags() {
        let p = patcher(PatcherConfig::default());
        let image = ImageRef::parse("nginx:1.25").unwrap();
        assert_eq!(
            p.platform_target(&image, &Platform::new("linux", "arm").with_variant("v7")),
            "docker.io/library/nginx:1.25-patched-arm-v7"
        );
        assert_eq!(p.single_target(&image), "docker.io/library/nginx:1.25-patched");

        let tagged = patcher(PatcherConfig {
            tag: Some("fixed".to_owned()),
            ..PatcherConfig::default()
        });
        assert_eq!(
            tagged.platform_target(&image, &Platform::new("linux", "amd64")),
            "docker.io/library/nginx:fixed-amd64"
        );
    }

    #[test]
    fn scratch_ids_are_unique_and_name_the_platform() {
        let p = patcher(PatcherConfig::default());
        let a = p.scratch_id("linux/arm/v7");
        let b = p.clone().scratch_id("linux/arm/v7");
        assert_ne!(a, b);
        assert!(a.ends_with("-linux-arm-v7"));
    }

    #[tokio::test]
    async fn preserved_platform_short_circuits() {
        let p = patcher(PatcherConfig::default());
        let image = ImageRef::parse("nginx:1.25").unwrap();
        let platform = PatchPlatform {
            platform: Platform::new("linux", "s390x"),
            report_file: None,
            should_preserve: true,
        };
        let result = p.patch_platform(&image, &platform).await.unwrap();
        assert_eq!(result.status, PatchStatus::Preserved);
        assert_eq!(result.patched_ref, "docker.io/library/nginx:1.25");
        assert!(p.engine().commits().is_empty());
    }

    #[test]
    fn stage_names() {
        assert_eq!(PlatformStage::ReportParsed.to_string(), "report_parsed");
    }
}
