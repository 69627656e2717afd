//! 패키지 매니저 trait
//!
//! [`PackageManager`]는 생태계마다 하나씩 구현되는 업데이트 인터페이스입니다.
//! 구현체는 입력 상태에서 새 상태를 파생할 뿐 어떤 단계도 즉시 실행하지 않습니다.
//! 실행은 빌드 엔진이 파일을 읽거나 이미지를 커밋할 때 일어납니다.
//!
//! # 실패 처리
//!
//! - `ignore_errors = false`: 업데이트하지 못한 패키지가 있으면
//!   [`PkgMgrError::PartialUpdateFailure`]를 반환합니다.
//! - `ignore_errors = true`: 실패 패키지를 [`InstallOutcome::failed`]에 모으고
//!   성공한 만큼 반영된 상태를 반환합니다.

use std::future::Future;
use std::path::PathBuf;

use layerfix_core::engine::BoxFuture;
use layerfix_core::state::FsState;
use layerfix_core::types::{Ecosystem, Platform, UpdateManifest, UpdatePackage};

use crate::error::PkgMgrError;

/// 한 번의 업데이트 호출에 필요한 플랫폼별 문맥
#[derive(Debug, Clone)]
pub struct InstallContext {
    /// 대상 플랫폼
    pub platform: Platform,
    /// 프로세스 안에서 유일한, 플랫폼이 포함된 scratch 이름
    ///
    /// 이미지 안의 `/tmp/<scratch_id>` 작업 경로로 사용됩니다.
    pub scratch_id: String,
    /// 이 플랫폼 전용 호스트 scratch 디렉토리
    pub scratch_dir: PathBuf,
    /// 패키지 실패를 무시하고 계속할지 여부
    pub ignore_errors: bool,
}

/// 업데이트 결과
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    /// 업데이트 단계가 추가된 새 상태
    pub state: FsState,
    /// 업데이트하지 못한 패키지 이름
    pub failed: Vec<String>,
    /// 업데이트가 확인된 패키지
    pub updated: Vec<UpdatePackage>,
}

impl InstallOutcome {
    /// 아무것도 바꾸지 않은 결과
    pub fn unchanged(state: &FsState) -> Self {
        Self {
            state: state.clone(),
            failed: Vec::new(),
            updated: Vec::new(),
        }
    }

    /// `ignore_errors`가 꺼져 있고 실패가 있으면 에러로 바꿉니다.
    pub fn into_result(self, ctx: &InstallContext) -> Result<Self, PkgMgrError> {
        if !ctx.ignore_errors && !self.failed.is_empty() {
            return Err(PkgMgrError::PartialUpdateFailure {
                platform: ctx.platform.key(),
                packages: self.failed,
            });
        }
        Ok(self)
    }
}

/// 생태계별 패키지 매니저
pub trait PackageManager: Send + Sync + 'static {
    /// 담당 생태계
    fn ecosystem(&self) -> Ecosystem;

    /// 매니페스트의 해당 생태계 업데이트를 `state` 위에 적용합니다.
    ///
    /// `manifest`가 `None`이거나 해당 생태계 업데이트가 비어 있으면
    /// 입력 상태를 그대로 반환합니다.
    fn install_updates(
        &self,
        state: &FsState,
        manifest: Option<&UpdateManifest>,
        ctx: &InstallContext,
    ) -> impl Future<Output = Result<InstallOutcome, PkgMgrError>> + Send;
}

/// dyn-compatible 패키지 매니저 trait
///
/// `PackageManager`는 RPITIT를 사용하므로 `dyn PackageManager`가 불가합니다.
/// 레지스트리는 이 trait으로 매니저를 보관합니다.
pub trait DynPackageManager: Send + Sync {
    /// 담당 생태계
    fn ecosystem(&self) -> Ecosystem;

    /// 업데이트를 적용합니다.
    fn install_updates<'a>(
        &'a self,
        state: &'a FsState,
        manifest: Option<&'a UpdateManifest>,
        ctx: &'a InstallContext,
    ) -> BoxFuture<'a, Result<InstallOutcome, PkgMgrError>>;
}

/// PackageManager를 구현한 타입은 자동으로 DynPackageManager도 구현됩니다.
impl<T: PackageManager> DynPackageManager for T {
    fn ecosystem(&self) -> Ecosystem {
        PackageManager::ecosystem(self)
    }

    fn install_updates<'a>(
        &'a self,
        state: &'a FsState,
        manifest: Option<&'a UpdateManifest>,
        ctx: &'a InstallContext,
    ) -> BoxFuture<'a, Result<InstallOutcome, PkgMgrError>> {
        Box::pin(PackageManager::install_updates(self, state, manifest, ctx))
    }
}

/// 매니페스트에서 생태계에 해당하는 업데이트 목록을 꺼냅니다.
pub fn updates_for(manifest: Option<&UpdateManifest>, ecosystem: Ecosystem) -> &[UpdatePackage] {
    match manifest {
        None => &[],
        Some(m) if ecosystem.is_os_level() => &m.os_updates,
        Some(m) => m.lang(ecosystem),
    }
}

/// 셸 스크립트에 인자로 넘길 수 있도록 작은따옴표로 감쌉니다.
pub(crate) fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
