//! 패처 에러 타입
//!
//! [`PatchError`]는 탐색, 플랫폼별 파이프라인, 레이아웃 조립 중 발생하는 에러입니다.
//! `From<PatchError> for LayerfixError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 전파할 수 있습니다.

use layerfix_core::error::{
    AssemblyError, ConfigError, DiscoveryError, EngineError, LayerfixError,
};
use layerfix_pkgmgr::PkgMgrError;
use layerfix_report::ReportError;

use crate::summary::PatchSummary;

/// 패처 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// 이미지가 멀티 플랫폼 인덱스가 아님
    #[error("image is not multi-platform: {0}")]
    NotMultiPlatform(String),

    /// 로컬/원격 어디서도 플랫폼을 확인할 수 없음
    #[error("failed to resolve platforms for {reference}: {reason}")]
    PlatformResolution {
        /// 이미지 참조
        reference: String,
        /// 실패 사유
        reason: String,
    },

    /// 조립할 플랫폼 이미지가 없음
    #[error("no platform images found")]
    NoPlatformImages,

    /// 레이아웃 조립 실패
    #[error("assembly failed: {0}")]
    Assembly(String),

    /// 리포트 파싱 에러
    #[error(transparent)]
    Report(#[from] ReportError),

    /// 패키지 매니저 에러
    #[error(transparent)]
    Package(#[from] PkgMgrError),

    /// 빌드 엔진 에러
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// 플랫폼 하나의 파이프라인 실패
    #[error("platform {platform} failed: {source}")]
    Platform {
        /// 플랫폼 키
        platform: String,
        /// 원인
        #[source]
        source: Box<PatchError>,
    },

    /// 전체 실행 중단 (취소 또는 치명적 플랫폼 실패)
    ///
    /// 중단 전에 기록된 결과를 함께 전달합니다.
    #[error("patch run aborted: {reason}")]
    Aborted {
        /// 중단 사유
        reason: String,
        /// 중단 시점까지 기록된 결과
        partial: Box<PatchSummary>,
    },

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 로컬 I/O 에러
    #[error("io error: {path}: {source}")]
    Io {
        /// 관련 경로
        path: String,
        /// 원본 I/O 에러
        source: std::io::Error,
    },
}

impl PatchError {
    /// 플랫폼 키를 붙입니다. 이미 붙어 있으면 그대로 둡니다.
    pub fn for_platform(self, platform: impl Into<String>) -> Self {
        match self {
            err @ (Self::Platform { .. } | Self::Aborted { .. }) => err,
            err => Self::Platform {
                platform: platform.into(),
                source: Box::new(err),
            },
        }
    }

    /// 가장 안쪽 원인 (플랫폼 래핑 제거)
    pub fn root(&self) -> &PatchError {
        match self {
            Self::Platform { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<PatchError> for LayerfixError {
    fn from(err: PatchError) -> Self {
        match err {
            PatchError::NotMultiPlatform(reference) => {
                LayerfixError::Discovery(DiscoveryError::NotMultiPlatform(reference))
            }
            PatchError::PlatformResolution { reference, reason } => {
                LayerfixError::Discovery(DiscoveryError::Resolution { reference, reason })
            }
            PatchError::NoPlatformImages => {
                LayerfixError::Assembly(AssemblyError::NoPlatformImages)
            }
            PatchError::Assembly(reason) => LayerfixError::Assembly(AssemblyError::Failed(reason)),
            PatchError::Report(e) => e.into(),
            PatchError::Package(e) => e.into(),
            PatchError::Engine(e) => LayerfixError::Engine(e),
            PatchError::Platform { source, .. } => (*source).into(),
            err @ PatchError::Aborted { .. } => {
                LayerfixError::Assembly(AssemblyError::Failed(err.to_string()))
            }
            PatchError::Config { field, reason } => {
                LayerfixError::Config(ConfigError::InvalidValue { field, reason })
            }
            PatchError::Io { source, .. } => LayerfixError::Io(source),
        }
    }
}

impl From<DiscoveryError> for PatchError {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::NotMultiPlatform(reference) => Self::NotMultiPlatform(reference),
            DiscoveryError::Resolution { reference, reason } => {
                Self::PlatformResolution { reference, reason }
            }
        }
    }
}
