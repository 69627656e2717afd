//! 패키지 매니저 에러 타입
//!
//! [`PkgMgrError`]는 업데이트 계획, 실행, 검증 중 발생하는 에러입니다.
//! `From<PkgMgrError> for LayerfixError`로 상위 타입에 전파됩니다.

use layerfix_core::error::{EngineError, LayerfixError, PackageError};

/// 패키지 매니저 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum PkgMgrError {
    /// 일부 패키지를 업데이트하지 못함 (`ignore_errors`가 꺼져 있을 때)
    #[error("failed to update packages on {platform}: {}", packages.join(", "))]
    PartialUpdateFailure {
        /// 플랫폼 키
        platform: String,
        /// 실패한 패키지 이름
        packages: Vec<String>,
    },

    /// 등록된 매니저가 없는 생태계 또는 OS family
    #[error("unsupported ecosystem: {0}")]
    EcosystemUnsupported(String),

    /// 패키지 데이터베이스 재구성 실패
    #[error("reconciliation failed on {platform}: {reason}")]
    Reconciliation {
        /// 플랫폼 키
        platform: String,
        /// 실패 사유
        reason: String,
    },

    /// 빌드 엔진 에러
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// 호스트 scratch 디렉토리 I/O 에러
    #[error("io error: {path}: {source}")]
    Io {
        /// 관련 경로
        path: String,
        /// 원본 I/O 에러
        source: std::io::Error,
    },
}

impl From<PkgMgrError> for LayerfixError {
    fn from(err: PkgMgrError) -> Self {
        match err {
            PkgMgrError::PartialUpdateFailure { platform, packages } => {
                LayerfixError::Package(PackageError::PartialUpdate { platform, packages })
            }
            PkgMgrError::EcosystemUnsupported(name) => {
                LayerfixError::Package(PackageError::EcosystemUnsupported(name))
            }
            PkgMgrError::Reconciliation { platform, reason } => {
                LayerfixError::Package(PackageError::Reconciliation { platform, reason })
            }
            PkgMgrError::Engine(e) => LayerfixError::Engine(e),
            PkgMgrError::Io { source, .. } => LayerfixError::Io(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_update_names_platform_and_packages() {
        let err = PkgMgrError::PartialUpdateFailure {
            platform: "linux/amd64".to_owned(),
            packages: vec!["libssl3".to_owned(), "libc6".to_owned()],
        };
        assert_eq!(
            err.to_string(),
            "failed to update packages on linux/amd64: libssl3, libc6"
        );
    }

    #[test]
    fn converts_partial_update() {
        let err = PkgMgrError::PartialUpdateFailure {
            platform: "linux/arm64".to_owned(),
            packages: vec!["zlib1g".to_owned()],
        };
        let top: LayerfixError = err.into();
        assert!(matches!(
            top,
            LayerfixError::Package(PackageError::PartialUpdate { .. })
        ));
    }

    #[test]
    fn converts_unsupported() {
        let top: LayerfixError = PkgMgrError::EcosystemUnsupported("alpine".to_owned()).into();
        assert!(top.to_string().contains("alpine"));
    }

    #[test]
    fn engine_error_is_transparent() {
        let err: PkgMgrError = EngineError::Connection("socket closed".to_owned()).into();
        assert_eq!(err.to_string(), "engine connection failed: socket closed");
        let top: LayerfixError = err.into();
        assert!(matches!(top, LayerfixError::Engine(_)));
    }
}
