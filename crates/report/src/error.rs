//! 리포트 파서 에러 타입
//!
//! [`ReportError`]는 리포트 파싱 중 발생할 수 있는 모든 에러를 나타냅니다.
//! `From<ReportError> for LayerfixError` 구현을 통해 `?` 연산자로
//! 상위 에러 타입으로 전파됩니다.
//!
//! # 에러 카테고리
//!
//! - **리포트 내용**: `Malformed`, `NoPatchableResults`, `ConflictingResults`
//! - **스캐너 선택**: `UnknownScanner`
//! - **파일 I/O**: `Io`, `FileTooBig`

use layerfix_core::error::{LayerfixError, ParseError};

/// 리포트 파서 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// 구조화된 데이터가 아니거나 스키마와 맞지 않음
    #[error("malformed report: {path}: {reason}")]
    Malformed {
        /// 리포트 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 지원하는 클래스(OS, Node)의 결과 섹션이 하나도 없음
    #[error("no scanning results for os-pkgs or node-pkg found in {path}")]
    NoPatchableResults {
        /// 리포트 경로
        path: String,
    },

    /// 하나만 있어야 하는 결과 섹션이 중복됨
    #[error("conflicting results in {path}: {reason}")]
    ConflictingResults {
        /// 리포트 경로
        path: String,
        /// 충돌 내용
        reason: String,
    },

    /// 알 수 없는 스캐너 이름
    #[error("unknown scanner '{0}' (expected: trivy, native)")]
    UnknownScanner(String),

    /// 파일 I/O 에러
    #[error("io error: {path}: {source}")]
    Io {
        /// 관련 파일 경로
        path: String,
        /// 원본 I/O 에러
        source: std::io::Error,
    },

    /// 파일 크기 초과
    #[error("report too large: {path}: {size} bytes (max: {max})")]
    FileTooBig {
        /// 파일 경로
        path: String,
        /// 실제 크기 (바이트)
        size: u64,
        /// 최대 허용 크기 (바이트)
        max: u64,
    },
}

impl From<ReportError> for LayerfixError {
    fn from(err: ReportError) -> Self {
        match err {
            ReportError::Malformed { path, reason } => {
                LayerfixError::Parse(ParseError::Malformed { path, reason })
            }
            ReportError::NoPatchableResults { path } => {
                LayerfixError::Parse(ParseError::NoPatchableResults { path })
            }
            ReportError::ConflictingResults { path, reason } => {
                LayerfixError::Parse(ParseError::ConflictingResults { path, reason })
            }
            ReportError::UnknownScanner(name) => {
                LayerfixError::Parse(ParseError::UnsupportedFormat(name))
            }
            ReportError::Io { source, .. } => LayerfixError::Io(source),
            ReportError::FileTooBig { path, size, max } => {
                LayerfixError::Parse(ParseError::Malformed {
                    path,
                    reason: format!("report too large: {size} bytes (max: {max})"),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_display() {
        let err = ReportError::Malformed {
            path: "report.json".to_owned(),
            reason: "expected value at line 1".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("report.json"));
        assert!(msg.contains("expected value"));
    }

    #[test]
    fn no_patchable_results_display() {
        let err = ReportError::NoPatchableResults {
            path: "empty.json".to_owned(),
        };
        assert!(err.to_string().contains("os-pkgs or node-pkg"));
    }

    #[test]
    fn converts_conflicting_results() {
        let err = ReportError::ConflictingResults {
            path: "r.json".to_owned(),
            reason: "unexpected multiple results for os-pkgs".to_owned(),
        };
        let top: LayerfixError = err.into();
        assert!(matches!(
            top,
            LayerfixError::Parse(ParseError::ConflictingResults { .. })
        ));
    }

    #[test]
    fn converts_unknown_scanner() {
        let top: LayerfixError = ReportError::UnknownScanner("grype".to_owned()).into();
        assert!(matches!(
            top,
            LayerfixError::Parse(ParseError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn converts_io_to_io() {
        let err = ReportError::Io {
            path: "/nope".to_owned(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        let top: LayerfixError = err.into();
        assert!(matches!(top, LayerfixError::Io(_)));
    }

    #[test]
    fn file_too_big_keeps_path() {
        let err = ReportError::FileTooBig {
            path: "huge.json".to_owned(),
            size: 10,
            max: 5,
        };
        let top: LayerfixError = err.into();
        match top {
            LayerfixError::Parse(ParseError::Malformed { path, reason }) => {
                assert_eq!(path, "huge.json");
                assert!(reason.contains("max: 5"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
