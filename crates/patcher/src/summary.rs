//! 멀티 플랫폼 실행 요약
//!
//! 전체 성공과 부분 성공을 구분합니다. 부분 성공은 실행은 끝났지만
//! 실패한 패키지나 원본으로 대체된 플랫폼이 있는 경우입니다.

use serde::{Deserialize, Serialize};

use layerfix_core::types::{PatchResult, PatchStatus};

/// 한 번의 패치 실행 결과
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSummary {
    /// 플랫폼별 결과 (탐색 순서)
    pub results: Vec<PatchResult>,
    /// 실패 후 원본으로 대체된 플랫폼 키
    pub failed_platforms: Vec<String>,
}

impl PatchSummary {
    /// 결과 목록으로 요약을 만듭니다.
    pub fn from_results(results: Vec<PatchResult>) -> Self {
        let failed_platforms = results
            .iter()
            .filter(|r| matches!(r.status, PatchStatus::Failed { .. }))
            .map(|r| r.platform.key())
            .collect();
        Self {
            results,
            failed_platforms,
        }
    }

    /// 새 이미지가 만들어진 플랫폼 수
    pub fn patched_count(&self) -> usize {
        self.count(|s| matches!(s, PatchStatus::Patched))
    }

    /// 리포트가 없어 보존된 플랫폼 수
    pub fn preserved_count(&self) -> usize {
        self.count(|s| matches!(s, PatchStatus::Preserved))
    }

    /// 업데이트할 것이 없던 플랫폼 수
    pub fn unchanged_count(&self) -> usize {
        self.count(|s| matches!(s, PatchStatus::Unchanged))
    }

    /// 실패한 플랫폼 수
    pub fn failed_count(&self) -> usize {
        self.count(|s| matches!(s, PatchStatus::Failed { .. }))
    }

    /// 업데이트에 실패한 패키지 수 (전 플랫폼 합계)
    pub fn failed_package_count(&self) -> usize {
        self.results.iter().map(|r| r.failed_packages.len()).sum()
    }

    /// 업데이트된 패키지 수 (전 플랫폼 합계)
    pub fn updated_package_count(&self) -> usize {
        self.results.iter().map(|r| r.updated_packages.len()).sum()
    }

    /// 실패한 플랫폼도 실패한 패키지도 없음
    pub fn is_total_success(&self) -> bool {
        self.failed_platforms.is_empty() && self.failed_package_count() == 0
    }

    /// 실행은 끝났지만 일부 실패가 있음
    pub fn is_partial(&self) -> bool {
        !self.is_total_success()
    }

    fn count(&self, pred: impl Fn(&PatchStatus) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.status)).count()
    }
}
