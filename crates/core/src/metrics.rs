//! 메트릭 상수 및 설명 등록
//!
//! 모든 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 크레이트는 이 상수를 사용하여 `metrics::counter!()` 등을 호출합니다.
//! 라이브러리는 recorder를 설치하지 않으므로, 임베딩하는 프로세스가
//! recorder를 설치하지 않으면 모든 기록은 no-op입니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `layerfix_`
//! - 모듈명: `discovery_`, `patch_`, `packages_`, `assembly_`
//! - 접미어: `_total` (counter), `_seconds` (histogram)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(layerfix_core::metrics::PATCH_PLATFORMS_PATCHED_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 생태계 레이블 키 (debian, node)
pub const LABEL_ECOSYSTEM: &str = "ecosystem";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

// ─── Discovery 메트릭 ───────────────────────────────────────────────

/// Discovery: 이미지에서 발견한 플랫폼 수 (counter)
pub const DISCOVERY_PLATFORMS_TOTAL: &str = "layerfix_discovery_platforms_total";

/// Discovery: 원격 레지스트리로 fallback한 횟수 (counter)
pub const DISCOVERY_REMOTE_FALLBACK_TOTAL: &str = "layerfix_discovery_remote_fallback_total";

// ─── Patch 메트릭 ───────────────────────────────────────────────────

/// Patch: 패치된 플랫폼 수 (counter)
pub const PATCH_PLATFORMS_PATCHED_TOTAL: &str = "layerfix_patch_platforms_patched_total";

/// Patch: 원본 유지된 플랫폼 수 (counter)
pub const PATCH_PLATFORMS_PRESERVED_TOTAL: &str = "layerfix_patch_platforms_preserved_total";

/// Patch: 실패한 플랫폼 수 (counter)
pub const PATCH_PLATFORMS_FAILED_TOTAL: &str = "layerfix_patch_platforms_failed_total";

/// Patch: 플랫폼 하나의 처리 소요 시간 (histogram, 초)
pub const PATCH_PLATFORM_DURATION_SECONDS: &str = "layerfix_patch_platform_duration_seconds";

// ─── Package 메트릭 ─────────────────────────────────────────────────

/// Packages: 업데이트 시도 결과 (counter, labels: ecosystem, result)
pub const PACKAGES_UPDATED_TOTAL: &str = "layerfix_packages_updated_total";

// ─── Assembly 메트릭 ────────────────────────────────────────────────

/// Assembly: 완료된 레이아웃 조립 수 (counter)
pub const ASSEMBLY_LAYOUTS_TOTAL: &str = "layerfix_assembly_layouts_total";

/// 모든 메트릭의 설명을 등록합니다.
///
/// recorder 설치 직후 한 번 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_histogram};

    describe_counter!(
        DISCOVERY_PLATFORMS_TOTAL,
        "Platforms found in image indexes"
    );
    describe_counter!(
        DISCOVERY_REMOTE_FALLBACK_TOTAL,
        "Discoveries that fell back to the remote registry"
    );
    describe_counter!(PATCH_PLATFORMS_PATCHED_TOTAL, "Platforms patched");
    describe_counter!(
        PATCH_PLATFORMS_PRESERVED_TOTAL,
        "Platforms passed through unchanged"
    );
    describe_counter!(PATCH_PLATFORMS_FAILED_TOTAL, "Platforms that failed");
    describe_histogram!(
        PATCH_PLATFORM_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Time spent patching one platform"
    );
    describe_counter!(
        PACKAGES_UPDATED_TOTAL,
        "Package update attempts by ecosystem and result"
    );
    describe_counter!(ASSEMBLY_LAYOUTS_TOTAL, "OCI layouts assembled");
}
