//! 패처 설정
//!
//! [`PatcherConfig`]는 core의 [`LayerfixConfig`]에서 파이프라인, 엔진,
//! 레지스트리 섹션을 모아 패처 전용 설정으로 만듭니다.
//!
//! # 사용 예시
//! ```ignore
//! use layerfix_core::config::LayerfixConfig;
//! use layerfix_patcher::config::PatcherConfig;
//!
//! let core_config = LayerfixConfig::default();
//! let config = PatcherConfig::from_core(&core_config);
//! ```

use std::path::PathBuf;

use layerfix_core::config::{LayerfixConfig, MAX_CONCURRENT_PLATFORMS};
use layerfix_report::{ParseOptions, UnparseablePolicy};

use crate::error::PatchError;

/// 레지스트리 요청 타임아웃 상한 (초)
const MAX_REGISTRY_TIMEOUT_SECS: u64 = 600;

/// 패처 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatcherConfig {
    /// 플랫폼별 scratch 디렉토리와 빌드 컨텍스트의 상위 경로
    pub work_dir: PathBuf,
    /// 리포트 형식
    pub scanner: String,
    /// 해석할 수 없는 수정 버전 처리 방식
    pub unparseable: UnparseablePolicy,
    /// 패키지 실패를 무시하고 계속
    pub ignore_errors: bool,
    /// 플랫폼 실패를 원본 유지로 격하하고 계속
    pub continue_on_platform_error: bool,
    /// 패치 태그 접미사
    pub tag_suffix: String,
    /// 결과 태그 (없으면 원본 태그에서 유도)
    pub tag: Option<String>,
    /// 동시에 처리할 최대 플랫폼 수
    pub max_concurrent_platforms: usize,
    /// Docker 소켓 경로 (비어 있으면 로컬 기본값)
    pub docker_socket: String,
    /// docker CLI 실행 파일
    pub docker_binary: String,
    /// buildx 빌더 이름
    pub builder: Option<String>,
    /// 평문 HTTP로 접근할 레지스트리
    pub insecure_registries: Vec<String>,
    /// 레지스트리 요청 타임아웃 (초)
    pub registry_timeout_secs: u64,
}

impl Default for PatcherConfig {
    fn default() -> Self {
        Self::from_core(&LayerfixConfig::default())
    }
}

impl PatcherConfig {
    /// core 설정에서 패처 설정을 생성합니다.
    ///
    /// 알 수 없는 `unparseable_versions` 값은 core 검증에서 걸러지므로
    /// 여기서는 기본값(`skip`)으로 둡니다.
    pub fn from_core(core: &LayerfixConfig) -> Self {
        let builder = core.engine.builder.trim();
        Self {
            work_dir: PathBuf::from(&core.general.work_dir),
            scanner: core.patch.scanner.clone(),
            unparseable: UnparseablePolicy::from_str_loose(&core.patch.unparseable_versions)
                .unwrap_or_default(),
            ignore_errors: core.patch.ignore_errors,
            continue_on_platform_error: core.patch.continue_on_platform_error,
            tag_suffix: core.patch.tag_suffix.clone(),
            tag: None,
            max_concurrent_platforms: core.patch.max_concurrent_platforms,
            docker_socket: core.engine.docker_socket.clone(),
            docker_binary: core.engine.docker_binary.clone(),
            builder: (!builder.is_empty()).then(|| builder.to_owned()),
            insecure_registries: core.registry.insecure_registries.clone(),
            registry_timeout_secs: core.registry.timeout_secs,
        }
    }

    /// 리포트 파서 옵션
    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            unparseable: self.unparseable,
        }
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), PatchError> {
        let invalid = |field: &str, reason: String| PatchError::Config {
            field: field.to_owned(),
            reason,
        };

        if self.work_dir.as_os_str().is_empty() {
            return Err(invalid("work_dir", "must not be empty".to_owned()));
        }

        if self.max_concurrent_platforms == 0
            || self.max_concurrent_platforms > MAX_CONCURRENT_PLATFORMS
        {
            return Err(invalid(
                "max_concurrent_platforms",
                format!("must be 1-{MAX_CONCURRENT_PLATFORMS}"),
            ));
        }

        if !is_tag_component(&self.tag_suffix) {
            return Err(invalid(
                "tag_suffix",
                "must be a non-empty tag component ([A-Za-z0-9_.-])".to_owned(),
            ));
        }

        if let Some(tag) = &self.tag {
            if !is_tag_component(tag) || tag.starts_with(['.', '-']) {
                return Err(invalid("tag", format!("'{tag}' is not a valid image tag")));
            }
        }

        if self.docker_binary.trim().is_empty() {
            return Err(invalid("docker_binary", "must not be empty".to_owned()));
        }

        if self.registry_timeout_secs == 0 || self.registry_timeout_secs > MAX_REGISTRY_TIMEOUT_SECS {
            return Err(invalid(
                "registry_timeout_secs",
                format!("must be 1-{MAX_REGISTRY_TIMEOUT_SECS}"),
            ));
        }

        Ok(())
    }
}

fn is_tag_component(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 96
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// 패처 설정 빌더
#[derive(Default)]
pub struct PatcherConfigBuilder {
    config: PatcherConfig,
}

impl PatcherConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// core 설정에서 시작합니다.
    pub fn from_core(core: &LayerfixConfig) -> Self {
        Self {
            config: PatcherConfig::from_core(core),
        }
    }

    /// 작업 디렉토리를 설정합니다.
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = dir.into();
        self
    }

    /// 리포트 형식을 설정합니다.
    pub fn scanner(mut self, scanner: impl Into<String>) -> Self {
        self.config.scanner = scanner.into();
        self
    }

    /// 해석할 수 없는 수정 버전 처리 방식을 설정합니다.
    pub fn unparseable(mut self, policy: UnparseablePolicy) -> Self {
        self.config.unparseable = policy;
        self
    }

    /// 패키지 실패 무시 여부를 설정합니다.
    pub fn ignore_errors(mut self, ignore: bool) -> Self {
        self.config.ignore_errors = ignore;
        self
    }

    /// 플랫폼 실패 시 계속 진행할지 설정합니다.
    pub fn continue_on_platform_error(mut self, proceed: bool) -> Self {
        self.config.continue_on_platform_error = proceed;
        self
    }

    /// 태그 접미사를 설정합니다.
    pub fn tag_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.tag_suffix = suffix.into();
        self
    }

    /// 결과 태그를 설정합니다.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.config.tag = Some(tag.into());
        self
    }

    /// 동시 처리 플랫폼 수를 설정합니다.
    pub fn max_concurrent_platforms(mut self, max: usize) -> Self {
        self.config.max_concurrent_platforms = max;
        self
    }

    /// Docker 소켓 경로를 설정합니다.
    pub fn docker_socket(mut self, socket: impl Into<String>) -> Self {
        self.config.docker_socket = socket.into();
        self
    }

    /// buildx 빌더를 설정합니다.
    pub fn builder(mut self, builder: impl Into<String>) -> Self {
        self.config.builder = Some(builder.into());
        self
    }

    /// 설정을 검증하고 반환합니다.
    pub fn build(self) -> Result<PatcherConfig, PatchError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
