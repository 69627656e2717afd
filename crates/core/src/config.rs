//! 설정 관리 — layerfix.toml 파싱 및 런타임 설정
//!
//! [`LayerfixConfig`]는 모든 크레이트의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`LAYERFIX_PATCH_IGNORE_ERRORS=true` 형식)
//! 3. 설정 파일 (`layerfix.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), layerfix_core::error::LayerfixError> {
//! use layerfix_core::config::LayerfixConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = LayerfixConfig::load("layerfix.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = LayerfixConfig::parse("[patch]\nignore_errors = true")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, LayerfixError};

/// 설정 상한값 상수
pub const MAX_CONCURRENT_PLATFORMS: usize = 64;
const MAX_REGISTRY_TIMEOUT_SECS: u64 = 600;
const MAX_NODE_SEARCH_DEPTH: u32 = 32;

/// Layerfix 통합 설정
///
/// `layerfix.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 크레이트는 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerfixConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 빌드 엔진 설정
    #[serde(default)]
    pub engine: EngineConfig,
    /// 패치 파이프라인 설정
    #[serde(default)]
    pub patch: PatchConfig,
    /// 레지스트리 설정
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Debian 패키지 매니저 설정
    #[serde(default)]
    pub debian: DebianConfig,
    /// Node 패키지 매니저 설정
    #[serde(default)]
    pub node: NodeConfig,
}

impl LayerfixConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    ///
    /// 설정 로딩 순서:
    /// 1. TOML 파일 파싱
    /// 2. 환경변수 오버라이드 적용
    /// 3. 유효성 검증
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, LayerfixError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// 파일이 없으면 기본값에서 시작합니다. 환경변수 오버라이드는 항상 적용됩니다.
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self, LayerfixError> {
        let mut config = match Self::from_file(path.as_ref()).await {
            Ok(config) => config,
            Err(LayerfixError::Config(ConfigError::FileNotFound { path })) => {
                tracing::debug!(path = %path, "config file not found, using defaults");
                Self::default()
            }
            Err(e) => return Err(e),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, LayerfixError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LayerfixError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                LayerfixError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, LayerfixError> {
        toml::from_str(toml_str).map_err(|e| {
            LayerfixError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `LAYERFIX_{SECTION}_{FIELD}`
    /// 예: `LAYERFIX_PATCH_TAG_SUFFIX=fixed`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "LAYERFIX_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "LAYERFIX_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.work_dir, "LAYERFIX_GENERAL_WORK_DIR");

        // Engine
        override_string(
            &mut self.engine.docker_socket,
            "LAYERFIX_ENGINE_DOCKER_SOCKET",
        );
        override_string(
            &mut self.engine.docker_binary,
            "LAYERFIX_ENGINE_DOCKER_BINARY",
        );
        override_string(&mut self.engine.builder, "LAYERFIX_ENGINE_BUILDER");

        // Patch
        override_string(&mut self.patch.scanner, "LAYERFIX_PATCH_SCANNER");
        override_bool(&mut self.patch.ignore_errors, "LAYERFIX_PATCH_IGNORE_ERRORS");
        override_bool(
            &mut self.patch.continue_on_platform_error,
            "LAYERFIX_PATCH_CONTINUE_ON_PLATFORM_ERROR",
        );
        override_string(&mut self.patch.tag_suffix, "LAYERFIX_PATCH_TAG_SUFFIX");
        override_string(
            &mut self.patch.unparseable_versions,
            "LAYERFIX_PATCH_UNPARSEABLE_VERSIONS",
        );
        override_usize(
            &mut self.patch.max_concurrent_platforms,
            "LAYERFIX_PATCH_MAX_CONCURRENT_PLATFORMS",
        );

        // Registry
        override_csv(
            &mut self.registry.insecure_registries,
            "LAYERFIX_REGISTRY_INSECURE_REGISTRIES",
        );
        override_u64(
            &mut self.registry.timeout_secs,
            "LAYERFIX_REGISTRY_TIMEOUT_SECS",
        );

        // Debian
        override_string(
            &mut self.debian.tooling_image,
            "LAYERFIX_DEBIAN_TOOLING_IMAGE",
        );

        // Node
        override_csv(&mut self.node.app_roots, "LAYERFIX_NODE_APP_ROOTS");
        override_u32(
            &mut self.node.search_max_depth,
            "LAYERFIX_NODE_SEARCH_MAX_DEPTH",
        );
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LayerfixError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.general.work_dir.is_empty() {
            return Err(invalid("general.work_dir", "must not be empty"));
        }

        if self.engine.docker_binary.is_empty() {
            return Err(invalid("engine.docker_binary", "must not be empty"));
        }

        let valid_scanners = ["trivy", "native"];
        if !valid_scanners.contains(&self.patch.scanner.as_str()) {
            return Err(invalid(
                "patch.scanner",
                format!("must be one of: {}", valid_scanners.join(", ")),
            ));
        }

        if self.patch.tag_suffix.is_empty()
            || !self
                .patch
                .tag_suffix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        {
            return Err(invalid(
                "patch.tag_suffix",
                "must be a non-empty tag fragment ([A-Za-z0-9_.-])",
            ));
        }

        let valid_policies = ["skip", "report"];
        if !valid_policies.contains(&self.patch.unparseable_versions.as_str()) {
            return Err(invalid(
                "patch.unparseable_versions",
                format!("must be one of: {}", valid_policies.join(", ")),
            ));
        }

        if self.patch.max_concurrent_platforms == 0
            || self.patch.max_concurrent_platforms > MAX_CONCURRENT_PLATFORMS
        {
            return Err(invalid(
                "patch.max_concurrent_platforms",
                format!("must be 1-{MAX_CONCURRENT_PLATFORMS}"),
            ));
        }

        if self.registry.timeout_secs == 0 || self.registry.timeout_secs > MAX_REGISTRY_TIMEOUT_SECS
        {
            return Err(invalid(
                "registry.timeout_secs",
                format!("must be 1-{MAX_REGISTRY_TIMEOUT_SECS}"),
            ));
        }

        if self.node.app_roots.is_empty() {
            return Err(invalid("node.app_roots", "must list at least one root"));
        }
        if let Some(root) = self.node.app_roots.iter().find(|r| !r.starts_with('/')) {
            return Err(invalid(
                "node.app_roots",
                format!("'{root}' is not an absolute path"),
            ));
        }

        if self.node.search_max_depth == 0 || self.node.search_max_depth > MAX_NODE_SEARCH_DEPTH {
            return Err(invalid(
                "node.search_max_depth",
                format!("must be 1-{MAX_NODE_SEARCH_DEPTH}"),
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> LayerfixError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 플랫폼별 임시 작업 디렉토리의 상위 경로
    pub work_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "pretty".to_owned(),
            work_dir: std::env::temp_dir()
                .join("layerfix")
                .display()
                .to_string(),
        }
    }
}

/// 빌드 엔진 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Docker 소켓 경로 (비어 있으면 로컬 기본값)
    pub docker_socket: String,
    /// docker CLI 실행 파일
    pub docker_binary: String,
    /// buildx 빌더 이름 (비어 있으면 현재 빌더)
    pub builder: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            docker_socket: String::new(),
            docker_binary: "docker".to_owned(),
            builder: String::new(),
        }
    }
}

/// 패치 파이프라인 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchConfig {
    /// 리포트 형식 (trivy, native)
    pub scanner: String,
    /// 패키지 업데이트 실패를 무시하고 계속 진행
    pub ignore_errors: bool,
    /// 플랫폼 하나가 실패해도 나머지를 계속 처리 (실패 플랫폼은 원본 유지)
    pub continue_on_platform_error: bool,
    /// 패치 이미지 태그 접미사
    pub tag_suffix: String,
    /// 해석할 수 없는 수정 버전 처리 방식 (skip, report)
    pub unparseable_versions: String,
    /// 동시에 처리할 최대 플랫폼 수
    pub max_concurrent_platforms: usize,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            scanner: "trivy".to_owned(),
            ignore_errors: false,
            continue_on_platform_error: false,
            tag_suffix: "patched".to_owned(),
            unparseable_versions: "skip".to_owned(),
            max_concurrent_platforms: 4,
        }
    }
}

/// 레지스트리 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// 평문 HTTP로 접근할 레지스트리 호스트
    pub insecure_registries: Vec<String>,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            insecure_registries: Vec::new(),
            timeout_secs: 30,
        }
    }
}

/// Debian 패키지 매니저 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebianConfig {
    /// distroless 재구성에 사용할 도구 이미지 (비어 있으면 OS 버전에서 유도)
    pub tooling_image: String,
}

/// Node 패키지 매니저 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// 우선 탐색할 애플리케이션 루트 (순서 유지)
    pub app_roots: Vec<String>,
    /// 관례 경로에서 찾지 못했을 때 재귀 탐색 깊이
    pub search_max_depth: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            app_roots: ["/app", "/usr/src/app", "/opt/app", "/src", "/workspace"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            search_max_depth: 6,
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = LayerfixConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.patch.scanner, "trivy");
        assert_eq!(config.patch.tag_suffix, "patched");
        assert!(!config.patch.ignore_errors);
        assert_eq!(config.node.app_roots[0], "/app");
        assert!(config.engine.docker_socket.is_empty());
    }

    #[test]
    fn default_config_passes_validation() {
        LayerfixConfig::default().validate().unwrap();
    }

    #[test]
    fn from_str_empty_toml_uses_defaults() {
        let config = LayerfixConfig::parse("").unwrap();
        assert_eq!(config.patch.max_concurrent_platforms, 4);
        assert_eq!(config.registry.timeout_secs, 30);
    }

    #[test]
    fn from_str_partial_toml_merges_with_defaults() {
        let toml = r#"
[patch]
ignore_errors = true
tag_suffix = "fixed"

[node]
app_roots = ["/srv/www"]
"#;
        let config = LayerfixConfig::parse(toml).unwrap();
        assert!(config.patch.ignore_errors);
        assert_eq!(config.patch.tag_suffix, "fixed");
        assert_eq!(config.patch.scanner, "trivy");
        assert_eq!(config.node.app_roots, vec!["/srv/www"]);
        assert_eq!(config.node.search_max_depth, 6);
    }

    #[test]
    fn from_str_invalid_toml_returns_error() {
        let err = LayerfixConfig::parse("invalid = [[[toml").unwrap_err();
        assert!(matches!(
            err,
            LayerfixError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn validate_rejects_unknown_scanner() {
        let mut config = LayerfixConfig::default();
        config.patch.scanner = "grype".to_owned();
        assert!(config.validate().unwrap_err().to_string().contains("patch.scanner"));
    }

    #[test]
    fn validate_rejects_bad_tag_suffix() {
        let mut config = LayerfixConfig::default();
        config.patch.tag_suffix = "has space".to_owned();
        assert!(config.validate().unwrap_err().to_string().contains("tag_suffix"));
        config.patch.tag_suffix = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_concurrency() {
        let mut config = LayerfixConfig::default();
        config.patch.max_concurrent_platforms = 0;
        assert!(config.validate().is_err());
        config.patch.max_concurrent_platforms = MAX_CONCURRENT_PLATFORMS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_relative_app_root() {
        let mut config = LayerfixConfig::default();
        config.node.app_roots = vec!["app".to_owned()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("node.app_roots"));
    }

    #[test]
    fn validate_rejects_unknown_unparseable_policy() {
        let mut config = LayerfixConfig::default();
        config.patch.unparseable_versions = "panic".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_override_csv_skips_blanks() {
        let mut val = vec!["a".to_owned()];
        // SAFETY: 이 키는 이 테스트에서만 사용합니다.
        unsafe { std::env::set_var("TEST_LAYERFIX_CSV", "x, ,y") };
        override_csv(&mut val, "TEST_LAYERFIX_CSV");
        assert_eq!(val, vec!["x", "y"]);
        unsafe { std::env::remove_var("TEST_LAYERFIX_CSV") };
    }

    #[test]
    fn env_override_bool_invalid_keeps_original() {
        let mut val = false;
        // SAFETY: 이 키는 이 테스트에서만 사용합니다.
        unsafe { std::env::set_var("TEST_LAYERFIX_BOOL_BAD", "yes please") };
        override_bool(&mut val, "TEST_LAYERFIX_BOOL_BAD");
        assert!(!val);
        unsafe { std::env::remove_var("TEST_LAYERFIX_BOOL_BAD") };
    }

    #[test]
    fn env_override_missing_var_keeps_original() {
        let mut val = "original".to_owned();
        override_string(&mut val, "TEST_LAYERFIX_NONEXISTENT_12345");
        assert_eq!(val, "original");
    }

    #[test]
    fn config_serialize_roundtrip() {
        let config = LayerfixConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = LayerfixConfig::parse(&toml_str).unwrap();
        assert_eq!(config.node.app_roots, parsed.node.app_roots);
        assert_eq!(config.patch.tag_suffix, parsed.patch.tag_suffix);
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let err = LayerfixConfig::from_file("/nonexistent/path/layerfix.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LayerfixError::Config(ConfigError::FileNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn load_or_default_tolerates_missing_file() {
        let config = LayerfixConfig::load_or_default("/nonexistent/path/layerfix.toml")
            .await
            .unwrap();
        assert_eq!(config.patch.scanner, "trivy");
    }
}
