//! 에러 타입 — 도메인별 에러 정의
//!
//! [`LayerfixError`]는 모든 크레이트 에러가 수렴하는 최상위 타입입니다.
//! 각 기능 크레이트는 자기 도메인 에러를 정의하고
//! `From<DomainError> for LayerfixError`를 구현합니다.

/// Layerfix 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum LayerfixError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 빌드 엔진 에러
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// 스캐너 리포트 파싱 에러
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// 플랫폼 탐색 에러
    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// 패키지 업데이트 에러
    #[error("package error: {0}")]
    Package(#[from] PackageError),

    /// 멀티 플랫폼 결과 조립 에러
    #[error("assembly error: {0}")]
    Assembly(#[from] AssemblyError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Errors raised while evaluating a filesystem-state graph.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The container runtime could not be reached.
    #[error("engine connection failed: {0}")]
    Connection(String),

    /// Solving a graph for one platform failed.
    #[error("build failed for {platform}: {reason}")]
    Build { platform: String, reason: String },

    /// A file could not be read out of an evaluated state.
    #[error("failed to read '{path}' from {platform}: {reason}")]
    ReadFile {
        platform: String,
        path: String,
        reason: String,
    },

    /// Multi-platform export failed.
    #[error("export failed: {0}")]
    Export(String),

    /// Local I/O while staging a build context.
    #[error("engine io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 스캐너 리포트 파싱 에러
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// 리포트가 손상되었거나 형식이 맞지 않음
    #[error("malformed report {path}: {reason}")]
    Malformed { path: String, reason: String },

    /// 지원하는 클래스의 스캔 결과가 없음
    #[error("no patchable results in {path}")]
    NoPatchableResults { path: String },

    /// 같은 클래스의 결과가 여러 개 존재
    #[error("conflicting results in {path}: {reason}")]
    ConflictingResults { path: String, reason: String },

    /// 지원하지 않는 스캐너 형식
    #[error("unsupported scanner format: {0}")]
    UnsupportedFormat(String),
}

/// 플랫폼 탐색 에러
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// 이미지가 멀티 플랫폼 인덱스가 아님
    #[error("image is not multi-platform: {0}")]
    NotMultiPlatform(String),

    /// 로컬/원격 모두에서 플랫폼을 확인할 수 없음
    #[error("failed to resolve platforms for {reference}: {reason}")]
    Resolution { reference: String, reason: String },
}

/// 패키지 업데이트 에러
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    /// 일부 패키지 업데이트 실패
    #[error("failed to update packages on {platform}: {}", packages.join(", "))]
    PartialUpdate {
        platform: String,
        packages: Vec<String>,
    },

    /// 지원하지 않는 패키지 생태계
    #[error("unsupported ecosystem: {0}")]
    EcosystemUnsupported(String),

    /// 패키지 데이터베이스 재구성 실패
    #[error("package database reconciliation failed on {platform}: {reason}")]
    Reconciliation { platform: String, reason: String },
}

/// 멀티 플랫폼 결과 조립 에러
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    /// 조립할 플랫폼 이미지가 없음
    #[error("no platform images found")]
    NoPlatformImages,

    /// 조립 실패
    #[error("assembly failed: {0}")]
    Failed(String),
}
