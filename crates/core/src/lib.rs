#![doc = include_str!("../README.md")]

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod reference;
pub mod state;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

// --- 주요 타입 re-export ---
// 각 모듈의 핵심 타입을 크레이트 루트에서 바로 사용할 수 있도록 합니다.

// 에러
pub use error::{
    AssemblyError, ConfigError, DiscoveryError, EngineError, LayerfixError, PackageError,
    ParseError,
};

// 설정
pub use config::LayerfixConfig;

// 빌드 엔진
pub use engine::{BoxFuture, BuildEngine};

// 이미지 참조 / 상태 그래프
pub use reference::ImageRef;
pub use state::{FsState, Op, RunSpec};

// 도메인 타입
pub use types::{
    Ecosystem, OsInfo, PatchPlatform, PatchResult, PatchStatus, Platform, UpdateManifest,
    UpdatePackage, UpdatedPackage,
};
