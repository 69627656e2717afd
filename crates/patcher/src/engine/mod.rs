//! BuildKit 빌드 엔진
//!
//! - [`render`]: 상태 그래프를 멀티 스테이지 Dockerfile로 변환 (순수 함수)
//! - [`docker`]: `docker buildx`와 Docker 데몬으로 그래프를 평가하는 [`DockerBuildEngine`]

pub mod docker;
pub mod render;

pub use docker::DockerBuildEngine;
pub use render::{
    ContextFile, EXPORT_STAGE, RenderedBuild, final_stage_names, render_dockerfile,
    render_multi_platform,
};
