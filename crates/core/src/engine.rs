//! Build engine abstraction.
//!
//! [`BuildEngine`] is the only place a filesystem-state graph gets evaluated.
//! Package managers read files out of candidate states to plan their work, the
//! orchestrator commits per-platform results, and the assembler exports
//! several platform states as one OCI image layout.
//!
//! # Implementations
//!
//! - `DockerBuildEngine` in `layerfix-patcher`: BuildKit via `docker buildx`
//! - [`MockBuildEngine`](crate::testing::MockBuildEngine): in-memory, behind
//!   the `test-util` feature

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use bytes::Bytes;

use crate::error::EngineError;
use crate::state::FsState;
use crate::types::Platform;

/// Boxed, sendable future used by dyn-compatible traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Evaluates filesystem-state graphs.
///
/// The trait is `Send + Sync + 'static` so one engine can be shared across
/// per-platform tasks behind an `Arc`. Dropping a returned future abandons
/// the evaluation.
pub trait BuildEngine: Send + Sync + 'static {
    /// Reads a file out of the evaluated state.
    ///
    /// Returns `Ok(None)` when the path does not exist.
    fn read_file(
        &self,
        state: &FsState,
        platform: &Platform,
        path: &str,
    ) -> impl Future<Output = Result<Option<Bytes>, EngineError>> + Send;

    /// Solves the state and stores it as an image named `target`.
    ///
    /// Returns the reference of the stored image.
    fn commit(
        &self,
        state: &FsState,
        platform: &Platform,
        target: &str,
    ) -> impl Future<Output = Result<String, EngineError>> + Send;

    /// Solves one state per platform and writes a single OCI image layout
    /// archive (tar) to `archive`.
    fn export_layout(
        &self,
        targets: &[(Platform, FsState)],
        archive: &Path,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;
}
