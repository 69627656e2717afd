#![doc = include_str!("../README.md")]
//!
//! # Module Structure
//!
//! - [`config`]: Runtime configuration (`PatcherConfig`, builder)
//! - [`discovery`]: Platform discovery and report matching (`PlatformDiscovery`, `match_platforms`)
//! - [`engine`]: Docker-backed `BuildEngine` and the graph-to-Dockerfile renderer
//! - [`pipeline`]: Per-platform state machine and multi-platform fan-out (`Patcher`)
//! - [`assemble`]: OCI layout assembly (`LayoutAssembler`, `unpack_layout`)
//! - [`emulation`]: binfmt_misc / qemu-user-static probe
//! - [`vex`]: OpenVEX output for updated packages
//! - [`summary`]: Run summary (`PatchSummary`)
//! - [`error`]: Domain error types (`PatchError`)
//!
//! # Architecture
//!
//! ```text
//! ImageRef ──▶ PlatformDiscovery (daemon, then registry)
//!                   │ Vec<Platform>
//!                   ▼
//!          match_platforms(report dir) ──▶ Vec<PatchPlatform>
//!                   │
//!                   ▼
//!          Patcher.patch_all (Semaphore + JoinSet + CancellationToken)
//!            per platform: parse report ─▶ ManagerRegistry ─▶ commit
//!                   │ PatchSummary
//!                   ▼
//!          LayoutAssembler.assemble ──▶ OCI image layout directory
//! ```

pub mod assemble;
pub mod config;
pub mod discovery;
pub mod emulation;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod summary;
pub mod vex;

// --- Public API Re-exports ---

// Config
pub use config::{PatcherConfig, PatcherConfigBuilder};

// Discovery
pub use discovery::{
    DaemonManifestSource, ImageDescriptor, IndexEntry, ManifestSource, PlatformDiscovery,
    RegistryManifestSource, match_platforms, platforms_from_report_dir,
};

// Engine
pub use engine::{DockerBuildEngine, RenderedBuild, render_dockerfile, render_multi_platform};

// Pipeline
pub use pipeline::{Patcher, PlatformStage};

// Assembly
pub use assemble::{LayoutAssembler, unpack_layout};

// Output
pub use summary::PatchSummary;
pub use vex::VexDocument;

// Error
pub use error::PatchError;
