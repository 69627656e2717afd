#![doc = include_str!("../README.md")]
//!
//! # Module Structure
//!
//! - [`error`]: Domain error types (`PkgMgrError`)
//! - [`manager`]: Package manager traits (`PackageManager`, `DynPackageManager`, `InstallContext`)
//! - [`registry`]: Ecosystem lookup (`ManagerRegistry`, `ManagerSettings`)
//! - [`unique`]: Per-package de-duplication (`unique_latest`)
//! - [`dpkg`]: Debian manager, status fragment splitting, version ordering
//! - [`node`]: npm manager, dependency classification, lock file verification
//!
//! # Architecture
//!
//! ```text
//! UpdateManifest ──▶ ManagerRegistry.for_os_family / for_ecosystem
//!                          │
//!                     DynPackageManager.install_updates(state)
//!                          │  derives run/copy steps, reads files back via BuildEngine
//!                          ▼
//!                     InstallOutcome { state, failed, updated }
//! ```

pub mod dpkg;
pub mod error;
pub mod manager;
pub mod node;
pub mod registry;
pub mod unique;

// --- Public API Re-exports ---

// Managers
pub use dpkg::DpkgManager;
pub use node::NodeManager;

// Traits
pub use manager::{DynPackageManager, InstallContext, InstallOutcome, PackageManager, updates_for};

// Registry
pub use registry::{ManagerRegistry, ManagerSettings};

// Error
pub use error::PkgMgrError;

// Helpers
pub use dpkg::status::{Fragment, split_status};
pub use dpkg::version::DebVersion;
pub use unique::unique_latest;
