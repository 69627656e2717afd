//! In-memory [`BuildEngine`] for tests.
//!
//! Available with the `test-util` feature. Files are served from rules
//! registered with the builder methods. A rule can be limited to one platform
//! or to states that contain a given run step, which is how tests model
//! "this file only looks like that after the update script ran".

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;

use crate::engine::BuildEngine;
use crate::error::EngineError;
use crate::state::FsState;
use crate::types::Platform;

#[derive(Debug, Clone)]
struct FileRule {
    path: String,
    data: Bytes,
    platform: Option<String>,
    after_run: Option<String>,
}

/// A recorded `commit` call.
#[derive(Debug, Clone)]
pub struct CommitRecord {
    pub state: FsState,
    pub platform: Platform,
    pub target: String,
}

/// A recorded `export_layout` call.
#[derive(Debug, Clone)]
pub struct ExportRecord {
    pub targets: Vec<(Platform, FsState)>,
    pub archive: std::path::PathBuf,
}

/// Configurable engine double.
#[derive(Debug, Default)]
pub struct MockBuildEngine {
    rules: Vec<FileRule>,
    failing_commits: HashSet<String>,
    fail_export: bool,
    commit_delay: Option<Duration>,
    commits: Mutex<Vec<CommitRecord>>,
    exports: Mutex<Vec<ExportRecord>>,
    reads: Mutex<Vec<(String, String)>>,
}

impl MockBuildEngine {
    /// Empty engine: every read misses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `data` at `path` for every state.
    pub fn with_file(mut self, path: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.rules.push(FileRule {
            path: path.into(),
            data: data.into(),
            platform: None,
            after_run: None,
        });
        self
    }

    /// Serves `data` at `path` only for one platform key.
    pub fn with_platform_file(
        mut self,
        platform_key: impl Into<String>,
        path: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        self.rules.push(FileRule {
            path: path.into(),
            data: data.into(),
            platform: Some(platform_key.into()),
            after_run: None,
        });
        self
    }

    /// Serves `data` at `path` only when the state contains a run step whose
    /// name or script contains `needle`. Later rules win over earlier ones.
    pub fn with_file_after_run(
        mut self,
        needle: impl Into<String>,
        path: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        self.rules.push(FileRule {
            path: path.into(),
            data: data.into(),
            platform: None,
            after_run: Some(needle.into()),
        });
        self
    }

    /// Makes `commit` fail for one platform key.
    pub fn with_failing_commit(mut self, platform_key: impl Into<String>) -> Self {
        self.failing_commits.insert(platform_key.into());
        self
    }

    /// Makes `export_layout` fail.
    pub fn with_failing_export(mut self) -> Self {
        self.fail_export = true;
        self
    }

    /// Delays every commit, for cancellation tests.
    pub fn with_commit_delay(mut self, delay: Duration) -> Self {
        self.commit_delay = Some(delay);
        self
    }

    /// Commits recorded so far.
    pub fn commits(&self) -> Vec<CommitRecord> {
        self.commits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Exports recorded so far.
    pub fn exports(&self) -> Vec<ExportRecord> {
        self.exports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `(platform key, path)` of every read so far.
    pub fn reads(&self) -> Vec<(String, String)> {
        self.reads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lookup(&self, state: &FsState, platform: &Platform, path: &str) -> Option<Bytes> {
        let key = platform.key();
        let runs = state.runs();
        self.rules
            .iter()
            .rev()
            .filter(|r| r.path == path)
            .filter(|r| r.platform.as_deref().is_none_or(|p| p == key))
            .find(|r| match &r.after_run {
                None => true,
                Some(needle) => runs
                    .iter()
                    .any(|s| s.name.contains(needle.as_str()) || s.script.contains(needle.as_str())),
            })
            .map(|r| r.data.clone())
    }
}

impl BuildEngine for MockBuildEngine {
    async fn read_file(
        &self,
        state: &FsState,
        platform: &Platform,
        path: &str,
    ) -> Result<Option<Bytes>, EngineError> {
        self.reads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((platform.key(), path.to_owned()));
        Ok(self.lookup(state, platform, path))
    }

    async fn commit(
        &self,
        state: &FsState,
        platform: &Platform,
        target: &str,
    ) -> Result<String, EngineError> {
        if let Some(delay) = self.commit_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_commits.contains(&platform.key()) {
            return Err(EngineError::Build {
                platform: platform.key(),
                reason: "mock commit failure".to_owned(),
            });
        }
        self.commits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CommitRecord {
                state: state.clone(),
                platform: platform.clone(),
                target: target.to_owned(),
            });
        Ok(target.to_owned())
    }

    async fn export_layout(
        &self,
        targets: &[(Platform, FsState)],
        archive: &Path,
    ) -> Result<(), EngineError> {
        if self.fail_export {
            return Err(EngineError::Export("mock export failure".to_owned()));
        }
        write_layout_archive(targets, archive)?;
        self.exports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ExportRecord {
                targets: targets.to_vec(),
                archive: archive.to_path_buf(),
            });
        Ok(())
    }
}

/// Writes a small but structurally valid OCI layout archive.
fn write_layout_archive(targets: &[(Platform, FsState)], archive: &Path) -> std::io::Result<()> {
    let file = std::fs::File::create(archive)?;
    let mut builder = tar::Builder::new(file);

    let mut manifests = Vec::with_capacity(targets.len());
    let mut blobs = Vec::with_capacity(targets.len());
    for (i, (platform, _)) in targets.iter().enumerate() {
        let digest = format!("{:064x}", i + 1);
        let body = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "annotations": { "platform": platform.key() },
        })
        .to_string();
        manifests.push(serde_json::json!({
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "digest": format!("sha256:{digest}"),
            "size": body.len(),
            "platform": {
                "os": platform.os,
                "architecture": platform.architecture,
                "variant": platform.variant,
            },
        }));
        blobs.push((digest, body));
    }
    let index = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.index.v1+json",
        "manifests": manifests,
    })
    .to_string();

    append_dir(&mut builder, "blobs/")?;
    append_dir(&mut builder, "blobs/sha256/")?;
    append_file(
        &mut builder,
        "oci-layout",
        0o644,
        br#"{"imageLayoutVersion":"1.0.0"}"#,
    )?;
    append_file(&mut builder, "index.json", 0o644, index.as_bytes())?;
    for (digest, body) in &blobs {
        append_file(
            &mut builder,
            &format!("blobs/sha256/{digest}"),
            0o444,
            body.as_bytes(),
        )?;
    }

    builder.into_inner()?.flush()
}

fn append_dir<W: Write>(builder: &mut tar::Builder<W>, path: &str) -> std::io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Directory);
    header.set_mode(0o755);
    header.set_size(0);
    header.set_cksum();
    builder.append_data(&mut header, path, std::io::empty())
}

fn append_file<W: Write>(
    builder: &mut tar::Builder<W>,
    path: &str,
    mode: u32,
    data: &[u8],
) -> std::io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mode(mode);
    header.set_size(data.len() as u64);
    header.set_cksum();
    builder.append_data(&mut header, path, data)
}
