//! BuildKit-backed [`BuildEngine`].
//!
//! Graphs are rendered to a Dockerfile (see [`render`](super::render)) and
//! built with `docker buildx build`. Files are read by loading the solved
//! state as a throw-away image, creating (not starting) a container from it
//! and pulling the file out through the daemon's archive endpoint, so reads
//! also work on images without a shell.
//!
//! Multi-platform OCI export needs a builder that supports it (the
//! `docker-container` driver, or the `docker` driver with the containerd
//! image store).

use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, RemoveContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::RemoveImageOptions;
use bytes::Bytes;
use futures::StreamExt;
use layerfix_core::engine::BuildEngine;
use layerfix_core::error::EngineError;
use layerfix_core::state::FsState;
use layerfix_core::types::Platform;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::render::{RenderedBuild, render_dockerfile, render_multi_platform};
use crate::config::PatcherConfig;

/// Lines of builder stderr kept in error messages.
const STDERR_TAIL_LINES: usize = 20;

/// Entrypoint of read containers. Never executed.
const NOOP_CMD: &str = "/layerfix-noop";

/// Build engine driving `docker buildx`.
pub struct DockerBuildEngine {
    docker: Arc<bollard::Docker>,
    docker_binary: String,
    builder: Option<String>,
    work_dir: PathBuf,
}

impl DockerBuildEngine {
    /// Connects to the daemon configured in `config`.
    pub fn connect(config: &PatcherConfig) -> Result<Self, EngineError> {
        let docker = if config.docker_socket.trim().is_empty() {
            bollard::Docker::connect_with_local_defaults()
                .map_err(|e| EngineError::Connection(format!("failed to connect to docker: {e}")))?
        } else {
            let socket = config.docker_socket.as_str();
            bollard::Docker::connect_with_socket(socket, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| {
                    EngineError::Connection(format!("failed to connect to docker at {socket}: {e}"))
                })?
        };
        Ok(Self {
            docker: Arc::new(docker),
            docker_binary: config.docker_binary.clone(),
            builder: config.builder.clone(),
            work_dir: config.work_dir.clone(),
        })
    }

    /// Shared daemon client, e.g. for a [`DaemonManifestSource`](crate::discovery::DaemonManifestSource).
    pub fn client(&self) -> Arc<bollard::Docker> {
        Arc::clone(&self.docker)
    }

    /// Checks daemon connectivity.
    pub async fn ping(&self) -> Result<(), EngineError> {
        self.docker
            .ping()
            .await
            .map_err(|e| EngineError::Connection(format!("ping failed: {e}")))?;
        Ok(())
    }

    /// Writes the Dockerfile and context files into a fresh directory.
    async fn stage(&self, rendered: &RenderedBuild) -> Result<PathBuf, EngineError> {
        let dir = self
            .work_dir
            .join(format!("build-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join("Dockerfile"), &rendered.dockerfile).await?;
        for file in &rendered.files {
            let path = dir.join(&file.path);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, &file.data).await?;
        }
        debug!(dir = %dir.display(), files = rendered.files.len(), "build context staged");
        Ok(dir)
    }

    /// Runs one build. The child is killed if the returned future is dropped.
    async fn build(
        &self,
        rendered: &RenderedBuild,
        platforms: &str,
        output: &str,
    ) -> Result<(), EngineError> {
        let dir = self.stage(rendered).await?;
        let args = buildx_args(self.builder.as_deref(), &dir, rendered, platforms, output);
        debug!(platforms, target = %rendered.target, "docker buildx build");

        let result = Command::new(&self.docker_binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            warn!(dir = %dir.display(), error = %e, "failed to remove build context");
        }

        let output = result.map_err(|e| EngineError::Build {
            platform: platforms.to_owned(),
            reason: format!("failed to run {}: {e}", self.docker_binary),
        })?;
        if !output.status.success() {
            return Err(EngineError::Build {
                platform: platforms.to_owned(),
                reason: format!(
                    "{}: {}",
                    output.status,
                    stderr_tail(&String::from_utf8_lossy(&output.stderr))
                ),
            });
        }
        Ok(())
    }

    async fn extract(&self, image: &str, path: &str) -> Result<Option<Bytes>, String> {
        let container = self
            .docker
            .create_container(
                None::<CreateContainerOptions<String>>,
                Config {
                    image: Some(image.to_owned()),
                    cmd: Some(vec![NOOP_CMD.to_owned()]),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| format!("create container failed: {e}"))?;

        let result = self.download(&container.id, path).await;

        let remove = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_container(&container.id, Some(remove)).await {
            warn!(container = %container.id, error = %e, "failed to remove read container");
        }
        result
    }

    async fn download(&self, container: &str, path: &str) -> Result<Option<Bytes>, String> {
        let options = DownloadFromContainerOptions {
            path: path.to_owned(),
        };
        let mut stream = std::pin::pin!(self.docker.download_from_container(container, Some(options)));
        let mut archive = Vec::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => archive.extend_from_slice(&bytes),
                Err(e) if is_not_found(&e) => return Ok(None),
                Err(e) => return Err(format!("archive download failed: {e}")),
            }
        }
        first_file(&archive).map(Some)
    }
}

impl BuildEngine for DockerBuildEngine {
    async fn read_file(
        &self,
        state: &FsState,
        platform: &Platform,
        path: &str,
    ) -> Result<Option<Bytes>, EngineError> {
        let read_error = |reason: String| EngineError::ReadFile {
            platform: platform.key(),
            path: path.to_owned(),
            reason,
        };

        let image = format!("layerfix-read:{}", uuid::Uuid::new_v4().simple());
        let rendered = render_dockerfile(state);
        self.build(&rendered, &platform.spec(), &format!("type=docker,name={image}"))
            .await?;

        let result = self.extract(&image, path).await;

        let remove = RemoveImageOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_image(&image, Some(remove), None).await {
            warn!(image = %image, error = %e, "failed to remove read image");
        }

        let data = result.map_err(read_error)?;
        debug!(platform = %platform, path, found = data.is_some(), "file read");
        Ok(data)
    }

    async fn commit(
        &self,
        state: &FsState,
        platform: &Platform,
        target: &str,
    ) -> Result<String, EngineError> {
        let rendered = render_dockerfile(state);
        self.build(&rendered, &platform.spec(), &format!("type=docker,name={target}"))
            .await?;
        info!(platform = %platform, image = target, "image committed");
        Ok(target.to_owned())
    }

    async fn export_layout(
        &self,
        targets: &[(Platform, FsState)],
        archive: &Path,
    ) -> Result<(), EngineError> {
        if targets.is_empty() {
            return Err(EngineError::Export("nothing to export".to_owned()));
        }
        let rendered = render_multi_platform(targets);
        let platforms = targets
            .iter()
            .map(|(p, _)| p.descriptor_spec())
            .collect::<Vec<_>>()
            .join(",");
        self.build(
            &rendered,
            &platforms,
            &format!("type=oci,dest={}", archive.display()),
        )
        .await
        .map_err(|e| EngineError::Export(e.to_string()))?;
        info!(platforms = %platforms, archive = %archive.display(), "layout exported");
        Ok(())
    }
}

fn buildx_args(
    builder: Option<&str>,
    dir: &Path,
    rendered: &RenderedBuild,
    platforms: &str,
    output: &str,
) -> Vec<String> {
    let mut args = vec!["buildx".to_owned(), "build".to_owned()];
    if let Some(builder) = builder {
        args.extend(["--builder".to_owned(), builder.to_owned()]);
    }
    args.extend([
        "--platform".to_owned(),
        platforms.to_owned(),
        "-f".to_owned(),
        dir.join("Dockerfile").display().to_string(),
        "--target".to_owned(),
        rendered.target.clone(),
    ]);
    for (name, path) in &rendered.contexts {
        args.extend([
            "--build-context".to_owned(),
            format!("{name}={}", path.display()),
        ]);
    }
    args.extend(["--output".to_owned(), output.to_owned()]);
    args.push(dir.display().to_string());
    args
}

/// Contents of the first regular file in a tar stream.
fn first_file(archive: &[u8]) -> Result<Bytes, String> {
    let mut tar = tar::Archive::new(archive);
    let entries = tar.entries().map_err(|e| format!("bad archive: {e}"))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| format!("bad archive entry: {e}"))?;
        match entry.header().entry_type() {
            tar::EntryType::Regular | tar::EntryType::Continuous => {
                let mut data = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
                entry
                    .read_to_end(&mut data)
                    .map_err(|e| format!("bad archive entry: {e}"))?;
                return Ok(Bytes::from(data));
            }
            other => return Err(format!("not a regular file ({other:?})")),
        }
    }
    Err("empty archive".to_owned())
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}
