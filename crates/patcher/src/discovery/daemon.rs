//! Docker daemon manifest source.
//!
//! Asks the local daemon first: `distribution inspect` resolves the reference
//! with the daemon's own credentials and reports whether it names an index;
//! a plain `image inspect` covers images that only exist locally.

use std::sync::Arc;

use bollard::errors::Error as BollardError;
use layerfix_core::reference::ImageRef;
use layerfix_core::types::Platform;
use tracing::debug;

use super::{ImageDescriptor, IndexEntry, ManifestSource};
use crate::error::PatchError;

/// Media types that describe a multi-platform index.
const INDEX_MEDIA_MARKERS: &[&str] = &["manifest.list", "image.index"];

/// Manifest source backed by the Docker daemon.
pub struct DaemonManifestSource {
    docker: Arc<bollard::Docker>,
}

impl DaemonManifestSource {
    /// Connects using the platform's default socket.
    pub fn connect_local() -> Result<Self, PatchError> {
        let docker = bollard::Docker::connect_with_local_defaults()
            .map_err(|e| connection_error(format!("failed to connect to docker: {e}")))?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }

    /// Connects to a specific socket path.
    pub fn connect_with_socket(socket_path: &str) -> Result<Self, PatchError> {
        let docker =
            bollard::Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| {
                    connection_error(format!("failed to connect to docker at {socket_path}: {e}"))
                })?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }

    /// Connects to `socket_path`, or the local default when it is empty.
    pub fn connect(socket_path: &str) -> Result<Self, PatchError> {
        if socket_path.trim().is_empty() {
            Self::connect_local()
        } else {
            Self::connect_with_socket(socket_path)
        }
    }

    /// Shares an existing client.
    pub fn from_client(docker: Arc<bollard::Docker>) -> Self {
        Self { docker }
    }

    async fn distribution(&self, image: &ImageRef) -> Result<Option<ImageDescriptor>, PatchError> {
        let name = image.to_string();
        let inspect = match self.docker.inspect_registry_image(&name, None).await {
            Ok(inspect) => inspect,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => {
                return Err(PatchError::PlatformResolution {
                    reference: name,
                    reason: format!("distribution inspect failed: {e}"),
                });
            }
        };

        let media_type = inspect.descriptor.media_type.unwrap_or_default();
        let platforms = inspect
            .platforms
            .into_iter()
            .map(|p| {
                Platform::new(p.os.unwrap_or_default(), p.architecture.unwrap_or_default())
                    .with_variant(p.variant.unwrap_or_default())
                    .with_os_version(p.os_version.unwrap_or_default())
            })
            .collect::<Vec<_>>();

        debug!(image = %image, media_type = %media_type, platforms = platforms.len(), "distribution inspect");

        if INDEX_MEDIA_MARKERS.iter().any(|m| media_type.contains(m)) {
            Ok(Some(ImageDescriptor::Index {
                entries: platforms
                    .into_iter()
                    .map(|platform| IndexEntry {
                        platform,
                        digest: None,
                    })
                    .collect(),
            }))
        } else {
            Ok(Some(ImageDescriptor::Single {
                platform: platforms.into_iter().next(),
            }))
        }
    }

    async fn local_image(&self, image: &ImageRef) -> Result<Option<ImageDescriptor>, PatchError> {
        let name = image.to_string();
        let inspect = match self.docker.inspect_image(&name).await {
            Ok(inspect) => inspect,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => {
                return Err(PatchError::PlatformResolution {
                    reference: name,
                    reason: format!("image inspect failed: {e}"),
                });
            }
        };

        let platform = match (inspect.os, inspect.architecture) {
            (Some(os), Some(arch)) if !os.is_empty() && !arch.is_empty() => Some(
                Platform::new(os, arch)
                    .with_variant(inspect.variant.unwrap_or_default())
                    .with_os_version(inspect.os_version.unwrap_or_default()),
            ),
            _ => None,
        };
        Ok(Some(ImageDescriptor::Single { platform }))
    }
}

impl ManifestSource for DaemonManifestSource {
    fn name(&self) -> &'static str {
        "docker-daemon"
    }

    async fn describe(&self, image: &ImageRef) -> Result<Option<ImageDescriptor>, PatchError> {
        match self.distribution(image).await {
            Ok(Some(descriptor)) => Ok(Some(descriptor)),
            Ok(None) => self.local_image(image).await,
            Err(e) => {
                debug!(image = %image, error = %e, "distribution inspect unavailable, trying local image");
                match self.local_image(image).await? {
                    Some(descriptor) => Ok(Some(descriptor)),
                    None => Err(e),
                }
            }
        }
    }
}

fn connection_error(reason: String) -> PatchError {
    PatchError::Engine(layerfix_core::error::EngineError::Connection(reason))
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
