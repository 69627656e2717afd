//! Remote registry manifest source.
//!
//! Talks the OCI distribution API directly: fetch the manifest for the
//! reference, and for a single image manifest also fetch the config blob to
//! learn its platform. Anonymous pulls that answer `401` are retried once with
//! a bearer token negotiated from the `WWW-Authenticate` challenge.

use std::time::Duration;

use layerfix_core::reference::ImageRef;
use layerfix_core::types::Platform;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{ImageDescriptor, IndexEntry, ManifestSource};
use crate::config::PatcherConfig;
use crate::error::PatchError;

/// Manifest media types we accept, index types first.
pub const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.index.v1+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json";

/// Manifests and configs are small; anything bigger is not what we asked for.
const MAX_MANIFEST_SIZE: usize = 4 * 1024 * 1024;

/// Parsed `WWW-Authenticate: Bearer ...` challenge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

/// Manifest body, reduced to what discovery needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestBody {
    Index(Vec<IndexEntry>),
    Image { config_digest: String },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    manifests: Option<Vec<RawDescriptor>>,
    #[serde(default)]
    config: Option<RawDescriptor>,
}

#[derive(Deserialize)]
struct RawDescriptor {
    #[serde(default)]
    digest: Option<String>,
    #[serde(default)]
    platform: Option<RawPlatform>,
}

#[derive(Deserialize)]
struct RawPlatform {
    #[serde(default)]
    os: String,
    #[serde(default)]
    architecture: String,
    #[serde(default)]
    variant: String,
    #[serde(default, rename = "os.version")]
    os_version: String,
}

impl From<RawPlatform> for Platform {
    fn from(raw: RawPlatform) -> Self {
        Platform::new(raw.os, raw.architecture)
            .with_variant(raw.variant)
            .with_os_version(raw.os_version)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Manifest source backed by the registry's HTTP API.
#[derive(Clone)]
pub struct RegistryManifestSource {
    client: Client,
    insecure_registries: Vec<String>,
}

impl RegistryManifestSource {
    /// Creates a client with the given request timeout.
    pub fn new(timeout: Duration, insecure_registries: Vec<String>) -> Result<Self, PatchError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(30)))
            .user_agent(format!("layerfix/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PatchError::Config {
                field: "registry".to_owned(),
                reason: format!("failed to build http client: {e}"),
            })?;
        Ok(Self {
            client,
            insecure_registries,
        })
    }

    /// Creates a client from the registry settings.
    pub fn from_config(config: &PatcherConfig) -> Result<Self, PatchError> {
        Self::new(
            Duration::from_secs(config.registry_timeout_secs),
            config.insecure_registries.clone(),
        )
    }

    fn base_url(&self, image: &ImageRef) -> String {
        let host = image.registry_host();
        let scheme = if self.insecure_registries.iter().any(|r| r == host || r == image.registry()) {
            "http"
        } else {
            "https"
        };
        format!("{scheme}://{host}/v2/{}", image.repository())
    }

    /// GET with one bearer-token retry. `Ok(None)` on 404.
    async fn fetch(
        &self,
        image: &ImageRef,
        url: &str,
        accept: &str,
    ) -> Result<Option<(Option<String>, bytes::Bytes)>, PatchError> {
        let resolution = |reason: String| PatchError::PlatformResolution {
            reference: image.to_string(),
            reason,
        };

        debug!(url, "registry request");
        let mut response = self
            .client
            .get(url)
            .header(ACCEPT, accept)
            .send()
            .await
            .map_err(|e| resolution(format!("request to {url} failed: {e}")))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let challenge = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_www_authenticate)
                .ok_or_else(|| resolution("registry requires unsupported authentication".to_owned()))?;
            let token = self.token(image, &challenge).await?;
            response = self
                .client
                .get(url)
                .header(ACCEPT, accept)
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .send()
                .await
                .map_err(|e| resolution(format!("request to {url} failed: {e}")))?;
        }

        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => {
                return Err(resolution(format!("{url} answered {status}")));
            }
            _ => {}
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response
            .bytes()
            .await
            .map_err(|e| resolution(format!("reading {url} failed: {e}")))?;
        if body.len() > MAX_MANIFEST_SIZE {
            return Err(resolution(format!("{url} returned {} bytes", body.len())));
        }
        Ok(Some((content_type, body)))
    }

    async fn token(&self, image: &ImageRef, challenge: &BearerChallenge) -> Result<String, PatchError> {
        let scope = challenge
            .scope
            .clone()
            .unwrap_or_else(|| format!("repository:{}:pull", image.repository()));
        let mut query = vec![("scope", scope)];
        if let Some(service) = &challenge.service {
            query.push(("service", service.clone()));
        }

        let failed = |reason: String| PatchError::PlatformResolution {
            reference: image.to_string(),
            reason: format!("token request to {} failed: {reason}", challenge.realm),
        };

        let response = self
            .client
            .get(&challenge.realm)
            .query(&query)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(failed(response.status().to_string()));
        }
        let token: TokenResponse = response.json().await.map_err(|e| failed(e.to_string()))?;
        token
            .token
            .or(token.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| failed("response carried no token".to_owned()))
    }
}

impl ManifestSource for RegistryManifestSource {
    fn name(&self) -> &'static str {
        "registry"
    }

    async fn describe(&self, image: &ImageRef) -> Result<Option<ImageDescriptor>, PatchError> {
        let base = self.base_url(image);
        let url = format!("{base}/manifests/{}", image.reference());
        let Some((content_type, body)) = self.fetch(image, &url, MANIFEST_ACCEPT).await? else {
            return Ok(None);
        };

        let malformed = |reason: String| PatchError::PlatformResolution {
            reference: image.to_string(),
            reason,
        };

        match parse_manifest_body(content_type.as_deref(), &body).map_err(malformed)? {
            ManifestBody::Index(entries) => Ok(Some(ImageDescriptor::Index { entries })),
            ManifestBody::Image { config_digest } => {
                let url = format!("{base}/blobs/{config_digest}");
                let platform = match self.fetch(image, &url, "*/*").await? {
                    Some((_, config)) => parse_config_platform(&config),
                    None => None,
                };
                Ok(Some(ImageDescriptor::Single { platform }))
            }
        }
    }
}

/// Classifies a manifest response.
///
/// The body's `mediaType` wins over the `Content-Type` header; bodies with
/// neither are classified by shape.
pub fn parse_manifest_body(content_type: Option<&str>, body: &[u8]) -> Result<ManifestBody, String> {
    let raw: RawManifest =
        serde_json::from_slice(body).map_err(|e| format!("malformed manifest: {e}"))?;
    let media_type = raw
        .media_type
        .clone()
        .or_else(|| content_type.map(str::to_owned))
        .unwrap_or_default();

    let is_index = media_type.contains("manifest.list")
        || media_type.contains("image.index")
        || (raw.manifests.is_some() && raw.config.is_none());

    if is_index {
        let entries = raw
            .manifests
            .unwrap_or_default()
            .into_iter()
            .map(|d| IndexEntry {
                platform: d.platform.map(Platform::from).unwrap_or_default(),
                digest: d.digest,
            })
            .collect();
        return Ok(ManifestBody::Index(entries));
    }

    raw.config
        .and_then(|c| c.digest)
        .map(|config_digest| ManifestBody::Image { config_digest })
        .ok_or_else(|| format!("manifest of type '{media_type}' has no config descriptor"))
}

/// Reads the platform out of an image config blob.
pub fn parse_config_platform(config: &[u8]) -> Option<Platform> {
    let raw: RawPlatform = serde_json::from_slice(config).ok()?;
    if raw.os.is_empty() || raw.architecture.is_empty() {
        return None;
    }
    Some(raw.into())
}

/// Parses a `Bearer` challenge. Other schemes yield `None`.
pub fn parse_www_authenticate(header: &str) -> Option<BearerChallenge> {
    let (scheme, params) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let mut challenge = BearerChallenge::default();
    for (key, value) in split_params(params) {
        match key.to_ascii_lowercase().as_str() {
            "realm" => challenge.realm = value,
            "service" => challenge.service = Some(value),
            "scope" => challenge.scope = Some(value),
            _ => {}
        }
    }
    (!challenge.realm.is_empty()).then_some(challenge)
}

/// `k="v, with comma",k2=v2` → pairs. Commas inside quotes do not split.
fn split_params(params: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut key = String::new();
    let mut value = String::new();
    let mut in_value = false;
    let mut quoted = false;

    let mut flush = |key: &mut String, value: &mut String| {
        let k = key.trim();
        if !k.is_empty() {
            pairs.push((k.to_owned(), value.trim().to_owned()));
        }
        key.clear();
        value.clear();
    };

    for c in params.chars() {
        match c {
            '"' if in_value => quoted = !quoted,
            '=' if !in_value => in_value = true,
            ',' if !quoted => {
                flush(&mut key, &mut value);
                in_value = false;
            }
            c if in_value => value.push(c),
            c => key.push(c),
        }
    }
    flush(&mut key, &mut value);
    pairs
}
