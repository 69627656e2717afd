//! Container image references.
//!
//! [`ImageRef`] parses the familiar `[registry/]repository[:tag][@digest]`
//! form, fills in Docker Hub defaults and renders back to a fully
//! qualified string.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DiscoveryError;

/// Default registry for unqualified references.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// API endpoint behind [`DEFAULT_REGISTRY`].
pub const DOCKER_HUB_HOST: &str = "registry-1.docker.io";

const DEFAULT_TAG: &str = "latest";
const MAX_TAG_LEN: usize = 128;

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageRef {
    registry: String,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageRef {
    /// Parses a reference string.
    pub fn parse(input: &str) -> Result<Self, DiscoveryError> {
        let input = input.trim();
        let invalid = |reason: &str| DiscoveryError::Resolution {
            reference: input.to_owned(),
            reason: format!("invalid image reference: {reason}"),
        };

        if input.is_empty() {
            return Err(invalid("empty"));
        }

        let (name_and_tag, digest) = match input.split_once('@') {
            Some((left, digest)) => {
                validate_digest(digest).map_err(|r| invalid(&r))?;
                (left, Some(digest.to_owned()))
            }
            None => (input, None),
        };

        let last_slash = name_and_tag.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match name_and_tag[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (
                    &name_and_tag[..split],
                    Some(name_and_tag[split + 1..].to_owned()),
                )
            }
            None => (name_and_tag, None),
        };

        if let Some(tag) = &tag {
            validate_tag(tag).map_err(|r| invalid(&r))?;
        }

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_owned(), rest.to_owned())
            }
            _ => (DEFAULT_REGISTRY.to_owned(), name.to_owned()),
        };

        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{repository}")
        } else {
            repository
        };

        validate_repository(&repository).map_err(|r| invalid(&r))?;

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Registry name as written (`docker.io` for Docker Hub).
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Host to contact for the distribution API.
    pub fn registry_host(&self) -> &str {
        if self.registry == DEFAULT_REGISTRY {
            DOCKER_HUB_HOST
        } else {
            &self.registry
        }
    }

    /// Repository path inside the registry.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Tag, defaulting to `latest`.
    pub fn tag(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }

    /// Whether a tag was written explicitly.
    pub fn has_explicit_tag(&self) -> bool {
        self.tag.is_some()
    }

    /// Content digest if the reference is pinned.
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// The manifest reference to request: digest if pinned, else tag.
    pub fn reference(&self) -> &str {
        self.digest.as_deref().unwrap_or_else(|| self.tag())
    }

    /// `registry/repository` without tag or digest.
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Same repository with another tag. Any digest is dropped.
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: Some(tag.into()),
            digest: None,
        }
    }

    /// Same repository pinned to a digest (`repo@digest`).
    pub fn with_digest(&self, digest: impl Into<String>) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest.into()),
        }
    }

    /// Tag for patched output: `<tag>-<suffix>`, or just `<suffix>`
    /// when the source was pinned by digest only.
    pub fn patched_tag(&self, suffix: &str) -> String {
        match &self.tag {
            Some(tag) => format!("{tag}-{suffix}"),
            None if self.digest.is_some() => suffix.to_owned(),
            None => format!("{DEFAULT_TAG}-{suffix}"),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        match (&self.tag, &self.digest) {
            (_, Some(digest)) if self.tag.is_none() => write!(f, "@{digest}"),
            (Some(tag), Some(digest)) => write!(f, ":{tag}@{digest}"),
            (Some(tag), None) => write!(f, ":{tag}"),
            (None, _) => write!(f, ":{DEFAULT_TAG}"),
        }
    }
}

impl FromStr for ImageRef {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ImageRef {
    type Error = DiscoveryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImageRef> for String {
    fn from(value: ImageRef) -> Self {
        value.to_string()
    }
}

fn validate_digest(digest: &str) -> Result<(), String> {
    let (algo, hex) = digest
        .split_once(':')
        .ok_or_else(|| format!("digest '{digest}' lacks an algorithm prefix"))?;
    if algo.is_empty() || hex.is_empty() {
        return Err(format!("digest '{digest}' is incomplete"));
    }
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("digest '{digest}' is not hex encoded"));
    }
    Ok(())
}

fn validate_tag(tag: &str) -> Result<(), String> {
    if tag.is_empty() || tag.len() > MAX_TAG_LEN {
        return Err(format!("tag must be 1-{MAX_TAG_LEN} characters"));
    }
    if tag.starts_with(['.', '-']) {
        return Err(format!("tag '{tag}' must start with a letter, digit or '_'"));
    }
    if !tag
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(format!("tag '{tag}' contains invalid characters"));
    }
    Ok(())
}

fn validate_repository(repository: &str) -> Result<(), String> {
    if repository.is_empty() || repository.split('/').any(str::is_empty) {
        return Err("repository path has an empty component".to_owned());
    }
    if !repository.chars().all(|c| {
        c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-' | '/')
    }) {
        return Err(format!(
            "repository '{repository}' must be lowercase alphanumerics and separators"
        ));
    }
    Ok(())
}
