//! Native update manifest 파서
//!
//! 자체 스캐너 통합을 위해 스캐너 중립 형식을 그대로 받습니다.
//!
//! ```json
//! {
//!   "apiVersion": "v1alpha1",
//!   "metadata": {
//!     "os": { "type": "debian", "version": "12" },
//!     "config": { "arch": "amd64", "variant": "" }
//!   },
//!   "updates": [
//!     { "name": "libssl3", "installedVersion": "3.0.11-1~deb12u1",
//!       "fixedVersion": "3.0.11-1~deb12u2", "vulnerabilityID": "CVE-2023-5678" }
//!   ],
//!   "langUpdates": [
//!     { "type": "npm", "name": "semver", "installedVersion": "7.5.1",
//!       "fixedVersion": "7.5.2", "vulnerabilityID": "CVE-2022-25883" }
//!   ]
//! }
//! ```
//!
//! `updates`와 `langUpdates`가 모두 없으면 `NoPatchableResults`입니다.

use std::collections::BTreeMap;

use layerfix_core::types::{Ecosystem, OsInfo, UpdateManifest};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::ReportError;
use crate::parser::{PackageCollector, ParseOptions, RawEntry, ReportParser};

/// 지원하는 apiVersion
pub const API_VERSION: &str = "v1alpha1";

/// Native manifest 파서
#[derive(Debug, Clone, Default)]
pub struct NativeParser {
    options: ParseOptions,
}

impl NativeParser {
    /// 옵션을 지정해 파서를 생성합니다.
    pub fn new(options: ParseOptions) -> Self {
        Self { options }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NativeManifest {
    api_version: String,
    #[serde(default)]
    metadata: NativeMetadata,
    #[serde(default)]
    updates: Option<Vec<NativePackage>>,
    #[serde(default)]
    lang_updates: Option<Vec<NativeLangPackage>>,
}

#[derive(Default, Deserialize)]
struct NativeMetadata {
    #[serde(default)]
    os: NativeOs,
    #[serde(default)]
    config: NativeConfig,
}

#[derive(Default, Deserialize)]
struct NativeOs {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    version: String,
}

#[derive(Default, Deserialize)]
struct NativeConfig {
    #[serde(default)]
    arch: String,
    #[serde(default)]
    variant: String,
    #[serde(rename = "osVersion", default)]
    os_version: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NativePackage {
    name: String,
    #[serde(default)]
    installed_version: String,
    #[serde(default)]
    fixed_version: String,
    #[serde(rename = "vulnerabilityID", default)]
    vulnerability_id: String,
}

#[derive(Deserialize)]
struct NativeLangPackage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(flatten)]
    package: NativePackage,
}

impl NativePackage {
    fn raw(&self) -> RawEntry<'_> {
        RawEntry {
            name: &self.name,
            installed_version: &self.installed_version,
            fixed_version: &self.fixed_version,
            vulnerability_id: &self.vulnerability_id,
        }
    }
}

/// 언어 패키지 타입을 생태계로 매핑합니다.
fn lang_ecosystem(kind: &str) -> Option<Ecosystem> {
    match kind.to_ascii_lowercase().as_str() {
        "npm" | "yarn" | "pnpm" | "nodejs" | "node-pkg" | "node" => Some(Ecosystem::Node),
        _ => None,
    }
}

impl ReportParser for NativeParser {
    fn scanner(&self) -> &'static str {
        "native"
    }

    fn parse_slice(&self, data: &[u8], source: &str) -> Result<UpdateManifest, ReportError> {
        let doc: NativeManifest =
            serde_json::from_slice(data).map_err(|e| ReportError::Malformed {
                path: source.to_owned(),
                reason: e.to_string(),
            })?;

        if doc.api_version != API_VERSION {
            return Err(ReportError::Malformed {
                path: source.to_owned(),
                reason: format!(
                    "unsupported apiVersion '{}' (expected {API_VERSION})",
                    doc.api_version
                ),
            });
        }

        if doc.updates.is_none() && doc.lang_updates.is_none() {
            return Err(ReportError::NoPatchableResults {
                path: source.to_owned(),
            });
        }

        let mut collector = PackageCollector::new(self.options, source);

        let mut os_updates = Vec::new();
        for p in doc.updates.iter().flatten() {
            collector.push(p.raw(), &mut os_updates);
        }

        let mut lang_updates: BTreeMap<Ecosystem, Vec<_>> = BTreeMap::new();
        for p in doc.lang_updates.iter().flatten() {
            let Some(ecosystem) = lang_ecosystem(&p.kind) else {
                warn!(source, kind = %p.kind, package = %p.package.name, "unsupported language ecosystem, skipping");
                continue;
            };
            let out = lang_updates.entry(ecosystem).or_default();
            collector.push(p.package.raw(), out);
        }

        let manifest = UpdateManifest {
            os: OsInfo {
                family: doc.metadata.os.kind,
                version: doc.metadata.os.version,
            },
            arch: doc.metadata.config.arch,
            variant: doc.metadata.config.variant,
            os_version: doc.metadata.config.os_version,
            os_updates,
            lang_updates,
            rejected: collector.into_rejected(),
        };

        info!(
            source,
            updates = manifest.update_count(),
            rejected = manifest.rejected.len(),
            "parsed native manifest"
        );

        Ok(manifest)
    }
}
