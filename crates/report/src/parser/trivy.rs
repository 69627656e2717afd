//! Trivy JSON 리포트 파서
//!
//! `trivy image --format json` 출력에서 다음 정보를 사용합니다.
//!
//! ```json
//! {
//!   "Metadata": {
//!     "OS": { "Family": "debian", "Name": "12.5" },
//!     "ImageConfig": { "architecture": "arm64", "variant": "v8", "os.version": "" }
//!   },
//!   "Results": [
//!     { "Class": "os-pkgs", "Type": "debian", "Vulnerabilities": [ ... ] },
//!     { "Class": "lang-pkgs", "Type": "node-pkg", "Vulnerabilities": [ ... ] }
//!   ]
//! }
//! ```
//!
//! - `os-pkgs` 결과는 최대 하나여야 합니다.
//! - Node 계열 `lang-pkgs` 결과는 여러 개일 수 있으며 등장 순서대로 합쳐집니다.

use std::collections::BTreeMap;

use layerfix_core::types::{Ecosystem, OsInfo, UpdateManifest};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::ReportError;
use crate::parser::{PackageCollector, ParseOptions, RawEntry, ReportParser};

/// OS 패키지 결과 클래스
const CLASS_OS_PKGS: &str = "os-pkgs";
/// 언어 패키지 결과 클래스
const CLASS_LANG_PKGS: &str = "lang-pkgs";
/// Node 생태계로 취급하는 결과 타입
const NODE_TYPES: [&str; 5] = ["npm", "yarn", "pnpm", "nodejs", "node-pkg"];

/// Trivy 리포트 파서
#[derive(Debug, Clone, Default)]
pub struct TrivyParser {
    options: ParseOptions,
}

impl TrivyParser {
    /// 옵션을 지정해 파서를 생성합니다.
    pub fn new(options: ParseOptions) -> Self {
        Self { options }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyReport {
    #[serde(default)]
    metadata: TrivyMetadata,
    #[serde(default)]
    results: Option<Vec<TrivyResult>>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyMetadata {
    #[serde(rename = "OS", default)]
    os: Option<TrivyOs>,
    #[serde(default)]
    image_config: Option<TrivyImageConfig>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyOs {
    #[serde(default)]
    family: String,
    #[serde(default)]
    name: String,
}

/// OCI 이미지 설정 (키가 소문자)
#[derive(Default, Deserialize)]
struct TrivyImageConfig {
    #[serde(default)]
    architecture: String,
    #[serde(default)]
    variant: String,
    #[serde(rename = "os.version", default)]
    os_version: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyResult {
    #[serde(default)]
    target: String,
    #[serde(default)]
    class: String,
    #[serde(rename = "Type", default)]
    kind: String,
    #[serde(default)]
    vulnerabilities: Option<Vec<TrivyVulnerability>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyVulnerability {
    #[serde(rename = "VulnerabilityID", default)]
    vulnerability_id: String,
    #[serde(default)]
    pkg_name: String,
    #[serde(default)]
    installed_version: String,
    #[serde(default)]
    fixed_version: String,
}

impl TrivyResult {
    fn is_node(&self) -> bool {
        self.class == CLASS_LANG_PKGS && NODE_TYPES.contains(&self.kind.as_str())
    }

    fn vulnerabilities(&self) -> &[TrivyVulnerability] {
        self.vulnerabilities.as_deref().unwrap_or_default()
    }
}

impl ReportParser for TrivyParser {
    fn scanner(&self) -> &'static str {
        "trivy"
    }

    fn parse_slice(&self, data: &[u8], source: &str) -> Result<UpdateManifest, ReportError> {
        let report: TrivyReport =
            serde_json::from_slice(data).map_err(|e| ReportError::Malformed {
                path: source.to_owned(),
                reason: e.to_string(),
            })?;

        let results = report.results.unwrap_or_default();

        let mut os_result: Option<&TrivyResult> = None;
        let mut node_results: Vec<&TrivyResult> = Vec::new();
        for result in &results {
            if result.class == CLASS_OS_PKGS {
                if os_result.is_some() {
                    return Err(ReportError::ConflictingResults {
                        path: source.to_owned(),
                        reason: "unexpected multiple results for os-pkgs".to_owned(),
                    });
                }
                os_result = Some(result);
            } else if result.is_node() {
                debug!(source, target = %result.target, kind = %result.kind, "found node results");
                node_results.push(result);
            }
        }

        if os_result.is_none() && node_results.is_empty() {
            return Err(ReportError::NoPatchableResults {
                path: source.to_owned(),
            });
        }

        let os = report.metadata.os.unwrap_or_default();
        let config = report.metadata.image_config.unwrap_or_default();

        let mut collector = PackageCollector::new(self.options, source);

        let mut os_updates = Vec::new();
        if let Some(result) = os_result {
            for v in result.vulnerabilities() {
                collector.push(raw(v), &mut os_updates);
            }
        }

        let mut lang_updates = BTreeMap::new();
        if !node_results.is_empty() {
            let mut node_updates = Vec::new();
            for result in &node_results {
                for v in result.vulnerabilities() {
                    collector.push(raw(v), &mut node_updates);
                }
            }
            lang_updates.insert(Ecosystem::Node, node_updates);
        }

        let manifest = UpdateManifest {
            os: OsInfo {
                family: os.family,
                version: os.name,
            },
            arch: config.architecture,
            variant: config.variant,
            os_version: config.os_version,
            os_updates,
            lang_updates,
            rejected: collector.into_rejected(),
        };

        info!(
            source,
            os_updates = manifest.os_updates.len(),
            node_updates = manifest.lang(Ecosystem::Node).len(),
            rejected = manifest.rejected.len(),
            "parsed trivy report"
        );

        Ok(manifest)
    }
}

fn raw(v: &TrivyVulnerability) -> RawEntry<'_> {
    RawEntry {
        name: &v.pkg_name,
        installed_version: &v.installed_version,
        fixed_version: &v.fixed_version,
        vulnerability_id: &v.vulnerability_id,
    }
}
