//! OpenVEX 문서 생성
//!
//! 실제로 업데이트된 패키지만 `fixed` 상태로 기록합니다. 패키지 식별자는
//! 생태계가 드러나는 purl이어서 같은 이름의 OS 패키지와 npm 패키지가
//! 섞이지 않습니다.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use layerfix_core::types::{Ecosystem, PatchResult, PatchStatus, Platform, UpdatedPackage};

use crate::error::PatchError;
use crate::summary::PatchSummary;

const OPENVEX_CONTEXT: &str = "https://openvex.dev/ns/v0.2.0";

/// OpenVEX 루트 문서
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VexDocument {
    #[serde(rename = "@context")]
    pub context: String,
    #[serde(rename = "@id")]
    pub id: String,
    pub author: String,
    pub timestamp: String,
    pub version: u32,
    pub tooling: String,
    pub statements: Vec<VexStatement>,
}

/// 취약점 하나에 대한 진술
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VexStatement {
    pub vulnerability: VexVulnerability,
    pub products: Vec<VexProduct>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VexVulnerability {
    #[serde(rename = "@id")]
    pub id: String,
}

/// 이미지 하나와 그 안에서 수정된 패키지들
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VexProduct {
    #[serde(rename = "@id")]
    pub id: String,
    pub subcomponents: Vec<VexSubcomponent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VexSubcomponent {
    #[serde(rename = "@id")]
    pub id: String,
}

impl VexDocument {
    /// 패치된 플랫폼의 업데이트 기록으로 문서를 만듭니다.
    ///
    /// 진술은 취약점 ID 순, 제품과 하위 구성요소는 이름 순으로 정렬됩니다.
    pub fn from_summary(summary: &PatchSummary, author: &str) -> Self {
        // vulnerability -> image -> purls
        let mut grouped: BTreeMap<String, BTreeMap<String, BTreeSet<String>>> = BTreeMap::new();

        for result in summary.results.iter().filter(|r| r.status == PatchStatus::Patched) {
            for updated in &result.updated_packages {
                let id = &updated.package.vulnerability_id;
                if id.is_empty() {
                    continue;
                }
                grouped
                    .entry(id.clone())
                    .or_default()
                    .entry(result.patched_ref.clone())
                    .or_default()
                    .insert(purl(result, updated));
            }
        }

        let statements = grouped
            .into_iter()
            .map(|(vulnerability, products)| VexStatement {
                vulnerability: VexVulnerability { id: vulnerability },
                products: products
                    .into_iter()
                    .map(|(image, purls)| VexProduct {
                        id: image,
                        subcomponents: purls.into_iter().map(|id| VexSubcomponent { id }).collect(),
                    })
                    .collect(),
                status: "fixed".to_owned(),
            })
            .collect();

        Self {
            context: OPENVEX_CONTEXT.to_owned(),
            id: format!("https://openvex.dev/docs/public/vex-{}", uuid::Uuid::new_v4()),
            author: author.to_owned(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            version: 1,
            tooling: format!("layerfix {}", env!("CARGO_PKG_VERSION")),
            statements,
        }
    }

    /// 진술이 하나도 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// 문서를 파일로 씁니다.
    pub async fn write_to(&self, path: &Path) -> Result<(), PatchError> {
        let io = |source| PatchError::Io {
            path: path.display().to_string(),
            source,
        };
        let json = self.to_json().map_err(|e| io(std::io::Error::from(e)))?;
        tokio::fs::write(path, json).await.map_err(io)
    }
}

/// 업데이트된 패키지의 purl
fn purl(result: &PatchResult, updated: &UpdatedPackage) -> String {
    let package = &updated.package;
    match updated.ecosystem {
        Ecosystem::Debian => {
            let family = if result.os_family.is_empty() {
                "debian".to_owned()
            } else {
                result.os_family.to_ascii_lowercase()
            };
            format!(
                "pkg:deb/{family}/{}@{}?arch={}",
                package.name,
                package.fixed_version,
                deb_arch(&result.platform)
            )
        }
        Ecosystem::Node => format!(
            "pkg:{}/{}@{}",
            updated.ecosystem.purl_type(),
            package.name.replacen('@', "%40", 1),
            package.fixed_version
        ),
    }
}

/// Debian 아키텍처 이름
fn deb_arch(platform: &Platform) -> String {
    let p = platform.normalized();
    match (p.architecture.as_str(), p.variant.as_str()) {
        ("arm", "v7") | ("arm", "") => "armhf".to_owned(),
        ("arm", _) => "armel".to_owned(),
        ("386", _) => "i386".to_owned(),
        ("ppc64le", _) => "ppc64el".to_owned(),
        ("mips64le", _) => "mips64el".to_owned(),
        (arch, _) => arch.to_owned(),
    }
}
