//! 도메인 타입 — 시스템 전역에서 사용되는 공통 타입
//!
//! 플랫폼 식별자, 업데이트 매니페스트, 패치 결과처럼
//! 리포트 파서, 패키지 매니저, 오케스트레이터가 함께 사용하는 구조를 정의합니다.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// 이미지 플랫폼 식별자
///
/// `os/architecture[/variant]` 형식에 선택적인 OS 버전을 더한 값입니다.
/// 비교와 키 생성은 항상 [`Platform::normalized`] 결과를 기준으로 합니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Platform {
    /// 운영체제 (예: "linux")
    pub os: String,
    /// CPU 아키텍처 (예: "amd64", "arm64")
    pub architecture: String,
    /// 아키텍처 변형 (예: "v7"), 없으면 빈 문자열
    #[serde(default)]
    pub variant: String,
    /// OS 버전 (Windows 이미지 등), 없으면 빈 문자열
    #[serde(default)]
    pub os_version: String,
}

impl Platform {
    /// 새 플랫폼을 생성합니다.
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            architecture: architecture.into(),
            variant: String::new(),
            os_version: String::new(),
        }
    }

    /// 변형을 지정합니다.
    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = variant.into();
        self
    }

    /// OS 버전을 지정합니다.
    pub fn with_os_version(mut self, os_version: impl Into<String>) -> Self {
        self.os_version = os_version.into();
        self
    }

    /// `os/arch[/variant]` 문자열을 파싱합니다. 결과는 정규화됩니다.
    pub fn parse(spec: &str) -> Option<Self> {
        let mut parts = spec.trim().split('/');
        let os = parts.next().filter(|s| !s.is_empty())?;
        let arch = parts.next().filter(|s| !s.is_empty())?;
        let variant = parts.next().unwrap_or_default();
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(os, arch).with_variant(variant).normalized())
    }

    /// `arm64/v8`을 변형 없는 `arm64`로 접습니다.
    ///
    /// 레지스트리와 빌드 도구가 두 표기를 혼용하므로
    /// 매칭 전에 항상 이 형태로 맞춥니다.
    pub fn normalized(&self) -> Self {
        let mut p = self.clone();
        if p.architecture == "arm64" && p.variant == "v8" {
            p.variant.clear();
        }
        p
    }

    /// 매칭 키: `OS/Architecture[/Variant][@OSVersion]`
    pub fn key(&self) -> String {
        let p = self.normalized();
        let mut key = format!("{}/{}", p.os, p.architecture);
        if !p.variant.is_empty() {
            key.push('/');
            key.push_str(&p.variant);
        }
        if !p.os_version.is_empty() {
            key.push('@');
            key.push_str(&p.os_version);
        }
        key
    }

    /// 정규화하지 않은 `os/arch[/variant]` 표기 (OCI 인덱스 기술자 그대로)
    pub fn descriptor_spec(&self) -> String {
        if self.variant.is_empty() {
            format!("{}/{}", self.os, self.architecture)
        } else {
            format!("{}/{}/{}", self.os, self.architecture, self.variant)
        }
    }

    /// 빌드 도구에 넘기는 `os/arch[/variant]` 표기
    pub fn spec(&self) -> String {
        let p = self.normalized();
        if p.variant.is_empty() {
            format!("{}/{}", p.os, p.architecture)
        } else {
            format!("{}/{}/{}", p.os, p.architecture, p.variant)
        }
    }

    /// 플랫폼별 태그 접미사: `-arch[-variant]`
    pub fn tag_suffix(&self) -> String {
        let p = self.normalized();
        if p.variant.is_empty() {
            format!("-{}", p.architecture)
        } else {
            format!("-{}-{}", p.architecture, p.variant)
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// 패치 대상 플랫폼
///
/// 탐색 단계에서 만들어지며, 대응하는 리포트가 없으면
/// `should_preserve`가 설정되어 원본 그대로 전달됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchPlatform {
    /// 플랫폼 식별자
    pub platform: Platform,
    /// 이 플랫폼에 대응하는 리포트 파일
    pub report_file: Option<PathBuf>,
    /// 패치 없이 원본을 유지할지 여부
    pub should_preserve: bool,
}

impl PatchPlatform {
    /// 리포트가 아직 연결되지 않은 후보 플랫폼을 생성합니다.
    ///
    /// 플랫폼은 인덱스에 적힌 그대로 보관합니다. 매칭은 [`Platform::key`]로 합니다.
    pub fn candidate(platform: Platform) -> Self {
        Self {
            platform,
            report_file: None,
            should_preserve: false,
        }
    }
}

/// 취약점이 수정된 버전으로 올려야 하는 패키지 하나
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePackage {
    /// 패키지 이름
    pub name: String,
    /// 현재 설치된 버전
    pub installed_version: String,
    /// 수정 버전
    pub fixed_version: String,
    /// 취약점 ID (CVE 등)
    pub vulnerability_id: String,
}

impl fmt::Display for UpdatePackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {} ({})",
            self.name, self.installed_version, self.fixed_version, self.vulnerability_id
        )
    }
}

/// 패키지 생태계
///
/// OS 수준 생태계는 이미지 배포판의 패키지 데이터베이스를,
/// 언어 생태계는 애플리케이션 의존성 트리를 다룹니다.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    /// Debian 계열 (dpkg/apt)
    Debian,
    /// Node.js (npm)
    Node,
}

impl Ecosystem {
    /// 모든 생태계
    pub const ALL: [Ecosystem; 2] = [Ecosystem::Debian, Ecosystem::Node];

    /// OS 수준 생태계인지 여부
    pub fn is_os_level(&self) -> bool {
        matches!(self, Self::Debian)
    }

    /// PURL 타입 문자열
    pub fn purl_type(&self) -> &'static str {
        match self {
            Self::Debian => "deb",
            Self::Node => "npm",
        }
    }

    /// 리포트의 OS family를 생태계로 매핑합니다.
    pub fn from_os_family(family: &str) -> Option<Self> {
        match family.to_ascii_lowercase().as_str() {
            "debian" | "ubuntu" => Some(Self::Debian),
            _ => None,
        }
    }
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debian => write!(f, "debian"),
            Self::Node => write!(f, "node"),
        }
    }
}

/// 리포트에 기록된 운영체제 정보
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsInfo {
    /// 배포판 family (예: "debian", "ubuntu")
    pub family: String,
    /// 배포판 버전 (예: "12.5")
    pub version: String,
}

/// 스캐너 중립 업데이트 매니페스트
///
/// 리포트 파서의 출력이자 패키지 매니저의 입력입니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateManifest {
    /// 운영체제 정보
    pub os: OsInfo,
    /// 아키텍처
    pub arch: String,
    /// 아키텍처 변형
    #[serde(default)]
    pub variant: String,
    /// 이미지 설정의 OS 버전 (Windows 이미지 등)
    #[serde(default)]
    pub os_version: String,
    /// OS 패키지 업데이트
    #[serde(default)]
    pub os_updates: Vec<UpdatePackage>,
    /// 언어 생태계별 업데이트 (리포트 등장 순서 유지)
    #[serde(default)]
    pub lang_updates: BTreeMap<Ecosystem, Vec<UpdatePackage>>,
    /// 수정 버전을 해석할 수 없어 설치 대상에서 제외된 패키지
    #[serde(default)]
    pub rejected: Vec<UpdatePackage>,
}

impl UpdateManifest {
    /// 설치할 업데이트가 하나도 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.os_updates.is_empty() && self.lang_updates.values().all(Vec::is_empty)
    }

    /// 설치 대상 업데이트 수
    pub fn update_count(&self) -> usize {
        self.os_updates.len() + self.lang_updates.values().map(Vec::len).sum::<usize>()
    }

    /// 특정 언어 생태계의 업데이트 목록
    pub fn lang(&self, ecosystem: Ecosystem) -> &[UpdatePackage] {
        self.lang_updates
            .get(&ecosystem)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// 매니페스트에 기록된 플랫폼 (OS는 항상 linux)
    pub fn platform(&self) -> Option<Platform> {
        if self.arch.is_empty() {
            return None;
        }
        Some(
            Platform::new("linux", self.arch.clone())
                .with_variant(self.variant.clone())
                .with_os_version(self.os_version.clone())
                .normalized(),
        )
    }
}

/// 플랫폼 하나의 처리 결과 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PatchStatus {
    /// 업데이트가 적용된 새 이미지가 만들어짐
    Patched,
    /// 적용할 업데이트가 없어 원본을 그대로 사용
    Unchanged,
    /// 리포트가 없어 원본을 보존
    Preserved,
    /// 처리 실패, 원본으로 대체
    Failed { reason: String },
}

/// 업데이트에 성공한 패키지 기록
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatedPackage {
    /// 생태계
    pub ecosystem: Ecosystem,
    /// 업데이트 정보
    pub package: UpdatePackage,
}

/// 플랫폼 하나의 패치 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchResult {
    /// 원본 이미지 참조
    pub original_ref: String,
    /// 결과 이미지 참조 (패치되지 않았으면 원본과 같음)
    pub patched_ref: String,
    /// 플랫폼
    pub platform: Platform,
    /// 처리 상태
    pub status: PatchStatus,
    /// 리포트의 OS family (리포트를 읽지 않았으면 빈 문자열)
    #[serde(default)]
    pub os_family: String,
    /// 업데이트에 실패한 패키지 이름
    #[serde(default)]
    pub failed_packages: Vec<String>,
    /// 업데이트에 성공한 패키지
    #[serde(default)]
    pub updated_packages: Vec<UpdatedPackage>,
}

impl PatchResult {
    /// 원본을 그대로 전달하는 결과를 만듭니다.
    pub fn passthrough(reference: impl Into<String>, platform: Platform, status: PatchStatus) -> Self {
        let reference = reference.into();
        Self {
            original_ref: reference.clone(),
            patched_ref: reference,
            platform,
            status,
            os_family: String::new(),
            failed_packages: Vec::new(),
            updated_packages: Vec::new(),
        }
    }

    /// 조립 시 사용할 이미지 참조
    pub fn effective_ref(&self) -> &str {
        match self.status {
            PatchStatus::Patched => &self.patched_ref,
            _ => &self.original_ref,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm64_v8_normalizes_to_plain_arm64() {
        let p = Platform::new("linux", "arm64").with_variant("v8");
        assert_eq!(p.normalized().variant, "");
        assert_eq!(p.key(), "linux/arm64");
        assert_eq!(p.key(), Platform::new("linux", "arm64").key());
    }

    #[test]
    fn candidate_keeps_descriptor_platform() {
        let c = PatchPlatform::candidate(Platform::new("linux", "arm64").with_variant("v8"));
        assert_eq!(c.platform.variant, "v8");
        assert_eq!(c.platform.descriptor_spec(), "linux/arm64/v8");
        assert_eq!(c.platform.spec(), "linux/arm64");
        assert_eq!(c.platform.key(), "linux/arm64");
    }

    #[test]
    fn key_includes_variant_and_os_version() {
        let p = Platform::new("linux", "arm").with_variant("v7");
        assert_eq!(p.key(), "linux/arm/v7");

        let w = Platform::new("windows", "amd64").with_os_version("10.0.20348.2340");
        assert_eq!(w.key(), "windows/amd64@10.0.20348.2340");
    }

    #[test]
    fn tag_suffix_uses_normalized_form() {
        assert_eq!(Platform::new("linux", "amd64").tag_suffix(), "-amd64");
        assert_eq!(
            Platform::new("linux", "arm").with_variant("v7").tag_suffix(),
            "-arm-v7"
        );
        assert_eq!(
            Platform::new("linux", "arm64").with_variant("v8").tag_suffix(),
            "-arm64"
        );
    }

    #[test]
    fn parse_platform_spec() {
        let p = Platform::parse("linux/arm/v6").unwrap();
        assert_eq!(p.architecture, "arm");
        assert_eq!(p.variant, "v6");
        assert_eq!(Platform::parse("linux/arm64/v8").unwrap().variant, "");
        assert!(Platform::parse("linux").is_none());
        assert!(Platform::parse("linux/arm/v7/extra").is_none());
        assert!(Platform::parse("/amd64").is_none());
    }

    #[test]
    fn manifest_emptiness_counts_all_sections() {
        let mut manifest = UpdateManifest::default();
        assert!(manifest.is_empty());

        manifest.lang_updates.insert(Ecosystem::Node, Vec::new());
        assert!(manifest.is_empty());

        manifest
            .lang_updates
            .get_mut(&Ecosystem::Node)
            .unwrap()
            .push(UpdatePackage {
                name: "ansi-regex".to_owned(),
                installed_version: "3.0.0".to_owned(),
                fixed_version: "3.0.1".to_owned(),
                vulnerability_id: "CVE-2021-3807".to_owned(),
            });
        assert!(!manifest.is_empty());
        assert_eq!(manifest.update_count(), 1);
        assert_eq!(manifest.lang(Ecosystem::Node).len(), 1);
        assert!(manifest.lang(Ecosystem::Debian).is_empty());
    }

    #[test]
    fn manifest_platform_is_linux() {
        let manifest = UpdateManifest {
            arch: "arm64".to_owned(),
            variant: "v8".to_owned(),
            ..Default::default()
        };
        assert_eq!(manifest.platform().unwrap().key(), "linux/arm64");
        assert!(UpdateManifest::default().platform().is_none());

        let versioned = UpdateManifest {
            arch: "amd64".to_owned(),
            os_version: "10.0.20348.2340".to_owned(),
            ..Default::default()
        };
        assert_eq!(
            versioned.platform().unwrap().key(),
            "linux/amd64@10.0.20348.2340"
        );
    }

    #[test]
    fn ecosystem_from_os_family() {
        assert_eq!(Ecosystem::from_os_family("Debian"), Some(Ecosystem::Debian));
        assert_eq!(Ecosystem::from_os_family("ubuntu"), Some(Ecosystem::Debian));
        assert_eq!(Ecosystem::from_os_family("alpine"), None);
        assert!(Ecosystem::Debian.is_os_level());
        assert!(!Ecosystem::Node.is_os_level());
    }

    #[test]
    fn effective_ref_prefers_patched_only_when_patched() {
        let mut result = PatchResult::passthrough(
            "docker.io/library/nginx:1.25",
            Platform::new("linux", "amd64"),
            PatchStatus::Preserved,
        );
        result.patched_ref = "docker.io/library/nginx:1.25-patched-amd64".to_owned();
        assert_eq!(result.effective_ref(), "docker.io/library/nginx:1.25");

        result.status = PatchStatus::Patched;
        assert_eq!(
            result.effective_ref(),
            "docker.io/library/nginx:1.25-patched-amd64"
        );
    }

    #[test]
    fn patch_status_serializes_with_state_tag() {
        let json = serde_json::to_value(PatchStatus::Failed {
            reason: "boom".to_owned(),
        })
        .unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["reason"], "boom");
    }
}
