//! 플랫폼 탐색과 리포트 매칭
//!
//! 이미지 참조에서 플랫폼 목록을 얻고, 리포트 디렉토리에서
//! `플랫폼 키 -> 리포트 경로` 맵을 만든 뒤 둘을 매칭합니다.
//!
//! # Architecture
//!
//! ```text
//! ImageRef ──► local ManifestSource ──(miss)──► remote ManifestSource
//!                     │                               │
//!                     └──────────► ImageDescriptor ◄──┘
//!                                        │
//! report dir ──► platforms_from_report_dir
//!                                        ▼
//!                                 match_platforms ──► Vec<PatchPlatform>
//! ```
//!
//! 로컬과 원격 결과는 같은 정규화(`arm64/v8` → `arm64`)를 거치므로
//! 어느 경로로 얻었는지와 무관하게 같은 키가 나옵니다.

pub mod daemon;
pub mod registry;

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use layerfix_core::metrics as m;
use layerfix_core::reference::ImageRef;
use layerfix_core::types::{PatchPlatform, Platform};
use layerfix_report::{ReportError, ReportParser};
use tracing::{debug, info, warn};

use crate::error::PatchError;

pub use daemon::DaemonManifestSource;
pub use registry::RegistryManifestSource;

/// 리포트 디렉토리에서 허용하는 Linux 배포판 family
pub const SUPPORTED_OS_FAMILIES: &[&str] = &[
    "alpine",
    "debian",
    "ubuntu",
    "cbl-mariner",
    "azurelinux",
    "centos",
    "oracle",
    "redhat",
    "rocky",
    "amazon",
    "alma",
];

/// 인덱스의 하위 매니페스트 하나
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// 하위 매니페스트의 플랫폼 (정규화 전)
    pub platform: Platform,
    /// 하위 매니페스트 digest
    pub digest: Option<String>,
}

/// 이미지 참조가 가리키는 대상
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageDescriptor {
    /// 멀티 플랫폼 인덱스
    Index {
        /// 하위 매니페스트 (인덱스 순서)
        entries: Vec<IndexEntry>,
    },
    /// 단일 플랫폼 이미지
    Single {
        /// 이미지 설정의 플랫폼 (설정을 읽지 못했으면 `None`)
        platform: Option<Platform>,
    },
}

impl ImageDescriptor {
    /// 멀티 플랫폼 인덱스인지 여부
    pub fn is_index(&self) -> bool {
        matches!(self, Self::Index { .. })
    }
}

/// 이미지 매니페스트 조회 trait
///
/// 로컬 데몬과 원격 레지스트리가 각각 구현합니다.
pub trait ManifestSource: Send + Sync + 'static {
    /// 로그용 이름
    fn name(&self) -> &'static str;

    /// 참조가 가리키는 매니페스트를 조회합니다.
    ///
    /// 참조를 찾을 수 없으면 `Ok(None)`을 반환합니다.
    fn describe(
        &self,
        image: &ImageRef,
    ) -> impl Future<Output = Result<Option<ImageDescriptor>, PatchError>> + Send;
}

/// 로컬 우선, 원격 fallback 플랫폼 탐색기
pub struct PlatformDiscovery<L, R> {
    local: L,
    remote: R,
}

impl<L: ManifestSource, R: ManifestSource> PlatformDiscovery<L, R> {
    /// 새 탐색기를 생성합니다.
    pub fn new(local: L, remote: R) -> Self {
        Self { local, remote }
    }

    /// 참조를 로컬, 원격 순서로 조회합니다.
    ///
    /// 로컬 조회 실패는 경고만 남기고 원격으로 넘어갑니다.
    pub async fn resolve(&self, image: &ImageRef) -> Result<ImageDescriptor, PatchError> {
        match self.local.describe(image).await {
            Ok(Some(descriptor)) => {
                debug!(image = %image, source = self.local.name(), "resolved image locally");
                return Ok(descriptor);
            }
            Ok(None) => {
                debug!(image = %image, source = self.local.name(), "image not found locally");
            }
            Err(e) => {
                warn!(image = %image, source = self.local.name(), error = %e, "local lookup failed");
            }
        }

        metrics::counter!(m::DISCOVERY_REMOTE_FALLBACK_TOTAL).increment(1);

        match self.remote.describe(image).await {
            Ok(Some(descriptor)) => {
                debug!(image = %image, source = self.remote.name(), "resolved image remotely");
                Ok(descriptor)
            }
            Ok(None) => Err(PatchError::PlatformResolution {
                reference: image.to_string(),
                reason: "manifest not found locally or in the registry".to_owned(),
            }),
            Err(e) => Err(PatchError::PlatformResolution {
                reference: image.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// 참조에서 후보 플랫폼 목록을 만듭니다.
    ///
    /// 인덱스면 하위 매니페스트마다 하나, 단일 이미지면 정확히 하나입니다.
    pub async fn platforms_from_reference(
        &self,
        image: &ImageRef,
    ) -> Result<Vec<PatchPlatform>, PatchError> {
        let descriptor = self.resolve(image).await?;
        candidates(image, &descriptor)
    }

    /// 이미지 플랫폼을 리포트 디렉토리와 매칭합니다.
    ///
    /// 멀티 플랫폼 인덱스가 아니면 `NotMultiPlatform`으로 실패합니다.
    pub async fn discover_platforms(
        &self,
        image: &ImageRef,
        report_dir: &Path,
        parser: Arc<dyn ReportParser>,
    ) -> Result<Vec<PatchPlatform>, PatchError> {
        let descriptor = self.resolve(image).await?;
        if !descriptor.is_index() {
            return Err(PatchError::NotMultiPlatform(image.to_string()));
        }
        let discovered = candidates(image, &descriptor)?;

        let reports = {
            let dir = report_dir.to_path_buf();
            tokio::task::spawn_blocking(move || platforms_from_report_dir(&dir, parser.as_ref()))
                .await
                .map_err(|e| PatchError::PlatformResolution {
                    reference: image.to_string(),
                    reason: format!("report scan task failed: {e}"),
                })??
        };

        let matched = match_platforms(&discovered, &reports);
        let preserved = matched.iter().filter(|p| p.should_preserve).count();
        info!(
            image = %image,
            platforms = matched.len(),
            reports = reports.len(),
            preserved,
            "platforms discovered"
        );
        Ok(matched)
    }
}

fn candidates(
    image: &ImageRef,
    descriptor: &ImageDescriptor,
) -> Result<Vec<PatchPlatform>, PatchError> {
    let platforms = match descriptor {
        ImageDescriptor::Index { entries } => {
            let mut seen = HashSet::new();
            entries
                .iter()
                .filter(|e| is_known(&e.platform.os) && is_known(&e.platform.architecture))
                .map(|e| PatchPlatform::candidate(e.platform.clone()))
                .filter(|p| seen.insert(p.platform.key()))
                .collect::<Vec<_>>()
        }
        ImageDescriptor::Single { platform } => {
            let platform = platform.clone().ok_or_else(|| PatchError::PlatformResolution {
                reference: image.to_string(),
                reason: "image configuration has no platform".to_owned(),
            })?;
            vec![PatchPlatform::candidate(platform)]
        }
    };

    metrics::counter!(m::DISCOVERY_PLATFORMS_TOTAL).increment(platforms.len() as u64);
    Ok(platforms)
}

/// attestation 매니페스트는 `unknown/unknown`으로 기록됩니다.
fn is_known(value: &str) -> bool {
    !value.is_empty() && value != "unknown"
}

/// 리포트 디렉토리에서 `플랫폼 키 -> 리포트 경로` 맵을 만듭니다.
///
/// 하위 디렉토리와 `.json`이 아닌 파일은 건너뜁니다. 내용에서 아키텍처를
/// 얻지 못하면 파일 이름(`[report-]<os>-<arch>[-<variant>].json`)을 사용합니다.
/// 동기 I/O이므로 `spawn_blocking` 안에서 호출합니다.
pub fn platforms_from_report_dir(
    dir: &Path,
    parser: &dyn ReportParser,
) -> Result<BTreeMap<String, PathBuf>, PatchError> {
    let io_err = |source| PatchError::Io {
        path: dir.display().to_string(),
        source,
    };

    let mut paths = std::fs::read_dir(dir)
        .map_err(io_err)?
        .filter_map(|entry| match entry {
            Ok(e) => Some(e.path()),
            Err(e) => {
                warn!(error = %e, "failed to read report directory entry");
                None
            }
        })
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect::<Vec<_>>();
    // 디렉토리 순서는 파일시스템마다 다름
    paths.sort();

    let mut reports: BTreeMap<String, PathBuf> = BTreeMap::new();
    for path in paths {
        let Some(key) = report_platform_key(&path, parser) else {
            continue;
        };
        if let Some(previous) = reports.get(&key) {
            warn!(
                platform = %key,
                kept = %previous.display(),
                ignored = %path.display(),
                "duplicate report for platform"
            );
            continue;
        }
        debug!(platform = %key, report = %path.display(), "report found");
        reports.insert(key, path);
    }
    Ok(reports)
}

fn report_platform_key(path: &Path, parser: &dyn ReportParser) -> Option<String> {
    let from_name = || {
        let key = platform_from_file_name(path).map(|p| p.key());
        if key.is_none() {
            warn!(report = %path.display(), "no platform in report content or file name");
        }
        key
    };

    match parser.parse(path) {
        Ok(manifest) => {
            let family = manifest.os.family.to_ascii_lowercase();
            if !family.is_empty() && !SUPPORTED_OS_FAMILIES.contains(&family.as_str()) {
                warn!(report = %path.display(), os = %family, "unsupported os family, skipping report");
                return None;
            }
            manifest.platform().map(|p| p.key()).or_else(from_name)
        }
        Err(ReportError::NoPatchableResults { .. }) => from_name(),
        Err(e) => {
            warn!(report = %path.display(), error = %e, "unreadable report, skipping");
            None
        }
    }
}

/// `[report-]<os>-<arch>[-<variant>].json` 형식의 파일 이름에서 플랫폼을 읽습니다.
pub fn platform_from_file_name(path: &Path) -> Option<Platform> {
    let stem = path.file_stem()?.to_str()?;
    let stem = stem.strip_prefix("report-").unwrap_or(stem);
    let mut parts = stem.split('-');
    let os = parts.next().filter(|s| !s.is_empty())?;
    let arch = parts.next().filter(|s| !s.is_empty())?;
    let variant = parts.next().unwrap_or_default();
    if parts.next().is_some() {
        return None;
    }
    Some(Platform::new(os, arch).with_variant(variant).normalized())
}

/// 탐색된 플랫폼과 리포트 맵을 매칭합니다.
///
/// 리포트가 있으면 경로를 연결하고, 없으면 `should_preserve`를 설정합니다.
/// 입력만으로 결과가 정해지는 순수 함수입니다.
pub fn match_platforms(
    discovered: &[PatchPlatform],
    reports: &BTreeMap<String, PathBuf>,
) -> Vec<PatchPlatform> {
    discovered
        .iter()
        .map(|candidate| {
            let platform = candidate.platform.clone();
            let report_file = reports.get(&platform.key()).cloned();
            let should_preserve = report_file.is_none();
            if should_preserve {
                debug!(platform = %platform, "no report, platform will be preserved");
            }
            PatchPlatform {
                platform,
                report_file,
                should_preserve,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(arch: &str, variant: &str) -> PatchPlatform {
        PatchPlatform::candidate(Platform::new("linux", arch).with_variant(variant))
    }

    #[test]
    fn arm64_v8_matches_plain_arm64_report() {
        let mut reports = BTreeMap::new();
        reports.insert("linux/arm64".to_owned(), PathBuf::from("/r/linux-arm64.json"));

        let discovered = vec![PatchPlatform {
            platform: Platform::new("linux", "arm64").with_variant("v8"),
            report_file: None,
            should_preserve: false,
        }];
        let matched = match_platforms(&discovered, &reports);
        assert!(!matched[0].should_preserve);
        assert_eq!(matched[0].report_file.as_deref(), Some(Path::new("/r/linux-arm64.json")));
    }

    #[test]
    fn matching_keeps_the_descriptor_variant() {
        let mut reports = BTreeMap::new();
        reports.insert("linux/arm64".to_owned(), PathBuf::from("/r/linux-arm64.json"));
        let matched = match_platforms(&[candidate("arm64", "v8")], &reports);
        assert_eq!(matched[0].platform.variant, "v8");
        assert_eq!(matched[0].report_file.as_deref(), Some(Path::new("/r/linux-arm64.json")));
    }

    #[test]
    fn matching_is_idempotent() {
        let mut reports = BTreeMap::new();
        reports.insert("linux/amd64".to_owned(), PathBuf::from("/r/a.json"));
        let discovered = vec![candidate("amd64", ""), candidate("arm", "v7")];

        let once = match_platforms(&discovered, &reports);
        let twice = match_platforms(&once, &reports);
        assert_eq!(once, twice);
        assert!(!once[0].should_preserve);
        assert!(once[1].should_preserve);
        assert!(once[1].report_file.is_none());
    }

    #[test]
    fn file_name_keys() {
        let p = platform_from_file_name(Path::new("/r/report-linux-arm-v7.json")).unwrap();
        assert_eq!(p.key(), "linux/arm/v7");
        let p = platform_from_file_name(Path::new("linux-arm64-v8.json")).unwrap();
        assert_eq!(p.key(), "linux/arm64");
        assert!(platform_from_file_name(Path::new("summary.json")).is_none());
        assert!(platform_from_file_name(Path::new("a-b-c-d.json")).is_none());
    }

    #[test]
    fn index_skips_unknown_and_duplicate_entries() {
        let image = ImageRef::parse("nginx:1.25").unwrap();
        let entry = |os: &str, arch: &str, variant: &str| IndexEntry {
            platform: Platform::new(os, arch).with_variant(variant),
            digest: None,
        };
        let descriptor = ImageDescriptor::Index {
            entries: vec![
                entry("linux", "amd64", ""),
                entry("unknown", "unknown", ""),
                entry("linux", "", ""),
                entry("linux", "arm64", "v8"),
                entry("linux", "arm64", ""),
            ],
        };
        let keys: Vec<String> = candidates(&image, &descriptor)
            .unwrap()
            .iter()
            .map(|p| p.platform.key())
            .collect();
        assert_eq!(keys, ["linux/amd64", "linux/arm64"]);
    }

    #[test]
    fn single_image_needs_a_platform() {
        let image = ImageRef::parse("nginx:1.25").unwrap();
        let err = candidates(&image, &ImageDescriptor::Single { platform: None }).unwrap_err();
        assert!(matches!(err, PatchError::PlatformResolution { .. }));

        let one = candidates(
            &image,
            &ImageDescriptor::Single {
                platform: Some(Platform::new("linux", "s390x")),
            },
        )
        .unwrap();
        assert_eq!(one.len(), 1);
    }
}
