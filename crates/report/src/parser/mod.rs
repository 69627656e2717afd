//! 리포트 파서 -- Trivy JSON, native update manifest
//!
//! [`ReportParser`] trait은 각 스캐너 형식의 파서가 구현해야 하는 인터페이스입니다.
//! [`parser_for`]는 설정의 스캐너 이름으로 파서를 선택합니다.
//!
//! # 지원 형식
//!
//! - `trivy` -- [`TrivyParser`]
//! - `native` -- [`NativeParser`]
//!
//! # 확장
//!
//! 새로운 스캐너를 지원하려면 `ReportParser` trait을 구현하고
//! [`parser_for`]에 등록합니다.

pub mod native;
pub mod trivy;

use std::io::Read;
use std::path::Path;

use layerfix_core::types::UpdatePackage;
use tracing::warn;

use crate::error::ReportError;
use crate::fixed::{is_plausible_version, select_fixed_version};

pub use native::NativeParser;
pub use trivy::TrivyParser;

/// 리포트 파일 최대 크기 (256 MB)
pub const MAX_REPORT_SIZE: u64 = 256 * 1024 * 1024;

/// 고정 버전으로 해석할 수 없는 수정 버전의 처리 방식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnparseablePolicy {
    /// 경고 로그만 남기고 제외
    #[default]
    Skip,
    /// `UpdateManifest::rejected`로 옮겨 실패 패키지로 보고
    Report,
}

impl UnparseablePolicy {
    /// 설정 문자열(`skip`, `report`)을 해석합니다.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Some(Self::Skip),
            "report" => Some(Self::Report),
            _ => None,
        }
    }
}

/// 파서 공통 옵션
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseOptions {
    /// 해석할 수 없는 수정 버전 처리 방식
    pub unparseable: UnparseablePolicy,
}

/// 리포트 파서 trait
///
/// 스캐너 고유 형식을 스캐너 중립 [`UpdateManifest`](layerfix_core::types::UpdateManifest)로
/// 변환합니다. 파싱은 순수 함수이며 부수 효과가 없습니다.
pub trait ReportParser: Send + Sync {
    /// 이 파서가 담당하는 스캐너 이름
    fn scanner(&self) -> &'static str;

    /// 메모리에 있는 리포트를 파싱합니다.
    ///
    /// # Arguments
    ///
    /// - `data`: 리포트 내용
    /// - `source`: 원본 경로 (에러 메시지용)
    fn parse_slice(
        &self,
        data: &[u8],
        source: &str,
    ) -> Result<layerfix_core::types::UpdateManifest, ReportError>;

    /// 파일에서 리포트를 읽어 파싱합니다.
    fn parse(&self, path: &Path) -> Result<layerfix_core::types::UpdateManifest, ReportError> {
        let data = read_report(path)?;
        self.parse_slice(&data, &path.display().to_string())
    }
}

/// 스캐너 이름으로 파서를 선택합니다.
pub fn parser_for(
    scanner: &str,
    options: ParseOptions,
) -> Result<Box<dyn ReportParser>, ReportError> {
    match scanner.trim().to_ascii_lowercase().as_str() {
        "trivy" => Ok(Box::new(TrivyParser::new(options))),
        "native" => Ok(Box::new(NativeParser::new(options))),
        other => Err(ReportError::UnknownScanner(other.to_owned())),
    }
}

/// 크기 제한을 지키며 리포트 파일을 읽습니다.
pub fn read_report(path: &Path) -> Result<Vec<u8>, ReportError> {
    let io_err = |source| ReportError::Io {
        path: path.display().to_string(),
        source,
    };

    let file = std::fs::File::open(path).map_err(io_err)?;
    let size = file.metadata().map_err(io_err)?.len();
    if size > MAX_REPORT_SIZE {
        return Err(ReportError::FileTooBig {
            path: path.display().to_string(),
            size,
            max: MAX_REPORT_SIZE,
        });
    }

    let mut data = Vec::with_capacity(size as usize);
    file.take(MAX_REPORT_SIZE + 1)
        .read_to_end(&mut data)
        .map_err(io_err)?;
    Ok(data)
}

/// 스캐너 항목 하나
///
/// 형식별 파서가 채우고 [`PackageCollector`]가 정규화합니다.
pub(crate) struct RawEntry<'a> {
    pub name: &'a str,
    pub installed_version: &'a str,
    pub fixed_version: &'a str,
    pub vulnerability_id: &'a str,
}

/// 수정 버전 선택과 정책 적용을 담당하는 수집기
pub(crate) struct PackageCollector<'a> {
    options: ParseOptions,
    source: &'a str,
    rejected: Vec<UpdatePackage>,
}

impl<'a> PackageCollector<'a> {
    pub fn new(options: ParseOptions, source: &'a str) -> Self {
        Self {
            options,
            source,
            rejected: Vec::new(),
        }
    }

    /// 항목 하나를 `out`에 추가합니다. 수정 버전이 없는 항목은 조용히 버립니다.
    pub fn push(&mut self, entry: RawEntry<'_>, out: &mut Vec<UpdatePackage>) {
        if entry.fixed_version.trim().is_empty() {
            return;
        }
        let Some(fixed) = select_fixed_version(entry.installed_version, entry.fixed_version)
        else {
            return;
        };

        let package = UpdatePackage {
            name: entry.name.to_owned(),
            installed_version: entry.installed_version.to_owned(),
            fixed_version: fixed,
            vulnerability_id: entry.vulnerability_id.to_owned(),
        };

        if package.name.is_empty() {
            warn!(source = self.source, vuln = %package.vulnerability_id, "entry without package name skipped");
            return;
        }

        if is_plausible_version(&package.fixed_version) {
            out.push(package);
            return;
        }

        match self.options.unparseable {
            UnparseablePolicy::Skip => {
                warn!(
                    source = self.source,
                    package = %package.name,
                    fixed_version = %package.fixed_version,
                    "unparseable fixed version, skipping"
                );
            }
            UnparseablePolicy::Report => self.rejected.push(package),
        }
    }

    /// 정책에 따라 거부된 패키지
    pub fn into_rejected(self) -> Vec<UpdatePackage> {
        self.rejected
    }
}
