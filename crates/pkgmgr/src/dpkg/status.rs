//! dpkg status 파일 파싱과 조각(fragment) 분할
//!
//! status 파일은 빈 줄로 구분된 패키지 블록의 연속입니다.
//! distroless 계열 이미지는 통합 status 파일 대신 패키지마다
//! `/var/lib/dpkg/status.d/<name>` 조각을 둡니다. 재구성 후에는
//! 통합 status를 다시 조각으로 나눠 실제로 바뀐 패키지만 되돌려 씁니다.
//!
//! # 조각 이름 규칙
//!
//! - 조각 이름은 `Package:` 필드 값입니다.
//! - `base-files`는 예전 레이아웃과의 호환을 위해 `base`로 씁니다.
//! - 같은 패키지 블록이 여러 번 나오면 하나의 조각에 순서대로 합칩니다.

use std::collections::HashMap;

use tracing::warn;

/// status 파일의 블록 하나
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusBlock {
    /// `Package:` 필드
    pub package: Option<String>,
    /// `Version:` 필드
    pub version: Option<String>,
    /// `Status:` 필드
    pub status: Option<String>,
    /// 블록 원문 (마지막 줄바꿈 포함)
    pub text: String,
}

impl StatusBlock {
    fn from_lines(lines: &[&str]) -> Self {
        let mut text = String::new();
        for line in lines {
            text.push_str(line);
            text.push('\n');
        }
        Self {
            package: field(lines, "Package"),
            version: field(lines, "Version"),
            status: field(lines, "Status"),
            text,
        }
    }

    /// 설치 완료 상태인지 여부
    ///
    /// `Status:` 필드가 없는 조각(distroless)은 설치된 것으로 봅니다.
    pub fn is_installed(&self) -> bool {
        self.status
            .as_deref()
            .is_none_or(|s| s.split_whitespace().last() == Some("installed"))
    }
}

/// 패키지 하나의 status 조각
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// `status.d` 안의 파일 이름
    pub file_name: String,
    /// 패키지 이름
    pub package: String,
    /// 조각 내용 (블록이 여러 개면 빈 줄로 구분)
    pub contents: String,
}

/// 블록 단위로 파싱합니다.
///
/// 빈 줄(공백만 있는 줄 포함)이 블록을 구분합니다.
/// 마지막 블록이 빈 줄로 끝나지 않아도 포함됩니다.
pub fn parse_blocks(input: &str) -> Vec<StatusBlock> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in input.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(StatusBlock::from_lines(&current));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(StatusBlock::from_lines(&current));
    }

    blocks
}

/// 패키지 이름에 대응하는 조각 파일 이름
pub fn fragment_name(package: &str) -> &str {
    if package == "base-files" {
        "base"
    } else {
        package
    }
}

/// 통합 status를 패키지별 조각으로 나눕니다.
///
/// 결과는 첫 등장 순서를 따르며 파일 이름은 중복되지 않습니다.
/// `Package:` 필드가 없는 블록은 경고 후 건너뜁니다.
pub fn split_status(input: &str) -> Vec<Fragment> {
    let mut fragments: Vec<Fragment> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for block in parse_blocks(input) {
        let Some(package) = block.package.clone() else {
            warn!(
                block = block.text.lines().next().unwrap_or_default(),
                "status block without Package field skipped"
            );
            continue;
        };
        let file_name = fragment_name(&package).to_owned();

        match index.get(&file_name) {
            Some(&i) => {
                let fragment = &mut fragments[i];
                fragment.contents.push('\n');
                fragment.contents.push_str(&block.text);
            }
            None => {
                index.insert(file_name.clone(), fragments.len());
                fragments.push(Fragment {
                    file_name,
                    package,
                    contents: block.text,
                });
            }
        }
    }

    fragments
}

/// 설치된 패키지의 `이름 -> 버전` 맵
pub fn installed_versions(input: &str) -> HashMap<String, String> {
    parse_blocks(input)
        .into_iter()
        .filter(StatusBlock::is_installed)
        .filter_map(|b| Some((b.package?, b.version?)))
        .collect()
}

/// `dpkg-deb --show` 결과 (`이름\t버전` 줄) 를 파싱합니다.
pub fn parse_results_manifest(input: &str) -> HashMap<String, String> {
    input
        .lines()
        .filter_map(|line| {
            let (name, version) = line.split_once('\t')?;
            let (name, version) = (name.trim(), version.trim());
            (!name.is_empty() && !version.is_empty()).then(|| (name.to_owned(), version.to_owned()))
        })
        .collect()
}

/// 블록에서 필드 값을 찾습니다. 필드 이름은 대소문자를 구분하지 않습니다.
fn field(lines: &[&str], name: &str) -> Option<String> {
    lines.iter().find_map(|line| {
        if line.starts_with([' ', '\t']) {
            return None;
        }
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim().to_owned())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "\
Package: base-files
Status: install ok installed
Version: 12.4+deb12u5

Package: libssl3
Status: install ok installed
Architecture: amd64
Version: 3.0.11-1~deb12u2
Description: Secure Sockets Layer toolkit
 This package is part of the OpenSSL project.

Package: tzdata
Status: deinstall ok config-files
Version: 2024a-0+deb12u1
";

    #[test]
    fn parse_blocks_reads_fields() {
        let blocks = parse_blocks(STATUS);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[1].package.as_deref(), Some("libssl3"));
        assert_eq!(blocks[1].version.as_deref(), Some("3.0.11-1~deb12u2"));
        assert!(blocks[1].text.contains(" This package is part"));
    }

    #[test]
    fn trailing_block_without_blank_line_is_kept() {
        let input = "Package: a\nVersion: 1\n\nPackage: b\nVersion: 2";
        let fragments = split_status(input);
        let names: Vec<_> = fragments.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(fragments[1].contents, "Package: b\nVersion: 2\n");
    }

    #[test]
    fn base_files_fragment_is_named_base() {
        let fragments = split_status(STATUS);
        assert_eq!(fragments[0].file_name, "base");
        assert_eq!(fragments[0].package, "base-files");
    }

    #[test]
    fn duplicate_packages_merge_into_one_fragment() {
        let input = "Package: libc6\nArchitecture: amd64\n\nPackage: libc6\nArchitecture: i386\n";
        let fragments = split_status(input);
        assert_eq!(fragments.len(), 1);
        assert_eq!(
            fragments[0].contents,
            "Package: libc6\nArchitecture: amd64\n\nPackage: libc6\nArchitecture: i386\n"
        );
    }

    #[test]
    fn blocks_without_package_are_skipped() {
        let input = "Version: 1\n\nPackage: a\nVersion: 1\n";
        let fragments = split_status(input);
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].package, "a");
    }

    #[test]
    fn extra_blank_lines_and_crlf_are_tolerated() {
        let input = "\r\n\r\nPackage: a\r\nVersion: 1\r\n\r\n\r\n  \r\nPackage: b\r\nVersion: 2\r\n";
        let fragments = split_status(input);
        assert_eq!(fragments.len(), 2);
        assert_eq!(installed_versions(input).get("b").map(String::as_str), Some("2"));
    }

    #[test]
    fn concatenated_fragments_keep_every_package() {
        let fragments = split_status(STATUS);
        let joined: String = fragments
            .iter()
            .map(|f| format!("{}\n", f.contents))
            .collect();
        let mut before: Vec<_> = parse_blocks(STATUS)
            .into_iter()
            .filter_map(|b| b.package)
            .collect();
        let mut after: Vec<_> = parse_blocks(&joined)
            .into_iter()
            .filter_map(|b| b.package)
            .collect();
        before.sort();
        after.sort();
        assert_eq!(before, after);
    }

    #[test]
    fn installed_versions_skips_removed_packages() {
        let versions = installed_versions(STATUS);
        assert_eq!(versions.get("libssl3").map(String::as_str), Some("3.0.11-1~deb12u2"));
        assert!(!versions.contains_key("tzdata"));
    }

    #[test]
    fn fragments_without_status_count_as_installed() {
        let versions = installed_versions("Package: libssl3\nVersion: 3.0.11-1~deb12u2\n");
        assert!(versions.contains_key("libssl3"));
    }

    #[test]
    fn results_manifest_parsing() {
        let m = parse_results_manifest("libssl3\t3.0.11-1~deb12u2\nbogus line\n\t\nopenssl\t3.0.11-1~deb12u2\n");
        assert_eq!(m.len(), 2);
        assert_eq!(m["openssl"], "3.0.11-1~deb12u2");
    }

    #[test]
    fn continuation_lines_are_not_fields() {
        let input = "Package: a\nDescription: x\n Version: 9\nVersion: 1\n";
        assert_eq!(parse_blocks(input)[0].version.as_deref(), Some("1"));
    }
}
