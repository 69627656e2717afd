//! npm 업데이트 계획과 검증
//!
//! 엔진 호출 없이 동작하는 순수 함수 모음입니다. `package.json`으로 직접 의존성을
//! 판별하고, 업데이트 스크립트를 만들고, 실행 후 잠금 파일을 읽어 결과를 검증합니다.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use layerfix_core::types::UpdatePackage;
use serde_json::Value;

use crate::manager::shell_quote;

/// 직접 의존성으로 인정하는 `package.json` 섹션
pub const DEPENDENCY_SECTIONS: [&str; 4] = [
    "dependencies",
    "devDependencies",
    "optionalDependencies",
    "peerDependencies",
];

/// 업데이트 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// `package.json`에 선언됨: 정확한 버전으로 고정
    Direct,
    /// 다른 패키지를 통해 들어옴: `npm update` (최선 노력)
    Transitive,
}

/// 루트 하나에서 수행할 업데이트
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUpdate {
    /// 업데이트 대상
    pub package: UpdatePackage,
    /// 업데이트 방식
    pub kind: UpdateKind,
}

/// 애플리케이션 루트 하나의 계획
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootPlan {
    /// `package.json`이 있는 디렉토리
    pub root: String,
    /// 잠금 파일 경로
    pub lockfile: String,
    /// 수행할 업데이트
    pub updates: Vec<PlannedUpdate>,
}

/// `package.json`에 선언된 의존성 이름
///
/// JSON이 아니거나 섹션이 객체가 아니면 해당 부분은 무시합니다.
pub fn declared_dependencies(manifest: &[u8]) -> BTreeSet<String> {
    let Ok(doc) = serde_json::from_slice::<Value>(manifest) else {
        return BTreeSet::new();
    };
    DEPENDENCY_SECTIONS
        .iter()
        .filter_map(|section| doc.get(section)?.as_object())
        .flat_map(|deps| deps.keys().cloned())
        .collect()
}

/// 선언 여부로 업데이트 방식을 정합니다.
pub fn classify(name: &str, declared: &BTreeSet<String>) -> UpdateKind {
    if declared.contains(name) {
        UpdateKind::Direct
    } else {
        UpdateKind::Transitive
    }
}

/// 잠금 파일에 기록된 패키지 인스턴스
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedPackage {
    /// 패키지 이름
    pub name: String,
    /// 설치 버전
    pub version: String,
    /// 루트 `node_modules` 바로 아래에 있는지 여부
    pub top_level: bool,
}

/// 잠금 파일의 모든 패키지 인스턴스
///
/// lockfileVersion 2/3의 `packages` (`node_modules/...` 키) 를 우선 읽고,
/// 없으면 v1의 중첩 `dependencies`를 읽습니다.
pub fn locked_packages(lock: &[u8]) -> Vec<LockedPackage> {
    let Ok(doc) = serde_json::from_slice::<Value>(lock) else {
        return Vec::new();
    };

    if let Some(packages) = doc.get("packages").and_then(Value::as_object) {
        return packages
            .iter()
            .filter_map(|(path, entry)| {
                let name = package_name_from_path(path)?;
                let version = entry.get("version")?.as_str()?;
                Some(LockedPackage {
                    name: name.to_owned(),
                    version: version.to_owned(),
                    top_level: path.matches("node_modules/").count() == 1,
                })
            })
            .collect();
    }

    let mut out = Vec::new();
    if let Some(deps) = doc.get("dependencies").and_then(Value::as_object) {
        collect_v1(deps, true, &mut out);
    }
    out
}

fn collect_v1(deps: &serde_json::Map<String, Value>, top_level: bool, out: &mut Vec<LockedPackage>) {
    for (name, entry) in deps {
        if let Some(version) = entry.get("version").and_then(Value::as_str) {
            out.push(LockedPackage {
                name: name.clone(),
                version: version.to_owned(),
                top_level,
            });
        }
        if let Some(nested) = entry.get("dependencies").and_then(Value::as_object) {
            collect_v1(nested, false, out);
        }
    }
}

/// `node_modules/a/node_modules/@s/b` → `@s/b`
fn package_name_from_path(path: &str) -> Option<&str> {
    let (_, name) = path.rsplit_once("node_modules/")?;
    (!name.is_empty()).then_some(name)
}

/// npm 버전 비교. semver로 해석되지 않으면 문자열 비교로 대체합니다.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (
        semver::Version::parse(a.trim_start_matches('v')),
        semver::Version::parse(b.trim_start_matches('v')),
    ) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

/// npm 패키지 이름 규칙 (스코프 허용, 셸 메타문자 불가)
pub fn is_valid_package_name(name: &str) -> bool {
    let valid_part = |s: &str| {
        !s.is_empty()
            && !s.starts_with('.')
            && !s.starts_with('_')
            && s.chars().all(|c| {
                c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '.' | '_' | '~')
            })
    };
    if name.len() > 214 {
        return false;
    }
    match name.strip_prefix('@') {
        Some(scoped) => scoped
            .split_once('/')
            .is_some_and(|(scope, pkg)| valid_part(scope) && valid_part(pkg)),
        None => valid_part(name),
    }
}

/// 모든 루트의 업데이트를 하나의 셸 스크립트로 만듭니다.
///
/// 직접 의존성은 `--save-exact`로 고정하고, 전이 의존성은 `npm update`를
/// 시도합니다. 개별 실패는 표준 에러에 남기고 계속 진행하며, 성공 여부는
/// 잠금 파일을 다시 읽어 판단합니다. 루트마다 잠금 파일을 재생성한 뒤
/// 마지막에 캐시를 한 번 비웁니다.
pub fn render_script(plans: &[RootPlan]) -> String {
    let mut script = String::from("set -u\n");
    for plan in plans {
        script.push_str(&format!("cd {} || exit 1\n", shell_quote(&plan.root)));
        for update in &plan.updates {
            let name = &update.package.name;
            match update.kind {
                UpdateKind::Direct => {
                    let spec = shell_quote(&format!("{name}@{}", update.package.fixed_version));
                    script.push_str(&format!(
                        "npm install --save-exact --no-audit --no-fund {spec} || echo {} >&2\n",
                        shell_quote(&format!("layerfix: failed to pin {name}"))
                    ));
                }
                UpdateKind::Transitive => {
                    script.push_str(&format!(
                        "npm update --no-audit --no-fund {} || true\n",
                        shell_quote(name)
                    ));
                }
            }
        }
        script.push_str(
            "npm install --package-lock-only --ignore-scripts --no-audit --no-fund || echo 'layerfix: lock regeneration failed' >&2\n",
        );
    }
    script.push_str("npm cache clean --force > /dev/null 2>&1 || true\n");
    script
}

/// 잠금 파일 검증 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verification {
    /// 고정에 실패한 직접 의존성
    pub failed: Vec<String>,
    /// 수정 버전에 못 미친 전이 의존성 (최선 노력이므로 실패로 치지 않음)
    pub lagging: Vec<LaggingPackage>,
}

/// 수정 버전보다 낮은 인스턴스가 남은 전이 의존성
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaggingPackage {
    /// 패키지 이름
    pub name: String,
    /// 잠금 파일에 남은 가장 낮은 버전
    pub locked_version: String,
    /// 요청한 수정 버전
    pub fixed_version: String,
}

/// 루트 하나의 결과를 잠금 파일로 검증합니다.
///
/// - 직접 의존성: 최상위 인스턴스가 고정 버전과 정확히 같아야 하며, 아니면 실패입니다.
/// - 전이 의존성: 수정 버전보다 낮은 인스턴스가 남아 있으면 `lagging`에만 기록합니다.
pub fn verify(plan: &RootPlan, lock: &[u8]) -> Verification {
    let locked = locked_packages(lock);
    let mut by_name: HashMap<&str, Vec<&LockedPackage>> = HashMap::new();
    for p in &locked {
        by_name.entry(p.name.as_str()).or_default().push(p);
    }

    let mut result = Verification::default();
    for u in &plan.updates {
        let instances = by_name.get(u.package.name.as_str()).map(Vec::as_slice).unwrap_or_default();
        let fixed = &u.package.fixed_version;
        match u.kind {
            UpdateKind::Direct => {
                let pinned = instances
                    .iter()
                    .any(|p| p.top_level && compare_versions(&p.version, fixed) == Ordering::Equal);
                if !pinned {
                    result.failed.push(u.package.name.clone());
                }
            }
            UpdateKind::Transitive => {
                let lowest = instances
                    .iter()
                    .filter(|p| compare_versions(&p.version, fixed) == Ordering::Less)
                    .min_by(|a, b| compare_versions(&a.version, &b.version));
                if let Some(p) = lowest {
                    result.lagging.push(LaggingPackage {
                        name: u.package.name.clone(),
                        locked_version: p.version.clone(),
                        fixed_version: fixed.clone(),
                    });
                }
            }
        }
    }
    result
}
