//! 수정 버전 선택
//!
//! 스캐너는 수정 버전 필드에 여러 후보를 쉼표로 나열하기도 합니다
//! (예: `"3.0.1, 5.0.1, 6.0.0"`). 설치된 버전과 메이저 버전이 같은 후보를
//! 우선 선택해 호환성이 깨지는 메이저 업그레이드를 피하고,
//! 그런 후보가 없으면 첫 번째 후보를 선택합니다.

/// 쉼표로 구분된 후보 목록에서 설치할 수정 버전을 선택합니다.
///
/// - 후보는 앞뒤 공백을 제거한 뒤 비교합니다. 빈 후보는 무시합니다.
/// - 메이저 버전은 첫 `.` 앞의 문자열입니다.
/// - 선택할 후보가 없으면 `None`을 반환합니다.
///
/// # 예시
///
/// ```
/// use layerfix_report::fixed::select_fixed_version;
///
/// assert_eq!(
///     select_fixed_version("3.0.0", "3.0.1, 5.0.1, 6.0.0").as_deref(),
///     Some("3.0.1")
/// );
/// assert_eq!(
///     select_fixed_version("4.2.0", "5.0.1, 6.0.0").as_deref(),
///     Some("5.0.1")
/// );
/// ```
pub fn select_fixed_version(installed: &str, fixed_list: &str) -> Option<String> {
    let candidates: Vec<&str> = fixed_list
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect();

    let first = candidates.first()?;
    let installed_major = major_component(installed.trim());

    candidates
        .iter()
        .find(|c| !installed_major.is_empty() && major_component(c) == installed_major)
        .or(Some(first))
        .map(|c| (*c).to_owned())
}

/// 첫 `.` 앞의 구성요소
fn major_component(version: &str) -> &str {
    version.split('.').next().unwrap_or_default()
}

/// 패키지 매니저에 그대로 넘길 수 있는 버전 문자열인지 확인합니다.
///
/// 범위 연산자(`<`, `>=`, `^` 등), 와일드카드, 공백이 섞인 값은
/// 설치 명령에 고정 버전으로 넘길 수 없으므로 거부합니다.
/// Debian(`1:2.36-9+deb12u4`, `1.0~rc1`)과 npm(`1.2.3-beta.1`) 표기는 허용합니다.
pub fn is_plausible_version(version: &str) -> bool {
    let Some(first) = version.chars().next() else {
        return false;
    };
    if !first.is_ascii_digit() {
        return false;
    }
    version
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+' | '~' | ':' | '_'))
}
