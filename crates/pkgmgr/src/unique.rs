//! 패키지별 업데이트 중복 제거
//!
//! 리포트는 취약점마다 한 줄을 쓰므로 같은 패키지가 여러 번 나옵니다.
//! 설치 전에 패키지당 하나로 모으고 가장 높은 수정 버전을 남깁니다.

use std::cmp::Ordering;
use std::collections::HashMap;

use layerfix_core::types::UpdatePackage;

/// 이름별로 하나씩, 가장 높은 `fixed_version`을 가진 항목만 남깁니다.
///
/// 결과 순서는 이름의 첫 등장 순서입니다. 버전이 같으면 먼저 나온 항목을 유지합니다.
pub fn unique_latest<F>(updates: &[UpdatePackage], compare: F) -> Vec<UpdatePackage>
where
    F: Fn(&str, &str) -> Ordering,
{
    let mut out: Vec<UpdatePackage> = Vec::with_capacity(updates.len());
    let mut index: HashMap<&str, usize> = HashMap::new();

    for update in updates {
        match index.get(update.name.as_str()) {
            Some(&i) => {
                if compare(&update.fixed_version, &out[i].fixed_version) == Ordering::Greater {
                    out[i] = update.clone();
                }
            }
            None => {
                index.insert(&update.name, out.len());
                out.push(update.clone());
            }
        }
    }

    out
}
