//! Debian 패키지 버전 비교
//!
//! `[epoch:]upstream[-revision]` 형식을 dpkg와 같은 규칙으로 정렬합니다.
//! 비숫자 구간은 문자 순서로, 숫자 구간은 수치로 비교하며
//! `~`는 빈 문자열보다도 앞에 정렬됩니다 (`1.0~rc1 < 1.0`).

use std::cmp::Ordering;
use std::fmt;

/// 파싱된 Debian 버전
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebVersion {
    /// epoch (없으면 0)
    pub epoch: u64,
    /// upstream 버전
    pub upstream: String,
    /// Debian revision (없으면 빈 문자열)
    pub revision: String,
}

impl DebVersion {
    /// 버전 문자열을 파싱합니다. 비어 있거나 epoch가 숫자가 아니면 `None`.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() || input.chars().any(char::is_whitespace) {
            return None;
        }

        let (epoch, rest) = match input.split_once(':') {
            Some((epoch, rest)) => (epoch.parse::<u64>().ok()?, rest),
            None => (0, input),
        };

        let (upstream, revision) = match rest.rsplit_once('-') {
            Some((upstream, revision)) => (upstream, revision),
            None => (rest, ""),
        };

        if upstream.is_empty() {
            return None;
        }

        Some(Self {
            epoch,
            upstream: upstream.to_owned(),
            revision: revision.to_owned(),
        })
    }
}

impl Ord for DebVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| verrevcmp(&self.upstream, &other.upstream))
            .then_with(|| verrevcmp(&self.revision, &other.revision))
    }
}

impl PartialOrd for DebVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for DebVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        f.write_str(&self.upstream)?;
        if !self.revision.is_empty() {
            write!(f, "-{}", self.revision)?;
        }
        Ok(())
    }
}

/// 두 버전 문자열을 비교합니다. 파싱할 수 없으면 문자열 비교로 대체합니다.
pub fn compare(a: &str, b: &str) -> Ordering {
    match (DebVersion::parse(a), DebVersion::parse(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

/// 문자 하나의 정렬 가중치
fn order(c: u8) -> i32 {
    match c {
        0 => 0,
        b'~' => -1,
        c if c.is_ascii_digit() => 0,
        c if c.is_ascii_alphabetic() => i32::from(c),
        c => i32::from(c) + 256,
    }
}

fn verrevcmp(a: &str, b: &str) -> Ordering {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let at = |i: usize| a.get(i).copied().unwrap_or(0);
    let bt = |i: usize| b.get(i).copied().unwrap_or(0);

    let (mut i, mut j) = (0, 0);
    while i < a.len() || j < b.len() {
        // 비숫자 구간
        while (i < a.len() && !at(i).is_ascii_digit()) || (j < b.len() && !bt(j).is_ascii_digit())
        {
            let (ac, bc) = (order(at(i)), order(bt(j)));
            if ac != bc {
                return ac.cmp(&bc);
            }
            i += 1;
            j += 1;
        }

        // 숫자 구간: 앞의 0을 건너뛰고 자릿수, 그다음 첫 차이로 비교
        while at(i) == b'0' {
            i += 1;
        }
        while bt(j) == b'0' {
            j += 1;
        }
        let mut first_diff = Ordering::Equal;
        while at(i).is_ascii_digit() && bt(j).is_ascii_digit() {
            if first_diff == Ordering::Equal {
                first_diff = at(i).cmp(&bt(j));
            }
            i += 1;
            j += 1;
        }
        if at(i).is_ascii_digit() {
            return Ordering::Greater;
        }
        if bt(j).is_ascii_digit() {
            return Ordering::Less;
        }
        if first_diff != Ordering::Equal {
            return first_diff;
        }
    }
    Ordering::Equal
}
