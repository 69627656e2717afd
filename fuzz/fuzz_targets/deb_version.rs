#![no_main]

use std::cmp::Ordering;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use layerfix_pkgmgr::DebVersion;

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    a: &'a str,
    b: &'a str,
}

fuzz_target!(|input: Input<'_>| {
    let (Some(a), Some(b)) = (DebVersion::parse(input.a), DebVersion::parse(input.b)) else {
        return;
    };
    assert_eq!(a.cmp(&a), Ordering::Equal);
    assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
});
