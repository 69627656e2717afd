#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use layerfix_report::select_fixed_version;

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    installed: &'a str,
    fixed_list: &'a str,
}

fuzz_target!(|input: Input<'_>| {
    if let Some(selected) = select_fixed_version(input.installed, input.fixed_list) {
        // the selection is always one of the listed candidates
        assert!(input
            .fixed_list
            .split(',')
            .any(|candidate| candidate.trim() == selected));
    }
});
