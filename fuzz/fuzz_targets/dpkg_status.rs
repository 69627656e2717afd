#![no_main]

use std::collections::HashSet;

use libfuzzer_sys::fuzz_target;
use layerfix_pkgmgr::split_status;

fuzz_target!(|data: &[u8]| {
    if let Ok(content) = std::str::from_utf8(data) {
        let fragments = split_status(content);
        let mut names = HashSet::new();
        for fragment in &fragments {
            assert!(names.insert(fragment.file_name.as_str()), "duplicate fragment");
        }
    }
});
