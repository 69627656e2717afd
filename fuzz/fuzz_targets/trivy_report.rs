#![no_main]

use libfuzzer_sys::fuzz_target;
use layerfix_report::{ParseOptions, ReportParser, TrivyParser, UnparseablePolicy};

fuzz_target!(|data: &[u8]| {
    for unparseable in [UnparseablePolicy::Skip, UnparseablePolicy::Report] {
        let parser = TrivyParser::new(ParseOptions { unparseable });
        if let Ok(manifest) = parser.parse_slice(data, "fuzz/report.json") {
            assert_eq!(
                manifest.is_empty(),
                manifest.update_count() == 0,
                "emptiness disagrees with the update count"
            );
        }
    }
});
