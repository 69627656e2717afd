#![no_main]

use libfuzzer_sys::fuzz_target;
use layerfix_report::{NativeParser, ParseOptions, ReportParser};

fuzz_target!(|data: &[u8]| {
    let parser = NativeParser::new(ParseOptions::default());
    let _ = parser.parse_slice(data, "fuzz/manifest.json");
});
