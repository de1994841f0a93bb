#![no_main]

use libfuzzer_sys::fuzz_target;
use promscope_core::{analyze, AnalysisOptions, AnalyzeRequest};

fuzz_target!(|data: &[u8]| {
    if let Ok(query) = std::str::from_utf8(data) {
        let request = AnalyzeRequest::new(query).with_options(AnalysisOptions {
            max_depth: Some(64),
        });
        let result = analyze(&request);
        assert_eq!(result.summary.has_errors, result.sources.is_empty());
    }
});
