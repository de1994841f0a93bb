#![no_main]

use libfuzzer_sys::fuzz_target;
use promscope_core::parse_promql;

// Anything that parses must print back to a query with the same meaning.
fuzz_target!(|data: &[u8]| {
    let Ok(query) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(expr) = parse_promql(query) else {
        return;
    };
    let printed = expr.to_string();
    let reparsed = parse_promql(&printed).expect("printed query should parse");
    assert_eq!(reparsed.to_string(), printed);
});
