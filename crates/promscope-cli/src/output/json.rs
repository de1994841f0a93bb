//! JSON output formatting.

use promscope_core::AnalyzeResult;

/// Format analysis results as JSON.
///
/// A single result is printed as an object, several as an array. If `compact`
/// is true, outputs minified JSON without whitespace.
pub fn format_json(results: &[AnalyzeResult], compact: bool) -> serde_json::Result<String> {
    let value = match results {
        [single] => serde_json::to_value(single)?,
        many => serde_json::to_value(many)?,
    };
    if compact {
        serde_json::to_string(&value)
    } else {
        serde_json::to_string_pretty(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promscope_core::{analyze, AnalyzeRequest};

    #[test]
    fn test_json_pretty() {
        let result = analyze(&AnalyzeRequest::new("sum(foo) by (job)"));
        let json = format_json(&[result], false).unwrap();
        assert!(json.contains('\n'));
        assert!(json.starts_with('{'));
        assert!(json.contains("\"summary\""));
    }

    #[test]
    fn test_json_compact_array() {
        let results = vec![
            analyze(&AnalyzeRequest::new("up")),
            analyze(&AnalyzeRequest::new("vector(1) or foo")),
        ];
        let json = format_json(&results, true).unwrap();
        assert!(json.starts_with("[{"));
        assert!(!json.contains('\n'));

        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[1]["summary"]["deadCodeCount"], 1);
    }
}
