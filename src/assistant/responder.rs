//! Recovers a JSON array from free-text model output.
//!
//! Parsing strategy (first success wins):
//! 1. Strip fenced code blocks (```json … ``` or ``` … ```), keeping the interior.
//! 2. If what remains is wrapped in `[` … `]`, try it whole.
//! 3. Otherwise scan for top-level bracket-balanced `[…]` spans (string-aware)
//!    and try them largest first.
//! 4. Nothing decodes as an array → `Err`, which callers treat as "no facts".

use crate::memory::ExtractionError;
use regex::Regex;
use serde_json::Value;
use std::cmp::Reverse;
use std::sync::OnceLock;
use tracing::debug;

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"```[\w+-]*\s*(?s:(.*?))\s*```").expect("fence pattern is valid")
    })
}

/// Replace every fenced block with its trimmed interior
pub fn strip_code_fences(text: &str) -> String {
    fence_regex().replace_all(text, "$1").trim().to_string()
}

/// Candidate payloads in the order they should be tried
fn candidate_payloads(text: &str) -> Vec<&str> {
    let mut candidates = Vec::new();
    if text.starts_with('[') && text.ends_with(']') {
        candidates.push(text);
    }

    let mut spans = balanced_array_spans(text);
    // Stable sort: equal lengths keep their left-to-right order
    spans.sort_by_key(|s| Reverse(s.len()));
    for span in spans {
        if !candidates.contains(&span) {
            candidates.push(span);
        }
    }
    candidates
}

/// The most likely array payload in `text`, before decoding
pub fn extract_json_array(text: &str) -> Option<String> {
    let stripped = strip_code_fences(text);
    candidate_payloads(&stripped).first().map(|s| s.to_string())
}

/// Decode the array of records the extractor asked for.
pub fn parse_fact_array(text: &str) -> Result<Vec<Value>, ExtractionError> {
    let stripped = strip_code_fences(text);
    let candidates = candidate_payloads(&stripped);

    let mut last_err = ExtractionError::NoPayload;
    for candidate in candidates {
        match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Array(items)) => return Ok(items),
            Ok(_) => last_err = ExtractionError::NotAnArray,
            Err(e) => {
                debug!("Candidate payload failed to decode: {}", e);
                last_err = ExtractionError::InvalidJson(e.to_string());
            }
        }
    }
    Err(last_err)
}

/// All top-level `[…]` spans whose brackets balance.
/// An unclosed `[` is skipped and scanning resumes right after it.
fn balanced_array_spans(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut from = 0;

    while let Some(offset) = text[from..].find('[') {
        let start = from + offset;
        match balanced_len(&text[start..]) {
            Some(len) => {
                spans.push(&text[start..start + len]);
                from = start + len;
            }
            None => from = start + 1,
        }
    }
    spans
}

/// Byte length of the balanced array opening at `text[0]`, ignoring
/// brackets inside JSON strings.
fn balanced_len(text: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '[' if !in_string => depth += 1,
            ']' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fenced_json() {
        let out = "```json\n[{\"key\":\"name\",\"value\":\"Sam\"}]\n```";
        let items = parse_fact_array(out).unwrap();
        assert_eq!(items, vec![json!({"key": "name", "value": "Sam"})]);
    }

    #[test]
    fn test_fence_without_language_tag() {
        let out = "```\n[{\"key\":\"tone\",\"value\":\"short\"}]\n```";
        assert_eq!(parse_fact_array(out).unwrap().len(), 1);
    }

    #[test]
    fn test_embedded_in_prose() {
        let out = r#"Sure! Here you go: [{"key":"tone","value":"concise"}] Hope that helps."#;
        let items = parse_fact_array(out).unwrap();
        assert_eq!(items, vec![json!({"key": "tone", "value": "concise"})]);
    }

    #[test]
    fn test_no_payload() {
        assert!(matches!(
            parse_fact_array("No memories found."),
            Err(ExtractionError::NoPayload)
        ));
        assert_eq!(extract_json_array("No memories found."), None);
    }

    #[test]
    fn test_empty_array() {
        assert!(parse_fact_array("[]").unwrap().is_empty());
        assert!(parse_fact_array("Nothing to save: []").unwrap().is_empty());
    }

    #[test]
    fn test_brackets_inside_strings() {
        let out = r#"Result: [{"key":"interest","value":"arrays like [1, 2]"}] done"#;
        let items = parse_fact_array(out).unwrap();
        assert_eq!(items[0]["value"], "arrays like [1, 2]");
    }

    #[test]
    fn test_prefers_largest_array() {
        let out = r#"See note [1]. [{"key":"name","value":"Sam"},{"key":"tone","value":"warm"}]"#;
        assert_eq!(parse_fact_array(out).unwrap().len(), 2);
    }

    #[test]
    fn test_unclosed_bracket_in_prose_is_skipped() {
        let out = r#"[draft: here [{"key":"goal","value":"learn Rust"}]"#;
        let items = parse_fact_array(out).unwrap();
        assert_eq!(items, vec![json!({"key": "goal", "value": "learn Rust"})]);
    }

    #[test]
    fn test_invalid_json_is_error() {
        let out = "[{key: name}]";
        assert!(matches!(
            parse_fact_array(out),
            Err(ExtractionError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_extract_json_array_returns_candidate() {
        let out = "```json\n[1, 2]\n```";
        assert_eq!(extract_json_array(out).as_deref(), Some("[1, 2]"));
    }
}
