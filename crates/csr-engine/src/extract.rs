//! Salvage candidate observations from free-form backend output.
//!
//! Locating the observation list tries, in order: a direct JSON parse, the
//! first fenced code block, and the first balanced `{...}` object. Only an
//! object carrying an `observations` array counts as a list; a bare array or
//! any other JSON value is not one. Entries are then validated one at a time;
//! a bad entry is dropped without affecting the others.

use std::collections::HashSet;
use std::sync::LazyLock;

use csr_core::{CandidateObservation, ExtractionOutcome};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\n?(.*?)```").expect("static pattern"));

/// Result of [`extract`].
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub candidates: Vec<CandidateObservation>,
    pub outcome: ExtractionOutcome,
    /// Entries found but rejected by validation.
    pub dropped: usize,
}

impl Extraction {
    fn failed() -> Self {
        Self {
            candidates: Vec::new(),
            outcome: ExtractionOutcome::Failed,
            dropped: 0,
        }
    }
}

/// Why an entry was rejected.
#[derive(Debug, Clone, PartialEq)]
enum Rejection {
    NotAnObject,
    Malformed(String),
    EmptyMessage,
    UnknownRef(String),
    SpanOutOfBounds,
    ConfidenceOutOfRange(f64),
}

/// Extract and validate candidates from `raw`.
///
/// `content_len` is the reviewed content's length in characters; `known_refs`
/// are the references of the rules that were sent to the backend.
pub fn extract(raw: &str, content_len: usize, known_refs: &HashSet<&str>) -> Extraction {
    let Some(entries) = locate_entries(raw) else {
        warn!(raw_chars = raw.len(), "no observation list found in backend output");
        return Extraction::failed();
    };

    let total = entries.len();
    let mut candidates = Vec::with_capacity(total);
    for (i, entry) in entries.into_iter().enumerate() {
        match validate(entry, content_len, known_refs) {
            Ok(c) => candidates.push(c),
            Err(reason) => debug!(entry = i, ?reason, "dropping observation"),
        }
    }

    let dropped = total - candidates.len();
    let outcome = if dropped == 0 {
        ExtractionOutcome::Clean
    } else {
        warn!(kept = candidates.len(), dropped, "salvaged partial backend output");
        ExtractionOutcome::Salvaged
    };
    Extraction {
        candidates,
        outcome,
        dropped,
    }
}

/// Find the raw observation entries, or `None` if nothing parses.
fn locate_entries(raw: &str) -> Option<Vec<Value>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Some(entries) = parse_container(raw) {
        return Some(entries);
    }

    if let Some(entries) = FENCE
        .captures(raw)
        .and_then(|c| c.get(1))
        .and_then(|m| parse_container(m.as_str().trim()))
    {
        debug!("observations recovered from code fence");
        return Some(entries);
    }

    if let Some(start) = raw.find('{') {
        if let Some(end) = balanced_end(raw, start)
            && let Some(entries) = parse_container(&raw[start..=end])
        {
            debug!("observations recovered by brace matching");
            return Some(entries);
        }
        if let Some(end) = raw.rfind('}')
            && end > start
            && let Some(entries) = parse_container(&raw[start..=end])
        {
            debug!("observations recovered from outermost braces");
            return Some(entries);
        }
    }
    None
}

/// Accept only `{"observations": [...]}`.
fn parse_container(text: &str) -> Option<Vec<Value>> {
    match serde_json::from_str::<Value>(text).ok()? {
        Value::Object(mut map) => match map.remove("observations") {
            Some(Value::Array(entries)) => Some(entries),
            _ => None,
        },
        _ => None,
    }
}

/// Byte index of the `}` closing the object opened at `start`.
///
/// Braces inside JSON strings are ignored.
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + i);
                }
            }
            _ => {}
        }
    }
    None
}

fn validate(
    entry: Value,
    content_len: usize,
    known_refs: &HashSet<&str>,
) -> Result<CandidateObservation, Rejection> {
    if !entry.is_object() {
        return Err(Rejection::NotAnObject);
    }
    let c: CandidateObservation =
        serde_json::from_value(entry).map_err(|e| Rejection::Malformed(e.to_string()))?;

    if c.message.trim().is_empty() {
        return Err(Rejection::EmptyMessage);
    }
    if !known_refs.contains(c.standard_ref.as_str()) {
        return Err(Rejection::UnknownRef(c.standard_ref));
    }
    if let Some(span) = c.span
        && !span.fits(content_len)
    {
        return Err(Rejection::SpanOutOfBounds);
    }
    if !(0.0..=1.0).contains(&c.confidence) {
        return Err(Rejection::ConfidenceOutOfRange(c.confidence));
    }
    Ok(c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use csr_core::{Category, Severity, Span};

    const CONTENT_LEN: usize = 46;

    fn refs() -> HashSet<&'static str> {
        ["NAV-1", "NAV-2"].into_iter().collect()
    }

    fn obs(r: &str, span: &str, conf: &str) -> String {
        format!(
            r#"{{"span": {span}, "severity": "warning", "category": "clarity",
                "standard_ref": "{r}", "message": "vague verb", "confidence": {conf}}}"#
        )
    }

    #[test]
    fn direct_json() {
        let raw = format!(r#"{{"observations": [{}]}}"#, obs("NAV-1", "[4, 11]", "0.9"));
        let ex = extract(&raw, CONTENT_LEN, &refs());
        assert_eq!(ex.outcome, ExtractionOutcome::Clean);
        assert_eq!(ex.candidates.len(), 1);
        let c = &ex.candidates[0];
        assert_eq!(c.span, Some(Span::new(4, 11)));
        assert_eq!(c.severity, Severity::Warning);
        assert_eq!(c.category, Category::Clarity);
        assert_eq!(c.confidence, 0.9);
    }

    #[test]
    fn empty_list_is_clean() {
        let ex = extract(r#"{"observations": []}"#, CONTENT_LEN, &refs());
        assert_eq!(ex.outcome, ExtractionOutcome::Clean);
        assert!(ex.candidates.is_empty());
    }

    #[test]
    fn fenced_block_with_prose() {
        let raw = format!(
            "Here is my review:\n```json\n{{\"observations\": [{}]}}\n```\nHope that helps.",
            obs("NAV-2", "null", "0.8")
        );
        let ex = extract(&raw, CONTENT_LEN, &refs());
        assert_eq!(ex.outcome, ExtractionOutcome::Clean);
        assert_eq!(ex.candidates[0].standard_ref, "NAV-2");
        assert_eq!(ex.candidates[0].span, None);
    }

    #[test]
    fn brace_matching_ignores_trailing_braces() {
        let raw = format!(
            "Result: {{\"observations\": [{}]}} (note: {{not json}})",
            obs("NAV-1", "[0, 3]", "0.7")
        );
        let ex = extract(&raw, CONTENT_LEN, &refs());
        assert_eq!(ex.outcome, ExtractionOutcome::Clean);
        assert_eq!(ex.candidates.len(), 1);
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_matching() {
        let raw = r#"sure: {"observations": [{"span": null, "severity": "info",
            "standard_ref": "NAV-1", "message": "use {braces} carefully }", "confidence": 0.6}]} bye"#;
        let ex = extract(raw, CONTENT_LEN, &refs());
        assert_eq!(ex.candidates.len(), 1);
        assert_eq!(ex.candidates[0].message, "use {braces} carefully }");
    }

    #[test]
    fn bare_arrays_are_not_observation_lists() {
        let raw = format!("[{}]", obs("NAV-1", "null", "0.6"));
        assert_eq!(extract(&raw, CONTENT_LEN, &refs()).outcome, ExtractionOutcome::Failed);

        for raw in [
            "I could not evaluate this; the span [3, 9] is unclear.",
            "No issues with rules [1, 2].",
            "[]",
            r#"{"observations": "none"}"#,
        ] {
            let ex = extract(raw, CONTENT_LEN, &refs());
            assert_eq!(ex.outcome, ExtractionOutcome::Failed, "input: {raw:?}");
            assert!(ex.candidates.is_empty());
            assert_eq!(ex.dropped, 0);
        }
    }

    #[test]
    fn garbage_fails() {
        for raw in ["", "   ", "I could not review this.", "{broken", r#"{"result": "ok"}"#] {
            let ex = extract(raw, CONTENT_LEN, &refs());
            assert_eq!(ex.outcome, ExtractionOutcome::Failed, "input: {raw:?}");
            assert!(ex.candidates.is_empty());
        }
    }

    #[test]
    fn partial_salvage_keeps_valid_entries() {
        let raw = format!(
            r#"{{"observations": [{}, {}, {}, {}]}}"#,
            obs("NAV-1", "[0, 10]", "0.9"),
            obs("NAV-2", "[5, 9]", "0.8"),
            obs("NAV-1", "[40, 99]", "0.9"),
            obs("NAV-2", "null", "0.6"),
        );
        let ex = extract(&raw, CONTENT_LEN, &refs());
        assert_eq!(ex.outcome, ExtractionOutcome::Salvaged);
        assert_eq!(ex.candidates.len(), 3);
        assert_eq!(ex.dropped, 1);
        assert!(ex.candidates.iter().all(|c| c.span.is_none_or(|s| s.fits(CONTENT_LEN))));
    }

    #[test]
    fn invalid_entries_are_dropped() {
        let raw = format!(
            r#"{{"observations": [{}, {}, {}, {}, {}, {}, {}, "just a string", 42]}}"#,
            obs("NAV-9", "null", "0.9"),  // unknown ref
            obs("NAV-1", "null", "1.5"),  // confidence > 1
            obs("NAV-1", "null", "-0.1"), // confidence < 0
            obs("NAV-1", "[5, 5]", "0.5"), // empty span
            obs("NAV-1", "[-1, 4]", "0.5"), // negative offset
            r#"{"span": null, "severity": "info", "standard_ref": "NAV-1", "confidence": 0.5}"#,
            r#"{"span": null, "severity": "info", "standard_ref": "NAV-1", "message": "  ", "confidence": 0.5}"#,
        );
        let ex = extract(&raw, CONTENT_LEN, &refs());
        assert_eq!(ex.outcome, ExtractionOutcome::Salvaged);
        assert!(ex.candidates.is_empty());
        assert_eq!(ex.dropped, 9);
    }

    #[test]
    fn unrecognised_or_missing_severity_becomes_info() {
        let raw = r#"{"observations": [
            {"span": null, "severity": "critical", "standard_ref": "NAV-1", "message": "a", "confidence": 0.9},
            {"span": null, "standard_ref": "NAV-2", "message": "b", "confidence": 0.9},
            {"span": null, "severity": 3, "standard_ref": "NAV-1", "message": "c", "confidence": 0.9},
            {"span": null, "severity": "Violation", "standard_ref": "NAV-2", "message": "d", "confidence": 0.9}
        ]}"#;
        let ex = extract(raw, CONTENT_LEN, &refs());
        assert_eq!(ex.outcome, ExtractionOutcome::Clean);
        let severities: Vec<Severity> = ex.candidates.iter().map(|c| c.severity).collect();
        assert_eq!(
            severities,
            vec![Severity::Info, Severity::Info, Severity::Info, Severity::Violation]
        );
    }

    #[test]
    fn missing_optional_fields_default() {
        let raw = r#"{"observations": [{"severity": "violation", "standard_ref": "NAV-1",
                      "message": "m", "confidence": 1}]}"#;
        let ex = extract(raw, CONTENT_LEN, &refs());
        assert_eq!(ex.outcome, ExtractionOutcome::Clean);
        let c = &ex.candidates[0];
        assert_eq!(c.span, None);
        assert_eq!(c.category, Category::Other);
        assert_eq!(c.suggested_fix, None);
        assert_eq!(c.confidence, 1.0);
    }

    #[test]
    fn balanced_end_handles_nesting_and_escapes() {
        let text = r#"x {"a": {"b": "q\"}"}} tail }"#;
        let start = text.find('{').unwrap();
        assert_eq!(&text[start..=balanced_end(text, start).unwrap()], r#"{"a": {"b": "q\"}"}}"#);
        assert_eq!(balanced_end("{ unclosed", 0), None);
    }
}
