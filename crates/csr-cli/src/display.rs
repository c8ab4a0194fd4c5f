//! Vertical card display for review results and settings.
//!
//! Renders each observation as a grouped, human-readable card with the
//! flagged content quoted from its span.

use csr_core::{Observation, ReviewResponse, Span};

const MAX_QUOTE_CHARS: usize = 120;

const SECRET_MARKERS: &[&str] = &["auth", "token", "key", "secret", "pass"];

// ── Public API ──

/// Print a review as a summary header, one card per observation, then errors.
pub fn print_review_cards(resp: &ReviewResponse, content: &str) {
    let meta = &resp.meta;
    println!(
        "=== {} ({}) · {} observation(s) ===",
        meta.standards_set,
        meta.strictness,
        resp.observations.len()
    );
    println!(
        "  {:<18} {}   {:<10} {}ms   {:<8} {}",
        "request_id", meta.request_id, "latency", meta.latency_ms, "rules", meta.rules_evaluated
    );
    println!();

    for (i, obs) in resp.observations.iter().enumerate() {
        print_observation_card(i + 1, obs, content);
    }

    if !resp.errors.is_empty() {
        println!("Errors");
        for err in &resp.errors {
            let code = serde_json::to_value(err.code)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            println!("  {:<18} {}", code, err.message);
        }
    }
}

/// Print name/value settings, masking anything that looks like a credential.
pub fn print_settings(pairs: &[(&str, String)]) {
    println!("Settings");
    for (name, value) in pairs {
        println!("  {:<22} {}", name, masked(name, value));
    }
}

// ── Card rendering ──

fn print_observation_card(n: usize, obs: &Observation, content: &str) {
    println!(
        "--- #{n} {} [{}] {} (confidence {:.2}) ---",
        obs.severity.as_str().to_uppercase(),
        obs.category.as_str(),
        obs.standard_ref,
        obs.confidence
    );
    println!("  {:<14} {}", "message", obs.message);
    match obs.span {
        Some(span) => println!(
            "  {:<14} [{}, {}) \"{}\"",
            "span",
            span.start,
            span.end,
            quote(content, span)
        ),
        None => println!("  {:<14} (not located)", "span"),
    }
    if let Some(fix) = &obs.suggested_fix {
        println!("  {:<14} {}", "suggested_fix", fix);
    }
    if let Some(rationale) = &obs.rationale {
        println!("  {:<14} {}", "rationale", rationale);
    }
    if let Some(excerpt) = &obs.excerpt {
        println!("  {:<14} {}", "excerpt", excerpt);
    }
    println!("  {:<14} {}", "id", obs.id);
    println!();
}

/// Content under `span`, by character offsets, shortened for display.
fn quote(content: &str, span: Span) -> String {
    let len = span.end.saturating_sub(span.start);
    let text: String = content
        .chars()
        .skip(span.start)
        .take(len.min(MAX_QUOTE_CHARS))
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    if len > MAX_QUOTE_CHARS {
        format!("{text}…")
    } else {
        text
    }
}

fn is_secret(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SECRET_MARKERS.iter().any(|m| lower.contains(m))
}

fn masked(name: &str, value: &str) -> String {
    if !is_secret(name) || value.is_empty() {
        return value.to_string();
    }
    let visible: String = value.chars().take(2).collect();
    format!("{visible}***")
}
