//! Review request/response model shared by the engine and its callers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::config::DefaultsConfig;

// ── Enums ──

/// Observation severity, most severe last in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Violation,
}

impl Severity {
    /// One step less severe. `None` when already at `Info`.
    pub fn downgrade(self) -> Option<Self> {
        match self {
            Self::Violation => Some(Self::Warning),
            Self::Warning => Some(Self::Info),
            Self::Info => None,
        }
    }

    /// Sort rank: `Violation` first.
    pub fn rank(self) -> u8 {
        match self {
            Self::Violation => 0,
            Self::Warning => 1,
            Self::Info => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Violation => "violation",
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown severity '{0}', expected info, warning or violation")]
pub struct ParseSeverityError(String);

impl FromStr for Severity {
    type Err = ParseSeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "violation" => Ok(Self::Violation),
            _ => Err(ParseSeverityError(s.to_string())),
        }
    }
}

/// Backend-supplied severity: anything missing or unrecognised reads as `Info`.
fn lenient_severity<'de, D>(deserializer: D) -> Result<Severity, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value
        .as_str()
        .and_then(|s| s.parse().ok())
        .unwrap_or(Severity::Info))
}

fn fallback_severity() -> Severity {
    Severity::Info
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Clarity,
    Accuracy,
    Structure,
    Accessibility,
    Pedagogy,
    Compliance,
    /// Also absorbs any category string the backend invents.
    #[default]
    #[serde(other)]
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clarity => "clarity",
            Self::Accuracy => "accuracy",
            Self::Structure => "structure",
            Self::Accessibility => "accessibility",
            Self::Pedagogy => "pedagogy",
            Self::Compliance => "compliance",
            Self::Other => "other",
        }
    }
}

/// Three-level knob controlling retrieval breadth and confidence thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    Low,
    #[default]
    Medium,
    High,
}

impl Strictness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Strictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown strictness '{0}', expected low, medium or high")]
pub struct ParseStrictnessError(String);

impl FromStr for Strictness {
    type Err = ParseStrictnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(ParseStrictnessError(s.to_string())),
        }
    }
}

/// How much of a backend reply survived extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionOutcome {
    /// Every entry was valid.
    Clean,
    /// Some entries were dropped; the rest were kept.
    Salvaged,
    /// Nothing structurally parseable was found.
    Failed,
}

impl ExtractionOutcome {
    /// Combine the outcomes of several independent extractions.
    ///
    /// `Failed` only when every part failed; `Salvaged` when any part lost data.
    pub fn merge(self, other: Self) -> Self {
        use ExtractionOutcome::*;
        match (self, other) {
            (Failed, Failed) => Failed,
            (Clean, Clean) => Clean,
            _ => Salvaged,
        }
    }
}

// ── Observations ──

/// Half-open character range `[start, end)` into the reviewed content.
///
/// Offsets count Unicode scalar values. Serialised as `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(usize, usize)", into = "(usize, usize)")]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// `0 <= start < end <= content_len`.
    pub fn fits(&self, content_len: usize) -> bool {
        self.start < self.end && self.end <= content_len
    }
}

impl From<(usize, usize)> for Span {
    fn from((start, end): (usize, usize)) -> Self {
        Self { start, end }
    }
}

impl From<Span> for (usize, usize) {
    fn from(span: Span) -> Self {
        (span.start, span.end)
    }
}

/// A potential rule violation salvaged from backend output, before policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateObservation {
    #[serde(default)]
    pub span: Option<Span>,
    #[serde(default = "fallback_severity", deserialize_with = "lenient_severity")]
    pub severity: Severity,
    #[serde(default)]
    pub category: Category,
    pub standard_ref: String,
    pub message: String,
    #[serde(default)]
    pub suggested_fix: Option<String>,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default, alias = "standard_excerpt")]
    pub excerpt: Option<String>,
    pub confidence: f64,
}

/// A policy-approved observation with its content-derived identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub span: Option<Span>,
    pub severity: Severity,
    pub category: Category,
    pub standard_ref: String,
    pub message: String,
    pub suggested_fix: Option<String>,
    pub rationale: Option<String>,
    pub excerpt: Option<String>,
    pub confidence: f64,
}

impl Observation {
    pub fn from_candidate(id: String, c: CandidateObservation) -> Self {
        Self {
            id,
            span: c.span,
            severity: c.severity,
            category: c.category,
            standard_ref: c.standard_ref,
            message: c.message,
            suggested_fix: c.suggested_fix,
            rationale: c.rationale,
            excerpt: c.excerpt,
            confidence: c.confidence,
        }
    }
}

// ── Request ──

pub const MAX_OBSERVATIONS_LIMIT: usize = 100;

/// Options the policy applies to one review, fully resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewOptions {
    pub return_rationale: bool,
    pub return_excerpts: bool,
    pub max_observations: usize,
    pub min_confidence: f64,
}

impl Default for ReviewOptions {
    fn default() -> Self {
        Self::from_defaults(&DefaultsConfig::default())
    }
}

impl ReviewOptions {
    pub fn from_defaults(defaults: &DefaultsConfig) -> Self {
        Self {
            return_rationale: true,
            return_excerpts: true,
            max_observations: defaults.max_observations,
            min_confidence: defaults.min_confidence,
        }
    }

    /// Describe the first out-of-bounds option, if any.
    pub fn bounds_violation(&self) -> Option<String> {
        if !(1..=MAX_OBSERVATIONS_LIMIT).contains(&self.max_observations) {
            return Some(format!(
                "max_observations must be in [1, {MAX_OBSERVATIONS_LIMIT}], got {}",
                self.max_observations
            ));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Some(format!(
                "min_confidence must be in [0, 1], got {}",
                self.min_confidence
            ));
        }
        None
    }
}

/// Options as a caller sends them. Unset fields take the engine's policy
/// defaults when the review runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_rationale: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_excerpts: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_observations: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f64>,
}

impl RequestOptions {
    pub fn resolve(&self, defaults: &DefaultsConfig) -> ReviewOptions {
        let base = ReviewOptions::from_defaults(defaults);
        ReviewOptions {
            return_rationale: self.return_rationale.unwrap_or(base.return_rationale),
            return_excerpts: self.return_excerpts.unwrap_or(base.return_excerpts),
            max_observations: self.max_observations.unwrap_or(base.max_observations),
            min_confidence: self.min_confidence.unwrap_or(base.min_confidence),
        }
    }
}

impl From<ReviewOptions> for RequestOptions {
    fn from(o: ReviewOptions) -> Self {
        Self {
            return_rationale: Some(o.return_rationale),
            return_excerpts: Some(o.return_excerpts),
            max_observations: Some(o.max_observations),
            min_confidence: Some(o.min_confidence),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    pub content: String,
    pub standards_set: String,
    #[serde(default)]
    pub strictness: Strictness,
    #[serde(default)]
    pub options: RequestOptions,
}

impl ReviewRequest {
    pub fn new(content: impl Into<String>, standards_set: impl Into<String>) -> Self {
        Self {
            request_id: None,
            content: content.into(),
            standards_set: standards_set.into(),
            strictness: Strictness::default(),
            options: RequestOptions::default(),
        }
    }

    pub fn with_strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = strictness;
        self
    }

    pub fn with_options(mut self, options: impl Into<RequestOptions>) -> Self {
        self.options = options.into();
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

// ── Response ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, other: Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub request_id: String,
    pub standards_set: String,
    pub strictness: Strictness,
    pub policy_version: String,
    pub model_id: String,
    pub latency_ms: u64,
    pub usage: Usage,
    /// Rules retrieved and sent to the backend.
    pub rules_evaluated: usize,
    /// `None` when no backend reply was extracted.
    pub extraction: Option<ExtractionOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ModelFailure,
    ModelParseFailure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Always structurally valid: both lists are present even on backend failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewResponse {
    pub observations: Vec<Observation>,
    pub meta: Meta,
    pub errors: Vec<ResponseError>,
}
