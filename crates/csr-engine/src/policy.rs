//! Deterministic post-processing of candidate observations.
//!
//! Gate, deduplicate, sort, strip, truncate, then assign ids. No I/O and no
//! hidden state: the same input always yields the same output.

use std::collections::HashMap;

use csr_core::config::ThresholdsConfig;
use csr_core::{CandidateObservation, Observation, ReviewOptions, Severity, Span, Strictness};
use sha2::{Digest, Sha256};

pub const DEFAULT_POLICY_VERSION: &str = "1.0.0";

/// Observation policy with its auditable version tag.
#[derive(Debug, Clone)]
pub struct Policy {
    thresholds: ThresholdsConfig,
    version: String,
}

impl Default for Policy {
    fn default() -> Self {
        Self::new(ThresholdsConfig::default(), DEFAULT_POLICY_VERSION)
    }
}

impl Policy {
    pub fn new(thresholds: ThresholdsConfig, version: impl Into<String>) -> Self {
        Self {
            thresholds,
            version: version.into(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn apply(
        &self,
        candidates: Vec<CandidateObservation>,
        strictness: Strictness,
        options: &ReviewOptions,
    ) -> Vec<Observation> {
        let gated = self.gate(candidates, strictness, options.min_confidence);
        let mut kept = deduplicate(gated);
        sort(&mut kept);

        kept.truncate(options.max_observations);
        kept.into_iter()
            .map(|mut c| {
                if !options.return_rationale {
                    c.rationale = None;
                }
                if !options.return_excerpts {
                    c.excerpt = None;
                }
                Observation::from_candidate(observation_id(&c), c)
            })
            .collect()
    }

    /// A candidate passes only if it clears both the request floor and, for
    /// violations, the strictness threshold. Failing either costs one severity
    /// step; an `Info` that fails is dropped.
    fn gate(
        &self,
        candidates: Vec<CandidateObservation>,
        strictness: Strictness,
        min_confidence: f64,
    ) -> Vec<CandidateObservation> {
        let violation_threshold = self.thresholds.violation(strictness);
        candidates
            .into_iter()
            .filter_map(|mut c| {
                let below_floor = c.confidence < min_confidence;
                let weak_violation =
                    c.severity == Severity::Violation && c.confidence < violation_threshold;
                if below_floor || weak_violation {
                    c.severity = c.severity.downgrade()?;
                }
                Some(c)
            })
            .collect()
    }
}

/// Keep the most confident candidate per `(span, standard_ref)`.
///
/// The survivor takes the slot of the group's first arrival; equal confidence
/// keeps the earlier candidate.
fn deduplicate(candidates: Vec<CandidateObservation>) -> Vec<CandidateObservation> {
    let mut slots: HashMap<(Option<Span>, String), usize> = HashMap::new();
    let mut out: Vec<CandidateObservation> = Vec::with_capacity(candidates.len());
    for c in candidates {
        let key = (c.span, c.standard_ref.clone());
        match slots.get(&key) {
            Some(&i) => {
                if c.confidence > out[i].confidence {
                    out[i] = c;
                }
            }
            None => {
                slots.insert(key, out.len());
                out.push(c);
            }
        }
    }
    out
}

/// Most severe first, then most confident; arrival order breaks ties.
fn sort(candidates: &mut [CandidateObservation]) {
    candidates.sort_by(|a, b| {
        a.severity
            .rank()
            .cmp(&b.severity.rank())
            .then_with(|| b.confidence.total_cmp(&a.confidence))
    });
}

/// First 16 hex digits of SHA-256 over the observation's identifying fields.
pub fn observation_id(c: &CandidateObservation) -> String {
    let span = match c.span {
        Some(s) => format!("{}:{}", s.start, s.end),
        None => "-".to_string(),
    };
    let mut hasher = Sha256::new();
    for part in [
        c.standard_ref.as_str(),
        span.as_str(),
        c.severity.as_str(),
        c.category.as_str(),
        c.message.as_str(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}
