//! Review orchestration: validate, retrieve, prompt, call, extract, apply policy.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use csr_core::{
    ErrorCode, ExtractionOutcome, Meta, PolicyConfig, PromptsConfig, ResponseError, ReviewOptions,
    ReviewRequest, ReviewResponse, Rule, StandardsSetInfo, Usage,
};
use csr_model::{Backend, ModelFailure, RawResult};
use csr_store::RuleStore;
use futures::StreamExt;
use serde_json::json;
use thiserror::Error;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::extract::extract;
use crate::library::{IndexedRuleSet, Library};
use crate::policy::{DEFAULT_POLICY_VERSION, Policy};
use crate::prompt::PromptBuilder;

/// Input-validation failures. Reported before retrieval or any backend call.
#[derive(Debug, Error, PartialEq)]
pub enum ReviewError {
    #[error("content is empty")]
    EmptyContent,
    #[error("content is {len} characters, maximum is {max}")]
    ContentTooLong { len: usize, max: usize },
    #[error("standards set '{0}' not found")]
    StandardsNotFound(String),
    #[error("invalid options: {0}")]
    InvalidOptions(String),
}

impl ReviewError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyContent => "EMPTY_CONTENT",
            Self::ContentTooLong { .. } => "CONTENT_TOO_LONG",
            Self::StandardsNotFound(_) => "STANDARDS_NOT_FOUND",
            Self::InvalidOptions(_) => "INVALID_OPTIONS",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Upper bound on content length, in characters.
    pub max_content_length: usize,
    pub policy_version: String,
    /// One backend call per retrieved rule instead of one call for all.
    pub single_rule_mode: bool,
    pub model_timeout: Duration,
    /// Concurrent backend calls per request in single-rule mode.
    pub max_concurrent_calls: usize,
    pub prompts: PromptsConfig,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_content_length: 50_000,
            policy_version: DEFAULT_POLICY_VERSION.to_string(),
            single_rule_mode: false,
            model_timeout: Duration::from_secs(30),
            max_concurrent_calls: 4,
            prompts: PromptsConfig::default(),
        }
    }
}

/// One backend call: task text plus the refs it may cite.
struct Call<'a> {
    task: String,
    known_refs: HashSet<&'a str>,
}

pub struct ReviewEngine {
    library: RwLock<Arc<Library>>,
    backend: Arc<dyn Backend>,
    config: PolicyConfig,
    policy: Policy,
    prompts: PromptBuilder,
    settings: EngineSettings,
}

impl ReviewEngine {
    pub fn new(
        store: &RuleStore,
        backend: Arc<dyn Backend>,
        config: PolicyConfig,
        settings: EngineSettings,
    ) -> Self {
        let policy = Policy::new(config.thresholds.clone(), settings.policy_version.clone());
        let prompts = PromptBuilder::new(settings.prompts.clone());
        Self {
            library: RwLock::new(Arc::new(Library::build(store))),
            backend,
            config,
            policy,
            prompts,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn policy_config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Loaded rule sets: id, display name and version.
    pub fn list_standards(&self) -> Vec<StandardsSetInfo> {
        self.library().infos()
    }

    /// Liveness hint for the backend connection.
    pub fn backend_healthy(&self) -> bool {
        self.backend.is_healthy()
    }

    /// Replace every rule set and index with ones built from `store`.
    ///
    /// Reviews already running keep the library they started with.
    pub fn reload(&self, store: &RuleStore) {
        let library = Arc::new(Library::build(store));
        info!(sets = library.len(), "standards library reloaded");
        *self.library.write().unwrap_or_else(PoisonError::into_inner) = library;
    }

    fn library(&self) -> Arc<Library> {
        let guard = self.library.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Request options with unset fields taken from the policy defaults.
    pub fn resolve_options(&self, request: &ReviewRequest) -> ReviewOptions {
        request.options.resolve(&self.config.defaults)
    }

    /// Check a request and resolve its rule set and options.
    pub fn validate(
        &self,
        request: &ReviewRequest,
    ) -> Result<(Arc<IndexedRuleSet>, ReviewOptions), ReviewError> {
        if request.content.trim().is_empty() {
            return Err(ReviewError::EmptyContent);
        }
        let len = request.content.chars().count();
        if len > self.settings.max_content_length {
            return Err(ReviewError::ContentTooLong {
                len,
                max: self.settings.max_content_length,
            });
        }
        let options = self.resolve_options(request);
        if let Some(msg) = options.bounds_violation() {
            return Err(ReviewError::InvalidOptions(msg));
        }
        let rule_set = self
            .library()
            .get(&request.standards_set)
            .ok_or_else(|| ReviewError::StandardsNotFound(request.standards_set.clone()))?;
        Ok((rule_set, options))
    }

    /// Run one review.
    ///
    /// Only input validation fails with `Err`; backend and parse failures are
    /// reported in the response's `errors` list. Dropping the returned future
    /// abandons any in-flight backend calls.
    pub async fn review(&self, request: ReviewRequest) -> Result<ReviewResponse, ReviewError> {
        let (rule_set, options) = match self.validate(&request) {
            Ok(valid) => valid,
            Err(e) => {
                warn!(code = e.code(), error = %e, "review rejected");
                return Err(e);
            }
        };

        let request_id = request.request_id.clone().unwrap_or_else(new_request_id);
        let span = info_span!(
            "review",
            request_id = %request_id,
            standards_set = %request.standards_set,
            strictness = %request.strictness,
        );
        Ok(self
            .run(request, options, request_id, rule_set)
            .instrument(span)
            .await)
    }

    async fn run(
        &self,
        request: ReviewRequest,
        options: ReviewOptions,
        request_id: String,
        rule_set: Arc<IndexedRuleSet>,
    ) -> ReviewResponse {
        let started = Instant::now();
        let content = request.content.as_str();
        let content_len = content.chars().count();

        let k = self.config.retrieval.k(request.strictness);
        let rules = rule_set.retrieve(content, k);
        debug!(
            k,
            retrieved = rules.len(),
            refs = ?rules.iter().map(|r| r.standard_ref.as_str()).collect::<Vec<_>>(),
            "rules retrieved"
        );

        let calls = self.plan_calls(&request, &options, &rules);
        let instruction = self.prompts.instruction();
        let timeout = self.settings.model_timeout;
        let results: Vec<RawResult> = futures::stream::iter(
            calls
                .iter()
                .map(|call| self.backend.generate(instruction, &call.task, timeout)),
        )
        .buffered(self.settings.max_concurrent_calls.max(1))
        .collect()
        .await;

        let mut usage = Usage::default();
        let mut candidates = Vec::new();
        let mut extraction: Option<ExtractionOutcome> = None;
        let mut failures: Vec<ModelFailure> = Vec::new();
        for (result, call) in results.into_iter().zip(&calls) {
            match result {
                RawResult::Success { text, usage: u } => {
                    usage.add(u);
                    let ex = extract(&text, content_len, &call.known_refs);
                    extraction = Some(match extraction {
                        Some(prev) => prev.merge(ex.outcome),
                        None => ex.outcome,
                    });
                    candidates.extend(ex.candidates);
                }
                RawResult::Failure(f) => failures.push(f),
            }
        }

        let mut errors = Vec::new();
        let observations = if !calls.is_empty() && failures.len() == calls.len() {
            errors.push(model_failure_error(&failures));
            Vec::new()
        } else if extraction == Some(ExtractionOutcome::Failed) {
            errors.push(ResponseError {
                code: ErrorCode::ModelParseFailure,
                message: "backend returned output but no observation list could be extracted"
                    .to_string(),
                details: None,
            });
            Vec::new()
        } else {
            if !failures.is_empty() {
                warn!(
                    failed = failures.len(),
                    calls = calls.len(),
                    "some backend calls failed, continuing with the rest"
                );
            }
            self.policy
                .apply(candidates, request.strictness, &options)
        };

        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            observations = observations.len(),
            errors = errors.len(),
            latency_ms,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "review complete"
        );

        ReviewResponse {
            observations,
            meta: Meta {
                request_id,
                standards_set: request.standards_set,
                strictness: request.strictness,
                policy_version: self.policy.version().to_string(),
                model_id: self.backend.model_id().to_string(),
                latency_ms,
                usage,
                rules_evaluated: rules.len(),
                extraction,
            },
            errors,
        }
    }

    /// One call for all rules, or one per rule in single-rule mode.
    ///
    /// No rules means no calls.
    fn plan_calls<'r>(
        &self,
        request: &ReviewRequest,
        options: &ReviewOptions,
        rules: &[&'r Rule],
    ) -> Vec<Call<'r>> {
        if rules.is_empty() {
            return Vec::new();
        }
        if self.settings.single_rule_mode {
            self.prompts
                .single_rule_tasks(&request.content, rules, request.strictness, options)
            .into_iter()
            .zip(rules)
            .map(|(task, &rule)| Call {
                task,
                known_refs: HashSet::from([rule.standard_ref.as_str()]),
            })
            .collect()
        } else {
            vec![Call {
                task: self
                    .prompts
                    .task(&request.content, rules, request.strictness, options),
                known_refs: rules.iter().map(|&r| r.standard_ref.as_str()).collect(),
            }]
        }
    }
}

fn model_failure_error(failures: &[ModelFailure]) -> ResponseError {
    let message = failures
        .first()
        .map(ToString::to_string)
        .unwrap_or_else(|| "backend call failed".to_string());
    let kinds: Vec<&str> = failures.iter().map(|f| f.kind.as_str()).collect();
    ResponseError {
        code: ErrorCode::ModelFailure,
        message,
        details: Some(json!({ "failed_calls": failures.len(), "kinds": kinds })),
    }
}

/// Short random id for requests that arrive without one.
fn new_request_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(12);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use csr_core::{RequestOptions, RuleSet, Severity};
    use csr_model::FailureKind;
    use csr_model::fakes::{FnBackend, StaticBackend};

    const NO_OBSERVATIONS: &str = r#"{"observations": []}"#;

    fn store() -> RuleStore {
        let rules = ["R-1", "R-2", "R-3"]
            .into_iter()
            .map(|r| Rule {
                standard_ref: r.into(),
                title: format!("{r} title"),
                body: "objectives use measurable verbs".into(),
                tags: Default::default(),
                default_severity: Severity::Warning,
            })
            .collect();
        RuleStore::from_sets([RuleSet {
            id: "set".into(),
            name: "Set".into(),
            version: "1.0".into(),
            rules,
        }])
        .unwrap()
    }

    fn engine(backend: Arc<dyn Backend>, settings: EngineSettings) -> ReviewEngine {
        ReviewEngine::new(&store(), backend, PolicyConfig::default(), settings)
    }

    fn reply(refs: &[&str]) -> String {
        let entries: Vec<String> = refs
            .iter()
            .map(|r| {
                format!(
                    r#"{{"span": [0, 3], "severity": "warning", "standard_ref": "{r}",
                        "message": "issue", "confidence": 0.9}}"#
                )
            })
            .collect();
        format!(r#"{{"observations": [{}]}}"#, entries.join(","))
    }

    #[test]
    fn error_codes() {
        assert_eq!(ReviewError::EmptyContent.code(), "EMPTY_CONTENT");
        assert_eq!(
            ReviewError::ContentTooLong { len: 2, max: 1 }.code(),
            "CONTENT_TOO_LONG"
        );
        assert_eq!(ReviewError::StandardsNotFound("x".into()).code(), "STANDARDS_NOT_FOUND");
        assert_eq!(ReviewError::InvalidOptions("x".into()).code(), "INVALID_OPTIONS");
    }

    #[tokio::test]
    async fn validation_precedes_backend() {
        let backend = Arc::new(StaticBackend::text(NO_OBSERVATIONS));
        let e = engine(
            backend.clone(),
            EngineSettings {
                max_content_length: 5,
                ..EngineSettings::default()
            },
        );

        let cases = [
            (ReviewRequest::new(" \n\t", "set"), "EMPTY_CONTENT"),
            (ReviewRequest::new("éééééé", "set"), "CONTENT_TOO_LONG"),
            (ReviewRequest::new("ok", "nope"), "STANDARDS_NOT_FOUND"),
            (
                ReviewRequest::new("ok", "set").with_options(ReviewOptions {
                    max_observations: 0,
                    ..ReviewOptions::default()
                }),
                "INVALID_OPTIONS",
            ),
        ];
        for (req, code) in cases {
            assert_eq!(e.review(req).await.unwrap_err().code(), code);
        }
        assert_eq!(backend.calls(), 0);

        // Exactly at the limit, counted in characters.
        assert!(e.review(ReviewRequest::new("ééééé", "set")).await.is_ok());
    }

    #[tokio::test]
    async fn generates_request_id_when_missing() {
        let e = engine(Arc::new(StaticBackend::text(NO_OBSERVATIONS)), EngineSettings::default());
        let resp = e.review(ReviewRequest::new("text", "set")).await.unwrap();
        assert_eq!(resp.meta.request_id.len(), 12);
        assert!(resp.meta.request_id.chars().all(|c| c.is_ascii_hexdigit()));

        let resp = e
            .review(ReviewRequest::new("text", "set").with_request_id("req-7"))
            .await
            .unwrap();
        assert_eq!(resp.meta.request_id, "req-7");
        assert_eq!(resp.meta.policy_version, "1.0.0");
        assert_eq!(resp.meta.model_id, "static");
    }

    #[tokio::test]
    async fn malformed_reply_is_parse_failure() {
        let e = engine(
            Arc::new(StaticBackend::text("Everything looks fine to me!")),
            EngineSettings::default(),
        );
        let resp = e.review(ReviewRequest::new("text", "set")).await.unwrap();
        assert!(resp.observations.is_empty());
        assert_eq!(resp.errors.len(), 1);
        assert_eq!(resp.errors[0].code, ErrorCode::ModelParseFailure);
        assert_eq!(resp.meta.extraction, Some(ExtractionOutcome::Failed));
    }

    #[tokio::test]
    async fn bracketed_prose_is_parse_failure() {
        for text in ["No issues with rules [1, 2].", "[]"] {
            let e = engine(Arc::new(StaticBackend::text(text)), EngineSettings::default());
            let resp = e.review(ReviewRequest::new("text", "set")).await.unwrap();
            assert!(resp.observations.is_empty());
            assert_eq!(resp.errors.len(), 1, "reply: {text:?}");
            assert_eq!(resp.errors[0].code, ErrorCode::ModelParseFailure);
            assert_eq!(resp.meta.extraction, Some(ExtractionOutcome::Failed));
        }
    }

    #[tokio::test]
    async fn unset_options_use_policy_defaults() {
        let entries: Vec<String> = (0..3)
            .map(|i| {
                format!(
                    r#"{{"span": [{i}, {}], "severity": "info", "standard_ref": "R-1",
                        "message": "m", "confidence": 0.4}}"#,
                    i + 1
                )
            })
            .collect();
        let raw = format!(r#"{{"observations": [{}]}}"#, entries.join(","));
        let mut config = PolicyConfig::default();
        config.defaults.max_observations = 2;
        config.defaults.min_confidence = 0.3;
        let e = ReviewEngine::new(
            &store(),
            Arc::new(StaticBackend::text(raw)),
            config,
            EngineSettings::default(),
        );

        // Built-in floor (0.55) would drop every 0.4 entry; the configured 0.3 keeps them.
        let resp = e.review(ReviewRequest::new("text", "set")).await.unwrap();
        assert_eq!(resp.observations.len(), 2);

        let resp = e
            .review(ReviewRequest::new("text", "set").with_options(RequestOptions {
                max_observations: Some(1),
                ..RequestOptions::default()
            }))
            .await
            .unwrap();
        assert_eq!(resp.observations.len(), 1);

        let mut bad = PolicyConfig::default();
        bad.defaults.max_observations = 0;
        let e = ReviewEngine::new(
            &store(),
            Arc::new(StaticBackend::text(NO_OBSERVATIONS)),
            bad,
            EngineSettings::default(),
        );
        assert_eq!(
            e.review(ReviewRequest::new("text", "set")).await.unwrap_err().code(),
            "INVALID_OPTIONS"
        );
    }

    #[tokio::test]
    async fn configured_prompts_reach_the_backend() {
        let backend = Arc::new(FnBackend::new(|instruction, task| {
            assert_eq!(instruction, "Reply with JSON.");
            assert!(task.starts_with("RULES\n"));
            assert!(task.contains("* R-1\n"));
            RawResult::success(NO_OBSERVATIONS)
        }));
        let e = engine(
            backend.clone(),
            EngineSettings {
                prompts: PromptsConfig {
                    system_prompt: "Reply with JSON.".into(),
                    user_prompt_template: "RULES\n{rules_text}\nCONTENT\n{content}".into(),
                    rule_format: "* {standard_ref}".into(),
                    ..PromptsConfig::default()
                },
                ..EngineSettings::default()
            },
        );
        let resp = e.review(ReviewRequest::new("text", "set")).await.unwrap();
        assert!(resp.errors.is_empty());
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn salvaged_reply_has_no_error() {
        let raw = r#"{"observations": [
            {"span": [0, 3], "severity": "warning", "standard_ref": "R-1", "message": "m", "confidence": 0.9},
            {"span": [0, 3], "severity": "warning", "standard_ref": "R-404", "message": "m", "confidence": 0.9}
        ]}"#;
        let e = engine(Arc::new(StaticBackend::text(raw)), EngineSettings::default());
        let resp = e.review(ReviewRequest::new("text", "set")).await.unwrap();
        assert!(resp.errors.is_empty());
        assert_eq!(resp.observations.len(), 1);
        assert_eq!(resp.meta.extraction, Some(ExtractionOutcome::Salvaged));
    }

    #[tokio::test]
    async fn single_rule_mode_calls_once_per_rule() {
        let backend = Arc::new(FnBackend::new(|_, task| {
            let r = ["R-1", "R-2", "R-3"]
                .into_iter()
                .find(|r| task.contains(&format!("[{r}]")))
                .unwrap_or("none");
            // Every call also cites R-1, which only R-1's own call may do.
            RawResult::Success {
                text: reply(&[r, "R-1"]),
                usage: Usage {
                    input_tokens: 10,
                    output_tokens: 2,
                },
            }
        }));
        let e = engine(
            backend.clone(),
            EngineSettings {
                single_rule_mode: true,
                ..EngineSettings::default()
            },
        );
        let resp = e.review(ReviewRequest::new("text", "set")).await.unwrap();
        assert_eq!(backend.calls(), 3);
        assert_eq!(resp.meta.rules_evaluated, 3);
        assert_eq!(
            resp.meta.usage,
            Usage {
                input_tokens: 30,
                output_tokens: 6
            }
        );
        // R-1's own call cites R-1 twice: dedup collapses them.
        let mut refs: Vec<&str> = resp.observations.iter().map(|o| o.standard_ref.as_str()).collect();
        refs.sort();
        assert_eq!(refs, vec!["R-1", "R-2", "R-3"]);
        assert_eq!(resp.meta.extraction, Some(ExtractionOutcome::Salvaged));
    }

    #[tokio::test]
    async fn single_rule_mode_tolerates_partial_failure() {
        let backend = Arc::new(FnBackend::new(|_, task| {
            if task.contains("[R-2]") {
                RawResult::failure(FailureKind::Timeout, "slow")
            } else if task.contains("[R-1]") {
                RawResult::success(reply(&["R-1"]))
            } else {
                RawResult::success(reply(&["R-3"]))
            }
        }));
        let e = engine(
            backend,
            EngineSettings {
                single_rule_mode: true,
                max_concurrent_calls: 2,
                ..EngineSettings::default()
            },
        );
        let resp = e.review(ReviewRequest::new("text", "set")).await.unwrap();
        assert!(resp.errors.is_empty());
        assert_eq!(resp.observations.len(), 2);
        assert_eq!(resp.meta.extraction, Some(ExtractionOutcome::Clean));
    }

    #[tokio::test]
    async fn single_rule_mode_all_failed_is_model_failure() {
        let e = engine(
            Arc::new(StaticBackend::new(RawResult::failure(
                FailureKind::Unreachable,
                "refused",
            ))),
            EngineSettings {
                single_rule_mode: true,
                ..EngineSettings::default()
            },
        );
        let resp = e.review(ReviewRequest::new("text", "set")).await.unwrap();
        assert!(resp.observations.is_empty());
        assert_eq!(resp.errors.len(), 1);
        assert_eq!(resp.errors[0].code, ErrorCode::ModelFailure);
        let details = resp.errors[0].details.as_ref().unwrap();
        assert_eq!(details["failed_calls"], 3);
        assert_eq!(resp.meta.extraction, None);
    }

    #[tokio::test]
    async fn reload_swaps_library() {
        let e = engine(Arc::new(StaticBackend::text(NO_OBSERVATIONS)), EngineSettings::default());
        assert_eq!(e.list_standards().len(), 1);

        let other = RuleStore::from_sets([RuleSet {
            id: "other".into(),
            name: String::new(),
            version: "2.0".into(),
            rules: vec![],
        }])
        .unwrap();
        e.reload(&other);

        let ids: Vec<String> = e.list_standards().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["other"]);
        assert_eq!(
            e.review(ReviewRequest::new("text", "set")).await.unwrap_err(),
            ReviewError::StandardsNotFound("set".into())
        );
        // No rules: no backend call, clean empty response.
        let resp = e.review(ReviewRequest::new("text", "other")).await.unwrap();
        assert!(resp.observations.is_empty() && resp.errors.is_empty());
        assert_eq!(resp.meta.rules_evaluated, 0);
    }

    #[test]
    fn health_reflects_backend() {
        let down = engine(
            Arc::new(StaticBackend::new(RawResult::failure(FailureKind::Unreachable, "x"))),
            EngineSettings::default(),
        );
        assert!(!down.backend_healthy());
        let up = engine(Arc::new(StaticBackend::text(NO_OBSERVATIONS)), EngineSettings::default());
        assert!(up.backend_healthy());
    }
}
