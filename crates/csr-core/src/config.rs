//! Policy configuration (retrieval breadth, severity thresholds, request
//! defaults) and prompt templates.
//!
//! Policy is loaded from a YAML file, then overridden by
//! `CSR_POLICY_<SECTION>_<KEY>` environment variables. Priority: environment >
//! file > built-in defaults. Prompt templates come from their own YAML file,
//! with built-in defaults for anything it leaves out.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::review::{MAX_OBSERVATIONS_LIMIT, Strictness};

pub const ENV_PREFIX: &str = "CSR_POLICY_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid value for {key}: '{value}'")]
    Override { key: String, value: String },
    #[error("policy config out of range: {0}")]
    Range(String),
    #[error("prompt template {template} is missing placeholder {placeholder}")]
    MissingPlaceholder {
        template: &'static str,
        placeholder: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub k_low: usize,
    pub k_medium: usize,
    pub k_high: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k_low: 6,
            k_medium: 10,
            k_high: 14,
        }
    }
}

impl RetrievalConfig {
    /// Number of rules to retrieve at the given strictness.
    pub fn k(&self, strictness: Strictness) -> usize {
        match strictness {
            Strictness::Low => self.k_low,
            Strictness::Medium => self.k_medium,
            Strictness::High => self.k_high,
        }
    }
}

/// Minimum confidence a `violation` needs to keep its severity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdsConfig {
    pub violation_low: f64,
    pub violation_medium: f64,
    pub violation_high: f64,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            violation_low: 0.85,
            violation_medium: 0.75,
            violation_high: 0.70,
        }
    }
}

impl ThresholdsConfig {
    pub fn violation(&self, strictness: Strictness) -> f64 {
        match strictness {
            Strictness::Low => self.violation_low,
            Strictness::Medium => self.violation_medium,
            Strictness::High => self.violation_high,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub min_confidence: f64,
    pub max_observations: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.55,
            max_observations: 25,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub retrieval: RetrievalConfig,
    pub thresholds: ThresholdsConfig,
    pub defaults: DefaultsConfig,
}

impl PolicyConfig {
    /// Load from `path` (defaults when the file does not exist), apply
    /// process-environment overrides, and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let config = Self::from_yaml(&raw)?;
            info!(path = %path.display(), "loaded policy config");
            config
        } else {
            debug!(path = %path.display(), "policy config not found, using defaults");
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML. An empty document yields defaults.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply `CSR_POLICY_<SECTION>_<KEY>` overrides resolved through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let r = &mut self.retrieval;
        override_field(&lookup, "RETRIEVAL_K_LOW", &mut r.k_low)?;
        override_field(&lookup, "RETRIEVAL_K_MEDIUM", &mut r.k_medium)?;
        override_field(&lookup, "RETRIEVAL_K_HIGH", &mut r.k_high)?;

        let t = &mut self.thresholds;
        override_field(&lookup, "THRESHOLDS_VIOLATION_LOW", &mut t.violation_low)?;
        override_field(&lookup, "THRESHOLDS_VIOLATION_MEDIUM", &mut t.violation_medium)?;
        override_field(&lookup, "THRESHOLDS_VIOLATION_HIGH", &mut t.violation_high)?;

        let d = &mut self.defaults;
        override_field(&lookup, "DEFAULTS_MIN_CONFIDENCE", &mut d.min_confidence)?;
        override_field(&lookup, "DEFAULTS_MAX_OBSERVATIONS", &mut d.max_observations)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.retrieval;
        if r.k_low == 0 || r.k_medium == 0 || r.k_high == 0 {
            return Err(ConfigError::Range("retrieval k must be at least 1".into()));
        }
        let t = &self.thresholds;
        for (name, v) in [
            ("thresholds.violation_low", t.violation_low),
            ("thresholds.violation_medium", t.violation_medium),
            ("thresholds.violation_high", t.violation_high),
            ("defaults.min_confidence", self.defaults.min_confidence),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(ConfigError::Range(format!("{name} must be in [0, 1], got {v}")));
            }
        }
        if !(1..=MAX_OBSERVATIONS_LIMIT).contains(&self.defaults.max_observations) {
            return Err(ConfigError::Range(format!(
                "defaults.max_observations must be in [1, {MAX_OBSERVATIONS_LIMIT}]"
            )));
        }
        Ok(())
    }
}

// ── Prompts ──

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a content standards reviewer. You analyze instructional content against the \
provided standards rules and return structured observations.

You MUST respond with raw JSON only. No markdown, no code fences, no explanation text.

Your response must match this exact schema:
{
  \"observations\": [
    {
      \"span\": [start_char, end_char] or null,
      \"severity\": \"info\" | \"warning\" | \"violation\",
      \"category\": \"clarity\" | \"accuracy\" | \"structure\" | \"accessibility\" | \"pedagogy\" | \"compliance\" | \"other\",
      \"standard_ref\": \"the rule's standard_ref\",
      \"message\": \"clear description of the issue\",
      \"suggested_fix\": \"how to fix it\" or null,
      \"rationale\": \"why this is an issue per the standard\" or null,
      \"standard_excerpt\": \"relevant quote from the standard\" or null,
      \"confidence\": 0.0 to 1.0
    }
  ]
}

Rules for observations:
- span must be [start, end] character offsets into the content where 0 <= start < end <= content_length, or null if not locatable
- severity: \"violation\" for clear breaches, \"warning\" for likely issues, \"info\" for suggestions
- confidence: how certain you are this is a real issue (0.0-1.0)
- standard_ref must exactly match one of the provided rules' standard_ref values
- Only report genuine issues. Do not fabricate problems.

Evaluation procedure:
1. Take each listed rule in turn and check the content against it explicitly.
2. Record an observation for every rule the content breaches.
3. Only after every listed rule has been checked individually may you conclude that \
the content complies; in that case return {\"observations\": []}.
";

/// Placeholders: `{rules_text}`, `{strictness_instruction}`, `{content_length}`,
/// `{content}`, `{rule_count}`, `{rationale_instruction}`, `{excerpt_instruction}`.
pub const DEFAULT_USER_PROMPT_TEMPLATE: &str = "\
## Standards Rules

{rules_text}
## Strictness

{strictness_instruction}

## Content to Review (length: {content_length} characters)

{content}

## Instructions

Evaluate the content above against each of the {rule_count} rules listed, one by one. \
{rationale_instruction} {excerpt_instruction} Return your observations as JSON.";

/// Placeholders: `{standard_ref}`, `{title}`, `{body}`, `{tags}`.
pub const DEFAULT_RULE_FORMAT: &str = "- [{standard_ref}] {title}: {body}";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrictnessInstructions {
    pub low: String,
    pub medium: String,
    pub high: String,
}

impl Default for StrictnessInstructions {
    fn default() -> Self {
        Self {
            low: "Be lenient. Only flag clear, unambiguous issues.".into(),
            medium: "Apply standard review criteria.".into(),
            high: "Be thorough and strict. Flag any potential issue, even minor ones.".into(),
        }
    }
}

impl StrictnessInstructions {
    pub fn for_strictness(&self, strictness: Strictness) -> &str {
        match strictness {
            Strictness::Low => &self.low,
            Strictness::Medium => &self.medium,
            Strictness::High => &self.high,
        }
    }
}

/// Prompt text sent to the backend. Loaded once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    pub system_prompt: String,
    pub user_prompt_template: String,
    pub rule_format: String,
    pub strictness_instructions: StrictnessInstructions,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            user_prompt_template: DEFAULT_USER_PROMPT_TEMPLATE.into(),
            rule_format: DEFAULT_RULE_FORMAT.into(),
            strictness_instructions: StrictnessInstructions::default(),
        }
    }
}

impl PromptsConfig {
    /// Load from `path`, falling back to the built-in prompts when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let config = Self::from_yaml(&raw)?;
            info!(path = %path.display(), "loaded prompt templates");
            config
        } else {
            debug!(path = %path.display(), "prompt templates not found, using built-in prompts");
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML. Keys left out keep their built-in text.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// The user template must carry the content and the rules; each rule line
    /// must carry its reference.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for placeholder in ["{content}", "{rules_text}"] {
            if !self.user_prompt_template.contains(placeholder) {
                return Err(ConfigError::MissingPlaceholder {
                    template: "user_prompt_template",
                    placeholder,
                });
            }
        }
        if !self.rule_format.contains("{standard_ref}") {
            return Err(ConfigError::MissingPlaceholder {
                template: "rule_format",
                placeholder: "{standard_ref}",
            });
        }
        Ok(())
    }
}

fn override_field<F, T>(lookup: &F, suffix: &str, field: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let key = format!("{ENV_PREFIX}{suffix}");
    if let Some(value) = lookup(&key) {
        *field = value.trim().parse().map_err(|_| ConfigError::Override {
            key: key.clone(),
            value: value.clone(),
        })?;
        debug!(key = %key, value = %value, "policy override applied");
    }
    Ok(())
}
