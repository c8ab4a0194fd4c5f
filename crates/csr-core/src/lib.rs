pub mod config;
pub mod review;
pub mod rule;

pub use config::{
    ConfigError, DefaultsConfig, PolicyConfig, PromptsConfig, RetrievalConfig, StrictnessInstructions,
    ThresholdsConfig,
};
pub use review::{
    CandidateObservation, Category, ErrorCode, ExtractionOutcome, Meta, Observation,
    ParseSeverityError, ParseStrictnessError, RequestOptions, ResponseError, ReviewOptions,
    ReviewRequest, ReviewResponse, Severity, Span, Strictness, Usage,
};
pub use rule::{Rule, RuleSet, StandardsSetInfo};
