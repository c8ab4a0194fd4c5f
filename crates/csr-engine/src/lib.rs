//! Review pipeline: rule retrieval, prompt building, response extraction and
//! observation policy, driven by [`ReviewEngine`].

mod extract;
mod library;
mod pipeline;
mod policy;
mod prompt;
mod retriever;

pub use extract::{Extraction, extract};
pub use library::{IndexedRuleSet, Library};
pub use pipeline::{EngineSettings, ReviewEngine, ReviewError};
pub use policy::{DEFAULT_POLICY_VERSION, Policy, observation_id};
pub use prompt::PromptBuilder;
pub use retriever::Retriever;
