//! Rule store: standards sets loaded once from disk, read-only thereafter.

mod error;
mod store;

pub use error::StoreError;
pub use store::RuleStore;
