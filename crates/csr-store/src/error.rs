use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid standards file {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("standards set in {0} has an empty id")]
    MissingId(PathBuf),

    #[error("standards set '{set}' has a rule with an empty standard_ref")]
    EmptyRef { set: String },

    #[error("standards set '{set}' repeats standard_ref '{standard_ref}'")]
    DuplicateRef { set: String, standard_ref: String },

    #[error("standards set '{0}' is already loaded")]
    DuplicateSet(String),
}
