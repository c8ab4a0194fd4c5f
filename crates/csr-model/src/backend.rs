use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use csr_core::Usage;

/// Why a backend call produced no text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection could not be established.
    Unreachable,
    /// No complete reply within the timeout.
    Timeout,
    /// Non-2xx HTTP status.
    BadStatus,
    /// 2xx reply whose completion envelope could not be decoded.
    Malformed,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unreachable => "unreachable",
            Self::Timeout => "timeout",
            Self::BadStatus => "bad_status",
            Self::Malformed => "malformed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ModelFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ModelFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

/// Outcome of one backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum RawResult {
    Success { text: String, usage: Usage },
    Failure(ModelFailure),
}

impl RawResult {
    pub fn success(text: impl Into<String>) -> Self {
        Self::Success {
            text: text.into(),
            usage: Usage::default(),
        }
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure(ModelFailure::new(kind, message))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// A text-generation service that judges content against rules.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Identifier reported in response metadata.
    fn model_id(&self) -> &str;

    /// Send one instruction/task pair, bounded by `timeout`. Single attempt.
    async fn generate(&self, instruction: &str, task: &str, timeout: Duration) -> RawResult;

    /// Whether the backend is currently considered healthy.
    ///
    /// A liveness hint, not a guarantee that the next call succeeds.
    fn is_healthy(&self) -> bool;
}
