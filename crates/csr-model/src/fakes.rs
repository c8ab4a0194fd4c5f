//! In-memory backends for tests and offline runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{Backend, RawResult};

/// Returns the same result for every call.
pub struct StaticBackend {
    result: RawResult,
    calls: AtomicUsize,
    healthy: AtomicBool,
}

impl StaticBackend {
    pub fn new(result: RawResult) -> Self {
        Self {
            healthy: AtomicBool::new(result.is_success()),
            result,
            calls: AtomicUsize::new(0),
        }
    }

    /// Shorthand for a backend that always replies with `text`.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(RawResult::success(text))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for StaticBackend {
    fn model_id(&self) -> &str {
        "static"
    }

    async fn generate(&self, _instruction: &str, _task: &str, _timeout: Duration) -> RawResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

type Responder = dyn Fn(&str, &str) -> RawResult + Send + Sync;

/// Computes each reply from the instruction and task text.
///
/// Useful when replies depend on which rule a single-rule call is about.
pub struct FnBackend {
    respond: Arc<Responder>,
    calls: AtomicUsize,
}

impl FnBackend {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&str, &str) -> RawResult + Send + Sync + 'static,
    {
        Self {
            respond: Arc::new(respond),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for FnBackend {
    fn model_id(&self) -> &str {
        "fn"
    }

    async fn generate(&self, instruction: &str, task: &str, _timeout: Duration) -> RawResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(instruction, task)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}
