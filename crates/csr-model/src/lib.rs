//! Text-generation backend: the only suspending step of a review.
//!
//! The backend is a best-effort oracle. Every call returns a [`RawResult`];
//! transport problems become [`ModelFailure`] values, never errors or panics.

mod backend;
mod client;
pub mod fakes;

pub use backend::{Backend, FailureKind, ModelFailure, RawResult};
pub use client::{ClientConfig, ModelClient};
