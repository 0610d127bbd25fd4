//! Resilience primitives: retry policies with exponential backoff.

pub mod retry;

pub use retry::{retry, RetryConfig};
