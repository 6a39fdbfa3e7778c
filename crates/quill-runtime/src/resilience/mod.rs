//! Resilience patterns for quill-runtime.
//!
//! Hosted calls retry transient failures a fixed number of times with a
//! linearly growing delay, then give up with the last error.

mod retry;

pub use retry::{retry_transient, LinearBackoff, RetryPolicy, MAX_RETRIES, RETRY_DELAY};
