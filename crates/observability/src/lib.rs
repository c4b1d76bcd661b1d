//! Tracing and logging setup shared by binaries, benches and tests.

/// Subscriber construction (filters, output format).
pub mod tracing;

pub use crate::tracing::{LOG_FORMAT_ENV, LogFormat, init, init_for_tests, init_with};
