#![allow(dead_code)]

/// Common test utilities for integration tests
///
/// - Flaky operations that fail a fixed number of times
/// - Sinks with scripted delivery behaviour
/// - Short retry policies for paused-time tests
pub mod flaky;
pub mod sinks;

use course_resilience::RetryPolicy;
use std::time::Duration;

/// Three attempts, 100ms doubling up to 10s
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(10))
}
