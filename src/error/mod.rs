/// Error resilience layer for the course platform
///
/// This module contains failures instead of letting them take the application down:
/// - Error classification into typed, actionable signals
/// - Bounded retries with exponential backoff and optional jitter
/// - A keyed recovery coordinator (at most one recovery per key)
/// - Isolation boundaries that swap a faulted subtree for a fallback view
/// - Breadcrumbs and error reports handed to a reporting sink
///
/// # Architecture
///
/// ```text
/// ┌──────────────────────┐     ┌───────────────────────┐
/// │ Recovery Coordinator │     │   Isolation Boundary   │
/// └──────────┬───────────┘     └───────────┬───────────┘
///            │                             │
///            ↓                             │
/// ┌──────────────────────┐                 │
/// │  Backoff Scheduler   │                 │
/// └──────────┬───────────┘                 │
///            ↓                             ↓
/// ┌─────────────────────────────────────────────────────┐
/// │        Error Classifier   ·   Reporting Sink         │
/// └─────────────────────────────────────────────────────┘
/// ```
///
/// # Usage Example
///
/// ```rust,ignore
/// use course_resilience::error::{RecoveryCallbacks, RecoveryCoordinator, RetryPolicy, TracingSink};
/// use std::sync::Arc;
///
/// let coordinator = RecoveryCoordinator::new(Arc::new(TracingSink));
///
/// let lessons = coordinator
///     .execute(
///         "load-lessons",
///         || async { fetch_lessons().await },
///         RetryPolicy::default(),
///         RecoveryCallbacks::default(),
///     )
///     .await?;
/// ```
pub mod boundary;
pub mod classification;
pub mod recovery_coordinator;
pub mod reporting;
pub mod retry;

// Re-export main types for convenience
pub use boundary::{
    BoundaryOptions, BoundarySnapshot, BoundaryStatus, DefaultFallback, Fallback, Fault,
    FaultInfo, IsolationBoundary, RenderFn, Rendered, ResetHandle, Subtree,
};
pub use classification::{
    classify, classify_anyhow, ErrorClassification, ErrorKind, ReportContext,
};
pub use recovery_coordinator::{AnyValue, RecoveryCallbacks, RecoveryCoordinator, RecoveryState};
pub use reporting::{
    dispatch_report, Breadcrumb, BreadcrumbTrail, ErrorReport, MemorySink, ReportingSink,
    TracingSink,
};
pub use retry::{run_with_backoff, run_with_backoff_cancellable, RetryPolicy, RetryStrategy};
