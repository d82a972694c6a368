use course_resilience::{AppError, AppResult};
use futures::future::{BoxFuture, FutureExt};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Operation that fails its first `failures` calls, then succeeds with the
/// call number
#[derive(Clone)]
pub struct FlakyOperation {
    calls: Arc<AtomicU32>,
    failures: u32,
    make_error: Arc<dyn Fn(u32) -> AppError + Send + Sync>,
}

impl FlakyOperation {
    pub fn new(failures: u32) -> Self {
        Self::with_error(failures, |n| {
            AppError::Network(format!("simulated network failure {}", n))
        })
    }

    pub fn with_error(
        failures: u32,
        make_error: impl Fn(u32) -> AppError + Send + Sync + 'static,
    ) -> Self {
        Self {
            calls: Arc::new(AtomicU32::new(0)),
            failures,
            make_error: Arc::new(make_error),
        }
    }

    /// Closure suitable for `RecoveryCoordinator::execute`
    pub fn operation(&self) -> impl Fn() -> BoxFuture<'static, AppResult<u32>> + Send + Sync + 'static {
        let this = self.clone();
        move || {
            let n = this.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let result = if n <= this.failures {
                Err((this.make_error)(n))
            } else {
                Ok(n)
            };
            futures::future::ready(result).boxed()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}
