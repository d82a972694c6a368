/// Recovery coordinator - keyed registry of recoverable operations
///
/// Wraps each submitted operation with the backoff scheduler and keeps one
/// `RecoveryState` per key while it runs:
/// - At most one recovery per key; a second `execute` is rejected
/// - Terminal failures are reported to the sink and re-raised
/// - `retry` re-runs the operation last registered under a key
/// - `cancel` stops further attempts and clears the bookkeeping
///
/// Registrations of terminally failed keys are kept for `retry`, up to
/// `retained_failures`; past that the oldest failed key is forgotten.
use super::classification::{classify, ErrorClassification, ReportContext};
use super::reporting::{dispatch_report, ErrorReport, ReportingSink};
use super::retry::{run_with_backoff_cancellable, RetryPolicy};
use crate::{AppError, AppResult};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Failed registrations kept for `retry` by default
pub const DEFAULT_RETAINED_FAILURES: usize = 100;

/// Result of a type-erased re-run through [`RecoveryCoordinator::retry`]
pub type AnyValue = Box<dyn Any + Send>;

type ErasedOperation = Arc<dyn Fn() -> BoxFuture<'static, AppResult<AnyValue>> + Send + Sync>;

/// Snapshot of one key's recovery
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryState {
    pub is_recovering: bool,

    /// Failed attempts observed so far
    pub attempts: u32,

    pub max_attempts: u32,

    pub last_error: Option<ErrorClassification>,

    pub can_retry: bool,
}

impl RecoveryState {
    fn started(max_attempts: u32) -> Self {
        Self {
            is_recovering: true,
            attempts: 0,
            max_attempts,
            last_error: None,
            can_retry: true,
        }
    }
}

/// Optional hooks invoked during a recovery
#[derive(Clone, Default)]
pub struct RecoveryCallbacks {
    on_retry: Option<Arc<dyn Fn(u32) + Send + Sync>>,
    on_success: Option<Arc<dyn Fn() + Send + Sync>>,
    on_failure: Option<Arc<dyn Fn(&AppError) + Send + Sync>>,
}

impl RecoveryCallbacks {
    /// Called with the failed attempt number before each retry
    pub fn on_retry(mut self, f: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(f));
        self
    }

    pub fn on_success(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    /// Called with the terminal error before it is re-raised
    pub fn on_failure(mut self, f: impl Fn(&AppError) + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Arc::new(f));
        self
    }
}

struct Entry {
    state: RecoveryState,
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Clone)]
struct Registration {
    operation: ErasedOperation,
    policy: RetryPolicy,
    callbacks: RecoveryCallbacks,
    generation: u64,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<String, Entry>,
    registrations: HashMap<String, Registration>,

    /// Keys whose registration outlived a terminal failure, oldest first
    failed: VecDeque<String>,

    next_generation: u64,
}

impl Registry {
    fn forget_failed(&mut self, key: &str) {
        self.failed.retain(|failed| failed != key);
    }
}

/// Recovery coordinator - main orchestration
///
/// Cloning is cheap; clones share the same registry and sink.
#[derive(Clone)]
pub struct RecoveryCoordinator {
    registry: Arc<Mutex<Registry>>,
    sink: Arc<dyn ReportingSink>,
    default_policy: RetryPolicy,
    retained_failures: usize,
}

impl RecoveryCoordinator {
    /// Create new recovery coordinator reporting to `sink`
    pub fn new(sink: Arc<dyn ReportingSink>) -> Self {
        Self::with_policy(sink, RetryPolicy::default())
    }

    /// Create with the policy used by [`execute_default`](Self::execute_default)
    pub fn with_policy(sink: Arc<dyn ReportingSink>, default_policy: RetryPolicy) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            sink,
            default_policy,
            retained_failures: DEFAULT_RETAINED_FAILURES,
        }
    }

    /// Cap the number of failed keys that stay available to `retry`
    pub fn with_retained_failures(mut self, retained_failures: usize) -> Self {
        self.retained_failures = retained_failures;
        self
    }

    /// Execute operation with recovery
    ///
    /// Fails with `RecoveryInProgress` if `key` is already recovering, and
    /// with `RecoveryCancelled` if `cancel(key)` lands before it finishes.
    /// Otherwise resolves with the operation's value or its terminal error.
    pub async fn execute<F, Fut, T>(
        &self,
        key: impl Into<String>,
        operation: F,
        policy: RetryPolicy,
        callbacks: RecoveryCallbacks,
    ) -> AppResult<T>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let key = key.into();
        policy.validate()?;

        let operation = Arc::new(operation);
        let erased: ErasedOperation = {
            let operation = Arc::clone(&operation);
            Arc::new(move || {
                let attempt = operation();
                async move { attempt.await.map(|value| Box::new(value) as AnyValue) }.boxed()
            })
        };

        let registration = Registration {
            operation: erased,
            policy,
            callbacks,
            generation: 0,
        };
        let (generation, cancel, registration) = self.begin(&key, registration)?;

        self.drive(
            &key,
            generation,
            &cancel,
            || operation(),
            &registration.policy,
            &registration.callbacks,
        )
        .await
    }

    /// Execute with the coordinator's default policy and no callbacks
    pub async fn execute_default<F, Fut, T>(&self, key: impl Into<String>, operation: F) -> AppResult<T>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let policy = self.default_policy.clone();
        self.execute(key, operation, policy, RecoveryCallbacks::default())
            .await
    }

    /// Re-run the operation, policy and callbacks last registered for `key`
    pub async fn retry(&self, key: &str) -> AppResult<AnyValue> {
        let registration = self
            .registry
            .lock()
            .registrations
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::NoSuchRecovery {
                key: key.to_string(),
            })?;

        tracing::info!(key, "Manual retry requested");

        let (generation, cancel, registration) = self.begin(key, registration)?;
        let operation = Arc::clone(&registration.operation);

        self.drive(
            key,
            generation,
            &cancel,
            move || operation(),
            &registration.policy,
            &registration.callbacks,
        )
        .await
    }

    /// Stop scheduling attempts for `key` and drop its bookkeeping
    ///
    /// An attempt already running is not interrupted; its result is discarded.
    /// Also forgets a registration kept after a terminal failure.
    pub fn cancel(&self, key: &str) {
        let mut registry = self.registry.lock();
        registry.registrations.remove(key);
        registry.forget_failed(key);

        if let Some(entry) = registry.entries.remove(key) {
            entry.cancel.cancel();
            tracing::info!(key, attempts = entry.state.attempts, "Recovery cancelled");
        }
    }

    /// Snapshot of `key`'s recovery, if one is registered
    pub fn get_state(&self, key: &str) -> Option<RecoveryState> {
        self.registry
            .lock()
            .entries
            .get(key)
            .map(|entry| entry.state.clone())
    }

    /// Keys with a live recovery entry, sorted
    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.registry.lock().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Cancel every recovery and clear the registry
    pub fn shutdown(&self) {
        let mut registry = self.registry.lock();
        let count = registry.entries.len();

        for (_, entry) in registry.entries.drain() {
            entry.cancel.cancel();
        }
        registry.registrations.clear();
        registry.failed.clear();

        if count > 0 {
            tracing::info!(cancelled = count, "Recovery coordinator shut down");
        }
    }

    /// Register a new recovery under `key`, rejecting a concurrent one
    fn begin(
        &self,
        key: &str,
        mut registration: Registration,
    ) -> AppResult<(u64, CancellationToken, Registration)> {
        let mut registry = self.registry.lock();

        if registry
            .entries
            .get(key)
            .is_some_and(|entry| entry.state.is_recovering)
        {
            tracing::warn!(key, "Recovery already in progress, rejecting");
            return Err(AppError::RecoveryInProgress {
                key: key.to_string(),
            });
        }

        registry.forget_failed(key);
        registry.next_generation += 1;
        let generation = registry.next_generation;
        let cancel = CancellationToken::new();

        registry.entries.insert(
            key.to_string(),
            Entry {
                state: RecoveryState::started(registration.policy.max_attempts),
                generation,
                cancel: cancel.clone(),
            },
        );

        registration.generation = generation;
        registry
            .registrations
            .insert(key.to_string(), registration.clone());

        tracing::debug!(
            key,
            generation,
            max_attempts = registration.policy.max_attempts,
            "Recovery started"
        );

        Ok((generation, cancel, registration))
    }

    /// Run one registered recovery to completion
    async fn drive<F, Fut, T>(
        &self,
        key: &str,
        generation: u64,
        cancel: &CancellationToken,
        operation: F,
        policy: &RetryPolicy,
        callbacks: &RecoveryCallbacks,
    ) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let registry = Arc::clone(&self.registry);
        let on_retry = callbacks.on_retry.clone();

        let outcome = run_with_backoff_cancellable(
            key,
            operation,
            policy,
            |attempt: u32, _: &AppError, classification: &ErrorClassification| {
                {
                    let mut registry = registry.lock();
                    if let Some(entry) = registry
                        .entries
                        .get_mut(key)
                        .filter(|entry| entry.generation == generation)
                    {
                        entry.state.attempts = attempt;
                        entry.state.last_error = Some(classification.clone());
                    }
                }
                if let Some(callback) = &on_retry {
                    callback(attempt);
                }
            },
            cancel,
        )
        .await;

        let cancelled = || AppError::RecoveryCancelled {
            key: key.to_string(),
        };

        match outcome {
            Ok(value) => {
                let removed = {
                    let mut registry = self.registry.lock();
                    if registry
                        .registrations
                        .get(key)
                        .is_some_and(|r| r.generation == generation)
                    {
                        registry.registrations.remove(key);
                    }
                    Self::remove_if_current(&mut registry, key, generation)
                };

                if cancel.is_cancelled() || removed.is_none() {
                    tracing::debug!(key, "Discarding result of cancelled recovery");
                    return Err(cancelled());
                }

                tracing::debug!(key, "Recovery succeeded");
                if let Some(callback) = &callbacks.on_success {
                    callback();
                }
                Ok(value)
            }

            Err(_) if cancel.is_cancelled() => Err(cancelled()),

            Err(error) => {
                let classification = classify(&error);

                let terminal = {
                    let mut registry = self.registry.lock();
                    registry
                        .entries
                        .get_mut(key)
                        .filter(|entry| entry.generation == generation)
                        .map(|entry| {
                            let state = &mut entry.state;
                            state.is_recovering = false;
                            state.attempts = (state.attempts + 1).min(state.max_attempts);
                            state.last_error = Some(classification.clone());
                            state.can_retry = classification.retryable;
                            state.clone()
                        })
                };

                let (attempts, max_attempts) = terminal
                    .as_ref()
                    .map(|s| (s.attempts, s.max_attempts))
                    .unwrap_or((1, policy.max_attempts));

                tracing::error!(
                    key,
                    attempts,
                    max_attempts,
                    kind = %classification.kind,
                    error = %error,
                    "Recovery failed"
                );

                dispatch_report(
                    self.sink.as_ref(),
                    ErrorReport::new(
                        &error,
                        ReportContext::for_recovery(key, attempts, max_attempts),
                    ),
                );

                if let Some(callback) = &callbacks.on_failure {
                    callback(&error);
                }

                {
                    let mut registry = self.registry.lock();
                    Self::remove_if_current(&mut registry, key, generation);
                    self.retain_failed(&mut registry, key, generation);
                }
                Err(error)
            }
        }
    }

    /// Keep `key`'s registration for `retry`, evicting the oldest past the cap
    fn retain_failed(&self, registry: &mut Registry, key: &str, generation: u64) {
        if !registry
            .registrations
            .get(key)
            .is_some_and(|r| r.generation == generation)
        {
            return;
        }

        registry.forget_failed(key);
        registry.failed.push_back(key.to_string());

        while registry.failed.len() > self.retained_failures {
            let Some(evicted) = registry.failed.pop_front() else {
                break;
            };
            registry.registrations.remove(&evicted);
            tracing::debug!(key = %evicted, "Forgot failed recovery registration");
        }
    }

    fn remove_if_current(registry: &mut Registry, key: &str, generation: u64) -> Option<Entry> {
        if registry
            .entries
            .get(key)
            .is_some_and(|entry| entry.generation == generation)
        {
            registry.entries.remove(key)
        } else {
            None
        }
    }
}
