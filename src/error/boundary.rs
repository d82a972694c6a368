/// Isolation boundaries - contain faults to a subtree of the UI
///
/// A boundary renders its subtree through [`Subtree::try_render`]. A fault
/// (an `Err(Fault)` or a panic) puts the boundary into the `Faulted` state,
/// where the subtree is replaced by a fallback view until one of:
/// - the auto-reset timer fires (suppressed once faults exceed `max_faults`)
/// - a manual reset through [`ResetHandle`]
/// - the subtree's identity changes
///
/// A fault raised by the fallback itself is not contained and is returned
/// to the caller.
use super::classification::{classify, ErrorClassification, ReportContext};
use super::reporting::{dispatch_report, ErrorReport, ReportingSink};
use crate::config::BoundarySettings;
use crate::AppError;
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Breadcrumb category and report operation used for boundary faults
const BOUNDARY_CATEGORY: &str = "error-boundary";

/// Failure raised while rendering or updating a subtree
#[derive(Debug, Clone)]
pub struct Fault {
    message: String,
    trace: Option<String>,
    source: Option<AppError>,
}

impl Fault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: None,
            source: None,
        }
    }

    /// Fault caused by a typed error, classified by its variant
    pub fn from_error(error: AppError) -> Self {
        Self {
            message: error.to_string(),
            trace: None,
            source: Some(error),
        }
    }

    /// Fault built from a caught panic payload
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else if let Some(s) = payload.downcast_ref::<&'static str>() {
            s.to_string()
        } else {
            "<non-string panic payload>".to_string()
        };
        Self::new(format!("panic during render: {}", message))
    }

    /// Attach a diagnostic trace (e.g. the component stack)
    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn trace(&self) -> Option<&str> {
        self.trace.as_deref()
    }

    pub fn classification(&self) -> ErrorClassification {
        match &self.source {
            Some(error) => classify(error),
            None => classify(&AppError::Other(self.message.clone())),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Fault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<AppError> for Fault {
    fn from(error: AppError) -> Self {
        Fault::from_error(error)
    }
}

/// A guarded piece of UI
pub trait Subtree {
    type View;

    /// Identity of the subtree's input; a new identity supersedes a fault
    fn identity(&self) -> String {
        String::new()
    }

    /// Render the subtree, reporting failures as faults
    fn try_render(&self) -> Result<Self::View, Fault>;
}

/// Subtree backed by a closure
pub struct RenderFn<F> {
    identity: String,
    render: F,
}

impl<F> RenderFn<F> {
    pub fn new(identity: impl Into<String>, render: F) -> Self {
        Self {
            identity: identity.into(),
            render,
        }
    }
}

impl<V, F> Subtree for RenderFn<F>
where
    F: Fn() -> Result<V, Fault>,
{
    type View = V;

    fn identity(&self) -> String {
        self.identity.clone()
    }

    fn try_render(&self) -> Result<V, Fault> {
        (self.render)()
    }
}

/// What the boundary knows about its current fault
#[derive(Debug, Clone, Serialize)]
pub struct FaultInfo {
    pub message: String,
    pub trace: Option<String>,
    pub classification: ErrorClassification,
    pub fault_count: u32,
    pub isolation_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BoundaryStatus {
    Healthy,
    Faulted,
}

/// Point-in-time view of a boundary
#[derive(Debug, Clone, Serialize)]
pub struct BoundarySnapshot {
    pub status: BoundaryStatus,
    pub fault_count: u32,
    pub reset_scheduled: bool,
    pub last_fault: Option<FaultInfo>,
}

/// Caller-supplied fallback view
pub enum Fallback<V> {
    /// Fixed view
    Static(V),

    /// View built from the fault and a reset capability
    Render(Arc<dyn Fn(&FaultInfo, ResetHandle) -> V + Send + Sync>),
}

impl<V> Fallback<V> {
    pub fn render(f: impl Fn(&FaultInfo, ResetHandle) -> V + Send + Sync + 'static) -> Self {
        Fallback::Render(Arc::new(f))
    }
}

/// Built-in fallback: message, retry affordance and optional details
#[derive(Debug, Clone)]
pub struct DefaultFallback {
    pub title: String,
    pub user_message: String,
    pub suggested_action: String,
    pub isolation_id: Option<String>,

    /// Diagnostic disclosure, present when `show_details` is enabled
    pub details: Option<String>,

    /// Wired to the manual reset transition
    pub retry: ResetHandle,
}

/// Output of one render pass
#[derive(Debug)]
pub enum Rendered<V> {
    Content(V),
    Fallback(V),
    Default(DefaultFallback),
}

impl<V> Rendered<V> {
    pub fn is_content(&self) -> bool {
        matches!(self, Rendered::Content(_))
    }

    pub fn content(self) -> Option<V> {
        match self {
            Rendered::Content(view) => Some(view),
            _ => None,
        }
    }
}

/// Boundary configuration
pub struct BoundaryOptions<V> {
    pub fallback: Option<Fallback<V>>,
    pub on_fault: Option<Arc<dyn Fn(&FaultInfo) + Send + Sync>>,
    pub show_details: bool,
    pub isolation_id: Option<String>,
    pub auto_reset_delay: Duration,

    /// Faults tolerated before auto-reset is suppressed
    pub max_faults: u32,

    /// Faults further apart than this restart the count
    pub fault_window: Option<Duration>,
}

impl<V> Default for BoundaryOptions<V> {
    fn default() -> Self {
        Self {
            fallback: None,
            on_fault: None,
            show_details: false,
            isolation_id: None,
            auto_reset_delay: Duration::from_millis(30_000),
            max_faults: 3,
            fault_window: None,
        }
    }
}

impl<V> BoundaryOptions<V> {
    pub fn from_settings(settings: &BoundarySettings) -> Self {
        Self {
            show_details: settings.show_details,
            auto_reset_delay: Duration::from_millis(settings.auto_reset_ms),
            max_faults: settings.max_faults,
            fault_window: settings.fault_window_ms.map(Duration::from_millis),
            ..Self::default()
        }
    }

    pub fn with_fallback(mut self, fallback: Fallback<V>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_on_fault(mut self, f: impl Fn(&FaultInfo) + Send + Sync + 'static) -> Self {
        self.on_fault = Some(Arc::new(f));
        self
    }

    pub fn with_details(mut self, show_details: bool) -> Self {
        self.show_details = show_details;
        self
    }

    pub fn with_isolation_id(mut self, isolation_id: impl Into<String>) -> Self {
        self.isolation_id = Some(isolation_id.into());
        self
    }

    pub fn with_auto_reset(mut self, delay: Duration) -> Self {
        self.auto_reset_delay = delay;
        self
    }

    pub fn with_max_faults(mut self, max_faults: u32) -> Self {
        self.max_faults = max_faults;
        self
    }

    pub fn with_fault_window(mut self, window: Duration) -> Self {
        self.fault_window = Some(window);
        self
    }
}

struct PendingReset {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Core {
    has_fault: bool,
    fault_count: u32,
    last_fault_at: Option<Instant>,
    last_fault: Option<FaultInfo>,
    pending_reset: Option<PendingReset>,
    timer_generation: u64,
    identity: Option<String>,
    status: watch::Sender<BoundaryStatus>,
}

impl Core {
    /// Back to Healthy; a manual reset also forgets previous faults
    fn clear(&mut self, forget_faults: bool) {
        self.cancel_timer();
        self.has_fault = false;
        self.last_fault = None;
        if forget_faults {
            self.fault_count = 0;
            self.last_fault_at = None;
        }
        self.status.send_replace(BoundaryStatus::Healthy);
    }

    fn cancel_timer(&mut self) {
        if let Some(pending) = self.pending_reset.take() {
            pending.handle.abort();
        }
    }
}

/// Capability to reset a boundary, handed to fallbacks
#[derive(Clone)]
pub struct ResetHandle {
    core: Weak<Mutex<Core>>,
    isolation_id: Option<String>,
}

impl ResetHandle {
    /// Return the boundary to Healthy; a no-op once the boundary is gone
    pub fn reset(&self) {
        if let Some(core) = self.core.upgrade() {
            core.lock().clear(true);
            tracing::info!(isolation_id = ?self.isolation_id, "Boundary manually reset");
        }
    }
}

impl fmt::Debug for ResetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResetHandle")
            .field("isolation_id", &self.isolation_id)
            .field("attached", &(self.core.strong_count() > 0))
            .finish()
    }
}

/// Fault-containment wrapper around a subtree
pub struct IsolationBoundary<V> {
    core: Arc<Mutex<Core>>,
    options: BoundaryOptions<V>,
    sink: Option<Arc<dyn ReportingSink>>,
}

impl<V> IsolationBoundary<V> {
    /// Mount a boundary in the Healthy state
    pub fn new(options: BoundaryOptions<V>) -> Self {
        let (status, _) = watch::channel(BoundaryStatus::Healthy);
        Self {
            core: Arc::new(Mutex::new(Core {
                has_fault: false,
                fault_count: 0,
                last_fault_at: None,
                last_fault: None,
                pending_reset: None,
                timer_generation: 0,
                identity: None,
                status,
            })),
            options,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReportingSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn reset_handle(&self) -> ResetHandle {
        ResetHandle {
            core: Arc::downgrade(&self.core),
            isolation_id: self.options.isolation_id.clone(),
        }
    }

    /// Manual reset: back to Healthy, pending timer cancelled, count cleared
    pub fn reset(&self) {
        self.reset_handle().reset();
    }

    pub fn state(&self) -> BoundarySnapshot {
        let core = self.core.lock();
        BoundarySnapshot {
            status: if core.has_fault {
                BoundaryStatus::Faulted
            } else {
                BoundaryStatus::Healthy
            },
            fault_count: core.fault_count,
            reset_scheduled: core.pending_reset.is_some(),
            last_fault: core.last_fault.clone(),
        }
    }

    /// Watch status changes, e.g. to re-render after an auto-reset
    pub fn subscribe(&self) -> watch::Receiver<BoundaryStatus> {
        self.core.lock().status.subscribe()
    }

    /// Render `subtree`, substituting the fallback while faulted
    ///
    /// Returns `Err` only when the fallback itself faults.
    pub fn render<S>(&self, subtree: &S) -> Result<Rendered<V>, Fault>
    where
        S: Subtree<View = V>,
        V: Clone,
    {
        let identity = subtree.identity();
        let faulted = {
            let mut core = self.core.lock();
            if core.identity.as_deref() != Some(identity.as_str()) {
                let previous = core.identity.replace(identity.clone());
                if previous.is_some() {
                    // New content starts with a clean fault history
                    if core.has_fault {
                        core.clear(true);
                        tracing::info!(
                            isolation_id = ?self.options.isolation_id,
                            identity = %identity,
                            "Subtree identity changed, boundary reset"
                        );
                    } else {
                        core.fault_count = 0;
                        core.last_fault_at = None;
                    }
                }
            }
            core.has_fault
        };

        if faulted {
            return self.render_fallback();
        }

        let fault = match catch_unwind(AssertUnwindSafe(|| subtree.try_render())) {
            Ok(Ok(view)) => return Ok(Rendered::Content(view)),
            Ok(Err(fault)) => fault,
            Err(payload) => Fault::from_panic(payload),
        };

        self.capture(fault, &identity);
        self.render_fallback()
    }

    /// Healthy -> Faulted
    fn capture(&self, fault: Fault, identity: &str) {
        let classification = fault.classification();
        let trace = fault
            .trace
            .clone()
            .or_else(|| (!identity.is_empty()).then(|| format!("    in {}", identity)));

        let (info, scheduled) = {
            let mut core = self.core.lock();
            let now = Instant::now();

            if let (Some(window), Some(last)) = (self.options.fault_window, core.last_fault_at) {
                if now.duration_since(last) > window {
                    core.fault_count = 0;
                }
            }

            core.fault_count += 1;
            core.has_fault = true;
            core.last_fault_at = Some(now);

            let info = FaultInfo {
                message: fault.message.clone(),
                trace: trace.clone(),
                classification: classification.clone(),
                fault_count: core.fault_count,
                isolation_id: self.options.isolation_id.clone(),
            };
            core.last_fault = Some(info.clone());
            core.cancel_timer();

            let scheduled = core.fault_count <= self.options.max_faults
                && self.schedule_reset(&mut core);
            core.status.send_replace(BoundaryStatus::Faulted);

            (info, scheduled)
        };

        tracing::error!(
            isolation_id = ?info.isolation_id,
            fault_count = info.fault_count,
            kind = %classification.kind,
            error = %fault,
            "Fault contained by isolation boundary"
        );

        if let Some(sink) = &self.sink {
            let mut data = HashMap::new();
            data.insert("message".to_string(), serde_json::json!(info.message));
            data.insert("fault_count".to_string(), serde_json::json!(info.fault_count));
            if let Some(id) = &info.isolation_id {
                data.insert("isolation_id".to_string(), serde_json::json!(id));
            }
            sink.add_breadcrumb(BOUNDARY_CATEGORY, data);

            let mut context =
                ReportContext::new(BOUNDARY_CATEGORY).with_metadata("fault_count", info.fault_count);
            if let Some(trace) = &info.trace {
                context = context.with_metadata("trace", trace.as_str());
            }
            if let Some(id) = &info.isolation_id {
                context = context.with_metadata("isolation_id", id.as_str());
            }
            dispatch_report(
                sink.as_ref(),
                ErrorReport::from_summary(info.message.clone(), Some(classification), context),
            );
        }

        if let Some(on_fault) = &self.options.on_fault {
            on_fault(&info);
        }

        if !scheduled {
            tracing::warn!(
                isolation_id = ?info.isolation_id,
                fault_count = info.fault_count,
                max_faults = self.options.max_faults,
                "Auto-reset suppressed, boundary stays faulted until manually reset"
            );
        }
    }

    /// Arm the auto-reset timer; false when no runtime is available
    fn schedule_reset(&self, core: &mut Core) -> bool {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::warn!(
                    isolation_id = ?self.options.isolation_id,
                    "No async runtime available, auto-reset disabled"
                );
                return false;
            }
        };

        core.timer_generation += 1;
        let generation = core.timer_generation;
        let delay = self.options.auto_reset_delay;
        let weak = Arc::downgrade(&self.core);
        let isolation_id = self.options.isolation_id.clone();

        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;

            let Some(core) = weak.upgrade() else {
                return;
            };
            let mut core = core.lock();
            if core
                .pending_reset
                .as_ref()
                .is_some_and(|pending| pending.generation == generation)
            {
                core.pending_reset = None;
                core.clear(false);
                tracing::info!(
                    isolation_id = ?isolation_id,
                    fault_count = core.fault_count,
                    "Boundary auto-reset"
                );
            }
        });

        tracing::debug!(
            isolation_id = ?self.options.isolation_id,
            delay = %humantime::format_duration(delay),
            "Auto-reset scheduled"
        );
        core.pending_reset = Some(PendingReset { generation, handle });
        true
    }

    fn render_fallback(&self) -> Result<Rendered<V>, Fault>
    where
        V: Clone,
    {
        let info = self.core.lock().last_fault.clone().ok_or_else(|| {
            Fault::new("boundary faulted without a recorded fault")
        })?;

        match &self.options.fallback {
            Some(Fallback::Static(view)) => Ok(Rendered::Fallback(view.clone())),

            Some(Fallback::Render(render)) => {
                let handle = self.reset_handle();
                match catch_unwind(AssertUnwindSafe(|| render(&info, handle))) {
                    Ok(view) => Ok(Rendered::Fallback(view)),
                    Err(payload) => {
                        let fault = Fault::from_panic(payload);
                        tracing::error!(
                            isolation_id = ?self.options.isolation_id,
                            error = %fault,
                            "Fallback faulted, propagating past boundary"
                        );
                        Err(fault)
                    }
                }
            }

            None => {
                let details = self.options.show_details.then(|| match &info.trace {
                    Some(trace) => format!("{}\n{}", info.message, trace),
                    None => info.message.clone(),
                });
                Ok(Rendered::Default(DefaultFallback {
                    title: "Something went wrong".to_string(),
                    user_message: info.classification.user_message.clone(),
                    suggested_action: info.classification.suggested_action.clone(),
                    isolation_id: info.isolation_id.clone(),
                    details,
                    retry: self.reset_handle(),
                }))
            }
        }
    }
}

impl<V> Drop for IsolationBoundary<V> {
    fn drop(&mut self) {
        self.core.lock().cancel_timer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classification::ErrorKind;
    use crate::error::reporting::MemorySink;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Lesson view that fails its first `failures` renders
    struct FlakyLesson {
        id: String,
        renders: AtomicU32,
        failures: u32,
    }

    impl FlakyLesson {
        fn new(id: &str, failures: u32) -> Self {
            Self {
                id: id.to_string(),
                renders: AtomicU32::new(0),
                failures,
            }
        }
    }

    impl Subtree for FlakyLesson {
        type View = String;

        fn identity(&self) -> String {
            self.id.clone()
        }

        fn try_render(&self) -> Result<String, Fault> {
            let n = self.renders.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(Fault::new(format!("render {} failed", n + 1)))
            } else {
                Ok(format!("lesson {}", self.id))
            }
        }
    }

    fn boundary() -> IsolationBoundary<String> {
        IsolationBoundary::new(BoundaryOptions::default().with_isolation_id("lesson-pane"))
    }

    #[test]
    fn test_healthy_render_passes_through() {
        let boundary = boundary();
        let rendered = boundary.render(&FlakyLesson::new("1", 0)).unwrap();
        assert_eq!(rendered.content().as_deref(), Some("lesson 1"));
        assert_eq!(boundary.state().status, BoundaryStatus::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_shows_default_fallback_then_auto_resets() {
        let boundary = boundary();
        let lesson = FlakyLesson::new("1", 1);

        match boundary.render(&lesson).unwrap() {
            Rendered::Default(fallback) => {
                assert_eq!(fallback.user_message, ErrorKind::Unknown.user_message());
                assert_eq!(fallback.isolation_id.as_deref(), Some("lesson-pane"));
                assert!(fallback.details.is_none());
            }
            other => panic!("expected default fallback, got {other:?}"),
        }

        let state = boundary.state();
        assert_eq!(state.status, BoundaryStatus::Faulted);
        assert_eq!(state.fault_count, 1);
        assert!(state.reset_scheduled);

        // Still faulted just before the delay
        tokio::time::sleep(Duration::from_millis(29_999)).await;
        assert!(!boundary.render(&lesson).unwrap().is_content());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(boundary.state().status, BoundaryStatus::Healthy);
        assert_eq!(
            boundary.render(&lesson).unwrap().content().as_deref(),
            Some("lesson 1")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_faults_suppress_auto_reset() {
        let boundary = boundary();
        let lesson = FlakyLesson::new("1", u32::MAX);

        for expected in 1..=3 {
            assert!(!boundary.render(&lesson).unwrap().is_content());
            let state = boundary.state();
            assert_eq!(state.fault_count, expected);
            assert!(state.reset_scheduled);
            tokio::time::sleep(Duration::from_secs(31)).await;
            assert_eq!(boundary.state().status, BoundaryStatus::Healthy);
        }

        assert!(!boundary.render(&lesson).unwrap().is_content());
        let state = boundary.state();
        assert_eq!(state.fault_count, 4);
        assert!(!state.reset_scheduled);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(boundary.state().status, BoundaryStatus::Faulted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_reset_cancels_timer_and_clears_count() {
        let boundary = boundary();
        let lesson = FlakyLesson::new("1", 1);

        let retry = match boundary.render(&lesson).unwrap() {
            Rendered::Default(fallback) => fallback.retry,
            other => panic!("expected default fallback, got {other:?}"),
        };
        assert!(boundary.state().reset_scheduled);

        retry.reset();
        let state = boundary.state();
        assert_eq!(state.status, BoundaryStatus::Healthy);
        assert_eq!(state.fault_count, 0);
        assert!(!state.reset_scheduled);
        assert!(boundary.render(&lesson).unwrap().is_content());
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_change_supersedes_fault() {
        let boundary = boundary();

        assert!(!boundary.render(&FlakyLesson::new("1", 1)).unwrap().is_content());
        assert_eq!(boundary.state().status, BoundaryStatus::Faulted);

        let next = FlakyLesson::new("2", 0);
        assert_eq!(
            boundary.render(&next).unwrap().content().as_deref(),
            Some("lesson 2")
        );
        let state = boundary.state();
        assert_eq!(state.fault_count, 0);
        assert!(!state.reset_scheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_change_after_auto_resets_clears_count() {
        let boundary = boundary();
        let first = FlakyLesson::new("lesson-1", u32::MAX);

        for _ in 0..3 {
            assert!(!boundary.render(&first).unwrap().is_content());
            tokio::time::sleep(Duration::from_secs(31)).await;
            assert_eq!(boundary.state().status, BoundaryStatus::Healthy);
        }
        assert_eq!(boundary.state().fault_count, 3);

        let second = FlakyLesson::new("lesson-2", 0);
        assert!(boundary.render(&second).unwrap().is_content());
        assert_eq!(boundary.state().fault_count, 0);

        let broken = FlakyLesson::new("lesson-2", 1);
        assert!(!boundary.render(&broken).unwrap().is_content());
        let state = boundary.state();
        assert_eq!(state.fault_count, 1);
        assert!(state.reset_scheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_in_subtree_is_contained() {
        let boundary = boundary();
        let subtree = RenderFn::new("quiz", || -> Result<String, Fault> {
            panic!("index out of bounds")
        });

        let rendered = boundary.render(&subtree).unwrap();
        assert!(matches!(rendered, Rendered::Default(_)));

        let fault = boundary.state().last_fault.unwrap();
        assert!(fault.message.contains("index out of bounds"));
        assert_eq!(fault.trace.as_deref(), Some("    in quiz"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_typed_fault_classification_in_fallback() {
        let boundary = IsolationBoundary::new(BoundaryOptions::default().with_details(true));
        let subtree = RenderFn::new("grades", || -> Result<String, Fault> {
            Err(Fault::from_error(AppError::http(401, "token expired"))
                .with_trace("    in GradeTable\n    in CoursePage"))
        });

        match boundary.render(&subtree).unwrap() {
            Rendered::Default(fallback) => {
                assert_eq!(fallback.user_message, ErrorKind::Auth.user_message());
                assert_eq!(fallback.suggested_action, ErrorKind::Auth.suggested_action());
                let details = fallback.details.unwrap();
                assert!(details.contains("HTTP 401"));
                assert!(details.contains("in GradeTable"));
            }
            other => panic!("expected default fallback, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_fallbacks() {
        let boundary = IsolationBoundary::new(
            BoundaryOptions::default().with_fallback(Fallback::Static("offline".to_string())),
        );
        let rendered = boundary.render(&FlakyLesson::new("1", 1)).unwrap();
        assert!(matches!(rendered, Rendered::Fallback(ref v) if v == "offline"));

        let boundary = IsolationBoundary::new(BoundaryOptions::default().with_fallback(
            Fallback::render(|info: &FaultInfo, reset: ResetHandle| {
                reset.reset();
                format!("{} (#{})", info.message, info.fault_count)
            }),
        ));
        let rendered = boundary.render(&FlakyLesson::new("1", 1)).unwrap();
        assert!(matches!(rendered, Rendered::Fallback(ref v) if v == "render 1 failed (#1)"));
        // The fallback used its reset capability
        assert_eq!(boundary.state().status, BoundaryStatus::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_fault_propagates() {
        let boundary: IsolationBoundary<String> = IsolationBoundary::new(
            BoundaryOptions::default().with_fallback(Fallback::render(|_, _| {
                panic!("fallback broke")
            })),
        );

        let result = boundary.render(&FlakyLesson::new("1", 1));
        let fault = result.unwrap_err();
        assert!(fault.message().contains("fallback broke"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_and_hooks() {
        let sink = Arc::new(MemorySink::default());
        let hook_calls = Arc::new(AtomicU32::new(0));
        let hook_clone = Arc::clone(&hook_calls);

        let boundary = IsolationBoundary::new(
            BoundaryOptions::default()
                .with_isolation_id("sidebar")
                .with_on_fault(move |info| {
                    assert_eq!(info.fault_count, 1);
                    hook_clone.fetch_add(1, Ordering::SeqCst);
                }),
        )
        .with_sink(sink.clone());

        boundary.render(&FlakyLesson::new("nav", 1)).unwrap();

        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);

        let breadcrumbs = sink.breadcrumbs();
        assert_eq!(breadcrumbs.len(), 1);
        assert_eq!(breadcrumbs[0].category, "error-boundary");
        assert_eq!(breadcrumbs[0].data["isolation_id"], "sidebar");

        let reports = sink.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].error, "render 1 failed");
        assert_eq!(reports[0].context.metadata["fault_count"], 1);
        assert_eq!(reports[0].context.metadata["trace"], "    in nav");
        assert_eq!(reports[0].breadcrumbs.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_window_restarts_count() {
        let boundary = IsolationBoundary::new(
            BoundaryOptions::default()
                .with_auto_reset(Duration::from_secs(1))
                .with_fault_window(Duration::from_secs(10)),
        );
        let lesson = FlakyLesson::new("1", u32::MAX);

        boundary.render(&lesson).unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        boundary.render(&lesson).unwrap();
        assert_eq!(boundary.state().fault_count, 2);

        tokio::time::sleep(Duration::from_secs(30)).await;
        boundary.render(&lesson).unwrap();
        assert_eq!(boundary.state().fault_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_sees_auto_reset() {
        let boundary = boundary();
        let mut status = boundary.subscribe();

        boundary.render(&FlakyLesson::new("1", 1)).unwrap();
        assert_eq!(*status.borrow_and_update(), BoundaryStatus::Faulted);

        status.changed().await.unwrap();
        assert_eq!(*status.borrow(), BoundaryStatus::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_releases_boundary() {
        let boundary = boundary();
        let status = boundary.subscribe();
        let retry = boundary.reset_handle();

        boundary.render(&FlakyLesson::new("1", 1)).unwrap();
        assert!(boundary.state().reset_scheduled);
        let core = Arc::downgrade(&boundary.core);
        drop(boundary);

        // Core is gone: the status channel closed and the handle is inert
        assert!(core.upgrade().is_none());
        assert!(status.has_changed().is_err());
        retry.reset();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_aborts_pending_auto_reset() {
        let boundary = boundary();
        let lesson = FlakyLesson::new("1", 1);
        boundary.render(&lesson).unwrap();

        // Keep the core alive past unmount to observe the timer
        let core = Arc::clone(&boundary.core);
        assert!(core.lock().pending_reset.is_some());
        drop(boundary);

        // An auto-reset firing here would clear the fault
        tokio::time::sleep(Duration::from_secs(60)).await;
        let core = core.lock();
        assert!(core.has_fault);
        assert!(core.pending_reset.is_none());
    }

    #[test]
    fn test_fault_without_runtime_stays_faulted() {
        let boundary = boundary();
        boundary.render(&FlakyLesson::new("1", 1)).unwrap();

        let state = boundary.state();
        assert_eq!(state.status, BoundaryStatus::Faulted);
        assert!(!state.reset_scheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nested_boundary_fault_reaches_parent() {
        let child: IsolationBoundary<String> = IsolationBoundary::new(
            BoundaryOptions::default().with_fallback(Fallback::render(|_, _| panic!("bad fallback"))),
        );
        let parent = boundary();

        let outer = RenderFn::new("course-page", || -> Result<String, Fault> {
            match child.render(&FlakyLesson::new("1", 1))? {
                Rendered::Content(view) | Rendered::Fallback(view) => Ok(view),
                Rendered::Default(d) => Ok(d.user_message),
            }
        });

        assert!(matches!(parent.render(&outer).unwrap(), Rendered::Default(_)));
        assert_eq!(parent.state().fault_count, 1);
    }
}
