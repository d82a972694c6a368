/// Reporting sink seam: breadcrumbs and error reports
///
/// The sink that ships reports off-device lives outside this crate. The
/// resilience layer only builds well-formed reports and hands them over
/// through [`ReportingSink`]. Delivery is best effort: a failing sink is
/// logged locally and never surfaces to the caller.
use super::classification::{classify, ErrorClassification, ReportContext};
use crate::AppError;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// Default number of breadcrumbs kept before the oldest are evicted
pub const DEFAULT_BREADCRUMB_CAPACITY: usize = 100;

/// Timestamped diagnostic event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub category: String,
    pub data: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl Breadcrumb {
    pub fn new(category: impl Into<String>, data: HashMap<String, serde_json::Value>) -> Self {
        Self {
            category: category.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Append-only, ordered, capped breadcrumb log
#[derive(Debug, Clone)]
pub struct BreadcrumbTrail {
    capacity: usize,
    entries: VecDeque<Breadcrumb>,
}

impl BreadcrumbTrail {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a breadcrumb, evicting the oldest past capacity
    pub fn push(&mut self, breadcrumb: Breadcrumb) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(breadcrumb);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first
    pub fn snapshot(&self) -> Vec<Breadcrumb> {
        self.entries.iter().cloned().collect()
    }
}

impl Default for BreadcrumbTrail {
    fn default() -> Self {
        Self::new(DEFAULT_BREADCRUMB_CAPACITY)
    }
}

/// Write-once report for a terminal failure or a caught fault
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub id: Uuid,

    /// Error summary (display form of the failure)
    pub error: String,

    pub classification: Option<ErrorClassification>,

    pub context: ReportContext,

    /// Trail at the time the sink accepted the report
    pub breadcrumbs: Vec<Breadcrumb>,

    pub timestamp: DateTime<Utc>,
}

impl ErrorReport {
    /// Build a report for a typed failure
    pub fn new(error: &AppError, context: ReportContext) -> Self {
        Self::from_summary(error.to_string(), Some(classify(error)), context)
    }

    pub fn from_summary(
        error: impl Into<String>,
        classification: Option<ErrorClassification>,
        context: ReportContext,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            error: error.into(),
            classification,
            context,
            breadcrumbs: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Destination for breadcrumbs and error reports
///
/// Implementations must not panic; transmission failures are reported
/// through the returned future and are swallowed by [`dispatch_report`].
#[cfg_attr(test, mockall::automock)]
pub trait ReportingSink: Send + Sync {
    /// Append a breadcrumb to the trail
    fn add_breadcrumb(&self, category: &str, data: HashMap<String, serde_json::Value>);

    /// Accept a report for transmission
    fn report_error(&self, report: ErrorReport) -> BoxFuture<'static, anyhow::Result<()>>;
}

/// Hand `report` to `sink` without ever failing the caller
///
/// A transmission that completes immediately is checked inline. Anything
/// still pending is driven on the current tokio runtime, or dropped with a
/// warning when there is none.
pub fn dispatch_report(sink: &dyn ReportingSink, report: ErrorReport) {
    let report_id = report.id;
    let mut transmission = sink.report_error(report);

    match (&mut transmission).now_or_never() {
        Some(Ok(())) => {}
        Some(Err(e)) => {
            tracing::warn!(report_id = %report_id, error = %e, "Failed to send error report");
        }
        None => match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = transmission.await {
                        tracing::warn!(
                            report_id = %report_id,
                            error = %e,
                            "Failed to send error report"
                        );
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    report_id = %report_id,
                    "No async runtime available, error report dropped"
                );
            }
        },
    }
}

/// In-process sink keeping a capped trail and every accepted report
pub struct MemorySink {
    trail: Mutex<BreadcrumbTrail>,
    reports: Mutex<Vec<ErrorReport>>,
}

impl MemorySink {
    pub fn new(breadcrumb_capacity: usize) -> Self {
        Self {
            trail: Mutex::new(BreadcrumbTrail::new(breadcrumb_capacity)),
            reports: Mutex::new(Vec::new()),
        }
    }

    pub fn reports(&self) -> Vec<ErrorReport> {
        self.reports.lock().clone()
    }

    pub fn breadcrumbs(&self) -> Vec<Breadcrumb> {
        self.trail.lock().snapshot()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(DEFAULT_BREADCRUMB_CAPACITY)
    }
}

impl ReportingSink for MemorySink {
    fn add_breadcrumb(&self, category: &str, data: HashMap<String, serde_json::Value>) {
        self.trail.lock().push(Breadcrumb::new(category, data));
    }

    fn report_error(&self, mut report: ErrorReport) -> BoxFuture<'static, anyhow::Result<()>> {
        if report.breadcrumbs.is_empty() {
            report.breadcrumbs = self.trail.lock().snapshot();
        }
        self.reports.lock().push(report);
        futures::future::ready(Ok(())).boxed()
    }
}

/// Sink that writes everything to the local log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ReportingSink for TracingSink {
    fn add_breadcrumb(&self, category: &str, data: HashMap<String, serde_json::Value>) {
        tracing::debug!(
            category,
            data = %serde_json::Value::Object(data.into_iter().collect()),
            "Breadcrumb"
        );
    }

    fn report_error(&self, report: ErrorReport) -> BoxFuture<'static, anyhow::Result<()>> {
        let result = serde_json::to_string(&report)
            .map(|json| {
                tracing::error!(
                    report_id = %report.id,
                    error = %report.error,
                    report = %json,
                    "Error report"
                );
            })
            .map_err(anyhow::Error::from);
        futures::future::ready(result).boxed()
    }
}
