use course_resilience::{ErrorReport, ReportingSink};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Sink whose transmissions always fail after recording the attempt
#[derive(Default)]
pub struct OfflineSink {
    attempted: Mutex<Vec<ErrorReport>>,
}

impl OfflineSink {
    pub fn attempted(&self) -> usize {
        self.attempted.lock().len()
    }
}

impl ReportingSink for OfflineSink {
    fn add_breadcrumb(&self, _category: &str, _data: HashMap<String, serde_json::Value>) {}

    fn report_error(&self, report: ErrorReport) -> BoxFuture<'static, anyhow::Result<()>> {
        self.attempted.lock().push(report);
        async { Err::<(), _>(anyhow::anyhow!("reporting endpoint unreachable")) }.boxed()
    }
}
