/// Destination for diagnostic reports produced after a wait gives up.
///
/// Reports never influence a verdict; they exist so an operator can see why.
pub trait ReportSink: Send + Sync {
    fn report(&self, label: &str, text: &str);
}

/// Writes reports to the `tracing` pipeline at WARN.
#[derive(Clone, Debug, Default)]
pub struct TracingReportSink;

impl ReportSink for TracingReportSink {
    fn report(&self, label: &str, text: &str) {
        tracing::warn!(event = "diagnostic_report", label, "{text}");
    }
}
