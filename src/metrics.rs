use crate::telemetry::{runtime_counters, RuntimeCounters};
use std::sync::OnceLock;

pub use crate::telemetry::{AgentVerdictSnapshot, RuntimeCountersSnapshot};

/// Collector that wraps the runtime counter APIs with a single entrypoint.
pub struct MetricsCollector {
    counters: &'static RuntimeCounters,
}

impl MetricsCollector {
    fn new() -> Self {
        Self {
            counters: runtime_counters(),
        }
    }

    pub fn global() -> &'static Self {
        static INSTANCE: OnceLock<MetricsCollector> = OnceLock::new();
        INSTANCE.get_or_init(Self::new)
    }

    pub fn snapshot(&self) -> RuntimeCountersSnapshot {
        self.counters.snapshot()
    }

    pub fn record_poll_attempt(&self) {
        self.counters.inc_poll_attempts();
    }

    pub fn record_poll_timeout(&self) {
        self.counters.inc_poll_timeouts();
    }

    pub fn record_fanout_round(&self) {
        self.counters.inc_fanout_rounds();
    }

    pub fn record_agent_verdict(&self, agent: &str, ready: bool) {
        self.counters.record_verdict(agent, ready);
    }

    pub fn record_preflight_tick(&self, failed: bool) {
        self.counters.inc_preflight_ticks();
        if failed {
            self.counters.inc_preflight_failures();
        }
    }

    pub fn record_suppressed_failure_log(&self) {
        self.counters.inc_suppressed_failure_logs();
    }
}

/// Returns the shared `MetricsCollector` instance.
pub fn metrics() -> &'static MetricsCollector {
    MetricsCollector::global()
}
