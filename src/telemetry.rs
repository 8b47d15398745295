use crate::error::Result;
use chrono::{SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::fmt::{self as stdfmt, Write as _};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::sync::OnceLock;
use tracing::field::{Field, Visit};
use tracing::Event;
use tracing::Subscriber;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::{
    self as fmt_subscriber, format::Writer, FmtContext, FormatEvent, FormatFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("fleetcheck=info,info"));

    let stdout = std::io::stdout;
    let stderr = std::io::stderr;

    let writer = stdout
        .with_max_level(tracing::Level::INFO)
        .or_else(stderr.with_min_level(tracing::Level::WARN));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(false)
        .with_ansi(false)
        .event_format(KeyValueFormatter)
        .fmt_fields(fmt_subscriber::format::DefaultFields::new())
        .with_writer(writer)
        .try_init()
        .map_err(|err| crate::err!("failed to initialise tracing subscriber: {err}"))
}

/// One `key=value` line per event: timestamp, level and target first, then the agent
/// fields, then the message and the remaining fields in name order.
struct KeyValueFormatter;

const LEADING_FIELDS: [&str; 3] = ["event", "agent", "stage"];

impl<S, N> FormatEvent<S, N> for KeyValueFormatter
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        let mut fields = FieldVisitor::default();
        event.record(&mut fields);
        let metadata = event.metadata();
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let line = render_line(
            &timestamp,
            metadata.level().as_str(),
            metadata.target(),
            fields.0,
        );
        writeln!(writer, "{line}")
    }
}

#[derive(Default)]
struct FieldVisitor(BTreeMap<&'static str, String>);

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn stdfmt::Debug) {
        self.0.insert(field.name(), format!("{value:?}"));
    }
}

fn render_line(
    timestamp: &str,
    level: &str,
    target: &str,
    mut fields: BTreeMap<&'static str, String>,
) -> String {
    let mut line = format!("ts={timestamp} level={level} target={target}");
    for key in LEADING_FIELDS {
        if let Some(value) = fields.remove(key) {
            push_field(&mut line, key, &value);
        }
    }
    if let Some(message) = fields.remove("message") {
        push_field(&mut line, "msg", &message);
    }
    for (key, value) in fields {
        push_field(&mut line, key, &value);
    }
    line
}

fn push_field(line: &mut String, key: &str, value: &str) {
    let plain = !value.is_empty()
        && !value
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '=' || c == '\\');
    if plain {
        let _ = write!(line, " {key}={value}");
    } else {
        let _ = write!(line, " {key}={value:?}");
    }
}

#[derive(Default)]
pub struct RuntimeCounters {
    poll_attempts: AtomicU64,
    poll_timeouts: AtomicU64,
    fanout_rounds: AtomicU64,
    preflight_ticks: AtomicU64,
    preflight_failures: AtomicU64,
    suppressed_failure_logs: AtomicU64,
    verdicts: AgentVerdictRegistry,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeCountersSnapshot {
    pub poll_attempts: u64,
    pub poll_timeouts: u64,
    pub fanout_rounds: u64,
    pub preflight_ticks: u64,
    pub preflight_failures: u64,
    pub suppressed_failure_logs: u64,
    pub verdicts: Vec<AgentVerdictSnapshot>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentVerdictSnapshot {
    pub agent: String,
    pub ready: u64,
    pub not_ready: u64,
    pub last_ready: bool,
}

pub fn runtime_counters() -> &'static RuntimeCounters {
    static COUNTERS: OnceLock<RuntimeCounters> = OnceLock::new();
    COUNTERS.get_or_init(RuntimeCounters::default)
}

impl RuntimeCounters {
    pub fn inc_poll_attempts(&self) {
        self.poll_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_poll_timeouts(&self) {
        self.poll_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fanout_rounds(&self) {
        self.fanout_rounds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_preflight_ticks(&self) {
        self.preflight_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_preflight_failures(&self) {
        self.preflight_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_suppressed_failure_logs(&self) {
        self.suppressed_failure_logs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_verdict(&self, agent: &str, ready: bool) {
        self.verdicts.record(agent, ready);
    }

    pub fn snapshot(&self) -> RuntimeCountersSnapshot {
        RuntimeCountersSnapshot {
            poll_attempts: self.poll_attempts.load(Ordering::Relaxed),
            poll_timeouts: self.poll_timeouts.load(Ordering::Relaxed),
            fanout_rounds: self.fanout_rounds.load(Ordering::Relaxed),
            preflight_ticks: self.preflight_ticks.load(Ordering::Relaxed),
            preflight_failures: self.preflight_failures.load(Ordering::Relaxed),
            suppressed_failure_logs: self.suppressed_failure_logs.load(Ordering::Relaxed),
            verdicts: self.verdicts.snapshot(),
        }
    }
}

#[derive(Clone, Debug, Default)]
struct AgentVerdictEntry {
    ready: u64,
    not_ready: u64,
    last_ready: bool,
}

#[derive(Default)]
struct AgentVerdictRegistry {
    inner: Mutex<BTreeMap<String, AgentVerdictEntry>>,
}

impl AgentVerdictRegistry {
    fn record(&self, agent: &str, ready: bool) {
        let mut guard = self.inner.lock().expect("verdict registry poisoned");
        let entry = guard.entry(agent.to_string()).or_default();
        if ready {
            entry.ready = entry.ready.saturating_add(1);
        } else {
            entry.not_ready = entry.not_ready.saturating_add(1);
        }
        entry.last_ready = ready;
    }

    fn snapshot(&self) -> Vec<AgentVerdictSnapshot> {
        let guard = self.inner.lock().expect("verdict registry poisoned");
        guard
            .iter()
            .map(|(agent, entry)| AgentVerdictSnapshot {
                agent: agent.clone(),
                ready: entry.ready,
                not_ready: entry.not_ready,
                last_ready: entry.last_ready,
            })
            .collect()
    }
}
