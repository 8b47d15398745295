//! Helper macros enforcing consistent fleetcheck log fields.
//!
//! These macros keep the `agent` field (and optionally `stage`) present on every log
//! emitted while checking a single agent so downstream parsing can rely on them.

/// Log an event for an agent (and optional preflight stage) plus any extra fields.
#[macro_export]
macro_rules! agent_event {
    ($level:ident, $event:expr, agent = $agent:expr, stage = $stage:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            event = $event,
            agent = %$agent,
            stage = $stage,
            $($field = %$value,)*
        )
    };
    ($level:ident, $event:expr, agent = $agent:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            event = $event,
            agent = %$agent,
            $($field = %$value,)*
        )
    };
}
