#![forbid(unsafe_code)]

use crate::cluster::AgentHandle;
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Message(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("{operation}: timed out after {}{}", render_waited(.waited), render_last(.last))]
    Timeout {
        operation: String,
        waited: Duration,
        last: Option<String>,
    },
    #[error(transparent)]
    Inconsistent(#[from] ConsistencyError),
    #[error("malformed {what}: {reason}")]
    Malformed { what: String, reason: String },
    #[error("operation cancelled")]
    Cancelled,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

fn render_waited(waited: &Duration) -> String {
    humantime::format_duration(*waited).to_string()
}

fn render_last(last: &Option<String>) -> String {
    match last {
        Some(last) => format!(": last polled error: {last}"),
        None => String::new(),
    }
}

/// Structural mismatch between desired, realized and programmed state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsistencyError {
    #[error("agent `{agent}`: realized service {frontend} has no desired service with that cluster IP")]
    UnknownFrontendIp { agent: AgentHandle, frontend: String },
    #[error("agent `{agent}`: realized service {frontend} matches service {service} by IP but not by port")]
    UnknownFrontendPort {
        agent: AgentHandle,
        frontend: String,
        service: String,
    },
    #[error("agent `{agent}`: realized backend {backend} of {frontend} is not an endpoint of {service}")]
    UnknownBackend {
        agent: AgentHandle,
        service: String,
        frontend: String,
        backend: String,
    },
    #[error("agent `{agent}`: no realized service for desired services {}", .services.join(", "))]
    UnrealizedServices {
        agent: AgentHandle,
        services: Vec<String>,
    },
    #[error("agent `{agent}`: no dataplane entry for {frontend} (missing {})", render_pairs(.frontend, .backends))]
    MissingDataplaneEntry {
        agent: AgentHandle,
        frontend: String,
        backends: Vec<String>,
    },
    #[error("agent `{agent}`: {frontend} -> {backend} not found in dataplane table")]
    MissingDataplaneBackend {
        agent: AgentHandle,
        frontend: String,
        backend: String,
    },
    #[error("agent `{agent}`: {realized} realized services but {programmed} dataplane entries")]
    CountMismatch {
        agent: AgentHandle,
        realized: usize,
        programmed: usize,
    },
    #[error("service {service} not found in desired state")]
    ServiceNotFound { service: String },
    #[error("agent `{agent}`: no realized service corresponds to {service}")]
    ServiceNotRealized { agent: AgentHandle, service: String },
}

fn render_pairs(frontend: &str, backends: &[String]) -> String {
    if backends.is_empty() {
        return frontend.to_string();
    }
    backends
        .iter()
        .map(|backend| format!("{frontend} -> {backend}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl ConsistencyError {
    pub fn agent(&self) -> Option<&AgentHandle> {
        match self {
            ConsistencyError::UnknownFrontendIp { agent, .. }
            | ConsistencyError::UnknownFrontendPort { agent, .. }
            | ConsistencyError::UnknownBackend { agent, .. }
            | ConsistencyError::UnrealizedServices { agent, .. }
            | ConsistencyError::MissingDataplaneEntry { agent, .. }
            | ConsistencyError::MissingDataplaneBackend { agent, .. }
            | ConsistencyError::CountMismatch { agent, .. }
            | ConsistencyError::ServiceNotRealized { agent, .. } => Some(agent),
            ConsistencyError::ServiceNotFound { .. } => None,
        }
    }
}

impl Error {
    pub fn new<E>(error: E) -> Self
    where
        Error: From<E>,
    {
        error.into()
    }

    pub fn msg<M>(message: M) -> Self
    where
        M: Into<String>,
    {
        Self::Message(message.into())
    }

    pub fn unavailable<M>(message: M) -> Self
    where
        M: Into<String>,
    {
        Self::Unavailable(message.into())
    }

    pub fn malformed<W, R>(what: W, reason: R) -> Self
    where
        W: Into<String>,
        R: ToString,
    {
        Self::Malformed {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    pub fn with_context<M>(context: M, source: Error) -> Self
    where
        M: Into<String>,
    {
        Self::Context {
            context: context.into(),
            source: Box::new(source),
        }
    }

    pub fn timeout<O>(operation: O, waited: Duration) -> Self
    where
        O: Into<String>,
    {
        Self::Timeout {
            operation: operation.into(),
            waited,
            last: None,
        }
    }

    /// Attaches the last polled diagnostic to a timeout, looking through `Context`.
    pub fn with_last_diagnostic(self, diagnostic: Option<String>) -> Self {
        match self {
            Error::Timeout {
                operation, waited, ..
            } => Error::Timeout {
                operation,
                waited,
                last: diagnostic,
            },
            Error::Context { context, source } => Error::Context {
                context,
                source: Box::new(source.with_last_diagnostic(diagnostic)),
            },
            other => other,
        }
    }

    /// Walks through `Context` wrappers to the underlying error.
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Error::Timeout { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.root(), Error::Unavailable(_))
    }
}

pub trait Context<T> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>;

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E> Context<T> for std::result::Result<T, E>
where
    Error: From<E>,
{
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>,
    {
        self.map_err(|err| Error::with_context(context.into(), err.into()))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|err| Error::with_context(f().into(), err.into()))
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::Message(value)
    }
}

impl From<&str> for Error {
    fn from(value: &str) -> Self {
        Error::Message(value.to_string())
    }
}

#[macro_export]
macro_rules! err {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{
        $crate::error::Error::msg(format!($fmt $(, $arg)*))
    }};
    ($err:expr) => {{
        $crate::error::Error::new($err)
    }};
}

#[macro_export]
macro_rules! bail_err {
    ($($arg:tt)*) => {{
        return Err($crate::err!($($arg)*));
    }};
}

#[macro_export]
macro_rules! ensure_err {
    ($cond:expr $(,)?) => {
        if !$cond {
            return Err($crate::err!(concat!("condition failed: ", stringify!($cond))));
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::bail_err!($($arg)+);
        }
    };
}
