use crate::cluster::{AgentCommands, ExecRetry, Scope, ServiceRef};
use crate::consistency::{BackendMatch, ConsistencyValidator};
use crate::poll::DEFAULT_POLL_INTERVAL;
use crate::preflight::{IntegrationMode, PreflightOptions, DEFAULT_LOG_REPEAT_THRESHOLD};
use ::config::{Config, Environment, File};
use humantime::parse_duration;
use serde::Deserialize;
use serde_yaml::Value as YamlValue;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(4 * 60);
const TOP_LEVEL_FIELDS: &str = "kubectl, poll, preflight, validation, agents, exec";

/// Raw configuration as written by the operator. Every field is optional; [`Self::resolve`]
/// fills defaults and validates.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FleetcheckConfig {
    #[serde(default)]
    pub kubectl: Option<String>,
    #[serde(default)]
    pub poll: PollSection,
    #[serde(default)]
    pub preflight: PreflightSection,
    #[serde(default)]
    pub validation: ValidationSection,
    #[serde(default)]
    pub agents: AgentsSection,
    #[serde(default)]
    pub exec: ExecSection,
    #[serde(default)]
    #[serde(flatten)]
    extra_fields: BTreeMap<String, YamlValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollSection {
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub wait_timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreflightSection {
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default)]
    pub log_repeat_threshold: Option<u32>,
    #[serde(default)]
    pub integration: Option<String>,
    #[serde(default)]
    pub well_known_service: Option<String>,
    #[serde(default)]
    pub dns_service: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ValidationSection {
    #[serde(default)]
    pub backend_match: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentsSection {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub selector: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecSection {
    #[serde(default)]
    pub retry_exit_code: Option<i32>,
    #[serde(default)]
    pub retry_attempts: Option<u32>,
    #[serde(default)]
    pub retry_pause: Option<String>,
    #[serde(default)]
    pub call_timeout: Option<String>,
}

/// Validated settings every check runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSettings {
    pub kubectl: String,
    pub poll_interval: Duration,
    pub wait_timeout: Duration,
    pub preflight_timeout: Duration,
    pub log_repeat_threshold: u32,
    pub integration: IntegrationMode,
    pub well_known_service: ServiceRef,
    pub dns_service: ServiceRef,
    pub backend_match: BackendMatch,
    pub agent_scope: Scope,
    pub exec_retry: ExecRetry,
    pub agent_commands: AgentCommands,
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self {
            kubectl: "kubectl".to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            preflight_timeout: DEFAULT_PREFLIGHT_TIMEOUT,
            log_repeat_threshold: DEFAULT_LOG_REPEAT_THRESHOLD,
            integration: IntegrationMode::Default,
            well_known_service: ServiceRef::new("default", "kubernetes"),
            dns_service: ServiceRef::new("kube-system", "kube-dns"),
            backend_match: BackendMatch::Contains,
            agent_scope: Scope::namespace("kube-system").with_selector("k8s-app=cilium"),
            exec_retry: ExecRetry::default(),
            agent_commands: AgentCommands::default(),
        }
    }
}

impl CheckSettings {
    pub fn preflight_options(&self) -> PreflightOptions {
        PreflightOptions {
            integration: self.integration,
            well_known: self.well_known_service.clone(),
            validator: self.validator(),
            interval: self.poll_interval,
            repeat_threshold: self.log_repeat_threshold,
        }
    }

    pub fn validator(&self) -> ConsistencyValidator {
        ConsistencyValidator::new(self.backend_match)
    }

    /// Namespace the agents live in, used for `kubectl exec`.
    pub fn agent_namespace(&self) -> &str {
        self.agent_scope.namespace.as_deref().unwrap_or("kube-system")
    }
}

impl FleetcheckConfig {
    /// Layers `config/local` (optional), the explicit `path` (required when given) and
    /// `FLEETCHECK__*` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder =
            Config::builder().add_source(File::with_name("config/local").required(false));
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }
        let config = builder
            .add_source(Environment::with_prefix("FLEETCHECK").separator("__"))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Applies defaults and validates every field, reporting all problems at once.
    pub fn resolve(&self) -> Result<CheckSettings, ConfigError> {
        let mut errors = Vec::new();
        let defaults = CheckSettings::default();

        for key in self.extra_fields.keys() {
            errors.push(format!(
                "unknown top-level key \"{key}\" (expected one of {TOP_LEVEL_FIELDS})"
            ));
        }

        let kubectl = match self.kubectl.as_deref().map(str::trim) {
            Some("") => {
                errors.push("kubectl must be a non-empty command".to_string());
                defaults.kubectl.clone()
            }
            Some(value) => value.to_string(),
            None => defaults.kubectl.clone(),
        };

        let poll_interval =
            parse_duration_value("poll.interval", self.poll.interval.as_deref(), &mut errors)
                .and_then(|value| ensure_positive_duration(value, "poll.interval", &mut errors))
                .unwrap_or(defaults.poll_interval);
        let wait_timeout =
            parse_duration_value("poll.wait_timeout", self.poll.wait_timeout.as_deref(), &mut errors)
                .and_then(|value| ensure_positive_duration(value, "poll.wait_timeout", &mut errors))
                .unwrap_or(defaults.wait_timeout);
        let preflight_timeout =
            parse_duration_value("preflight.timeout", self.preflight.timeout.as_deref(), &mut errors)
                .and_then(|value| ensure_positive_duration(value, "preflight.timeout", &mut errors))
                .unwrap_or(defaults.preflight_timeout);

        let log_repeat_threshold = match self.preflight.log_repeat_threshold {
            Some(0) => {
                errors.push("preflight.log_repeat_threshold must be greater than zero".to_string());
                defaults.log_repeat_threshold
            }
            Some(value) => value,
            None => defaults.log_repeat_threshold,
        };

        let integration = parse_with(
            "preflight.integration",
            self.preflight.integration.as_deref(),
            &mut errors,
        )
        .unwrap_or(defaults.integration);
        let well_known_service = parse_with(
            "preflight.well_known_service",
            self.preflight.well_known_service.as_deref(),
            &mut errors,
        )
        .unwrap_or(defaults.well_known_service.clone());
        let dns_service = parse_with(
            "preflight.dns_service",
            self.preflight.dns_service.as_deref(),
            &mut errors,
        )
        .unwrap_or(defaults.dns_service.clone());
        let backend_match = parse_with(
            "validation.backend_match",
            self.validation.backend_match.as_deref(),
            &mut errors,
        )
        .unwrap_or(defaults.backend_match);

        let agent_scope = resolve_agent_scope(&self.agents, &defaults.agent_scope, &mut errors);

        let retry_pause =
            parse_duration_value("exec.retry_pause", self.exec.retry_pause.as_deref(), &mut errors)
                .unwrap_or(defaults.exec_retry.pause);
        let call_timeout =
            parse_duration_value("exec.call_timeout", self.exec.call_timeout.as_deref(), &mut errors)
                .and_then(|value| ensure_positive_duration(value, "exec.call_timeout", &mut errors))
                .unwrap_or(defaults.exec_retry.call_timeout);
        let retry_attempts = match self.exec.retry_attempts {
            Some(0) => {
                errors.push("exec.retry_attempts must be at least 1".to_string());
                defaults.exec_retry.attempts
            }
            Some(value) => value,
            None => defaults.exec_retry.attempts,
        };
        let exec_retry = ExecRetry {
            exit_code: self.exec.retry_exit_code.unwrap_or(defaults.exec_retry.exit_code),
            attempts: retry_attempts,
            pause: retry_pause,
            call_timeout,
        };

        if !errors.is_empty() {
            return Err(ConfigError::Invalid(ConfigValidationError::new(errors)));
        }

        Ok(CheckSettings {
            kubectl,
            poll_interval,
            wait_timeout,
            preflight_timeout,
            log_repeat_threshold,
            integration,
            well_known_service,
            dns_service,
            backend_match,
            agent_scope,
            exec_retry,
            agent_commands: defaults.agent_commands,
        })
    }
}

fn resolve_agent_scope(section: &AgentsSection, default: &Scope, errors: &mut Vec<String>) -> Scope {
    let namespace = match section.namespace.as_deref().map(str::trim) {
        Some("") => {
            errors.push("agents.namespace must be a non-empty string".to_string());
            default.namespace.clone()
        }
        Some(value) => Some(value.to_string()),
        None => default.namespace.clone(),
    };
    let selector = match section.selector.as_deref().map(str::trim) {
        Some("") => None,
        Some(value) => Some(value.to_string()),
        None => default.selector.clone(),
    };
    Scope {
        namespace,
        selector,
    }
}

fn parse_with<T>(field_label: &str, raw: Option<&str>, errors: &mut Vec<String>) -> Option<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw = raw?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(reason) => {
            errors.push(format!("{field_label}: {reason}"));
            None
        }
    }
}

fn parse_duration_value(
    field_label: &str,
    raw: Option<&str>,
    errors: &mut Vec<String>,
) -> Option<Duration> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        errors.push(format!("{field_label} must be a non-empty duration string"));
        return None;
    }
    match parse_duration(trimmed) {
        Ok(duration) => Some(duration),
        Err(_) => {
            errors.push(format!(
                "{field_label} must be a valid duration (got `{trimmed}`)"
            ));
            None
        }
    }
}

fn ensure_positive_duration(
    duration: Duration,
    label: &str,
    errors: &mut Vec<String>,
) -> Option<Duration> {
    if duration.is_zero() {
        errors.push(format!("{label} must be greater than zero"));
        None
    } else {
        Some(duration)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error(transparent)]
    Invalid(ConfigValidationError),
}

#[derive(Debug, Error)]
#[error("configuration validation failed:\n{rendered}")]
pub struct ConfigValidationError {
    messages: Vec<String>,
    rendered: String,
}

impl ConfigValidationError {
    pub fn new(messages: Vec<String>) -> Self {
        let rendered = messages
            .iter()
            .map(|msg| format!("- {msg}"))
            .collect::<Vec<_>>()
            .join("\n");
        Self { messages, rendered }
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}
