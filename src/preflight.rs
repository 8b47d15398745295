//! Composite gate run before relying on the cluster.
//!
//! Each tick discovers the agents and walks the stages in order. The first failing
//! stage ends the tick and the next tick starts again from the first stage.

use crate::cluster::{discover_agents, AgentApi, AgentHandle, ClusterLister, Scope, ServiceRef};
use crate::consistency::ConsistencyValidator;
use crate::error::{Error, Result};
use crate::metrics::metrics;
use crate::poll::{self, PollConfig};
use crate::snapshot::{ConsistencySnapshot, SnapshotBuilder};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

pub const DEFAULT_LOG_REPEAT_THRESHOLD: u32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreflightStage {
    AgentStatus,
    Controllers,
    Health,
    Snapshot,
    Services,
    WellKnownService,
}

impl PreflightStage {
    pub fn as_str(self) -> &'static str {
        match self {
            PreflightStage::AgentStatus => "agent_status",
            PreflightStage::Controllers => "controllers",
            PreflightStage::Health => "health",
            PreflightStage::Snapshot => "snapshot",
            PreflightStage::Services => "services",
            PreflightStage::WellKnownService => "well_known_service",
        }
    }

    fn failure(self) -> &'static str {
        match self {
            PreflightStage::AgentStatus => "agent status is unhealthy",
            PreflightStage::Controllers => "agent controllers are failing",
            PreflightStage::Health => "connectivity health is failing",
            PreflightStage::Snapshot => "unable to capture service state",
            PreflightStage::Services => "agent services are not set up correctly",
            PreflightStage::WellKnownService => "well-known service is not ready",
        }
    }
}

impl fmt::Display for PreflightStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Networking integration the agents run under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum IntegrationMode {
    #[default]
    Default,
    /// Chained behind flannel; agent-to-agent health probing is not meaningful.
    Flannel,
}

impl IntegrationMode {
    pub fn skips_health(self) -> bool {
        matches!(self, IntegrationMode::Flannel)
    }
}

impl FromStr for IntegrationMode {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "default" => Ok(IntegrationMode::Default),
            "flannel" => Ok(IntegrationMode::Flannel),
            other => Err(format!("unknown integration mode `{other}`")),
        }
    }
}

/// Suppresses identical consecutive failure messages. A repeat is let through once it
/// has been seen `threshold` times in a row, after which the count starts over.
#[derive(Debug, Clone)]
pub struct FailureLogDeduper {
    threshold: u32,
    last: Option<String>,
    repeats: u32,
}

impl FailureLogDeduper {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            last: None,
            repeats: 0,
        }
    }

    /// Returns `true` when `message` should be logged.
    pub fn observe(&mut self, message: &str) -> bool {
        if self.last.as_deref() != Some(message) {
            self.last = Some(message.to_string());
            self.repeats = 0;
            return true;
        }
        self.repeats += 1;
        if self.repeats >= self.threshold {
            self.repeats = 0;
            true
        } else {
            false
        }
    }

    pub fn last(&self) -> Option<&str> {
        self.last.as_deref()
    }
}

#[derive(Clone, Debug)]
pub struct PreflightOptions {
    pub integration: IntegrationMode,
    pub well_known: ServiceRef,
    pub validator: ConsistencyValidator,
    pub interval: Duration,
    pub repeat_threshold: u32,
}

impl Default for PreflightOptions {
    fn default() -> Self {
        Self {
            integration: IntegrationMode::Default,
            well_known: ServiceRef::new("default", "kubernetes"),
            validator: ConsistencyValidator::default(),
            interval: poll::DEFAULT_POLL_INTERVAL,
            repeat_threshold: DEFAULT_LOG_REPEAT_THRESHOLD,
        }
    }
}

pub struct PreflightGate<'a> {
    lister: &'a dyn ClusterLister,
    api: &'a AgentApi,
    agent_scope: &'a Scope,
    options: PreflightOptions,
}

impl<'a> PreflightGate<'a> {
    pub fn new(
        lister: &'a dyn ClusterLister,
        api: &'a AgentApi,
        agent_scope: &'a Scope,
        options: PreflightOptions,
    ) -> Self {
        Self {
            lister,
            api,
            agent_scope,
            options,
        }
    }

    /// Polls [`Self::tick`] until it passes or `timeout` elapses.
    pub async fn run(&self, timeout: Duration) -> Result<()> {
        let deduper = Mutex::new(FailureLogDeduper::new(self.options.repeat_threshold));
        let config = PollConfig::new(timeout).with_interval(self.options.interval);
        let gate = self;
        let deduper_ref = &deduper;
        let counters = metrics();

        let outcome = poll::execute("preflight check", config, move || async move {
            match gate.tick().await {
                Ok(()) => {
                    counters.record_preflight_tick(false);
                    true
                }
                Err(err) => {
                    counters.record_preflight_tick(true);
                    let message = err.to_string();
                    let emit = deduper_ref
                        .lock()
                        .expect("preflight deduper lock poisoned")
                        .observe(&message);
                    if emit {
                        tracing::warn!(event = "preflight_failed", error = %message, "preflight tick failed");
                    } else {
                        counters.record_suppressed_failure_log();
                    }
                    false
                }
            }
        })
        .await;

        outcome.map_err(|err| {
            let deduper = deduper
                .into_inner()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            err.with_last_diagnostic(deduper.last().map(str::to_string))
        })
    }

    /// One pass over every stage.
    pub async fn tick(&self) -> Result<()> {
        let agents = self.agents().await?;

        self.stage(PreflightStage::AgentStatus, self.check_status(&agents).await)?;
        self.stage(PreflightStage::Controllers, self.check_controllers(&agents).await)?;
        if self.options.integration.skips_health() {
            tracing::debug!(stage = PreflightStage::Health.as_str(), "stage skipped");
        } else {
            self.stage(PreflightStage::Health, self.check_health(&agents).await)?;
        }
        let snapshot = self.stage(PreflightStage::Snapshot, self.snapshot(&agents).await)?;
        self.stage(
            PreflightStage::Services,
            self.options.validator.validate(&snapshot).map_err(Error::from),
        )?;
        let well_known = &self.options.well_known;
        self.options
            .validator
            .validate_service(&snapshot, &well_known.namespace, &well_known.name)
            .map_err(|err| {
                Error::with_context(format!("{well_known} service is not ready"), err.into())
            })?;
        tracing::debug!(
            stage = PreflightStage::WellKnownService.as_str(),
            service = %well_known,
            "preflight stage passed"
        );
        Ok(())
    }

    /// Fresh snapshot plus the single-service check for `service`.
    pub async fn service_check(&self, service: &ServiceRef) -> Result<()> {
        let agents = self.agents().await?;
        let snapshot = self.stage(PreflightStage::Snapshot, self.snapshot(&agents).await)?;
        self.options
            .validator
            .validate_service(&snapshot, &service.namespace, &service.name)
            .map_err(|err| Error::with_context(format!("{service} service is not ready"), err.into()))
    }

    /// An empty fleet fails the gate rather than passing every stage vacuously.
    async fn agents(&self) -> Result<Vec<AgentHandle>> {
        let agents = discover_agents(self.lister, self.agent_scope).await?;
        if agents.is_empty() {
            return Err(Error::unavailable(format!(
                "no agents discovered in {}",
                self.agent_scope
            )));
        }
        Ok(agents)
    }

    fn stage<T>(&self, stage: PreflightStage, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                tracing::debug!(stage = stage.as_str(), "preflight stage passed");
                Ok(value)
            }
            Err(err) => Err(Error::with_context(stage.failure(), err)),
        }
    }

    async fn snapshot(&self, agents: &[AgentHandle]) -> Result<ConsistencySnapshot> {
        SnapshotBuilder::new(self.lister, self.api, agents).build().await
    }

    async fn check_status(&self, agents: &[AgentHandle]) -> Result<()> {
        for agent in agents {
            let status = self.api.status(agent).await?;
            if !status.healthy() {
                crate::bail_err!(
                    "agent `{}` is unhealthy: {}",
                    agent,
                    status.output.pretty()
                );
            }
            if status.quorum_lost() {
                crate::bail_err!(
                    "agent `{}`: key-value store has no quorum: {}",
                    agent,
                    status.output.pretty()
                );
            }
        }
        Ok(())
    }

    async fn check_controllers(&self, agents: &[AgentHandle]) -> Result<()> {
        for agent in agents {
            let controllers = self.api.controllers(agent).await?;
            if let Some(failing) = controllers
                .iter()
                .find(|controller| controller.consecutive_failures != 0)
            {
                let detail = match self.api.controllers_detail(agent).await {
                    Ok(detail) => detail,
                    Err(err) => err.to_string(),
                };
                crate::agent_event!(
                    debug,
                    "controller_failing",
                    agent = agent,
                    stage = PreflightStage::Controllers.as_str(),
                    controller = failing.name,
                    failures = failing.consecutive_failures
                );
                crate::bail_err!(
                    "agent `{}`: controller {} is failing: {}",
                    agent,
                    failing.name,
                    detail
                );
            }
        }
        Ok(())
    }

    async fn check_health(&self, agents: &[AgentHandle]) -> Result<()> {
        for agent in agents {
            let nodes = self.api.health(agent).await?;
            if nodes.len() != agents.len() {
                let names: Vec<&str> = nodes.iter().map(|node| node.name.as_str()).collect();
                crate::bail_err!(
                    "agent `{}`: only {}/{} nodes appeared in health status ({})",
                    agent,
                    nodes.len(),
                    agents.len(),
                    names.join(", ")
                );
            }
            if let Some(node) = nodes.iter().find(|node| !node.healthy()) {
                crate::bail_err!(
                    "agent `{}`: connectivity to node `{}` is unhealthy: {}",
                    agent,
                    node.name,
                    node.http_status
                );
            }
        }
        Ok(())
    }
}
