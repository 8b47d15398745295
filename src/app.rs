use crate::cluster::{
    discover_agents, AgentApi, AgentExec, AgentHandle, ClusterLister, CommandRunner,
    KubectlLister, ReportSink, Scope, ShellRunner, TracingReportSink,
};
use crate::config::CheckSettings;
use crate::error::{Context, Result};
use crate::fanout::{self, AgentCheck, EndpointsReadyCheck};
use crate::poll::PollConfig;
use crate::preflight::PreflightGate;
use crate::readiness::CollectionWaiter;
use crate::snapshot::SnapshotBuilder;
use std::sync::Arc;
use std::time::Duration;

/// Entry point tying the collaborators to the checks.
pub struct FleetcheckApp {
    lister: Arc<dyn ClusterLister>,
    api: AgentApi,
    settings: CheckSettings,
    sink: Arc<dyn ReportSink>,
}

impl FleetcheckApp {
    pub fn new(
        lister: Arc<dyn ClusterLister>,
        api: AgentApi,
        settings: CheckSettings,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        Self {
            lister,
            api,
            settings,
            sink,
        }
    }

    /// Wires the local shell, `kubectl` and the tracing report sink.
    pub fn from_settings(settings: CheckSettings) -> Self {
        let runner: Arc<dyn CommandRunner> =
            Arc::new(ShellRunner::new(settings.exec_retry.call_timeout));
        let lister = Arc::new(KubectlLister::new(Arc::clone(&runner), settings.kubectl.clone()));
        let exec = AgentExec::new(
            settings.kubectl.clone(),
            settings.agent_namespace(),
            settings.exec_retry,
        );
        let api = AgentApi::new(runner, exec, settings.agent_commands.clone());
        tracing::info!(
            kubectl = %settings.kubectl,
            agents = %settings.agent_scope,
            integration = ?settings.integration,
            "fleetcheck initialised"
        );
        Self::new(lister, api, settings, Arc::new(TracingReportSink))
    }

    pub fn settings(&self) -> &CheckSettings {
        &self.settings
    }

    fn waiter(&self) -> CollectionWaiter<'_> {
        CollectionWaiter::new(self.lister.as_ref(), self.settings.poll_interval)
    }

    fn gate(&self) -> PreflightGate<'_> {
        PreflightGate::new(
            self.lister.as_ref(),
            &self.api,
            &self.settings.agent_scope,
            self.settings.preflight_options(),
        )
    }

    pub async fn discover_agents(&self) -> Result<Vec<AgentHandle>> {
        discover_agents(self.lister.as_ref(), &self.settings.agent_scope).await
    }

    pub async fn wait_for_ready(
        &self,
        scope: &Scope,
        minimum_required: usize,
        timeout: Duration,
    ) -> Result<()> {
        self.waiter()
            .wait_for_ready(scope, minimum_required, timeout)
            .await
    }

    pub async fn wait_for_running(
        &self,
        scope: &Scope,
        minimum_required: usize,
        timeout: Duration,
    ) -> Result<()> {
        self.waiter()
            .wait_for_running(scope, minimum_required, timeout)
            .await
    }

    pub async fn wait_for_service_endpoints(
        &self,
        namespace: &str,
        service: &str,
        timeout: Duration,
    ) -> Result<()> {
        self.waiter()
            .wait_for_service_endpoints(namespace, service, timeout)
            .await
    }

    pub async fn wait_for_terminating_cleared(&self, timeout: Duration) -> Result<()> {
        self.waiter().wait_for_terminating_cleared(timeout).await
    }

    /// Init containers of the agent pods.
    pub async fn wait_for_init_completed(&self, timeout: Duration) -> Result<()> {
        self.waiter()
            .wait_for_init_completed(&self.settings.agent_scope, timeout)
            .await
    }

    pub async fn wait_for_node_annotations(&self, annotation: &str, timeout: Duration) -> Result<()> {
        self.waiter()
            .wait_for_node_annotations(annotation, timeout)
            .await
    }

    pub async fn run_preflight(&self, timeout: Duration) -> Result<()> {
        self.gate().run(timeout).await
    }

    /// Single-shot snapshot plus both validator directions.
    pub async fn validate_service_consistency(&self) -> Result<()> {
        let agents = self.discover_agents().await?;
        let snapshot = SnapshotBuilder::new(self.lister.as_ref(), &self.api, &agents)
            .build()
            .await
            .context("unable to capture service state")?;
        self.settings.validator().validate(&snapshot)?;
        Ok(())
    }

    pub async fn wait_for_endpoints_ready(&self, timeout: Duration) -> Result<()> {
        let agents = self.discover_agents().await?;
        let check: Arc<dyn AgentCheck> = Arc::new(EndpointsReadyCheck::new(self.api.clone()));
        let config = PollConfig::new(timeout).with_interval(self.settings.poll_interval);
        fanout::wait_all(
            "waiting for agent endpoints",
            &agents,
            check,
            config,
            self.sink.as_ref(),
        )
        .await
    }

    /// Checks the configured DNS service against a fresh snapshot.
    pub async fn dns_preflight(&self) -> Result<()> {
        self.gate().service_check(&self.settings.dns_service).await
    }
}
