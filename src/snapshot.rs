use crate::cluster::{
    AgentApi, AgentHandle, ClusterLister, DataplaneTable, EndpointDesiredRecord,
    ServiceDesiredRecord, ServiceRealizedRecord,
};
use crate::error::{Context, Result};

/// Realized services and dataplane table reported by one agent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentState {
    pub agent: AgentHandle,
    pub realized: Vec<ServiceRealizedRecord>,
    pub dataplane: DataplaneTable,
}

/// Desired, realized and programmed state captured together. Built once per check and
/// only read afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ConsistencySnapshot {
    services: Vec<ServiceDesiredRecord>,
    endpoints: Vec<EndpointDesiredRecord>,
    agents: Vec<AgentState>,
}

impl ConsistencySnapshot {
    pub fn from_parts(
        services: Vec<ServiceDesiredRecord>,
        endpoints: Vec<EndpointDesiredRecord>,
        agents: Vec<AgentState>,
    ) -> Self {
        Self {
            services,
            endpoints,
            agents,
        }
    }

    pub fn services(&self) -> &[ServiceDesiredRecord] {
        &self.services
    }

    pub fn endpoints(&self) -> &[EndpointDesiredRecord] {
        &self.endpoints
    }

    pub fn agents(&self) -> &[AgentState] {
        &self.agents
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<&ServiceDesiredRecord> {
        self.services
            .iter()
            .find(|service| service.namespace == namespace && service.name == name)
    }

    /// The endpoints object backing `service`, matched by namespace and name.
    pub fn endpoints_for(&self, service: &ServiceDesiredRecord) -> Option<&EndpointDesiredRecord> {
        self.endpoints
            .iter()
            .find(|record| record.namespace == service.namespace && record.name == service.name)
    }
}

/// Single-shot collector: the first retrieval or parse failure aborts the build.
pub struct SnapshotBuilder<'a> {
    lister: &'a dyn ClusterLister,
    api: &'a AgentApi,
    agents: &'a [AgentHandle],
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(lister: &'a dyn ClusterLister, api: &'a AgentApi, agents: &'a [AgentHandle]) -> Self {
        Self { lister, api, agents }
    }

    pub async fn build(&self) -> Result<ConsistencySnapshot> {
        let services = self
            .lister
            .list_services()
            .await
            .context("unable to list desired services")?;
        let endpoints = self
            .lister
            .list_endpoints()
            .await
            .context("unable to list desired endpoints")?;

        let mut agents = Vec::with_capacity(self.agents.len());
        for agent in self.agents {
            let realized = self
                .api
                .services(agent)
                .await
                .with_context(|| format!("unable to read realized services of `{agent}`"))?;
            let dataplane = self
                .api
                .dataplane(agent)
                .await
                .with_context(|| format!("unable to read dataplane table of `{agent}`"))?;
            tracing::debug!(
                agent = %agent,
                realized = realized.len(),
                programmed = dataplane.len(),
                "captured agent state"
            );
            agents.push(AgentState {
                agent: agent.clone(),
                realized,
                dataplane,
            });
        }

        Ok(ConsistencySnapshot::from_parts(services, endpoints, agents))
    }
}
