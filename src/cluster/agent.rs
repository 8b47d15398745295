use crate::cluster::{
    AgentExec, AgentHandle, CommandOutput, CommandRunner, DataplaneTable, L4Address,
    ServiceRealizedRecord,
};
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Identity the agent assigns to endpoints that are still initialising.
pub const RESERVED_INIT_IDENTITY: i64 = 5;
pub const ENDPOINT_STATE_READY: &str = "ready";

/// Commands issued inside each agent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentCommands {
    pub status: String,
    pub controllers: String,
    pub controllers_detail: String,
    pub health: String,
    pub services: String,
    pub dataplane: String,
    pub endpoints: String,
}

impl Default for AgentCommands {
    fn default() -> Self {
        Self {
            status: "cilium status --all-health --all-nodes".to_string(),
            controllers: "cilium status --all-controllers -o json".to_string(),
            controllers_detail: "cilium status --all-controllers".to_string(),
            health: "cilium-health status -o json --probe".to_string(),
            services: "cilium service list -o json".to_string(),
            dataplane: "cilium bpf lb list -o json".to_string(),
            endpoints: "cilium endpoint list -o json".to_string(),
        }
    }
}

/// Outcome of the agent status command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentStatus {
    pub output: CommandOutput,
}

impl AgentStatus {
    pub fn healthy(&self) -> bool {
        self.output.success
    }

    /// True when any status line reports the key-value store without quorum.
    pub fn quorum_lost(&self) -> bool {
        reports_lost_quorum(&self.output.stdout)
    }
}

pub fn reports_lost_quorum(text: &str) -> bool {
    text.lines().any(|line| {
        line.find("KVStore:")
            .map(|at| line[at..].contains("has-quorum=false"))
            .unwrap_or(false)
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerStatus {
    pub name: String,
    pub consecutive_failures: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthNode {
    pub name: String,
    /// Failure text for the HTTP probe of the node's primary address; empty when healthy.
    pub http_status: String,
}

impl HealthNode {
    pub fn healthy(&self) -> bool {
        self.http_status.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointStatus {
    pub id: i64,
    pub state: String,
    pub identity: i64,
}

impl EndpointStatus {
    pub fn is_ready(&self) -> bool {
        self.state == ENDPOINT_STATE_READY && self.identity != RESERVED_INIT_IDENTITY
    }
}

/// Typed access to the per-agent introspection commands.
#[derive(Clone)]
pub struct AgentApi {
    runner: Arc<dyn CommandRunner>,
    exec: AgentExec,
    commands: AgentCommands,
}

impl AgentApi {
    pub fn new(runner: Arc<dyn CommandRunner>, exec: AgentExec, commands: AgentCommands) -> Self {
        Self {
            runner,
            exec,
            commands,
        }
    }

    pub fn commands(&self) -> &AgentCommands {
        &self.commands
    }

    /// Runs `command` inside `agent` and returns its raw output, successful or not.
    pub async fn run(&self, agent: &AgentHandle, command: &str) -> Result<CommandOutput> {
        self.exec.run(self.runner.as_ref(), agent, command).await
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        agent: &AgentHandle,
        command: &str,
        what: &str,
    ) -> Result<T> {
        let output = self
            .run(agent, command)
            .await?
            .into_success(|| format!("unable to retrieve {what} on `{agent}`"))?;
        serde_json::from_str(&output.stdout)
            .map_err(|err| Error::malformed(format!("{what} of `{agent}`"), err))
    }

    pub async fn status(&self, agent: &AgentHandle) -> Result<AgentStatus> {
        let output = self.run(agent, &self.commands.status).await?;
        Ok(AgentStatus { output })
    }

    pub async fn controllers(&self, agent: &AgentHandle) -> Result<Vec<ControllerStatus>> {
        let status: WireStatus = self
            .fetch(agent, &self.commands.controllers, "controller status")
            .await?;
        Ok(status
            .controllers
            .into_iter()
            .map(|controller| ControllerStatus {
                name: controller.name,
                consecutive_failures: controller.status.consecutive_failure_count,
            })
            .collect())
    }

    /// Human-readable controller listing used in failure messages.
    pub async fn controllers_detail(&self, agent: &AgentHandle) -> Result<String> {
        let output = self.run(agent, &self.commands.controllers_detail).await?;
        Ok(output.pretty())
    }

    pub async fn health(&self, agent: &AgentHandle) -> Result<Vec<HealthNode>> {
        let status: WireHealth = self
            .fetch(agent, &self.commands.health, "connectivity health")
            .await?;
        Ok(status
            .nodes
            .into_iter()
            .map(|node| HealthNode {
                name: node.name,
                http_status: node
                    .host
                    .and_then(|host| host.primary_address)
                    .and_then(|address| address.http)
                    .and_then(|http| http.status)
                    .unwrap_or_default(),
            })
            .collect())
    }

    pub async fn services(&self, agent: &AgentHandle) -> Result<Vec<ServiceRealizedRecord>> {
        let services: Vec<WireAgentService> = self
            .fetch(agent, &self.commands.services, "service list")
            .await?;
        services
            .into_iter()
            .map(|service| {
                let realized = service
                    .status
                    .and_then(|status| status.realized)
                    .ok_or_else(|| {
                        Error::malformed(
                            format!("service list of `{agent}`"),
                            "service without realized status",
                        )
                    })?;
                Ok(ServiceRealizedRecord {
                    id: realized.id,
                    frontend: realized.frontend_address.into(),
                    backends: realized
                        .backend_addresses
                        .into_iter()
                        .map(L4Address::from)
                        .collect(),
                })
            })
            .collect()
    }

    pub async fn dataplane(&self, agent: &AgentHandle) -> Result<DataplaneTable> {
        let entries: BTreeMap<String, Vec<String>> = self
            .fetch(agent, &self.commands.dataplane, "dataplane table")
            .await?;
        Ok(DataplaneTable::new(entries))
    }

    pub async fn endpoints(&self, agent: &AgentHandle) -> Result<Vec<EndpointStatus>> {
        let endpoints: Vec<WireEndpoint> = self
            .fetch(agent, &self.commands.endpoints, "endpoint list")
            .await?;
        Ok(endpoints
            .into_iter()
            .map(|endpoint| {
                let status = endpoint.status.unwrap_or_default();
                EndpointStatus {
                    id: endpoint.id,
                    state: status.state,
                    identity: status.identity.map(|identity| identity.id).unwrap_or(0),
                }
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct WireStatus {
    #[serde(default)]
    controllers: Vec<WireController>,
}

#[derive(Debug, Deserialize)]
struct WireController {
    name: String,
    #[serde(default)]
    status: WireControllerStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct WireControllerStatus {
    #[serde(default)]
    consecutive_failure_count: u64,
}

#[derive(Debug, Deserialize)]
struct WireHealth {
    #[serde(default)]
    nodes: Vec<WireHealthNode>,
}

#[derive(Debug, Deserialize)]
struct WireHealthNode {
    name: String,
    #[serde(default)]
    host: Option<WireHealthHost>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct WireHealthHost {
    #[serde(default)]
    primary_address: Option<WireHealthAddress>,
}

#[derive(Debug, Deserialize)]
struct WireHealthAddress {
    #[serde(default)]
    http: Option<WireProbe>,
}

#[derive(Debug, Deserialize)]
struct WireProbe {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireAgentService {
    #[serde(default)]
    status: Option<WireAgentServiceStatus>,
}

#[derive(Debug, Deserialize)]
struct WireAgentServiceStatus {
    #[serde(default)]
    realized: Option<WireRealized>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct WireRealized {
    #[serde(default)]
    id: Option<u64>,
    frontend_address: WireAddress,
    #[serde(default)]
    backend_addresses: Vec<WireAddress>,
}

#[derive(Debug, Deserialize)]
struct WireAddress {
    #[serde(default)]
    ip: String,
    #[serde(default)]
    port: u16,
}

impl From<WireAddress> for L4Address {
    fn from(address: WireAddress) -> Self {
        L4Address::new(address.ip, address.port)
    }
}

#[derive(Debug, Deserialize)]
struct WireEndpoint {
    id: i64,
    #[serde(default)]
    status: Option<WireEndpointStatus>,
}

#[derive(Debug, Default, Deserialize)]
struct WireEndpointStatus {
    #[serde(default)]
    state: String,
    #[serde(default)]
    identity: Option<WireIdentity>,
}

#[derive(Debug, Deserialize)]
struct WireIdentity {
    id: i64,
}
