use crate::cluster::{
    ClusterLister, CommandRunner, ContainerState, EndpointDesiredRecord, EndpointSubset,
    InitContainerState, NodeRecord, PodPhase, PodRecord, Scope, ServiceDesiredRecord, ServiceKind,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

const CLUSTER_IP_NONE: &str = "None";
const SERVICE_TYPE_CLUSTER_IP: &str = "ClusterIP";

/// [`ClusterLister`] backed by `kubectl get ... -o json`.
#[derive(Clone)]
pub struct KubectlLister {
    runner: Arc<dyn CommandRunner>,
    kubectl: String,
}

impl KubectlLister {
    pub fn new(runner: Arc<dyn CommandRunner>, kubectl: impl Into<String>) -> Self {
        Self {
            runner,
            kubectl: kubectl.into(),
        }
    }

    fn get_command(&self, kind: &str, scope: &Scope) -> String {
        let mut command = format!("{} get {kind}", self.kubectl);
        match scope.namespace.as_deref() {
            Some(namespace) => {
                command.push_str(" -n ");
                command.push_str(namespace);
            }
            None => command.push_str(" --all-namespaces"),
        }
        if let Some(selector) = scope.selector.as_deref() {
            command.push_str(" -l ");
            command.push_str(selector);
        }
        command.push_str(" -o json");
        command
    }

    async fn get<T: DeserializeOwned>(&self, kind: &str, scope: &Scope) -> Result<ObjectList<T>> {
        let command = self.get_command(kind, scope);
        let output = self
            .runner
            .execute(&command)
            .await?
            .into_success(|| format!("unable to list {kind} in {scope}"))?;
        serde_json::from_str(&output.stdout)
            .map_err(|err| Error::malformed(format!("{kind} list for {scope}"), err))
    }
}

#[async_trait]
impl ClusterLister for KubectlLister {
    async fn list_pods(&self, scope: &Scope) -> Result<Vec<PodRecord>> {
        let list = self.get::<WirePod>("pods", scope).await?;
        Ok(list.items.into_iter().map(project_pod).collect())
    }

    async fn list_services(&self) -> Result<Vec<ServiceDesiredRecord>> {
        let list = self.get::<WireService>("services", &Scope::all()).await?;
        Ok(list.items.into_iter().map(project_service).collect())
    }

    async fn list_endpoints(&self) -> Result<Vec<EndpointDesiredRecord>> {
        let list = self.get::<WireEndpoints>("endpoints", &Scope::all()).await?;
        Ok(list.items.into_iter().map(project_endpoints).collect())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        let command = format!("{} get nodes -o json", self.kubectl);
        let output = self
            .runner
            .execute(&command)
            .await?
            .into_success(|| "unable to list nodes".to_string())?;
        let list: ObjectList<WireNode> = serde_json::from_str(&output.stdout)
            .map_err(|err| Error::malformed("node list", err))?;
        Ok(list
            .items
            .into_iter()
            .map(|node| NodeRecord {
                name: node.metadata.name,
                annotations: node.metadata.annotations,
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct ObjectList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMeta {
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    deletion_timestamp: Option<String>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct WirePod {
    metadata: WireMeta,
    #[serde(default)]
    spec: WirePodSpec,
    #[serde(default)]
    status: WirePodStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePodSpec {
    #[serde(default)]
    node_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePodStatus {
    #[serde(default)]
    phase: String,
    #[serde(default)]
    container_statuses: Vec<WireContainerStatus>,
    #[serde(default)]
    init_container_statuses: Vec<WireContainerStatus>,
}

#[derive(Debug, Deserialize)]
struct WireContainerStatus {
    name: String,
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    state: WireContainerState,
}

#[derive(Debug, Default, Deserialize)]
struct WireContainerState {
    #[serde(default)]
    terminated: Option<WireTerminated>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTerminated {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    exit_code: i32,
}

fn project_pod(pod: WirePod) -> PodRecord {
    PodRecord {
        namespace: pod.metadata.namespace,
        name: pod.metadata.name,
        node: pod.spec.node_name,
        phase: PodPhase::parse(&pod.status.phase),
        deletion_pending: pod.metadata.deletion_timestamp.is_some(),
        containers: pod
            .status
            .container_statuses
            .into_iter()
            .map(|status| ContainerState {
                name: status.name,
                ready: status.ready,
            })
            .collect(),
        init_containers: pod
            .status
            .init_container_statuses
            .into_iter()
            .map(|status| InitContainerState {
                name: status.name,
                terminated: status
                    .state
                    .terminated
                    .map(|terminated| (terminated.reason, terminated.exit_code)),
            })
            .collect(),
    }
}

#[derive(Debug, Deserialize)]
struct WireService {
    metadata: WireMeta,
    #[serde(default)]
    spec: WireServiceSpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireServiceSpec {
    #[serde(default, rename = "type")]
    service_type: Option<String>,
    #[serde(default, rename = "clusterIP")]
    cluster_ip: Option<String>,
    #[serde(default)]
    ports: Vec<WirePort>,
}

#[derive(Debug, Deserialize)]
struct WirePort {
    port: u16,
}

fn project_service(service: WireService) -> ServiceDesiredRecord {
    let service_type = service
        .spec
        .service_type
        .unwrap_or_else(|| SERVICE_TYPE_CLUSTER_IP.to_string());
    let cluster_ip = service
        .spec
        .cluster_ip
        .filter(|ip| !ip.is_empty() && ip != CLUSTER_IP_NONE);
    let kind = if service_type == SERVICE_TYPE_CLUSTER_IP && cluster_ip.is_none() {
        ServiceKind::Headless
    } else {
        ServiceKind::Normal
    };
    ServiceDesiredRecord {
        namespace: service.metadata.namespace,
        name: service.metadata.name,
        cluster_ip,
        ports: service.spec.ports.into_iter().map(|port| port.port).collect(),
        kind,
    }
}

#[derive(Debug, Deserialize)]
struct WireEndpoints {
    metadata: WireMeta,
    #[serde(default)]
    subsets: Vec<WireSubset>,
}

#[derive(Debug, Deserialize)]
struct WireSubset {
    #[serde(default)]
    addresses: Vec<WireEndpointAddress>,
    #[serde(default)]
    ports: Vec<WirePort>,
}

#[derive(Debug, Deserialize)]
struct WireEndpointAddress {
    ip: String,
}

fn project_endpoints(endpoints: WireEndpoints) -> EndpointDesiredRecord {
    EndpointDesiredRecord {
        namespace: endpoints.metadata.namespace,
        name: endpoints.metadata.name,
        subsets: endpoints
            .subsets
            .into_iter()
            .map(|subset| EndpointSubset {
                addresses: subset.addresses.into_iter().map(|addr| addr.ip).collect(),
                ports: subset.ports.into_iter().map(|port| port.port).collect(),
            })
            .collect(),
    }
}

#[derive(Debug, Deserialize)]
struct WireNode {
    metadata: WireMeta,
}
