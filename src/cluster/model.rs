use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Identity of one remote agent, resolved once at discovery and carried through every stage.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AgentHandle {
    name: Arc<str>,
    node: Option<Arc<str>>,
}

impl AgentHandle {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            node: None,
        }
    }

    pub fn on_node(mut self, node: impl Into<Arc<str>>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn from_pod(pod: &PodRecord) -> Self {
        let handle = Self::new(pod.name.as_str());
        match pod.node.as_deref() {
            Some(node) => handle.on_node(node),
            None => handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }
}

impl fmt::Display for AgentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// An `ip:port` pair in the textual form the dataplane table uses for its keys.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct L4Address {
    pub ip: String,
    pub port: u16,
}

impl L4Address {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }
}

impl fmt::Display for L4Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// `namespace/name` reference to a desired service.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServiceRef {
    pub namespace: String,
    pub name: String,
}

impl ServiceRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ServiceRef {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.split_once('/') {
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(namespace, name))
            }
            _ => Err(format!("expected `namespace/name` (got `{value}`)")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceKind {
    Normal,
    /// ClusterIP service without an assigned cluster IP.
    Headless,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceDesiredRecord {
    pub namespace: String,
    pub name: String,
    pub cluster_ip: Option<String>,
    pub ports: Vec<u16>,
    pub kind: ServiceKind,
}

impl ServiceDesiredRecord {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn is_headless(&self) -> bool {
        self.kind == ServiceKind::Headless
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct EndpointSubset {
    pub addresses: Vec<String>,
    pub ports: Vec<u16>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointDesiredRecord {
    pub namespace: String,
    pub name: String,
    pub subsets: Vec<EndpointSubset>,
}

impl EndpointDesiredRecord {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Every address paired with every port of its subset.
    pub fn backend_addresses(&self) -> Vec<L4Address> {
        let mut result = Vec::new();
        for subset in &self.subsets {
            for address in &subset.addresses {
                for port in &subset.ports {
                    result.push(L4Address::new(address.as_str(), *port));
                }
            }
        }
        result
    }

    pub fn first_port(&self) -> Option<u16> {
        self.subsets
            .first()
            .and_then(|subset| subset.ports.first().copied())
    }
}

/// A service as an agent reports having realized it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceRealizedRecord {
    pub id: Option<u64>,
    pub frontend: L4Address,
    pub backends: Vec<L4Address>,
}

/// Programmed load-balancer table of one agent: frontend `ip:port` to backend strings.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct DataplaneTable {
    entries: BTreeMap<String, Vec<String>>,
}

impl DataplaneTable {
    pub fn new(entries: BTreeMap<String, Vec<String>>) -> Self {
        Self { entries }
    }

    pub fn backends(&self, frontend: &str) -> Option<&[String]> {
        self.entries.get(frontend).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, Vec<String>)> for DataplaneTable {
    fn from_iter<I: IntoIterator<Item = (String, Vec<String>)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerState {
    pub name: String,
    pub ready: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitContainerState {
    pub name: String,
    /// `(reason, exit_code)` once the init container terminated.
    pub terminated: Option<(String, i32)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodRecord {
    pub namespace: String,
    pub name: String,
    pub node: Option<String>,
    pub phase: PodPhase,
    pub deletion_pending: bool,
    pub containers: Vec<ContainerState>,
    pub init_containers: Vec<InitContainerState>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeRecord {
    pub name: String,
    pub annotations: BTreeMap<String, String>,
}
