use crate::cluster::{
    AgentHandle, EndpointDesiredRecord, NodeRecord, PodRecord, ServiceDesiredRecord,
};
use crate::error::{Context, Result};
use async_trait::async_trait;
use std::fmt;

/// Namespace plus label selector narrowing a pod listing.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Scope {
    /// `None` lists across all namespaces.
    pub namespace: Option<String>,
    pub selector: Option<String>,
}

impl Scope {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            selector: None,
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let namespace = self.namespace.as_deref().unwrap_or("*");
        match self.selector.as_deref() {
            Some(selector) => write!(f, "{namespace}[{selector}]"),
            None => f.write_str(namespace),
        }
    }
}

/// Structured listing of the control plane's declared objects.
///
/// Failures are reported as [`crate::error::Error::Unavailable`] when the listing could
/// not be retrieved and as [`crate::error::Error::Malformed`] when it could not be parsed.
#[async_trait]
pub trait ClusterLister: Send + Sync {
    async fn list_pods(&self, scope: &Scope) -> Result<Vec<PodRecord>>;
    async fn list_services(&self) -> Result<Vec<ServiceDesiredRecord>>;
    async fn list_endpoints(&self) -> Result<Vec<EndpointDesiredRecord>>;
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>>;
}

/// Agents are the pods matched by `scope`; each becomes a handle once.
pub async fn discover_agents(lister: &dyn ClusterLister, scope: &Scope) -> Result<Vec<AgentHandle>> {
    let pods = lister
        .list_pods(scope)
        .await
        .with_context(|| format!("cannot retrieve agents in {scope}"))?;
    Ok(pods.iter().map(AgentHandle::from_pod).collect())
}
