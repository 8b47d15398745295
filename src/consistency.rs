//! Three-way matching of desired, realized and programmed service state.
//!
//! Desired to realized: every realized record must resolve to a desired service by
//! cluster IP, then by port, and its backends must be endpoints of that service. Every
//! non-headless desired service must be hit by at least one realized record.
//!
//! Realized to dataplane: every realized frontend must have a dataplane entry holding
//! all of its backends, and the number of realized records must equal the number of
//! dataplane keys.

use crate::cluster::{AgentHandle, L4Address, ServiceDesiredRecord, ServiceRealizedRecord};
use crate::error::ConsistencyError;
use crate::snapshot::{AgentState, ConsistencySnapshot};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// How a realized backend is looked up among the programmed backend strings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BackendMatch {
    /// Substring containment. Tolerates metadata the dataplane appends to each entry,
    /// at the cost of accepting `10.1.1.1:80` inside `10.1.1.1:8080`.
    #[default]
    Contains,
    /// The first whitespace-separated token must equal the backend.
    Exact,
}

impl BackendMatch {
    pub fn matches(self, programmed: &str, backend: &str) -> bool {
        match self {
            BackendMatch::Contains => programmed.contains(backend),
            BackendMatch::Exact => programmed.split_whitespace().next() == Some(backend),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackendMatch::Contains => "contains",
            BackendMatch::Exact => "exact",
        }
    }
}

impl fmt::Display for BackendMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendMatch {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "contains" => Ok(BackendMatch::Contains),
            "exact" => Ok(BackendMatch::Exact),
            other => Err(format!("unknown backend match `{other}`")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ConsistencyValidator {
    backend_match: BackendMatch,
}

impl ConsistencyValidator {
    pub fn new(backend_match: BackendMatch) -> Self {
        Self { backend_match }
    }

    /// Checks both directions for every agent, stopping at the first mismatch.
    pub fn validate(&self, snapshot: &ConsistencySnapshot) -> Result<(), ConsistencyError> {
        for state in snapshot.agents() {
            self.check_desired_realized(snapshot, state)?;
            self.check_realized_dataplane(state)?;
        }
        Ok(())
    }

    /// Checks one named service on every agent: the first realized record whose frontend
    /// carries the service's cluster IP and one of its ports must have valid backends and
    /// a matching dataplane entry.
    pub fn validate_service(
        &self,
        snapshot: &ConsistencySnapshot,
        namespace: &str,
        name: &str,
    ) -> Result<(), ConsistencyError> {
        let service =
            snapshot
                .service(namespace, name)
                .ok_or_else(|| ConsistencyError::ServiceNotFound {
                    service: format!("{namespace}/{name}"),
                })?;

        for state in snapshot.agents() {
            let record = state
                .realized
                .iter()
                .find(|record| {
                    service.cluster_ip.as_deref() == Some(record.frontend.ip.as_str())
                        && service.ports.contains(&record.frontend.port)
                })
                .ok_or_else(|| ConsistencyError::ServiceNotRealized {
                    agent: state.agent.clone(),
                    service: service.key(),
                })?;
            self.check_backends(snapshot, &state.agent, service, record)?;
            self.check_dataplane_entry(state, record)?;
        }
        Ok(())
    }

    fn check_desired_realized(
        &self,
        snapshot: &ConsistencySnapshot,
        state: &AgentState,
    ) -> Result<(), ConsistencyError> {
        let mut found = BTreeSet::new();
        for record in &state.realized {
            let service = self.resolve_desired(snapshot, &state.agent, record)?;
            found.insert(service.key());
        }

        let unrealized: Vec<String> = snapshot
            .services()
            .iter()
            .filter(|service| !service.is_headless())
            .map(ServiceDesiredRecord::key)
            .filter(|key| !found.contains(key))
            .collect();
        if unrealized.is_empty() {
            Ok(())
        } else {
            Err(ConsistencyError::UnrealizedServices {
                agent: state.agent.clone(),
                services: unrealized,
            })
        }
    }

    /// First desired service with the frontend's IP wins; its ports must then include
    /// the frontend's port.
    fn resolve_desired<'s>(
        &self,
        snapshot: &'s ConsistencySnapshot,
        agent: &AgentHandle,
        record: &ServiceRealizedRecord,
    ) -> Result<&'s ServiceDesiredRecord, ConsistencyError> {
        let frontend = &record.frontend;
        let service = snapshot
            .services()
            .iter()
            .find(|service| service.cluster_ip.as_deref() == Some(frontend.ip.as_str()))
            .ok_or_else(|| ConsistencyError::UnknownFrontendIp {
                agent: agent.clone(),
                frontend: frontend.to_string(),
            })?;
        if !service.ports.contains(&frontend.port) {
            return Err(ConsistencyError::UnknownFrontendPort {
                agent: agent.clone(),
                frontend: frontend.to_string(),
                service: service.key(),
            });
        }
        self.check_backends(snapshot, agent, service, record)?;
        Ok(service)
    }

    fn check_backends(
        &self,
        snapshot: &ConsistencySnapshot,
        agent: &AgentHandle,
        service: &ServiceDesiredRecord,
        record: &ServiceRealizedRecord,
    ) -> Result<(), ConsistencyError> {
        let desired: Vec<L4Address> = snapshot
            .endpoints_for(service)
            .map(|endpoints| endpoints.backend_addresses())
            .unwrap_or_default();
        match record
            .backends
            .iter()
            .find(|backend| !desired.contains(backend))
        {
            Some(backend) => Err(ConsistencyError::UnknownBackend {
                agent: agent.clone(),
                service: service.key(),
                frontend: record.frontend.to_string(),
                backend: backend.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn check_realized_dataplane(&self, state: &AgentState) -> Result<(), ConsistencyError> {
        for record in &state.realized {
            self.check_dataplane_entry(state, record)?;
        }
        if state.realized.len() != state.dataplane.len() {
            return Err(ConsistencyError::CountMismatch {
                agent: state.agent.clone(),
                realized: state.realized.len(),
                programmed: state.dataplane.len(),
            });
        }
        Ok(())
    }

    fn check_dataplane_entry(
        &self,
        state: &AgentState,
        record: &ServiceRealizedRecord,
    ) -> Result<(), ConsistencyError> {
        let frontend = record.frontend.to_string();
        let Some(programmed) = state.dataplane.backends(&frontend) else {
            return Err(ConsistencyError::MissingDataplaneEntry {
                agent: state.agent.clone(),
                frontend,
                backends: record.backends.iter().map(ToString::to_string).collect(),
            });
        };
        for backend in &record.backends {
            let backend = backend.to_string();
            if !programmed
                .iter()
                .any(|entry| self.backend_match.matches(entry, &backend))
            {
                return Err(ConsistencyError::MissingDataplaneBackend {
                    agent: state.agent.clone(),
                    frontend,
                    backend,
                });
            }
        }
        Ok(())
    }
}
