use async_trait::async_trait;
use fleetcheck::cluster::{
    ClusterLister, CommandOutput, CommandRunner, EndpointDesiredRecord, NodeRecord, PodRecord,
    ReportSink, Scope, ServiceDesiredRecord,
};
use fleetcheck::error::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub type Listing<T> = std::result::Result<Vec<T>, String>;

/// Scripted responses; the last one repeats once the script runs out.
#[derive(Debug)]
struct Script<T: Clone> {
    steps: VecDeque<T>,
}

impl<T: Clone> Script<T> {
    fn new(steps: Vec<T>) -> Self {
        Self {
            steps: steps.into(),
        }
    }

    fn next(&mut self) -> Option<T> {
        if self.steps.len() > 1 {
            self.steps.pop_front()
        } else {
            self.steps.front().cloned()
        }
    }
}

fn into_result<T>(listing: Listing<T>) -> Result<Vec<T>> {
    listing.map_err(Error::unavailable)
}

/// In-memory [`ClusterLister`] with per-scope pod scripts.
#[derive(Default)]
pub struct FakeLister {
    pods: Mutex<Vec<(Scope, Script<Listing<PodRecord>>)>>,
    services: Mutex<Option<Script<Listing<ServiceDesiredRecord>>>>,
    endpoints: Mutex<Option<Script<Listing<EndpointDesiredRecord>>>>,
    nodes: Mutex<Option<Script<Listing<NodeRecord>>>>,
    pod_calls: AtomicUsize,
}

impl FakeLister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pods(self, scope: Scope, steps: Vec<Listing<PodRecord>>) -> Self {
        self.pods.lock().unwrap().push((scope, Script::new(steps)));
        self
    }

    pub fn with_services(self, services: Vec<ServiceDesiredRecord>) -> Self {
        *self.services.lock().unwrap() = Some(Script::new(vec![Ok(services)]));
        self
    }

    pub fn with_service_script(self, steps: Vec<Listing<ServiceDesiredRecord>>) -> Self {
        *self.services.lock().unwrap() = Some(Script::new(steps));
        self
    }

    pub fn with_endpoints(self, endpoints: Vec<EndpointDesiredRecord>) -> Self {
        *self.endpoints.lock().unwrap() = Some(Script::new(vec![Ok(endpoints)]));
        self
    }

    pub fn with_endpoint_script(self, steps: Vec<Listing<EndpointDesiredRecord>>) -> Self {
        *self.endpoints.lock().unwrap() = Some(Script::new(steps));
        self
    }

    pub fn with_node_script(self, steps: Vec<Listing<NodeRecord>>) -> Self {
        *self.nodes.lock().unwrap() = Some(Script::new(steps));
        self
    }

    pub fn pod_calls(&self) -> usize {
        self.pod_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterLister for FakeLister {
    async fn list_pods(&self, scope: &Scope) -> Result<Vec<PodRecord>> {
        self.pod_calls.fetch_add(1, Ordering::SeqCst);
        let mut pods = self.pods.lock().unwrap();
        let listing = pods
            .iter_mut()
            .find(|(candidate, _)| candidate == scope)
            .and_then(|(_, script)| script.next())
            .unwrap_or_else(|| Ok(Vec::new()));
        into_result(listing)
    }

    async fn list_services(&self) -> Result<Vec<ServiceDesiredRecord>> {
        let listing = self
            .services
            .lock()
            .unwrap()
            .as_mut()
            .and_then(Script::next)
            .unwrap_or_else(|| Ok(Vec::new()));
        into_result(listing)
    }

    async fn list_endpoints(&self) -> Result<Vec<EndpointDesiredRecord>> {
        let listing = self
            .endpoints
            .lock()
            .unwrap()
            .as_mut()
            .and_then(Script::next)
            .unwrap_or_else(|| Ok(Vec::new()));
        into_result(listing)
    }

    async fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        let listing = self
            .nodes
            .lock()
            .unwrap()
            .as_mut()
            .and_then(Script::next)
            .unwrap_or_else(|| Ok(Vec::new()));
        into_result(listing)
    }
}

/// [`CommandRunner`] answering `kubectl exec -n <ns> <agent> -- <command>` per agent.
#[derive(Default)]
pub struct ScriptedRunner {
    scripts: Mutex<HashMap<(String, String), Script<CommandOutput>>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, agent: &str, command: &str, outputs: Vec<CommandOutput>) -> &Self {
        self.scripts
            .lock()
            .unwrap()
            .insert((agent.to_string(), command.to_string()), Script::new(outputs));
        self
    }

    pub fn respond(&self, agent: &str, command: &str, stdout: impl Into<String>) -> &Self {
        self.script(agent, command, vec![CommandOutput::ok(stdout)])
    }

    pub fn delay(&self, agent: &str, delay: Duration) -> &Self {
        self.delays
            .lock()
            .unwrap()
            .insert(agent.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, command: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, issued)| issued == command)
            .count()
    }
}

fn split_exec(command: &str) -> (String, String) {
    match command.split_once(" -- ") {
        Some((exec, inner)) => {
            let agent = exec.split_whitespace().last().unwrap_or_default();
            (agent.to_string(), inner.to_string())
        }
        None => (String::new(), command.to_string()),
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn execute(&self, command: &str) -> Result<CommandOutput> {
        let (agent, inner) = split_exec(command);
        self.calls
            .lock()
            .unwrap()
            .push((agent.clone(), inner.clone()));

        let delay = self.delays.lock().unwrap().get(&agent).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let output = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&(agent, inner.clone()))
            .and_then(Script::next)
            .unwrap_or_else(|| CommandOutput::failed(1, format!("unscripted command `{inner}`")));
        Ok(output)
    }
}

/// Report sink keeping every `(label, text)` pair.
#[derive(Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn reports(&self) -> Vec<(String, String)> {
        self.reports.lock().unwrap().clone()
    }
}

impl ReportSink for RecordingSink {
    fn report(&self, label: &str, text: &str) {
        self.reports
            .lock()
            .unwrap()
            .push((label.to_string(), text.to_string()));
    }
}
