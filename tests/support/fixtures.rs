use super::cluster::ScriptedRunner;
use fleetcheck::cluster::{
    AgentApi, AgentCommands, AgentExec, AgentHandle, ContainerState, DataplaneTable,
    EndpointDesiredRecord, EndpointSubset, ExecRetry, InitContainerState, L4Address, PodPhase,
    PodRecord, ServiceDesiredRecord, ServiceKind, ServiceRealizedRecord,
};
use fleetcheck::snapshot::{AgentState, ConsistencySnapshot};
use serde_json::json;
use std::sync::Arc;

pub const AGENT_NAMESPACE: &str = "kube-system";

pub fn api(runner: Arc<ScriptedRunner>) -> AgentApi {
    AgentApi::new(
        runner,
        AgentExec::new("kubectl", AGENT_NAMESPACE, ExecRetry::default()),
        AgentCommands::default(),
    )
}

pub fn pod(namespace: &str, name: &str, ready: bool) -> PodRecord {
    PodRecord {
        namespace: namespace.to_string(),
        name: name.to_string(),
        node: None,
        phase: PodPhase::Running,
        deletion_pending: false,
        containers: vec![ContainerState {
            name: "main".to_string(),
            ready,
        }],
        init_containers: Vec::new(),
    }
}

pub fn pods(namespace: &str, total: usize, ready: usize) -> Vec<PodRecord> {
    (0..total)
        .map(|index| pod(namespace, &format!("pod-{index}"), index < ready))
        .collect()
}

pub fn agent_pod(name: &str, node: &str) -> PodRecord {
    let mut record = pod(AGENT_NAMESPACE, name, true);
    record.node = Some(node.to_string());
    record.init_containers = vec![InitContainerState {
        name: "mount-cgroup".to_string(),
        terminated: Some(("Completed".to_string(), 0)),
    }];
    record
}

pub fn agents(count: usize) -> Vec<AgentHandle> {
    (0..count)
        .map(|index| AgentHandle::new(format!("agent-{index}")).on_node(format!("node-{index}")))
        .collect()
}

pub fn service(namespace: &str, name: &str, cluster_ip: &str, ports: &[u16]) -> ServiceDesiredRecord {
    ServiceDesiredRecord {
        namespace: namespace.to_string(),
        name: name.to_string(),
        cluster_ip: Some(cluster_ip.to_string()),
        ports: ports.to_vec(),
        kind: ServiceKind::Normal,
    }
}

pub fn headless(namespace: &str, name: &str, ports: &[u16]) -> ServiceDesiredRecord {
    ServiceDesiredRecord {
        namespace: namespace.to_string(),
        name: name.to_string(),
        cluster_ip: None,
        ports: ports.to_vec(),
        kind: ServiceKind::Headless,
    }
}

pub fn endpoints(namespace: &str, name: &str, addresses: &[&str], ports: &[u16]) -> EndpointDesiredRecord {
    EndpointDesiredRecord {
        namespace: namespace.to_string(),
        name: name.to_string(),
        subsets: vec![EndpointSubset {
            addresses: addresses.iter().map(|address| address.to_string()).collect(),
            ports: ports.to_vec(),
        }],
    }
}

/// Parses `ip:port`.
pub fn addr(text: &str) -> L4Address {
    let (ip, port) = text.rsplit_once(':').expect("address must be ip:port");
    L4Address::new(ip, port.parse().expect("port must be numeric"))
}

pub fn realized(frontend: &str, backends: &[&str]) -> ServiceRealizedRecord {
    ServiceRealizedRecord {
        id: None,
        frontend: addr(frontend),
        backends: backends.iter().map(|backend| addr(backend)).collect(),
    }
}

pub fn dataplane(entries: &[(&str, &[&str])]) -> DataplaneTable {
    entries
        .iter()
        .map(|(frontend, backends)| {
            (
                frontend.to_string(),
                backends.iter().map(|backend| backend.to_string()).collect(),
            )
        })
        .collect()
}

pub fn agent_state(
    name: &str,
    realized: Vec<ServiceRealizedRecord>,
    dataplane: DataplaneTable,
) -> AgentState {
    AgentState {
        agent: AgentHandle::new(name),
        realized,
        dataplane,
    }
}

/// Desired `default/web` at 10.0.0.1:80 backed by 10.1.1.1:8080, realized and programmed
/// consistently on one agent.
pub fn consistent_snapshot() -> ConsistencySnapshot {
    ConsistencySnapshot::from_parts(
        vec![service("default", "web", "10.0.0.1", &[80])],
        vec![endpoints("default", "web", &["10.1.1.1"], &[8080])],
        vec![agent_state(
            "agent-0",
            vec![realized("10.0.0.1:80", &["10.1.1.1:8080"])],
            dataplane(&[("10.0.0.1:80", &["10.1.1.1:8080 (1)"])]),
        )],
    )
}

/// JSON the agent prints for its realized service list.
pub fn services_json(services: &[(&str, &[&str])]) -> String {
    let list: Vec<_> = services
        .iter()
        .enumerate()
        .map(|(index, (frontend, backends))| {
            let frontend = addr(frontend);
            let backends: Vec<_> = backends
                .iter()
                .map(|backend| {
                    let backend = addr(backend);
                    json!({"ip": backend.ip, "port": backend.port})
                })
                .collect();
            json!({
                "spec": {"id": index + 1},
                "status": {"realized": {
                    "id": index + 1,
                    "frontend-address": {"ip": frontend.ip, "port": frontend.port},
                    "backend-addresses": backends,
                }},
            })
        })
        .collect();
    serde_json::Value::Array(list).to_string()
}

pub fn dataplane_json(entries: &[(&str, &[&str])]) -> String {
    let map: serde_json::Map<String, serde_json::Value> = entries
        .iter()
        .map(|(frontend, backends)| (frontend.to_string(), json!(backends)))
        .collect();
    serde_json::Value::Object(map).to_string()
}

pub fn endpoints_json(states: &[(&str, i64)]) -> String {
    let list: Vec<_> = states
        .iter()
        .enumerate()
        .map(|(index, (state, identity))| {
            json!({"id": index + 100, "status": {"state": state, "identity": {"id": identity}}})
        })
        .collect();
    serde_json::Value::Array(list).to_string()
}

pub fn health_json(nodes: &[&str]) -> String {
    let list: Vec<_> = nodes
        .iter()
        .map(|node| json!({"name": node, "host": {"primary-address": {"http": {"status": ""}}}}))
        .collect();
    json!({ "nodes": list }).to_string()
}

pub fn controllers_json(failures: &[(&str, u64)]) -> String {
    let list: Vec<_> = failures
        .iter()
        .map(|(name, count)| json!({"name": name, "status": {"consecutive-failure-count": count}}))
        .collect();
    json!({ "controllers": list }).to_string()
}

/// Scripts every preflight command of `agent` to pass against the `consistent_snapshot`
/// service layout.
pub fn script_healthy_agent(runner: &ScriptedRunner, agent: &str, nodes: &[&str]) {
    let commands = AgentCommands::default();
    runner
        .respond(agent, &commands.status, "KVStore: Ok Disabled\nCluster health: ok\n")
        .respond(agent, &commands.controllers, controllers_json(&[("sync-endpoints", 0)]))
        .respond(agent, &commands.health, health_json(nodes))
        .respond(
            agent,
            &commands.services,
            services_json(&[("10.0.0.1:80", &["10.1.1.1:8080"])]),
        )
        .respond(
            agent,
            &commands.dataplane,
            dataplane_json(&[("10.0.0.1:80", &["10.1.1.1:8080 (1)"])]),
        );
}
