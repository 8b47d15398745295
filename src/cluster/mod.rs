//! Cluster-facing collaborators: typed listings, in-agent command execution and the
//! records both project onto.

pub mod agent;
pub mod exec;
pub mod kubectl;
pub mod lister;
pub mod model;
pub mod report;

pub use agent::{
    AgentApi, AgentCommands, AgentStatus, ControllerStatus, EndpointStatus, HealthNode,
};
pub use exec::{AgentExec, CommandOutput, CommandRunner, ExecRetry, ShellRunner};
pub use kubectl::KubectlLister;
pub use lister::{discover_agents, ClusterLister, Scope};
pub use model::{
    AgentHandle, ContainerState, DataplaneTable, EndpointDesiredRecord, EndpointSubset,
    InitContainerState, L4Address, NodeRecord, PodPhase, PodRecord, ServiceDesiredRecord,
    ServiceKind, ServiceRealizedRecord, ServiceRef,
};
pub use report::{ReportSink, TracingReportSink};
