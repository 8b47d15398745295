#[path = "support/mod.rs"]
mod support;

use fleetcheck::app::FleetcheckApp;
use fleetcheck::cluster::{AgentCommands, CommandOutput, ReportSink, Scope, ServiceRef};
use fleetcheck::config::CheckSettings;
use fleetcheck::error::{ConsistencyError, Error};
use std::sync::Arc;
use std::time::Duration;
use support::cluster::{FakeLister, RecordingSink, ScriptedRunner};
use support::fixtures::{
    agent_pod, api, dataplane_json, endpoints, endpoints_json, pods, script_healthy_agent,
    service,
};
use tokio::time::Instant;

struct Harness {
    app: FleetcheckApp,
    runner: Arc<ScriptedRunner>,
    sink: Arc<RecordingSink>,
}

fn settings() -> CheckSettings {
    CheckSettings {
        well_known_service: ServiceRef::new("default", "web"),
        poll_interval: Duration::from_secs(1),
        ..CheckSettings::default()
    }
}

fn fleet_lister() -> FakeLister {
    FakeLister::new()
        .with_pods(
            CheckSettings::default().agent_scope,
            vec![Ok(vec![agent_pod("agent-0", "node-0")])],
        )
        .with_services(vec![service("default", "web", "10.0.0.1", &[80])])
        .with_endpoints(vec![endpoints("default", "web", &["10.1.1.1"], &[8080])])
}

fn harness(lister: FakeLister, settings: CheckSettings) -> Harness {
    let runner = Arc::new(ScriptedRunner::new());
    let sink = Arc::new(RecordingSink::default());
    let reports: Arc<dyn ReportSink> = Arc::clone(&sink) as Arc<dyn ReportSink>;
    let app = FleetcheckApp::new(Arc::new(lister), api(Arc::clone(&runner)), settings, reports);
    Harness { app, runner, sink }
}

#[tokio::test(start_paused = true)]
async fn wait_for_ready_follows_the_listing() {
    let scope = Scope::namespace("default").with_selector("app=web");
    let lister = FakeLister::new().with_pods(
        scope.clone(),
        vec![Ok(pods("default", 3, 1)), Ok(pods("default", 3, 3))],
    );
    let Harness { app, .. } = harness(lister, settings());
    let started = Instant::now();

    app.wait_for_ready(&scope, 3, Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(started.elapsed(), Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn run_preflight_passes_for_a_healthy_fleet() {
    let Harness { app, runner, .. } = harness(fleet_lister(), settings());
    script_healthy_agent(&runner, "agent-0", &["node-0"]);

    app.run_preflight(Duration::from_secs(5)).await.unwrap();

    assert_eq!(runner.calls_for(&AgentCommands::default().status), 1);
}

#[tokio::test(start_paused = true)]
async fn run_preflight_times_out_on_an_unhealthy_agent() {
    let Harness { app, runner, .. } = harness(fleet_lister(), settings());
    script_healthy_agent(&runner, "agent-0", &["node-0"]);
    runner.script(
        "agent-0",
        &AgentCommands::default().status,
        vec![CommandOutput::failed(1, "daemon not responding")],
    );

    let error = app.run_preflight(Duration::from_secs(3)).await.unwrap_err();

    assert!(error.is_timeout());
    assert!(error.to_string().contains("daemon not responding"), "{error}");
}

#[tokio::test]
async fn validate_service_consistency_accepts_agreeing_state() {
    let Harness { app, runner, .. } = harness(fleet_lister(), settings());
    script_healthy_agent(&runner, "agent-0", &["node-0"]);

    app.validate_service_consistency().await.unwrap();
}

#[tokio::test]
async fn validate_service_consistency_names_the_missing_pair() {
    let Harness { app, runner, .. } = harness(fleet_lister(), settings());
    script_healthy_agent(&runner, "agent-0", &["node-0"]);
    runner.respond("agent-0", &AgentCommands::default().dataplane, dataplane_json(&[]));

    let error = app.validate_service_consistency().await.unwrap_err();

    assert!(
        matches!(
            error.root(),
            Error::Inconsistent(ConsistencyError::MissingDataplaneEntry { .. })
        ),
        "{error}"
    );
    assert!(error.to_string().contains("10.0.0.1:80 -> 10.1.1.1:8080"), "{error}");
}

#[tokio::test(start_paused = true)]
async fn wait_for_endpoints_ready_reports_the_fleet_on_timeout() {
    let Harness { app, runner, sink } = harness(fleet_lister(), settings());
    runner.respond(
        "agent-0",
        &AgentCommands::default().endpoints,
        endpoints_json(&[("ready", 100), ("waiting-for-identity", 5)]),
    );

    let error = app
        .wait_for_endpoints_ready(Duration::from_secs(3))
        .await
        .unwrap_err();

    assert!(error.is_timeout());
    assert!(error.to_string().contains("1/2 endpoints not ready"), "{error}");
    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].1.contains("agent agent-0:"), "{}", reports[0].1);
    assert!(reports[0].1.contains("state waiting-for-identity"), "{}", reports[0].1);
}

#[tokio::test(start_paused = true)]
async fn wait_for_endpoints_ready_passes_once_identities_resolve() {
    let Harness { app, runner, sink } = harness(fleet_lister(), settings());
    runner.respond(
        "agent-0",
        &AgentCommands::default().endpoints,
        endpoints_json(&[("ready", 100), ("ready", 4242)]),
    );

    app.wait_for_endpoints_ready(Duration::from_secs(3))
        .await
        .unwrap();

    assert!(sink.reports().is_empty());
}

#[tokio::test]
async fn dns_preflight_checks_the_configured_service() {
    let configured = CheckSettings {
        dns_service: ServiceRef::new("default", "web"),
        ..settings()
    };
    let Harness { app, runner, .. } = harness(fleet_lister(), configured);
    script_healthy_agent(&runner, "agent-0", &["node-0"]);

    app.dns_preflight().await.unwrap();
}

#[tokio::test]
async fn dns_preflight_fails_when_the_service_is_absent() {
    let Harness { app, runner, .. } = harness(fleet_lister(), settings());
    script_healthy_agent(&runner, "agent-0", &["node-0"]);

    let error = app.dns_preflight().await.unwrap_err();

    assert!(
        error.to_string().starts_with("kube-system/kube-dns service is not ready"),
        "{error}"
    );
}
