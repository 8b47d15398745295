#[path = "support/mod.rs"]
mod support;

use async_trait::async_trait;
use fleetcheck::cluster::{AgentCommands, AgentHandle, CommandOutput};
use fleetcheck::fanout::{self, AgentCheck, EndpointsReadyCheck, ReadinessResult};
use fleetcheck::poll::PollConfig;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use support::cluster::{RecordingSink, ScriptedRunner};
use support::fixtures::{agents, api, endpoints_json};

/// Answers after a per-agent delay with a fixed verdict.
struct DelayedCheck {
    delays: HashMap<AgentHandle, Duration>,
    verdicts: HashMap<AgentHandle, bool>,
}

#[async_trait]
impl AgentCheck for DelayedCheck {
    async fn check(&self, agent: &AgentHandle) -> ReadinessResult {
        if let Some(delay) = self.delays.get(agent) {
            tokio::time::sleep(*delay).await;
        }
        if self.verdicts.get(agent).copied().unwrap_or(true) {
            ReadinessResult::ready(agent.clone())
        } else {
            ReadinessResult::not_ready(agent.clone(), "still starting")
        }
    }

    async fn describe(&self, agent: &AgentHandle) -> String {
        format!("{agent} described")
    }
}

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .expect("runtime")
}

proptest! {
    #[test]
    fn one_failing_agent_fails_the_round_in_any_completion_order(
        delays in prop::collection::vec(0u64..500, 1..8),
        failing_seed in any::<usize>(),
    ) {
        let fleet = agents(delays.len());
        let failing = failing_seed % fleet.len();
        let check = DelayedCheck {
            delays: fleet
                .iter()
                .cloned()
                .zip(delays.iter().map(|ms| Duration::from_millis(*ms)))
                .collect(),
            verdicts: fleet
                .iter()
                .enumerate()
                .map(|(index, agent)| (agent.clone(), index != failing))
                .collect(),
        };
        let check: Arc<dyn AgentCheck> = Arc::new(check);

        let round = paused_runtime().block_on(fanout::run_round(&fleet, &check));

        prop_assert!(!round.all_ready());
        let order: Vec<&AgentHandle> = round.results().iter().map(|result| &result.agent).collect();
        prop_assert_eq!(order, fleet.iter().collect::<Vec<_>>());
        prop_assert_eq!(round.results().iter().filter(|result| !result.verdict).count(), 1);
        prop_assert!(round.summary().starts_with(fleet[failing].name()));
    }

    #[test]
    fn all_ready_agents_pass_in_any_completion_order(
        delays in prop::collection::vec(0u64..500, 0..8),
    ) {
        let fleet = agents(delays.len());
        let check = DelayedCheck {
            delays: fleet
                .iter()
                .cloned()
                .zip(delays.iter().map(|ms| Duration::from_millis(*ms)))
                .collect(),
            verdicts: HashMap::new(),
        };
        let check: Arc<dyn AgentCheck> = Arc::new(check);

        let round = paused_runtime().block_on(fanout::run_round(&fleet, &check));

        prop_assert!(round.all_ready());
        prop_assert_eq!(round.results().len(), fleet.len());
    }
}

#[tokio::test(start_paused = true)]
async fn malformed_response_is_a_false_verdict() {
    let commands = AgentCommands::default();
    let runner = Arc::new(ScriptedRunner::new());
    runner
        .respond("agent-0", &commands.endpoints, endpoints_json(&[("ready", 4021)]))
        .respond("agent-1", &commands.endpoints, "this is not json");
    let check: Arc<dyn AgentCheck> = Arc::new(EndpointsReadyCheck::new(api(runner)));

    let round = fanout::run_round(&agents(2), &check).await;

    assert!(round.results()[0].verdict);
    assert!(!round.results()[1].verdict);
    assert!(round.summary().contains("malformed"), "{}", round.summary());
}

#[tokio::test(start_paused = true)]
async fn endpoints_become_ready_across_rounds() {
    let commands = AgentCommands::default();
    let runner = Arc::new(ScriptedRunner::new());
    runner.respond("agent-0", &commands.endpoints, endpoints_json(&[("ready", 4021)]));
    runner.script(
        "agent-1",
        &commands.endpoints,
        vec![
            CommandOutput::ok(endpoints_json(&[("waiting-for-identity", 5)])),
            CommandOutput::ok(endpoints_json(&[("ready", 5)])),
            CommandOutput::ok(endpoints_json(&[("ready", 4022)])),
        ],
    );
    let check: Arc<dyn AgentCheck> = Arc::new(EndpointsReadyCheck::new(api(Arc::clone(&runner))));
    let sink = RecordingSink::default();

    fanout::wait_all(
        "waiting for agent endpoints",
        &agents(2),
        check,
        PollConfig::new(Duration::from_secs(10)).with_interval(Duration::from_secs(1)),
        &sink,
    )
    .await
    .unwrap();

    assert_eq!(runner.calls_for(&commands.endpoints), 6);
    assert!(sink.reports().is_empty());
}

#[tokio::test(start_paused = true)]
async fn timeout_reports_every_agent_and_keeps_last_summary() {
    let fleet = agents(2);
    let check = DelayedCheck {
        delays: HashMap::new(),
        verdicts: HashMap::from([(fleet[1].clone(), false)]),
    };
    let sink = RecordingSink::default();

    let error = fanout::wait_all(
        "waiting for agent endpoints",
        &fleet,
        Arc::new(check),
        PollConfig::new(Duration::from_secs(3)).with_interval(Duration::from_secs(1)),
        &sink,
    )
    .await
    .unwrap_err();

    assert!(error.is_timeout());
    assert!(error.to_string().contains("agent-1: still starting"), "{error}");
    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].0, "waiting for agent endpoints");
    assert!(reports[0].1.contains("agent-0 described"));
    assert!(reports[0].1.contains("agent-1 described"));
}
