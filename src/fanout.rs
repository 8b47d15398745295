//! One check per agent, run concurrently, verdicts ANDed.

use crate::cluster::{AgentApi, AgentHandle, ReportSink};
use crate::error::Result;
use crate::metrics::metrics;
use crate::poll::{self, PollConfig};
use async_trait::async_trait;
use futures_util::future::join_all;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadinessResult {
    pub agent: AgentHandle,
    pub verdict: bool,
    pub diagnostic: Option<String>,
}

impl ReadinessResult {
    pub fn ready(agent: AgentHandle) -> Self {
        Self {
            agent,
            verdict: true,
            diagnostic: None,
        }
    }

    pub fn not_ready(agent: AgentHandle, diagnostic: impl Into<String>) -> Self {
        Self {
            agent,
            verdict: false,
            diagnostic: Some(diagnostic.into()),
        }
    }
}

/// A per-agent check. Implementations must map every failure, malformed responses
/// included, to a `false` verdict instead of returning an error.
#[async_trait]
pub trait AgentCheck: Send + Sync + 'static {
    async fn check(&self, agent: &AgentHandle) -> ReadinessResult;

    /// Detailed state for the report emitted after the final timeout.
    async fn describe(&self, agent: &AgentHandle) -> String;
}

/// Verdicts of one round, in agent order regardless of completion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FanOutRound {
    results: Vec<ReadinessResult>,
}

impl FanOutRound {
    pub fn results(&self) -> &[ReadinessResult] {
        &self.results
    }

    pub fn all_ready(&self) -> bool {
        self.results.iter().all(|result| result.verdict)
    }

    /// One line per agent that is not ready.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for result in self.results.iter().filter(|result| !result.verdict) {
            if !out.is_empty() {
                out.push_str("; ");
            }
            let _ = write!(
                out,
                "{}: {}",
                result.agent,
                result.diagnostic.as_deref().unwrap_or("not ready")
            );
        }
        out
    }
}

/// Aborts the task when the round is dropped before it joined.
struct RoundTask(JoinHandle<ReadinessResult>);

impl Drop for RoundTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs `check` against every agent concurrently and waits for all of them. Dropping
/// the returned future aborts the checks still running.
pub async fn run_round(agents: &[AgentHandle], check: &Arc<dyn AgentCheck>) -> FanOutRound {
    let mut tasks: Vec<RoundTask> = agents
        .iter()
        .cloned()
        .map(|agent| {
            let check = Arc::clone(check);
            RoundTask(tokio::spawn(async move { check.check(&agent).await }))
        })
        .collect();
    let joined = join_all(tasks.iter_mut().map(|task| &mut task.0)).await;

    let counters = metrics();
    counters.record_fanout_round();
    let results = joined
        .into_iter()
        .zip(agents)
        .map(|(outcome, agent)| {
            let result = match outcome {
                Ok(result) => result,
                Err(err) => ReadinessResult::not_ready(agent.clone(), format!("check task failed: {err}")),
            };
            counters.record_agent_verdict(result.agent.name(), result.verdict);
            result
        })
        .collect();
    FanOutRound { results }
}

/// Repeats [`run_round`] under the poller until every agent is ready. On timeout each
/// agent is described to `sink` before the error is returned. The descriptions run
/// concurrently and each gets one poll interval.
pub async fn wait_all(
    operation: &str,
    agents: &[AgentHandle],
    check: Arc<dyn AgentCheck>,
    config: PollConfig,
    sink: &dyn ReportSink,
) -> Result<()> {
    let last = Mutex::new(None::<String>);
    let last_ref = &last;
    let round_check = Arc::clone(&check);
    let outcome = poll::execute(operation, config, move || {
        let check = Arc::clone(&round_check);
        async move {
            let round = run_round(agents, &check).await;
            let ready = round.all_ready();
            if !ready {
                tracing::info!(operation, pending = %round.summary(), "agents not ready");
                *last_ref.lock().expect("fan-out diagnostic lock poisoned") = Some(round.summary());
            }
            ready
        }
    })
    .await;

    match outcome {
        Ok(()) => Ok(()),
        Err(err) if err.is_timeout() => {
            let budget = config.pause();
            let details = join_all(agents.iter().map(|agent| {
                let check = Arc::clone(&check);
                async move {
                    timeout(budget, check.describe(agent)).await.unwrap_or_else(|_| {
                        format!(
                            "\tno response within {}",
                            humantime::format_duration(budget)
                        )
                    })
                }
            }))
            .await;
            let mut report = String::new();
            for (agent, detail) in agents.iter().zip(details) {
                let _ = writeln!(report, "agent {agent}:\n{detail}");
            }
            sink.report(operation, &report);
            let last = last
                .into_inner()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Err(err.with_last_diagnostic(last))
        }
        Err(err) => Err(err),
    }
}

/// Ready when every endpoint in the agent is `ready` with a non-init identity.
#[derive(Clone)]
pub struct EndpointsReadyCheck {
    api: AgentApi,
}

impl EndpointsReadyCheck {
    pub fn new(api: AgentApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl AgentCheck for EndpointsReadyCheck {
    async fn check(&self, agent: &AgentHandle) -> ReadinessResult {
        match self.api.endpoints(agent).await {
            Ok(endpoints) => {
                let total = endpoints.len();
                let invalid = endpoints.iter().filter(|ep| !ep.is_ready()).count();
                crate::agent_event!(
                    info,
                    "endpoints_waiting",
                    agent = agent,
                    total = total,
                    invalid = invalid
                );
                if invalid == 0 {
                    ReadinessResult::ready(agent.clone())
                } else {
                    ReadinessResult::not_ready(
                        agent.clone(),
                        format!("{invalid}/{total} endpoints not ready"),
                    )
                }
            }
            Err(err) => {
                crate::agent_event!(warn, "endpoints_unreadable", agent = agent, error = err);
                ReadinessResult::not_ready(agent.clone(), err.to_string())
            }
        }
    }

    async fn describe(&self, agent: &AgentHandle) -> String {
        match self.api.endpoints(agent).await {
            Ok(endpoints) => {
                let mut out = String::new();
                for endpoint in endpoints {
                    let _ = writeln!(
                        out,
                        "\tendpoint {}\tidentity {}\tstate {}",
                        endpoint.id, endpoint.identity, endpoint.state
                    );
                }
                out
            }
            Err(err) => format!("\terror: {err}"),
        }
    }
}
