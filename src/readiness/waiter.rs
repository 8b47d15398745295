use crate::cluster::{ClusterLister, PodRecord, Scope};
use crate::error::Result;
use crate::poll::{self, PollConfig};
use crate::readiness::{InitCompleted, PodCondition, Ready, Running};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

/// Outcome of classifying one listing of a collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitProgress {
    pub satisfied: usize,
    pub required: usize,
    pub total: usize,
}

impl WaitProgress {
    pub fn is_done(&self) -> bool {
        self.total >= self.required && self.satisfied >= self.required
    }
}

impl fmt::Display for WaitProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} satisfied ({} listed)",
            self.satisfied, self.required, self.total
        )
    }
}

/// Counts the pods satisfying `condition`. With `minimum_required == 0` the bar is the
/// size of this listing, so a growing collection raises it.
pub fn evaluate(
    pods: &[PodRecord],
    condition: &dyn PodCondition,
    minimum_required: usize,
) -> WaitProgress {
    let required = if minimum_required > 0 {
        minimum_required
    } else {
        pods.len()
    };
    WaitProgress {
        satisfied: pods.iter().filter(|pod| condition.is_satisfied(pod)).count(),
        required,
        total: pods.len(),
    }
}

/// Applies a pod condition across a re-listed collection under the poller.
pub struct CollectionWaiter<'a> {
    lister: &'a dyn ClusterLister,
    interval: Duration,
}

impl<'a> CollectionWaiter<'a> {
    pub fn new(lister: &'a dyn ClusterLister, interval: Duration) -> Self {
        Self { lister, interval }
    }

    fn config(&self, timeout: Duration) -> PollConfig {
        PollConfig::new(timeout).with_interval(self.interval)
    }

    /// Waits until enough pods in `scope` satisfy `condition`. Listing failures count as
    /// "not yet" and only surface through the timeout's last diagnostic.
    pub async fn wait(
        &self,
        scope: &Scope,
        condition: &dyn PodCondition,
        minimum_required: usize,
        timeout: Duration,
    ) -> Result<()> {
        let operation = format!("waiting for {} pods in {scope}", condition.name());
        self.poll_pods(&operation, scope, timeout, move |pods| {
            let progress = evaluate(pods, condition, minimum_required);
            if progress.is_done() {
                Ok(())
            } else {
                Err(progress.to_string())
            }
        })
        .await
    }

    pub async fn wait_for_ready(
        &self,
        scope: &Scope,
        minimum_required: usize,
        timeout: Duration,
    ) -> Result<()> {
        self.wait(scope, &Ready, minimum_required, timeout).await
    }

    pub async fn wait_for_running(
        &self,
        scope: &Scope,
        minimum_required: usize,
        timeout: Duration,
    ) -> Result<()> {
        self.wait(scope, &Running, minimum_required, timeout).await
    }

    /// Waits until no pod anywhere carries a pending deletion.
    pub async fn wait_for_terminating_cleared(&self, timeout: Duration) -> Result<()> {
        let scope = Scope::all();
        self.poll_pods("waiting for terminating pods", &scope, timeout, |pods| {
            let terminating: Vec<&str> = pods
                .iter()
                .filter(|pod| pod.deletion_pending)
                .map(|pod| pod.name.as_str())
                .collect();
            if terminating.is_empty() {
                Ok(())
            } else {
                Err(format!("still terminating: {}", terminating.join(", ")))
            }
        })
        .await
    }

    /// Waits until at least one pod exists in `scope` and all their init containers
    /// completed cleanly.
    pub async fn wait_for_init_completed(&self, scope: &Scope, timeout: Duration) -> Result<()> {
        let operation = format!("waiting for init containers in {scope}");
        self.poll_pods(&operation, scope, timeout, |pods| {
            if pods.is_empty() {
                return Err("no pods listed".to_string());
            }
            let pending: Vec<&str> = pods
                .iter()
                .filter(|pod| !InitCompleted.is_satisfied(pod))
                .map(|pod| pod.name.as_str())
                .collect();
            if pending.is_empty() {
                Ok(())
            } else {
                Err(format!("init pending on {}", pending.join(", ")))
            }
        })
        .await
    }

    /// Waits until the named service's endpoints expose at least one port. The endpoints
    /// object is looked up by exact namespace and name; no label selector applies.
    pub async fn wait_for_service_endpoints(
        &self,
        namespace: &str,
        service: &str,
        timeout: Duration,
    ) -> Result<()> {
        let operation = format!("waiting for endpoints of {namespace}/{service}");
        let last = Mutex::new(None::<String>);
        let lister = self.lister;
        let last_ref = &last;
        let outcome = poll::execute(&operation, self.config(timeout), move || async move {
            match lister.list_endpoints().await {
                Ok(endpoints) => {
                    let ready = endpoints
                        .iter()
                        .find(|record| record.namespace == namespace && record.name == service)
                        .and_then(|record| record.first_port())
                        .is_some();
                    if !ready {
                        remember(last_ref, "no endpoint port published yet".to_string());
                    }
                    ready
                }
                Err(err) => {
                    tracing::debug!(namespace, service, error = %err, "endpoint listing failed");
                    remember(last_ref, err.to_string());
                    false
                }
            }
        })
        .await;
        outcome.map_err(|err| err.with_last_diagnostic(take(last)))
    }

    /// Waits until every node carries a non-empty value for `annotation`.
    pub async fn wait_for_node_annotations(
        &self,
        annotation: &str,
        timeout: Duration,
    ) -> Result<()> {
        let operation = format!("waiting for node annotation {annotation}");
        let last = Mutex::new(None::<String>);
        let lister = self.lister;
        let last_ref = &last;
        let outcome = poll::execute(&operation, self.config(timeout), move || async move {
            match lister.list_nodes().await {
                Ok(nodes) => {
                    let missing: Vec<&str> = nodes
                        .iter()
                        .filter(|node| {
                            node.annotations
                                .get(annotation)
                                .map(|value| value.is_empty())
                                .unwrap_or(true)
                        })
                        .map(|node| node.name.as_str())
                        .collect();
                    if missing.is_empty() {
                        true
                    } else {
                        remember(last_ref, format!("missing on {}", missing.join(", ")));
                        false
                    }
                }
                Err(err) => {
                    tracing::debug!(annotation, error = %err, "node listing failed");
                    remember(last_ref, err.to_string());
                    false
                }
            }
        })
        .await;
        outcome.map_err(|err| err.with_last_diagnostic(take(last)))
    }

    async fn poll_pods<J>(
        &self,
        operation: &str,
        scope: &Scope,
        timeout: Duration,
        judge: J,
    ) -> Result<()>
    where
        J: Fn(&[PodRecord]) -> std::result::Result<(), String> + Send + Sync,
    {
        let last = Mutex::new(None::<String>);
        let lister = self.lister;
        let last_ref = &last;
        let judge = &judge;
        let outcome = poll::execute(operation, self.config(timeout), move || async move {
            match lister.list_pods(scope).await {
                Ok(pods) => match judge(pods.as_slice()) {
                    Ok(()) => true,
                    Err(progress) => {
                        tracing::debug!(filter = %scope, progress = %progress, "collection not ready");
                        remember(last_ref, progress);
                        false
                    }
                },
                Err(err) => {
                    tracing::debug!(filter = %scope, error = %err, "pod listing failed");
                    remember(last_ref, err.to_string());
                    false
                }
            }
        })
        .await;
        outcome.map_err(|err| err.with_last_diagnostic(take(last)))
    }
}

fn remember(slot: &Mutex<Option<String>>, diagnostic: String) {
    *slot.lock().expect("diagnostic lock poisoned") = Some(diagnostic);
}

fn take(slot: Mutex<Option<String>>) -> Option<String> {
    slot.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
}
