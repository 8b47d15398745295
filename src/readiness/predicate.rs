use crate::cluster::{PodPhase, PodRecord};

const INIT_COMPLETED_REASON: &str = "Completed";

/// Classifies a single pod. Waiters take the condition as a strategy so the same wait
/// loop serves every readiness flavour.
pub trait PodCondition: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_satisfied(&self, pod: &PodRecord) -> bool;
}

/// Phase is Running and the pod is not being deleted.
pub fn is_running(pod: &PodRecord) -> bool {
    pod.phase == PodPhase::Running && !pod.deletion_pending
}

/// Running, and every container reports ready.
pub fn is_ready(pod: &PodRecord) -> bool {
    is_running(pod) && pod.containers.iter().all(|container| container.ready)
}

/// Every init container terminated with reason `Completed` and exit code 0.
pub fn init_completed(pod: &PodRecord) -> bool {
    pod.init_containers.iter().all(|init| {
        matches!(
            &init.terminated,
            Some((reason, 0)) if reason == INIT_COMPLETED_REASON
        )
    })
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Running;

impl PodCondition for Running {
    fn name(&self) -> &'static str {
        "running"
    }

    fn is_satisfied(&self, pod: &PodRecord) -> bool {
        is_running(pod)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Ready;

impl PodCondition for Ready {
    fn name(&self) -> &'static str {
        "ready"
    }

    fn is_satisfied(&self, pod: &PodRecord) -> bool {
        is_ready(pod)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct InitCompleted;

impl PodCondition for InitCompleted {
    fn name(&self) -> &'static str {
        "init-completed"
    }

    fn is_satisfied(&self, pod: &PodRecord) -> bool {
        init_completed(pod)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ContainerState, InitContainerState};

    fn pod(phase: PodPhase, ready: &[bool]) -> PodRecord {
        PodRecord {
            namespace: "default".to_string(),
            name: "web-0".to_string(),
            node: None,
            phase,
            deletion_pending: false,
            containers: ready
                .iter()
                .enumerate()
                .map(|(idx, ready)| ContainerState {
                    name: format!("c{idx}"),
                    ready: *ready,
                })
                .collect(),
            init_containers: Vec::new(),
        }
    }

    #[test]
    fn terminating_pod_is_not_running() {
        let mut record = pod(PodPhase::Running, &[true]);
        assert!(is_running(&record));
        record.deletion_pending = true;
        assert!(!is_running(&record));
        assert!(!is_ready(&record));
    }

    #[test]
    fn ready_requires_every_container() {
        assert!(is_ready(&pod(PodPhase::Running, &[true, true])));
        assert!(!is_ready(&pod(PodPhase::Running, &[true, false])));
        assert!(!is_ready(&pod(PodPhase::Pending, &[true])));
    }

    #[test]
    fn init_completion_checks_reason_and_exit_code() {
        let mut record = pod(PodPhase::Running, &[]);
        record.init_containers = vec![InitContainerState {
            name: "mount-bpf".to_string(),
            terminated: Some(("Completed".to_string(), 0)),
        }];
        assert!(init_completed(&record));

        record.init_containers[0].terminated = Some(("Error".to_string(), 0));
        assert!(!init_completed(&record));
        record.init_containers[0].terminated = Some(("Completed".to_string(), 1));
        assert!(!init_completed(&record));
        record.init_containers[0].terminated = None;
        assert!(!init_completed(&record));
    }
}
