//! Flow task spawning and the flow failure policy

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::core::constants::{
    DEFAULT_RESTART_BASE_DELAY_MS, DEFAULT_RESTART_MAX_ATTEMPTS, DEFAULT_RESTART_RESET_AFTER_SECS,
};
use crate::core::shutdown::ShutdownService;
use crate::data::signalflow::SignalFlowClient;
use crate::domain::catalog::MetricCatalog;
use crate::domain::flow::Flow;
use crate::utils::retry::{backoff_delay, retry_with_backoff_async};

use super::stats::FlowStats;
use super::supervisor::{FlowError, FlowSupervisor};

/// What the process does when a flow terminates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FlowFailurePolicy {
    /// Log and keep serving the remaining flows and the catalog
    #[default]
    KeepServing,
    /// Log and shut the process down with a non-zero exit
    Shutdown,
    /// Re-run the flow with exponential backoff, then keep serving
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Runs including the first one
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// A run that streamed this long starts a fresh attempt budget
    pub reset_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RESTART_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_RESTART_BASE_DELAY_MS,
            reset_after: Duration::from_secs(DEFAULT_RESTART_RESET_AFTER_SECS),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Supervision {
    pub on_flow_failure: FlowFailurePolicy,
    pub restart: RestartPolicy,
}

/// Spawns one supervised task per flow
pub struct FlowCoordinator {
    client: Arc<dyn SignalFlowClient>,
    catalog: Arc<MetricCatalog>,
    stats: Arc<FlowStats>,
    supervision: Supervision,
}

impl FlowCoordinator {
    pub fn new(
        client: Arc<dyn SignalFlowClient>,
        catalog: Arc<MetricCatalog>,
        stats: Arc<FlowStats>,
        supervision: Supervision,
    ) -> Self {
        Self {
            client,
            catalog,
            stats,
            supervision,
        }
    }

    /// Spawn every flow and register the tasks with the shutdown service
    pub async fn start(&self, flows: &[Arc<Flow>], shutdown: &ShutdownService) {
        for flow in flows {
            let handle = self.spawn_flow(Arc::clone(flow), shutdown.clone());
            shutdown.register(handle).await;
        }
        tracing::debug!(
            flows = flows.len(),
            client = self.client.name(),
            policy = ?self.supervision.on_flow_failure,
            "Flow tasks started"
        );
    }

    pub fn spawn_flow(&self, flow: Arc<Flow>, shutdown: ShutdownService) -> JoinHandle<()> {
        let supervisor = Arc::new(FlowSupervisor::new(
            flow,
            Arc::clone(&self.client),
            Arc::clone(&self.catalog),
            Arc::clone(&self.stats),
        ));
        tokio::spawn(supervise(supervisor, self.supervision, shutdown))
    }
}

async fn supervise(supervisor: Arc<FlowSupervisor>, supervision: Supervision, shutdown: ShutdownService) {
    let name = supervisor.flow().name().to_string();
    let mut rx = shutdown.subscribe();

    let (error, attempts) = tokio::select! {
        _ = rx.wait_for(|&v| v) => {
            tracing::debug!(flow = %name, "Flow cancelled by shutdown");
            return;
        }
        outcome = run_with_policy(&supervisor, &supervision) => outcome,
    };

    match supervision.on_flow_failure {
        FlowFailurePolicy::Shutdown => {
            tracing::error!(flow = %name, error = %error, "Flow terminated, shutting down");
            shutdown.fail(format!("flow '{}' terminated: {}", name, error));
        }
        FlowFailurePolicy::KeepServing | FlowFailurePolicy::Restart => {
            tracing::error!(
                flow = %name,
                error = %error,
                attempts,
                "Flow terminated, serving remaining flows"
            );
        }
    }
}

/// Run a flow to its final termination: `(error, runs)`
///
/// With the restart policy, a run that lasted `reset_after` ends the current
/// backoff sequence and the flow starts over with a full attempt budget.
async fn run_with_policy(
    supervisor: &Arc<FlowSupervisor>,
    supervision: &Supervision,
) -> (FlowError, u32) {
    if supervision.on_flow_failure != FlowFailurePolicy::Restart {
        return (supervisor.run().await, 1);
    }

    let policy = supervision.restart;
    let mut runs = 0u32;
    loop {
        let result = retry_with_backoff_async(policy.max_attempts, policy.base_delay_ms, || {
            let supervisor = Arc::clone(supervisor);
            async move {
                let started = Instant::now();
                let error = supervisor.run().await;
                if started.elapsed() < policy.reset_after {
                    return Err(error);
                }
                tracing::warn!(
                    flow = %supervisor.flow().name(),
                    error = %error,
                    ran_for = ?started.elapsed(),
                    "Flow terminated after a healthy run, restart attempts reset"
                );
                Ok(())
            }
        })
        .await;

        match result {
            Err((error, attempts)) => return (error, runs.saturating_add(attempts)),
            Ok(attempts) => {
                runs = runs.saturating_add(attempts);
                tokio::time::sleep(backoff_delay(policy.base_delay_ms, 1)).await;
            }
        }
    }
}
