//! Reduction of a runner callback into per-host outcomes.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::info;

use crate::hooks::JobHooks;
use crate::plan::Batch;
use crate::runner::Callback;
use crate::runner::HostState;

/// Outcome of one host in a run.
#[derive(Debug, Clone, PartialEq)]
pub enum HostOutcome {
    Succeeded(Value),
    Skipped,
    Failed { error: String, payload: Value },
}

/// Outcome of every host in a run, by host name.
pub type RunResult = BTreeMap<String, HostOutcome>;

/// Host counts by outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl Tally {
    pub fn add(&mut self, outcome: &HostOutcome) {
        match outcome {
            HostOutcome::Succeeded(_) => self.succeeded += 1,
            HostOutcome::Skipped => self.skipped += 1,
            HostOutcome::Failed { .. } => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: Tally) {
        self.succeeded += other.succeeded;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Classifies every host in the callback summary.
#[must_use]
pub fn reduce(callback: &Callback) -> RunResult {
    let mut result = RunResult::new();
    for (state, hosts) in callback.summary() {
        for (host, error) in hosts {
            let payload = callback
                .host_results()
                .get(host)
                .cloned()
                .unwrap_or(Value::Null);
            let outcome = match state {
                HostState::Ok => HostOutcome::Succeeded(payload),
                HostState::Skipped => HostOutcome::Skipped,
                HostState::Failures | HostState::Dark => HostOutcome::Failed {
                    error: error.clone().unwrap_or_else(|| format!("host {state}")),
                    payload,
                },
            };
            result.insert(host.clone(), outcome);
        }
    }
    result
}

/// Hands every outcome to the matching hook and counts them.
pub async fn dispatch(result: &RunResult, batch: &Batch, hooks: &dyn JobHooks) -> Tally {
    let mut tally = Tally::default();
    for (host, outcome) in result {
        match outcome {
            HostOutcome::Succeeded(payload) => hooks.on_host_success(batch, host, payload).await,
            HostOutcome::Skipped => {
                info!(%batch, %host, "skipped");
                hooks.on_host_skipped(batch, host).await;
            }
            HostOutcome::Failed { error, payload } => {
                hooks.on_host_error(batch, host, error, payload).await;
            }
        }
        tally.add(outcome);
    }
    tally
}
