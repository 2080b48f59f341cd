//! Boundary to the external automation runner.

mod dry_run;
mod playbook;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use camino::Utf8PathBuf;
use enum_dispatch::enum_dispatch;
use serde_json::Value;
use strum::Display;

pub use self::dry_run::DryRunRunner;
pub use self::playbook::PlaybookRunner;

/// Everything the runner needs for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    /// Batch name, for logs.
    pub name: String,
    pub inventory: Utf8PathBuf,
    pub playbook: Utf8PathBuf,
    /// Batch workspace; the runner's working directory.
    pub workdir: Utf8PathBuf,
    /// Job runtime root, shared by all batches of a job.
    pub data_dir: Utf8PathBuf,
    /// Extra environment for the runner process.
    pub env: BTreeMap<String, String>,
    pub verbosity: u8,
}

/// Final state of a host in a run, as reported by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum HostState {
    Ok,
    Skipped,
    /// A task failed on the host.
    Failures,
    /// The host could not be reached.
    Dark,
}

impl HostState {
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(self, HostState::Failures | HostState::Dark)
    }
}

/// Sink for per-host events emitted while a run progresses.
///
/// The last state reported for a host wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Callback {
    summary: BTreeMap<HostState, BTreeMap<String, Option<String>>>,
    host_results: BTreeMap<String, Value>,
}

impl Callback {
    pub fn host_ok(&mut self, host: &str, result: Value) {
        self.record(HostState::Ok, host, None, result);
    }

    pub fn host_skipped(&mut self, host: &str, result: Value) {
        self.record(HostState::Skipped, host, None, result);
    }

    pub fn host_failed(&mut self, host: &str, error: impl Into<String>, result: Value) {
        self.record(HostState::Failures, host, Some(error.into()), result);
    }

    pub fn host_unreachable(&mut self, host: &str, error: impl Into<String>, result: Value) {
        self.record(HostState::Dark, host, Some(error.into()), result);
    }

    fn record(&mut self, state: HostState, host: &str, error: Option<String>, result: Value) {
        for hosts in self.summary.values_mut() {
            hosts.remove(host);
        }
        self.summary
            .entry(state)
            .or_default()
            .insert(host.to_owned(), error);
        self.host_results.insert(host.to_owned(), result);
    }

    /// Hosts by final state, with the error reported for failure states.
    #[must_use]
    pub fn summary(&self) -> &BTreeMap<HostState, BTreeMap<String, Option<String>>> {
        &self.summary
    }

    /// Detailed result payload per host.
    #[must_use]
    pub fn host_results(&self) -> &BTreeMap<String, Value> {
        &self.host_results
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.host_results.is_empty()
    }
}

/// Executes a batch's playbook against its inventory.
///
/// Per-host failures are reported through the [`Callback`]; an `Err` means the
/// run itself could not be carried out.
#[async_trait]
#[enum_dispatch]
pub trait Runner {
    async fn run(&self, spec: &RunSpec, callback: &mut Callback) -> Result<()>;
}

/// All runner implementations.
#[enum_dispatch(Runner)]
#[derive(Debug, Clone)]
pub enum RunnerImpl {
    Playbook(PlaybookRunner),
    DryRun(DryRunRunner),
}


#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeSet;
    use std::fs;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::bail;
    use anyhow::Context;
    use serde_json::json;

    use super::*;

    /// Runner with behavior scripted per batch name. Hosts whose name starts
    /// with `bad` fail, every other inventory host succeeds.
    #[derive(Debug, Default)]
    pub struct ScriptedRunner {
        pub faults: BTreeSet<String>,
        pub hangs: BTreeSet<String>,
        /// Time every run takes before reporting.
        pub delay: Duration,
        calls: Mutex<Vec<RunSpec>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    struct InFlight<'a>(&'a AtomicUsize);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl ScriptedRunner {
        pub fn faulting(batches: &[&str]) -> Self {
            Self {
                faults: batches.iter().map(|b| (*b).to_owned()).collect(),
                ..Self::default()
            }
        }

        pub fn hanging(batches: &[&str]) -> Self {
            Self {
                hangs: batches.iter().map(|b| (*b).to_owned()).collect(),
                ..Self::default()
            }
        }

        pub fn delayed(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        /// Most runs seen in flight at once.
        pub fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }

        pub fn calls(&self) -> Vec<RunSpec> {
            self.calls.lock().unwrap().clone()
        }

        pub fn called(&self) -> Vec<String> {
            self.calls().into_iter().map(|spec| spec.name).collect()
        }
    }

    #[async_trait]
    impl Runner for ScriptedRunner {
        async fn run(&self, spec: &RunSpec, callback: &mut Callback) -> Result<()> {
            self.calls.lock().unwrap().push(spec.clone());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let _in_flight = InFlight(&self.in_flight);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.faults.contains(&spec.name) {
                bail!("engine crashed");
            }
            if self.hangs.contains(&spec.name) {
                std::future::pending::<()>().await;
            }

            let raw = fs::read(&spec.inventory)?;
            let doc: Value = serde_json::from_slice(&raw)?;
            let hosts = doc["all"]["hosts"].as_object().context("no hosts")?;
            for (host, vars) in hosts {
                if host.starts_with("bad") {
                    callback.host_failed(host, "boom", json!({"msg": "boom", "secret": "leak"}));
                } else {
                    callback.host_ok(host, json!({"changed": false, "ping": "pong", "vars": vars}));
                }
            }
            Ok(())
        }
    }
}
