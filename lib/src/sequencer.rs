//! Drives batches through the runner and reports their outcomes.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use bon::Builder;
use camino::Utf8Path;
use futures::stream;
use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::hooks::JobHooks;
use crate::plan::Batch;
use crate::reduce::dispatch;
use crate::reduce::reduce;
use crate::reduce::Tally;
use crate::runner::Callback;
use crate::runner::RunSpec;
use crate::runner::Runner;
use crate::scrub::Scrubber;
use crate::util::tokio::cancellable_timeout;
use crate::workspace::WorkspaceBuilder;

/// Counts gathered while sequencing a job's batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceSummary {
    pub tally: Tally,
    pub batches_total: usize,
    /// Batches whose run faulted, timed out, was cancelled or left secrets behind.
    pub batches_failed: usize,
    /// Batches never handed to the runner.
    pub batches_skipped: usize,
    /// Inventories that could not be scrubbed.
    pub unscrubbed: usize,
}

/// Runs batches with at most `parallelism` runner invocations in flight.
///
/// Workspaces are built one at a time, in batch order, right before their run
/// starts. Outcomes are handed to the hooks in batch order whatever the
/// parallelism.
#[derive(Builder)]
pub struct RunSequencer<'a> {
    runner: &'a (dyn Runner + Send + Sync),
    hooks: &'a dyn JobHooks,
    #[builder(default)]
    scrubber: Scrubber,
    #[builder(default = NonZeroUsize::MIN)]
    parallelism: NonZeroUsize,
    timeout: Option<Duration>,
    #[builder(default)]
    verbosity: u8,
    #[builder(default)]
    cancel: CancellationToken,
}

enum Outcome {
    Ran(Callback),
    Skipped(String),
    Faulted(anyhow::Error),
}

struct Attempt<'b> {
    batch: &'b Batch,
    excluded: Vec<(String, String)>,
    outcome: Outcome,
    unscrubbed: bool,
}

impl<'b> Attempt<'b> {
    fn skipped(
        batch: &'b Batch,
        excluded: Vec<(String, String)>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            batch,
            excluded,
            outcome: Outcome::Skipped(reason.into()),
            unscrubbed: false,
        }
    }
}

enum Prepared<'b> {
    Ready {
        batch: &'b Batch,
        excluded: Vec<(String, String)>,
        spec: RunSpec,
    },
    Done(Attempt<'b>),
}

impl RunSequencer<'_> {
    /// Attempts every batch and reports each host to the hooks.
    ///
    /// A failing batch never stops the ones after it.
    #[instrument(skip_all, fields(root = %workspaces.root(), batches = batches.len()))]
    pub async fn run(
        &self,
        workspaces: &WorkspaceBuilder<'_>,
        batches: &[Batch],
    ) -> SequenceSummary {
        let total = batches.len();
        let mut summary = SequenceSummary {
            batches_total: total,
            ..SequenceSummary::default()
        };

        let mut attempts = stream::iter(batches)
            .map(|batch| {
                let prepared = self.prepare(workspaces, batch);
                self.execute(prepared)
            })
            .buffered(self.parallelism.get());

        let mut done = 0;
        while let Some(attempt) = attempts.next().await {
            done += 1;
            let batch = attempt.batch;
            self.report(attempt, &mut summary).await;
            if total > 1 {
                info!(%batch, "finished batch {done}/{total}");
            }
        }

        summary
    }

    fn prepare<'b>(&self, workspaces: &WorkspaceBuilder<'_>, batch: &'b Batch) -> Prepared<'b> {
        if self.cancel.is_cancelled() {
            return Prepared::Done(Attempt::skipped(batch, Vec::new(), "cancelled"));
        }

        let workspace = match workspaces.build(batch) {
            Ok(workspace) => workspace,
            Err(error) => {
                error!(%batch, ?error, "unable to build workspace");
                let reason = format!("workspace build failed: {error:#}");
                let excluded = batch
                    .assets
                    .iter()
                    .map(|asset| (asset.name.clone(), reason.clone()))
                    .collect();
                return Prepared::Done(Attempt::skipped(batch, excluded, reason));
            }
        };
        debug!(%batch, dir = %workspace.dir, "workspace ready");

        let excluded = workspace.excluded();
        let Some(playbook) = workspace.playbook_path.clone() else {
            return Prepared::Done(Attempt::skipped(batch, excluded, "no playbook"));
        };
        if !workspace.has_runnable_hosts() {
            return Prepared::Done(Attempt::skipped(batch, excluded, "no runnable hosts"));
        }

        let mut spec = RunSpec {
            name: batch.name().to_owned(),
            inventory: workspace.inventory_path,
            playbook,
            workdir: workspace.dir,
            data_dir: workspaces.root().to_owned(),
            env: BTreeMap::new(),
            verbosity: self.verbosity,
        };
        self.hooks.before_run(batch, &mut spec);

        Prepared::Ready {
            batch,
            excluded,
            spec,
        }
    }

    async fn execute<'b>(&self, prepared: Prepared<'b>) -> Attempt<'b> {
        let (batch, excluded, spec) = match prepared {
            Prepared::Done(attempt) => return attempt,
            Prepared::Ready {
                batch,
                excluded,
                spec,
            } => (batch, excluded, spec),
        };

        let (outcome, unscrubbed) = self.run_batch(batch, &spec).await;
        Attempt {
            batch,
            excluded,
            outcome,
            unscrubbed,
        }
    }

    #[instrument(skip_all, fields(batch = %batch))]
    async fn run_batch(&self, batch: &Batch, spec: &RunSpec) -> (Outcome, bool) {
        info!(hosts = batch.len(), "running batch");
        let mut callback = Callback::default();
        let run =
            cancellable_timeout(self.timeout, &self.cancel, self.runner.run(spec, &mut callback))
                .await;
        let mut outcome = match run {
            Ok(Ok(())) => Outcome::Ran(callback),
            Ok(Err(error)) => Outcome::Faulted(error),
            Err(interrupted) => Outcome::Faulted(interrupted.into()),
        };

        let unscrubbed = match scrub(self.scrubber, &spec.inventory) {
            Ok(()) => false,
            Err(error) => {
                error!(?error, "unable to scrub inventory");
                if matches!(outcome, Outcome::Ran(_)) {
                    outcome = Outcome::Faulted(error);
                }
                true
            }
        };

        (outcome, unscrubbed)
    }

    async fn report(&self, attempt: Attempt<'_>, summary: &mut SequenceSummary) {
        let batch = attempt.batch;
        for (host, error) in &attempt.excluded {
            self.hooks.on_host_error(batch, host, error, &Value::Null).await;
            summary.tally.failed += 1;
        }
        if attempt.unscrubbed {
            summary.unscrubbed += 1;
        }

        match attempt.outcome {
            Outcome::Ran(callback) => {
                let result = reduce(&callback);
                let tally = dispatch(&result, batch, self.hooks).await;
                summary.tally.merge(tally);
            }
            Outcome::Skipped(reason) => {
                warn!(%batch, %reason, "batch skipped");
                summary.batches_skipped += 1;
            }
            Outcome::Faulted(error) => {
                self.hooks.on_run_failed(batch, &error).await;
                summary.batches_failed += 1;
            }
        }
    }
}

fn scrub(scrubber: Scrubber, inventory: &Utf8Path) -> Result<()> {
    scrubber
        .scrub_file(inventory)
        .with_context(|| format!("secrets left in {inventory}"))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use camino::Utf8PathBuf;

    use super::*;
    use crate::asset::Account;
    use crate::asset::Asset;
    use crate::asset::Platform;
    use crate::asset::SecretType;
    use crate::automation::OpType;
    use crate::automation::PlatformAutomation;
    use crate::hooks::test_support::RecordingHooks;
    use crate::plan::batches;
    use crate::plan::group_by_platform;
    use crate::procedure::Procedure;
    use crate::procedure::ProcedureRegistry;
    use crate::procedure::ENTRYPOINT_FILE;
    use crate::runner::test_support::ScriptedRunner;

    struct Fixture {
        _tmp: tempfile::TempDir,
        root: Utf8PathBuf,
        registry: ProcedureRegistry,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        let method = root.join("methods/posix_ping");
        fs::create_dir_all(&method).unwrap();
        fs::write(method.join(ENTRYPOINT_FILE), "- hosts: x\n  tasks: []\n").unwrap();
        let registry = [Procedure::new("posix_ping", OpType::Ping, method)]
            .into_iter()
            .collect();
        Fixture {
            _tmp: tmp,
            root,
            registry,
        }
    }

    fn asset(name: &str, platform: &str) -> Asset {
        Asset::new(name, name, "10.0.0.1", platform).with_account(Account {
            username: "root".into(),
            secret_type: SecretType::Password,
            secret: Some("hunter2".into()),
            ..Account::default()
        })
    }

    fn enabled(name: &str) -> Platform {
        Platform::new(name, PlatformAutomation::default().with(OpType::Ping, "posix_ping"))
    }

    fn plan(assets: Vec<Asset>, platforms: &[Platform], bulk: usize) -> Vec<Batch> {
        batches(
            group_by_platform(assets, platforms),
            NonZeroUsize::new(bulk).unwrap(),
        )
    }

    #[tokio::test]
    async fn run_reports_in_order() {
        let fx = fixture();
        let workspaces =
            WorkspaceBuilder::create(fx.root.join("job"), OpType::Ping, &fx.registry).unwrap();
        let batches = plan(
            vec![asset("a1", "A"), asset("bad-a2", "A"), asset("b1", "B")],
            &[enabled("A"), enabled("B")],
            1,
        );
        let runner = ScriptedRunner::default();
        let hooks = RecordingHooks::default();

        let summary = RunSequencer::builder()
            .runner(&runner)
            .hooks(&hooks)
            .build()
            .run(&workspaces, &batches)
            .await;

        assert_eq!(runner.called(), vec!["A_1", "A_2", "B_1"]);
        assert_eq!(
            hooks.events(),
            vec![
                "before A_1",
                "success A_1 a1",
                "before A_2",
                "error A_2 bad-a2: boom",
                "before B_1",
                "success B_1 b1",
            ]
        );
        assert_eq!(summary.batches_total, 3);
        assert_eq!(summary.tally, Tally { succeeded: 2, skipped: 0, failed: 1 });
        assert_eq!(runner.calls()[0].env["BOSUN_BATCH"], "A_1");
    }

    #[tokio::test]
    async fn fault_does_not_stop_later_batches() {
        let fx = fixture();
        let workspaces =
            WorkspaceBuilder::create(fx.root.join("job"), OpType::Ping, &fx.registry).unwrap();
        let batches = plan(
            vec![asset("a1", "A"), asset("a2", "A"), asset("b1", "B")],
            &[enabled("A"), enabled("B")],
            1,
        );
        let runner = ScriptedRunner::faulting(&["A_1"]);
        let hooks = RecordingHooks::default();

        let summary = RunSequencer::builder()
            .runner(&runner)
            .hooks(&hooks)
            .build()
            .run(&workspaces, &batches)
            .await;

        assert_eq!(runner.called(), vec!["A_1", "A_2", "B_1"]);
        let events = hooks.events();
        assert!(events.contains(&"failed A_1: engine crashed".to_owned()));
        assert!(events.contains(&"success A_2 a2".to_owned()));
        assert!(events.contains(&"success B_1 b1".to_owned()));
        assert_eq!(summary.batches_failed, 1);
        assert_eq!(summary.tally.succeeded, 2);
    }

    #[tokio::test]
    async fn inventory_is_scrubbed_after_run() {
        let fx = fixture();
        let workspaces =
            WorkspaceBuilder::create(fx.root.join("job"), OpType::Ping, &fx.registry).unwrap();
        let batches = plan(vec![asset("a1", "A")], &[enabled("A")], 10);
        let runner = ScriptedRunner::faulting(&["A_1"]);
        let hooks = RecordingHooks::default();

        RunSequencer::builder()
            .runner(&runner)
            .hooks(&hooks)
            .build()
            .run(&workspaces, &batches)
            .await;

        let raw = fs::read_to_string(&runner.calls()[0].inventory).unwrap();
        assert!(!raw.contains("hunter2"));
        assert!(!raw.contains("ansible_password"));
    }

    #[tokio::test]
    async fn debug_mode_keeps_secrets() {
        let fx = fixture();
        let workspaces =
            WorkspaceBuilder::create(fx.root.join("job"), OpType::Ping, &fx.registry).unwrap();
        let batches = plan(vec![asset("a1", "A")], &[enabled("A")], 10);
        let runner = ScriptedRunner::default();
        let hooks = RecordingHooks::default();

        RunSequencer::builder()
            .runner(&runner)
            .hooks(&hooks)
            .scrubber(Scrubber::new(true))
            .build()
            .run(&workspaces, &batches)
            .await;

        let raw = fs::read_to_string(&runner.calls()[0].inventory).unwrap();
        assert!(raw.contains("hunter2"));
    }

    #[tokio::test]
    async fn disabled_hosts_are_reported_not_run() {
        let fx = fixture();
        let workspaces =
            WorkspaceBuilder::create(fx.root.join("job"), OpType::Ping, &fx.registry).unwrap();
        let disabled = Platform::new(
            "B",
            PlatformAutomation::default().with_disabled(OpType::Ping, "posix_ping"),
        );
        let batches = plan(
            vec![asset("a1", "A"), asset("b1", "B")],
            &[enabled("A"), disabled],
            10,
        );
        let runner = ScriptedRunner::default();
        let hooks = RecordingHooks::default();

        let summary = RunSequencer::builder()
            .runner(&runner)
            .hooks(&hooks)
            .build()
            .run(&workspaces, &batches)
            .await;

        assert_eq!(runner.called(), vec!["A_1"]);
        assert_eq!(
            hooks.events(),
            vec!["before A_1", "success A_1 a1", "error B_1 b1: ping disabled"]
        );
        assert_eq!(summary.batches_skipped, 1);
        assert_eq!(summary.tally.failed, 1);
    }

    #[tokio::test]
    async fn timeout_is_a_fault() {
        let fx = fixture();
        let workspaces =
            WorkspaceBuilder::create(fx.root.join("job"), OpType::Ping, &fx.registry).unwrap();
        let batches = plan(
            vec![asset("a1", "A"), asset("b1", "B")],
            &[enabled("A"), enabled("B")],
            10,
        );
        let runner = ScriptedRunner::hanging(&["A_1"]);
        let hooks = RecordingHooks::default();

        let summary = RunSequencer::builder()
            .runner(&runner)
            .hooks(&hooks)
            .timeout(Duration::from_millis(20))
            .build()
            .run(&workspaces, &batches)
            .await;

        assert_eq!(summary.batches_failed, 1);
        let events = hooks.events();
        assert!(events[1].starts_with("failed A_1: timed out"));
        assert!(events.contains(&"success B_1 b1".to_owned()));
    }

    #[tokio::test]
    async fn cancel_skips_remaining_batches() {
        let fx = fixture();
        let workspaces =
            WorkspaceBuilder::create(fx.root.join("job"), OpType::Ping, &fx.registry).unwrap();
        let batches = plan(
            vec![asset("a1", "A"), asset("b1", "B")],
            &[enabled("A"), enabled("B")],
            10,
        );
        let runner = Arc::new(ScriptedRunner::hanging(&["A_1"]));
        let hooks = RecordingHooks::default();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let summary = RunSequencer::builder()
            .runner(runner.as_ref())
            .hooks(&hooks)
            .cancel(cancel)
            .build()
            .run(&workspaces, &batches)
            .await;

        assert_eq!(runner.called(), vec!["A_1"]);
        assert_eq!(summary.batches_failed, 1);
        assert_eq!(summary.batches_skipped, 1);
        assert!(!workspaces.root().join("B_1").exists());
    }

    #[tokio::test]
    async fn parallel_batches_report_in_order() {
        let fx = fixture();
        let workspaces =
            WorkspaceBuilder::create(fx.root.join("job"), OpType::Ping, &fx.registry).unwrap();
        let assets = (0..6).map(|i| asset(&format!("a{i}"), "A")).collect();
        let batches = plan(assets, &[enabled("A")], 1);
        let runner = ScriptedRunner::default();
        let hooks = RecordingHooks::default();

        let summary = RunSequencer::builder()
            .runner(&runner)
            .hooks(&hooks)
            .parallelism(NonZeroUsize::new(3).unwrap())
            .build()
            .run(&workspaces, &batches)
            .await;

        let successes: Vec<String> = hooks
            .events()
            .into_iter()
            .filter(|e| e.starts_with("success"))
            .collect();
        let should: Vec<String> = (0..6).map(|i| format!("success A_{} a{i}", i + 1)).collect();
        assert_eq!(successes, should);
        assert_eq!(summary.tally.succeeded, 6);
    }

    #[tokio::test]
    async fn parallelism_bounds_runs_in_flight() {
        for parallelism in [1, 3] {
            let fx = fixture();
            let workspaces =
                WorkspaceBuilder::create(fx.root.join("job"), OpType::Ping, &fx.registry).unwrap();
            let assets = (0..9).map(|i| asset(&format!("a{i}"), "A")).collect();
            let batches = plan(assets, &[enabled("A")], 1);
            let runner = ScriptedRunner::delayed(Duration::from_millis(30));
            let hooks = RecordingHooks::default();

            let summary = RunSequencer::builder()
                .runner(&runner)
                .hooks(&hooks)
                .parallelism(NonZeroUsize::new(parallelism).unwrap())
                .build()
                .run(&workspaces, &batches)
                .await;

            assert_eq!(summary.tally.succeeded, 9);
            assert!(runner.peak() <= parallelism, "peak {} > {parallelism}", runner.peak());
            if parallelism > 1 {
                assert!(runner.peak() > 1, "batches never overlapped");
            }
        }
    }

    #[tokio::test]
    async fn colliding_platform_names_all_run() {
        let fx = fixture();
        let workspaces =
            WorkspaceBuilder::create(fx.root.join("job"), OpType::Ping, &fx.registry).unwrap();
        let batches = plan(
            vec![asset("h1", "Windows Server"), asset("h2", "Windows_Server")],
            &[enabled("Windows Server"), enabled("Windows_Server")],
            100,
        );
        let runner = ScriptedRunner::default();
        let hooks = RecordingHooks::default();

        let summary = RunSequencer::builder()
            .runner(&runner)
            .hooks(&hooks)
            .build()
            .run(&workspaces, &batches)
            .await;

        assert_eq!(runner.called(), vec!["Windows_Server_1", "Windows_Server-2_1"]);
        assert_eq!(summary.tally.succeeded, 2);
        assert_eq!(summary.batches_skipped, 0);
        assert!(hooks.events().contains(&"success Windows_Server-2_1 h2".to_owned()));
    }

    #[tokio::test]
    async fn build_failure_reports_every_host() {
        let fx = fixture();
        let workspaces =
            WorkspaceBuilder::create(fx.root.join("job"), OpType::Ping, &fx.registry).unwrap();
        let batches = plan(
            vec![asset("a1", "A"), asset("a2", "A"), asset("b1", "B")],
            &[enabled("A"), enabled("B")],
            10,
        );
        fs::create_dir(workspaces.root().join("A_1")).unwrap();
        let runner = ScriptedRunner::default();
        let hooks = RecordingHooks::default();

        let summary = RunSequencer::builder()
            .runner(&runner)
            .hooks(&hooks)
            .build()
            .run(&workspaces, &batches)
            .await;

        assert_eq!(runner.called(), vec!["B_1"]);
        let events = hooks.events();
        assert!(events[0].starts_with("error A_1 a1: workspace build failed"));
        assert!(events[1].starts_with("error A_1 a2: workspace build failed"));
        assert_eq!(summary.tally, Tally { succeeded: 1, skipped: 0, failed: 2 });
        assert_eq!(summary.batches_skipped, 1);
    }
}
