//! Job lifecycle: plan, sequence and finalize one job.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bon::Builder;
use camino::Utf8PathBuf;
use chrono::DateTime;
use chrono::Local;
use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::instrument;
use tracing::warn;
use uuid::Uuid;

use crate::asset::AccountPolicy;
use crate::asset::AccountSelector;
use crate::asset::DEFAULT_ACCOUNT_PREFER;
use crate::db::Db;
use crate::db::DbImpl;
use crate::hooks::DefaultHooks;
use crate::hooks::JobHooks;
use crate::job::Job;
use crate::job::JobStatus;
use crate::plan::batches;
use crate::plan::PlatformGroup;
use crate::plan::DEFAULT_BULK_SIZE;
use crate::procedure::ProcedureRegistry;
use crate::runner::Runner;
use crate::scrub::Scrubber;
use crate::sequencer::RunSequencer;
use crate::sequencer::SequenceSummary;
use crate::workspace::job_root;
use crate::workspace::WorkspaceBuilder;

/// Tunables of a job run.
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct Settings {
    /// Parent of every job's runtime directory.
    #[builder(into)]
    pub runtime_root: Utf8PathBuf,
    #[builder(default = DEFAULT_BULK_SIZE)]
    pub bulk_size: NonZeroUsize,
    /// Runner invocations allowed in flight at once.
    #[builder(default = NonZeroUsize::MIN)]
    pub parallelism: NonZeroUsize,
    /// Per-batch deadline.
    pub timeout: Option<Duration>,
    /// Leaves secrets in the inventories after the run.
    #[builder(default)]
    pub debug_dev: bool,
    #[builder(default)]
    pub verbosity: u8,
    /// Login account choice when no preferred username matches.
    #[builder(default)]
    pub account_policy: AccountPolicy,
    /// Usernames tried first, in order.
    #[builder(default = DEFAULT_ACCOUNT_PREFER.iter().map(|u| (*u).to_owned()).collect())]
    pub account_prefer: Vec<String>,
}

impl Settings {
    #[must_use]
    pub fn account_selector(&self) -> AccountSelector {
        AccountSelector::new(self.account_policy, self.account_prefer.clone())
    }
}

/// Aggregate outcome of a job's hosts and batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobOutcome {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub batches_total: usize,
    pub batches_failed: usize,
    pub batches_skipped: usize,
    pub unscrubbed: usize,
}

impl JobOutcome {
    /// True when no host failed and every batch ran.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.batches_failed == 0 && self.batches_skipped == 0
    }
}

impl From<SequenceSummary> for JobOutcome {
    fn from(s: SequenceSummary) -> Self {
        Self {
            succeeded: s.tally.succeeded,
            skipped: s.tally.skipped,
            failed: s.tally.failed,
            batches_total: s.batches_total,
            batches_failed: s.batches_failed,
            batches_skipped: s.batches_skipped,
            unscrubbed: s.unscrubbed,
        }
    }
}

/// What a finished job reports. `status` says whether the pipeline completed,
/// `outcome` how the hosts fared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Job runtime directory; absent when there was nothing to run.
    pub root: Option<Utf8PathBuf>,
    pub outcome: JobOutcome,
}

/// Runs jobs with a fixed registry, runner and hook set.
#[derive(Builder)]
pub struct Manager {
    settings: Settings,
    registry: Arc<ProcedureRegistry>,
    runner: Arc<dyn Runner + Send + Sync>,
    #[builder(default = Arc::new(DefaultHooks) as Arc<dyn JobHooks>)]
    hooks: Arc<dyn JobHooks>,
    db: Option<DbImpl>,
    #[builder(default)]
    cancel: CancellationToken,
}

impl Manager {
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Token that interrupts running jobs when cancelled.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs every host of `groups` and finalizes `job`.
    ///
    /// Host failures and batch faults are reported in the outcome, not as
    /// errors.
    ///
    /// # Errors
    ///
    /// If the job runtime directory cannot be created. The job is marked
    /// failed first.
    #[instrument(skip_all, fields(job = %job.id, op = %job.op()))]
    pub async fn run(&self, job: &mut Job, groups: Vec<PlatformGroup>) -> Result<JobReport> {
        let started_at = Utc::now();
        job.date_start = Some(started_at);
        job.date_finished = None;
        job.status = JobStatus::Pending;
        self.save(job).await;

        let batches = batches(groups, self.settings.bulk_size);
        info!(name = %job.snapshot.name, batches = batches.len(), "job started");

        let mut root = None;
        let mut outcome = JobOutcome::default();
        if !batches.is_empty() {
            let dir = job_root(&self.settings.runtime_root, job, &Local::now());
            let workspaces = match WorkspaceBuilder::create(dir, job.op(), &self.registry) {
                Ok(workspaces) => {
                    workspaces.with_account_selector(self.settings.account_selector())
                }
                Err(error) => {
                    self.finish(job, JobStatus::Failed).await;
                    return Err(error);
                }
            };

            let summary = RunSequencer::builder()
                .runner(self.runner.as_ref())
                .hooks(self.hooks.as_ref())
                .scrubber(Scrubber::new(self.settings.debug_dev))
                .parallelism(self.settings.parallelism)
                .maybe_timeout(self.settings.timeout)
                .verbosity(self.settings.verbosity)
                .cancel(self.cancel.clone())
                .build()
                .run(&workspaces, &batches)
                .await;
            outcome = summary.into();
            root = Some(workspaces.root().to_owned());
        }

        let status = if outcome.unscrubbed > 0 {
            warn!(inventories = outcome.unscrubbed, "secrets left on disk");
            JobStatus::Failed
        } else {
            JobStatus::Success
        };
        let finished_at = self.finish(job, status).await;
        info!(
            %status,
            succeeded = outcome.succeeded,
            skipped = outcome.skipped,
            failed = outcome.failed,
            "job finished"
        );

        Ok(JobReport {
            job_id: job.id,
            status,
            started_at,
            finished_at,
            root,
            outcome,
        })
    }

    async fn finish(&self, job: &mut Job, status: JobStatus) -> DateTime<Utc> {
        let now = Utc::now();
        job.date_finished = Some(now);
        job.status = status;
        self.save(job).await;
        now
    }

    async fn save(&self, job: &Job) {
        let Some(db) = &self.db else {
            return;
        };
        let entry = job.entry();
        if let Err(error) = db.save_job(&entry).await {
            warn!(?error, ?entry, "failed saving job to db");
        }
    }
}
