use std::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use bosun::asset::AccountPolicy;
use bosun::procedure::ProcedureRegistry;
use bosun::runner::DryRunRunner;
use bosun::runner::PlaybookRunner;
use bosun::runner::RunnerImpl;
use bosun::Settings;
use camino::Utf8PathBuf;
use clap::ArgAction;
use clap::Args;

const HEADING: Option<&str> = Some("Run Options");

/// Arguments that shape how jobs are executed.
#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    /// Directory holding one subdirectory per method, each with a manifest.yml
    #[clap(long, env = "BOSUN_METHODS_DIR", default_value = "methods", help_heading = HEADING)]
    pub methods_dir: Utf8PathBuf,

    /// Root of job runtime directories [default: <data-dir>/ansible]
    #[clap(long, env = "BOSUN_RUNTIME_DIR", help_heading = HEADING)]
    pub runtime_dir: Option<Utf8PathBuf>,

    /// Maximum number of targets per batch
    #[clap(long, default_value = "100", help_heading = HEADING)]
    pub bulk_size: NonZeroUsize,

    /// Number of batches run at once
    #[clap(long, default_value = "1", help_heading = HEADING)]
    pub parallelism: NonZeroUsize,

    /// Time allowed for each batch
    #[clap(long, help_heading = HEADING)]
    pub timeout: Option<humantime::Duration>,

    /// Keep secrets in generated inventories for troubleshooting
    #[clap(long, env = "BOSUN_DEBUG_DEV", help_heading = HEADING)]
    pub debug_dev: bool,

    /// Runner executable
    #[clap(
        long,
        env = "BOSUN_RUNNER_BIN",
        default_value = "ansible-playbook",
        help_heading = HEADING
    )]
    pub runner_bin: String,

    /// Build workspaces without contacting any target
    #[clap(long, help_heading = HEADING)]
    pub dry_run: bool,

    /// Login account choice when no preferred username matches
    #[clap(
        long,
        env = "BOSUN_ACCOUNT_POLICY",
        default_value_t = AccountPolicy::PrivilegedFirst,
        help_heading = HEADING
    )]
    pub account_policy: AccountPolicy,

    /// Usernames tried first when choosing a login account
    #[clap(
        long,
        env = "BOSUN_ACCOUNT_PREFER",
        value_delimiter = ',',
        default_value = "root,Administrator",
        help_heading = HEADING
    )]
    pub account_prefer: Vec<String>,

    /// Runner verbosity, repeat for more
    #[clap(short, long, action = ArgAction::Count, help_heading = HEADING)]
    pub verbose: u8,
}

impl RunArgs {
    /// Loads every method manifest.
    pub fn registry(&self) -> Result<ProcedureRegistry> {
        ProcedureRegistry::load_dir(&self.methods_dir)
            .with_context(|| format!("unable to load methods from {}", self.methods_dir))
    }

    pub fn runner(&self) -> Arc<RunnerImpl> {
        let runner: RunnerImpl = if self.dry_run {
            DryRunRunner.into()
        } else {
            PlaybookRunner::new(&self.runner_bin).into()
        };
        Arc::new(runner)
    }

    pub fn settings(&self, data_dir: Utf8PathBuf) -> Settings {
        let runtime_root = self
            .runtime_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("ansible"));
        Settings::builder()
            .runtime_root(runtime_root)
            .bulk_size(self.bulk_size)
            .parallelism(self.parallelism)
            .maybe_timeout(self.timeout.map(Into::into))
            .debug_dev(self.debug_dev)
            .verbosity(self.verbose)
            .account_policy(self.account_policy)
            .account_prefer(self.account_prefer.clone())
            .build()
    }
}
