use std::sync::Arc;

use anyhow::Result;
use bosun::hooks::DbHooks;
use bosun::job::JobFile;
use bosun::Manager;
use camino::Utf8PathBuf;
use clap::Args;
use tracing::warn;

use crate::args::GlobalArgs;
use crate::args::RunArgs;
use crate::cmd::Run;

/// Run a job file
#[derive(Debug, Args)]
pub struct RunCmd {
    /// Job file (JSON) with the job's platforms and assets
    #[clap(long, short)]
    job: Utf8PathBuf,

    /// Print the report as JSON
    #[clap(long)]
    json: bool,

    #[clap(flatten)]
    run_args: RunArgs,
}

impl Run for RunCmd {
    async fn run(&self, global: &GlobalArgs) -> Result<()> {
        let file = JobFile::load(&self.job)?;
        let mut job = file.job();
        println!("Job ID: {}", job.id);

        let db = global.get_db().await?;
        let manager = Manager::builder()
            .settings(self.run_args.settings(global.data_dir()?))
            .registry(Arc::new(self.run_args.registry()?))
            .runner(self.run_args.runner())
            .hooks(Arc::new(DbHooks::new(db.clone(), job.id.to_string())))
            .db(db)
            .build();

        let cancel = manager.cancel_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling job");
                cancel.cancel();
            }
        });

        let report = manager
            .run(&mut job, file.all_assets_group_by_platform())
            .await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            let o = &report.outcome;
            println!("Status: {}", report.status);
            if let Some(root) = &report.root {
                println!("Runtime dir: {root}");
            }
            println!(
                "Hosts: {} ok, {} skipped, {} failed",
                o.succeeded, o.skipped, o.failed
            );
            println!(
                "Batches: {} total, {} faulted, {} skipped",
                o.batches_total, o.batches_failed, o.batches_skipped
            );
        }

        Ok(())
    }
}
