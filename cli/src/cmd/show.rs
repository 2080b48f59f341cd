use anyhow::Context;
use anyhow::Result;
use bosun::db::Db;
use clap::Args;
use tabled::settings::Style;
use tabled::Table;
use tabled::Tabled;
use uuid::Uuid;

use crate::args::GlobalArgs;
use crate::cmd::Run;

/// Show recorded outcomes of a job
#[derive(Debug, Args)]
pub struct ShowCmd {
    /// Job ID printed by `run`
    job_id: Uuid,

    /// Also print runner payloads
    #[clap(long)]
    payload: bool,
}

#[derive(Tabled)]
struct Row {
    batch: String,
    target: String,
    state: String,
    error: String,
}

impl Run for ShowCmd {
    async fn run(&self, global: &GlobalArgs) -> Result<()> {
        let db = global.get_db().await?;
        let job_id = self.job_id.to_string();

        let job = db
            .load_job(&job_id)
            .await?
            .with_context(|| format!("no job with id {job_id}"))?;
        let results = db.load_results(&job_id).await?;

        println!("Job: {} ({}) {}", job.name, job.op, job.status);
        if let (Some(start), Some(finish)) = (job.date_start, job.date_finished) {
            println!("Ran: {start} .. {finish}");
        }

        if self.payload {
            for r in &results {
                println!("{} {}: {}", r.batch, r.target, r.payload.as_deref().unwrap_or("-"));
            }
            return Ok(());
        }

        let rows = results.into_iter().map(|r| Row {
            batch: r.batch,
            target: r.target,
            state: r.state,
            error: r.error.unwrap_or_default(),
        });
        println!("{}", Table::new(rows).with(Style::sharp()));
        Ok(())
    }
}
