mod sqlite;

use anyhow::bail;
use anyhow::Result;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use enum_dispatch::enum_dispatch;

pub use self::sqlite::SqliteDb;

#[async_trait]
#[enum_dispatch]
pub trait Db {
    // Required

    /// Inserts or updates a [`JobEntry`].
    async fn save_job(&self, entry: &JobEntry) -> Result<()>;

    /// Loads a [`JobEntry`] by id.
    async fn load_job(&self, job_id: &str) -> Result<Option<JobEntry>>;

    /// Saves a [`ResultEntry`] to the database.
    async fn save_result(&self, entry: &ResultEntry) -> Result<()>;

    /// Loads every [`ResultEntry`] of a job, in insertion order.
    async fn load_results(&self, job_id: &str) -> Result<Vec<ResultEntry>>;

    // Defaults

    /// Migrates the database to the newest schema.
    ///
    /// By default this does nothing. Override this if needed.
    async fn migrate(&self) -> Result<()> {
        Ok(())
    }
}

#[enum_dispatch(Db)]
#[derive(Debug, Clone)]
pub enum DbImpl {
    Sqlite(SqliteDb),
}

impl DbImpl {
    /// # Errors
    ///
    /// If any db connection fails.
    pub async fn try_new(connection_string: &str) -> Result<Self> {
        if connection_string.contains("sqlite") || connection_string.contains(".db") {
            let db = SqliteDb::try_new(connection_string).await?;
            return Ok(db.into());
        }

        bail!("unable to build a db impl");
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, sqlx::FromRow)]
pub struct JobEntry {
    pub id: String,
    pub name: String,
    pub op: String,
    pub status: String,
    pub date_start: Option<DateTime<Utc>>,
    pub date_finished: Option<DateTime<Utc>>,
}

/// Outcome of one target in a job.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, sqlx::FromRow)]
pub struct ResultEntry {
    pub job_id: String,
    pub batch: String,
    pub target: String,
    pub state: String,
    pub error: Option<String>,
    /// Runner payload as JSON, with secrets removed.
    pub payload: Option<String>,
}
