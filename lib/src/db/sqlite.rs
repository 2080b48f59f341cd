use std::str::FromStr;

use anyhow::Context;
use anyhow::Result;
use bon::Builder;
use futures::StreamExt;
use sqlx::migrate;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::sqlite::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::error;

use super::Db;
use super::JobEntry;
use super::ResultEntry;

/// `SQLite` persistence layer.
#[derive(Debug, Clone, Builder)]
pub struct SqliteDb {
    #[builder(into)]
    url: String,
    #[builder(skip)]
    pool: Option<SqlitePool>,
}

impl SqliteDb {
    /// Returns a connection to the database with migrations having been run.
    ///
    /// # Errors
    ///
    /// - If connect fails
    /// - If schema migration fails
    pub async fn try_new(url: &str) -> Result<Self> {
        let db = Self::builder().url(url).build().connect().await?;
        db.migrate().await?;
        Ok(db)
    }

    /// Connect to the database.
    ///
    /// # Errors
    ///
    /// - If connect fails
    pub async fn connect(mut self) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(&self.url)?.create_if_missing(true);
        let mut pool_opts = SqlitePoolOptions::new();
        // Every connection to an in-memory database is its own database.
        if self.url.contains(":memory:") {
            pool_opts = pool_opts.max_connections(1);
        }
        let pool = pool_opts.connect_with(opts).await?;
        self.pool = Some(pool);
        Ok(self)
    }

    fn pool(&self) -> Result<SqlitePool> {
        self.pool.clone().context("SqlitePool not yet connected")
    }
}

#[async_trait::async_trait]
impl Db for SqliteDb {
    async fn migrate(&self) -> Result<()> {
        migrate!("migrations/sqlite")
            .run(&self.pool()?)
            .await
            .map_err(anyhow::Error::from)
    }

    async fn save_job(&self, entry: &JobEntry) -> Result<()> {
        sqlx::query(
            r"INSERT INTO jobs (id, name, op, status, date_start, date_finished) VALUES (?, ?, ?, ?, ?, ?)
              ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                op = excluded.op,
                status = excluded.status,
                date_start = excluded.date_start,
                date_finished = excluded.date_finished",
        )
        .bind(&entry.id)
        .bind(&entry.name)
        .bind(&entry.op)
        .bind(&entry.status)
        .bind(entry.date_start)
        .bind(entry.date_finished)
        .execute(&self.pool()?)
        .await?;
        Ok(())
    }

    async fn load_job(&self, job_id: &str) -> Result<Option<JobEntry>> {
        let entry = sqlx::query_as::<_, JobEntry>(
            r"SELECT id, name, op, status, date_start, date_finished FROM jobs WHERE id = ?",
        )
        .bind(job_id)
        .fetch_optional(&self.pool()?)
        .await?;
        Ok(entry)
    }

    async fn save_result(&self, entry: &ResultEntry) -> Result<()> {
        sqlx::query(
            r"INSERT INTO results (job_id, batch, target, state, error, payload) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.job_id)
        .bind(&entry.batch)
        .bind(&entry.target)
        .bind(&entry.state)
        .bind(&entry.error)
        .bind(&entry.payload)
        .execute(&self.pool()?)
        .await?;
        Ok(())
    }

    async fn load_results(&self, job_id: &str) -> Result<Vec<ResultEntry>> {
        let pool = self.pool()?;

        let mut stream = sqlx::query_as::<_, ResultEntry>(
            r"SELECT job_id, batch, target, state, error, payload FROM results WHERE job_id = ? ORDER BY rowid",
        )
        .bind(job_id)
        .fetch(&pool);

        let mut entries = Vec::new();
        while let Some(entry) = stream.next().await {
            match entry {
                Ok(e) => entries.push(e),
                Err(error) => error!(?error, "row error in load_results"),
            }
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use chrono::Utc;

    use super::*;

    #[tokio::test]
    async fn save_load_results_works() {
        let db = SqliteDb::try_new("sqlite::memory:").await.unwrap();

        let entry_foo = ResultEntry {
            job_id: "0".into(),
            batch: "Linux_1".into(),
            target: "foo".into(),
            state: "ok".into(),
            error: None,
            payload: Some(r#"{"ping":"pong"}"#.into()),
        };
        let entry_bar = ResultEntry {
            job_id: "0".into(),
            batch: "Linux_1".into(),
            target: "bar".into(),
            state: "failed".into(),
            error: Some("boom".into()),
            payload: None,
        };
        let entry_quux = ResultEntry {
            job_id: "1".into(),
            batch: "Windows_1".into(),
            target: "quux".into(),
            state: "skipped".into(),
            error: None,
            payload: None,
        };

        db.save_result(&entry_foo).await.unwrap();
        db.save_result(&entry_bar).await.unwrap();
        db.save_result(&entry_quux).await.unwrap();

        let entries = db.load_results("0").await.unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], entry_foo);
        assert_eq!(entries[1], entry_bar);
    }

    #[tokio::test]
    async fn save_job_upserts() {
        let db = SqliteDb::try_new("sqlite::memory:").await.unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();

        let mut entry = JobEntry {
            id: "j1".into(),
            name: "nightly ping".into(),
            op: "ping".into(),
            status: "pending".into(),
            date_start: Some(start),
            date_finished: None,
        };
        db.save_job(&entry).await.unwrap();
        entry.status = "success".into();
        entry.date_finished = Some(start);
        db.save_job(&entry).await.unwrap();

        assert_eq!(db.load_job("j1").await.unwrap(), Some(entry));
        assert_eq!(db.load_job("nope").await.unwrap(), None);
    }
}
