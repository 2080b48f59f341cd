//! Caller-supplied policy around the orchestration core.

use async_trait::async_trait;
use serde_json::Value;
use tracing::error;
use tracing::warn;

use crate::db::Db;
use crate::db::DbImpl;
use crate::db::ResultEntry;
use crate::plan::Batch;
use crate::runner::RunSpec;
use crate::scrub::delete_keys;
use crate::scrub::DENYLIST;

/// Extension points invoked while a job runs. Every method has a default, so
/// implementors only override what their use case needs (for example,
/// recording a rotated password on success).
///
/// With parallel batches the `before_run` hook may be called from several
/// tasks at once; the host and failure hooks are always called one at a time,
/// in batch order.
#[async_trait]
pub trait JobHooks: Send + Sync {
    /// Called right before a batch is handed to the runner. May alter the run.
    fn before_run(&self, _batch: &Batch, _spec: &mut RunSpec) {}

    async fn on_host_success(&self, _batch: &Batch, _host: &str, _result: &Value) {}

    async fn on_host_skipped(&self, _batch: &Batch, _host: &str) {}

    async fn on_host_error(&self, batch: &Batch, host: &str, error: &str, _result: &Value) {
        warn!(%batch, %host, %error, "host error");
    }

    /// Called when a batch could not be run at all.
    async fn on_run_failed(&self, batch: &Batch, error: &anyhow::Error) {
        error!(%batch, ?error, "runner failed");
    }
}

/// Hooks with only the default behavior: log errors, nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl JobHooks for DefaultHooks {}

/// Records every host outcome in the database.
#[derive(Clone)]
pub struct DbHooks {
    db: DbImpl,
    job_id: String,
}

impl DbHooks {
    pub fn new(db: DbImpl, job_id: impl Into<String>) -> Self {
        Self {
            db,
            job_id: job_id.into(),
        }
    }

    async fn save(
        &self,
        batch: &Batch,
        host: &str,
        state: &str,
        error: Option<&str>,
        result: Option<&Value>,
    ) {
        let payload = result.filter(|r| !r.is_null()).map(|r| {
            let mut r = r.clone();
            delete_keys(&mut r, DENYLIST);
            r.to_string()
        });
        let entry = ResultEntry {
            job_id: self.job_id.clone(),
            batch: batch.name().to_owned(),
            target: host.to_owned(),
            state: state.to_owned(),
            error: error.map(ToOwned::to_owned),
            payload,
        };
        if let Err(error) = self.db.save_result(&entry).await {
            warn!(?error, ?entry, "failed saving result to db");
        }
    }
}

#[async_trait]
impl JobHooks for DbHooks {
    async fn on_host_success(&self, batch: &Batch, host: &str, result: &Value) {
        self.save(batch, host, "ok", None, Some(result)).await;
    }

    async fn on_host_skipped(&self, batch: &Batch, host: &str) {
        self.save(batch, host, "skipped", None, None).await;
    }

    async fn on_host_error(&self, batch: &Batch, host: &str, error: &str, result: &Value) {
        warn!(%batch, %host, %error, "host error");
        self.save(batch, host, "failed", Some(error), Some(result)).await;
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use super::*;

    /// Remembers every hook call as a line of text.
    #[derive(Debug, Default)]
    pub struct RecordingHooks {
        events: Mutex<Vec<String>>,
    }

    impl RecordingHooks {
        pub fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[async_trait]
    impl JobHooks for RecordingHooks {
        fn before_run(&self, batch: &Batch, spec: &mut RunSpec) {
            spec.env.insert("BOSUN_BATCH".into(), batch.name().to_owned());
            self.push(format!("before {}", batch.name()));
        }

        async fn on_host_success(&self, batch: &Batch, host: &str, _result: &Value) {
            self.push(format!("success {} {host}", batch.name()));
        }

        async fn on_host_skipped(&self, batch: &Batch, host: &str) {
            self.push(format!("skipped {} {host}", batch.name()));
        }

        async fn on_host_error(&self, batch: &Batch, host: &str, error: &str, _result: &Value) {
            self.push(format!("error {} {host}: {error}", batch.name()));
        }

        async fn on_run_failed(&self, batch: &Batch, error: &anyhow::Error) {
            self.push(format!("failed {}: {error}", batch.name()));
        }
    }
}
