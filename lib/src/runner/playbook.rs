use std::collections::BTreeMap;
use std::process::Stdio;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;
use tracing::instrument;

use super::Callback;
use super::RunSpec;
use super::Runner;

/// `ansible-playbook` exit codes that still carry a per-host report: success,
/// some hosts failed, some hosts unreachable.
const REPORTED_EXIT_CODES: &[i32] = &[0, 2, 4];

/// Drives `ansible-playbook` with the JSON stdout callback and feeds its final
/// report into the [`Callback`].
#[derive(Debug, Clone)]
pub struct PlaybookRunner {
    bin: String,
}

impl Default for PlaybookRunner {
    fn default() -> Self {
        Self::new("ansible-playbook")
    }
}

impl PlaybookRunner {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    fn command(&self, spec: &RunSpec) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("-i")
            .arg(spec.inventory.as_str())
            .arg(spec.playbook.as_str())
            .current_dir(spec.workdir.as_std_path())
            .env("ANSIBLE_STDOUT_CALLBACK", "json")
            .env("ANSIBLE_LOAD_CALLBACK_PLUGINS", "1")
            .env("ANSIBLE_HOST_KEY_CHECKING", "False")
            .env("ANSIBLE_RETRY_FILES_ENABLED", "False")
            .env("ANSIBLE_LOCAL_TEMP", spec.data_dir.join(".ansible_tmp").as_str())
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if spec.verbosity > 0 {
            cmd.arg(format!("-{}", "v".repeat(usize::from(spec.verbosity.min(4)))));
        }
        cmd
    }
}

#[async_trait]
impl Runner for PlaybookRunner {
    #[instrument(skip_all, fields(batch = %spec.name))]
    async fn run(&self, spec: &RunSpec, callback: &mut Callback) -> Result<()> {
        let output = self
            .command(spec)
            .output()
            .await
            .with_context(|| format!("unable to spawn {}", self.bin))?;

        let code = output.status.code();
        debug!(?code, "ansible-playbook exited");
        if !code.is_some_and(|c| REPORTED_EXIT_CODES.contains(&c)) {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{} exited with {:?}: {}", self.bin, code, stderr.trim());
        }

        let report = PlaybookReport::parse(&output.stdout)?;
        report.apply(callback);
        Ok(())
    }
}

/// Output of the `json` stdout callback.
#[derive(Debug, Clone, Default, Deserialize)]
struct PlaybookReport {
    #[serde(default)]
    plays: Vec<PlayReport>,
    #[serde(default)]
    stats: BTreeMap<String, HostStats>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PlayReport {
    #[serde(default)]
    tasks: Vec<TaskReport>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TaskReport {
    #[serde(default)]
    hosts: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[allow(clippy::struct_field_names)]
struct HostStats {
    #[serde(default)]
    ok: u64,
    #[serde(default)]
    failures: u64,
    #[serde(default)]
    unreachable: u64,
    #[serde(default)]
    skipped: u64,
}

impl PlaybookReport {
    /// Parses the report, tolerating noise printed before the JSON document.
    fn parse(stdout: &[u8]) -> Result<Self> {
        let start = stdout
            .iter()
            .position(|b| *b == b'{')
            .context("runner printed no json report")?;
        serde_json::from_slice(&stdout[start..]).context("unable to parse runner json report")
    }

    fn apply(self, callback: &mut Callback) {
        let mut last: BTreeMap<String, Value> = BTreeMap::new();
        let mut last_error: BTreeMap<String, String> = BTreeMap::new();

        for task in self.plays.into_iter().flat_map(|p| p.tasks) {
            for (host, result) in task.hosts {
                let failed = result["failed"].as_bool().unwrap_or(false)
                    || result["unreachable"].as_bool().unwrap_or(false);
                let ignored = result["ignore_errors"].as_bool().unwrap_or(false);
                if failed && !ignored {
                    last_error.insert(host.clone(), error_message(&result));
                }
                last.insert(host, result);
            }
        }

        for (host, stats) in self.stats {
            let result = last.remove(&host).unwrap_or(Value::Null);
            let error = last_error
                .remove(&host)
                .unwrap_or_else(|| "unknown error".to_owned());
            if stats.unreachable > 0 {
                callback.host_unreachable(&host, error, result);
            } else if stats.failures > 0 {
                callback.host_failed(&host, error, result);
            } else if stats.ok == 0 && stats.skipped > 0 {
                callback.host_skipped(&host, result);
            } else {
                callback.host_ok(&host, result);
            }
        }
    }
}

fn error_message(result: &Value) -> String {
    ["msg", "stderr", "reason"]
        .iter()
        .filter_map(|key| result[*key].as_str())
        .find(|s| !s.is_empty())
        .map_or_else(|| "unknown error".to_owned(), ToOwned::to_owned)
}
