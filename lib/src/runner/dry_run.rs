use std::fs;

use anyhow::Context;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use serde_json::Value;
use tracing::info;

use super::Callback;
use super::RunSpec;
use super::Runner;

/// Runner that contacts nothing. Every inventory host is reported skipped,
/// which leaves fully built workspaces to inspect.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunRunner;

#[async_trait]
impl Runner for DryRunRunner {
    async fn run(&self, spec: &RunSpec, callback: &mut Callback) -> Result<()> {
        let raw = fs::read(&spec.inventory)
            .with_context(|| format!("unable to read inventory {}", spec.inventory))?;
        let doc: Value = serde_json::from_slice(&raw).context("inventory is not valid json")?;
        let hosts = doc["all"]["hosts"]
            .as_object()
            .context("inventory has no all.hosts")?;

        info!(batch = %spec.name, hosts = hosts.len(), playbook = %spec.playbook, "dry run");
        for host in hosts.keys() {
            callback.host_skipped(host, json!({"skipped": true, "msg": "dry run"}));
        }
        Ok(())
    }
}
