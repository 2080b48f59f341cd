//! Per-batch working directories holding the runner's inputs.

use std::fs;

use anyhow::Context;
use anyhow::Result;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use chrono::DateTime;
use chrono::TimeZone;
use serde_yaml_ng::Mapping;
use serde_yaml_ng::Value as YamlValue;
use tracing::debug;
use tracing::error;

use crate::asset::AccountSelector;
use crate::automation::AutomationConfig;
use crate::automation::OpType;
use crate::credential::CredentialMaterializer;
use crate::inventory::HostRecord;
use crate::inventory::Inventory;
use crate::inventory::INVENTORY_FILE;
use crate::job::Job;
use crate::plan::Batch;
use crate::procedure::ProcedureRegistry;
use crate::procedure::ENTRYPOINT_FILE;
use crate::util::fs::copy_dir_all;
use crate::util::fs::path_component;

/// Copy of the procedure template inside a workspace.
pub const PROJECT_DIR: &str = "project";

/// Content-addressed private keys, shared by all batches of a job.
pub const KEYS_DIR: &str = "keys";

/// Job runtime root:
/// `<runtime>/automations/<op>/<name>_<id>/<YYYYMMDD_HHMMSS>`.
pub fn job_root<Tz>(runtime_root: &Utf8Path, job: &Job, now: &DateTime<Tz>) -> Utf8PathBuf
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    runtime_root
        .join("automations")
        .join(job.op().to_string())
        .join(format!("{}_{}", path_component(&job.snapshot.name), job.id))
        .join(now.format("%Y%m%d_%H%M%S").to_string())
}

/// Inputs of one batch, on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub dir: Utf8PathBuf,
    pub inventory_path: Utf8PathBuf,
    /// Absent when the platform's procedure could not be resolved.
    pub playbook_path: Option<Utf8PathBuf>,
    pub inventory: Inventory,
}

impl Workspace {
    /// Hosts kept out of the run, with the reason.
    #[must_use]
    pub fn excluded(&self) -> Vec<(String, String)> {
        self.inventory
            .excluded()
            .map(|(host, error)| (host.to_owned(), error.to_owned()))
            .collect()
    }

    #[must_use]
    pub fn has_runnable_hosts(&self) -> bool {
        self.inventory.runnable().next().is_some()
    }
}

/// Builds batch workspaces under one job root.
#[derive(Debug, Clone)]
pub struct WorkspaceBuilder<'a> {
    op: OpType,
    registry: &'a ProcedureRegistry,
    root: Utf8PathBuf,
    materializer: CredentialMaterializer<'a>,
    accounts: AccountSelector,
}

impl<'a> WorkspaceBuilder<'a> {
    /// Creates the job root directory.
    ///
    /// # Errors
    ///
    /// If the directory cannot be created.
    pub fn create(root: Utf8PathBuf, op: OpType, registry: &'a ProcedureRegistry) -> Result<Self> {
        fs::create_dir_all(&root).with_context(|| format!("unable to create job root {root}"))?;
        debug!(%root, "job runtime dir");
        let materializer = CredentialMaterializer::new(op, registry, root.join(KEYS_DIR));
        Ok(Self {
            op,
            registry,
            root,
            materializer,
            accounts: AccountSelector::default(),
        })
    }

    /// Replaces the default login account selection.
    #[must_use]
    pub fn with_account_selector(mut self, accounts: AccountSelector) -> Self {
        self.accounts = accounts;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Writes the batch's inventory and playbook into `<root>/<batch name>`.
    ///
    /// # Errors
    ///
    /// If the workspace already exists, or any file cannot be written.
    pub fn build(&self, batch: &Batch) -> Result<Workspace> {
        let dir = self.root.join(batch.name());
        fs::create_dir(&dir).with_context(|| format!("unable to create workspace {dir}"))?;

        let inventory_path = dir.join(INVENTORY_FILE);
        let inventory = self.generate_inventory(batch, &dir)?;
        inventory.write_to_file(&inventory_path)?;

        let playbook_path = self.generate_playbook(batch, &dir)?;

        Ok(Workspace {
            dir,
            inventory_path,
            playbook_path,
            inventory,
        })
    }

    fn generate_inventory(&self, batch: &Batch, dir: &Utf8Path) -> Result<Inventory> {
        let mut inventory = Inventory::default();
        for asset in &batch.assets {
            let account = self.accounts.select(&asset.accounts);
            if account.is_none() && !asset.accounts.is_empty() {
                debug!(%asset, policy = %self.accounts.policy, "no account selected");
            }
            let host = self.materializer.host_callback(
                HostRecord::from_asset(asset, account),
                asset,
                &batch.platform.automation,
                dir,
            )?;
            inventory.push(host);
        }
        Ok(inventory)
    }

    fn generate_playbook(&self, batch: &Batch, dir: &Utf8Path) -> Result<Option<Utf8PathBuf>> {
        let method_id = batch.platform.automation.method_id(self.op).unwrap_or_default();
        let Some(procedure) = self.registry.resolve(self.op, method_id) else {
            error!(%batch, %method_id, op = %self.op, "method not found");
            return Ok(None);
        };

        let project = dir.join(PROJECT_DIR);
        copy_dir_all(&procedure.dir, &project)?;

        let path = project.join(ENTRYPOINT_FILE);
        let raw = fs::read_to_string(&path).with_context(|| format!("unable to read {path}"))?;
        let mut plays: Vec<Mapping> =
            serde_yaml_ng::from_str(&raw).with_context(|| format!("unable to parse {path}"))?;
        for play in &mut plays {
            play.insert(YamlValue::from("hosts"), YamlValue::from("all"));
        }
        let out = serde_yaml_ng::to_string(&plays)?;
        fs::write(&path, out).with_context(|| format!("unable to write {path}"))?;

        Ok(Some(path))
    }
}
