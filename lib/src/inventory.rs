//! Ansible JSON inventory handed to the runner for one batch.

use std::collections::BTreeMap;
use std::fs;

use anyhow::Context;
use anyhow::Result;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use serde::Serialize;
use serde_json::json;
use serde_json::Value;

use crate::asset::Account;
use crate::asset::Asset;
use crate::asset::SecretType;
use crate::util::secret::serialize_exposed;
use crate::util::secret::SecureString;

/// Inventory file name inside a workspace.
pub const INVENTORY_FILE: &str = "hosts.json";

/// `asset` host variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetVars {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub protocol: String,
    pub platform: String,
    /// Certificate material, as file paths once materialized.
    pub secret_info: BTreeMap<String, String>,
}

/// `account` host variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountVars {
    pub username: String,
    pub secret_type: SecretType,
    #[serde(serialize_with = "serialize_exposed")]
    pub secret: Option<SecureString>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<Utf8PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

/// Connection variables for one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostVars {
    pub ansible_host: String,
    pub ansible_port: u16,
    pub ansible_connection: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ansible_user: Option<String>,
    #[serde(
        serialize_with = "serialize_exposed",
        skip_serializing_if = "Option::is_none"
    )]
    pub ansible_password: Option<SecureString>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ansible_ssh_private_key_file: Option<Utf8PathBuf>,
    pub asset: AssetVars,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountVars>,
}

/// One inventory entry. Hosts carrying an `error` are kept out of the runner's
/// reach and reported as failed by the sequencer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    pub name: String,
    pub error: Option<String>,
    pub vars: HostVars,
}

impl HostRecord {
    /// Builds the record with raw secret values in place, logging in with
    /// `account` when one was selected.
    #[must_use]
    pub fn from_asset(asset: &Asset, account: Option<&Account>) -> Self {
        let secret_info = asset
            .secret_info
            .fields()
            .map(|(name, value)| (name.to_owned(), value.expose().to_owned()))
            .collect();

        let account_vars = account.map(|account| AccountVars {
            username: account.username.clone(),
            secret_type: account.secret_type,
            secret: account.secret.clone(),
            private_key_path: None,
            public_key: None,
        });

        let ansible_password = account
            .filter(|a| a.secret_type == SecretType::Password)
            .and_then(|a| a.secret.clone());

        Self {
            name: asset.name.clone(),
            error: None,
            vars: HostVars {
                ansible_host: asset.address.clone(),
                ansible_port: asset.port(),
                ansible_connection: asset.protocol.ansible_connection().to_owned(),
                ansible_user: account.map(|a| a.username.clone()),
                ansible_password,
                ansible_ssh_private_key_file: None,
                asset: AssetVars {
                    id: asset.id.clone(),
                    name: asset.name.clone(),
                    address: asset.address.clone(),
                    port: asset.port(),
                    protocol: asset.protocol.to_string(),
                    platform: asset.platform.clone(),
                    secret_info,
                },
                account: account_vars,
            },
        }
    }

    /// Marks the host as not runnable, dropping all credential material.
    pub fn disable(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.vars.ansible_password = None;
        self.vars.ansible_ssh_private_key_file = None;
        self.vars.asset.secret_info.clear();
        if let Some(account) = self.vars.account.as_mut() {
            account.secret = None;
        }
    }
}

/// Inventory of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    hosts: Vec<HostRecord>,
}

impl Inventory {
    /// Adds a host. Duplicate names get the asset id appended, then a counter,
    /// until the name is unique so every host stays addressable.
    pub fn push(&mut self, mut host: HostRecord) {
        let base = format!("{}({})", host.name, host.vars.asset.id);
        let mut n = 1;
        while self.hosts.iter().any(|h| h.name == host.name) {
            host.name = if n == 1 {
                base.clone()
            } else {
                format!("{base}_{n}")
            };
            n += 1;
        }
        self.hosts.push(host);
    }

    pub fn hosts(&self) -> impl Iterator<Item = &HostRecord> {
        self.hosts.iter()
    }

    /// Hosts the runner will act on.
    pub fn runnable(&self) -> impl Iterator<Item = &HostRecord> {
        self.hosts.iter().filter(|h| h.error.is_none())
    }

    /// Hosts kept out of the run, with the reason.
    pub fn excluded(&self) -> impl Iterator<Item = (&str, &str)> {
        self.hosts
            .iter()
            .filter_map(|h| h.error.as_deref().map(|e| (h.name.as_str(), e)))
    }

    /// Renders the Ansible JSON inventory document.
    ///
    /// # Errors
    ///
    /// If host variables fail to serialize.
    pub fn to_value(&self) -> Result<Value> {
        let mut hosts = serde_json::Map::new();
        for host in self.runnable() {
            let vars = serde_json::to_value(&host.vars)
                .with_context(|| format!("unable to serialize host {}", host.name))?;
            hosts.insert(host.name.clone(), vars);
        }
        let excluded: serde_json::Map<_, _> = self
            .excluded()
            .map(|(name, error)| (name.to_owned(), Value::from(error)))
            .collect();
        Ok(json!({
            "all": {
                "hosts": hosts,
                "vars": { "excluded_hosts": excluded },
            }
        }))
    }

    /// Writes the inventory document, creating parent dirs.
    ///
    /// # Errors
    ///
    /// If rendering or writing fails.
    pub fn write_to_file(&self, path: &Utf8Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("unable to create {parent}"))?;
        }
        let doc = serde_json::to_vec_pretty(&self.to_value()?)?;
        fs::write(path, doc).with_context(|| format!("unable to write inventory {path}"))
    }
}
