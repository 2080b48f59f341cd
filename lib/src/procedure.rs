use std::collections::BTreeMap;
use std::fs;

use anyhow::Context;
use anyhow::Result;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use serde::Deserialize;
use tracing::debug;
use tracing::warn;

use crate::automation::OpType;

/// File describing a procedure, found at the root of its template directory.
pub const MANIFEST_FILE: &str = "manifest.yml";

/// Entry point of a procedure's template directory.
pub const ENTRYPOINT_FILE: &str = "main.yml";

/// Metadata of one runnable procedure (an automation "method").
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Procedure {
    pub id: String,
    /// Operation this procedure implements.
    #[serde(rename = "method")]
    pub op: OpType,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub protocols: Vec<String>,
    /// Template directory holding [`ENTRYPOINT_FILE`].
    #[serde(skip)]
    pub dir: Utf8PathBuf,
}

impl Procedure {
    pub fn new(id: impl Into<String>, op: OpType, dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            id: id.into(),
            op,
            name: None,
            protocols: Vec::new(),
            dir: dir.into(),
        }
    }
}

/// Immutable set of known procedures, keyed by id.
///
/// Built once at startup and handed to whoever needs it.
#[derive(Debug, Clone, Default)]
pub struct ProcedureRegistry {
    procedures: BTreeMap<String, Procedure>,
}

impl FromIterator<Procedure> for ProcedureRegistry {
    fn from_iter<T: IntoIterator<Item = Procedure>>(iter: T) -> Self {
        let procedures = iter.into_iter().map(|p| (p.id.clone(), p)).collect();
        Self { procedures }
    }
}

impl ProcedureRegistry {
    /// Loads every `<dir>/*/manifest.yml`. Directories without a manifest are
    /// ignored; unreadable manifests are logged and skipped.
    ///
    /// # Errors
    ///
    /// If `dir` itself cannot be read.
    pub fn load_dir(dir: &Utf8Path) -> Result<Self> {
        let mut procedures = Vec::new();
        let entries = dir
            .read_dir_utf8()
            .with_context(|| format!("unable to read methods dir {dir}"))?;
        for entry in entries {
            let entry = entry?;
            let manifest = entry.path().join(MANIFEST_FILE);
            if !manifest.is_file() {
                continue;
            }
            match load_manifest(&manifest) {
                Ok(procedure) => {
                    debug!(id = %procedure.id, op = %procedure.op, "loaded procedure");
                    procedures.push(procedure);
                }
                Err(error) => warn!(?error, %manifest, "skipping procedure"),
            }
        }
        Ok(procedures.into_iter().collect())
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Procedure> {
        self.procedures.get(id)
    }

    /// Looks up a procedure by id, but only if it implements `op`.
    #[must_use]
    pub fn resolve(&self, op: OpType, id: &str) -> Option<&Procedure> {
        self.get(id).filter(|p| p.op == op)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Procedure> {
        self.procedures.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }
}

fn load_manifest(path: &Utf8Path) -> Result<Procedure> {
    let raw = fs::read_to_string(path).context("unable to read manifest")?;
    let mut procedure: Procedure =
        serde_yaml_ng::from_str(&raw).context("unable to parse manifest")?;
    procedure.dir = path
        .parent()
        .map(Utf8Path::to_path_buf)
        .context("manifest has no parent dir")?;
    Ok(procedure)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_method(root: &Utf8Path, dir: &str, manifest: &str) {
        let path = root.join(dir);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join(MANIFEST_FILE), manifest).unwrap();
        fs::write(path.join(ENTRYPOINT_FILE), "- hosts: demo\n  tasks: []\n").unwrap();
    }

    #[test]
    fn load_dir_works() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        write_method(root, "posix_ping", "id: posix_ping\nmethod: ping\nprotocols: [ssh]\n");
        write_method(root, "mysql_ping", "id: mysql_ping\nmethod: ping\n");
        write_method(root, "broken", "id: [\n");
        fs::create_dir_all(root.join("no_manifest")).unwrap();

        let registry = ProcedureRegistry::load_dir(root).unwrap();

        assert_eq!(registry.len(), 2);
        let ping = registry.get("posix_ping").unwrap();
        assert_eq!(ping.op, OpType::Ping);
        assert_eq!(ping.dir, root.join("posix_ping"));
        assert_eq!(ping.protocols, vec!["ssh".to_owned()]);
    }

    #[test]
    fn resolve_checks_op() {
        let registry: ProcedureRegistry = [Procedure::new("posix_ping", OpType::Ping, "/m")]
            .into_iter()
            .collect();
        assert!(registry.resolve(OpType::Ping, "posix_ping").is_some());
        assert!(registry.resolve(OpType::ChangeSecret, "posix_ping").is_none());
        assert!(registry.resolve(OpType::Ping, "nope").is_none());
    }

    #[test]
    fn load_dir_missing_errors() {
        assert!(ProcedureRegistry::load_dir(Utf8Path::new("/definitely/not/here")).is_err());
    }
}
