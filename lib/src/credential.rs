//! Per-host inventory callback that turns secret material into files.

use anyhow::Context;
use anyhow::Result;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use sha2::Digest;
use sha2::Sha256;
use ssh_key::LineEnding;
use ssh_key::PrivateKey;
use tracing::debug;
use tracing::warn;

use crate::asset::Asset;
use crate::asset::SecretType;
use crate::automation::AutomationConfig;
use crate::automation::OpType;
use crate::inventory::HostRecord;
use crate::procedure::ProcedureRegistry;
use crate::util::fs::create_private_dir;
use crate::util::fs::path_component;
use crate::util::fs::set_mode;
use crate::util::fs::write_with_mode;
use crate::util::secret::SecureString;

/// Certificate directory inside a workspace.
pub const CERTS_DIR: &str = "certs";

const CERT_MODE: u32 = 0o600;
const KEY_MODE: u32 = 0o400;

/// Decides per host whether the job's operation may run, and if so writes the
/// credential files the runner needs.
#[derive(Debug, Clone)]
pub struct CredentialMaterializer<'a> {
    op: OpType,
    registry: &'a ProcedureRegistry,
    key_dir: Utf8PathBuf,
}

impl<'a> CredentialMaterializer<'a> {
    /// Private keys are written into `key_dir`, shared by every batch of a job.
    pub fn new(
        op: OpType,
        registry: &'a ProcedureRegistry,
        key_dir: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            op,
            registry,
            key_dir: key_dir.into(),
        }
    }

    /// Whether the operation is enabled and maps to a known procedure.
    pub fn method_enabled(&self, automation: &impl AutomationConfig) -> bool {
        automation
            .enabled_method(self.op)
            .is_some_and(|id| self.registry.resolve(self.op, id).is_some())
    }

    /// Rewrites `host` for the run. Hosts whose procedure is not usable get an
    /// error and no credential files; the rest have certificate and private
    /// key values replaced by file paths.
    ///
    /// # Errors
    ///
    /// If a credential file cannot be written.
    pub fn host_callback(
        &self,
        mut host: HostRecord,
        asset: &Asset,
        automation: &impl AutomationConfig,
        workspace: &Utf8Path,
    ) -> Result<HostRecord> {
        if !self.method_enabled(automation) {
            debug!(host = %host.name, op = %self.op, "operation disabled");
            host.disable(format!("{} disabled", self.op));
            return Ok(host);
        }

        self.convert_cert_to_file(&mut host, asset, &workspace.join(CERTS_DIR))?;
        self.convert_private_key(&mut host)?;
        Ok(host)
    }

    #[allow(clippy::unused_self)]
    fn convert_cert_to_file(
        &self,
        host: &mut HostRecord,
        asset: &Asset,
        certs_dir: &Utf8Path,
    ) -> Result<()> {
        let mut fields = asset.secret_info.fields().peekable();
        if fields.peek().is_none() {
            return Ok(());
        }

        let dir = certs_dir.join(path_component(&asset.id));
        create_private_dir(&dir)?;

        for (field, value) in fields {
            let path = dir.join(field);
            write_with_mode(&path, value.expose().as_bytes(), CERT_MODE)?;
            host.vars
                .asset
                .secret_info
                .insert(field.to_owned(), path.into_string());
        }
        Ok(())
    }

    fn convert_private_key(&self, host: &mut HostRecord) -> Result<()> {
        let Some(secret) = host
            .vars
            .account
            .as_ref()
            .filter(|a| a.secret_type == SecretType::SshKey)
            .and_then(|a| a.secret.clone())
            .filter(|s| !s.is_empty())
        else {
            return Ok(());
        };

        let path = self.private_key_path(&secret)?;
        let public_key = match public_key(&secret) {
            Ok(key) => Some(key),
            Err(error) => {
                warn!(?error, host = %host.name, "unable to derive public key");
                None
            }
        };

        host.vars.ansible_ssh_private_key_file = Some(path.clone());
        if let Some(account) = host.vars.account.as_mut() {
            account.private_key_path = Some(path);
            account.public_key = public_key;
        }
        Ok(())
    }

    /// Writes a private key once per distinct value, named by its hash, and
    /// returns its path. Later calls with the same key reuse the file.
    ///
    /// # Errors
    ///
    /// If the key directory or file cannot be written.
    pub fn private_key_path(&self, secret: &SecureString) -> Result<Utf8PathBuf> {
        let digest = Sha256::digest(secret.expose().as_bytes());
        let path = self.key_dir.join(format!(".{digest:x}"));
        if path.exists() {
            return Ok(path);
        }

        create_private_dir(&self.key_dir)?;
        let contents = match PrivateKey::from_openssh(secret.expose()) {
            Ok(key) => key
                .to_openssh(LineEnding::LF)
                .context("unable to encode private key")?
                .to_string(),
            Err(error) => {
                debug!(?error, "not an openssh key, writing it verbatim");
                let mut raw = secret.expose().to_owned();
                if !raw.ends_with('\n') {
                    raw.push('\n');
                }
                raw
            }
        };
        write_with_mode(&path, contents.as_bytes(), 0o600)?;
        set_mode(&path, KEY_MODE)?;
        Ok(path)
    }
}

/// Derives the OpenSSH public key of a private key, commented with the local
/// hostname.
///
/// # Errors
///
/// If the private key cannot be parsed or the public key encoded.
pub fn public_key(private_key: &SecureString) -> Result<String> {
    let key =
        PrivateKey::from_openssh(private_key.expose()).context("unable to parse private key")?;
    let mut public = key.public_key().clone();
    public.set_comment(whoami::fallible::hostname().unwrap_or_else(|_| "bosun".to_owned()));
    public.to_openssh().context("unable to encode public key")
}
