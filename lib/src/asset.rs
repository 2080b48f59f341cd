use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use strum::Display;
use strum::EnumString;

use crate::automation::PlatformAutomation;
use crate::util::secret::SecureString;

/// Group of assets sharing one automation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub name: String,
    #[serde(default)]
    pub automation: PlatformAutomation,
}

impl Platform {
    pub fn new(name: impl Into<String>, automation: PlatformAutomation) -> Self {
        Self {
            name: name.into(),
            automation,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Protocol the runner uses to reach an asset.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Ssh,
    Winrm,
    Mysql,
    Mariadb,
    Postgresql,
    Sqlserver,
    Oracle,
    Mongodb,
    Redis,
}

impl Protocol {
    #[must_use]
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Ssh => 22,
            Protocol::Winrm => 5985,
            Protocol::Mysql | Protocol::Mariadb => 3306,
            Protocol::Postgresql => 5432,
            Protocol::Sqlserver => 1433,
            Protocol::Oracle => 1521,
            Protocol::Mongodb => 27017,
            Protocol::Redis => 6379,
        }
    }

    /// Value for `ansible_connection`. Database modules run on the controller.
    #[must_use]
    pub fn ansible_connection(self) -> &'static str {
        match self {
            Protocol::Ssh => "ssh",
            Protocol::Winrm => "winrm",
            _ => "local",
        }
    }
}

/// Kind of secret carried by an [`Account`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SecretType {
    #[default]
    Password,
    SshKey,
    Token,
    AccessKey,
}

/// Credentials used to log into an asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Account {
    pub username: String,
    #[serde(default)]
    pub secret_type: SecretType,
    #[serde(default)]
    pub secret: Option<SecureString>,
    /// Administrative account (root, Administrator, sa, ...).
    #[serde(default)]
    pub privileged: bool,
}

/// How the login account is chosen when a preferred username is not present.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum AccountPolicy {
    /// First privileged account, or else the first account.
    #[default]
    PrivilegedFirst,
    /// First privileged account, or none.
    PrivilegedOnly,
    /// Only preferred usernames are used.
    Skip,
}

/// Usernames tried first when [`AccountSelector`] has no explicit preference.
pub const DEFAULT_ACCOUNT_PREFER: &[&str] = &["root", "Administrator"];

/// Picks the account a host logs in with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSelector {
    pub policy: AccountPolicy,
    /// Usernames tried first, in order.
    pub prefer: Vec<String>,
}

impl Default for AccountSelector {
    fn default() -> Self {
        Self::new(
            AccountPolicy::default(),
            DEFAULT_ACCOUNT_PREFER.iter().map(|u| (*u).to_owned()).collect(),
        )
    }
}

impl AccountSelector {
    pub fn new(policy: AccountPolicy, prefer: Vec<String>) -> Self {
        Self { policy, prefer }
    }

    /// Preferred usernames win, in preference order. Otherwise `policy` decides.
    #[must_use]
    pub fn select<'a>(&self, accounts: &'a [Account]) -> Option<&'a Account> {
        let preferred = self
            .prefer
            .iter()
            .find_map(|username| accounts.iter().find(|a| &a.username == username));
        if preferred.is_some() {
            return preferred;
        }

        let privileged = || accounts.iter().find(|a| a.privileged);
        match self.policy {
            AccountPolicy::PrivilegedFirst => privileged().or_else(|| accounts.first()),
            AccountPolicy::PrivilegedOnly => privileged(),
            AccountPolicy::Skip => None,
        }
    }
}

/// TLS material some assets (mostly databases) need.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SecretInfo {
    #[serde(default)]
    pub ca_cert: Option<SecureString>,
    #[serde(default)]
    pub client_key: Option<SecureString>,
    #[serde(default)]
    pub client_cert: Option<SecureString>,
}

impl SecretInfo {
    /// Non-empty certificate fields, by field name.
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &SecureString)> {
        [
            ("ca_cert", self.ca_cert.as_ref()),
            ("client_key", self.client_key.as_ref()),
            ("client_cert", self.client_cert.as_ref()),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.filter(|v| !v.is_empty()).map(|v| (name, v)))
    }
}

/// A managed endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Asset {
    pub id: String,
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub protocol: Protocol,
    /// Name of the [`Platform`] this asset belongs to.
    pub platform: String,
    /// Candidate login accounts, see [`AccountSelector`].
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub secret_info: SecretInfo,
}

impl Asset {
    /// Builds a bare SSH asset, mostly useful for tests and fixtures.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            port: None,
            protocol: Protocol::default(),
            platform: platform.into(),
            accounts: Vec::new(),
            secret_info: SecretInfo::default(),
        }
    }

    #[must_use]
    pub fn with_account(mut self, account: Account) -> Self {
        self.accounts.push(account);
        self
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.protocol.default_port())
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.address)
    }
}
