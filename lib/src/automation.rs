use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use strum::Display;
use strum::EnumString;

/// Operations an automation procedure can implement.
#[derive(
    Debug,
    Clone,
    Copy,
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
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum OpType {
    Ping,
    GatherFacts,
    PushAccount,
    ChangeSecret,
    VerifyAccount,
    GatherAccounts,
    RemoveAccount,
}

/// Capability interface over a platform's automation settings.
pub trait AutomationConfig {
    /// Whether the operation is switched on for this platform.
    fn is_enabled(&self, op: OpType) -> bool;

    /// Procedure (method) id configured for the operation, if any.
    fn method_id(&self, op: OpType) -> Option<&str>;

    /// Method id to use, only if the operation is enabled and has one.
    fn enabled_method(&self, op: OpType) -> Option<&str> {
        if !self.is_enabled(op) {
            return None;
        }
        self.method_id(op).filter(|id| !id.is_empty())
    }
}

/// Per-operation setting of a platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSetting {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub method: Option<String>,
}

/// Automation settings for one platform, keyed by operation.
///
/// ```json
/// { "ping": { "enabled": true, "method": "posix_ping" } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlatformAutomation {
    settings: BTreeMap<OpType, MethodSetting>,
}

impl PlatformAutomation {
    /// Enables `op` using the given method id.
    #[must_use]
    pub fn with(mut self, op: OpType, method: impl Into<String>) -> Self {
        self.settings.insert(
            op,
            MethodSetting {
                enabled: true,
                method: Some(method.into()),
            },
        );
        self
    }

    /// Configures `op` with a method id but leaves it switched off.
    #[must_use]
    pub fn with_disabled(mut self, op: OpType, method: impl Into<String>) -> Self {
        self.settings.insert(
            op,
            MethodSetting {
                enabled: false,
                method: Some(method.into()),
            },
        );
        self
    }
}

impl AutomationConfig for PlatformAutomation {
    fn is_enabled(&self, op: OpType) -> bool {
        self.settings.get(&op).is_some_and(|s| s.enabled)
    }

    fn method_id(&self, op: OpType) -> Option<&str> {
        self.settings.get(&op)?.method.as_deref()
    }
}
