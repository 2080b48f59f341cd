use std::fs;

use anyhow::Context;
use anyhow::Result;
use camino::Utf8Path;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use strum::Display;
use strum::EnumString;
use uuid::Uuid;

use crate::asset::Asset;
use crate::asset::Platform;
use crate::automation::OpType;
use crate::db::JobEntry;
use crate::plan::group_by_platform;
use crate::plan::PlatformGroup;

/// Terminal state of the pipeline. `Success` means every batch was attempted,
/// not that every host succeeded.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Success,
    Failed,
}

/// Configuration captured when the job was requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub name: String,
    #[serde(rename = "type")]
    pub op: OpType,
    /// Ids of the targeted assets.
    #[serde(default)]
    pub assets: Vec<String>,
}

/// One orchestration request and its lifecycle timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: Uuid,
    pub snapshot: JobSnapshot,
    pub date_start: Option<DateTime<Utc>>,
    pub date_finished: Option<DateTime<Utc>>,
    pub status: JobStatus,
}

impl Job {
    #[must_use]
    pub fn new(id: Uuid, snapshot: JobSnapshot) -> Self {
        Self {
            id,
            snapshot,
            date_start: None,
            date_finished: None,
            status: JobStatus::Pending,
        }
    }

    #[must_use]
    pub fn op(&self) -> OpType {
        self.snapshot.op
    }

    /// Persistence form of the job state.
    #[must_use]
    pub fn entry(&self) -> JobEntry {
        JobEntry {
            id: self.id.to_string(),
            name: self.snapshot.name.clone(),
            op: self.snapshot.op.to_string(),
            status: self.status.to_string(),
            date_start: self.date_start,
            date_finished: self.date_finished,
        }
    }
}

/// On-disk job request: the snapshot plus the assets and platforms it targets.
///
/// ```json
/// {
///   "name": "nightly ping",
///   "type": "ping",
///   "platforms": [{"name": "Linux", "automation": {"ping": {"enabled": true, "method": "posix_ping"}}}],
///   "assets": [{"id": "1", "name": "web-1", "address": "10.0.0.1", "platform": "Linux"}]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct JobFile {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
    #[serde(rename = "type")]
    pub op: OpType,
    #[serde(default)]
    pub platforms: Vec<Platform>,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

impl JobFile {
    /// # Errors
    ///
    /// If the file cannot be read or parsed.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let raw = fs::read(path).with_context(|| format!("unable to read job file {path}"))?;
        serde_json::from_slice(&raw).with_context(|| format!("unable to parse job file {path}"))
    }

    /// Job snapshot; the id is generated when the file has none.
    #[must_use]
    pub fn job(&self) -> Job {
        let snapshot = JobSnapshot {
            name: self.name.clone(),
            op: self.op,
            assets: self.assets.iter().map(|a| a.id.clone()).collect(),
        };
        Job::new(self.id.unwrap_or_else(Uuid::now_v7), snapshot)
    }

    /// Targeted assets grouped by platform, in order of first appearance.
    #[must_use]
    pub fn all_assets_group_by_platform(&self) -> Vec<PlatformGroup> {
        group_by_platform(self.assets.iter().cloned(), &self.platforms)
    }
}
