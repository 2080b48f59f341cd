//! Partitioning of a job's assets into bounded batches.

use std::collections::HashSet;
use std::fmt;
use std::num::NonZeroUsize;

use indexmap::IndexMap;
use tracing::warn;

use crate::asset::Asset;
use crate::asset::Platform;
use crate::automation::PlatformAutomation;
use crate::util::fs::path_component;

/// Default maximum number of assets handed to one runner invocation.
pub const DEFAULT_BULK_SIZE: NonZeroUsize = NonZeroUsize::MIN.saturating_add(99);

/// All assets of one platform, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformGroup {
    pub platform: Platform,
    pub assets: Vec<Asset>,
}

/// Groups assets by their platform, keeping platforms in order of first
/// appearance. Assets naming an unknown platform get an empty automation
/// config, so every operation reports them as disabled instead of dropping
/// them.
pub fn group_by_platform(
    assets: impl IntoIterator<Item = Asset>,
    platforms: &[Platform],
) -> Vec<PlatformGroup> {
    let mut groups: IndexMap<String, PlatformGroup> = IndexMap::new();
    for asset in assets {
        let group = groups.entry(asset.platform.clone()).or_insert_with(|| {
            let platform = platforms
                .iter()
                .find(|p| p.name == asset.platform)
                .cloned()
                .unwrap_or_else(|| {
                    warn!(platform = %asset.platform, "unknown platform, automation disabled");
                    Platform::new(asset.platform.clone(), PlatformAutomation::default())
                });
            PlatformGroup {
                platform,
                assets: Vec::new(),
            }
        });
        group.assets.push(asset);
    }
    groups.into_values().collect()
}

/// Bounded slice of one platform group, run through the runner at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub platform: Platform,
    /// 1-based position within the platform group.
    pub index: usize,
    pub assets: Vec<Asset>,
    name: String,
}

impl Batch {
    /// Workspace directory name, `{platform}_{index}`, unique within a job.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

impl fmt::Display for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.platform.name, self.index)
    }
}

/// Splits every group into consecutive chunks of at most `bulk_size` assets.
/// Groups stay in order, and so do assets within a group.
///
/// Platform names are made path safe for batch names. When two platforms end
/// up with the same name, the later one gets a `-<n>` suffix.
pub fn batches(
    groups: impl IntoIterator<Item = PlatformGroup>,
    bulk_size: NonZeroUsize,
) -> Vec<Batch> {
    let mut taken = HashSet::new();
    let mut out = Vec::new();
    for group in groups {
        let base = path_component(&group.platform.name);
        let chunks: Vec<_> = group.assets.chunks(bulk_size.get()).collect();
        let mut prefix = base.clone();
        let mut n = 1;
        while (1..=chunks.len()).any(|i| taken.contains(&format!("{prefix}_{i}"))) {
            n += 1;
            prefix = format!("{base}-{n}");
        }
        if n > 1 {
            warn!(platform = %group.platform, %prefix, "batch name already used, renamed");
        }

        for (i, chunk) in chunks.into_iter().enumerate() {
            let index = i + 1;
            let name = format!("{prefix}_{index}");
            taken.insert(name.clone());
            out.push(Batch {
                platform: group.platform.clone(),
                index,
                assets: chunk.to_vec(),
                name,
            });
        }
    }
    out
}
