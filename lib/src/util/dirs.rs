//! Wrapper for getting default data storage paths.
//!
//! Follows these rules:
//!
//! - XDG base directory (all platforms if environment variable is set)
//! - Platform-specific well known directory (see [`dirs`])
//! - Home directory
//! - Current directory

use std::env;
use std::path::PathBuf;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use camino::Utf8PathBuf;

const XDG_DATA_HOME: &str = "XDG_DATA_HOME";

/// Gets the data directory. Creates it if it does not exist.
///
/// # Errors
///
/// - If none of the rules succeeds
/// - If the directory is not valid UTF-8 or cannot be created
pub fn data_dir(name: &str) -> Result<Utf8PathBuf> {
    let dir = if let Ok(path) = env::var(XDG_DATA_HOME) {
        PathBuf::from(path).join(name)
    } else if let Some(path) = dirs::data_dir() {
        path.join(name)
    } else if let Some(path) = dirs::home_dir() {
        path.join(format!(".{name}"))
    } else if let Ok(path) = env::current_dir() {
        path.join(format!(".{name}"))
    } else {
        bail!("all sources for data dir failed");
    };
    let dir = Utf8PathBuf::try_from(dir).context("data dir is not valid UTF-8")?;
    std::fs::create_dir_all(&dir).context("unable to ensure data dir exists")?;
    Ok(dir)
}
