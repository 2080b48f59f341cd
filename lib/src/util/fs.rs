//! Small filesystem helpers for building workspaces.

use std::fs;
use std::io::Write;

use anyhow::Context;
use anyhow::Result;
use camino::Utf8Path;

/// Recursively copies `src` into `dst`. `dst` must not exist yet.
///
/// # Errors
///
/// - If `dst` already exists
/// - If any directory entry cannot be read, created or copied
pub fn copy_dir_all(src: &Utf8Path, dst: &Utf8Path) -> Result<()> {
    fs::create_dir(dst).with_context(|| format!("unable to create {dst}"))?;
    for entry in src
        .read_dir_utf8()
        .with_context(|| format!("unable to read {src}"))?
    {
        let entry = entry?;
        let to = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(entry.path(), &to)?;
        } else {
            fs::copy(entry.path(), &to)
                .with_context(|| format!("unable to copy {} to {to}", entry.path()))?;
        }
    }
    Ok(())
}

/// Creates a directory (and parents) readable only by the owner.
///
/// # Errors
///
/// If the directory cannot be created.
pub fn create_private_dir(path: &Utf8Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder
        .create(path)
        .with_context(|| format!("unable to create {path}"))
}

/// Writes `contents` to a new file created with the given unix `mode`.
/// Existing files are truncated.
///
/// # Errors
///
/// If the file cannot be opened or written.
pub fn write_with_mode(path: &Utf8Path, contents: &[u8], mode: u32) -> Result<()> {
    let mut opts = fs::OpenOptions::new();
    opts.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    let mut file = opts
        .open(path)
        .with_context(|| format!("unable to open {path}"))?;
    file.write_all(contents)
        .with_context(|| format!("unable to write {path}"))?;
    Ok(())
}

/// Sets unix permission bits on a path. No-op elsewhere.
///
/// # Errors
///
/// If the permissions cannot be changed.
pub fn set_mode(path: &Utf8Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .with_context(|| format!("unable to chmod {path}"))?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}

/// Makes a display name safe to use as a single path component.
#[must_use]
pub fn path_component(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_whitespace() || matches!(c, '/' | '\\') {
                '_'
            } else {
                c
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_owned(),
        _ => cleaned,
    }
}
