#![forbid(unsafe_code)]

//! Checks applied to the on-disk OAuth credential before it is trusted.

use anyhow::{Context, Result, bail};
use nix::unistd::Uid;
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

/// Owner-only read/write.
pub const PRIVATE_FILE_MODE: u32 = 0o600;

/// Refuses credential files that belong to someone else or that other users
/// can read.
pub fn ensure_private_file(path: &Path) -> Result<()> {
    let metadata =
        fs::metadata(path).with_context(|| format!("Inspecting {}", path.display()))?;
    ensure_private_for(Uid::current(), metadata.uid(), metadata.mode(), path)
}

fn ensure_private_for(current: Uid, owner: u32, mode: u32, path: &Path) -> Result<()> {
    if owner != current.as_raw() {
        bail!(
            "{} is owned by uid {owner}, not the current user; refusing to load credentials",
            path.display()
        );
    }
    if mode & 0o077 != 0 {
        bail!(
            "{} is accessible by other users (mode {:o}); run `chmod 600 {}`",
            path.display(),
            mode & 0o777,
            path.display()
        );
    }
    Ok(())
}

/// Tightens permissions on a freshly written credential file.
pub fn restrict_to_owner(path: &Path) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(PRIVATE_FILE_MODE))
        .with_context(|| format!("Restricting permissions on {}", path.display()))
}
