// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Filesystem helpers for files that must not be world-readable.
// Author: Lukas Bower

use std::fs::{self, DirBuilder, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::Path;

/// Mode for directories holding agent state.
pub const STATE_DIR_MODE: u32 = 0o770;

/// Create `path`'s parent directories with `dir_mode` when missing.
pub fn ensure_parent(path: &Path, dir_mode: u32) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => DirBuilder::new()
            .recursive(true)
            .mode(dir_mode)
            .create(parent),
        _ => Ok(()),
    }
}

/// Replace `path` with `data`, creating it with `mode`.
///
/// Existing files are truncated and re-moded so a pre-existing looser mode
/// does not survive the rewrite.
pub fn write_restricted(path: &Path, data: &[u8], mode: u32) -> io::Result<()> {
    ensure_parent(path, STATE_DIR_MODE)?;
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)?;
    file.write_all(data)?;
    file.flush()?;
    fs::set_permissions(path, Permissions::from_mode(mode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_creates_parents_and_applies_mode() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state/nested/file.json");
        write_restricted(&path, b"{}", 0o660).expect("write");
        assert_eq!(fs::read(&path).unwrap(), b"{}");
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o660);
        let dir_mode = fs::metadata(path.parent().unwrap()).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode & !0o770, 0);
    }

    #[test]
    fn write_truncates_previous_contents() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("f");
        write_restricted(&path, b"long previous contents", 0o600).expect("first");
        write_restricted(&path, b"short", 0o600).expect("second");
        assert_eq!(fs::read(&path).unwrap(), b"short");
    }
}
