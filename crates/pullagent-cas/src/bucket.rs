// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: On-disk content-addressed bucket keyed by file checksum.
// Author: Lukas Bower

use crate::{Checksum, StoreError, STORE_FORMAT};
use log::{debug, info};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const FORMAT_FILE: &str = "FORMAT";
const CONTENTS_FILE: &str = "contents";
const PATHS_FILE: &str = "paths";

/// Directory-backed content store.
///
/// Layout: `<root>/<8 nibble dirs>/<checksum>/contents` with a sibling
/// `paths` file listing every original path the content was backed up from.
#[derive(Clone, Debug)]
pub struct FileBucket {
    root: PathBuf,
}

impl FileBucket {
    /// Open the bucket at `root`, creating and stamping it when missing.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| io_err(&root, source))?;
        let format_path = root.join(FORMAT_FILE);
        match fs::read_to_string(&format_path) {
            Ok(found) => {
                let found = found.trim();
                if found != STORE_FORMAT {
                    return Err(StoreError::FormatMismatch {
                        path: root,
                        found: found.to_owned(),
                    });
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                fs::write(&format_path, format!("{STORE_FORMAT}\n"))
                    .map_err(|source| io_err(&format_path, source))?;
                info!("initialised bucket {} ({STORE_FORMAT})", root.display());
            }
            Err(source) => return Err(io_err(&format_path, source)),
        }
        Ok(Self { root })
    }

    /// Bucket root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store `contents`, recording `origin` as one of its source paths.
    pub fn add(&self, contents: &[u8], origin: &str) -> Result<Checksum, StoreError> {
        let sum = Checksum::of(contents);
        let dir = self.entry_dir(&sum);
        let contents_path = dir.join(CONTENTS_FILE);
        match fs::read(&contents_path) {
            Ok(existing) if existing == contents => {
                debug!("bucket already holds {sum}");
            }
            Ok(_) => return Err(StoreError::Collision(sum)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(&dir).map_err(|source| io_err(&dir, source))?;
                let staging = dir.join(format!("{CONTENTS_FILE}.tmp"));
                fs::write(&staging, contents).map_err(|source| io_err(&staging, source))?;
                fs::rename(&staging, &contents_path)
                    .map_err(|source| io_err(&contents_path, source))?;
                debug!("stored {} bytes as {sum}", contents.len());
            }
            Err(source) => return Err(io_err(&contents_path, source)),
        }
        self.record_origin(&dir, origin)?;
        Ok(sum)
    }

    /// Fetch the bytes stored under `sum`, if any.
    pub fn get(&self, sum: &Checksum) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.entry_dir(sum).join(CONTENTS_FILE);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(io_err(&path, source)),
        }
    }

    /// Original paths recorded for `sum`.
    pub fn origins(&self, sum: &Checksum) -> Result<Vec<String>, StoreError> {
        let path = self.entry_dir(sum).join(PATHS_FILE);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(text.lines().map(str::to_owned).collect()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(io_err(&path, source)),
        }
    }

    fn entry_dir(&self, sum: &Checksum) -> PathBuf {
        let mut dir = self.root.clone();
        for part in sum.fanout() {
            dir.push(part);
        }
        dir.push(sum.as_str());
        dir
    }

    fn record_origin(&self, dir: &Path, origin: &str) -> Result<(), StoreError> {
        let path = dir.join(PATHS_FILE);
        let known = match fs::read_to_string(&path) {
            Ok(text) => text.lines().any(|line| line == origin),
            Err(err) if err.kind() == io::ErrorKind::NotFound => false,
            Err(source) => return Err(io_err(&path, source)),
        };
        if known {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| io_err(&path, source))?;
        writeln!(file, "{origin}").map_err(|source| io_err(&path, source))
    }
}

fn io_err(path: &Path, source: io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn add_then_get_returns_same_bytes() {
        let dir = tempdir().expect("tempdir");
        let bucket = FileBucket::open(dir.path().join("bucket")).expect("open");
        let sum = bucket.add(b"hello\n", "/etc/motd").expect("add");
        assert_eq!(sum, Checksum::of(b"hello\n"));
        assert_eq!(bucket.get(&sum).expect("get"), Some(b"hello\n".to_vec()));
    }

    #[test]
    fn missing_checksum_is_none() {
        let dir = tempdir().expect("tempdir");
        let bucket = FileBucket::open(dir.path()).expect("open");
        assert!(bucket.get(&Checksum::of(b"absent")).expect("get").is_none());
    }

    #[test]
    fn repeated_adds_record_each_origin_once() {
        let dir = tempdir().expect("tempdir");
        let bucket = FileBucket::open(dir.path()).expect("open");
        let sum = bucket.add(b"same", "/a").expect("first");
        bucket.add(b"same", "/b").expect("second");
        bucket.add(b"same", "/a").expect("third");
        assert_eq!(bucket.origins(&sum).expect("origins"), vec!["/a", "/b"]);
    }

    #[test]
    fn open_rejects_foreign_format() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join(FORMAT_FILE), "pullagent-cas/md5-v0\n").unwrap();
        let err = FileBucket::open(dir.path()).unwrap_err();
        assert!(matches!(err, StoreError::FormatMismatch { ref found, .. } if found == "pullagent-cas/md5-v0"));
    }

    #[test]
    fn open_stamps_format_once() {
        let dir = tempdir().expect("tempdir");
        FileBucket::open(dir.path()).expect("first open");
        FileBucket::open(dir.path()).expect("reopen");
        let tag = fs::read_to_string(dir.path().join(FORMAT_FILE)).unwrap();
        assert_eq!(tag.trim(), STORE_FORMAT);
    }

    #[test]
    fn tampered_content_is_a_collision() {
        let dir = tempdir().expect("tempdir");
        let bucket = FileBucket::open(dir.path()).expect("open");
        let sum = bucket.add(b"original", "/x").expect("add");
        fs::write(bucket.entry_dir(&sum).join(CONTENTS_FILE), b"tampered").unwrap();
        let err = bucket.add(b"original", "/x").unwrap_err();
        assert!(matches!(err, StoreError::Collision(found) if found == sum));
    }
}
