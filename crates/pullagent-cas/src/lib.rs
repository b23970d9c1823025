// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Checksum keys and the versioned on-disk content store format.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Content-addressed storage shared by the pullagent backup clients.
//!
//! Stored files are keyed by the lowercase hex SHA-256 digest of their raw
//! bytes. The digest algorithm is part of [`STORE_FORMAT`]; a bucket written
//! under a different format tag is refused rather than silently mixed.

use core::fmt;
use core::str::FromStr;
use sha2::{Digest, Sha256};
use std::io;
use std::path::PathBuf;

mod bucket;

pub use bucket::FileBucket;

/// Store format identifier written to the root of every bucket.
pub const STORE_FORMAT: &str = "pullagent-cas/sha256-v1";

/// Number of hex characters in a [`Checksum`].
pub const CHECKSUM_HEX_LEN: usize = 64;

/// Errors returned by checksum parsing and bucket operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The checksum text was not a lowercase SHA-256 hex digest.
    #[error("invalid checksum {0:?}")]
    InvalidChecksum(String),
    /// The bucket root carries a different store format tag.
    #[error("bucket {} uses format {found:?}, expected {}", .path.display(), STORE_FORMAT)]
    FormatMismatch {
        /// Bucket root.
        path: PathBuf,
        /// Tag found on disk.
        found: String,
    },
    /// Existing content under a digest differs from the new content.
    #[error("checksum collision on {0}")]
    Collision(Checksum),
    /// Filesystem failure.
    #[error("bucket io error on {}: {source}", .path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// Hex SHA-256 digest of a file's raw contents.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Checksum(String);

impl Checksum {
    /// Compute the checksum of `data`.
    pub fn of(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }

    /// Hex text of the digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory components used to fan the store out on disk.
    pub(crate) fn fanout(&self) -> impl Iterator<Item = &str> {
        (0..8).map(move |idx| &self.0[idx..idx + 1])
    }
}

impl FromStr for Checksum {
    type Err = StoreError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let trimmed = text.trim();
        let valid = trimmed.len() == CHECKSUM_HEX_LEN
            && trimmed
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            return Err(StoreError::InvalidChecksum(text.to_owned()));
        }
        Ok(Self(trimmed.to_owned()))
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Checksum {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
