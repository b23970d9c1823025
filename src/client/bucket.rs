// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Checksum-addressed file backup and restore against a bucket.
// Author: Lukas Bower

use super::{Client, ClientSettings};
use crate::error::ClientError;
use crate::handlers::BucketHandler;
use crate::net::Connector;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::{debug, error, info, warn};
use pullagent_cas::{Checksum, FileBucket};
use std::fs::{self, Permissions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const OWNER_WRITE: u32 = 0o200;

/// Result of [`BucketClient::restore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// File rewritten with the content stored under the checksum.
    Restored(Checksum),
    /// File already matched the requested checksum.
    NoOpNeeded,
    /// The bucket holds nothing under the requested checksum.
    NotFound,
}

/// On-disk bucket served in-process, speaking the wire encoding.
#[derive(Clone, Debug)]
pub struct LocalBucket(FileBucket);

impl LocalBucket {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ClientError> {
        Ok(Self(FileBucket::open(root)?))
    }

    pub fn bucket(&self) -> &FileBucket {
        &self.0
    }
}

impl BucketHandler for LocalBucket {
    fn addfile(&self, contents: &str, path: &str) -> Result<String, ClientError> {
        let bytes = BASE64
            .decode(contents)
            .map_err(|source| ClientError::Base64 {
                context: path.to_owned(),
                source,
            })?;
        Ok(self.0.add(&bytes, path)?.to_string())
    }

    fn getfile(&self, sum: &str) -> Result<Option<String>, ClientError> {
        let sum: Checksum = sum.parse()?;
        Ok(self.0.get(&sum)?.map(|bytes| BASE64.encode(bytes)))
    }
}

/// Backs files up to, and restores them from, a bucket.
pub struct BucketClient {
    client: Client<dyn BucketHandler>,
}

impl BucketClient {
    pub fn new(
        settings: ClientSettings<dyn BucketHandler>,
        connector: &Connector,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            client: Client::new(settings, connector)?,
        })
    }

    /// Local client over the bucket directory at `path`.
    pub fn local(path: impl Into<PathBuf>) -> Result<Self, ClientError> {
        let bucket = LocalBucket::open(path)?;
        Ok(Self {
            client: Client::<dyn BucketHandler>::from_driver(Box::new(bucket), true),
        })
    }

    pub fn client(&self) -> &Client<dyn BucketHandler> {
        &self.client
    }

    /// Store the current contents of `path`; returns their checksum.
    pub fn backup(&self, path: &Path) -> Result<Checksum, ClientError> {
        let contents = match fs::read(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ClientError::FileNotFound(path.to_path_buf()))
            }
            Err(err) => return Err(err.into()),
        };
        self.client.require_authenticated()?;
        let origin = path.to_string_lossy();
        let sum: Checksum = self
            .client
            .handler()
            .addfile(&BASE64.encode(&contents), &origin)?
            .parse()?;
        info!("backed up {} as {sum}", path.display());
        Ok(sum)
    }

    /// Bring `path` back to the content stored under `sum`.
    pub fn restore(&self, path: &Path, sum: &Checksum) -> Result<RestoreOutcome, ClientError> {
        match fs::read(path) {
            Ok(current) if Checksum::of(&current) == *sum => {
                debug!("{} already matches {sum}", path.display());
                return Ok(RestoreOutcome::NoOpNeeded);
            }
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        self.client.require_authenticated()?;
        let Some(encoded) = self.client.handler().getfile(sum.as_str())? else {
            error!("could not find file with checksum {sum}");
            return Ok(RestoreOutcome::NotFound);
        };
        let contents = BASE64
            .decode(encoded.trim())
            .map_err(|source| ClientError::Base64 {
                context: sum.to_string(),
                source,
            })?;
        let found = Checksum::of(&contents);
        if found != *sum {
            return Err(ClientError::ChecksumMismatch {
                expected: sum.clone(),
                found,
            });
        }
        {
            let _guard = WritableGuard::acquire(path)?;
            fs::write(path, &contents)?;
        }
        info!("restored {} to {sum}", path.display());
        Ok(RestoreOutcome::Restored(found))
    }
}

/// Grants owner-write for the guard's lifetime, restoring the original mode
/// on drop.
struct WritableGuard<'a> {
    path: &'a Path,
    original: Option<Permissions>,
}

impl<'a> WritableGuard<'a> {
    fn acquire(path: &'a Path) -> io::Result<Self> {
        let original = match fs::metadata(path) {
            Ok(meta) => {
                let perms = meta.permissions();
                if perms.mode() & OWNER_WRITE == 0 {
                    fs::set_permissions(path, Permissions::from_mode(perms.mode() | OWNER_WRITE))?;
                    Some(perms)
                } else {
                    None
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => return Err(err),
        };
        Ok(Self { path, original })
    }
}

impl Drop for WritableGuard<'_> {
    fn drop(&mut self) {
        if let Some(perms) = self.original.take() {
            if let Err(err) = fs::set_permissions(self.path, perms) {
                warn!("could not restore mode of {}: {err}", self.path.display());
            }
        }
    }
}
