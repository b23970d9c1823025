// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Configuration retrieval with last-known-good cache fallback.
// Author: Lukas Bower

use super::{Client, Route};
use crate::apply::{run_engine, ApplyReport, Engine, Metrics, StateStore};
use crate::error::ClientError;
use crate::facts::{encode_facts, FactSource, Facts};
use crate::handlers::{CaClient, MasterHandler};
use crate::net::trust::CertificateRequest;
use crate::net::{Connector, TrustStore};
use crate::tree::{ConfigBucket, TreeError};
use crate::util::write_restricted;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::{debug, info, warn};
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const CACHE_MODE: u32 = 0o660;

/// In-process configuration compiler used in local mode.
pub trait LocalMaster {
    /// Compile a tree for `facts`; `None` when nothing could be compiled.
    fn compile(&self, facts: &Facts) -> Result<Option<Value>, ClientError>;
}

/// Where a retrieved configuration came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigSource {
    Fresh,
    Cached,
    Local,
}

/// Result of [`ConfigFetcher::initcerts`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CertStatus {
    /// Local clients do not use certificates.
    NotRequired,
    Present,
    Issued,
}

/// Files owned by a [`ConfigFetcher`].
#[derive(Clone, Debug)]
pub struct FetchPaths {
    /// Last successfully fetched payload, stored as received.
    pub cache: PathBuf,
    pub state: PathBuf,
}

/// Fetches, caches and applies configuration for this node.
pub struct ConfigFetcher {
    client: Client<dyn MasterHandler, dyn LocalMaster>,
    facts: Box<dyn FactSource>,
    certname: String,
    cache_path: PathBuf,
    state: StateStore,
    config: Option<ConfigBucket>,
}

impl ConfigFetcher {
    pub fn new(
        client: Client<dyn MasterHandler, dyn LocalMaster>,
        facts: Box<dyn FactSource>,
        certname: impl Into<String>,
        paths: FetchPaths,
    ) -> Self {
        Self {
            client,
            facts,
            certname: certname.into(),
            cache_path: paths.cache,
            state: StateStore::new(paths.state),
            config: None,
        }
    }

    pub fn client(&self) -> &Client<dyn MasterHandler, dyn LocalMaster> {
        &self.client
    }

    /// Most recently retrieved configuration.
    pub fn config(&self) -> Option<&ConfigBucket> {
        self.config.as_ref()
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Make sure a certificate is installed, requesting one from `ca` when
    /// it is not, and rebind the transport to present it.
    pub fn initcerts(
        &mut self,
        store: &mut TrustStore,
        ca: &CaClient,
        connector: &Connector,
    ) -> Result<CertStatus, ClientError> {
        if self.client.is_local() {
            return Ok(CertStatus::NotRequired);
        }
        if store.is_installed() {
            if !self.client.is_authenticated() {
                self.client.rebind(&connector.clone().with_trust(store))?;
            }
            return Ok(CertStatus::Present);
        }
        let request = CertificateRequest::generate(&self.certname)?;
        info!("requesting certificate for {}", self.certname);
        let (cert, ca_cert) = ca.getcert(&request.csr_pem)?;
        if cert.is_empty() {
            return Err(ClientError::CertificateNotIssued(self.certname.clone()));
        }
        store.install(&request.key_pem, &cert, &ca_cert)?;
        self.client.rebind(&connector.clone().with_trust(store))?;
        Ok(CertStatus::Issued)
    }

    /// Retrieve the configuration for this node.
    pub fn getconfig(&mut self) -> Result<ConfigSource, ClientError> {
        debug!("getting config");
        let facts = self.facts.collect()?;
        if facts.is_empty() {
            return Err(ClientError::NoFacts);
        }
        let (tree, source) = match self.client.route() {
            Route::Local(driver) => {
                let tree = driver
                    .compile(&facts)?
                    .ok_or(ClientError::ConfigUnavailable)?;
                (tree, ConfigSource::Local)
            }
            Route::Remote(master) => {
                self.client.require_authenticated()?;
                let fetched = match master.getconfig(&encode_facts(&facts)?) {
                    Ok(payload) if !payload.is_empty() => Ok(payload),
                    Ok(_) => Err(None),
                    Err(err @ ClientError::Unreachable { .. }) => Err(Some(err)),
                    Err(err) => return Err(err),
                };
                let (payload, source) = match fetched {
                    Ok(payload) => {
                        self.store_cache(&payload)?;
                        (payload, ConfigSource::Fresh)
                    }
                    Err(cause) => (self.read_cache(cause)?, ConfigSource::Cached),
                };
                (decode_payload(&payload)?, source)
            }
        };
        let bucket = ConfigBucket::from_value(tree).map_err(|err| match err {
            TreeError::NotABucket(found) => ClientError::InvalidConfigPayload(found),
            TreeError::Malformed(reason) => ClientError::UndecodableConfig(reason),
        })?;
        info!(
            "retrieved configuration {:?} ({} objects, {source:?})",
            bucket.name,
            bucket.objects().len()
        );
        self.config = Some(bucket);
        Ok(source)
    }

    /// Apply the retrieved configuration through `engine`.
    pub fn apply(
        &mut self,
        engine: &mut dyn Engine,
        metrics: &mut dyn Metrics,
    ) -> Result<ApplyReport, ClientError> {
        let config = self.config.as_ref().ok_or(ClientError::NoConfiguration)?;
        let mut state = self
            .state
            .load_or_reset()
            .unwrap_or_else(|fatal| fatal.terminate());
        let report = run_engine(config, &mut state, engine, metrics);
        self.state.store(&state)?;
        Ok(report)
    }

    fn store_cache(&self, payload: &str) -> Result<(), ClientError> {
        if self.client.cache_enabled() {
            write_restricted(&self.cache_path, payload.as_bytes(), CACHE_MODE)?;
            debug!("cached configuration at {}", self.cache_path.display());
        }
        Ok(())
    }

    /// Fallback when the authority produced nothing; `cause` is the
    /// connection failure, if that is why.
    fn read_cache(&self, cause: Option<ClientError>) -> Result<String, ClientError> {
        if !self.client.cache_enabled() {
            return Err(cause.unwrap_or(ClientError::ConfigUnavailable));
        }
        match fs::read_to_string(&self.cache_path) {
            Ok(payload) => {
                match &cause {
                    Some(err) => warn!("{err}; using cached configuration"),
                    None => warn!("authority returned no configuration; using cached copy"),
                }
                Ok(payload)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(cause.unwrap_or(ClientError::NoCachedConfig))
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn decode_payload(payload: &str) -> Result<Value, ClientError> {
    let bytes = BASE64
        .decode(payload.trim())
        .map_err(|err| ClientError::UndecodableConfig(err.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|err| ClientError::UndecodableConfig(err.to_string()))
}
