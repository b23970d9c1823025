// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Host fact collection and transport-safe fact encoding.
// Author: Lukas Bower

use crate::error::ClientError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::collections::BTreeMap;
use std::env;
use std::fs;

/// Facts keyed by name; values are lower-cased.
pub type Facts = BTreeMap<String, String>;

/// Environment prefix for operator-supplied facts (`PULLAGENT_FACT_ROLE=web`).
pub const FACT_ENV_PREFIX: &str = "PULLAGENT_FACT_";

/// Supplier of the key/value facts sent with every configuration request.
pub trait FactSource {
    fn collect(&self) -> Result<Facts, ClientError>;
}

/// Lower-case every value, the form facts are exchanged in.
pub fn normalize(facts: impl IntoIterator<Item = (String, String)>) -> Facts {
    facts
        .into_iter()
        .map(|(name, value)| (name, value.to_lowercase()))
        .collect()
}

/// Base64 of the JSON object form.
pub fn encode_facts(facts: &Facts) -> Result<String, ClientError> {
    let json = serde_json::to_vec(facts).map_err(|source| ClientError::Encode {
        key: "master.getconfig".into(),
        source,
    })?;
    Ok(BASE64.encode(json))
}

/// A fixed fact set.
#[derive(Clone, Debug, Default)]
pub struct StaticFacts(Facts);

impl StaticFacts {
    pub fn new(facts: impl IntoIterator<Item = (String, String)>) -> Self {
        Self(normalize(facts))
    }
}

impl FactSource for StaticFacts {
    fn collect(&self) -> Result<Facts, ClientError> {
        Ok(self.0.clone())
    }
}

/// Facts describing the running host.
#[derive(Clone, Debug)]
pub struct HostFacts {
    certname: String,
}

impl HostFacts {
    pub fn new(certname: impl Into<String>) -> Self {
        Self {
            certname: certname.into(),
        }
    }
}

impl FactSource for HostFacts {
    fn collect(&self) -> Result<Facts, ClientError> {
        let mut facts = vec![
            ("certname".to_owned(), self.certname.clone()),
            ("operatingsystem".to_owned(), env::consts::OS.to_owned()),
            ("osfamily".to_owned(), env::consts::FAMILY.to_owned()),
            ("architecture".to_owned(), env::consts::ARCH.to_owned()),
            (
                "agentversion".to_owned(),
                env!("CARGO_PKG_VERSION").to_owned(),
            ),
        ];
        if let Some(hostname) = hostname() {
            facts.push(("hostname".to_owned(), hostname));
        }
        for (key, value) in env::vars() {
            if let Some(name) = key.strip_prefix(FACT_ENV_PREFIX) {
                if !name.is_empty() {
                    facts.push((name.to_lowercase(), value));
                }
            }
        }
        Ok(normalize(facts))
    }
}

fn hostname() -> Option<String> {
    fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .or_else(|| env::var("HOSTNAME").ok())
        .map(|name| name.trim().to_owned())
        .filter(|name| !name.is_empty())
}
