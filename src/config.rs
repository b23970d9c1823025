// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Agent configuration file (TOML) with defaults and path rebasing.
// Author: Lukas Bower

use crate::net::{ServerAddress, TrustPaths, DEFAULT_PATH, DEFAULT_PORT};
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSection {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SslSection {
    #[serde(default = "default_cert")]
    pub cert: PathBuf,
    #[serde(default = "default_key")]
    pub key: PathBuf,
    #[serde(default = "default_ca_cert")]
    pub ca_cert: PathBuf,
}

impl Default for SslSection {
    fn default() -> Self {
        Self {
            cert: default_cert(),
            key: default_key(),
            ca_cert: default_ca_cert(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AgentSection {
    #[serde(default)]
    pub certname: Option<String>,
    #[serde(default = "default_true")]
    pub cache: bool,
    #[serde(default = "default_localconfig")]
    pub localconfig: PathBuf,
    #[serde(default = "default_statefile")]
    pub statefile: PathBuf,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            certname: None,
            cache: true,
            localconfig: default_localconfig(),
            statefile: default_statefile(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BucketSection {
    #[serde(default = "default_bucket_path")]
    pub path: PathBuf,
    /// Use the on-disk bucket even when a server is configured.
    #[serde(default)]
    pub local: bool,
}

impl Default for BucketSection {
    fn default() -> Self {
        Self {
            path: default_bucket_path(),
            local: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AgentConfig {
    #[serde(default)]
    pub server: Option<ServerSection>,
    #[serde(default)]
    pub ssl: SslSection,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub bucket: BucketSection,
}

impl AgentConfig {
    pub fn load(path: &Path) -> io::Result<Self> {
        let text = fs::read_to_string(path)?;
        let mut cfg = Self::parse(&text)?;
        cfg.rebase_paths(path);
        Ok(cfg)
    }

    pub fn parse(text: &str) -> io::Result<Self> {
        toml::from_str(text).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn rebase_paths(&mut self, path: &Path) {
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for p in [
            &mut self.ssl.cert,
            &mut self.ssl.key,
            &mut self.ssl.ca_cert,
            &mut self.agent.localconfig,
            &mut self.agent.statefile,
            &mut self.bucket.path,
        ] {
            *p = Self::join_base(base, p);
        }
    }

    fn join_base(base: &Path, p: &Path) -> PathBuf {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            base.join(p)
        }
    }

    pub fn server_address(&self) -> Option<ServerAddress> {
        self.server
            .as_ref()
            .map(|s| ServerAddress::new(s.host.clone(), s.port).with_path(s.path.clone()))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.server
            .as_ref()
            .and_then(|s| s.timeout_secs)
            .map(Duration::from_secs)
    }

    pub fn trust_paths(&self) -> TrustPaths {
        TrustPaths {
            cert: self.ssl.cert.clone(),
            key: self.ssl.key.clone(),
            ca_cert: self.ssl.ca_cert.clone(),
        }
    }

    /// Configured certname, else the host name, else `localhost`.
    pub fn certname(&self) -> String {
        self.agent
            .certname
            .clone()
            .or_else(|| {
                fs::read_to_string("/proc/sys/kernel/hostname")
                    .ok()
                    .map(|name| name.trim().to_owned())
                    .filter(|name| !name.is_empty())
            })
            .unwrap_or_else(|| "localhost".to_owned())
            .to_lowercase()
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_path() -> String {
    DEFAULT_PATH.to_owned()
}

fn default_true() -> bool {
    true
}

fn default_cert() -> PathBuf {
    PathBuf::from("ssl/certs/agent.pem")
}

fn default_key() -> PathBuf {
    PathBuf::from("ssl/private_keys/agent.pem")
}

fn default_ca_cert() -> PathBuf {
    PathBuf::from("ssl/certs/ca.pem")
}

fn default_localconfig() -> PathBuf {
    PathBuf::from("state/localconfig.json")
}

fn default_statefile() -> PathBuf {
    PathBuf::from("state/state.json")
}

fn default_bucket_path() -> PathBuf {
    PathBuf::from("clientbucket")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = AgentConfig::parse("").expect("parse");
        assert!(cfg.server.is_none());
        assert!(cfg.agent.cache);
        assert_eq!(cfg.ssl, SslSection::default());
        assert!(cfg.server_address().is_none());
    }

    #[test]
    fn server_section_defaults_port_and_path() {
        let cfg = AgentConfig::parse("[server]\nhost = 'authority.lan'\n").expect("parse");
        let addr = cfg.server_address().expect("server");
        assert_eq!(addr.port, DEFAULT_PORT);
        assert_eq!(addr.path, DEFAULT_PATH);
        assert!(cfg.timeout().is_none());
    }

    #[test]
    fn load_rebases_relative_paths() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("agent.toml");
        fs::write(
            &path,
            "[server]\nhost = 'authority.lan'\ntimeout_secs = 5\n\n[agent]\ncache = false\nstatefile = '/var/lib/agent/state.json'\n",
        )
        .unwrap();
        let cfg = AgentConfig::load(&path).expect("load");
        assert_eq!(cfg.ssl.cert, dir.path().join("ssl/certs/agent.pem"));
        assert_eq!(cfg.agent.localconfig, dir.path().join("state/localconfig.json"));
        assert_eq!(cfg.agent.statefile, PathBuf::from("/var/lib/agent/state.json"));
        assert!(!cfg.agent.cache);
        assert_eq!(cfg.timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn invalid_toml_is_invalid_data() {
        let err = AgentConfig::parse("[server\nhost=").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn configured_certname_is_lower_cased() {
        let cfg = AgentConfig::parse("[agent]\ncertname = 'Node1.LAN'\n").expect("parse");
        assert_eq!(cfg.certname(), "node1.lan");
    }
}
