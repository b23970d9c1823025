// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Network capability detection, authority addressing and connection setup.
// Author: Lukas Bower

//! Networking primitives shared by every remote-mode client.
//!
//! [`Networking`] is probed once at process start and handed to a
//! [`Connector`], which every dual-mode client consults before building a
//! [`TransportClient`].

pub mod transport;
pub mod trust;

pub use transport::TransportClient;
pub use trust::{TrustMaterial, TrustPaths, TrustStore};

use crate::error::ClientError;
use std::fmt;
use std::net::{Ipv4Addr, UdpSocket};
use std::time::Duration;

/// Default authority port.
pub const DEFAULT_PORT: u16 = 8140;
/// Default RPC endpoint path on the authority.
pub const DEFAULT_PATH: &str = "/RPC2";

/// Whether this process can open network sockets at all.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Networking {
    Available,
    Unavailable(String),
}

impl Networking {
    /// Probe the socket layer by binding an ephemeral loopback UDP socket.
    pub fn detect() -> Self {
        match UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)) {
            Ok(_) => Self::Available,
            Err(err) => Self::Unavailable(err.to_string()),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}

/// Authority endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            path: DEFAULT_PATH.to_owned(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        self
    }

    /// HTTPS URL of the RPC endpoint.
    pub fn url(&self) -> String {
        if self.host.contains(':') {
            format!("https://[{}]:{}{}", self.host, self.port, self.path)
        } else {
            format!("https://{}:{}{}", self.host, self.port, self.path)
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Everything needed to open a [`TransportClient`].
#[derive(Clone, Debug)]
pub struct Connector {
    networking: Networking,
    trust: Option<TrustMaterial>,
    timeout: Option<Duration>,
}

impl Connector {
    pub fn new(networking: Networking) -> Self {
        Self {
            networking,
            trust: None,
            timeout: None,
        }
    }

    /// Attach whatever trust material `store` currently holds.
    pub fn with_trust(mut self, store: &TrustStore) -> Self {
        self.trust = store.material().cloned();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn networking(&self) -> &Networking {
        &self.networking
    }

    pub fn trust(&self) -> Option<&TrustMaterial> {
        self.trust.as_ref()
    }

    /// Open a transport to `server`, failing fast when networking is missing.
    pub fn connect(&self, server: &ServerAddress) -> Result<TransportClient, ClientError> {
        if let Networking::Unavailable(reason) = &self.networking {
            return Err(ClientError::NetworkUnavailable(reason.clone()));
        }
        TransportClient::new(server.clone(), self.trust.as_ref(), self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_uses_https_and_path() {
        let addr = ServerAddress::new("authority.lan", 8140);
        assert_eq!(addr.url(), "https://authority.lan:8140/RPC2");
        let addr = addr.with_path("rpc");
        assert_eq!(addr.url(), "https://authority.lan:8140/rpc");
    }

    #[test]
    fn url_brackets_ipv6_hosts() {
        let addr = ServerAddress::new("::1", 9000);
        assert_eq!(addr.url(), "https://[::1]:9000/RPC2");
    }

    #[test]
    fn connect_fails_fast_without_networking() {
        let connector = Connector::new(Networking::Unavailable("no sockets".into()));
        let err = connector
            .connect(&ServerAddress::new("authority.lan", DEFAULT_PORT))
            .unwrap_err();
        assert!(matches!(err, ClientError::NetworkUnavailable(reason) if reason == "no sockets"));
    }
}
