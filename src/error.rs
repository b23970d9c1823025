// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Error taxonomy shared by the transport and the dual-mode clients.
// Author: Lukas Bower

//! Errors surfaced to callers, plus the two process-terminating conditions.

use log::error;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Exit status used when the authority hostname cannot be resolved.
pub const EXIT_UNRESOLVED_HOST: i32 = 12;
/// Exit status used when a corrupt state file cannot be cleared.
pub const EXIT_STATE_UNRECOVERABLE: i32 = 13;

/// Recoverable failures of client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("networking not available: {0}")]
    NetworkUnavailable(String),
    #[error("certificates were not trusted")]
    UntrustedPeer,
    #[error("{0}")]
    RemoteFault(String),
    #[error("could not connect to {host} on port {port}")]
    Unreachable { host: String, port: u16 },
    /// Fault declared by a handler before proxy translation.
    #[error("handler fault {code}: {message}")]
    HandlerFault { code: i32, message: String },
    #[error("{0} client must be given a server or a local driver")]
    MissingDriverOrServer(&'static str),
    #[error("no certificate installed; refusing unauthenticated call")]
    NotAuthenticated,
    #[error("could not retrieve any facts")]
    NoFacts,
    #[error("could not retrieve configuration")]
    ConfigUnavailable,
    #[error("cannot connect to server and there is no cached configuration")]
    NoCachedConfig,
    #[error("invalid returned objects of type {0}")]
    InvalidConfigPayload(String),
    #[error("could not understand configuration: {0}")]
    UndecodableConfig(String),
    #[error("cannot apply; no configuration has been retrieved")]
    NoConfiguration,
    #[error("certificate request for {0} was not fulfilled")]
    CertificateNotIssued(String),
    #[error("file {} does not exist", .0.display())]
    FileNotFound(PathBuf),
    #[error("bucket returned content with checksum {found} for {expected}")]
    ChecksumMismatch {
        expected: pullagent_cas::Checksum,
        found: pullagent_cas::Checksum,
    },
    #[error("unknown capability {0}")]
    UnknownCapability(String),
    #[error("invalid trust material {}: {reason}", .path.display())]
    TrustMaterial { path: PathBuf, reason: String },
    #[error("could not encode arguments for {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not decode reply to {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid base64 in {context}: {source}")]
    Base64 {
        context: String,
        #[source]
        source: base64::DecodeError,
    },
    #[error("could not generate certificate request: {0}")]
    KeyGeneration(#[from] rcgen::Error),
    #[error(transparent)]
    Store(#[from] pullagent_cas::StoreError),
    /// Unclassified transport failure, passed through unchanged.
    #[error(transparent)]
    Transport(#[from] ureq::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ClientError {
    /// Build a handler fault, the way local drivers reject a call.
    pub fn fault(code: i32, message: impl Into<String>) -> Self {
        Self::HandlerFault {
            code,
            message: message.into(),
        }
    }
}

/// Conditions with no safe continuation; they end the process.
#[derive(Debug, Error)]
pub enum Fatal {
    #[error("could not find server {host}")]
    UnresolvedHost { host: String },
    #[error("cannot remove corrupt state file {}: {reason}", .path.display())]
    StateUnrecoverable { path: PathBuf, reason: String },
}

impl Fatal {
    /// Process exit status associated with this condition.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::UnresolvedHost { .. } => EXIT_UNRESOLVED_HOST,
            Self::StateUnrecoverable { .. } => EXIT_STATE_UNRECOVERABLE,
        }
    }

    /// Log the condition and exit.
    pub fn terminate(self) -> ! {
        error!("{self}");
        std::process::exit(self.exit_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_names_the_target() {
        let err = ClientError::Unreachable {
            host: "ghost.example".into(),
            port: 8140,
        };
        assert_eq!(
            err.to_string(),
            "could not connect to ghost.example on port 8140"
        );
    }

    #[test]
    fn fatal_exit_codes_are_distinct() {
        let host = Fatal::UnresolvedHost { host: "x".into() };
        let state = Fatal::StateUnrecoverable {
            path: PathBuf::from("/tmp/state.json"),
            reason: "busy".into(),
        };
        assert_eq!(host.exit_code(), EXIT_UNRESOLVED_HOST);
        assert_eq!(state.exit_code(), EXIT_STATE_UNRECOVERABLE);
        assert_ne!(host.exit_code(), state.exit_code());
    }
}
