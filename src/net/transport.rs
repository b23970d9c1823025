// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: HTTPS RPC transport and failure classification for authority calls.
// Author: Lukas Bower

use super::{ServerAddress, TrustMaterial};
use crate::capability::{Dispatch, CAPABILITIES};
use crate::error::{ClientError, Fatal};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;
use std::net::ToSocketAddrs;
use std::time::Duration;
use ureq::{Agent, Error as UreqError};

#[derive(Serialize)]
struct RpcRequest<'a> {
    method: &'a str,
    params: &'a [Value],
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
enum RpcResponse {
    Result(Value),
    Fault(RpcFault),
}

#[derive(Debug, Deserialize, PartialEq)]
struct RpcFault {
    #[serde(default)]
    code: i64,
    message: String,
}

/// Outcome of classifying a transport failure.
#[derive(Debug)]
pub(crate) enum Classified {
    Error(ClientError),
    Fatal(Fatal),
}

/// Map a raw HTTP client failure onto the client error taxonomy.
pub(crate) fn classify(err: UreqError, server: &ServerAddress) -> Classified {
    let unreachable = || ClientError::Unreachable {
        host: server.host.clone(),
        port: server.port,
    };
    match err {
        UreqError::HostNotFound => Classified::Fatal(Fatal::UnresolvedHost {
            host: server.host.clone(),
        }),
        UreqError::ConnectionFailed | UreqError::Timeout(_) => Classified::Error(unreachable()),
        UreqError::Io(ref io) if is_connect_failure(io) => Classified::Error(unreachable()),
        UreqError::Io(ref io) if is_tls_rejection(io) => {
            Classified::Error(ClientError::UntrustedPeer)
        }
        UreqError::Tls(_) | UreqError::Rustls(_) => Classified::Error(ClientError::UntrustedPeer),
        other => {
            error!("call to {server} failed: {other:?}");
            Classified::Error(ClientError::Transport(other))
        }
    }
}

fn is_connect_failure(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::TimedOut | io::ErrorKind::AddrNotAvailable
    )
}

fn is_tls_rejection(err: &io::Error) -> bool {
    err.get_ref()
        .map(|inner| inner.is::<rustls::Error>())
        .unwrap_or(false)
}

/// Whether the authority name resolves. Only consulted after ureq's own
/// lookup, which honours the configured timeout, has already failed.
fn check_resolvable(server: &ServerAddress) -> Result<(), Fatal> {
    match (server.host.as_str(), server.port).to_socket_addrs() {
        Ok(addrs) if addrs.len() > 0 => Ok(()),
        Ok(_) | Err(_) => Err(Fatal::UnresolvedHost {
            host: server.host.clone(),
        }),
    }
}

/// Blocking RPC client bound to one authority.
#[derive(Debug)]
pub struct TransportClient {
    server: ServerAddress,
    agent: Agent,
    authenticated: bool,
}

impl TransportClient {
    pub fn new(
        server: ServerAddress,
        trust: Option<&TrustMaterial>,
        timeout: Option<Duration>,
    ) -> Result<Self, ClientError> {
        debug_assert!(CAPABILITIES.validate().is_ok(), "capability table is inconsistent");
        let mut config_builder = Agent::config_builder().proxy(None);
        if timeout.is_some() {
            config_builder = config_builder.timeout_global(timeout);
        }
        match trust {
            Some(material) => {
                debug!("presenting certificate for {} to {server}", material.subject());
                config_builder = config_builder.tls_config(material.tls_config());
            }
            None => warn!(
                "no certificate installed; calls to {server} run with reduced functionality"
            ),
        }
        Ok(Self {
            server,
            agent: config_builder.build().new_agent(),
            authenticated: trust.is_some(),
        })
    }

    pub fn server(&self) -> &ServerAddress {
        &self.server
    }

    /// Whether a client certificate is presented on every call.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Invoke `namespace.method` after checking it against the capability table.
    pub fn call(&self, key: &str, params: Vec<Value>) -> Result<Value, ClientError> {
        CAPABILITIES.resolve(key)?;
        self.invoke(key, params)
    }

    fn invoke(&self, key: &str, params: Vec<Value>) -> Result<Value, ClientError> {
        let body = serde_json::to_string(&RpcRequest {
            method: key,
            params: &params,
        })
        .map_err(|source| ClientError::Encode {
            key: key.to_owned(),
            source,
        })?;
        debug!("calling {key} on {}", self.server);
        let text = self
            .agent
            .post(&self.server.url())
            .content_type("application/json")
            .send(body)
            .and_then(|response| response.into_body().read_to_string())
            .map_err(|err| self.fail(err))?;
        let reply: RpcResponse =
            serde_json::from_str(&text).map_err(|source| ClientError::Decode {
                key: key.to_owned(),
                source,
            })?;
        match reply {
            RpcResponse::Result(value) => Ok(value),
            RpcResponse::Fault(fault) => {
                debug!("{key} faulted with code {}", fault.code);
                Err(ClientError::RemoteFault(fault.message))
            }
        }
    }

    fn fail(&self, err: UreqError) -> ClientError {
        // A failed lookup surfaces from ureq as a bare io error.
        if let UreqError::Io(ref io) = err {
            if !is_connect_failure(io) && !is_tls_rejection(io) {
                if let Err(fatal) = check_resolvable(&self.server) {
                    fatal.terminate();
                }
            }
        }
        match classify(err, &self.server) {
            Classified::Error(err) => err,
            Classified::Fatal(fatal) => fatal.terminate(),
        }
    }
}

impl Dispatch for TransportClient {
    fn dispatch(
        &self,
        namespace: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, ClientError> {
        self.invoke(&format!("{namespace}.{method}"), args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ghost() -> ServerAddress {
        ServerAddress::new("ghost.example", 8140)
    }

    #[test]
    fn refused_connection_is_unreachable() {
        let err = UreqError::Io(io::Error::from(io::ErrorKind::ConnectionRefused));
        match classify(err, &ghost()) {
            Classified::Error(ClientError::Unreachable { host, port }) => {
                assert_eq!(host, "ghost.example");
                assert_eq!(port, 8140);
            }
            other => panic!("unexpected classification {other:?}"),
        }
    }

    #[test]
    fn connection_failure_is_unreachable() {
        assert!(matches!(
            classify(UreqError::ConnectionFailed, &ghost()),
            Classified::Error(ClientError::Unreachable { .. })
        ));
    }

    #[test]
    fn unknown_host_is_fatal() {
        match classify(UreqError::HostNotFound, &ghost()) {
            Classified::Fatal(fatal) => {
                assert_eq!(fatal.exit_code(), crate::error::EXIT_UNRESOLVED_HOST)
            }
            other => panic!("unexpected classification {other:?}"),
        }
    }

    #[test]
    fn rustls_failure_inside_io_is_untrusted() {
        let inner = rustls::Error::InvalidCertificate(rustls::CertificateError::UnknownIssuer);
        let err = UreqError::Io(io::Error::new(io::ErrorKind::InvalidData, inner));
        assert!(matches!(
            classify(err, &ghost()),
            Classified::Error(ClientError::UntrustedPeer)
        ));
    }

    #[test]
    fn other_failures_pass_through() {
        assert!(matches!(
            classify(UreqError::StatusCode(500), &ghost()),
            Classified::Error(ClientError::Transport(UreqError::StatusCode(500)))
        ));
    }

    #[test]
    fn replies_parse_as_result_or_fault() {
        let ok: RpcResponse = serde_json::from_str(r#"{"result":["a",1]}"#).unwrap();
        assert_eq!(ok, RpcResponse::Result(json!(["a", 1])));
        let null: RpcResponse = serde_json::from_str(r#"{"result":null}"#).unwrap();
        assert_eq!(null, RpcResponse::Result(Value::Null));
        let fault: RpcResponse =
            serde_json::from_str(r#"{"fault":{"code":3,"message":"denied"}}"#).unwrap();
        assert_eq!(
            fault,
            RpcResponse::Fault(RpcFault {
                code: 3,
                message: "denied".into()
            })
        );
    }

    #[test]
    fn request_body_carries_method_and_positional_params() {
        let params = [json!("abc"), json!(true)];
        let body = serde_json::to_value(RpcRequest {
            method: "fileserver.list",
            params: &params,
        })
        .unwrap();
        assert_eq!(
            body,
            json!({"method": "fileserver.list", "params": ["abc", true]})
        );
    }

    #[test]
    fn resolvability_check_distinguishes_names() {
        assert!(check_resolvable(&ServerAddress::new("127.0.0.1", 8140)).is_ok());
        assert!(matches!(
            check_resolvable(&ServerAddress::new("ghost.invalid", 8140)),
            Err(Fatal::UnresolvedHost { host }) if host == "ghost.invalid"
        ));
    }

    #[test]
    fn new_transport_checks_the_capability_table() {
        let client = TransportClient::new(ServerAddress::new("authority.lan", 8140), None, None)
            .expect("client");
        assert!(!client.is_authenticated());
        assert!(CAPABILITIES.validate().is_ok());
    }

    #[test]
    fn unlisted_capability_is_rejected_before_dialling() {
        let client =
            TransportClient::new(ServerAddress::new("127.0.0.1", 1), None, None).expect("client");
        let err = client.call("master.nosuch", Vec::new()).unwrap_err();
        assert!(matches!(err, ClientError::UnknownCapability(key) if key == "master.nosuch"));
    }
}
