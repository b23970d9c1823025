// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Dual-mode client base choosing between a remote authority and a local driver.
// Author: Lukas Bower

//! Dual-mode clients.
//!
//! A [`Client`] is built once from [`ClientSettings`] and is then either bound
//! to a remote authority through a [`TransportClient`] or to an in-process
//! driver. The mode never changes afterwards.
//!
//! [`TransportClient`]: crate::net::TransportClient

pub mod bucket;
pub mod master;

pub use bucket::{BucketClient, LocalBucket, RestoreOutcome};
pub use master::{CertStatus, ConfigFetcher, ConfigSource, FetchPaths, LocalMaster};

use crate::capability::RemoteBinding;
use crate::error::ClientError;
use crate::net::{Connector, ServerAddress};
use log::debug;

/// Construction input for a [`Client`].
pub struct ClientSettings<L: ?Sized> {
    pub server: Option<ServerAddress>,
    pub driver: Option<Box<L>>,
    pub cache: bool,
}

impl<L: ?Sized> Default for ClientSettings<L> {
    fn default() -> Self {
        Self {
            server: None,
            driver: None,
            cache: true,
        }
    }
}

impl<L: ?Sized> ClientSettings<L> {
    pub fn remote(server: ServerAddress) -> Self {
        Self {
            server: Some(server),
            ..Self::default()
        }
    }

    pub fn local(driver: Box<L>) -> Self {
        Self {
            driver: Some(driver),
            ..Self::default()
        }
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }
}

enum Mode<R: ?Sized, L: ?Sized> {
    Remote {
        server: ServerAddress,
        handler: Box<R>,
        authenticated: bool,
    },
    Local(Box<L>),
}

/// Borrowed view of whichever side a client is bound to.
pub enum Route<'a, R: ?Sized, L: ?Sized> {
    Remote(&'a R),
    Local(&'a L),
}

/// Client bound either to a remote handler `R` or a local driver `L`.
pub struct Client<R: ?Sized + RemoteBinding, L: ?Sized = R> {
    mode: Mode<R, L>,
    cache: bool,
}

impl<R: ?Sized + RemoteBinding, L: ?Sized> Client<R, L> {
    /// Resolve `settings` into a bound client.
    ///
    /// A server takes precedence over a driver; with neither the
    /// construction fails.
    pub fn new(settings: ClientSettings<L>, connector: &Connector) -> Result<Self, ClientError> {
        let ClientSettings {
            server,
            driver,
            cache,
        } = settings;
        let namespace = R::DESCRIPTOR.namespace;
        let mode = match (server, driver) {
            (Some(server), driver) => {
                if driver.is_some() {
                    debug!("{namespace}: server {server} given, ignoring local driver");
                }
                let transport = connector.connect(&server)?;
                Mode::Remote {
                    server,
                    authenticated: transport.is_authenticated(),
                    handler: R::bind(transport),
                }
            }
            (None, Some(driver)) => Mode::Local(driver),
            (None, None) => return Err(ClientError::MissingDriverOrServer(namespace)),
        };
        Ok(Self { mode, cache })
    }

    /// Local client without consulting networking.
    pub fn from_driver(driver: Box<L>, cache: bool) -> Self {
        Self {
            mode: Mode::Local(driver),
            cache,
        }
    }

    /// Remote client around an already-built handler.
    #[cfg(test)]
    pub(crate) fn from_remote_handler(
        server: ServerAddress,
        handler: Box<R>,
        authenticated: bool,
        cache: bool,
    ) -> Self {
        Self {
            mode: Mode::Remote {
                server,
                handler,
                authenticated,
            },
            cache,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self.mode, Mode::Local(_))
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache
    }

    pub fn server(&self) -> Option<&ServerAddress> {
        match &self.mode {
            Mode::Remote { server, .. } => Some(server),
            Mode::Local(_) => None,
        }
    }

    /// Whether remote calls present a client certificate. Local clients
    /// always count as authenticated.
    pub fn is_authenticated(&self) -> bool {
        match &self.mode {
            Mode::Remote { authenticated, .. } => *authenticated,
            Mode::Local(_) => true,
        }
    }

    /// Fail before touching the network when no certificate is presented.
    pub fn require_authenticated(&self) -> Result<(), ClientError> {
        if self.is_authenticated() {
            Ok(())
        } else {
            Err(ClientError::NotAuthenticated)
        }
    }

    pub fn route(&self) -> Route<'_, R, L> {
        match &self.mode {
            Mode::Remote { handler, .. } => Route::Remote(&**handler),
            Mode::Local(driver) => Route::Local(&**driver),
        }
    }

    /// Rebuild the remote transport with `connector`'s current trust
    /// material. Local clients are untouched.
    pub fn rebind(&mut self, connector: &Connector) -> Result<(), ClientError> {
        if let Mode::Remote {
            server,
            handler,
            authenticated,
        } = &mut self.mode
        {
            let transport = connector.connect(server)?;
            *authenticated = transport.is_authenticated();
            *handler = R::bind(transport);
            debug!("{}: rebound transport to {server}", R::DESCRIPTOR.namespace);
        }
        Ok(())
    }
}

impl<R: ?Sized + RemoteBinding> Client<R, R> {
    /// The handler serving calls, whichever mode is active.
    pub fn handler(&self) -> &R {
        match &self.mode {
            Mode::Remote { handler, .. } => &**handler,
            Mode::Local(driver) => &**driver,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::Recorder;
    use crate::handlers::{StatusClient, StatusHandler};
    use crate::net::{Networking, DEFAULT_PORT};
    use serde_json::json;

    fn online() -> Connector {
        Connector::new(Networking::Available)
    }

    #[test]
    fn neither_server_nor_driver_is_rejected() {
        let err = Client::<dyn StatusHandler>::new(ClientSettings::default(), &online())
            .err()
            .expect("construction must fail");
        assert!(matches!(err, ClientError::MissingDriverOrServer("status")));
    }

    #[test]
    fn driver_only_builds_local_client() {
        let client = Client::<dyn StatusHandler>::new(
            ClientSettings::<dyn StatusHandler>::local(Box::new(Recorder::default())),
            &online(),
        )
        .expect("local");
        assert!(client.is_local());
        assert!(client.server().is_none());
        assert!(client.is_authenticated());
    }

    #[test]
    fn server_takes_precedence_over_driver() {
        let settings = ClientSettings::<dyn StatusHandler> {
            server: Some(ServerAddress::new("authority.lan", DEFAULT_PORT)),
            driver: Some(Box::new(Recorder::default())),
            cache: false,
        };
        let client = Client::<dyn StatusHandler>::new(settings, &online()).expect("remote");
        assert!(!client.is_local());
        assert!(!client.cache_enabled());
        assert_eq!(client.server().map(|s| s.port), Some(DEFAULT_PORT));
        assert!(matches!(
            client.require_authenticated(),
            Err(ClientError::NotAuthenticated)
        ));
    }

    #[test]
    fn remote_mode_requires_networking() {
        let offline = Connector::new(Networking::Unavailable("sandboxed".into()));
        let err = Client::<dyn StatusHandler>::new(
            ClientSettings::remote(ServerAddress::new("authority.lan", DEFAULT_PORT)),
            &offline,
        )
        .err()
        .expect("construction must fail");
        assert!(matches!(err, ClientError::NetworkUnavailable(_)));
    }

    #[test]
    fn proxy_forwards_to_local_driver() {
        let recorder = Recorder::replying([Ok(json!(7))]);
        let proxy = StatusClient::from_client(Client::<dyn StatusHandler>::from_driver(
            Box::new(recorder),
            true,
        ));
        assert_eq!(proxy.status().expect("status"), 7);
    }

    #[test]
    fn proxy_translates_handler_faults() {
        let recorder = Recorder::replying([Err(ClientError::fault(2, "maintenance"))]);
        let proxy = StatusClient::from_client(Client::<dyn StatusHandler>::from_driver(
            Box::new(recorder),
            true,
        ));
        let err = proxy.status().unwrap_err();
        assert!(matches!(err, ClientError::RemoteFault(msg) if msg == "maintenance"));
    }

    #[test]
    fn rebind_leaves_local_clients_alone() {
        let mut client =
            Client::<dyn StatusHandler>::from_driver(Box::new(Recorder::default()), true);
        client.rebind(&online()).expect("rebind");
        assert!(client.is_local());
    }
}
