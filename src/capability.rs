// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Capability descriptors and the macro that turns them into typed handlers.
// Author: Lukas Bower

//! Capability table plumbing.
//!
//! Every remote namespace is declared once with [`declare_handler!`]. The
//! declaration yields a handler trait, its [`HandlerDescriptor`], a blanket
//! implementation over any [`Dispatch`] (so a [`TransportClient`] is a handler
//! for every namespace), and optionally a proxy client.
//!
//! [`TransportClient`]: crate::net::TransportClient

use crate::error::ClientError;
use crate::net::TransportClient;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub use crate::handlers::CAPABILITIES;

/// One remote namespace and its ordered method list.
#[derive(Debug, PartialEq, Eq)]
pub struct HandlerDescriptor {
    pub namespace: &'static str,
    pub methods: &'static [&'static str],
}

impl HandlerDescriptor {
    pub fn has_method(&self, method: &str) -> bool {
        self.methods.contains(&method)
    }

    /// Fully qualified `namespace.method` keys, in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = String> + '_ {
        self.methods
            .iter()
            .map(move |method| format!("{}.{method}", self.namespace))
    }
}

/// Immutable registry of every descriptor the agent knows about.
#[derive(Debug)]
pub struct CapabilityTable {
    handlers: &'static [&'static HandlerDescriptor],
}

impl CapabilityTable {
    pub const fn new(handlers: &'static [&'static HandlerDescriptor]) -> Self {
        Self { handlers }
    }

    pub fn handler(&self, namespace: &str) -> Option<&'static HandlerDescriptor> {
        self.handlers
            .iter()
            .copied()
            .find(|desc| desc.namespace == namespace)
    }

    /// Split `namespace.method` and check both halves are declared.
    pub fn resolve(
        &self,
        key: &str,
    ) -> Result<(&'static HandlerDescriptor, &'static str), ClientError> {
        let unknown = || ClientError::UnknownCapability(key.to_owned());
        let (namespace, method) = key.split_once('.').ok_or_else(unknown)?;
        let desc = self.handler(namespace).ok_or_else(unknown)?;
        let method = desc
            .methods
            .iter()
            .copied()
            .find(|m| *m == method)
            .ok_or_else(unknown)?;
        Ok((desc, method))
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static HandlerDescriptor> {
        self.handlers.iter().copied()
    }

    /// Number of callables the table exposes.
    pub fn callable_count(&self) -> usize {
        self.handlers.iter().map(|desc| desc.methods.len()).sum()
    }

    /// Reject duplicate namespaces or duplicate methods within a namespace.
    pub fn validate(&self) -> Result<(), String> {
        for (idx, desc) in self.handlers.iter().enumerate() {
            if self.handlers[..idx]
                .iter()
                .any(|other| other.namespace == desc.namespace)
            {
                return Err(format!("namespace {} declared twice", desc.namespace));
            }
            for (midx, method) in desc.methods.iter().enumerate() {
                if desc.methods[..midx].contains(method) {
                    return Err(format!("{}.{method} declared twice", desc.namespace));
                }
            }
        }
        Ok(())
    }
}

/// Generic `namespace.method` invocation with positional JSON arguments.
pub trait Dispatch {
    fn dispatch(&self, namespace: &str, method: &str, args: Vec<Value>)
        -> Result<Value, ClientError>;
}

/// Handler trait objects that a transport can stand in for.
pub trait RemoteBinding {
    const DESCRIPTOR: HandlerDescriptor;

    fn bind(transport: TransportClient) -> Box<Self>;
}

#[doc(hidden)]
pub fn encode_arg<T: Serialize + ?Sized>(key: &str, arg: &T) -> Result<Value, ClientError> {
    serde_json::to_value(arg).map_err(|source| ClientError::Encode {
        key: key.to_owned(),
        source,
    })
}

#[doc(hidden)]
pub fn decode_reply<T: DeserializeOwned>(key: &str, value: Value) -> Result<T, ClientError> {
    serde_json::from_value(value).map_err(|source| ClientError::Decode {
        key: key.to_owned(),
        source,
    })
}

/// Surface handler-declared faults the way remote faults surface.
pub fn translate_fault<T>(result: Result<T, ClientError>) -> Result<T, ClientError> {
    result.map_err(|err| match err {
        ClientError::HandlerFault { message, .. } => ClientError::RemoteFault(message),
        other => other,
    })
}

/// Declare a remote namespace.
///
/// ```ignore
/// declare_handler! {
///     pub trait CaHandler in "ca" as CA, proxy CaClient {
///         fn getcert(csr: &str) -> (String, String);
///     }
/// }
/// ```
macro_rules! declare_handler {
    (
        $(#[$meta:meta])*
        $vis:vis trait $name:ident in $ns:literal as $desc:ident, proxy $proxy:ident {
            $(
                $(#[$mmeta:meta])*
                fn $method:ident ( $( $arg:ident : $ty:ty ),* $(,)? ) -> $ret:ty ;
            )*
        }
    ) => {
        $crate::capability::declare_handler! {
            $(#[$meta])*
            $vis trait $name in $ns as $desc {
                $(
                    $(#[$mmeta])*
                    fn $method ( $( $arg : $ty ),* ) -> $ret ;
                )*
            }
        }

        #[doc = concat!("Client for the `", $ns, "` namespace, remote or local.")]
        $vis struct $proxy {
            inner: $crate::client::Client<dyn $name>,
        }

        impl $proxy {
            pub fn new(
                settings: $crate::client::ClientSettings<dyn $name>,
                connector: &$crate::net::Connector,
            ) -> Result<Self, $crate::error::ClientError> {
                Ok(Self {
                    inner: $crate::client::Client::new(settings, connector)?,
                })
            }

            pub fn from_client(inner: $crate::client::Client<dyn $name>) -> Self {
                Self { inner }
            }

            pub fn client(&self) -> &$crate::client::Client<dyn $name> {
                &self.inner
            }

            $(
                $(#[$mmeta])*
                pub fn $method(&self, $( $arg : $ty ),*) -> Result<$ret, $crate::error::ClientError> {
                    $crate::capability::translate_fault($name::$method(self.inner.handler(), $( $arg ),*))
                }
            )*
        }
    };
    (
        $(#[$meta:meta])*
        $vis:vis trait $name:ident in $ns:literal as $desc:ident {
            $(
                $(#[$mmeta:meta])*
                fn $method:ident ( $( $arg:ident : $ty:ty ),* $(,)? ) -> $ret:ty ;
            )*
        }
    ) => {
        $(#[$meta])*
        $vis trait $name {
            $(
                $(#[$mmeta])*
                fn $method(&self, $( $arg : $ty ),*) -> Result<$ret, $crate::error::ClientError>;
            )*
        }

        #[doc = concat!("Descriptor of the `", $ns, "` namespace.")]
        $vis const $desc: $crate::capability::HandlerDescriptor =
            $crate::capability::HandlerDescriptor {
                namespace: $ns,
                methods: &[$( stringify!($method) ),*],
            };

        impl<D: $crate::capability::Dispatch + ?Sized> $name for D {
            $(
                fn $method(&self, $( $arg : $ty ),*) -> Result<$ret, $crate::error::ClientError> {
                    let key = concat!($ns, ".", stringify!($method));
                    let args = vec![$( $crate::capability::encode_arg(key, &$arg)? ),*];
                    let reply = $crate::capability::Dispatch::dispatch(
                        self,
                        $ns,
                        stringify!($method),
                        args,
                    )?;
                    $crate::capability::decode_reply(key, reply)
                }
            )*
        }

        impl $crate::capability::RemoteBinding for dyn $name {
            const DESCRIPTOR: $crate::capability::HandlerDescriptor = $desc;

            fn bind(transport: $crate::net::TransportClient) -> Box<Self> {
                Box::new(transport)
            }
        }
    };
}

pub(crate) use declare_handler;
