// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Remote namespaces the agent can call on its authority.
// Author: Lukas Bower

use crate::capability::{declare_handler, CapabilityTable};

declare_handler! {
    /// Configuration compilation on the authority.
    pub trait MasterHandler in "master" as MASTER {
        /// Compile a configuration for base64-encoded JSON facts; returns an
        /// encoded payload, empty when nothing could be compiled.
        fn getconfig(facts: &str) -> String;
    }
}

declare_handler! {
    /// Content-addressed file store.
    pub trait BucketHandler in "bucket" as BUCKET {
        /// Store base64 `contents` backed up from `path`; returns the checksum.
        fn addfile(contents: &str, path: &str) -> String;
        /// Base64 contents stored under `sum`, if any.
        fn getfile(sum: &str) -> Option<String>;
    }
}

declare_handler! {
    /// Certificate authority.
    pub trait CaHandler in "ca" as CA, proxy CaClient {
        /// Submit a PEM CSR; returns `(certificate, authority certificate)`.
        fn getcert(csr: &str) -> (String, String);
    }
}

declare_handler! {
    pub trait FileHandler in "fileserver" as FILESERVER, proxy FileClient {
        fn describe(path: &str) -> String;
        fn list(path: &str, recurse: bool, ignore: Vec<String>) -> String;
        fn retrieve(path: &str) -> String;
    }
}

declare_handler! {
    pub trait LogHandler in "logger" as LOGGER, proxy LogClient {
        fn addlog(message: &str) -> bool;
    }
}

declare_handler! {
    pub trait StatusHandler in "status" as STATUS, proxy StatusClient {
        fn status() -> i64;
    }
}

/// Every namespace the agent knows how to call.
pub const CAPABILITIES: CapabilityTable =
    CapabilityTable::new(&[&MASTER, &BUCKET, &CA, &FILESERVER, &LOGGER, &STATUS]);

#[cfg(test)]
pub(crate) mod testing {
    use crate::capability::Dispatch;
    use crate::error::ClientError;
    use serde_json::Value;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// Call recorded by [`Recorder`].
    #[derive(Debug, Clone, PartialEq)]
    pub struct Recorded {
        pub key: String,
        pub args: Vec<Value>,
    }

    /// Dispatcher that records calls and answers from a queue. Clones share
    /// both the log and the queue.
    #[derive(Clone, Default)]
    pub struct Recorder {
        pub calls: Rc<RefCell<Vec<Recorded>>>,
        replies: Rc<RefCell<VecDeque<Result<Value, ClientError>>>>,
    }

    impl Recorder {
        pub fn replying(replies: impl IntoIterator<Item = Result<Value, ClientError>>) -> Self {
            Self {
                calls: Rc::default(),
                replies: Rc::new(RefCell::new(replies.into_iter().collect())),
            }
        }

        pub fn keys(&self) -> Vec<String> {
            self.calls.borrow().iter().map(|c| c.key.clone()).collect()
        }
    }

    impl Dispatch for Recorder {
        fn dispatch(
            &self,
            namespace: &str,
            method: &str,
            args: Vec<Value>,
        ) -> Result<Value, ClientError> {
            self.calls.borrow_mut().push(Recorded {
                key: format!("{namespace}.{method}"),
                args,
            });
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or(Ok(Value::Null))
        }
    }
}
