// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Client runtime of the pull-based configuration agent.
// Author: Lukas Bower

//! Root library for the pullagent client runtime: authenticated RPC to the
//! authority, configuration retrieval with cache fallback, and
//! checksum-addressed file backup.

/// Capability descriptors and handler declaration.
pub mod capability;
/// Remote namespaces and the capability table.
pub mod handlers;

/// Networking, trust material and the RPC transport.
pub mod net;

/// Dual-mode clients.
pub mod client;

pub mod apply;
pub mod config;
pub mod error;
pub mod facts;
pub mod tree;

/// CLI interface for the `pullagent` binary.
pub mod cli;

pub(crate) mod util;

pub use capability::{CapabilityTable, Dispatch, HandlerDescriptor, CAPABILITIES};
pub use error::{ClientError, Fatal};
