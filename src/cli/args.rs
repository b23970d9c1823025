// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Command-line arguments for the pullagent binary.
// Author: Lukas Bower

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI arguments for `pullagent`.
#[derive(Parser, Debug)]
#[command(name = "pullagent", about = "Pull-based configuration agent", version)]
pub struct Cli {
    /// Agent configuration file.
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "/etc/pullagent/agent.toml"
    )]
    pub config: PathBuf,
    #[command(subcommand)]
    pub cmd: Command,
}

/// Subcommands for `pullagent`.
#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Retrieve this node's configuration, requesting a certificate first
    /// when none is installed.
    Fetch {
        /// Neither read nor write the cached configuration.
        #[arg(long)]
        no_cache: bool,
        /// Print the retrieved tree as JSON.
        #[arg(long)]
        print: bool,
    },
    /// Store a file in the bucket and print its checksum.
    Backup { file: PathBuf },
    /// Restore a file from the bucket by checksum.
    Restore { file: PathBuf, checksum: String },
    /// Query the authority's status.
    Status,
    /// Invoke any declared `namespace.method` with JSON arguments.
    Call {
        key: String,
        #[arg(value_name = "JSON")]
        args: Vec<String>,
    },
}
