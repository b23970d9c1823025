// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Command dispatch for the pullagent binary.
// Author: Lukas Bower

//! CLI module. Exports the argument parser and the command runner.

pub mod args;

pub use args::{Cli, Command};

use crate::client::{
    BucketClient, CertStatus, Client, ClientSettings, ConfigFetcher, FetchPaths, LocalMaster,
    RestoreOutcome,
};
use crate::config::AgentConfig;
use crate::facts::HostFacts;
use crate::handlers::{CaClient, MasterHandler, StatusClient};
use crate::net::{Connector, Networking, ServerAddress, TrustStore};
use anyhow::{anyhow, Context, Result};
use log::info;
use pullagent_cas::Checksum;
use serde_json::Value;

/// Execute one CLI command.
pub fn run(cli: Cli) -> Result<()> {
    let cfg = AgentConfig::load(&cli.config)
        .with_context(|| format!("cannot read {}", cli.config.display()))?;
    let mut store = TrustStore::load(cfg.trust_paths())?;
    let connector = Connector::new(Networking::detect())
        .with_trust(&store)
        .with_timeout(cfg.timeout());
    match cli.cmd {
        Command::Fetch { no_cache, print } => {
            let server = require_server(&cfg)?;
            let certname = cfg.certname();
            let settings = ClientSettings::<dyn LocalMaster>::remote(server.clone())
                .with_cache(cfg.agent.cache && !no_cache);
            let client = Client::<dyn MasterHandler, dyn LocalMaster>::new(settings, &connector)?;
            let mut fetcher = ConfigFetcher::new(
                client,
                Box::new(HostFacts::new(certname.clone())),
                certname,
                FetchPaths {
                    cache: cfg.agent.localconfig.clone(),
                    state: cfg.agent.statefile.clone(),
                },
            );
            let ca = CaClient::new(ClientSettings::remote(server), &connector)?;
            if fetcher.initcerts(&mut store, &ca, &connector)? == CertStatus::Issued {
                info!("certificate issued and installed");
            }
            let source = fetcher.getconfig()?;
            if let Some(config) = fetcher.config() {
                println!(
                    "{} ({} objects, {source:?})",
                    config.name,
                    config.objects().len()
                );
                if print {
                    println!("{}", serde_json::to_string_pretty(config)?);
                }
            }
        }
        Command::Backup { file } => {
            let sum = bucket_client(&cfg, &connector)?.backup(&file)?;
            println!("{sum}");
        }
        Command::Restore { file, checksum } => {
            let sum: Checksum = checksum.parse()?;
            match bucket_client(&cfg, &connector)?.restore(&file, &sum)? {
                RestoreOutcome::Restored(sum) => println!("restored {} to {sum}", file.display()),
                RestoreOutcome::NoOpNeeded => println!("{} already current", file.display()),
                RestoreOutcome::NotFound => {
                    return Err(anyhow!("no file with checksum {sum} in the bucket"))
                }
            }
        }
        Command::Status => {
            let server = require_server(&cfg)?;
            let status = StatusClient::new(ClientSettings::remote(server), &connector)?.status()?;
            println!("{status}");
        }
        Command::Call { key, args } => {
            let server = require_server(&cfg)?;
            let params = args.iter().map(|arg| parse_arg(arg)).collect();
            let reply = connector.connect(&server)?.call(&key, params)?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
    }
    Ok(())
}

fn require_server(cfg: &AgentConfig) -> Result<ServerAddress> {
    cfg.server_address()
        .ok_or_else(|| anyhow!("no [server] configured"))
}

fn bucket_client(cfg: &AgentConfig, connector: &Connector) -> Result<BucketClient> {
    match cfg.server_address() {
        Some(server) if !cfg.bucket.local => {
            Ok(BucketClient::new(ClientSettings::remote(server), connector)?)
        }
        _ => Ok(BucketClient::local(cfg.bucket.path.clone())?),
    }
}

/// JSON when it parses, otherwise the literal string.
fn parse_arg(arg: &str) -> Value {
    serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn call_arguments_prefer_json() {
        assert_eq!(parse_arg("true"), json!(true));
        assert_eq!(parse_arg("[1,2]"), json!([1, 2]));
        assert_eq!(parse_arg("/etc/motd"), json!("/etc/motd"));
    }

    #[test]
    fn local_backup_without_server() {
        let dir = tempdir().expect("tempdir");
        let config = dir.path().join("agent.toml");
        fs::write(&config, "[bucket]\npath = 'bucket'\n").unwrap();
        let file = dir.path().join("motd");
        fs::write(&file, "hello").unwrap();
        run(Cli {
            config: config.clone(),
            cmd: Command::Backup { file: file.clone() },
        })
        .expect("backup");
        assert!(dir.path().join("bucket/FORMAT").exists());
    }

    #[test]
    fn status_requires_a_server() {
        let dir = tempdir().expect("tempdir");
        let config = dir.path().join("agent.toml");
        fs::write(&config, "").unwrap();
        let err = run(Cli {
            config,
            cmd: Command::Status,
        })
        .unwrap_err();
        assert!(err.to_string().contains("no [server] configured"));
    }
}
