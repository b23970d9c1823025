// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Seams to the execution engine and metrics sink, plus persisted run state.
// Author: Lukas Bower

use crate::error::{ClientError, Fatal};
use crate::tree::ConfigBucket;
use crate::util::write_restricted;
use log::{error, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const STATE_MODE: u32 = 0o660;

/// Error type returned by engine and metrics implementations.
pub type EngineError = Box<dyn std::error::Error + Send + Sync>;

/// Applies a resolved configuration to the host.
pub trait Engine {
    fn apply(&mut self, config: &ConfigBucket, state: &mut RunState)
        -> Result<ApplyReport, EngineError>;
}

/// Collects and publishes run metrics.
pub trait Metrics {
    fn gather(&mut self, report: &ApplyReport) -> Result<(), EngineError>;
    fn report(&mut self) -> Result<(), EngineError>;
}

/// Metrics sink that discards everything.
#[derive(Debug, Default)]
pub struct NoMetrics;

impl Metrics for NoMetrics {
    fn gather(&mut self, _report: &ApplyReport) -> Result<(), EngineError> {
        Ok(())
    }

    fn report(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Summary of one apply run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub applied: usize,
    pub failed: usize,
    #[serde(default)]
    pub changes: Vec<String>,
    /// Set when the engine aborted instead of finishing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApplyReport {
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.failed == 0
    }
}

/// State carried between runs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunState(BTreeMap<String, Value>);

impl RunState {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// JSON file holding [`RunState`].
#[derive(Clone, Debug)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load state, discarding a corrupt file and retrying once.
    pub fn load_or_reset(&self) -> Result<RunState, Fatal> {
        let unrecoverable = |reason: String| Fatal::StateUnrecoverable {
            path: self.path.clone(),
            reason,
        };
        match self.load() {
            Ok(state) => Ok(state),
            Err(reason) => {
                error!("corrupt state file {}: {reason}", self.path.display());
                fs::remove_file(&self.path).map_err(|err| unrecoverable(err.to_string()))?;
                self.load().map_err(unrecoverable)
            }
        }
    }

    fn load(&self) -> Result<RunState, String> {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|err| err.to_string()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(RunState::default()),
            Err(err) => Err(err.to_string()),
        }
    }

    pub fn store(&self, state: &RunState) -> Result<(), ClientError> {
        let bytes = serde_json::to_vec_pretty(state).map_err(|source| ClientError::Encode {
            key: "state".into(),
            source,
        })?;
        write_restricted(&self.path, &bytes, STATE_MODE)?;
        Ok(())
    }
}

/// Run the engine, then metrics, never letting either abort the run.
pub(crate) fn run_engine(
    config: &ConfigBucket,
    state: &mut RunState,
    engine: &mut dyn Engine,
    metrics: &mut dyn Metrics,
) -> ApplyReport {
    let report = match engine.apply(config, state) {
        Ok(report) => report,
        Err(err) => {
            error!("could not apply complete configuration: {err}");
            ApplyReport::aborted(err.to_string())
        }
    };
    if let Err(err) = metrics.gather(&report) {
        warn!("could not gather metrics: {err}");
    }
    if let Err(err) = metrics.report() {
        warn!("could not report metrics: {err}");
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    struct Failing;

    impl Engine for Failing {
        fn apply(&mut self, _: &ConfigBucket, _: &mut RunState) -> Result<ApplyReport, EngineError> {
            Err("package manager locked".into())
        }
    }

    #[derive(Default)]
    struct Counting {
        gathered: usize,
        reported: usize,
    }

    impl Metrics for Counting {
        fn gather(&mut self, _: &ApplyReport) -> Result<(), EngineError> {
            self.gathered += 1;
            Err("sink offline".into())
        }

        fn report(&mut self) -> Result<(), EngineError> {
            self.reported += 1;
            Ok(())
        }
    }

    #[test]
    fn engine_failure_still_runs_metrics() {
        let mut metrics = Counting::default();
        let report = run_engine(
            &ConfigBucket::default(),
            &mut RunState::default(),
            &mut Failing,
            &mut metrics,
        );
        assert_eq!(report.error.as_deref(), Some("package manager locked"));
        assert!(!report.is_complete());
        assert_eq!((metrics.gathered, metrics.reported), (1, 1));
    }

    #[test]
    fn missing_state_file_is_empty_state() {
        let dir = tempdir().expect("tempdir");
        let store = StateStore::new(dir.path().join("state.json"));
        assert!(store.load_or_reset().expect("load").is_empty());
    }

    #[test]
    fn state_round_trips_through_disk() {
        let dir = tempdir().expect("tempdir");
        let store = StateStore::new(dir.path().join("var/state.json"));
        let mut state = RunState::default();
        state.insert("/etc/motd", json!({"checksum": "abc"}));
        store.store(&state).expect("store");
        assert_eq!(store.load_or_reset().expect("load"), state);
    }

    #[test]
    fn corrupt_state_file_is_removed_and_reset() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();
        let store = StateStore::new(&path);
        assert!(store.load_or_reset().expect("reset").is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn unremovable_corrupt_state_is_fatal() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        fs::create_dir(&path).unwrap();
        let fatal = StateStore::new(&path).load_or_reset().unwrap_err();
        assert_eq!(fatal.exit_code(), crate::error::EXIT_STATE_UNRECOVERABLE);
    }
}
