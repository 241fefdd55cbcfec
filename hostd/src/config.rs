//! Host runtime configuration
//!
//! Loaded from a JSON file; command-line options override individual fields.

use child_process_host::HostConfig;
use core_types::ProcessType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::runtime::HostRuntimeError;

/// What to do when a child goes away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RestartPolicy {
    /// Never restart the child
    #[default]
    Never,
    /// Always restart the child (regardless of how it ended)
    Always,
    /// Restart unless it exited normally
    OnFailure,
    /// Like `OnFailure`, at most `max_restarts` times
    Limited { max_restarts: u32 },
}

/// One child to launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildSpec {
    /// Human-readable name, used in logs
    pub name: String,
    pub process_type: ProcessType,
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub restart: RestartPolicy,
}

impl ChildSpec {
    pub fn new(name: impl Into<String>, process_type: ProcessType, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            process_type,
            program: program.into(),
            args: Vec::new(),
            restart: RestartPolicy::Never,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_restart(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }
}

/// Host runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostRuntimeConfig {
    pub host: HostConfig,
    pub children: Vec<ChildSpec>,
    /// Stop after this long (unset = run until idle or forever)
    pub run_for_ms: Option<u64>,
    /// Whether to exit when no children are running
    pub exit_on_idle: bool,
    /// Longest a single pump waits for events
    pub pump_interval_ms: u64,
    /// Log level name; `--log-level` and `HOSTD_LOG` override it
    pub log_level: Option<String>,
}

impl Default for HostRuntimeConfig {
    fn default() -> Self {
        Self {
            host: HostConfig::default(),
            children: Vec::new(),
            run_for_ms: None,
            exit_on_idle: false,
            pump_interval_ms: 50,
            log_level: None,
        }
    }
}

impl HostRuntimeConfig {
    pub fn from_json(text: &str) -> Result<Self, HostRuntimeError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, HostRuntimeError> {
        let text = std::fs::read_to_string(path).map_err(|source| HostRuntimeError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), HostRuntimeError> {
        self.host.ipc.validate()?;
        if self.pump_interval_ms == 0 {
            return Err(HostRuntimeError::InvalidConfig(
                "pump_interval_ms must be positive".to_string(),
            ));
        }
        for spec in &self.children {
            if spec.name.is_empty() {
                return Err(HostRuntimeError::InvalidConfig(
                    "every child needs a name".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn run_for(&self) -> Option<Duration> {
        self.run_for_ms.map(Duration::from_millis)
    }

    pub fn pump_interval(&self) -> Duration {
        Duration::from_millis(self.pump_interval_ms)
    }
}
