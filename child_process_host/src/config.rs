//! Host configuration

use ipc::IpcConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// How long a disconnected child gets to finish exiting before it is
    /// reported as still running
    pub termination_grace_ms: u64,
    /// When set, children connect through a named socket in this directory
    /// instead of an inherited descriptor
    pub named_channel_dir: Option<PathBuf>,
    /// Sent to every child on connection
    pub ipc_logging: bool,
    pub ipc: IpcConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            termination_grace_ms: 500,
            named_channel_dir: None,
            ipc_logging: false,
            ipc: IpcConfig::default(),
        }
    }
}

impl HostConfig {
    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }
}
