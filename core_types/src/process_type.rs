//! Kinds of child processes a host can manage

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Process type of a child, passed to the child as `--type=<name>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessType {
    Browser,
    Renderer,
    Plugin,
    PpapiPlugin,
    PpapiBroker,
    Utility,
    Zygote,
    Worker,
    Gpu,
    NaclLoader,
    NaclBroker,
}

impl ProcessType {
    pub const ALL: [ProcessType; 11] = [
        ProcessType::Browser,
        ProcessType::Renderer,
        ProcessType::Plugin,
        ProcessType::PpapiPlugin,
        ProcessType::PpapiBroker,
        ProcessType::Utility,
        ProcessType::Zygote,
        ProcessType::Worker,
        ProcessType::Gpu,
        ProcessType::NaclLoader,
        ProcessType::NaclBroker,
    ];

    /// Value of the `--type` switch
    pub fn switch_value(&self) -> &'static str {
        match self {
            ProcessType::Browser => "browser",
            ProcessType::Renderer => "renderer",
            ProcessType::Plugin => "plugin",
            ProcessType::PpapiPlugin => "ppapi",
            ProcessType::PpapiBroker => "ppapi-broker",
            ProcessType::Utility => "utility",
            ProcessType::Zygote => "zygote",
            ProcessType::Worker => "worker",
            ProcessType::Gpu => "gpu-process",
            ProcessType::NaclLoader => "nacl-loader",
            ProcessType::NaclBroker => "nacl-broker",
        }
    }
}

impl fmt::Display for ProcessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.switch_value())
    }
}

/// A `--type` value that names no known process type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProcessType(pub String);

impl fmt::Display for UnknownProcessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown process type: {}", self.0)
    }
}

impl std::error::Error for UnknownProcessType {}

impl FromStr for ProcessType {
    type Err = UnknownProcessType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProcessType::ALL
            .iter()
            .copied()
            .find(|t| t.switch_value() == s)
            .ok_or_else(|| UnknownProcessType(s.to_string()))
    }
}
