//! Child command lines
//!
//! Switches use the `--name=value` form. The host tells the child what it
//! is with `--type=<process type>` and where its channel lives with
//! `--ipc-channel=<value>`.

use core_types::{ProcessType, UnknownProcessType};
use std::fmt;
use std::path::{Path, PathBuf};

/// Switch carrying the child's process type
pub const SWITCH_PROCESS_TYPE: &str = "type";

/// Switch carrying the child's channel location
pub const SWITCH_IPC_CHANNEL: &str = "ipc-channel";

/// Descriptor number a launched child finds its channel endpoint on
pub const PRIMARY_IPC_FD: i32 = 3;

const SWITCH_PREFIX: &str = "--";
const FD_PREFIX: &str = "fd:";

/// Where a child should look for its end of the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSwitch {
    /// Inherited descriptor
    Fd(i32),
    /// Filesystem path of a named channel
    Path(PathBuf),
}

impl ChannelSwitch {
    pub fn parse(value: &str) -> Option<Self> {
        if value.is_empty() {
            return None;
        }
        match value.strip_prefix(FD_PREFIX) {
            Some(fd) => fd.parse().ok().filter(|fd| *fd >= 0).map(ChannelSwitch::Fd),
            None => Some(ChannelSwitch::Path(PathBuf::from(value))),
        }
    }

    pub fn to_switch_value(&self) -> String {
        match self {
            ChannelSwitch::Fd(fd) => format!("{}{}", FD_PREFIX, fd),
            ChannelSwitch::Path(path) => path.display().to_string(),
        }
    }
}

/// Program plus arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Builds from an argv-style list whose first entry is the program
    pub fn from_args<I, S>(argv: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = argv.into_iter().map(Into::into);
        let program = argv.next()?;
        Some(Self {
            program: PathBuf::from(program),
            args: argv.collect(),
        })
    }

    /// Command line of the running process
    pub fn current() -> Option<Self> {
        Self::from_args(std::env::args())
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn append_arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    pub fn append_switch(&mut self, name: &str) -> &mut Self {
        self.args.push(format!("{}{}", SWITCH_PREFIX, name));
        self
    }

    pub fn append_switch_value(&mut self, name: &str, value: impl fmt::Display) -> &mut Self {
        self.args
            .push(format!("{}{}={}", SWITCH_PREFIX, name, value));
        self
    }

    pub fn has_switch(&self, name: &str) -> bool {
        self.switches().any(|(switch, _)| switch == name)
    }

    /// Value of the last occurrence of `--name=value`
    pub fn switch_value(&self, name: &str) -> Option<&str> {
        self.switches()
            .filter(|(switch, _)| *switch == name)
            .filter_map(|(_, value)| value)
            .last()
    }

    /// `Ok(None)` when no `--type` switch is present
    pub fn process_type(&self) -> Result<Option<ProcessType>, UnknownProcessType> {
        self.switch_value(SWITCH_PROCESS_TYPE)
            .map(str::parse)
            .transpose()
    }

    pub fn ipc_channel(&self) -> Option<ChannelSwitch> {
        self.switch_value(SWITCH_IPC_CHANNEL)
            .and_then(ChannelSwitch::parse)
    }

    // Everything after a bare `--` is positional.
    fn switches(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.args
            .iter()
            .take_while(|arg| arg.as_str() != SWITCH_PREFIX)
            .filter_map(|arg| arg.strip_prefix(SWITCH_PREFIX))
            .map(|rest| match rest.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (rest, None),
            })
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}
