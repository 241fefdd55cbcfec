//! # Process Launcher
//!
//! Starts child processes and reports how they ended.
//!
//! ## Philosophy
//!
//! Launching is explicit and asynchronous:
//! - The child's channel endpoint is handed over as a descriptor, always fd 3
//! - Role and channel location travel as `--type=` and `--ipc-channel=` switches
//! - Exit is classified once, from the reaped status, never guessed from the channel

pub mod command_line;
#[cfg(unix)]
pub mod launcher;
pub mod process;
pub mod termination;

pub use command_line::{
    ChannelSwitch, CommandLine, PRIMARY_IPC_FD, SWITCH_IPC_CHANNEL, SWITCH_PROCESS_TYPE,
};
#[cfg(unix)]
pub use launcher::{spawn, LaunchClient, LaunchError, LaunchOutcome, LaunchRequest, ProcessLauncher};
pub use process::ChildProcess;
pub use termination::{
    TerminationInfo, TerminationStatus, RESULT_CODE_HUNG, RESULT_CODE_KILLED,
    RESULT_CODE_KILLED_BAD_MESSAGE,
};
