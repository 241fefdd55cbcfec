use crate::host::HostState;
use core_types::ChildProcessId;
use ipc::IpcError;
use process_launcher::LaunchError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("Launch error: {0}")]
    Launch(#[from] LaunchError),

    #[error("Unknown child process: {0}")]
    UnknownChild(ChildProcessId),

    #[error("{id} cannot do that while {state:?}")]
    InvalidState { id: ChildProcessId, state: HostState },

    #[error("Child command line has no usable --ipc-channel switch")]
    MissingChannelSwitch,

    #[error("Inherited channel descriptor {0} is not open")]
    BadChannelDescriptor(i32),
}
