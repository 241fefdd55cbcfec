//! Child side: finding the channel the host prepared

use crate::error::HostError;
use ipc::{ChannelHandle, ChannelProxy, ChannelProxyBuilder, Mode};
use process_launcher::{ChannelSwitch, CommandLine};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

/// Builder for the client end of the host channel named by `--ipc-channel`.
///
/// Takes ownership of an inherited descriptor, so call it once per process.
pub fn host_channel(command_line: &CommandLine) -> Result<ChannelProxyBuilder, HostError> {
    let handle = match command_line
        .ipc_channel()
        .ok_or(HostError::MissingChannelSwitch)?
    {
        ChannelSwitch::Fd(fd) => ChannelHandle::Socket(take_inherited_fd(fd)?),
        ChannelSwitch::Path(path) => ChannelHandle::Named(path),
    };
    Ok(ChannelProxy::builder(handle, Mode::Client))
}

fn take_inherited_fd(fd: RawFd) -> Result<OwnedFd, HostError> {
    // SAFETY: F_GETFD only inspects the descriptor table.
    if unsafe { libc::fcntl(fd, libc::F_GETFD) } < 0 {
        return Err(HostError::BadChannelDescriptor(fd));
    }
    // Not for our own children.
    unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };
    // SAFETY: the descriptor is open and was handed to this process for
    // the channel alone.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}
