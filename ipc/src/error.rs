//! Error types for channels, framing and handle transfer

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("Invalid IPC configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel already connected")]
    AlreadyConnected,

    #[error("Channel is closed")]
    Closed,

    #[error("Named channel address already in use: {}", .0.display())]
    AddressInUse(PathBuf),

    #[error("I/O thread is not running")]
    IoThreadStopped,

    #[error("Handle error: {0}")]
    Handle(#[from] HandleError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Violations of the wire framing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("Message of {size} bytes exceeds the limit of {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("Message carries {count} handles, the limit is {limit}")]
    TooManyHandles { count: usize, limit: usize },

    #[error("Message expects {expected} handles but only {available} arrived")]
    MissingHandles { expected: usize, available: usize },

    #[error("{count} handles arrived without a message")]
    StrayHandles { count: usize },

    #[error("Ancillary data was truncated")]
    ControlTruncated,
}

#[derive(Debug, Error)]
pub enum HandleError {
    #[error("Refusing to transfer a directory descriptor")]
    Directory,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(windows)]
    #[error("Handle duplication failed: {0}")]
    Duplicate(#[from] windows::core::Error),
}

/// Why a synchronous send did not produce a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SyncSendError {
    #[error("Timed out waiting for the reply")]
    Timeout,

    #[error("Channel closed before the reply arrived")]
    ChannelClosed,

    #[error("Peer could not handle the request")]
    ReplyError,

    #[error("Synchronous send on the I/O thread would deadlock")]
    OnIoThread,
}
