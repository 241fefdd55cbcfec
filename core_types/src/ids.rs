//! Unique identifiers for hosts, channels and routed objects

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use uuid::Uuid;

static NEXT_CHILD_PROCESS_ID: AtomicI32 = AtomicI32::new(1);

/// Identifier of a child process host
///
/// Assigned from a process-wide counter, so ids are unique for the lifetime
/// of the host process and increase in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChildProcessId(i32);

impl ChildProcessId {
    /// Allocates the next id
    pub fn next() -> Self {
        Self(NEXT_CHILD_PROCESS_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps a raw id received from elsewhere
    pub fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for ChildProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Child({})", self.0)
    }
}

/// Address of a routed object on the remote side of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoutingId(i32);

impl RoutingId {
    /// Channel-internal traffic (the hello handshake)
    pub const NONE: RoutingId = RoutingId(-2);

    /// Messages addressed to the channel endpoint itself rather than a routed object
    pub const CONTROL: RoutingId = RoutingId(i32::MAX);

    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> i32 {
        self.0
    }

    pub fn is_control(&self) -> bool {
        *self == Self::CONTROL
    }
}

impl fmt::Display for RoutingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NONE => write!(f, "Route(none)"),
            Self::CONTROL => write!(f, "Route(control)"),
            Self(raw) => write!(f, "Route({})", raw),
        }
    }
}

/// Unique name for a named channel endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(Uuid);

impl ChannelId {
    /// Creates a new random channel ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// File name used for the socket of a named channel
    ///
    /// Includes the creating pid so stale sockets are attributable.
    pub fn socket_file_name(&self) -> String {
        format!("ipc-{}-{}.sock", std::process::id(), self.0.simple())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Channel({})", self.0)
    }
}
