//! # Child Process Host
//!
//! The host-side half of every child process: its channel, its launch,
//! its routes, and how its death is reported.
//!
//! ## Philosophy
//!
//! - **Explicit registry**: hosts live in a [`ProcessRegistry`] owned by one
//!   thread, never in a process-wide table
//! - **Remove, then tell**: a dead host leaves the registry before its
//!   process is reaped and before observers hear about it
//! - **Untrusted children**: a malformed message kills the child, never
//!   the host
//!
//! Channel and launcher activity arrives on the owning thread as
//! [`HostEvent`]s, drained by [`ProcessRegistry::pump`].

pub mod config;
pub mod messages;
pub mod notification;

#[cfg(unix)]
pub mod child;
#[cfg(unix)]
pub mod delegate;
#[cfg(unix)]
pub mod error;
#[cfg(unix)]
pub mod filters;
#[cfg(unix)]
pub mod host;
#[cfg(unix)]
pub mod registry;

pub use config::HostConfig;
pub use notification::{NotificationKind, ProcessNotification, ProcessObserver};

#[cfg(unix)]
pub use child::host_channel;
#[cfg(unix)]
pub use delegate::{ChildProcessHostDelegate, DefaultDelegate, Disposition, RouteListener};
#[cfg(unix)]
pub use error::HostError;
#[cfg(unix)]
pub use filters::{TraceCollection, TraceMessageFilter, WorkerReplyFilter};
#[cfg(unix)]
pub use host::{ChildEndpoint, ChildProcessHost, HostEvent, HostState};
#[cfg(unix)]
pub use registry::{ProcessRegistry, RegistryCursor};
