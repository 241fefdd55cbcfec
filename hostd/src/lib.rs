//! # Host Daemon
//!
//! This crate provides the host runtime that launches and supervises child
//! processes over filtered IPC channels.
//!
//! ## Philosophy
//!
//! - **Host owns processes**: children are launched, watched and reaped here
//! - **Relaunch is a policy**: channels never reconnect; a dead child is
//!   restarted (or not) by its configured [`RestartPolicy`]
//! - **Deterministic exits**: `run_for` and `exit_on_idle` bound every run
//!
//! ## Responsibilities
//!
//! The host runtime:
//! - Boots one I/O thread, one launcher and one process registry
//! - Launches the configured children and pumps their events
//! - Applies restart policies on crash or exit
//! - Terminates every child on the way out
//!
//! The `ipc_child` binary is the child-side counterpart used by tests.
//! Both binaries are Unix-only.

pub mod child;
pub mod config;
pub mod messages;
pub mod runtime;
pub mod supervisor;

pub use child::{run_child, ChildError};
pub use config::{ChildSpec, HostRuntimeConfig, RestartPolicy};
pub use runtime::{HostRuntime, HostRuntimeError, RunSummary};
pub use supervisor::Supervisor;

/// Environment variable naming the log level
pub const LOG_ENV: &str = "HOSTD_LOG";
