//! # Core Types
//!
//! Identifiers shared by every crate of the multi-process host.
//!
//! ## Philosophy
//!
//! - **Explicit over implicit**: ids are newtypes and cannot be confused.
//! - **Process-wide uniqueness**: child ids come from one monotonic counter.
//!
//! ## Key Types
//!
//! - [`ChildProcessId`]: Host-assigned identifier of a child process
//! - [`RoutingId`]: Addresses a routed object on the far side of a channel
//! - [`ChannelId`]: Unique name of a named channel endpoint
//! - [`ProcessType`]: What kind of child a host manages

pub mod ids;
pub mod process_type;

pub use ids::{ChannelId, ChildProcessId, RoutingId};
pub use process_type::{ProcessType, UnknownProcessType};
