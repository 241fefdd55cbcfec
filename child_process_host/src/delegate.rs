//! Per-host callbacks, run on the registry's thread

use ipc::{Message, ProxySender};
use process_launcher::{LaunchError, TerminationInfo};

/// Result of offering a message to a delegate or routed listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Handled,
    Unhandled,
    /// The payload was malformed; the child gets killed for it
    BadMessage,
}

/// Owner-specific behavior of one [`crate::ChildProcessHost`]
pub trait ChildProcessHostDelegate {
    /// Asked when the child sends a shutdown request
    fn can_shutdown(&mut self) -> bool {
        true
    }

    fn on_process_launched(&mut self, _pid: i32) {}

    fn on_process_launch_failed(&mut self, _error: &LaunchError) {}

    fn on_channel_connected(&mut self, _peer_pid: i32) {}

    /// Messages no filter, control handler or route claimed
    fn on_message_received(&mut self, _message: &Message, _sender: &ProxySender) -> Disposition {
        Disposition::Unhandled
    }

    fn on_process_crashed(&mut self, _info: &TerminationInfo) {}

    /// Last callback a host makes, whatever the outcome
    fn on_child_disconnected(&mut self, _info: &TerminationInfo) {}
}

/// Delegate that accepts every shutdown and handles nothing
#[derive(Debug, Default)]
pub struct DefaultDelegate;

impl ChildProcessHostDelegate for DefaultDelegate {}

/// Receives messages addressed to one routing id
pub trait RouteListener {
    fn on_message_received(&mut self, message: &Message, sender: &ProxySender) -> Disposition;

    /// The child behind this route is gone
    fn on_process_gone(&mut self, _info: &TerminationInfo) {}
}
