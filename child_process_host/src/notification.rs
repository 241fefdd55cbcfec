//! Process lifecycle notifications

use core_types::{ChildProcessId, ProcessType};
use ipc::MailboxSender;
use process_launcher::TerminationInfo;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    Created,
    Launched { pid: i32 },
    LaunchFailed { error: String },
    Connected { peer_pid: i32 },
    /// The child asked to shut down and the host agreed
    Closing,
    Crashed(TerminationInfo),
    Killed(TerminationInfo),
    /// Sent for every host that goes away, after any crash or kill notice
    Disconnected(TerminationInfo),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessNotification {
    pub id: ChildProcessId,
    pub process_type: ProcessType,
    pub kind: NotificationKind,
}

impl fmt::Display for ProcessNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ", self.process_type, self.id)?;
        match &self.kind {
            NotificationKind::Created => write!(f, "created"),
            NotificationKind::Launched { pid } => write!(f, "launched as pid {}", pid),
            NotificationKind::LaunchFailed { error } => write!(f, "failed to launch: {}", error),
            NotificationKind::Connected { peer_pid } => write!(f, "connected (pid {})", peer_pid),
            NotificationKind::Closing => write!(f, "closing"),
            NotificationKind::Crashed(info) => write!(f, "crashed: {}", info),
            NotificationKind::Killed(info) => write!(f, "killed: {}", info),
            NotificationKind::Disconnected(info) => write!(f, "disconnected: {}", info),
        }
    }
}

/// Watches every host of a registry, on the registry's thread
pub trait ProcessObserver {
    fn on_process_notification(&self, notification: &ProcessNotification);
}

impl ProcessObserver for MailboxSender<ProcessNotification> {
    fn on_process_notification(&self, notification: &ProcessNotification) {
        self.post(notification.clone());
    }
}

#[derive(Default)]
pub(crate) struct ObserverList {
    observers: Vec<Arc<dyn ProcessObserver>>,
}

impl ObserverList {
    pub(crate) fn add(&mut self, observer: Arc<dyn ProcessObserver>) {
        self.observers.push(observer);
    }

    pub(crate) fn remove(&mut self, observer: &Arc<dyn ProcessObserver>) {
        self.observers
            .retain(|o| Arc::as_ptr(o) as *const () != Arc::as_ptr(observer) as *const ());
    }

    pub(crate) fn notify(&self, id: ChildProcessId, process_type: ProcessType, kind: NotificationKind) {
        let notification = ProcessNotification {
            id,
            process_type,
            kind,
        };
        log::debug!("{}", notification);
        for observer in &self.observers {
            observer.on_process_notification(&notification);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Records every notification it sees
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub(crate) seen: Mutex<Vec<ProcessNotification>>,
    }

    impl Recorder {
        pub(crate) fn kinds(&self) -> Vec<NotificationKind> {
            self.seen.lock().iter().map(|n| n.kind.clone()).collect()
        }
    }

    impl ProcessObserver for Recorder {
        fn on_process_notification(&self, notification: &ProcessNotification) {
            self.seen.lock().push(notification.clone());
        }
    }
}
