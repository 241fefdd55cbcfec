//! Process registry
//!
//! Owns every [`ChildProcessHost`] of one owning thread, in insertion
//! order. Hosts are removed from the registry before their process is
//! reaped and before anyone is told they are gone.

use crate::config::HostConfig;
use crate::delegate::ChildProcessHostDelegate;
use crate::error::HostError;
use crate::host::{ChildEndpoint, ChildProcessHost, HostAction, HostEvent};
use crate::notification::{NotificationKind, ObserverList, ProcessObserver};
use core_types::{ChildProcessId, ProcessType};
use ipc::{mailbox, IoHandle, Mailbox, MailboxSender};
use process_launcher::{CommandLine, ProcessLauncher, RESULT_CODE_KILLED};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct ProcessRegistry {
    hosts: BTreeMap<u64, ChildProcessHost>,
    index: HashMap<ChildProcessId, u64>,
    next_seq: u64,
    observers: ObserverList,
    config: HostConfig,
    events: Mailbox<HostEvent>,
    sender: MailboxSender<HostEvent>,
}

impl ProcessRegistry {
    pub fn new(config: HostConfig) -> Self {
        let (sender, events) = mailbox();
        Self {
            hosts: BTreeMap::new(),
            index: HashMap::new(),
            next_seq: 0,
            observers: ObserverList::default(),
            config,
            events,
            sender,
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn add_observer(&mut self, observer: Arc<dyn ProcessObserver>) {
        self.observers.add(observer);
    }

    pub fn remove_observer(&mut self, observer: &Arc<dyn ProcessObserver>) {
        self.observers.remove(observer);
    }

    /// Registers a new, not yet launched host
    pub fn create_host(
        &mut self,
        process_type: ProcessType,
        delegate: Box<dyn ChildProcessHostDelegate>,
    ) -> ChildProcessId {
        let host = ChildProcessHost::new(
            process_type,
            delegate,
            self.config.clone(),
            self.sender.clone(),
        );
        let id = host.id();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.hosts.insert(seq, host);
        self.index.insert(id, seq);
        self.observers.notify(id, process_type, NotificationKind::Created);
        id
    }

    pub fn get(&self, id: ChildProcessId) -> Option<&ChildProcessHost> {
        self.index.get(&id).and_then(|seq| self.hosts.get(seq))
    }

    pub fn get_mut(&mut self, id: ChildProcessId) -> Option<&mut ChildProcessHost> {
        match self.index.get(&id) {
            Some(seq) => self.hosts.get_mut(seq),
            None => None,
        }
    }

    pub fn contains(&self, id: ChildProcessId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Hosts in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &ChildProcessHost> {
        self.hosts.values()
    }

    pub fn iter_type(&self, process_type: ProcessType) -> impl Iterator<Item = &ChildProcessHost> {
        self.iter()
            .filter(move |host| host.process_type() == process_type)
    }

    pub fn ids(&self) -> Vec<ChildProcessId> {
        self.iter().map(ChildProcessHost::id).collect()
    }

    /// Cursor over all hosts, or those of one type, that survives removals
    pub fn cursor(&self, process_type: Option<ProcessType>) -> RegistryCursor {
        RegistryCursor {
            process_type,
            next_seq: 0,
        }
    }

    /// Creates the host's channel and starts its child.
    ///
    /// A failure here removes the host; observers see `LaunchFailed`.
    pub fn launch(
        &mut self,
        id: ChildProcessId,
        io: &IoHandle,
        launcher: &ProcessLauncher,
        command_line: CommandLine,
    ) -> Result<(), HostError> {
        let host = self.get_mut(id).ok_or(HostError::UnknownChild(id))?;
        match host.launch(io, launcher, command_line) {
            Ok(()) => Ok(()),
            Err(e @ HostError::InvalidState { .. }) => Err(e),
            Err(e) => {
                if let Some(host) = self.remove(id) {
                    self.observers.notify(
                        id,
                        host.process_type(),
                        NotificationKind::LaunchFailed {
                            error: e.to_string(),
                        },
                    );
                }
                Err(e)
            }
        }
    }

    /// Creates the host's channel without launching anything; the caller
    /// hands the endpoint to the child itself
    pub fn create_channel(
        &mut self,
        id: ChildProcessId,
        io: &IoHandle,
    ) -> Result<ChildEndpoint, HostError> {
        self.get_mut(id)
            .ok_or(HostError::UnknownChild(id))?
            .create_channel(io)
    }

    /// Waits up to `timeout` for host events, then handles every queued one.
    /// Returns how many were handled.
    pub fn pump(&mut self, timeout: Duration) -> usize {
        let Some(first) = self.events.recv_timeout(timeout) else {
            return 0;
        };
        self.dispatch(first);
        let mut handled = 1;
        while let Some(event) = self.events.try_recv() {
            self.dispatch(event);
            handled += 1;
        }
        handled
    }

    /// Pumps until `done` holds or `timeout` passes; returns whether `done` held
    pub fn pump_until(&mut self, timeout: Duration, mut done: impl FnMut(&Self) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if done(self) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.pump(deadline - now);
        }
    }

    /// Removes and force-terminates every host
    pub fn terminate_all(&mut self) -> usize {
        let ids = self.ids();
        for id in &ids {
            if let Some(host) = self.remove(*id) {
                host.shut_down(&self.observers, Some(RESULT_CODE_KILLED));
            }
        }
        ids.len()
    }

    fn dispatch(&mut self, event: HostEvent) {
        let id = event.id();
        let Some(host) = self.index.get(&id).and_then(|seq| self.hosts.get_mut(seq)) else {
            // Already removed; a late launch result is dropped here, which
            // kills its process.
            log::debug!("dropping event for removed {}", id);
            return;
        };

        match host.handle_event(event, &self.observers) {
            HostAction::Keep => {}
            HostAction::Disconnect => {
                if let Some(host) = self.remove(id) {
                    host.shut_down(&self.observers, None);
                }
            }
            HostAction::Discard => {
                self.remove(id);
            }
        }
    }

    fn remove(&mut self, id: ChildProcessId) -> Option<ChildProcessHost> {
        let seq = self.index.remove(&id)?;
        self.hosts.remove(&seq)
    }
}

/// Insertion-order position in a [`ProcessRegistry`]
#[derive(Debug, Clone)]
pub struct RegistryCursor {
    process_type: Option<ProcessType>,
    next_seq: u64,
}

impl RegistryCursor {
    /// Next matching host still registered, or `None` at the end
    pub fn next(&mut self, registry: &ProcessRegistry) -> Option<ChildProcessId> {
        let (seq, host) = registry
            .hosts
            .range(self.next_seq..)
            .find(|(_, host)| self.process_type.map_or(true, |t| host.process_type() == t))?;
        self.next_seq = seq + 1;
        Some(host.id())
    }
}
