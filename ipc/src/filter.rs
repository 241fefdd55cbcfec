//! Message filters: handlers that see inbound traffic on the I/O thread
//!
//! Filters run in registration order and the first one to claim a message
//! ends its dispatch. A filter moves through
//! `detached -> attached -> connected -> detached` and receives nothing
//! after [`MessageFilter::on_filter_removed`]. Filters must not block; work
//! that belongs elsewhere is posted away and answered later through the
//! [`ProxySender`] handed over in [`MessageFilter::on_filter_added`].

use std::sync::Arc;

use crate::message::Message;
use crate::proxy::ProxySender;

pub trait MessageFilter: Send + Sync {
    /// Attached to a channel; `sender` stays valid until the channel closes
    fn on_filter_added(&self, _sender: ProxySender) {}

    /// Detached for good
    fn on_filter_removed(&self) {}

    fn on_channel_connected(&self, _peer_pid: i32) {}

    fn on_channel_error(&self) {}

    fn on_channel_closing(&self) {}

    /// Returns `true` to claim the message
    fn on_message_received(&self, message: &Message) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterState {
    Attached,
    Connected,
}

struct FilterEntry {
    filter: Arc<dyn MessageFilter>,
    state: FilterState,
    error_seen: bool,
    closing_seen: bool,
}

pub(crate) fn same_filter(a: &Arc<dyn MessageFilter>, b: &Arc<dyn MessageFilter>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Ordered filter list owned by the I/O thread
pub(crate) struct FilterChain {
    sender: ProxySender,
    pending: Vec<Arc<dyn MessageFilter>>,
    entries: Vec<FilterEntry>,
    peer_pid: Option<i32>,
    attached: bool,
}

impl FilterChain {
    pub(crate) fn new(sender: ProxySender, pending: Vec<Arc<dyn MessageFilter>>) -> Self {
        Self {
            sender,
            pending,
            entries: Vec::new(),
            peer_pid: None,
            attached: false,
        }
    }

    /// Attaches filters registered before the channel reached the I/O thread
    pub(crate) fn attach(&mut self) {
        self.attached = true;
        for filter in std::mem::take(&mut self.pending) {
            self.add(filter);
        }
    }

    pub(crate) fn add(&mut self, filter: Arc<dyn MessageFilter>) {
        if !self.attached {
            self.pending.push(filter);
            return;
        }

        filter.on_filter_added(self.sender.clone());
        let mut entry = FilterEntry {
            filter,
            state: FilterState::Attached,
            error_seen: false,
            closing_seen: false,
        };
        if let Some(pid) = self.peer_pid {
            entry.filter.on_channel_connected(pid);
            entry.state = FilterState::Connected;
        }
        self.entries.push(entry);
    }

    pub(crate) fn remove(&mut self, filter: &Arc<dyn MessageFilter>) -> bool {
        if let Some(index) = self.pending.iter().position(|f| same_filter(f, filter)) {
            self.pending.remove(index);
            return true;
        }
        match self.entries.iter().position(|e| same_filter(&e.filter, filter)) {
            Some(index) => {
                let entry = self.entries.remove(index);
                entry.filter.on_filter_removed();
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove_all(&mut self) {
        self.pending.clear();
        for entry in self.entries.drain(..) {
            entry.filter.on_filter_removed();
        }
    }

    /// Offers the message to each filter in order; `true` if one claimed it
    pub(crate) fn dispatch(&self, message: &Message) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.filter.on_message_received(message))
    }

    /// Also re-announces a named server's next client to filters that saw
    /// the previous connection fail
    pub(crate) fn channel_connected(&mut self, peer_pid: i32) {
        self.peer_pid = Some(peer_pid);
        for entry in &mut self.entries {
            if entry.state == FilterState::Attached || entry.error_seen {
                entry.error_seen = false;
                entry.filter.on_channel_connected(peer_pid);
                entry.state = FilterState::Connected;
            }
        }
    }

    pub(crate) fn channel_error(&mut self) {
        self.peer_pid = None;
        for entry in &mut self.entries {
            if !entry.error_seen {
                entry.error_seen = true;
                entry.filter.on_channel_error();
            }
        }
    }

    pub(crate) fn channel_closing(&mut self) {
        for entry in &mut self.entries {
            if !entry.closing_seen {
                entry.closing_seen = true;
                entry.filter.on_channel_closing();
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
