//! Typed FIFO owned by one conceptual thread
//!
//! Work crosses threads only as values posted to the owner's mailbox; the
//! owner drains it from its own loop. Backed by an unbounded
//! `crossbeam_channel`.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

/// Creates a connected sender/receiver pair
pub fn mailbox<T>() -> (MailboxSender<T>, Mailbox<T>) {
    let (sender, receiver) = unbounded();
    (MailboxSender { sender }, Mailbox { receiver })
}

/// Posting side; cheap to clone and usable from any thread
pub struct MailboxSender<T> {
    sender: Sender<T>,
}

impl<T> Clone for MailboxSender<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T> MailboxSender<T> {
    /// Posts an item; returns `false` (dropping it) when the owner is gone
    pub fn post(&self, item: T) -> bool {
        self.sender.send(item).is_ok()
    }
}

/// Receiving side, held by the owning thread
///
/// Dropping it discards whatever is still queued.
pub struct Mailbox<T> {
    receiver: Receiver<T>,
}

impl<T> Mailbox<T> {
    pub fn try_recv(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Blocks until an item arrives; `None` once every sender is gone
    pub fn recv(&self) -> Option<T> {
        self.receiver.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Blocks until an item arrives or `deadline` passes
    pub fn recv_deadline(&self, deadline: Instant) -> Option<T> {
        match self.receiver.recv_deadline(deadline) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Takes everything queued right now
    pub fn drain(&self) -> Vec<T> {
        self.receiver.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    #[cfg(unix)]
    pub(crate) fn receiver(&self) -> &Receiver<T> {
        &self.receiver
    }
}
