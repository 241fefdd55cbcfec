//! Pending synchronous requests waiting for their replies
//!
//! Each request owns a one-shot channel. The reply is sent into it; a failed
//! channel drops every sender, which the waiter sees as a disconnect.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use lifecycle::Deadline;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::error::SyncSendError;
use crate::message::Message;

pub(crate) type ReplySlot = Receiver<Message>;

/// Maps what a reply slot produced to the caller's result
pub(crate) fn outcome(received: Result<Message, RecvTimeoutError>) -> Result<Message, SyncSendError> {
    match received {
        Ok(reply) if reply.is_reply_error() => Err(SyncSendError::ReplyError),
        Ok(reply) => Ok(reply),
        Err(RecvTimeoutError::Disconnected) => Err(SyncSendError::ChannelClosed),
        Err(RecvTimeoutError::Timeout) => Err(SyncSendError::Timeout),
    }
}

/// Blocks until the reply arrives, the channel fails, or `deadline` passes
pub(crate) fn wait(slot: &ReplySlot, deadline: Deadline) -> Result<Message, SyncSendError> {
    outcome(slot.recv_deadline(deadline.instant()))
}

struct Inner {
    slots: HashMap<u32, Sender<Message>>,
    failed: bool,
}

/// Reply slots keyed by request id
pub(crate) struct PendingReplies {
    inner: Mutex<Inner>,
}

impl PendingReplies {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                failed: false,
            }),
        }
    }

    /// Returns `None` once the channel has failed
    pub(crate) fn register(&self, request_id: u32) -> Option<ReplySlot> {
        let mut inner = self.inner.lock();
        if inner.failed {
            return None;
        }
        let (sender, slot) = bounded(1);
        inner.slots.insert(request_id, sender);
        Some(slot)
    }

    /// Accepts registrations again once a new peer has connected
    pub(crate) fn reopen(&self) {
        self.inner.lock().failed = false;
    }

    pub(crate) fn cancel(&self, request_id: u32) {
        self.inner.lock().slots.remove(&request_id);
    }

    /// Hands a reply to its waiter; gives it back if nobody waits for it
    pub(crate) fn complete(&self, reply: Message) -> Option<Message> {
        let slot = self.inner.lock().slots.remove(&reply.request_id());
        match slot {
            Some(slot) => slot.send(reply).err().map(|rejected| rejected.into_inner()),
            None => Some(reply),
        }
    }

    /// Releases every waiter with an error; later registrations fail immediately
    pub(crate) fn fail_all(&self) {
        let mut inner = self.inner.lock();
        inner.failed = true;
        inner.slots.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }
}
