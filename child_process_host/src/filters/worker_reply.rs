//! Deferred replies computed on worker threads

use ipc::{Message, MessageFilter, MessageType, ProxySender, ReplyToken};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

type Handler = dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync;

#[derive(Default)]
struct ReplyCounts {
    sent: AtomicUsize,
    dropped: AtomicUsize,
}

/// Answers one sync message type off the I/O thread.
///
/// The handler gets the request payload on a worker thread and returns the
/// reply payload, or `None` for a reply-error. Replies produced after the
/// channel closed are dropped.
pub struct WorkerReplyFilter {
    message_type: MessageType,
    handler: Arc<Handler>,
    sender: Mutex<Option<ProxySender>>,
    counts: Arc<ReplyCounts>,
}

impl WorkerReplyFilter {
    pub fn new<F>(message_type: MessageType, handler: F) -> Arc<Self>
    where
        F: Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        Arc::new(Self {
            message_type,
            handler: Arc::new(handler),
            sender: Mutex::new(None),
            counts: Arc::new(ReplyCounts::default()),
        })
    }

    pub fn replies_sent(&self) -> usize {
        self.counts.sent.load(Ordering::Acquire)
    }

    /// Replies discarded because the channel was already closed
    pub fn replies_dropped(&self) -> usize {
        self.counts.dropped.load(Ordering::Acquire)
    }
}

fn build_reply(token: ReplyToken, payload: Option<Vec<u8>>) -> Message {
    match payload {
        Some(bytes) => {
            let mut reply = token.reply();
            reply.set_payload_bytes(bytes);
            reply
        }
        None => token.reply_error(),
    }
}

impl MessageFilter for WorkerReplyFilter {
    fn on_filter_added(&self, sender: ProxySender) {
        *self.sender.lock() = Some(sender);
    }

    fn on_filter_removed(&self) {
        *self.sender.lock() = None;
    }

    fn on_message_received(&self, message: &Message) -> bool {
        if message.message_type() != self.message_type || !message.is_sync() {
            return false;
        }
        let Some(sender) = self.sender.lock().clone() else {
            return false;
        };

        let token = message.reply_token();
        let payload = message.payload().to_vec();
        let handler = self.handler.clone();
        let counts = self.counts.clone();
        let worker_sender = sender.clone();

        let spawned = thread::Builder::new()
            .name("worker-reply".to_string())
            .spawn(move || {
                let reply = build_reply(token, handler(&payload));
                if worker_sender.send(reply) {
                    counts.sent.fetch_add(1, Ordering::AcqRel);
                } else {
                    log::debug!("dropping reply to request {}: channel closed", token.request_id());
                    counts.dropped.fetch_add(1, Ordering::AcqRel);
                }
            });

        if let Err(e) = spawned {
            log::warn!("no worker for request {}: {}", token.request_id(), e);
            sender.send(token.reply_error());
        }
        true
    }
}
