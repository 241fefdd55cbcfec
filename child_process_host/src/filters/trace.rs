//! Tracing control for one child
//!
//! A tracing request made before the filter is attached is held back until
//! it is. Data fragments sent by the child are collected, and the finished
//! [`TraceCollection`] goes to a mailbox once the child acknowledges the end.

use crate::messages::{BeginTracing, EndTracing, EndTracingAck, TraceDataCollected};
use ipc::{MailboxSender, Message, MessageFilter, ProxySender, TypedMessage};
use parking_lot::Mutex;
use std::sync::Arc;

/// Trace output gathered from one child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceCollection {
    pub fragments: Vec<String>,
    /// `false` when the channel went away before `EndTracingAck`
    pub complete: bool,
}

#[derive(Default)]
struct TraceState {
    sender: Option<ProxySender>,
    pending_begin: Option<String>,
    tracing: bool,
    awaiting_ack: bool,
    fragments: Vec<String>,
}

/// Starts and stops tracing in a child and collects what it sends back.
///
/// Each finished trace is posted to the results mailbox.
pub struct TraceMessageFilter {
    state: Mutex<TraceState>,
    results: MailboxSender<TraceCollection>,
}

impl TraceMessageFilter {
    pub fn new(results: MailboxSender<TraceCollection>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TraceState::default()),
            results,
        })
    }

    /// Begins tracing; held back until the filter is attached.
    /// Returns `false` if a trace is already running.
    pub fn begin_tracing(&self, categories: &str) -> bool {
        let mut state = self.state.lock();
        if state.tracing {
            return false;
        }
        state.tracing = true;
        match &state.sender {
            Some(sender) => send(sender, &BeginTracing {
                categories: categories.to_string(),
            }),
            None => state.pending_begin = Some(categories.to_string()),
        }
        true
    }

    /// Asks the child to flush; the trace completes on `EndTracingAck`
    pub fn end_tracing(&self) -> bool {
        let mut state = self.state.lock();
        if !state.tracing || state.awaiting_ack {
            return false;
        }
        let Some(sender) = state.sender.clone() else {
            return false;
        };
        state.awaiting_ack = true;
        send(&sender, &EndTracing {});
        true
    }

    pub fn is_tracing(&self) -> bool {
        self.state.lock().tracing
    }

    fn finish(&self, state: &mut TraceState, complete: bool) {
        state.tracing = false;
        state.awaiting_ack = false;
        state.pending_begin = None;
        let fragments = std::mem::take(&mut state.fragments);
        log::debug!(
            "trace finished with {} fragments (complete: {})",
            fragments.len(),
            complete
        );
        self.results.post(TraceCollection {
            fragments,
            complete,
        });
    }
}

fn send<T: TypedMessage>(sender: &ProxySender, message: &T) {
    match message.to_control() {
        Ok(message) => {
            sender.send(message);
        }
        Err(e) => log::error!("failed to encode {}: {}", T::TYPE, e),
    }
}

impl MessageFilter for TraceMessageFilter {
    fn on_filter_added(&self, sender: ProxySender) {
        let mut state = self.state.lock();
        if let Some(categories) = state.pending_begin.take() {
            send(&sender, &BeginTracing { categories });
        }
        state.sender = Some(sender);
    }

    fn on_filter_removed(&self) {
        self.state.lock().sender = None;
    }

    fn on_channel_error(&self) {
        let mut state = self.state.lock();
        if state.tracing {
            self.finish(&mut state, false);
        }
    }

    fn on_channel_closing(&self) {
        self.on_channel_error();
    }

    fn on_message_received(&self, message: &Message) -> bool {
        if TraceDataCollected::matches(message) {
            match TraceDataCollected::read(message) {
                Ok(fragment) => self.state.lock().fragments.push(fragment.data),
                Err(e) => log::warn!("discarding malformed trace fragment: {}", e),
            }
            return true;
        }
        if EndTracingAck::matches(message) {
            let mut state = self.state.lock();
            if state.tracing {
                self.finish(&mut state, true);
            }
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipc::mailbox;

    fn fragment(data: &str) -> Message {
        TraceDataCollected {
            data: data.to_string(),
        }
        .to_control()
        .unwrap()
    }

    #[test]
    fn test_collects_until_ack() {
        let (results, collected) = mailbox();
        let filter = TraceMessageFilter::new(results);
        assert!(filter.begin_tracing("ipc,io"));
        assert!(!filter.begin_tracing("again"));

        assert!(filter.on_message_received(&fragment("a")));
        assert!(filter.on_message_received(&fragment("b")));
        assert!(collected.try_recv().is_none());

        assert!(filter.on_message_received(&EndTracingAck {}.to_control().unwrap()));
        assert_eq!(
            collected.try_recv(),
            Some(TraceCollection {
                fragments: vec!["a".to_string(), "b".to_string()],
                complete: true,
            })
        );
        assert!(!filter.is_tracing());
    }

    #[test]
    fn test_channel_error_finishes_incomplete() {
        let (results, collected) = mailbox();
        let filter = TraceMessageFilter::new(results);
        filter.begin_tracing("*");
        filter.on_message_received(&fragment("partial"));

        filter.on_channel_error();
        let collection = collected.try_recv().unwrap();
        assert!(!collection.complete);
        assert_eq!(collection.fragments, vec!["partial".to_string()]);

        // Closing after the error reports nothing more.
        filter.on_channel_closing();
        assert!(collected.try_recv().is_none());
    }

    #[test]
    fn test_other_messages_pass_through() {
        let (results, _collected) = mailbox();
        let filter = TraceMessageFilter::new(results);
        let other = crate::messages::ShutdownRequest {}.to_control().unwrap();
        assert!(!filter.on_message_received(&other));
    }

    #[test]
    fn test_end_requires_attachment() {
        let (results, _collected) = mailbox();
        let filter = TraceMessageFilter::new(results);
        assert!(!filter.end_tracing());
        filter.begin_tracing("*");
        assert!(!filter.end_tracing());
    }
}
