//! ChannelProxy: a channel usable from any thread
//!
//! The proxy's channel lives on the I/O thread. `send` from any thread
//! becomes an [`IoCommand`]; inbound messages are offered to pending sync
//! waiters, then to the filters, then to the listener: on the I/O thread
//! when [`IoDispatch::override_thread_for_message`] asks for it, otherwise
//! posted to the listener's [`EventSink`].

use crossbeam_channel::{RecvTimeoutError, Select};
use lifecycle::{CancellationReason, CancellationSource, CancellationToken, Timeout};
use log::{debug, trace};
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crate::channel::{Channel, ChannelHandle, Listener, Mode};
use crate::error::{IpcError, SyncSendError};
use crate::filter::{FilterChain, MessageFilter};
use crate::io_thread::{IoCommand, IoHandle, ProxyKey};
use crate::mailbox::{Mailbox, MailboxSender};
use crate::message::Message;
use crate::pending::{self, PendingReplies, ReplySlot};

const UNKNOWN_PID: i32 = -1;

/// What the listener thread learns about a channel
#[derive(Debug)]
pub enum ChannelEvent {
    Connected { peer_pid: i32 },
    Message(Message),
    Error,
}

/// Where listener-thread events are delivered
pub trait EventSink: Send + Sync {
    /// Returns `false` when the receiving side is gone
    fn post_event(&self, event: ChannelEvent) -> bool;
}

impl EventSink for MailboxSender<ChannelEvent> {
    fn post_event(&self, event: ChannelEvent) -> bool {
        self.post(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchThread {
    Io,
    Listener,
}

/// Listener hook that runs on the I/O thread
pub trait IoDispatch: Send {
    /// Chooses where an unclaimed message is delivered
    fn override_thread_for_message(&self, _message: &Message) -> DispatchThread {
        DispatchThread::Listener
    }

    /// Handles a message routed to [`DispatchThread::Io`]; unhandled
    /// messages fall through to the listener thread
    fn on_message_received(&mut self, message: &Message) -> bool;
}

pub(crate) struct ProxyContext {
    key: ProxyKey,
    io: IoHandle,
    closing: CancellationSource,
    peer_pid: AtomicI32,
    pending: PendingReplies,
    next_request_id: AtomicU32,
}

impl ProxyContext {
    fn is_closed(&self) -> bool {
        self.closing.is_cancelled()
    }

    fn peer_pid(&self) -> Option<i32> {
        match self.peer_pid.load(Ordering::Acquire) {
            UNKNOWN_PID => None,
            pid => Some(pid),
        }
    }

    fn post_send(&self, message: Message) -> bool {
        if self.is_closed() {
            return false;
        }
        self.io.post(IoCommand::Send {
            key: self.key,
            message,
        })
    }
}

/// Sends on a proxy without owning it
///
/// Handed to filters and delegates for replies produced later. Once the
/// proxy is closed every send is refused, so deferred work cancels itself.
#[derive(Clone)]
pub struct ProxySender {
    context: Weak<ProxyContext>,
}

impl ProxySender {
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self {
            context: Weak::new(),
        }
    }

    pub fn send(&self, message: Message) -> bool {
        match self.context.upgrade() {
            Some(context) => context.post_send(message),
            None => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.context
            .upgrade()
            .map_or(true, |context| context.is_closed())
    }

    /// Token cancelled when the proxy closes
    pub fn closed_token(&self) -> CancellationToken {
        match self.context.upgrade() {
            Some(context) => context.closing.token(),
            None => {
                let source = CancellationSource::new();
                source.cancel(CancellationReason::OwnerDropped);
                source.token()
            }
        }
    }

    pub fn peer_pid(&self) -> Option<i32> {
        self.context.upgrade().and_then(|context| context.peer_pid())
    }
}

/// The channel's listener on the I/O thread
pub(crate) struct ProxyIo {
    context: Arc<ProxyContext>,
    filters: FilterChain,
    sink: Option<Arc<dyn EventSink>>,
    io_dispatch: Option<Box<dyn IoDispatch>>,
}

impl ProxyIo {
    pub(crate) fn attach(&mut self) {
        self.filters.attach();
    }

    pub(crate) fn add_filter(&mut self, filter: Arc<dyn MessageFilter>) {
        self.filters.add(filter);
    }

    pub(crate) fn remove_filter(&mut self, filter: &Arc<dyn MessageFilter>) {
        if !self.filters.remove(filter) {
            debug!("removing a filter that is not attached");
        }
    }

    pub(crate) fn closing(&mut self) {
        self.context.pending.fail_all();
        self.filters.channel_closing();
        self.filters.remove_all();
    }

    /// Returns `false` when nobody took the event
    fn deliver(&self, event: ChannelEvent) -> bool {
        if self.context.is_closed() {
            return false;
        }
        match &self.sink {
            Some(sink) => {
                let delivered = sink.post_event(event);
                if !delivered {
                    debug!("listener is gone; dropping channel event");
                }
                delivered
            }
            None => {
                trace!("no listener; dropping {:?}", event);
                false
            }
        }
    }
}

impl Listener for ProxyIo {
    fn on_message_received(&mut self, message: Message) {
        let message = if message.is_reply() {
            match self.context.pending.complete(message) {
                None => return,
                Some(stale) => {
                    debug!("dropping reply to unknown request {}", stale.request_id());
                    return;
                }
            }
        } else {
            message
        };

        if self.filters.dispatch(&message) {
            return;
        }

        if let Some(io_dispatch) = &mut self.io_dispatch {
            if io_dispatch.override_thread_for_message(&message) == DispatchThread::Io
                && !self.context.is_closed()
                && io_dispatch.on_message_received(&message)
            {
                return;
            }
        }

        // A sync request nobody will see still gets an answer.
        let refusal = message.is_sync().then(|| message.reply_error());
        if !self.deliver(ChannelEvent::Message(message)) {
            if let Some(refusal) = refusal {
                self.context.post_send(refusal);
            }
        }
    }

    fn on_channel_connected(&mut self, peer_pid: i32) {
        if self.context.is_closed() {
            return;
        }
        self.context.pending.reopen();
        self.context.peer_pid.store(peer_pid, Ordering::Release);
        self.filters.channel_connected(peer_pid);
        self.deliver(ChannelEvent::Connected { peer_pid });
    }

    fn on_channel_error(&mut self) {
        self.context.peer_pid.store(UNKNOWN_PID, Ordering::Release);
        self.context.pending.fail_all();
        self.filters.channel_error();
        self.deliver(ChannelEvent::Error);
    }
}

/// Builds a [`ChannelProxy`] and hands its channel to an I/O thread
pub struct ChannelProxyBuilder {
    handle: ChannelHandle,
    mode: Mode,
    sink: Option<Arc<dyn EventSink>>,
    io_dispatch: Option<Box<dyn IoDispatch>>,
    filters: Vec<Arc<dyn MessageFilter>>,
    open_access: bool,
}

impl ChannelProxyBuilder {
    pub fn listener(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Delivers listener events to a mailbox
    pub fn mailbox(self, sender: MailboxSender<ChannelEvent>) -> Self {
        self.listener(Arc::new(sender))
    }

    pub fn io_dispatch(mut self, io_dispatch: Box<dyn IoDispatch>) -> Self {
        self.io_dispatch = Some(io_dispatch);
        self
    }

    /// Adds a filter that is attached together with the channel
    pub fn filter(mut self, filter: Arc<dyn MessageFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn open_access(mut self) -> Self {
        self.open_access = true;
        self
    }

    /// Opens the transport on the calling thread, then moves the channel to `io`
    pub fn build(self, io: &IoHandle) -> Result<ChannelProxy, IpcError> {
        if !io.is_running() {
            return Err(IpcError::IoThreadStopped);
        }

        let key = io.next_key();
        let context = Arc::new(ProxyContext {
            key,
            io: io.clone(),
            closing: CancellationSource::new(),
            peer_pid: AtomicI32::new(UNKNOWN_PID),
            pending: PendingReplies::new(),
            next_request_id: AtomicU32::new(1),
        });

        let sender = ProxySender {
            context: Arc::downgrade(&context),
        };
        let proxy_io = ProxyIo {
            context: context.clone(),
            filters: FilterChain::new(sender, self.filters),
            sink: self.sink,
            io_dispatch: self.io_dispatch,
        };

        let mut channel = Channel::new(self.handle, self.mode, proxy_io, io.config().clone());
        if self.open_access {
            channel = channel.with_open_access();
        }
        channel.connect()?;

        if !io.post(IoCommand::Open {
            key,
            channel: Box::new(channel),
        }) {
            return Err(IpcError::IoThreadStopped);
        }

        Ok(ChannelProxy { context })
    }
}

/// Thread-safe front of a channel owned by an I/O thread
pub struct ChannelProxy {
    context: Arc<ProxyContext>,
}

impl ChannelProxy {
    pub fn builder(handle: ChannelHandle, mode: Mode) -> ChannelProxyBuilder {
        ChannelProxyBuilder {
            handle,
            mode,
            sink: None,
            io_dispatch: None,
            filters: Vec::new(),
            open_access: false,
        }
    }

    /// Queues a message from any thread
    ///
    /// `true` means queued, not delivered; `false` once the proxy is closed.
    pub fn send(&self, message: Message) -> bool {
        self.context.post_send(message)
    }

    /// Sends a request and blocks until its reply
    ///
    /// Never call this on the I/O thread: the reply could not be read.
    pub fn send_sync(&self, message: Message, timeout: Timeout) -> Result<Message, SyncSendError> {
        let (request_id, slot) = self.begin_sync(message)?;
        let result = pending::wait(&slot, timeout.start());
        self.finish_sync(request_id, result)
    }

    /// [`send_sync`](Self::send_sync) with the I/O thread's configured timeout
    pub fn send_sync_default(&self, message: Message) -> Result<Message, SyncSendError> {
        let timeout = Timeout::after(self.context.io.config().default_sync_timeout());
        self.send_sync(message, timeout)
    }

    /// Sends a request and keeps dispatching `events` until its reply
    ///
    /// Every event posted to the caller's mailbox while it waits is handed
    /// to `dispatch`, so a nested sync request from the peer can be answered
    /// before our own reply arrives.
    pub fn send_sync_dispatching<F>(
        &self,
        message: Message,
        timeout: Timeout,
        events: &Mailbox<ChannelEvent>,
        mut dispatch: F,
    ) -> Result<Message, SyncSendError>
    where
        F: FnMut(ChannelEvent),
    {
        let (request_id, slot) = self.begin_sync(message)?;
        let deadline = timeout.start();
        let result = loop {
            let remaining = deadline
                .time_remaining(Instant::now())
                .unwrap_or(Duration::ZERO);
            let mut select = Select::new();
            let reply_index = select.recv(&slot);
            select.recv(events.receiver());

            let operation = match select.select_timeout(remaining) {
                Ok(operation) => operation,
                Err(_) => break Err(SyncSendError::Timeout),
            };
            if operation.index() == reply_index {
                let reply = operation
                    .recv(&slot)
                    .map_err(|_| RecvTimeoutError::Disconnected);
                break pending::outcome(reply);
            }
            match operation.recv(events.receiver()) {
                Ok(event) => dispatch(event),
                Err(_) => break pending::wait(&slot, deadline),
            }
        };
        self.finish_sync(request_id, result)
    }

    fn begin_sync(&self, mut message: Message) -> Result<(u32, ReplySlot), SyncSendError> {
        if self.context.io.is_current() {
            return Err(SyncSendError::OnIoThread);
        }
        if self.is_closed() {
            return Err(SyncSendError::ChannelClosed);
        }

        let request_id = self.context.next_request_id.fetch_add(1, Ordering::Relaxed);
        message.mark_sync(request_id);
        let slot = self
            .context
            .pending
            .register(request_id)
            .ok_or(SyncSendError::ChannelClosed)?;

        if !self.send(message) {
            self.context.pending.cancel(request_id);
            return Err(SyncSendError::ChannelClosed);
        }
        Ok((request_id, slot))
    }

    fn finish_sync(
        &self,
        request_id: u32,
        result: Result<Message, SyncSendError>,
    ) -> Result<Message, SyncSendError> {
        if result.is_err() {
            self.context.pending.cancel(request_id);
        }
        result
    }

    pub fn add_filter(&self, filter: Arc<dyn MessageFilter>) {
        self.context.io.post(IoCommand::AddFilter {
            key: self.context.key,
            filter,
        });
    }

    /// Detaches a filter; it gets `on_filter_removed` on the I/O thread
    pub fn remove_filter(&self, filter: &Arc<dyn MessageFilter>) {
        self.context.io.post(IoCommand::RemoveFilter {
            key: self.context.key,
            filter: filter.clone(),
        });
    }

    /// Stops listener delivery now and tears the channel down on the I/O thread
    pub fn close(&self) {
        if !self.context.closing.cancel(CancellationReason::ChannelClosed) {
            return;
        }
        self.context.pending.fail_all();
        self.context.io.post(IoCommand::Close {
            key: self.context.key,
        });
    }

    pub fn is_closed(&self) -> bool {
        self.context.is_closed()
    }

    pub fn peer_pid(&self) -> Option<i32> {
        self.context.peer_pid()
    }

    pub fn sender(&self) -> ProxySender {
        ProxySender {
            context: Arc::downgrade(&self.context),
        }
    }
}

impl Drop for ChannelProxy {
    fn drop(&mut self) {
        self.close();
    }
}
