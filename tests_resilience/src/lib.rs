//! Resilience Test Utilities
//!
//! This crate provides shared utilities for resilience and integration tests.
//!
//! ## Test Philosophy
//!
//! - **Safety under faults**: hosts keep their invariants when children crash
//! - **Real transports**: every test runs over actual sockets and processes
//! - **No callbacks after teardown**: closed proxies and removed filters stay silent
//! - **Consistency**: the registry never reports a host it has already removed

use child_process_host::{
    DefaultDelegate, HostConfig, NotificationKind, ProcessNotification, ProcessObserver,
    ProcessRegistry,
};
use core_types::{ChildProcessId, ProcessType, RoutingId};
use ipc::{
    mailbox, socket_pair, ChannelEvent, ChannelProxy, IoHandle, IoThread, IpcConfig, Mailbox,
    Message, MessageFilter, MessageType, Mode, ProxySender, TypedMessage,
};
use parking_lot::Mutex;
use process_launcher::{CommandLine, ProcessLauncher};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Generous bound for anything that should happen "soon"
pub const WAIT: Duration = Duration::from_secs(10);

/// Namespace for test traffic
pub const TEST_NAMESPACE: u16 = 0x7F00;

/// Numbered test message, tagged with the thread that sent it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub sender: u32,
    pub seq: u32,
}

impl TypedMessage for Ping {
    const TYPE: MessageType = MessageType::new(TEST_NAMESPACE, 1);
}

/// Second message type, so filters can claim one and not the other
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub text: String,
}

impl TypedMessage for Note {
    const TYPE: MessageType = MessageType::new(TEST_NAMESPACE, 2);
}

pub fn ping(sender: u32, seq: u32) -> Message {
    Ping { sender, seq }
        .to_message(RoutingId::new(1))
        .unwrap()
}

pub fn note(text: &str) -> Message {
    Note {
        text: text.to_string(),
    }
    .to_message(RoutingId::new(1))
    .unwrap()
}

pub fn start_io() -> IoThread {
    IoThread::start(IpcConfig::default()).unwrap()
}

/// Two connected proxies on one I/O thread, each with an event mailbox
pub struct ProxyPair {
    pub server: ChannelProxy,
    pub server_events: Mailbox<ChannelEvent>,
    pub client: ChannelProxy,
    pub client_events: Mailbox<ChannelEvent>,
}

/// Builds a socket-pair channel; `server_filters` are given before the
/// channel reaches the I/O thread
pub fn proxy_pair(io: &IoHandle, server_filters: Vec<Arc<dyn MessageFilter>>) -> ProxyPair {
    let (server_fd, client_fd) = socket_pair().unwrap();
    let (server_tx, server_events) = mailbox();
    let (client_tx, client_events) = mailbox();

    let mut builder = ChannelProxy::builder(ipc::ChannelHandle::Socket(server_fd), Mode::Server)
        .mailbox(server_tx);
    for filter in server_filters {
        builder = builder.filter(filter);
    }
    let server = builder.build(io).unwrap();
    let client = ChannelProxy::builder(ipc::ChannelHandle::Socket(client_fd), Mode::Client)
        .mailbox(client_tx)
        .build(io)
        .unwrap();

    ProxyPair {
        server,
        server_events,
        client,
        client_events,
    }
}

/// Waits for the next `Connected` event, skipping nothing else
pub fn wait_connected(events: &Mailbox<ChannelEvent>) -> i32 {
    match events.recv_timeout(WAIT) {
        Some(ChannelEvent::Connected { peer_pid }) => peer_pid,
        other => panic!("expected connection, got {:?}", other),
    }
}

/// Next message event, skipping connection notices
pub fn next_message(events: &Mailbox<ChannelEvent>, timeout: Duration) -> Option<Message> {
    let deadline = Instant::now() + timeout;
    loop {
        match events.recv_deadline(deadline)? {
            ChannelEvent::Message(message) => return Some(message),
            ChannelEvent::Connected { .. } => continue,
            ChannelEvent::Error => return None,
        }
    }
}

/// Waits for the channel error event
pub fn wait_error(events: &Mailbox<ChannelEvent>) -> bool {
    let deadline = Instant::now() + WAIT;
    while let Some(event) = events.recv_deadline(deadline) {
        if matches!(event, ChannelEvent::Error) {
            return true;
        }
    }
    false
}

/// Polls `done` until it holds or [`WAIT`] passes
pub fn eventually(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

/// Filter that logs every callback and claims one message type
pub struct RecordingFilter {
    name: &'static str,
    claims: Option<MessageType>,
    log: Arc<Mutex<Vec<String>>>,
    sender: Mutex<Option<ProxySender>>,
}

impl RecordingFilter {
    pub fn new(
        name: &'static str,
        claims: Option<MessageType>,
        log: Arc<Mutex<Vec<String>>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            claims,
            log,
            sender: Mutex::new(None),
        })
    }

    pub fn sender(&self) -> Option<ProxySender> {
        self.sender.lock().clone()
    }

    fn record(&self, what: impl std::fmt::Display) {
        self.log.lock().push(format!("{}:{}", self.name, what));
    }
}

impl MessageFilter for RecordingFilter {
    fn on_filter_added(&self, sender: ProxySender) {
        *self.sender.lock() = Some(sender);
        self.record("added");
    }

    fn on_filter_removed(&self) {
        self.record("removed");
    }

    fn on_channel_connected(&self, _peer_pid: i32) {
        self.record("connected");
    }

    fn on_channel_error(&self) {
        self.record("error");
    }

    fn on_channel_closing(&self) {
        self.record("closing");
    }

    fn on_message_received(&self, message: &Message) -> bool {
        self.record(message.message_type());
        self.claims == Some(message.message_type())
    }
}

/// Entries of `log` that start with `name:`
pub fn entries(log: &Mutex<Vec<String>>, name: &str) -> Vec<String> {
    let prefix = format!("{}:", name);
    log.lock()
        .iter()
        .filter_map(|entry| entry.strip_prefix(&prefix).map(str::to_string))
        .collect()
}

/// A registry with its I/O thread and launcher, recording every notification
pub struct RegistryHarness {
    // Dropped in order: hosts first, the I/O thread last.
    pub registry: ProcessRegistry,
    pub launcher: ProcessLauncher,
    pub io: IoThread,
    notifications: Mailbox<ProcessNotification>,
    pub seen: Vec<ProcessNotification>,
}

impl RegistryHarness {
    pub fn new() -> Self {
        Self::with_config(HostConfig {
            termination_grace_ms: 5_000,
            ..HostConfig::default()
        })
    }

    pub fn with_config(config: HostConfig) -> Self {
        let (tx, notifications) = mailbox();
        let mut registry = ProcessRegistry::new(config);
        let observer: Arc<dyn ProcessObserver> = Arc::new(tx);
        registry.add_observer(observer);
        Self {
            registry,
            launcher: ProcessLauncher::start().unwrap(),
            io: start_io(),
            notifications,
            seen: Vec::new(),
        }
    }

    /// Launches `/bin/sh -c script` as a host of `process_type`
    pub fn launch_sh(&mut self, process_type: ProcessType, script: &str) -> ChildProcessId {
        let id = self
            .registry
            .create_host(process_type, Box::new(DefaultDelegate));
        let mut command_line = CommandLine::new("/bin/sh");
        command_line.append_arg("-c").append_arg(script);
        self.registry
            .launch(id, &self.io.handle(), &self.launcher, command_line)
            .unwrap();
        id
    }

    /// Pumps until the launcher reported `id` as started
    pub fn wait_launched(&mut self, id: ChildProcessId) {
        self.wait_for(id, |k| matches!(k, NotificationKind::Launched { .. }));
    }

    /// Pumps until `id` has produced a notification matching `pred`
    pub fn wait_for(
        &mut self,
        id: ChildProcessId,
        pred: impl Fn(&NotificationKind) -> bool,
    ) -> NotificationKind {
        let deadline = Instant::now() + WAIT;
        loop {
            self.collect();
            if let Some(found) = self.seen.iter().find(|n| n.id == id && pred(&n.kind)) {
                return found.kind.clone();
            }
            assert!(Instant::now() < deadline, "timed out; saw {:?}", self.kinds(id));
            self.registry.pump(Duration::from_millis(20));
        }
    }

    pub fn wait_disconnected(&mut self, id: ChildProcessId) -> process_launcher::TerminationInfo {
        match self.wait_for(id, |k| matches!(k, NotificationKind::Disconnected(_))) {
            NotificationKind::Disconnected(info) => info,
            other => panic!("unexpected {:?}", other),
        }
    }

    /// Moves delivered notifications into `seen`
    pub fn collect(&mut self) {
        self.seen.extend(self.notifications.drain());
    }

    pub fn kinds(&self, id: ChildProcessId) -> Vec<NotificationKind> {
        self.seen
            .iter()
            .filter(|n| n.id == id)
            .map(|n| n.kind.clone())
            .collect()
    }
}

impl Default for RegistryHarness {
    fn default() -> Self {
        Self::new()
    }
}
