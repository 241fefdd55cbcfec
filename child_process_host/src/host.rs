//! One child process, its channel and its routes
//!
//! A host lives on its registry's thread. Channel and launcher activity
//! reaches it as [`HostEvent`]s drained by [`crate::ProcessRegistry::pump`].

use crate::config::HostConfig;
use crate::delegate::{ChildProcessHostDelegate, Disposition, RouteListener};
use crate::error::HostError;
use crate::messages::{AskBeforeShutdown, SetIpcLoggingEnabled, Shutdown, ShutdownRequest};
use crate::notification::{NotificationKind, ObserverList};
use core_types::{ChannelId, ChildProcessId, ProcessType, RoutingId};
use ipc::{
    socket_pair, ChannelEvent, ChannelHandle, ChannelProxy, EventSink, IoHandle, MailboxSender,
    Message, MessageFilter, Mode, ProxySender, TypedMessage,
};
use process_launcher::{
    ChannelSwitch, ChildProcess, CommandLine, LaunchClient, LaunchError, LaunchRequest,
    ProcessLauncher, TerminationInfo, TerminationStatus, PRIMARY_IPC_FD,
    RESULT_CODE_KILLED, RESULT_CODE_KILLED_BAD_MESSAGE, SWITCH_IPC_CHANNEL, SWITCH_PROCESS_TYPE,
};
use std::collections::{BTreeMap, VecDeque};
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::sync::Arc;

/// Something that happened to a host off its own thread
#[derive(Debug)]
pub enum HostEvent {
    Channel {
        id: ChildProcessId,
        event: ChannelEvent,
    },
    LaunchFinished {
        id: ChildProcessId,
        result: Result<ChildProcess, LaunchError>,
    },
}

impl HostEvent {
    pub fn id(&self) -> ChildProcessId {
        match self {
            HostEvent::Channel { id, .. } | HostEvent::LaunchFinished { id, .. } => *id,
        }
    }
}

struct HostEventSink {
    id: ChildProcessId,
    events: MailboxSender<HostEvent>,
}

impl EventSink for HostEventSink {
    fn post_event(&self, event: ChannelEvent) -> bool {
        self.events.post(HostEvent::Channel { id: self.id, event })
    }
}

impl LaunchClient for HostEventSink {
    fn on_launch_finished(&self, id: ChildProcessId, result: Result<ChildProcess, LaunchError>) {
        self.events.post(HostEvent::LaunchFinished { id, result });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Uninitialized,
    /// Channel created, waiting for the child's hello
    Launching,
    Connected,
    Disconnected,
}

/// The child's end of a freshly created channel
#[derive(Debug)]
pub enum ChildEndpoint {
    Fd(OwnedFd),
    Named(PathBuf),
}

impl ChildEndpoint {
    pub fn into_channel_handle(self) -> ChannelHandle {
        match self {
            ChildEndpoint::Fd(fd) => ChannelHandle::Socket(fd),
            ChildEndpoint::Named(path) => ChannelHandle::Named(path),
        }
    }
}

/// What the registry does with a host after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HostAction {
    Keep,
    /// Channel is gone: remove, classify, notify
    Disconnect,
    /// Never launched: remove silently
    Discard,
}

pub struct ChildProcessHost {
    id: ChildProcessId,
    process_type: ProcessType,
    state: HostState,
    config: HostConfig,
    delegate: Box<dyn ChildProcessHostDelegate>,
    events: MailboxSender<HostEvent>,
    proxy: Option<ChannelProxy>,
    filters: Vec<Arc<dyn MessageFilter>>,
    process: Option<ChildProcess>,
    pending_kill: Option<i32>,
    queued: VecDeque<Message>,
    routes: BTreeMap<RoutingId, Box<dyn RouteListener>>,
    next_routing_id: i32,
    peer_pid: Option<i32>,
}

impl ChildProcessHost {
    pub(crate) fn new(
        process_type: ProcessType,
        delegate: Box<dyn ChildProcessHostDelegate>,
        config: HostConfig,
        events: MailboxSender<HostEvent>,
    ) -> Self {
        Self {
            id: ChildProcessId::next(),
            process_type,
            state: HostState::Uninitialized,
            config,
            delegate,
            events,
            proxy: None,
            filters: Vec::new(),
            process: None,
            pending_kill: None,
            queued: VecDeque::new(),
            routes: BTreeMap::new(),
            next_routing_id: 1,
            peer_pid: None,
        }
    }

    pub fn id(&self) -> ChildProcessId {
        self.id
    }

    pub fn process_type(&self) -> ProcessType {
        self.process_type
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    /// Pid reported by the launcher, if the child was launched by us
    pub fn pid(&self) -> Option<i32> {
        self.process.as_ref().map(ChildProcess::pid)
    }

    /// Pid the child announced in its hello
    pub fn peer_pid(&self) -> Option<i32> {
        self.peer_pid
    }

    /// Handle for sending later or from another thread
    pub fn sender(&self) -> Option<ProxySender> {
        self.proxy.as_ref().map(ChannelProxy::sender)
    }

    /// Filters added before the channel exists are attached with it
    pub fn add_filter(&mut self, filter: Arc<dyn MessageFilter>) {
        if let Some(proxy) = &self.proxy {
            proxy.add_filter(filter.clone());
        }
        self.filters.push(filter);
    }

    pub fn remove_filter(&mut self, filter: &Arc<dyn MessageFilter>) {
        let before = self.filters.len();
        self.filters
            .retain(|f| Arc::as_ptr(f) as *const () != Arc::as_ptr(filter) as *const ());
        if self.filters.len() != before {
            if let Some(proxy) = &self.proxy {
                proxy.remove_filter(filter);
            }
        }
    }

    /// Creates the server end of the channel and returns the child's end
    pub fn create_channel(&mut self, io: &IoHandle) -> Result<ChildEndpoint, HostError> {
        if self.state != HostState::Uninitialized {
            return Err(HostError::InvalidState {
                id: self.id,
                state: self.state,
            });
        }

        let (handle, endpoint) = match &self.config.named_channel_dir {
            Some(dir) => {
                let path = dir.join(ChannelId::new().socket_file_name());
                (ChannelHandle::Named(path.clone()), ChildEndpoint::Named(path))
            }
            None => {
                let (server, client) = socket_pair()?;
                (ChannelHandle::Socket(server), ChildEndpoint::Fd(client))
            }
        };

        let mut builder = ChannelProxy::builder(handle, Mode::Server).listener(self.sink());
        for filter in &self.filters {
            builder = builder.filter(filter.clone());
        }
        self.proxy = Some(builder.build(io)?);
        self.state = HostState::Launching;
        log::debug!("{} channel created", self.id);
        Ok(endpoint)
    }

    /// Creates the channel and starts the child on the launcher thread
    ///
    /// `--type` and `--ipc-channel` are appended to `command_line`.
    pub fn launch(
        &mut self,
        io: &IoHandle,
        launcher: &ProcessLauncher,
        mut command_line: CommandLine,
    ) -> Result<(), HostError> {
        let endpoint = self.create_channel(io)?;
        command_line.append_switch_value(SWITCH_PROCESS_TYPE, self.process_type.switch_value());

        let channel_fd = match endpoint {
            ChildEndpoint::Fd(fd) => {
                command_line.append_switch_value(
                    SWITCH_IPC_CHANNEL,
                    ChannelSwitch::Fd(PRIMARY_IPC_FD).to_switch_value(),
                );
                Some(fd)
            }
            ChildEndpoint::Named(path) => {
                command_line
                    .append_switch_value(SWITCH_IPC_CHANNEL, ChannelSwitch::Path(path).to_switch_value());
                None
            }
        };

        log::info!("launching {} {}: {}", self.process_type, self.id, command_line);
        let mut request = LaunchRequest::new(self.id, command_line);
        if let Some(fd) = channel_fd {
            request = request.with_channel_fd(fd);
        }

        if let Err(e) = launcher.launch(request, self.sink()) {
            log::error!("{} failed to launch: {}", self.id, e);
            self.delegate.on_process_launch_failed(&e);
            self.close_channel();
            self.state = HostState::Disconnected;
            return Err(e.into());
        }
        Ok(())
    }

    /// Sends now if connected, otherwise queues until the child connects
    pub fn send(&mut self, message: Message) -> bool {
        match self.state {
            HostState::Uninitialized | HostState::Launching => {
                self.queued.push_back(message);
                true
            }
            HostState::Connected => match &self.proxy {
                Some(proxy) => proxy.send(message),
                None => false,
            },
            HostState::Disconnected => false,
        }
    }

    pub fn queued_messages(&self) -> usize {
        self.queued.len()
    }

    pub fn next_routing_id(&mut self) -> RoutingId {
        let id = RoutingId::new(self.next_routing_id);
        self.next_routing_id += 1;
        id
    }

    /// Returns `false` if the id is reserved or already taken
    pub fn add_route(&mut self, routing_id: RoutingId, listener: Box<dyn RouteListener>) -> bool {
        if routing_id.is_control() || routing_id == RoutingId::NONE {
            return false;
        }
        if self.routes.contains_key(&routing_id) {
            return false;
        }
        self.routes.insert(routing_id, listener);
        true
    }

    pub fn remove_route(&mut self, routing_id: RoutingId) -> Option<Box<dyn RouteListener>> {
        self.routes.remove(&routing_id)
    }

    /// Tells the child to exit without waiting for it to ask
    pub fn request_shutdown(&mut self) -> bool {
        self.send_control(&Shutdown {})
    }

    /// Kills a connected child without the shutdown handshake
    pub fn fast_shutdown(&mut self) -> bool {
        if self.state != HostState::Connected {
            return false;
        }
        self.terminate(RESULT_CODE_KILLED)
    }

    /// Kills the child, recording `exit_code`. A kill requested before the
    /// launch finishes is applied as soon as it does.
    pub fn terminate(&mut self, exit_code: i32) -> bool {
        match &mut self.process {
            Some(process) => process.terminate(exit_code),
            None if self.state == HostState::Launching => {
                self.pending_kill = Some(exit_code);
                true
            }
            None => false,
        }
    }

    pub(crate) fn handle_event(&mut self, event: HostEvent, observers: &ObserverList) -> HostAction {
        match event {
            HostEvent::LaunchFinished { result: Ok(process), .. } => {
                self.on_process_launched(process, observers);
                HostAction::Keep
            }
            HostEvent::LaunchFinished { result: Err(error), .. } => {
                log::error!("{} failed to launch: {}", self.id, error);
                self.delegate.on_process_launch_failed(&error);
                self.notify(
                    observers,
                    NotificationKind::LaunchFailed {
                        error: error.to_string(),
                    },
                );
                HostAction::Discard
            }
            HostEvent::Channel {
                event: ChannelEvent::Connected { peer_pid },
                ..
            } => {
                self.on_channel_connected(peer_pid, observers);
                HostAction::Keep
            }
            HostEvent::Channel {
                event: ChannelEvent::Message(message),
                ..
            } => {
                self.on_message_received(message, observers);
                HostAction::Keep
            }
            HostEvent::Channel {
                event: ChannelEvent::Error,
                ..
            } => {
                if self.state == HostState::Disconnected {
                    return HostAction::Keep;
                }
                log::info!("{} channel error", self.id);
                HostAction::Disconnect
            }
        }
    }

    /// Final teardown, after the registry has dropped this host.
    ///
    /// With `force_exit_code` the child is killed and reaped; otherwise it
    /// gets the configured grace period to exit on its own.
    pub(crate) fn shut_down(mut self, observers: &ObserverList, force_exit_code: Option<i32>) {
        self.state = HostState::Disconnected;
        self.close_channel();

        let grace = self.config.termination_grace();
        let info = match (&mut self.process, force_exit_code) {
            (Some(process), Some(code)) => process.terminate_and_wait(code),
            (Some(process), None) => process.wait_for_termination(grace),
            (None, _) => TerminationInfo::still_running(),
        };
        log::info!("{} {} gone: {}", self.process_type, self.id, info);

        match info.status {
            TerminationStatus::Crashed => {
                self.delegate.on_process_crashed(&info);
                self.notify(observers, NotificationKind::Crashed(info));
            }
            TerminationStatus::Killed => self.notify(observers, NotificationKind::Killed(info)),
            _ => {}
        }

        for route in self.routes.values_mut() {
            route.on_process_gone(&info);
        }
        self.delegate.on_child_disconnected(&info);
        self.notify(observers, NotificationKind::Disconnected(info));
    }

    fn on_process_launched(&mut self, process: ChildProcess, observers: &ObserverList) {
        let pid = process.pid();
        self.process = Some(process);
        if let Some(exit_code) = self.pending_kill.take() {
            self.terminate(exit_code);
        }
        self.delegate.on_process_launched(pid);
        self.notify(observers, NotificationKind::Launched { pid });
    }

    fn on_channel_connected(&mut self, peer_pid: i32, observers: &ObserverList) {
        if self.state != HostState::Launching {
            return;
        }
        self.state = HostState::Connected;
        self.peer_pid = Some(peer_pid);

        self.send_control(&AskBeforeShutdown {});
        self.send_control(&SetIpcLoggingEnabled {
            enabled: self.config.ipc_logging,
        });
        let queued = std::mem::take(&mut self.queued);
        log::debug!("{} connected, flushing {} queued messages", self.id, queued.len());
        for message in queued {
            self.send(message);
        }

        self.delegate.on_channel_connected(peer_pid);
        self.notify(observers, NotificationKind::Connected { peer_pid });
    }

    fn on_message_received(&mut self, message: Message, observers: &ObserverList) {
        let Some(sender) = self.sender() else {
            return;
        };

        let disposition = if message.is_control() {
            match self.handle_control(&message, observers) {
                Disposition::Unhandled => self.delegate.on_message_received(&message, &sender),
                disposition => disposition,
            }
        } else {
            match self.routes.get_mut(&message.routing_id()) {
                Some(route) => route.on_message_received(&message, &sender),
                None => Disposition::Unhandled,
            }
        };

        match disposition {
            Disposition::Handled => {}
            Disposition::Unhandled => {
                log::warn!(
                    "{} dropped unhandled message {} for {}",
                    self.id,
                    message.message_type(),
                    message.routing_id()
                );
                if message.is_sync() {
                    sender.send(message.reply_error());
                }
            }
            Disposition::BadMessage => self.bad_message_received(&message),
        }
    }

    fn handle_control(&mut self, message: &Message, observers: &ObserverList) -> Disposition {
        if ShutdownRequest::matches(message) {
            if ShutdownRequest::read(message).is_err() {
                return Disposition::BadMessage;
            }
            if self.delegate.can_shutdown() {
                self.notify(observers, NotificationKind::Closing);
                self.send_control(&Shutdown {});
            }
            return Disposition::Handled;
        }
        Disposition::Unhandled
    }

    fn bad_message_received(&mut self, message: &Message) {
        log::error!(
            "{} sent malformed message {}; terminating it",
            self.id,
            message.message_type()
        );
        self.terminate(RESULT_CODE_KILLED_BAD_MESSAGE);
    }

    fn send_control<T: TypedMessage>(&mut self, message: &T) -> bool {
        match message.to_control() {
            Ok(message) => self.send(message),
            Err(e) => {
                log::error!("failed to encode control message {}: {}", T::TYPE, e);
                false
            }
        }
    }

    fn close_channel(&mut self) {
        if let Some(proxy) = self.proxy.take() {
            proxy.close();
        }
    }

    fn notify(&self, observers: &ObserverList, kind: NotificationKind) {
        observers.notify(self.id, self.process_type, kind);
    }

    fn sink(&self) -> Arc<HostEventSink> {
        Arc::new(HostEventSink {
            id: self.id,
            events: self.events.clone(),
        })
    }
}
