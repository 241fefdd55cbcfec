//! Channel: one framed, ordered, bidirectional connection over a Unix socket
//!
//! A channel never blocks. Writes that the socket refuses stay queued until
//! the owner reports the socket writable; reads drain until the socket would
//! block. Exactly one [`Listener`] is bound for the channel's whole life.

use core_types::{ChannelId, RoutingId};
use log::{debug, error, warn};
use nix::errno::Errno;
use nix::poll::PollFlags;
use std::collections::VecDeque;
use std::fmt;
use std::io::ErrorKind;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use crate::codec::{self, Frame, FrameReader};
use crate::config::IpcConfig;
use crate::error::{FrameError, IpcError};
use crate::handle::TransferableHandle;
use crate::message::Message;
use crate::transport::{self, RecvFailure, RecvOutcome};
use crate::typed::{Hello, TypedMessage};

/// Receives everything a channel reports
pub trait Listener: Send {
    fn on_message_received(&mut self, message: Message);

    /// The peer's hello arrived
    fn on_channel_connected(&mut self, _peer_pid: i32) {}

    /// The connection failed; fired at most once per connection
    fn on_channel_error(&mut self) {}
}

impl<T: Listener + ?Sized> Listener for Box<T> {
    fn on_message_received(&mut self, message: Message) {
        (**self).on_message_received(message)
    }

    fn on_channel_connected(&mut self, peer_pid: i32) {
        (**self).on_channel_connected(peer_pid)
    }

    fn on_channel_error(&mut self) {
        (**self).on_channel_error()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Server,
    Client,
}

/// Transport a channel is built on
#[derive(Debug)]
pub enum ChannelHandle {
    /// One end of a connected socket pair
    Socket(OwnedFd),
    /// Filesystem path of a named socket: bound by the server, connected to by the client
    Named(PathBuf),
}

impl ChannelHandle {
    /// A fresh, unused socket path inside `dir`
    pub fn named_in(dir: &Path) -> Self {
        ChannelHandle::Named(dir.join(ChannelId::new().socket_file_name()))
    }
}

/// Creates a connected pair of endpoints for a server and a client channel
pub fn socket_pair() -> Result<(OwnedFd, OwnedFd), IpcError> {
    let (server, client) = UnixStream::pair()?;
    Ok((OwnedFd::from(server), OwnedFd::from(client)))
}

/// Which descriptor of a channel became ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollSource {
    Listener,
    Stream,
}

#[derive(Debug)]
enum ChannelFault {
    PeerClosed,
    Sys(Errno),
    Accept(std::io::Error),
    Frame(FrameError),
    BadHello(serde_json::Error),
}

impl fmt::Display for ChannelFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelFault::PeerClosed => write!(f, "peer closed the connection"),
            ChannelFault::Sys(errno) => write!(f, "socket error: {}", errno),
            ChannelFault::Accept(err) => write!(f, "accept failed: {}", err),
            ChannelFault::Frame(err) => write!(f, "protocol error: {}", err),
            ChannelFault::BadHello(err) => write!(f, "malformed hello: {}", err),
        }
    }
}

impl From<FrameError> for ChannelFault {
    fn from(err: FrameError) -> Self {
        ChannelFault::Frame(err)
    }
}

impl From<RecvFailure> for ChannelFault {
    fn from(failure: RecvFailure) -> Self {
        match failure {
            RecvFailure::Sys(errno) => ChannelFault::Sys(errno),
            RecvFailure::Truncated => ChannelFault::Frame(FrameError::ControlTruncated),
        }
    }
}

#[derive(Debug)]
struct OutgoingFrame {
    bytes: Vec<u8>,
    handles: Vec<TransferableHandle>,
    written: usize,
}

impl From<Frame> for OutgoingFrame {
    fn from(frame: Frame) -> Self {
        Self {
            bytes: frame.bytes,
            handles: frame.handles,
            written: 0,
        }
    }
}

pub struct Channel<L: Listener = Box<dyn Listener>> {
    mode: Mode,
    handle: Option<ChannelHandle>,
    config: IpcConfig,
    listener: L,
    listen_socket: Option<UnixListener>,
    stream: Option<UnixStream>,
    unlink_path: Option<PathBuf>,
    output: VecDeque<OutgoingFrame>,
    reader: FrameReader,
    read_buf: Vec<u8>,
    cmsg_buf: Vec<u8>,
    waiting_for_hello: bool,
    peer_pid: Option<i32>,
    open_access: bool,
    closed: bool,
    error_reported: bool,
}

impl<L: Listener> Channel<L> {
    pub fn new(handle: ChannelHandle, mode: Mode, listener: L, config: IpcConfig) -> Self {
        Self {
            mode,
            handle: Some(handle),
            reader: FrameReader::new(&config),
            read_buf: vec![0; config.read_buffer_size],
            cmsg_buf: transport::control_buffer(),
            config,
            listener,
            listen_socket: None,
            stream: None,
            unlink_path: None,
            output: VecDeque::new(),
            waiting_for_hello: false,
            peer_pid: None,
            open_access: false,
            closed: false,
            error_reported: false,
        }
    }

    /// Accept named-socket peers running as any user
    pub fn with_open_access(mut self) -> Self {
        self.open_access = true;
        self
    }

    /// Opens the transport; callable once
    pub fn connect(&mut self) -> Result<(), IpcError> {
        if self.closed {
            return Err(IpcError::Closed);
        }
        let handle = self.handle.take().ok_or(IpcError::AlreadyConnected)?;

        match (handle, self.mode) {
            (ChannelHandle::Socket(fd), _) => {
                let stream = UnixStream::from(fd);
                stream.set_nonblocking(true)?;
                self.attach_stream(stream);
            }
            (ChannelHandle::Named(path), Mode::Server) => {
                let listener = UnixListener::bind(&path).map_err(|err| {
                    if err.kind() == ErrorKind::AddrInUse {
                        IpcError::AddressInUse(path.clone())
                    } else {
                        IpcError::Io(err)
                    }
                })?;
                listener.set_nonblocking(true)?;
                debug!("listening on {}", path.display());
                self.unlink_path = Some(path);
                self.listen_socket = Some(listener);
            }
            (ChannelHandle::Named(path), Mode::Client) => {
                let stream = UnixStream::connect(&path)?;
                stream.set_nonblocking(true)?;
                self.attach_stream(stream);
            }
        }
        Ok(())
    }

    /// Queues a message; returns `false` and drops it if the channel is closed
    pub fn send(&mut self, message: Message) -> bool {
        if self.closed {
            debug!("dropping {} sent on closed channel", message.message_type());
            return false;
        }

        let message_type = message.message_type();
        let frame = match codec::encode(message, &self.config) {
            Ok(frame) => frame,
            Err(err) => {
                error!("refusing to send {}: {}", message_type, err);
                return false;
            }
        };
        self.output.push_back(frame.into());

        if self.can_write() {
            if let Err(errno) = self.flush() {
                self.fail(ChannelFault::Sys(errno));
            }
        }
        true
    }

    /// Releases the transport; idempotent and silent
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.handle = None;
        self.stream = None;
        self.listen_socket = None;
        if let Some(path) = self.unlink_path.take() {
            if let Err(err) = std::fs::remove_file(&path) {
                debug!("could not unlink {}: {}", path.display(), err);
            }
        }
        self.output.clear();
        self.reader.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_connected(&self) -> bool {
        self.peer_pid.is_some() && !self.closed
    }

    pub fn peer_pid(&self) -> Option<i32> {
        self.peer_pid
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    /// Messages waiting for the socket to become writable
    pub fn queued_messages(&self) -> usize {
        self.output.len()
    }

    /// Descriptors to poll and the readiness each one waits for
    pub fn poll_sources(&self) -> Vec<(PollSource, BorrowedFd<'_>, PollFlags)> {
        let mut sources = Vec::with_capacity(2);
        if let Some(listener) = &self.listen_socket {
            sources.push((PollSource::Listener, listener.as_fd(), PollFlags::POLLIN));
        }
        if let Some(stream) = &self.stream {
            let mut flags = PollFlags::POLLIN;
            if self.can_write() && !self.output.is_empty() {
                flags |= PollFlags::POLLOUT;
            }
            sources.push((PollSource::Stream, stream.as_fd(), flags));
        }
        sources
    }

    /// Dispatches poll readiness for one of this channel's descriptors
    pub fn on_ready(&mut self, source: PollSource, events: PollFlags) {
        match source {
            PollSource::Listener => self.accept_connection(),
            PollSource::Stream => {
                if events.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR) {
                    self.on_readable();
                }
                if events.contains(PollFlags::POLLOUT) {
                    self.on_writable();
                }
                if events.contains(PollFlags::POLLNVAL) {
                    self.fail(ChannelFault::Sys(Errno::EBADF));
                }
            }
        }
    }

    pub fn on_readable(&mut self) {
        if let Err(fault) = self.read_messages() {
            self.fail(fault);
        }
    }

    pub fn on_writable(&mut self) {
        if !self.can_write() {
            return;
        }
        if let Err(errno) = self.flush() {
            self.fail(ChannelFault::Sys(errno));
        }
    }

    fn can_write(&self) -> bool {
        self.stream.is_some() && !self.waiting_for_hello
    }

    fn attach_stream(&mut self, stream: UnixStream) {
        self.stream = Some(stream);
        self.error_reported = false;
        match self.hello_frame() {
            Ok(frame) => self.output.push_front(frame),
            Err(err) => error!("could not build hello: {}", err),
        }
        // The server holds its queue until the client has introduced itself.
        self.waiting_for_hello = self.mode == Mode::Server;
    }

    fn hello_frame(&self) -> Result<OutgoingFrame, String> {
        let hello = Hello::current()
            .to_message(RoutingId::NONE)
            .map_err(|err| err.to_string())?;
        let frame = codec::encode(hello, &self.config).map_err(|err| err.to_string())?;
        Ok(frame.into())
    }

    fn accept_connection(&mut self) {
        let Some(listen_socket) = &self.listen_socket else {
            return;
        };

        match listen_socket.accept() {
            Ok((stream, _)) => {
                if self.stream.is_some() {
                    warn!("denying additional connection to named channel");
                    return;
                }
                if !self.open_access && !peer_is_same_user(&stream) {
                    warn!("denying connection from a different user");
                    return;
                }
                if let Err(err) = stream.set_nonblocking(true) {
                    warn!("could not configure accepted socket: {}", err);
                    return;
                }
                self.attach_stream(stream);
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {}
            Err(err) => self.fail(ChannelFault::Accept(err)),
        }
    }

    fn flush(&mut self) -> Result<(), Errno> {
        let Some(stream) = &self.stream else {
            return Ok(());
        };
        let socket = stream.as_raw_fd();

        while let Some(frame) = self.output.front_mut() {
            let fds: Vec<_> = frame.handles.iter().map(|h| h.as_raw_fd()).collect();
            match transport::send_chunk(socket, &frame.bytes[frame.written..], &fds) {
                Ok(written) => {
                    // The kernel holds its own copies now.
                    frame.handles.clear();
                    frame.written += written;
                    if frame.written == frame.bytes.len() {
                        self.output.pop_front();
                    }
                }
                Err(Errno::EAGAIN) => break,
                Err(errno) => return Err(errno),
            }
        }
        Ok(())
    }

    fn read_messages(&mut self) -> Result<(), ChannelFault> {
        loop {
            let Some(stream) = &self.stream else {
                return Ok(());
            };
            let socket = stream.as_raw_fd();

            match transport::recv_chunk(socket, &mut self.read_buf, &mut self.cmsg_buf)? {
                RecvOutcome::WouldBlock => break,
                RecvOutcome::Eof => return Err(ChannelFault::PeerClosed),
                RecvOutcome::Data { len, fds } => {
                    self.reader
                        .push_handles(fds.into_iter().map(TransferableHandle::from_received));
                    self.reader.push_bytes(&self.read_buf[..len]);
                    self.dispatch_frames()?;
                }
            }
        }
        self.reader.check_stray_handles()?;
        Ok(())
    }

    fn dispatch_frames(&mut self) -> Result<(), ChannelFault> {
        while let Some(message) = self.reader.next_message()? {
            if Hello::is_hello(&message) {
                self.on_hello(&message)?;
            } else {
                self.listener.on_message_received(message);
            }
        }
        Ok(())
    }

    fn on_hello(&mut self, message: &Message) -> Result<(), ChannelFault> {
        let hello = Hello::read(message).map_err(ChannelFault::BadHello)?;
        self.peer_pid = Some(hello.pid);

        if self.waiting_for_hello {
            self.waiting_for_hello = false;
            self.flush().map_err(ChannelFault::Sys)?;
        }
        debug!("channel connected to pid {}", hello.pid);
        self.listener.on_channel_connected(hello.pid);
        Ok(())
    }

    /// Reports the fault once per connection
    ///
    /// A named server only loses the failed connection and goes back to
    /// accepting; everything else closes.
    fn fail(&mut self, fault: ChannelFault) {
        if self.error_reported {
            return;
        }
        self.error_reported = true;
        match fault {
            ChannelFault::PeerClosed => debug!("channel error: {}", fault),
            _ => error!("channel error: {}", fault),
        }

        let keep_listening = self.listen_socket.is_some()
            && self.stream.is_some()
            && !matches!(fault, ChannelFault::Accept(_));
        if keep_listening {
            self.reset_to_accepting();
        } else {
            self.close();
        }
        self.listener.on_channel_error();
    }

    fn reset_to_accepting(&mut self) {
        debug!("named channel waiting for its next client");
        self.stream = None;
        self.output.clear();
        self.reader.clear();
        self.waiting_for_hello = false;
        self.peer_pid = None;
    }
}

impl<L: Listener> Drop for Channel<L> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn peer_is_same_user(stream: &UnixStream) -> bool {
    use nix::sys::socket::{getsockopt, sockopt};

    match getsockopt(stream, sockopt::PeerCredentials) {
        Ok(credentials) => credentials.uid() == nix::unistd::geteuid().as_raw(),
        Err(errno) => {
            warn!("could not read peer credentials: {}", errno);
            false
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn peer_is_same_user(_stream: &UnixStream) -> bool {
    true
}
