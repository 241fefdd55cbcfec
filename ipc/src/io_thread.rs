//! The I/O thread: owns every channel and runs all socket work
//!
//! Other threads never touch a channel. They post [`IoCommand`]s and wake
//! the thread through a socket pair; the thread applies commands in order
//! and then polls every channel plus the wake socket.

use log::{debug, error, trace, warn};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

use crate::channel::{Channel, PollSource};
use crate::config::IpcConfig;
use crate::error::IpcError;
use crate::filter::MessageFilter;
use crate::message::Message;
use crate::proxy::ProxyIo;

pub(crate) type ProxyKey = u64;

pub(crate) enum IoCommand {
    Open {
        key: ProxyKey,
        channel: Box<Channel<ProxyIo>>,
    },
    Send {
        key: ProxyKey,
        message: Message,
    },
    AddFilter {
        key: ProxyKey,
        filter: Arc<dyn MessageFilter>,
    },
    RemoveFilter {
        key: ProxyKey,
        filter: Arc<dyn MessageFilter>,
    },
    Close {
        key: ProxyKey,
    },
    Shutdown,
}

struct IoShared {
    commands: Mutex<VecDeque<IoCommand>>,
    waker: UnixStream,
    thread_id: OnceLock<ThreadId>,
    running: AtomicBool,
    next_key: AtomicU64,
    config: IpcConfig,
}

/// Cloneable handle for posting work to an I/O thread
#[derive(Clone)]
pub struct IoHandle {
    shared: Arc<IoShared>,
}

impl IoHandle {
    /// True when called on the I/O thread itself
    pub fn is_current(&self) -> bool {
        self.shared.thread_id.get() == Some(&thread::current().id())
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &IpcConfig {
        &self.shared.config
    }

    pub(crate) fn next_key(&self) -> ProxyKey {
        self.shared.next_key.fetch_add(1, Ordering::Relaxed)
    }

    /// Queues a command; `false` (dropping it) once the thread has stopped
    pub(crate) fn post(&self, command: IoCommand) -> bool {
        if !self.is_running() {
            return false;
        }
        self.shared.commands.lock().push_back(command);
        // The loop drains commands before polling again, so posting from
        // the I/O thread needs no wake-up.
        if !self.is_current() {
            self.wake();
        }
        true
    }

    fn wake(&self) {
        match (&self.shared.waker).write(&[1]) {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::WouldBlock => {}
            Err(err) => warn!("could not wake I/O thread: {}", err),
        }
    }
}

/// A running I/O thread; stopping it closes every channel it owns
pub struct IoThread {
    handle: IoHandle,
    join: Option<JoinHandle<()>>,
}

impl IoThread {
    pub fn start(config: IpcConfig) -> Result<Self, IpcError> {
        config.validate()?;

        let (waker, wake_rx) = UnixStream::pair()?;
        waker.set_nonblocking(true)?;
        wake_rx.set_nonblocking(true)?;

        let shared = Arc::new(IoShared {
            commands: Mutex::new(VecDeque::new()),
            waker,
            thread_id: OnceLock::new(),
            running: AtomicBool::new(true),
            next_key: AtomicU64::new(1),
            config,
        });

        let io_loop = IoLoop {
            shared: shared.clone(),
            wake_rx,
            endpoints: HashMap::new(),
        };
        let join = thread::Builder::new()
            .name("ipc-io".to_string())
            .spawn(move || io_loop.run())?;
        let _ = shared.thread_id.set(join.thread().id());

        Ok(Self {
            handle: IoHandle { shared },
            join: Some(join),
        })
    }

    pub fn handle(&self) -> IoHandle {
        self.handle.clone()
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(join) = self.join.take() else {
            return;
        };
        self.handle.post(IoCommand::Shutdown);
        self.handle.shared.running.store(false, Ordering::Release);

        if self.handle.is_current() {
            return;
        }
        if join.join().is_err() {
            error!("I/O thread panicked");
        }
    }
}

impl Drop for IoThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

type Ready = (Option<(ProxyKey, PollSource)>, PollFlags);

struct IoLoop {
    shared: Arc<IoShared>,
    wake_rx: UnixStream,
    endpoints: HashMap<ProxyKey, Box<Channel<ProxyIo>>>,
}

impl IoLoop {
    fn run(mut self) {
        let _ = self.shared.thread_id.set(thread::current().id());
        debug!("I/O thread started");

        loop {
            if !self.apply_commands() {
                break;
            }
            let ready = match self.poll_once() {
                Ok(ready) => ready,
                Err(errno) => {
                    error!("poll failed on I/O thread: {}", errno);
                    break;
                }
            };
            for (target, events) in ready {
                match target {
                    None => self.drain_wakeups(),
                    Some((key, source)) => {
                        if let Some(channel) = self.endpoints.get_mut(&key) {
                            channel.on_ready(source, events);
                        }
                    }
                }
            }
        }

        self.shared.running.store(false, Ordering::Release);
        for (_, mut channel) in self.endpoints.drain() {
            close_endpoint(&mut channel);
        }
        self.shared.commands.lock().clear();
        debug!("I/O thread stopped");
    }

    /// Applies queued commands; `false` once shutdown was requested
    fn apply_commands(&mut self) -> bool {
        loop {
            let batch = std::mem::take(&mut *self.shared.commands.lock());
            if batch.is_empty() {
                return true;
            }
            for command in batch {
                if !self.apply(command) {
                    return false;
                }
            }
        }
    }

    fn apply(&mut self, command: IoCommand) -> bool {
        match command {
            IoCommand::Open { key, mut channel } => {
                channel.listener_mut().attach();
                self.endpoints.insert(key, channel);
            }
            IoCommand::Send { key, message } => match self.endpoints.get_mut(&key) {
                Some(channel) => {
                    channel.send(message);
                }
                None => trace!("dropping {} for closed proxy", message.message_type()),
            },
            IoCommand::AddFilter { key, filter } => match self.endpoints.get_mut(&key) {
                Some(channel) => channel.listener_mut().add_filter(filter),
                None => debug!("filter added to closed proxy is never attached"),
            },
            IoCommand::RemoveFilter { key, filter } => {
                if let Some(channel) = self.endpoints.get_mut(&key) {
                    channel.listener_mut().remove_filter(&filter);
                }
            }
            IoCommand::Close { key } => {
                if let Some(mut channel) = self.endpoints.remove(&key) {
                    close_endpoint(&mut channel);
                }
            }
            IoCommand::Shutdown => return false,
        }
        true
    }

    fn poll_once(&self) -> Result<Vec<Ready>, Errno> {
        let mut targets = vec![None];
        let mut fds = vec![PollFd::new(self.wake_rx.as_fd(), PollFlags::POLLIN)];
        for (key, channel) in &self.endpoints {
            for (source, fd, flags) in channel.poll_sources() {
                fds.push(PollFd::new(fd, flags));
                targets.push(Some((*key, source)));
            }
        }

        loop {
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => break,
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(errno),
            }
        }

        Ok(fds
            .iter()
            .zip(targets)
            .filter_map(|(fd, target)| match fd.revents() {
                Some(events) if !events.is_empty() => Some((target, events)),
                _ => None,
            })
            .collect())
    }

    fn drain_wakeups(&mut self) {
        let mut buf = [0u8; 64];
        loop {
            match (&self.wake_rx).read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }
}

fn close_endpoint(channel: &mut Channel<ProxyIo>) {
    channel.listener_mut().closing();
    channel.close();
}
