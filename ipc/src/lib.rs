//! # Inter-Process Communication (IPC)
//!
//! Framed, ordered message channels between a host process and its children.
//!
//! ## Philosophy
//!
//! - **One I/O thread**: every socket read and write happens on it; other
//!   threads post typed commands and never block on I/O
//! - **Interception before delivery**: filters see inbound traffic on the
//!   I/O thread before the listener does
//! - **Fail once, loudly**: a broken transport reports a single error and is
//!   never reconnected behind the owner's back
//!
//! ## Architecture
//!
//! - [`Channel`]: one socket, framing, the hello handshake, write backpressure
//! - [`IoThread`]: owns all channels and polls them
//! - [`ChannelProxy`]: thread-safe sending, sync requests, filter management
//! - [`MessageFilter`]: I/O-thread handlers, first claim wins
//! - [`Mailbox`]: typed queue for events bound for an owning thread
//!
//! Messages are opaque payloads with a routing id, a namespaced type and
//! out-of-band [`TransferableHandle`]s.

pub mod codec;
pub mod config;
pub mod error;
pub mod handle;
pub mod mailbox;
pub mod message;
pub mod typed;

#[cfg(unix)]
pub mod channel;
#[cfg(unix)]
pub mod filter;
#[cfg(unix)]
pub mod io_thread;
#[cfg(unix)]
pub mod proxy;
#[cfg(unix)]
mod pending;
#[cfg(unix)]
mod transport;

pub use codec::{FrameReader, HEADER_SIZE};
pub use config::{ConfigError, IpcConfig, KERNEL_MAX_DESCRIPTORS};
pub use error::{FrameError, HandleError, IpcError, SyncSendError};
pub use handle::TransferableHandle;
pub use mailbox::{mailbox, Mailbox, MailboxSender};
pub use message::{Message, MessageType, Priority, ReplyToken, IPC_NAMESPACE};
pub use typed::{Hello, TypedMessage};

#[cfg(unix)]
pub use channel::{socket_pair, Channel, ChannelHandle, Listener, Mode, PollSource};
#[cfg(unix)]
pub use filter::MessageFilter;
#[cfg(unix)]
pub use io_thread::{IoHandle, IoThread};
#[cfg(unix)]
pub use proxy::{
    ChannelEvent, ChannelProxy, ChannelProxyBuilder, DispatchThread, EventSink, IoDispatch,
    ProxySender,
};
