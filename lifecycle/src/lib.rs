//! # Lifecycle
//!
//! Cancellation and timeout primitives shared by the I/O thread, the owning
//! thread and worker threads.
//!
//! ## Philosophy
//!
//! - **Explicit over implicit**: Cancellation is explicit, not hidden
//! - **Thread-safe**: Tokens cross threads; deferred work checks them before acting
//! - **Mechanism not policy**: Provides primitives, hosts decide policies
//!
//! ## Core Concepts
//!
//! - `CancellationToken`: Cloneable handle to check cancellation status
//! - `CancellationSource`: Controller that can trigger cancellation
//! - `CancellationReason`: Why cancellation occurred
//! - `Deadline`: Point in time when operation should timeout
//! - `Timeout`: Duration-based timeout

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Reason for cancellation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancellationReason {
    /// The channel the work belongs to was closed
    ChannelClosed,
    /// The owner went away without closing first
    OwnerDropped,
}

impl fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancellationReason::ChannelClosed => write!(f, "channel closed"),
            CancellationReason::OwnerDropped => write!(f, "owner dropped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CancellationState {
    Active,
    Cancelled(CancellationReason),
}

/// Shared state between CancellationToken and CancellationSource
#[derive(Debug, Clone)]
struct SharedCancellationState {
    state: Arc<Mutex<CancellationState>>,
}

impl SharedCancellationState {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(CancellationState::Active)),
        }
    }

    fn is_cancelled(&self) -> bool {
        matches!(*self.state.lock(), CancellationState::Cancelled(_))
    }

    fn reason(&self) -> Option<CancellationReason> {
        match &*self.state.lock() {
            CancellationState::Active => None,
            CancellationState::Cancelled(reason) => Some(reason.clone()),
        }
    }

    /// First cancellation wins; later reasons are ignored.
    fn cancel(&self, reason: CancellationReason) -> bool {
        let mut state = self.state.lock();
        if matches!(*state, CancellationState::Cancelled(_)) {
            return false;
        }
        *state = CancellationState::Cancelled(reason);
        true
    }
}

/// A cloneable token that can be checked for cancellation
///
/// Tokens are `Send + Sync`; a worker thread holding one can find out that
/// the channel or host it would reply to has gone away.
///
/// ## Example
///
/// ```
/// use lifecycle::{CancellationSource, CancellationReason};
///
/// let source = CancellationSource::new();
/// let token = source.token();
///
/// assert!(!token.is_cancelled());
///
/// source.cancel(CancellationReason::ChannelClosed);
/// assert!(token.is_cancelled());
/// assert_eq!(token.reason(), Some(CancellationReason::ChannelClosed));
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    shared: SharedCancellationState,
}

impl CancellationToken {
    /// Checks if cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Returns the reason for cancellation, if cancelled
    pub fn reason(&self) -> Option<CancellationReason> {
        self.shared.reason()
    }
}

/// A controller that can trigger cancellation
#[derive(Debug, Clone)]
pub struct CancellationSource {
    shared: SharedCancellationState,
}

impl CancellationSource {
    pub fn new() -> Self {
        Self {
            shared: SharedCancellationState::new(),
        }
    }

    /// Creates a token from this source
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            shared: self.shared.clone(),
        }
    }

    /// Cancels all tokens from this source
    ///
    /// Returns `false` if the source was already cancelled.
    pub fn cancel(&self, reason: CancellationReason) -> bool {
        self.shared.cancel(reason)
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

/// A deadline represents a point in time when an operation should timeout
///
/// Deadlines are absolute times, making them suitable for passing through
/// multiple layers without duration confusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    instant: Instant,
}

impl Deadline {
    pub fn at(instant: Instant) -> Self {
        Self { instant }
    }

    pub fn instant(&self) -> Instant {
        self.instant
    }

    pub fn has_passed(&self, now: Instant) -> bool {
        now >= self.instant
    }

    /// Returns time remaining until deadline
    ///
    /// Returns None if deadline has passed.
    pub fn time_remaining(&self, now: Instant) -> Option<Duration> {
        if now < self.instant {
            Some(self.instant.duration_since(now))
        } else {
            None
        }
    }
}

/// Timeout specifies a duration-based timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    duration: Duration,
}

impl Timeout {
    pub fn after(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::after(Duration::from_millis(millis))
    }

    pub fn from_secs(secs: u64) -> Self {
        Self::after(Duration::from_secs(secs))
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Converts this timeout to a deadline starting at `now`
    pub fn to_deadline(&self, now: Instant) -> Deadline {
        Deadline::at(now + self.duration)
    }

    /// Converts this timeout to a deadline starting at the current instant
    pub fn start(&self) -> Deadline {
        self.to_deadline(Instant::now())
    }
}
