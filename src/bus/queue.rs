//! Bounded FIFO hand-off queues.
//!
//! Thin wrapper over an `embassy-sync` channel that adds the bus's send
//! contract: a producer waits at most its queue's `send_timeout` for room,
//! then the item is dropped and the drop is logged.  Receiving never
//! waits.
//!
//! ```text
//!  producer ──try_send()──▶ [ N slots ] ──try_receive()──▶ single consumer
//!              │ full?
//!              └─ wait ≤ send_timeout (reactor timer) ─▶ drop + warn!
//! ```

use core::fmt;
use core::time::Duration;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use futures_lite::FutureExt;
use log::warn;

/// Errors from bus queue operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Still full after the send timeout; the item was dropped.
    Timeout,
    /// Full and the queue has no send timeout; the item was dropped.
    Full,
    /// A previous NFC command has not finished yet.
    Busy,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "queue full after send timeout"),
            Self::Full => write!(f, "queue full"),
            Self::Busy => write!(f, "previous command still outstanding"),
        }
    }
}

/// Bounded FIFO with a per-queue send timeout.
pub struct BoundedQueue<T, const N: usize> {
    name: &'static str,
    send_timeout: Duration,
    channel: Channel<CriticalSectionRawMutex, T, N>,
}

impl<T, const N: usize> BoundedQueue<T, N> {
    pub const fn new(name: &'static str, send_timeout: Duration) -> Self {
        Self {
            name,
            send_timeout,
            channel: Channel::new(),
        }
    }

    /// Enqueue `item`, waiting up to the send timeout for a free slot.
    pub fn try_send(&self, item: T) -> Result<(), QueueError> {
        let item = match self.channel.try_send(item) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(item)) => item,
        };

        if self.send_timeout.is_zero() {
            warn!("{}: queue full, dropping item", self.name);
            return Err(QueueError::Full);
        }

        let timeout = self.send_timeout;
        let sent = futures_lite::future::block_on(
            async {
                self.channel.send(item).await;
                true
            }
            .or(async {
                async_io_mini::Timer::after(timeout).await;
                false
            }),
        );

        if sent {
            Ok(())
        } else {
            warn!(
                "{}: queue still full after {}ms, dropping item",
                self.name,
                timeout.as_millis()
            );
            Err(QueueError::Timeout)
        }
    }

    /// Dequeue the oldest item without waiting.
    pub fn try_receive(&self) -> Option<T> {
        self.channel.try_receive().ok()
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}
