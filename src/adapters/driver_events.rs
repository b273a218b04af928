//! Hand-off of driver callbacks into the polling components.
//!
//! ESP-IDF delivers Wi-Fi, Ethernet, IP and websocket events on its own
//! tasks.  The callbacks only push into a small [`EventQueue`]; the owning
//! component drains it through the port's `poll_event`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::warn;

use crate::app::ports::{LinkEvent, WsEvent};

/// Queue shared by a network interface driver and its manager.
pub type LinkEventQueue = EventQueue<LinkEvent, 8>;

/// Queue shared by the websocket client callback and the session.
pub type WsEventQueue = EventQueue<WsEvent, 16>;

pub struct EventQueue<T, const N: usize> {
    label: &'static str,
    inner: Arc<Mutex<heapless::Deque<T, N>>>,
}

// Derived Clone would require `T: Clone`.
impl<T, const N: usize> Clone for EventQueue<T, N> {
    fn clone(&self) -> Self {
        Self {
            label: self.label,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: core::fmt::Debug, const N: usize> EventQueue<T, N> {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            inner: Arc::new(Mutex::new(heapless::Deque::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, heapless::Deque<T, N>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Newest events win: when full, the oldest one is discarded.
    pub fn push(&self, event: T) {
        let mut q = self.lock();
        if q.is_full() {
            warn!("{}: event queue full, dropping {:?}", self.label, q.front());
            let _ = q.pop_front();
        }
        let _ = q.push_back(event);
    }

    pub fn pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Forget events from a driver instance that no longer exists.
    pub fn clear(&self) {
        self.lock().clear();
    }
}
