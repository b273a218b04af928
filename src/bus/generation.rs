//! Generation counter + watcher: the bus's only change signal.
//!
//! Every bus mutation bumps one shared counter.  A polling loop keeps a
//! [`ChangeWatcher`] and asks it once per tick whether *anything*
//! changed since it last looked; if so it re-reads the snapshots it
//! cares about.  There are no callbacks and no per-field dirty flags.
//!
//! ```text
//!  writer ──set_*()──▶ Generation::bump()      (n → n+1)
//!  reader ──tick────▶ watcher.changed(&gen)   (seen n? → true once)
//! ```

use core::sync::atomic::{AtomicU32, Ordering};

/// Monotonic (wrapping) change counter.
#[derive(Debug, Default)]
pub struct Generation(AtomicU32);

impl Generation {
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Record a mutation and return the new generation.
    pub fn bump(&self) -> u32 {
        self.0.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    pub fn current(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }
}

/// A reader's last-observed generation.
///
/// A fresh watcher reports a change on its first poll so that components
/// always take an initial snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ChangeWatcher {
    seen: Option<u32>,
}

impl ChangeWatcher {
    pub const fn new() -> Self {
        Self { seen: None }
    }

    /// `true` if the generation moved since the previous call.
    pub fn changed(&mut self, generation: &Generation) -> bool {
        let now = generation.current();
        if self.seen == Some(now) {
            return false;
        }
        self.seen = Some(now);
        true
    }
}

impl Default for ChangeWatcher {
    fn default() -> Self {
        Self::new()
    }
}
