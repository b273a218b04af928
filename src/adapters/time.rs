//! Time adapters.
//!
//! - [`Esp32TimeAdapter`] implements [`Clock`] for the polling loops.
//!   On `target_os = "espidf"` it wraps `esp_timer_get_time()` (µs since
//!   boot, monotonic); on the host it uses `std::time::Instant`.
//! - [`ManualClock`] is a clock that only moves when told to, and
//!   [`ManualDelay`] is an `embedded_hal` delay that advances it instead of
//!   sleeping.  Together they make every timeout in the crate testable
//!   without wall-clock waits.
//! - [`StdDelay`] is the host stand-in for `esp_idf_hal::delay::FreeRtos`.

use core::sync::atomic::{AtomicU64, Ordering};

use embedded_hal::delay::DelayNs;

use crate::app::ports::Clock;

/// Monotonic system clock.
pub struct Esp32TimeAdapter {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for Esp32TimeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Esp32TimeAdapter {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }

    /// Microseconds since boot (monotonic).
    #[cfg(target_os = "espidf")]
    pub fn uptime_us(&self) -> u64 {
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64
    }

    /// Microseconds since boot (monotonic).
    #[cfg(not(target_os = "espidf"))]
    pub fn uptime_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Clock for Esp32TimeAdapter {
    fn now_ms(&self) -> u64 {
        self.uptime_us() / 1_000
    }
}

// ── Deterministic clock ──────────────────────────────────────

/// Clock that advances only through [`ManualClock::advance`].
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub const fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::AcqRel);
    }

    pub fn set(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::Acquire)
    }
}

/// Delay that moves a [`ManualClock`] forward instead of sleeping.
pub struct ManualDelay<'a> {
    clock: &'a ManualClock,
    total_ns: u64,
}

impl<'a> ManualDelay<'a> {
    pub fn new(clock: &'a ManualClock) -> Self {
        Self { clock, total_ns: 0 }
    }

    /// Sum of all requested delays, in milliseconds.
    pub fn total_ms(&self) -> u64 {
        self.total_ns / 1_000_000
    }
}

impl DelayNs for ManualDelay<'_> {
    fn delay_ns(&mut self, ns: u32) {
        let before = self.total_ns / 1_000_000;
        self.total_ns += u64::from(ns);
        self.clock.advance(self.total_ns / 1_000_000 - before);
    }
}

// ── Host delay ───────────────────────────────────────────────

/// Blocking delay backed by `std::thread::sleep`.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default, Clone, Copy)]
pub struct StdDelay;

#[cfg(not(target_os = "espidf"))]
impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(core::time::Duration::from_nanos(u64::from(ns)));
    }
}
