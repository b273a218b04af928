//! Runtime symbols that third-party crates expect the binary to provide.
//!
//! - **critical-section** (ESP-IDF only): `embassy-sync`'s
//!   `CriticalSectionRawMutex` guards every bus snapshot. The
//!   acquire/release symbols are backed by one global `std::sync::Mutex`,
//!   re-entrant per thread through a depth counter. Host tests get the
//!   provider from `critical-section`'s `std` feature.
//! - **embassy-time driver** (all targets): `async_io_mini::Timer`, used by
//!   the bus queue send timeout and the runtime tickers, sleeps on
//!   `embassy-time`. Ticks are microseconds: `esp_timer_get_time` on
//!   target, a process-wide `Instant` on the host. Each wake-up is a short
//!   sleeper thread.

#[cfg(target_os = "espidf")]
use core::cell::{Cell, RefCell};
use core::task::Waker;
use core::time::Duration;
#[cfg(target_os = "espidf")]
use std::sync::{Mutex, MutexGuard, PoisonError};
#[cfg(not(target_os = "espidf"))]
use std::{sync::OnceLock, time::Instant};

#[cfg(target_os = "espidf")]
static CRITICAL_SECTION_MUTEX: Mutex<()> = Mutex::new(());

#[cfg(target_os = "espidf")]
thread_local! {
    static DEPTH: Cell<u8> = const { Cell::new(0) };
    static GUARD: RefCell<Option<MutexGuard<'static, ()>>> = const { RefCell::new(None) };
}

#[cfg(target_os = "espidf")]
#[unsafe(no_mangle)]
pub extern "C" fn _critical_section_1_0_acquire() -> u8 {
    DEPTH.with(|depth| {
        let d = depth.get();
        if d == 0 {
            let lock = CRITICAL_SECTION_MUTEX
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            GUARD.with(|guard| *guard.borrow_mut() = Some(lock));
        }
        let next = d.saturating_add(1);
        depth.set(next);
        next
    })
}

#[cfg(target_os = "espidf")]
#[unsafe(no_mangle)]
pub extern "C" fn _critical_section_1_0_release(_token: u8) {
    DEPTH.with(|depth| {
        let d = depth.get();
        if d == 0 {
            return;
        }
        depth.set(d - 1);
        if d == 1 {
            GUARD.with(|guard| *guard.borrow_mut() = None);
        }
    });
}

// ── embassy-time driver ──────────────────────────────────────

#[cfg(target_os = "espidf")]
#[unsafe(no_mangle)]
pub fn _embassy_time_now() -> u64 {
    // SAFETY: reads the monotonic high-resolution timer, always running.
    unsafe { esp_idf_svc::sys::esp_timer_get_time() as u64 }
}

#[cfg(not(target_os = "espidf"))]
#[unsafe(no_mangle)]
pub fn _embassy_time_now() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_micros() as u64
}

#[unsafe(no_mangle)]
pub fn _embassy_time_schedule_wake(at: u64, waker: &Waker) {
    if at == u64::MAX {
        return;
    }
    let waker = waker.clone();
    std::thread::spawn(move || {
        let now = _embassy_time_now();
        if at > now {
            std::thread::sleep(Duration::from_micros(at - now));
        }
        waker.wake();
    });
}
