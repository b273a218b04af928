//! Reconnect policies for the two network interfaces.
//!
//! | Interface | Policy                 | Gives up?                          |
//! |-----------|------------------------|------------------------------------|
//! | Wi-Fi     | [`FixedInterval`]      | never; one attempt per interval    |
//! | Ethernet  | [`ExponentialBackoff`] | after `max_retries`, then cool-down|
//!
//! Both are plain bookkeeping over a millisecond clock value passed in by
//! the caller; they never sleep.

use crate::config::SystemConfig;

/// One attempt every `interval_ms`; an attempt older than
/// `connect_timeout_ms` that has not produced an address is abandoned.
#[derive(Debug, Clone)]
pub struct FixedInterval {
    interval_ms: u64,
    connect_timeout_ms: u64,
    attempts: u32,
    last_attempt_ms: Option<u64>,
}

impl FixedInterval {
    pub fn new(interval_ms: u32, connect_timeout_ms: u32) -> Self {
        Self {
            interval_ms: u64::from(interval_ms),
            connect_timeout_ms: u64::from(connect_timeout_ms),
            attempts: 0,
            last_attempt_ms: None,
        }
    }

    pub fn from_config(cfg: &SystemConfig) -> Self {
        Self::new(cfg.wifi_retry_interval_ms, cfg.wifi_connect_timeout_ms)
    }

    /// The first attempt is always due; later ones once the interval passed.
    pub fn due(&self, now_ms: u64) -> bool {
        self.last_attempt_ms
            .is_none_or(|t| now_ms.saturating_sub(t) >= self.interval_ms)
    }

    pub fn record_attempt(&mut self, now_ms: u64) {
        self.attempts += 1;
        self.last_attempt_ms = Some(now_ms);
    }

    /// Current attempt has run longer than the connect timeout.
    pub fn timed_out(&self, now_ms: u64) -> bool {
        self.last_attempt_ms
            .is_some_and(|t| now_ms.saturating_sub(t) > self.connect_timeout_ms)
    }

    /// Link established: the attempt counter starts over.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// `base * 2^retry` between attempts (none before the first), at most
/// `max_retries` failures, then a cool-down before a new round.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_ms: u64,
    max_retries: u8,
    cooldown_ms: u64,
    retries: u8,
    last_failure_ms: u64,
}

impl ExponentialBackoff {
    pub fn new(base_ms: u32, max_retries: u8, cooldown_ms: u32) -> Self {
        Self {
            base_ms: u64::from(base_ms),
            max_retries,
            cooldown_ms: u64::from(cooldown_ms),
            retries: 0,
            last_failure_ms: 0,
        }
    }

    pub fn from_config(cfg: &SystemConfig) -> Self {
        Self::new(
            cfg.eth_base_retry_delay_ms,
            cfg.eth_max_retries,
            cfg.eth_cooldown_ms(),
        )
    }

    /// Wait required before the next attempt.
    pub fn delay_ms(&self) -> u64 {
        if self.retries == 0 {
            0
        } else {
            self.base_ms.saturating_mul(1 << u32::from(self.retries.min(16)))
        }
    }

    pub fn due(&self, now_ms: u64) -> bool {
        self.retries == 0 || now_ms.saturating_sub(self.last_failure_ms) >= self.delay_ms()
    }

    pub fn record_failure(&mut self, now_ms: u64) {
        self.retries = self.retries.saturating_add(1);
        self.last_failure_ms = now_ms;
    }

    pub fn exhausted(&self) -> bool {
        self.retries >= self.max_retries
    }

    /// After exhaustion: has the cool-down elapsed?
    pub fn cooldown_over(&self, now_ms: u64) -> bool {
        self.retries == 0 || now_ms.saturating_sub(self.last_failure_ms) > self.cooldown_ms
    }

    pub fn reset(&mut self) {
        self.retries = 0;
    }

    pub fn retries(&self) -> u8 {
        self.retries
    }

    pub fn max_retries(&self) -> u8 {
        self.max_retries
    }
}
