//! Connection state machine shared by the Wi-Fi and Ethernet interfaces.
//!
//! ```text
//!            ┌──────────── retry policy ─────────────┐
//!            ▼                                        │
//!  Init ─▶ Connecting ─LinkUp─▶ ConnectedWaitingForAddress ─GotAddress─▶ Connected
//!            │                        │ DHCP timeout                       │
//!            │ connect err / timeout  ▼                                    │ LinkDown
//!            └──────▶ ConnectFailed   Disconnected ◀───────────────────────┘
//! ```
//!
//! The manager owns its [`LinkDriver`] exclusively.  Every state change is
//! published to the bus (`connected` is true only in `Connected`).

use core::net::Ipv4Addr;
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::app::ports::{Clock, LinkDriver, LinkEvent};
use crate::bus::SharedStateBus;
use crate::config::SystemConfig;

use super::policy::{ExponentialBackoff, FixedInterval};
use super::reason::disconnect_reason_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceKind {
    Wifi,
    Ethernet,
}

impl InterfaceKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Wifi => "WiFi",
            Self::Ethernet => "Ethernet",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetState {
    Init,
    Connecting,
    ConnectedWaitingForAddress,
    Connected,
    Disconnected,
    ConnectFailed,
}

enum Policy {
    Wifi(FixedInterval),
    Ethernet {
        backoff: ExponentialBackoff,
        /// `connect()` succeeded; waiting for link events, not retrying.
        in_progress: bool,
    },
}

pub struct NetworkInterfaceManager<D: LinkDriver, C: Clock> {
    kind: InterfaceKind,
    driver: D,
    clock: C,
    bus: Arc<SharedStateBus>,
    state: NetState,
    policy: Policy,
    dhcp_timeout_ms: u64,
    link_up_ms: u64,
    address: Option<Ipv4Addr>,
    unconfigured_logged: bool,
}

impl<D: LinkDriver, C: Clock> NetworkInterfaceManager<D, C> {
    /// Wi-Fi station: fixed retry interval, never gives up.
    pub fn wifi(driver: D, clock: C, bus: Arc<SharedStateBus>, cfg: &SystemConfig) -> Self {
        Self::new(
            InterfaceKind::Wifi,
            driver,
            clock,
            bus,
            Policy::Wifi(FixedInterval::from_config(cfg)),
            cfg,
        )
    }

    /// Wired Ethernet: exponential backoff with a cool-down.
    pub fn ethernet(driver: D, clock: C, bus: Arc<SharedStateBus>, cfg: &SystemConfig) -> Self {
        Self::new(
            InterfaceKind::Ethernet,
            driver,
            clock,
            bus,
            Policy::Ethernet {
                backoff: ExponentialBackoff::from_config(cfg),
                in_progress: false,
            },
            cfg,
        )
    }

    fn new(
        kind: InterfaceKind,
        driver: D,
        clock: C,
        bus: Arc<SharedStateBus>,
        policy: Policy,
        cfg: &SystemConfig,
    ) -> Self {
        Self {
            kind,
            driver,
            clock,
            bus,
            state: NetState::Init,
            policy,
            dhcp_timeout_ms: u64::from(cfg.eth_dhcp_timeout_ms),
            link_up_ms: 0,
            address: None,
            unconfigured_logged: false,
        }
    }

    pub fn kind(&self) -> InterfaceKind {
        self.kind
    }

    pub fn state(&self) -> NetState {
        self.state
    }

    pub fn address(&self) -> Option<Ipv4Addr> {
        self.address
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// One polling step: drain driver events, then advance the state machine.
    pub fn tick(&mut self) {
        while let Some(event) = self.driver.poll_event() {
            self.on_event(event);
        }

        if self.kind == InterfaceKind::Wifi && self.bus.take_scan_request() {
            match self.driver.start_scan() {
                Ok(()) => info!("WiFi: scan started"),
                Err(e) => warn!("WiFi: scan not started: {}", e),
            }
        }

        let now = self.clock.now_ms();
        if matches!(self.policy, Policy::Wifi(_)) {
            self.tick_wifi(now);
        } else {
            self.tick_ethernet(now);
        }
    }

    fn tick_wifi(&mut self, now: u64) {
        let Policy::Wifi(policy) = &mut self.policy else {
            return;
        };

        match self.state {
            NetState::Init | NetState::Disconnected | NetState::ConnectFailed => {
                if !self.driver.is_configured() {
                    if !self.unconfigured_logged {
                        info!("WiFi: no saved credentials");
                        self.unconfigured_logged = true;
                    }
                    return;
                }
                self.unconfigured_logged = false;
                if !policy.due(now) {
                    return;
                }
                policy.record_attempt(now);
                let attempt = policy.attempts();

                info!(
                    "WiFi: connect attempt #{} to '{}'",
                    attempt,
                    self.driver.network_name()
                );
                self.release_link();
                match self.driver.connect() {
                    Ok(()) => self.set_state(NetState::Connecting),
                    Err(e) => {
                        error!("WiFi: failed to start connection: {}", e);
                        self.set_state(NetState::ConnectFailed);
                    }
                }
            }
            NetState::Connecting | NetState::ConnectedWaitingForAddress => {
                if policy.timed_out(now) {
                    warn!("WiFi: connection timeout, stopping attempt");
                    self.release_link();
                    self.set_state(NetState::ConnectFailed);
                } else {
                    self.check_dhcp_timeout(now);
                }
            }
            NetState::Connected => {}
        }
    }

    fn tick_ethernet(&mut self, now: u64) {
        let Policy::Ethernet {
            backoff,
            in_progress,
        } = &mut self.policy
        else {
            return;
        };

        match self.state {
            NetState::Init => {
                if !self.driver.is_configured() {
                    if !self.unconfigured_logged {
                        info!("Ethernet: hardware not configured, skipping");
                        self.unconfigured_logged = true;
                    }
                    return;
                }
                self.set_state(NetState::Connecting);
            }
            NetState::Connecting => {
                if backoff.exhausted() {
                    error!(
                        "Ethernet: maximum retry count ({}) reached, cooling down",
                        backoff.max_retries()
                    );
                    *in_progress = false;
                    self.set_state(NetState::ConnectFailed);
                    return;
                }
                if *in_progress || !backoff.due(now) {
                    return;
                }

                info!(
                    "Ethernet: connection attempt {}/{}",
                    backoff.retries() + 1,
                    backoff.max_retries()
                );
                self.driver.release();
                match self.driver.connect() {
                    Ok(()) => {
                        backoff.reset();
                        *in_progress = true;
                        info!("Ethernet: driver started, waiting for link");
                    }
                    Err(e) => {
                        error!(
                            "Ethernet: initialisation failed ({}), attempt {}/{}",
                            e,
                            backoff.retries() + 1,
                            backoff.max_retries()
                        );
                        backoff.record_failure(now);
                    }
                }
            }
            NetState::ConnectedWaitingForAddress => self.check_dhcp_timeout(now),
            NetState::Disconnected => {
                *in_progress = false;
                info!("Ethernet: disconnected, reconnecting");
                self.set_state(NetState::Connecting);
            }
            NetState::ConnectFailed => {
                if backoff.cooldown_over(now) {
                    info!("Ethernet: cool-down over, retrying");
                    backoff.reset();
                    *in_progress = false;
                    self.set_state(NetState::Connecting);
                }
            }
            NetState::Connected => {}
        }
    }

    /// Release the driver and drop the link events it reported up to now,
    /// including any caused by the release itself. Scan results are kept.
    fn release_link(&mut self) {
        self.driver.release();
        while let Some(event) = self.driver.poll_event() {
            if matches!(event, LinkEvent::ScanDone) {
                self.on_event(event);
            } else {
                debug!("{}: dropping {:?} from released link", self.kind.label(), event);
            }
        }
    }

    fn check_dhcp_timeout(&mut self, now: u64) {
        if self.state == NetState::ConnectedWaitingForAddress
            && now.saturating_sub(self.link_up_ms) > self.dhcp_timeout_ms
        {
            error!(
                "{}: DHCP timeout after {} ms",
                self.kind.label(),
                self.dhcp_timeout_ms
            );
            self.set_state(NetState::Disconnected);
        }
    }

    fn on_event(&mut self, event: LinkEvent) {
        let label = self.kind.label();
        match event {
            LinkEvent::LinkUp => {
                info!("{}: link up, waiting for address", label);
                self.link_up_ms = self.clock.now_ms();
                self.clear_attempts();
                if self.state != NetState::Connected {
                    self.set_state(NetState::ConnectedWaitingForAddress);
                }
            }
            LinkEvent::LinkDown { reason } => {
                if self.kind == InterfaceKind::Wifi {
                    info!(
                        "WiFi: disconnected, reason {} ({})",
                        reason,
                        disconnect_reason_name(reason)
                    );
                } else {
                    info!("Ethernet: link down");
                }
                if let Policy::Ethernet { in_progress, .. } = &mut self.policy {
                    *in_progress = false;
                }
                self.address = None;
                self.set_state(NetState::Disconnected);
            }
            LinkEvent::GotAddress(ip) => {
                info!("{}: got address {}", label, ip);
                self.address = Some(ip);
                self.clear_attempts();
                if self.state == NetState::Connected {
                    self.publish();
                } else {
                    self.set_state(NetState::Connected);
                }
            }
            LinkEvent::ScanDone => match self.driver.take_scan_results() {
                Some(results) => {
                    info!("{}: scan complete, {} networks", label, results.len());
                    self.bus.set_scan_results(results);
                }
                None => warn!("{}: scan finished without results", label),
            },
        }
    }

    fn clear_attempts(&mut self) {
        match &mut self.policy {
            Policy::Wifi(p) => p.reset(),
            Policy::Ethernet { in_progress, .. } => *in_progress = false,
        }
    }

    fn set_state(&mut self, next: NetState) {
        if next == self.state {
            return;
        }
        info!("{}: {:?} -> {:?}", self.kind.label(), self.state, next);
        self.state = next;
        if next != NetState::Connected {
            self.address = None;
        }
        self.publish();
    }

    fn publish(&self) {
        let connected = self.state == NetState::Connected;
        let address = if connected { self.address } else { None };
        match self.kind {
            InterfaceKind::Wifi => {
                self.bus
                    .set_wifi_state(connected, address, &self.driver.network_name());
            }
            InterfaceKind::Ethernet => self.bus.set_ethernet_state(connected, address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::time::ManualClock;
    use crate::app::ports::LinkError;
    use crate::bus::state::{ScanResults, WifiAuth, WifiNetwork, bounded};
    use std::collections::VecDeque;

    #[derive(Default)]
    struct FakeLink {
        configured: bool,
        fail_connects: u32,
        connects: u32,
        releases: u32,
        /// Report a disconnect for every release, as the ESP-IDF station does.
        down_on_release: bool,
        events: VecDeque<LinkEvent>,
        scan: Option<ScanResults>,
    }

    impl LinkDriver for FakeLink {
        fn is_configured(&self) -> bool {
            self.configured
        }
        fn connect(&mut self) -> Result<(), LinkError> {
            self.connects += 1;
            if self.fail_connects > 0 {
                self.fail_connects -= 1;
                return Err(LinkError::StartFailed);
            }
            Ok(())
        }
        fn release(&mut self) {
            self.releases += 1;
            if self.down_on_release {
                self.events.push_back(LinkEvent::LinkDown { reason: 8 });
            }
        }
        fn poll_event(&mut self) -> Option<LinkEvent> {
            self.events.pop_front()
        }
        fn network_name(&self) -> heapless::String<32> {
            crate::bus::state::bounded("lab")
        }
        fn start_scan(&mut self) -> Result<(), LinkError> {
            self.events.push_back(LinkEvent::ScanDone);
            Ok(())
        }
        fn take_scan_results(&mut self) -> Option<ScanResults> {
            self.scan.take()
        }
    }

    fn link(configured: bool) -> FakeLink {
        FakeLink {
            configured,
            ..Default::default()
        }
    }

    fn bus() -> Arc<SharedStateBus> {
        Arc::new(SharedStateBus::new())
    }

    #[test]
    fn wifi_waits_for_credentials() {
        let clock = ManualClock::new(0);
        let mut m = NetworkInterfaceManager::wifi(link(false), &clock, bus(), &SystemConfig::default());
        m.tick();
        clock.advance(60_000);
        m.tick();
        assert_eq!(m.state(), NetState::Init);
        assert_eq!(m.driver().connects, 0);
    }

    #[test]
    fn wifi_full_connect_publishes() {
        let clock = ManualClock::new(0);
        let b = bus();
        let mut m = NetworkInterfaceManager::wifi(link(true), &clock, b.clone(), &SystemConfig::default());
        m.tick();
        assert_eq!(m.state(), NetState::Connecting);

        m.driver_mut().events.push_back(LinkEvent::LinkUp);
        m.tick();
        assert_eq!(m.state(), NetState::ConnectedWaitingForAddress);
        assert!(!b.connectivity().wifi_connected);

        let ip = Ipv4Addr::new(192, 168, 4, 20);
        m.driver_mut().events.push_back(LinkEvent::GotAddress(ip));
        m.tick();
        assert_eq!(m.state(), NetState::Connected);
        let c = b.connectivity();
        assert!(c.wifi_connected);
        assert_eq!(c.wifi_address, Some(ip));
        assert_eq!(c.wifi_ssid.as_str(), "lab");
    }

    #[test]
    fn finished_scan_is_stored_on_the_bus() {
        let clock = ManualClock::new(0);
        let b = bus();
        let mut results = ScanResults::new();
        let _ = results.push(WifiNetwork {
            ssid: bounded("makerspace"),
            rssi: -48,
            auth: WifiAuth::Wpa2Personal,
            channel: 6,
        });
        let mut fake = link(false);
        fake.scan = Some(results);
        let mut m = NetworkInterfaceManager::wifi(fake, &clock, b.clone(), &SystemConfig::default());

        b.request_wifi_scan();
        m.tick();
        assert!(b.scan_results().is_empty());

        let before = b.generation().current();
        m.tick();
        let stored = b.scan_results();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].ssid.as_str(), "makerspace");
        assert!(b.generation().current() > before);
    }

    #[test]
    fn wifi_connect_timeout_then_fixed_retry() {
        let clock = ManualClock::new(0);
        let mut m = NetworkInterfaceManager::wifi(link(true), &clock, bus(), &SystemConfig::default());
        m.tick();
        assert_eq!(m.driver().connects, 1);

        clock.advance(15_001);
        m.tick();
        assert_eq!(m.state(), NetState::ConnectFailed);
        assert_eq!(m.driver().connects, 1);
        assert_eq!(m.driver().releases, 2, "released before connect and on timeout");

        // Retry interval (10 s from the first attempt) has long passed.
        m.tick();
        assert_eq!(m.state(), NetState::Connecting);
        assert_eq!(m.driver().connects, 2);
    }

    #[test]
    fn wifi_link_down_goes_disconnected_then_retries() {
        let clock = ManualClock::new(0);
        let b = bus();
        let mut m = NetworkInterfaceManager::wifi(link(true), &clock, b.clone(), &SystemConfig::default());
        m.tick();
        m.driver_mut().events.push_back(LinkEvent::LinkUp);
        m.driver_mut()
            .events
            .push_back(LinkEvent::GotAddress(Ipv4Addr::new(10, 0, 0, 9)));
        m.tick();
        assert!(b.connectivity().wifi_connected);

        m.driver_mut().events.push_back(LinkEvent::LinkDown { reason: 201 });
        clock.advance(1_000);
        m.tick();
        assert_eq!(m.state(), NetState::Disconnected);
        assert!(!b.connectivity().wifi_connected);
        assert_eq!(m.address(), None);

        clock.advance(9_000);
        m.tick();
        assert_eq!(m.state(), NetState::Connecting);
    }

    #[test]
    fn own_release_does_not_abort_the_attempt() {
        let clock = ManualClock::new(0);
        let mut driver = link(true);
        driver.down_on_release = true;
        let mut m = NetworkInterfaceManager::wifi(driver, &clock, bus(), &SystemConfig::default());

        m.tick();
        assert_eq!(m.state(), NetState::Connecting);
        clock.advance(5_000);
        m.tick();
        assert_eq!(m.state(), NetState::Connecting, "still inside the connect timeout");
        assert_eq!(m.driver().connects, 1);

        m.driver_mut().events.push_back(LinkEvent::LinkUp);
        m.driver_mut()
            .events
            .push_back(LinkEvent::GotAddress(Ipv4Addr::new(10, 0, 0, 7)));
        m.tick();
        assert_eq!(m.state(), NetState::Connected);
    }

    #[test]
    fn ethernet_skips_without_hardware() {
        let clock = ManualClock::new(0);
        let mut m = NetworkInterfaceManager::ethernet(link(false), &clock, bus(), &SystemConfig::default());
        for _ in 0..5 {
            m.tick();
        }
        assert_eq!(m.state(), NetState::Init);
    }

    #[test]
    fn ethernet_backoff_then_cooldown() {
        let clock = ManualClock::new(0);
        let mut driver = link(true);
        driver.fail_connects = u32::MAX;
        let mut m = NetworkInterfaceManager::ethernet(driver, &clock, bus(), &SystemConfig::default());

        m.tick(); // Init -> Connecting
        m.tick(); // attempt 1, immediate
        assert_eq!(m.driver().connects, 1);
        m.tick();
        assert_eq!(m.driver().connects, 1, "waits 2 s before attempt 2");

        for delay in [2_000, 4_000, 8_000, 16_000] {
            clock.advance(delay);
            m.tick();
        }
        assert_eq!(m.driver().connects, 5);
        assert_eq!(m.driver().releases, 5, "every attempt releases first");

        m.tick();
        assert_eq!(m.state(), NetState::ConnectFailed);

        clock.advance(10_001);
        m.tick();
        assert_eq!(m.state(), NetState::Connecting);
        m.tick();
        assert_eq!(m.driver().connects, 6);
    }

    #[test]
    fn ethernet_does_not_reinit_while_waiting_for_link() {
        let clock = ManualClock::new(0);
        let mut m = NetworkInterfaceManager::ethernet(link(true), &clock, bus(), &SystemConfig::default());
        m.tick();
        m.tick();
        clock.advance(60_000);
        m.tick();
        assert_eq!(m.driver().connects, 1);
        assert_eq!(m.state(), NetState::Connecting);
    }
}
