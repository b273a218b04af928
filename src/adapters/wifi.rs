//! Wi-Fi station adapter.
//!
//! Implements [`LinkDriver`] for the Wi-Fi [`NetworkInterfaceManager`](crate::net::NetworkInterfaceManager).
//! Credentials are read from [`Settings`] on every attempt, so a change
//! made over the CLI is picked up by the next retry.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_idf_svc::wifi::EspWifi`, with driver
//!   and DHCP events forwarded from the system event loop.
//! - **all other targets**: simulation that associates instantly and hands
//!   out a fixed address.

use std::sync::Arc;
#[cfg(target_os = "espidf")]
use std::sync::atomic::{AtomicBool, Ordering};

use log::info;
#[cfg(target_os = "espidf")]
use log::{debug, warn};

use super::driver_events::LinkEventQueue;
use super::nvs::NvsAdapter;
use crate::app::ports::{LinkDriver, LinkError, LinkEvent};
use crate::bus::state::{MAX_SCAN_RESULTS, bounded};
use crate::bus::{ScanResults, WifiAuth, WifiNetwork};
use crate::settings::Settings;

#[cfg(target_os = "espidf")]
use esp_idf_svc::{
    eventloop::{EspSubscription, EspSystemEventLoop, System},
    hal::modem::Modem,
    ipv4,
    netif::IpEvent,
    nvs::EspDefaultNvsPartition,
    sys::EspError,
    wifi::{AccessPointInfo, AuthMethod, ClientConfiguration, Configuration, EspWifi, WifiEvent},
};

/// Keep the strongest `MAX_SCAN_RESULTS` named networks.
pub fn collect_scan(mut networks: Vec<WifiNetwork>) -> ScanResults {
    networks.retain(|n| !n.ssid.is_empty());
    networks.sort_by(|a, b| b.rssi.cmp(&a.rssi));
    networks.into_iter().take(MAX_SCAN_RESULTS).collect()
}

pub struct WifiLink {
    settings: Arc<Settings<NvsAdapter>>,
    events: LinkEventQueue,
    #[cfg(target_os = "espidf")]
    wifi: EspWifi<'static>,
    /// Set while a disconnect we asked for is on its way back as an event.
    #[cfg(target_os = "espidf")]
    released: Arc<AtomicBool>,
    #[cfg(target_os = "espidf")]
    _subscriptions: [EspSubscription<'static, System>; 2],
    #[cfg(not(target_os = "espidf"))]
    sim_scan: Option<ScanResults>,
}

// ── ESP-IDF ──────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
fn auth_kind(auth: Option<AuthMethod>) -> WifiAuth {
    match auth {
        Some(AuthMethod::None) => WifiAuth::Open,
        Some(AuthMethod::WEP) => WifiAuth::Wep,
        Some(AuthMethod::WPA) => WifiAuth::WpaPersonal,
        Some(AuthMethod::WPA2Personal | AuthMethod::WPAWPA2Personal) => WifiAuth::Wpa2Personal,
        Some(AuthMethod::WPA3Personal | AuthMethod::WPA2WPA3Personal) => WifiAuth::Wpa3Personal,
        Some(AuthMethod::WPA2Enterprise) => WifiAuth::Enterprise,
        _ => WifiAuth::Other,
    }
}

#[cfg(target_os = "espidf")]
fn network_of(ap: &AccessPointInfo) -> WifiNetwork {
    WifiNetwork {
        ssid: bounded(ap.ssid.as_str()),
        rssi: ap.signal_strength,
        auth: auth_kind(ap.auth_method),
        channel: ap.channel,
    }
}

#[cfg(target_os = "espidf")]
impl WifiLink {
    /// Bring up the STA interface (started, not associated) and subscribe
    /// to its events.
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
        settings: Arc<Settings<NvsAdapter>>,
        hostname: &str,
    ) -> Result<Self, EspError> {
        let mut wifi = EspWifi::new(modem, sysloop.clone(), Some(nvs))?;
        wifi.sta_netif_mut().set_hostname(hostname)?;
        wifi.set_configuration(&Configuration::Client(ClientConfiguration::default()))?;
        wifi.start()?;

        let events = LinkEventQueue::new("WiFi");
        let released = Arc::new(AtomicBool::new(false));

        let wifi_events = events.clone();
        let wifi_released = released.clone();
        let wifi_sub = sysloop.subscribe::<WifiEvent, _>(move |event| match event {
            WifiEvent::StaConnected(_) => wifi_events.push(LinkEvent::LinkUp),
            WifiEvent::StaDisconnected(info) => {
                if wifi_released.swap(false, Ordering::AcqRel) {
                    debug!("WiFi: released, reason {}", info.reason());
                } else {
                    wifi_events.push(LinkEvent::LinkDown {
                        reason: info.reason(),
                    });
                }
            }
            WifiEvent::ScanDone(..) => wifi_events.push(LinkEvent::ScanDone),
            _ => {}
        })?;

        // Raw pointers are not Send; the handle is only compared.
        let sta_handle = wifi.sta_netif().handle() as usize;
        let ip_events = events.clone();
        let ip_sub = sysloop.subscribe::<IpEvent, _>(move |event| {
            if let IpEvent::DhcpIpAssigned(assignment) = event {
                if assignment.netif_handle() as usize == sta_handle {
                    let ip: ipv4::Ipv4Addr = assignment.ip();
                    ip_events.push(LinkEvent::GotAddress(ip));
                }
            }
        })?;

        info!("WiFi: station started as {}", hostname);
        Ok(Self {
            settings,
            events,
            wifi,
            released,
            _subscriptions: [wifi_sub, ip_sub],
        })
    }
}

#[cfg(target_os = "espidf")]
impl LinkDriver for WifiLink {
    fn is_configured(&self) -> bool {
        self.settings.network_config().is_configured()
    }

    fn connect(&mut self) -> Result<(), LinkError> {
        let net = self.settings.network_config();
        if !net.is_configured() {
            return Err(LinkError::NotConfigured);
        }
        let auth_method = if net.password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        let client = ClientConfiguration {
            ssid: net
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| LinkError::NotConfigured)?,
            password: net
                .password
                .as_str()
                .try_into()
                .map_err(|_| LinkError::NotConfigured)?,
            auth_method,
            ..Default::default()
        };
        self.wifi
            .set_configuration(&Configuration::Client(client))
            .map_err(|e| {
                warn!("WiFi: configuration rejected: {}", e);
                LinkError::StartFailed
            })?;
        self.wifi.connect().map_err(|e| {
            warn!("WiFi: connect failed: {}", e);
            LinkError::StartFailed
        })
    }

    fn release(&mut self) {
        if !self.wifi.is_connected().unwrap_or(false) {
            return;
        }
        self.released.store(true, Ordering::Release);
        if let Err(e) = self.wifi.disconnect() {
            self.released.store(false, Ordering::Release);
            warn!("WiFi: disconnect failed: {}", e);
        }
    }

    fn poll_event(&mut self) -> Option<LinkEvent> {
        self.events.pop()
    }

    fn network_name(&self) -> heapless::String<32> {
        self.settings.network_config().ssid
    }

    fn start_scan(&mut self) -> Result<(), LinkError> {
        self.wifi
            .start_scan(&Default::default(), false)
            .map_err(|e| {
                warn!("WiFi: scan failed to start: {}", e);
                LinkError::StartFailed
            })
    }

    fn take_scan_results(&mut self) -> Option<ScanResults> {
        match self.wifi.get_scan_result() {
            Ok(aps) => Some(collect_scan(aps.iter().map(network_of).collect())),
            Err(e) => {
                warn!("WiFi: reading scan results failed: {}", e);
                None
            }
        }
    }
}

// ── Simulation ───────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
impl WifiLink {
    pub fn new(settings: Arc<Settings<NvsAdapter>>, hostname: &str) -> Self {
        info!("WiFi(sim): station ready as {}", hostname);
        Self {
            settings,
            events: LinkEventQueue::new("WiFi"),
            sim_scan: None,
        }
    }
}

#[cfg(not(target_os = "espidf"))]
impl LinkDriver for WifiLink {
    fn is_configured(&self) -> bool {
        self.settings.network_config().is_configured()
    }

    fn connect(&mut self) -> Result<(), LinkError> {
        let net = self.settings.network_config();
        if !net.is_configured() {
            return Err(LinkError::NotConfigured);
        }
        info!("WiFi(sim): associated with '{}'", net.ssid);
        self.events.push(LinkEvent::LinkUp);
        self.events
            .push(LinkEvent::GotAddress(core::net::Ipv4Addr::new(192, 168, 4, 20)));
        Ok(())
    }

    fn release(&mut self) {
        self.events.clear();
    }

    fn poll_event(&mut self) -> Option<LinkEvent> {
        self.events.pop()
    }

    fn network_name(&self) -> heapless::String<32> {
        self.settings.network_config().ssid
    }

    fn start_scan(&mut self) -> Result<(), LinkError> {
        let fake = |ssid: &str, rssi: i8, auth: WifiAuth, channel: u8| WifiNetwork {
            ssid: bounded(ssid),
            rssi,
            auth,
            channel,
        };
        self.sim_scan = Some(collect_scan(vec![
            fake("makerspace", -48, WifiAuth::Wpa2Personal, 6),
            fake("", -50, WifiAuth::Open, 1),
            fake("guest", -71, WifiAuth::Open, 11),
        ]));
        self.events.push(LinkEvent::ScanDone);
        Ok(())
    }

    fn take_scan_results(&mut self) -> Option<ScanResults> {
        self.sim_scan.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(ssid: &str, rssi: i8) -> WifiNetwork {
        WifiNetwork {
            ssid: bounded(ssid),
            rssi,
            auth: WifiAuth::Open,
            channel: 1,
        }
    }

    #[test]
    fn scan_drops_hidden_and_sorts() {
        let r = collect_scan(vec![net("weak", -80), net("", -30), net("strong", -40)]);
        let names: Vec<&str> = r.iter().map(|n| n.ssid.as_str()).collect();
        assert_eq!(names, vec!["strong", "weak"]);
    }

    #[test]
    fn scan_is_capped() {
        let many = (0..40).map(|i| net(&format!("n{i}"), -(i as i8))).collect();
        let r = collect_scan(many);
        assert_eq!(r.len(), MAX_SCAN_RESULTS);
        assert_eq!(r[0].ssid.as_str(), "n0");
    }

    #[cfg(not(target_os = "espidf"))]
    #[test]
    fn sim_needs_credentials() {
        let settings = Arc::new(Settings::load(NvsAdapter::new().unwrap()));
        let mut link = WifiLink::new(settings.clone(), "ATTRACTAP-ESP32-1000-wifi");
        assert!(!link.is_configured());
        assert_eq!(link.connect(), Err(LinkError::NotConfigured));

        settings.save_network_config("makerspace", "password1").unwrap();
        assert!(link.is_configured());
        link.connect().unwrap();
        assert_eq!(link.poll_event(), Some(LinkEvent::LinkUp));
        assert!(matches!(link.poll_event(), Some(LinkEvent::GotAddress(_))));
        assert_eq!(link.network_name().as_str(), "makerspace");
    }

    #[cfg(not(target_os = "espidf"))]
    #[test]
    fn sim_scan_round() {
        let settings = Arc::new(Settings::load(NvsAdapter::new().unwrap()));
        let mut link = WifiLink::new(settings, "h");
        link.start_scan().unwrap();
        assert_eq!(link.poll_event(), Some(LinkEvent::ScanDone));
        let r = link.take_scan_results().unwrap();
        assert_eq!(r.len(), 2);
        assert!(link.take_scan_results().is_none());
    }
}
