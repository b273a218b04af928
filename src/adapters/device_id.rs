//! Device identity derived from the ESP32 factory MAC address.
//!
//! - [`ethernet_mac`]: the W5500 has no burned-in address, so it gets the
//!   chip's Ethernet MAC with the locally-administered bit set and the
//!   multicast bit cleared.
//! - [`interface_hostname`]: per-interface DHCP hostname, the device
//!   hostname plus `-wifi` / `-eth`.
//! - [`hostname_suffix`]: the four-digit number in a freshly generated
//!   `ATTRACTAP-<variant>-NNNN` hostname.

use core::fmt::Write;

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

/// Network interface a hostname is generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interface {
    Wifi,
    Ethernet,
}

impl Interface {
    fn suffix(self) -> &'static str {
        match self {
            Self::Wifi => "-wifi",
            Self::Ethernet => "-eth",
        }
    }
}

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

/// Locally administered unicast variant of `base`.
pub fn ethernet_mac(base: &MacAddress) -> MacAddress {
    let mut mac = *base;
    mac[0] = (mac[0] & 0xFC) | 0x02;
    mac
}

/// DHCP hostname for one interface, cut to fit.
pub fn interface_hostname(hostname: &str, iface: Interface) -> heapless::String<64> {
    let suffix = iface.suffix();
    let mut name = crate::bus::state::bounded::<64>(hostname);
    while name.len() + suffix.len() > name.capacity() {
        name.pop();
    }
    let _ = name.push_str(suffix);
    name
}

/// Random number in `1000..=9999` for generated hostnames.
#[cfg(target_os = "espidf")]
pub fn hostname_suffix() -> u16 {
    let r = unsafe { esp_idf_svc::sys::esp_random() };
    1000 + (r % 9000) as u16
}

/// Simulation: derived from the fake MAC so runs are reproducible.
#[cfg(not(target_os = "espidf"))]
pub fn hostname_suffix() -> u16 {
    let mac = read_mac();
    1000 + (u16::from_be_bytes([mac[4], mac[5]]) % 9000)
}

/// `ATTRACTAP-<VARIANT>-NNNN`
pub fn generate_hostname(variant: &str, suffix: u16) -> heapless::String<64> {
    let mut name = heapless::String::new();
    let _ = write!(name, "ATTRACTAP-{}-{}", variant.to_ascii_uppercase(), suffix);
    name
}
