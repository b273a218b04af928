//! W5500 Ethernet adapter (SPI).
//!
//! ```text
//!   connect():  SPI bus ─▶ VERSIONR probe ─▶ EthDriver(W5500) ─▶ EspEth ─▶ start
//!   release():  drop subscriptions ─▶ drop EspEth (stops netif, frees SPI + IRQ)
//! ```
//!
//! Every attempt builds the whole driver stack from scratch and `release`
//! tears it down again, so a failed or lost link never leaves the SPI host
//! or the interrupt line claimed.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_idf_svc::eth` with the W5500 chipset.
//! - **all other targets**: simulation with a configurable "module fitted"
//!   switch.

use log::info;
#[cfg(target_os = "espidf")]
use log::warn;

use super::driver_events::LinkEventQueue;
use crate::app::ports::{LinkDriver, LinkError, LinkEvent};
use crate::pins;

#[cfg(target_os = "espidf")]
use esp_idf_svc::{
    eth::{EspEth, EthDriver, EthEvent, SpiEth, SpiEthChipset},
    eventloop::{EspSubscription, EspSystemEventLoop, System},
    hal::{
        gpio::{AnyIOPin, AnyOutputPin},
        spi::{SpiDeviceDriver, SpiDriver, SpiDriverConfig, SPI2, config::Config as SpiConfig},
        units::Hertz,
    },
    netif::IpEvent,
};

/// Common register block, version register.
const W5500_VERSIONR: u16 = 0x0039;
const W5500_VERSION: u8 = 0x04;

/// SPI frame reading one common register: address, control byte
/// (block 0, read, variable length), one dummy data byte.
pub fn versionr_frame() -> [u8; 4] {
    let [hi, lo] = W5500_VERSIONR.to_be_bytes();
    [hi, lo, 0x00, 0x00]
}

/// Validate the reply to [`versionr_frame`].
pub fn check_version(reply: &[u8; 4]) -> Result<(), LinkError> {
    if reply[3] == W5500_VERSION {
        Ok(())
    } else {
        Err(LinkError::WrongChip)
    }
}

#[cfg(target_os = "espidf")]
struct Attempt {
    // Field order is drop order: unsubscribe before the driver goes away.
    _subscriptions: [EspSubscription<'static, System>; 2],
    _eth: Box<EspEth<'static, SpiEth<SpiDriver<'static>>>>,
}

pub struct EthLink {
    events: LinkEventQueue,
    #[cfg(target_os = "espidf")]
    sysloop: EspSystemEventLoop,
    #[cfg(target_os = "espidf")]
    mac: [u8; 6],
    #[cfg(target_os = "espidf")]
    hostname: heapless::String<64>,
    #[cfg(target_os = "espidf")]
    attempt: Option<Attempt>,
    #[cfg(not(target_os = "espidf"))]
    sim_fitted: bool,
}

// ── ESP-IDF ──────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
impl EthLink {
    pub fn new(sysloop: EspSystemEventLoop, mac: [u8; 6], hostname: &str) -> Self {
        Self {
            events: LinkEventQueue::new("Ethernet"),
            sysloop,
            mac,
            hostname: crate::bus::state::bounded(hostname),
            attempt: None,
        }
    }

    fn build(&mut self, p: pins::EthernetPins) -> Result<Attempt, LinkError> {
        let hw = |e| {
            warn!("Ethernet: driver setup failed: {}", e);
            LinkError::HardwareInit
        };

        // SAFETY: the SPI host and these GPIOs belong to this adapter alone,
        // and the previous attempt's drivers were dropped in `release`.
        let spi = unsafe {
            SpiDriver::new(
                SPI2::new(),
                AnyIOPin::new(p.sclk),
                AnyIOPin::new(p.mosi),
                Some(AnyIOPin::new(p.miso)),
                &SpiDriverConfig::new(),
            )
        }
        .map_err(hw)?;

        {
            let cs = unsafe { AnyOutputPin::new(p.cs) };
            let mut probe =
                SpiDeviceDriver::new(&spi, Some(cs), &SpiConfig::new().baudrate(Hertz(1_000_000)))
                    .map_err(hw)?;
            let mut frame = versionr_frame();
            probe.transfer_in_place(&mut frame).map_err(hw)?;
            check_version(&frame).inspect_err(|_| {
                warn!("Ethernet: VERSIONR = {:#04x}, no W5500 fitted", frame[3]);
            })?;
        }

        let driver = EthDriver::new_spi(
            spi,
            unsafe { AnyIOPin::new(p.int) },
            Some(unsafe { AnyOutputPin::new(p.cs) }),
            p.reset.map(|n| unsafe { AnyOutputPin::new(n) }),
            SpiEthChipset::W5500,
            Hertz(pins::ETH_SPI_HZ),
            Some(&self.mac),
            None,
            self.sysloop.clone(),
        )
        .map_err(hw)?;

        let mut eth = Box::new(EspEth::wrap(driver).map_err(hw)?);
        eth.netif_mut().set_hostname(&self.hostname).map_err(hw)?;

        let link_events = self.events.clone();
        let eth_sub = self
            .sysloop
            .subscribe::<EthEvent, _>(move |event| match event {
                EthEvent::Connected(_) => link_events.push(LinkEvent::LinkUp),
                EthEvent::Disconnected(_) => link_events.push(LinkEvent::LinkDown { reason: 0 }),
                _ => {}
            })
            .map_err(hw)?;

        let netif = eth.netif().handle() as usize;
        let ip_events = self.events.clone();
        let ip_sub = self
            .sysloop
            .subscribe::<IpEvent, _>(move |event| {
                if let IpEvent::DhcpIpAssigned(assignment) = event {
                    if assignment.netif_handle() as usize == netif {
                        ip_events.push(LinkEvent::GotAddress(assignment.ip()));
                    }
                }
            })
            .map_err(hw)?;

        eth.start().map_err(|e| {
            warn!("Ethernet: start failed: {}", e);
            LinkError::StartFailed
        })?;

        Ok(Attempt {
            _subscriptions: [eth_sub, ip_sub],
            _eth: eth,
        })
    }
}

#[cfg(target_os = "espidf")]
impl LinkDriver for EthLink {
    fn is_configured(&self) -> bool {
        pins::ETHERNET.is_some()
    }

    fn connect(&mut self) -> Result<(), LinkError> {
        let pins = pins::ETHERNET.ok_or(LinkError::NotConfigured)?;
        let attempt = self.build(pins)?;
        self.attempt = Some(attempt);
        info!("Ethernet: W5500 started, waiting for link");
        Ok(())
    }

    fn release(&mut self) {
        if self.attempt.take().is_some() {
            info!("Ethernet: driver released");
        }
        self.events.clear();
    }

    fn poll_event(&mut self) -> Option<LinkEvent> {
        self.events.pop()
    }
}

// ── Simulation ───────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
impl EthLink {
    /// `fitted` decides whether the simulated W5500 answers the probe.
    pub fn new(fitted: bool, hostname: &str) -> Self {
        info!("Ethernet(sim): {} as {}", if fitted { "fitted" } else { "absent" }, hostname);
        Self {
            events: LinkEventQueue::new("Ethernet"),
            sim_fitted: fitted,
        }
    }
}

#[cfg(not(target_os = "espidf"))]
impl LinkDriver for EthLink {
    fn is_configured(&self) -> bool {
        pins::ETHERNET.is_some()
    }

    fn connect(&mut self) -> Result<(), LinkError> {
        pins::ETHERNET.ok_or(LinkError::NotConfigured)?;
        let reply = if self.sim_fitted {
            [0, 0, 0, W5500_VERSION]
        } else {
            [0xFF; 4]
        };
        check_version(&reply)?;
        self.events.push(LinkEvent::LinkUp);
        self.events
            .push(LinkEvent::GotAddress(core::net::Ipv4Addr::new(10, 0, 0, 50)));
        Ok(())
    }

    fn release(&mut self) {
        self.events.clear();
    }

    fn poll_event(&mut self) -> Option<LinkEvent> {
        self.events.pop()
    }
}
