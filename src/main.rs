//! Attractap Firmware: Main Entry Point
//!
//! Hexagonal architecture: polling components around one shared state bus.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  WifiLink  EthLink   WsClient      Pn532        NvsAdapter     │
//! │  (LinkDriver)        (WsTransport) (NfcReader)  (Config+NVS)   │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │  NetworkInterfaceManager ×2 · WebsocketSession         │    │
//! │  │  ApiProtocolHandler · NfcController                    │    │
//! │  │              ▲            SharedStateBus            ▲  │    │
//! │  └──────────────┴──────────────────────────────────────┴──┘    │
//! │                                                                │
//! │  runtime: one spawn_on_core task per component group           │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{info, warn};

use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{
        delay::FreeRtos,
        gpio::AnyIOPin,
        i2c::{I2cConfig, I2cDriver},
        prelude::Peripherals,
        units::Hertz,
    },
    nvs::EspDefaultNvsPartition,
};

use attractap::adapters::device_id::{self, Interface};
use attractap::adapters::ethernet::EthLink;
use attractap::adapters::nvs::NvsAdapter;
use attractap::adapters::pn532::Pn532;
use attractap::adapters::time::Esp32TimeAdapter;
use attractap::adapters::wifi::WifiLink;
use attractap::adapters::ws_client::WsClient;
use attractap::api::ApiProtocolHandler;
use attractap::app::ports::ConfigPort;
use attractap::bus::SharedStateBus;
use attractap::certs::AdaptiveCertManager;
use attractap::config::{FIRMWARE_NAME, FIRMWARE_VERSION, SystemConfig};
use attractap::error::Error;
use attractap::net::NetworkInterfaceManager;
use attractap::nfc::NfcController;
use attractap::pins;
use attractap::runtime::{self, Ticker};
use attractap::settings::Settings;
use attractap::ws::WebsocketSession;
use rand::rngs::OsRng;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  {} v{}                      ║", FIRMWARE_NAME, FIRMWARE_VERSION);
    info!("╚══════════════════════════════════════╝");

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;

    // ── 2. Persistent state ───────────────────────────────────
    let nvs = NvsAdapter::new().map_err(Error::from)?;
    let config = match nvs.load() {
        Ok(cfg) => {
            info!("Config loaded from NVS");
            cfg
        }
        Err(e) => {
            warn!("NVS config load failed ({}), using defaults", e);
            SystemConfig::default()
        }
    };
    let settings = Arc::new(Settings::load(nvs.clone()));
    let hostname = settings.hostname();
    info!("Device hostname: {}", hostname);

    let bus = Arc::new(SharedStateBus::new());

    // ── 3. Network interfaces ─────────────────────────────────
    let wifi = WifiLink::new(
        peripherals.modem,
        sysloop.clone(),
        EspDefaultNvsPartition::take()?,
        settings.clone(),
        &device_id::interface_hostname(&hostname, Interface::Wifi),
    )?;
    let mut wifi = NetworkInterfaceManager::wifi(wifi, Esp32TimeAdapter::new(), bus.clone(), &config);

    let eth = EthLink::new(
        sysloop,
        device_id::ethernet_mac(&device_id::read_mac()),
        &device_id::interface_hostname(&hostname, Interface::Ethernet),
    );
    let mut eth = NetworkInterfaceManager::ethernet(eth, Esp32TimeAdapter::new(), bus.clone(), &config);

    // ── 4. Backend session ────────────────────────────────────
    let mut session = WebsocketSession::new(
        WsClient::new(Duration::from_millis(u64::from(config.ws_send_timeout_ms))),
        AdaptiveCertManager::new(nvs.clone()),
        settings.clone(),
        Esp32TimeAdapter::new(),
        bus.clone(),
        &config,
    );
    let mut api = ApiProtocolHandler::new(bus.clone(), settings, Esp32TimeAdapter::new(), &config);

    // ── 5. NFC reader ─────────────────────────────────────────
    // SAFETY: GPIOs reserved for the PN532 in `pins`, used nowhere else.
    let (sda, scl) = unsafe {
        (
            AnyIOPin::new(pins::PN532_SDA_GPIO),
            AnyIOPin::new(pins::PN532_SCL_GPIO),
        )
    };
    let i2c = I2cDriver::new(
        peripherals.i2c0,
        sda,
        scl,
        &I2cConfig::new().baudrate(Hertz(pins::PN532_I2C_HZ)),
    )?;
    let mut nfc = NfcController::new(
        Pn532::new(i2c, FreeRtos, OsRng),
        FreeRtos,
        Esp32TimeAdapter::new(),
        bus,
        &config,
    );

    // ── 6. Tasks ──────────────────────────────────────────────
    runtime::spawn_task(
        &runtime::NETWORK_TASK,
        vec![
            Ticker::new("wifi", config.network_tick_ms, move || wifi.tick()),
            Ticker::new("ethernet", config.network_tick_ms, move || eth.tick()),
        ],
    )?;
    runtime::spawn_task(
        &runtime::WEBSOCKET_TASK,
        vec![Ticker::new("websocket", config.websocket_tick_ms, move || session.tick())],
    )?;
    runtime::spawn_task(
        &runtime::API_TASK,
        vec![Ticker::new("api", config.api_tick_ms, move || api.tick())],
    )?;
    runtime::spawn_task(
        &runtime::NFC_TASK,
        vec![Ticker::new("nfc", config.nfc_tick_ms, move || nfc.tick())],
    )?;

    info!("System ready.");
    loop {
        FreeRtos::delay_ms(60_000);
    }
}
