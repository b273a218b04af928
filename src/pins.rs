//! GPIO / peripheral pin assignments for the Attractap reader board.
//!
//! Single source of truth: every adapter takes its pins from here.
//! Optional peripherals are `Option`s; `None` means "not fitted on this
//! board" and the matching subsystem stays idle.

// ---------------------------------------------------------------------------
// W5500 Ethernet (SPI)
// ---------------------------------------------------------------------------

/// Wiring of the W5500 module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetPins {
    pub sclk: i32,
    pub mosi: i32,
    pub miso: i32,
    pub cs: i32,
    /// Interrupt line (active low).
    pub int: i32,
    pub reset: Option<i32>,
}

/// `None` on boards without the Ethernet option.
pub const ETHERNET: Option<EthernetPins> = Some(EthernetPins {
    sclk: 18,
    mosi: 23,
    miso: 19,
    cs: 5,
    int: 4,
    reset: None,
});

/// W5500 SPI clock.
pub const ETH_SPI_HZ: u32 = 20_000_000;

// ---------------------------------------------------------------------------
// PN532 NFC front-end (I²C)
// ---------------------------------------------------------------------------

pub const PN532_SDA_GPIO: i32 = 21;
pub const PN532_SCL_GPIO: i32 = 22;
/// PN532 I²C clock (the module tops out at 400 kHz).
pub const PN532_I2C_HZ: u32 = 100_000;
