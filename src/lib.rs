//! Attractap reader firmware library.
//!
//! The connectivity and protocol core of the Attractap NFC access-control
//! reader: network interface managers, the websocket session, the backend
//! protocol handler and the NFC controller, all exchanging state through
//! one [`bus::SharedStateBus`].
//!
//! Exposes every component for integration testing. All ESP-IDF-specific
//! code is guarded by `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod api;
pub mod app;
pub mod bus;
pub mod certs;
pub mod config;
pub mod error;
pub mod net;
pub mod nfc;
pub mod runtime;
pub mod settings;
pub mod ws;

pub mod adapters;
pub mod drivers;
pub mod pins;

mod esp_link_shims;
