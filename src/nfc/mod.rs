//! NFC card handling: discovery, NTAG424 authentication and key rotation.

pub mod controller;
pub mod hex;

pub use controller::NfcController;
