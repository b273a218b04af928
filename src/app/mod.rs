//! Application boundary.
//!
//! [`ports`] holds every trait the components depend on; adapters in
//! `crate::adapters` implement them for ESP-IDF and for host simulation.

pub mod ports;
