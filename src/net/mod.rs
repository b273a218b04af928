//! Network interface management.
//!
//! Wi-Fi and Ethernet each get their own [`NetworkInterfaceManager`],
//! driven by its own task.  They differ only in retry policy and in what
//! counts as "configured"; both publish into the shared bus, and the
//! websocket session treats "either interface connected" as usable.

pub mod manager;
pub mod policy;
pub mod reason;

pub use manager::{InterfaceKind, NetState, NetworkInterfaceManager};
pub use policy::{ExponentialBackoff, FixedInterval};
