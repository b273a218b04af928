//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that wires real components to the
//! mock adapters in `mock_hw` and drives them tick by tick on a manual
//! clock.  All tests run on the host (x86_64) with no real hardware
//! required.

mod mock_hw;
mod network_tests;
mod nfc_tests;
mod protocol_tests;
mod session_tests;
