//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter         | Implements         | Connects to                  |
//! |-----------------|--------------------|------------------------------|
//! | `wifi`          | LinkDriver         | ESP-IDF Wi-Fi STA            |
//! | `ethernet`      | LinkDriver         | W5500 over SPI               |
//! | `ws_client`     | WsTransport        | ESP-IDF websocket client     |
//! | `pn532`         | NfcReader          | PN532 over I²C               |
//! | `ntag424`       | -                  | NTAG 424 DNA secure messaging|
//! | `nvs`           | ConfigPort         | NVS / in-memory store        |
//! |                 | StoragePort        |                              |
//! | `time`          | Clock              | ESP32 system timer           |
//! | `device_id`     | -                  | eFuse MAC, hostnames         |
//! | `driver_events` | -                  | callback → poll hand-off     |

pub mod device_id;
pub mod driver_events;
pub mod ethernet;
pub mod ntag424;
pub mod nvs;
pub mod pn532;
pub mod time;
pub mod wifi;
pub mod ws_client;
