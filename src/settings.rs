//! Persisted device settings.
//!
//! Everything the operator (serial CLI) or the backend (registration)
//! configures lives here, in NVS namespace `settings`:
//!
//! | Key            | Encoding        |
//! |----------------|-----------------|
//! | `wifi.ssid`    | UTF-8           |
//! | `wifi.pass`    | UTF-8           |
//! | `api.host`     | UTF-8           |
//! | `api.port`     | u16 LE          |
//! | `api.useSSL`   | 1 byte (0 / 1)  |
//! | `api.key`      | UTF-8           |
//! | `api.readerId` | u32 LE          |
//! | `hostname`     | UTF-8           |
//!
//! Values are loaded once at boot and cached; every setter writes through
//! to storage and updates the cache under one lock, so readers on other
//! tasks never see a half-applied change.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{info, warn};

use crate::adapters::device_id;
use crate::app::ports::{StorageError, StoragePort, WsTarget};
use crate::bus::state::bounded;
use crate::config::FIRMWARE_VARIANT;

const NAMESPACE: &str = "settings";

const KEY_WIFI_SSID: &str = "wifi.ssid";
const KEY_WIFI_PASS: &str = "wifi.pass";
const KEY_API_HOST: &str = "api.host";
const KEY_API_PORT: &str = "api.port";
const KEY_API_TLS: &str = "api.useSSL";
const KEY_API_KEY: &str = "api.key";
const KEY_READER_ID: &str = "api.readerId";
const KEY_HOSTNAME: &str = "hostname";

/// Wi-Fi station credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkConfig {
    pub ssid: heapless::String<32>,
    pub password: heapless::String<64>,
}

impl NetworkConfig {
    pub fn is_configured(&self) -> bool {
        !self.ssid.is_empty()
    }
}

/// Backend endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiConfig {
    pub host: heapless::String<64>,
    pub port: u16,
    pub use_tls: bool,
}

impl ApiConfig {
    pub fn is_configured(&self) -> bool {
        !self.host.is_empty() && self.port != 0
    }

    pub fn target(&self) -> WsTarget {
        WsTarget {
            host: self.host.clone(),
            port: self.port,
            use_tls: self.use_tls,
        }
    }
}

/// Longest backend token we store.
pub const API_KEY_MAX_LEN: usize = 128;

/// Credentials handed out by the backend at registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub reader_id: u32,
    pub api_key: heapless::String<API_KEY_MAX_LEN>,
}

impl DeviceIdentity {
    pub fn is_registered(&self) -> bool {
        !self.api_key.is_empty()
    }
}

struct Inner<S> {
    storage: S,
    network: NetworkConfig,
    api: ApiConfig,
    identity: DeviceIdentity,
    hostname: heapless::String<64>,
}

/// Cached, write-through settings store.  Share it as `Arc<Settings<S>>`.
pub struct Settings<S: StoragePort> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Inner<S>>>,
}

impl<S: StoragePort> Settings<S> {
    /// Load every setting from `storage`; missing keys take their defaults.
    pub fn load(storage: S) -> Self {
        let network = NetworkConfig {
            ssid: read_string(&storage, KEY_WIFI_SSID),
            password: read_string(&storage, KEY_WIFI_PASS),
        };
        let api = ApiConfig {
            host: read_string(&storage, KEY_API_HOST),
            port: read_array(&storage, KEY_API_PORT).map_or(0, u16::from_le_bytes),
            use_tls: read_array::<1>(&storage, KEY_API_TLS).is_some_and(|b| b[0] != 0),
        };
        let identity = DeviceIdentity {
            reader_id: read_array(&storage, KEY_READER_ID).map_or(0, u32::from_le_bytes),
            api_key: read_string(&storage, KEY_API_KEY),
        };
        let hostname = read_string(&storage, KEY_HOSTNAME);

        info!(
            "Settings: loaded (wifi {}, api {}:{} tls={}, registered {})",
            if network.is_configured() { "set" } else { "unset" },
            api.host,
            api.port,
            api.use_tls,
            identity.is_registered()
        );

        Self {
            inner: Mutex::new(RefCell::new(Inner {
                storage,
                network,
                api,
                identity,
                hostname,
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner<S>) -> R) -> R {
        self.inner.lock(|cell| f(&mut cell.borrow_mut()))
    }

    // ── Wi-Fi ────────────────────────────────────────────────

    pub fn network_config(&self) -> NetworkConfig {
        self.with(|inner| inner.network.clone())
    }

    pub fn save_network_config(&self, ssid: &str, password: &str) -> Result<(), StorageError> {
        info!("Settings: saving network config");
        self.with(|inner| {
            inner.storage.write(NAMESPACE, KEY_WIFI_SSID, ssid.as_bytes())?;
            inner
                .storage
                .write(NAMESPACE, KEY_WIFI_PASS, password.as_bytes())?;
            inner.network = NetworkConfig {
                ssid: bounded(ssid),
                password: bounded(password),
            };
            Ok(())
        })
    }

    // ── Backend endpoint ─────────────────────────────────────

    pub fn api_config(&self) -> ApiConfig {
        self.with(|inner| inner.api.clone())
    }

    pub fn save_api_config(&self, host: &str, port: u16, use_tls: bool) -> Result<(), StorageError> {
        info!("Settings: saving api config {}:{} tls={}", host, port, use_tls);
        self.with(|inner| {
            inner.storage.write(NAMESPACE, KEY_API_HOST, host.as_bytes())?;
            inner
                .storage
                .write(NAMESPACE, KEY_API_PORT, &port.to_le_bytes())?;
            inner
                .storage
                .write(NAMESPACE, KEY_API_TLS, &[u8::from(use_tls)])?;
            inner.api = ApiConfig {
                host: bounded(host),
                port,
                use_tls,
            };
            Ok(())
        })
    }

    // ── Identity ─────────────────────────────────────────────

    pub fn identity(&self) -> DeviceIdentity {
        self.with(|inner| inner.identity.clone())
    }

    pub fn is_registered(&self) -> bool {
        self.with(|inner| inner.identity.is_registered())
    }

    /// Store the backend credentials. A token longer than
    /// [`API_KEY_MAX_LEN`] is refused, leaving the previous identity in place.
    pub fn save_identity(&self, api_key: &str, reader_id: u32) -> Result<(), StorageError> {
        let Ok(token) = heapless::String::<API_KEY_MAX_LEN>::try_from(api_key) else {
            warn!(
                "Settings: token for reader {} is {} bytes, limit {}",
                reader_id,
                api_key.len(),
                API_KEY_MAX_LEN
            );
            return Err(StorageError::TooLong);
        };
        info!("Settings: saving identity for reader {}", reader_id);
        self.with(|inner| {
            inner.storage.write(NAMESPACE, KEY_API_KEY, api_key.as_bytes())?;
            inner
                .storage
                .write(NAMESPACE, KEY_READER_ID, &reader_id.to_le_bytes())?;
            inner.identity = DeviceIdentity {
                reader_id,
                api_key: token,
            };
            Ok(())
        })
    }

    /// Forget the backend credentials.  Clearing an empty identity is a
    /// no-op that still succeeds.
    pub fn clear_identity(&self) -> Result<(), StorageError> {
        info!("Settings: clearing identity");
        self.with(|inner| {
            inner.identity = DeviceIdentity::default();
            for key in [KEY_API_KEY, KEY_READER_ID] {
                match inner.storage.delete(NAMESPACE, key) {
                    Ok(()) | Err(StorageError::NotFound) => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        })
    }

    // ── Hostname ─────────────────────────────────────────────

    /// Device hostname, generated and persisted on first use.
    pub fn hostname(&self) -> heapless::String<64> {
        self.with(|inner| {
            if inner.hostname.is_empty() {
                let name =
                    device_id::generate_hostname(FIRMWARE_VARIANT, device_id::hostname_suffix());
                if let Err(e) = inner
                    .storage
                    .write(NAMESPACE, KEY_HOSTNAME, name.as_bytes())
                {
                    warn!("Settings: failed to persist hostname: {}", e);
                }
                info!("Settings: generated hostname {}", name);
                inner.hostname = name;
            }
            inner.hostname.clone()
        })
    }
}

fn read_string<S: StoragePort, const N: usize>(storage: &S, key: &str) -> heapless::String<N> {
    let mut buf = [0u8; 128];
    match storage.read(NAMESPACE, key, &mut buf) {
        Ok(len) => match core::str::from_utf8(&buf[..len]) {
            Ok(s) => bounded(s),
            Err(_) => {
                warn!("Settings: {} is not valid UTF-8, ignoring", key);
                heapless::String::new()
            }
        },
        Err(StorageError::NotFound) => heapless::String::new(),
        Err(e) => {
            warn!("Settings: failed to read {}: {}", key, e);
            heapless::String::new()
        }
    }
}

fn read_array<const N: usize>(storage: &impl StoragePort, key: &str) -> Option<[u8; N]> {
    let mut buf = [0u8; N];
    match storage.read(NAMESPACE, key, &mut buf) {
        Ok(len) if len == N => Some(buf),
        Ok(_) => {
            warn!("Settings: {} has unexpected size, ignoring", key);
            None
        }
        Err(_) => None,
    }
}
