//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements both [`ConfigPort`] and [`StoragePort`] for the reader.
//!
//! - Namespaces: `settings` (device settings), `cert_mgr` (remembered
//!   root certificate) and `attractap` (the [`SystemConfig`] blob).
//! - Config validation: all tunables are range-checked before persistence.
//! - Atomic writes: ESP-IDF NVS commits are atomic per `nvs_commit()`.
//!
//! The adapter is `Clone`; clones address the same underlying store, so
//! the settings layer and the certificate manager can each own one.

use crate::app::ports::{ConfigError, ConfigPort, StorageError, StoragePort};
use crate::config::SystemConfig;
use log::{info, warn};

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;
#[cfg(not(target_os = "espidf"))]
use std::sync::{Arc, Mutex, PoisonError};

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

const CONFIG_NAMESPACE: &str = "attractap";
const CONFIG_KEY: &str = "syscfg";

#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
const MAX_BLOB_SIZE: usize = 4000;

/// NVS key and namespace names are limited to 15 bytes plus NUL.
#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
fn c_name(name: &str) -> [u8; 16] {
    let mut buf = [0u8; 16];
    let bytes = name.as_bytes();
    let len = bytes.len().min(15);
    buf[..len].copy_from_slice(&bytes[..len]);
    buf
}

#[derive(Clone)]
pub struct NvsAdapter {
    #[cfg(not(target_os = "espidf"))]
    store: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl NvsAdapter {
    /// Create a new NvsAdapter and initialise NVS flash.
    ///
    /// On first boot or after a version mismatch the NVS partition is
    /// erased and re-initialised automatically.
    pub fn new() -> Result<Self, ConfigError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: called once from the main task before any component
            // touches NVS.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
                warn!("NVS: erasing and re-initialising flash partition");
                if unsafe { nvs_flash_erase() } != ESP_OK {
                    return Err(ConfigError::IoError);
                }
                if unsafe { nvs_flash_init() } != ESP_OK {
                    return Err(ConfigError::IoError);
                }
            } else if ret != ESP_OK {
                return Err(ConfigError::IoError);
            }
            info!("NvsAdapter: ESP-IDF NVS initialised");
            Ok(Self {})
        }

        #[cfg(not(target_os = "espidf"))]
        {
            info!("NvsAdapter: simulation backend");
            Ok(Self {
                store: Arc::new(Mutex::new(HashMap::new())),
            })
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    #[cfg(not(target_os = "espidf"))]
    fn with_store<T>(&self, f: impl FnOnce(&mut HashMap<String, Vec<u8>>) -> T) -> T {
        let mut guard = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Open an NVS namespace, execute a closure with the handle, then close.
    #[cfg(target_os = "espidf")]
    fn with_nvs_handle<F, T>(namespace: &str, write: bool, f: F) -> Result<T, i32>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, i32>,
    {
        let ns = c_name(namespace);
        let mut handle: nvs_handle_t = 0;
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };

        let ret = unsafe { nvs_open(ns.as_ptr() as *const _, mode, &mut handle) };
        if ret != ESP_OK {
            return Err(ret);
        }

        let result = f(handle);
        unsafe {
            nvs_close(handle);
        }
        result
    }

    #[cfg(target_os = "espidf")]
    fn read_blob(namespace: &str, key: &str) -> Result<Vec<u8>, i32> {
        Self::with_nvs_handle(namespace, false, |handle| {
            let key = c_name(key);
            let mut size: usize = 0;
            let ret = unsafe {
                nvs_get_blob(
                    handle,
                    key.as_ptr() as *const _,
                    core::ptr::null_mut(),
                    &mut size,
                )
            };
            if ret != ESP_OK {
                return Err(ret);
            }
            if size > MAX_BLOB_SIZE {
                return Err(ESP_ERR_NVS_INVALID_LENGTH);
            }
            let mut buf = vec![0u8; size];
            let ret = unsafe {
                nvs_get_blob(
                    handle,
                    key.as_ptr() as *const _,
                    buf.as_mut_ptr() as *mut _,
                    &mut size,
                )
            };
            if ret != ESP_OK {
                return Err(ret);
            }
            buf.truncate(size);
            Ok(buf)
        })
    }
}

pub(crate) fn validate_config(cfg: &SystemConfig) -> Result<(), ConfigError> {
    let ticks = [
        cfg.network_tick_ms,
        cfg.websocket_tick_ms,
        cfg.api_tick_ms,
        cfg.nfc_tick_ms,
    ];
    if ticks.iter().any(|t| !(5..=1000).contains(t)) {
        return Err(ConfigError::ValidationFailed("task ticks must be 5–1000 ms"));
    }
    if !(1_000..=300_000).contains(&cfg.wifi_retry_interval_ms) {
        return Err(ConfigError::ValidationFailed(
            "wifi_retry_interval_ms must be 1000–300000",
        ));
    }
    if !(1_000..=120_000).contains(&cfg.wifi_connect_timeout_ms) {
        return Err(ConfigError::ValidationFailed(
            "wifi_connect_timeout_ms must be 1000–120000",
        ));
    }
    if !(100..=10_000).contains(&cfg.eth_base_retry_delay_ms) {
        return Err(ConfigError::ValidationFailed(
            "eth_base_retry_delay_ms must be 100–10000",
        ));
    }
    if !(1..=10).contains(&cfg.eth_max_retries) {
        return Err(ConfigError::ValidationFailed("eth_max_retries must be 1–10"));
    }
    if !(5_000..=120_000).contains(&cfg.eth_dhcp_timeout_ms) {
        return Err(ConfigError::ValidationFailed(
            "eth_dhcp_timeout_ms must be 5000–120000",
        ));
    }
    if !(1_000..=60_000).contains(&cfg.ws_reconnect_delay_ms) {
        return Err(ConfigError::ValidationFailed(
            "ws_reconnect_delay_ms must be 1000–60000",
        ));
    }
    if !(100..=30_000).contains(&cfg.ws_send_timeout_ms) {
        return Err(ConfigError::ValidationFailed(
            "ws_send_timeout_ms must be 100–30000",
        ));
    }
    if !(1_000..=60_000).contains(&cfg.heartbeat_interval_ms) {
        return Err(ConfigError::ValidationFailed(
            "heartbeat_interval_ms must be 1000–60000",
        ));
    }
    if !(1_000..=120_000).contains(&cfg.handshake_interval_ms) {
        return Err(ConfigError::ValidationFailed(
            "handshake_interval_ms must be 1000–120000",
        ));
    }
    if !(100..=5_000).contains(&cfg.nfc_discovery_timeout_ms) {
        return Err(ConfigError::ValidationFailed(
            "nfc_discovery_timeout_ms must be 100–5000",
        ));
    }
    if !(1..=10).contains(&cfg.nfc_auth_attempts) {
        return Err(ConfigError::ValidationFailed("nfc_auth_attempts must be 1–10"));
    }
    if cfg.nfc_auth_retry_delay_ms > 5_000 {
        return Err(ConfigError::ValidationFailed(
            "nfc_auth_retry_delay_ms must be 0–5000",
        ));
    }
    if !(1_000..=60_000).contains(&cfg.nfc_removal_timeout_ms) {
        return Err(ConfigError::ValidationFailed(
            "nfc_removal_timeout_ms must be 1000–60000",
        ));
    }
    Ok(())
}

fn decode_config(bytes: &[u8]) -> Result<SystemConfig, ConfigError> {
    let cfg: SystemConfig = postcard::from_bytes(bytes).map_err(|_| ConfigError::Corrupted)?;
    validate_config(&cfg)?;
    Ok(cfg)
}

impl ConfigPort for NvsAdapter {
    fn load(&self) -> Result<SystemConfig, ConfigError> {
        #[cfg(not(target_os = "espidf"))]
        let stored = self.with_store(|s| {
            s.get(&Self::composite_key(CONFIG_NAMESPACE, CONFIG_KEY))
                .cloned()
        });

        #[cfg(target_os = "espidf")]
        let stored = match Self::read_blob(CONFIG_NAMESPACE, CONFIG_KEY) {
            Ok(bytes) => Some(bytes),
            Err(e) if e == ESP_ERR_NVS_NOT_FOUND => None,
            Err(e) => {
                warn!("NvsAdapter: NVS read error {}, using defaults", e);
                None
            }
        };

        match stored {
            Some(bytes) => match decode_config(&bytes) {
                Ok(cfg) => {
                    info!("NvsAdapter: loaded config ({} bytes)", bytes.len());
                    Ok(cfg)
                }
                Err(e) => {
                    warn!("NvsAdapter: stored config rejected ({}), using defaults", e);
                    Ok(SystemConfig::default())
                }
            },
            None => {
                info!("NvsAdapter: no stored config, using defaults");
                Ok(SystemConfig::default())
            }
        }
    }

    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError> {
        validate_config(config)?;
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;

        #[cfg(not(target_os = "espidf"))]
        {
            self.with_store(|s| {
                s.insert(Self::composite_key(CONFIG_NAMESPACE, CONFIG_KEY), bytes)
            });
            info!("NvsAdapter: config saved (simulation)");
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let result = Self::with_nvs_handle(CONFIG_NAMESPACE, true, |handle| {
                let key = c_name(CONFIG_KEY);
                let ret = unsafe {
                    nvs_set_blob(
                        handle,
                        key.as_ptr() as *const _,
                        bytes.as_ptr() as *const _,
                        bytes.len(),
                    )
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            });
            match result {
                Ok(()) => {
                    info!("NvsAdapter: config saved to NVS ({} bytes)", bytes.len());
                    Ok(())
                }
                Err(e) if e == ESP_ERR_NVS_NOT_ENOUGH_SPACE => Err(ConfigError::StorageFull),
                Err(e) => {
                    warn!("NvsAdapter: NVS write error {}", e);
                    Err(ConfigError::IoError)
                }
            }
        }
    }
}

impl StoragePort for NvsAdapter {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.with_store(|s| match s.get(&composite) {
                Some(data) => {
                    let len = data.len().min(buf.len());
                    buf[..len].copy_from_slice(&data[..len]);
                    Ok(len)
                }
                None => Err(StorageError::NotFound),
            })
        }

        #[cfg(target_os = "espidf")]
        {
            match Self::read_blob(namespace, key) {
                Ok(data) => {
                    let len = data.len().min(buf.len());
                    buf[..len].copy_from_slice(&data[..len]);
                    Ok(len)
                }
                Err(e) if e == ESP_ERR_NVS_NOT_FOUND => Err(StorageError::NotFound),
                Err(_) => Err(StorageError::IoError),
            }
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.with_store(|s| s.insert(composite, data.to_vec()));
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let result = Self::with_nvs_handle(namespace, true, |handle| {
                let key = c_name(key);
                let ret = unsafe {
                    nvs_set_blob(
                        handle,
                        key.as_ptr() as *const _,
                        data.as_ptr() as *const _,
                        data.len(),
                    )
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            });
            match result {
                Ok(()) => Ok(()),
                Err(e) if e == ESP_ERR_NVS_NOT_ENOUGH_SPACE => Err(StorageError::Full),
                Err(_) => Err(StorageError::IoError),
            }
        }
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.with_store(|s| s.remove(&composite));
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let result = Self::with_nvs_handle(namespace, true, |handle| {
                let key = c_name(key);
                let ret = unsafe { nvs_erase_key(handle, key.as_ptr() as *const _) };
                if ret != ESP_OK && ret != ESP_ERR_NVS_NOT_FOUND {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            });
            match result {
                Ok(()) => Ok(()),
                // Namespace never created: nothing to delete.
                Err(e) if e == ESP_ERR_NVS_NOT_FOUND => Ok(()),
                Err(_) => Err(StorageError::IoError),
            }
        }
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.with_store(|s| s.contains_key(&composite))
        }

        #[cfg(target_os = "espidf")]
        {
            let result = Self::with_nvs_handle(namespace, false, |handle| {
                let key = c_name(key);
                let ret = unsafe {
                    nvs_find_key(handle, key.as_ptr() as *const _, core::ptr::null_mut())
                };
                Ok(ret == ESP_OK)
            });
            result.unwrap_or(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_passes_validation() {
        assert!(validate_config(&SystemConfig::default()).is_ok());
    }

    #[test]
    fn rejects_zero_tick() {
        let cfg = SystemConfig {
            nfc_tick_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            validate_config(&cfg),
            Err(ConfigError::ValidationFailed(_))
        ));
    }

    #[test]
    fn rejects_zero_auth_attempts() {
        let cfg = SystemConfig {
            nfc_auth_attempts: 0,
            ..Default::default()
        };
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn save_refuses_invalid_config() {
        let nvs = NvsAdapter::new().unwrap();
        let cfg = SystemConfig {
            eth_max_retries: 0,
            ..Default::default()
        };
        assert!(nvs.save(&cfg).is_err());
        assert_eq!(nvs.load().unwrap(), SystemConfig::default());
    }

    #[test]
    fn config_save_then_load() {
        let nvs = NvsAdapter::new().unwrap();
        let cfg = SystemConfig {
            heartbeat_interval_ms: 7_000,
            ..Default::default()
        };
        nvs.save(&cfg).unwrap();
        assert_eq!(nvs.load().unwrap().heartbeat_interval_ms, 7_000);
    }

    #[test]
    fn corrupted_config_falls_back_to_defaults() {
        let mut nvs = NvsAdapter::new().unwrap();
        nvs.write(CONFIG_NAMESPACE, CONFIG_KEY, &[0xFF; 3]).unwrap();
        assert_eq!(nvs.load().unwrap(), SystemConfig::default());
    }

    #[test]
    fn storage_write_read_delete() {
        let mut nvs = NvsAdapter::new().unwrap();
        nvs.write("settings", "api.host", b"door.local").unwrap();
        assert!(nvs.exists("settings", "api.host"));

        let mut buf = [0u8; 64];
        let len = nvs.read("settings", "api.host", &mut buf).unwrap();
        assert_eq!(&buf[..len], b"door.local");

        nvs.delete("settings", "api.host").unwrap();
        assert!(!nvs.exists("settings", "api.host"));
    }

    #[test]
    fn storage_read_missing_key() {
        let nvs = NvsAdapter::new().unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(
            nvs.read("ns", "nope", &mut buf),
            Err(StorageError::NotFound)
        );
    }

    #[test]
    fn clones_share_the_store() {
        let mut a = NvsAdapter::new().unwrap();
        let b = a.clone();
        a.write("cert_mgr", "success_cert", &2i32.to_le_bytes())
            .unwrap();
        assert!(b.exists("cert_mgr", "success_cert"));
    }

    #[test]
    fn namespace_isolation() {
        let mut nvs = NvsAdapter::new().unwrap();
        nvs.write("ns_a", "key", b"alpha").unwrap();
        nvs.write("ns_b", "key", b"bravo").unwrap();

        let mut buf = [0u8; 64];
        let len = nvs.read("ns_a", "key", &mut buf).unwrap();
        assert_eq!(&buf[..len], b"alpha");
        let len = nvs.read("ns_b", "key", &mut buf).unwrap();
        assert_eq!(&buf[..len], b"bravo");
    }

    #[test]
    fn long_names_are_cut_to_nvs_limit() {
        let n = c_name("a_very_long_namespace_name");
        assert_eq!(&n[..15], b"a_very_long_nam");
        assert_eq!(n[15], 0);
    }
}
