//! Persistent key/value store for credentials and the device config.
//!
//! Implements [`ConfigPort`] (postcard-encoded [`ProbeConfig`] under
//! `probelink/cfg`) and [`StoragePort`] (raw blobs keyed by namespace and
//! key, used for Wi-Fi and cloud credentials).
//!
//! On ESP32 each call opens the namespace on the default NVS partition
//! through `EspNvs`; writes are committed before they return. On host the
//! store is a map shared by every clone, so the connection manager and the
//! session orchestrator see each other's writes as they would on flash.
//! The host backend is plaintext and only meant for tests.

use log::{info, warn};

use crate::app::ports::{ConfigError, ConfigPort, StorageError, StoragePort};
use crate::config::ProbeConfig;

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;
#[cfg(not(target_os = "espidf"))]
use std::sync::{Arc, Mutex, PoisonError};

#[cfg(target_os = "espidf")]
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::{ESP_ERR_NVS_NOT_ENOUGH_SPACE, ESP_ERR_NVS_NOT_FOUND, EspError};

const CONFIG_NAMESPACE: &str = "probelink";
const CONFIG_KEY: &str = "cfg";

/// Largest value we keep under one key: a serialized config or a credential.
#[cfg(target_os = "espidf")]
const MAX_BLOB_SIZE: usize = 1024;

#[derive(Clone)]
pub struct NvsAdapter {
    #[cfg(target_os = "espidf")]
    partition: EspDefaultNvsPartition,
    #[cfg(not(target_os = "espidf"))]
    store: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

#[cfg(target_os = "espidf")]
impl NvsAdapter {
    /// Store on the default NVS partition.
    ///
    /// Taking the partition initialises flash, erasing it first on a
    /// version mismatch, so the handle passed in is ready for use.
    pub fn new(partition: EspDefaultNvsPartition) -> Self {
        info!("NvsAdapter: default NVS partition");
        Self { partition }
    }

    /// Open `namespace`. A namespace that was never written does not exist
    /// until it is opened read-write.
    fn open(&self, namespace: &str, write: bool) -> Result<Option<EspNvs<NvsDefault>>, EspError> {
        match EspNvs::new(self.partition.clone(), namespace, write) {
            Ok(nvs) => Ok(Some(nvs)),
            Err(e) if !write && e.code() == ESP_ERR_NVS_NOT_FOUND as i32 => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn read_blob(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let blob = self.open(namespace, false).and_then(|nvs| {
            let Some(nvs) = nvs else { return Ok(None) };
            let mut buf = [0u8; MAX_BLOB_SIZE];
            Ok(nvs.get_blob(key, &mut buf)?.map(<[u8]>::to_vec))
        });
        blob.map_err(|e| {
            warn!("NvsAdapter: read {}/{} failed ({})", namespace, key, e);
            StorageError::IoError
        })
    }
}

#[cfg(not(target_os = "espidf"))]
impl NvsAdapter {
    /// In-memory store shared by every clone.
    pub fn new() -> Self {
        info!("NvsAdapter: simulation backend");
        Self {
            store: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Drop every key in every namespace.
    pub fn erase_all(&mut self) {
        self.map().clear();
    }

    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(namespace: &str, key: &str) -> String {
        format!("{}/{}", namespace, key)
    }

    fn read_blob(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.map().get(&Self::slot(namespace, key)).cloned())
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for NvsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigPort for NvsAdapter {
    fn load(&self) -> Result<ProbeConfig, ConfigError> {
        match self.read_blob(CONFIG_NAMESPACE, CONFIG_KEY) {
            Ok(Some(bytes)) => match postcard::from_bytes::<ProbeConfig>(&bytes) {
                Ok(cfg) if cfg.validate().is_ok() => {
                    info!("NvsAdapter: loaded config ({} bytes)", bytes.len());
                    Ok(cfg)
                }
                _ => {
                    warn!("NvsAdapter: stored config corrupt or invalid, using defaults");
                    Ok(ProbeConfig::default())
                }
            },
            Ok(None) => {
                info!("NvsAdapter: no stored config, using defaults");
                Ok(ProbeConfig::default())
            }
            Err(e) => {
                warn!("NvsAdapter: config read error ({}), using defaults", e);
                Ok(ProbeConfig::default())
            }
        }
    }

    fn save(&mut self, config: &ProbeConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;
        self.write(CONFIG_NAMESPACE, CONFIG_KEY, &bytes)
            .map_err(|e| match e {
                StorageError::Full => ConfigError::StorageFull,
                _ => ConfigError::IoError,
            })?;
        info!("NvsAdapter: config saved ({} bytes)", bytes.len());
        Ok(())
    }
}

impl StoragePort for NvsAdapter {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let data = self.read_blob(namespace, key)?.ok_or(StorageError::NotFound)?;
        if data.len() > buf.len() {
            return Err(StorageError::Corrupted);
        }
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    #[cfg(not(target_os = "espidf"))]
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.map().insert(Self::slot(namespace, key), data.to_vec());
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if data.len() > MAX_BLOB_SIZE {
            return Err(StorageError::Full);
        }
        // set_blob commits before returning.
        let written = self
            .open(namespace, true)
            .and_then(|nvs| match nvs {
                Some(mut nvs) => nvs.set_blob(key, data),
                None => Ok(()),
            });
        written.map_err(|e| {
            warn!("NvsAdapter: write {}/{} failed ({})", namespace, key, e);
            if e.code() == ESP_ERR_NVS_NOT_ENOUGH_SPACE as i32 {
                StorageError::Full
            } else {
                StorageError::IoError
            }
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.map().remove(&Self::slot(namespace, key));
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        let removed = self
            .open(namespace, true)
            .and_then(|nvs| nvs.map_or(Ok(false), |mut nvs| nvs.remove(key)));
        removed.map(|_| ()).map_err(|e| {
            warn!("NvsAdapter: delete {}/{} failed ({})", namespace, key, e);
            StorageError::IoError
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.map().contains_key(&Self::slot(namespace, key))
    }

    #[cfg(target_os = "espidf")]
    fn exists(&self, namespace: &str, key: &str) -> bool {
        matches!(
            self.open(namespace, false)
                .and_then(|nvs| nvs.map_or(Ok(false), |nvs| nvs.contains(key))),
            Ok(true)
        )
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;
    use crate::config::CloudConfig;

    #[test]
    fn storage_round_trip() {
        let mut nvs = NvsAdapter::new();
        let data = b"hello NVS";
        nvs.write("test_ns", "greeting", data).unwrap();
        assert!(nvs.exists("test_ns", "greeting"));

        let mut buf = [0u8; 64];
        let len = nvs.read("test_ns", "greeting", &mut buf).unwrap();
        assert_eq!(&buf[..len], data);

        nvs.delete("test_ns", "greeting").unwrap();
        assert!(!nvs.exists("test_ns", "greeting"));
    }

    #[test]
    fn storage_read_missing_key() {
        let nvs = NvsAdapter::new();
        let mut buf = [0u8; 64];
        assert!(matches!(
            nvs.read("ns", "nope", &mut buf),
            Err(StorageError::NotFound)
        ));
    }

    #[test]
    fn short_buffer_is_rejected() {
        let mut nvs = NvsAdapter::new();
        nvs.write("ns", "k", &[0u8; 16]).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(nvs.read("ns", "k", &mut buf), Err(StorageError::Corrupted));
    }

    #[test]
    fn clones_share_backing_store() {
        let mut a = NvsAdapter::new();
        let b = a.clone();
        a.write("wifi", "ssid", b"HomeNet").unwrap();
        assert!(b.exists("wifi", "ssid"));
    }

    #[test]
    fn erase_all_forgets_credentials_and_config() {
        let mut nvs = NvsAdapter::new();
        nvs.write("cloud", "device_id", b"dev-1").unwrap();
        nvs.write("wifi", "ssid", b"HomeNet").unwrap();
        nvs.save(&ProbeConfig::default()).unwrap();
        let other = nvs.clone();
        nvs.erase_all();
        assert!(!other.exists("cloud", "device_id"));
        assert!(!other.exists("wifi", "ssid"));
        assert!(!other.exists(CONFIG_NAMESPACE, CONFIG_KEY));
    }

    #[test]
    fn same_key_in_two_namespaces_is_distinct() {
        let mut nvs = NvsAdapter::new();
        nvs.write("wifi", "secret", b"wpa").unwrap();
        nvs.write("cloud", "secret", b"api").unwrap();
        nvs.delete("wifi", "secret").unwrap();
        let mut buf = [0u8; 8];
        let len = nvs.read("cloud", "secret", &mut buf).unwrap();
        assert_eq!(&buf[..len], b"api");
    }

    #[test]
    fn config_defaults_when_absent() {
        let nvs = NvsAdapter::new();
        assert_eq!(nvs.load().unwrap(), ProbeConfig::default());
    }

    #[test]
    fn config_save_load() {
        let mut nvs = NvsAdapter::new();
        let mut cfg = ProbeConfig::default();
        cfg.cloud = CloudConfig::with_base_url("https://api.example.com").unwrap();
        cfg.wifi.max_retries = 7;
        nvs.save(&cfg).unwrap();
        assert_eq!(nvs.load().unwrap(), cfg);
    }

    #[test]
    fn invalid_config_not_persisted() {
        let mut nvs = NvsAdapter::new();
        let mut cfg = ProbeConfig::default();
        cfg.retry.max_retries = 99;
        assert!(matches!(nvs.save(&cfg), Err(ConfigError::ValidationFailed(_))));
        assert!(!nvs.exists(CONFIG_NAMESPACE, CONFIG_KEY));
    }

    #[test]
    fn corrupt_config_falls_back_to_defaults() {
        let mut nvs = NvsAdapter::new();
        nvs.write(CONFIG_NAMESPACE, CONFIG_KEY, &[0xFF; 3]).unwrap();
        assert_eq!(nvs.load().unwrap(), ProbeConfig::default());
    }
}
