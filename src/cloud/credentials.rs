//! Cloud device identity.
//!
//! `device_id` + `secret` are written once during factory provisioning and
//! exchanged for a bearer token by [`AuthSession`](super::auth::AuthSession).
//! They live in the `cloud` namespace of the key-value store, separate from
//! the link credentials.

use core::fmt;

use serde::Serialize;

use crate::app::ports::{StorageError, StoragePort};

pub const NAMESPACE: &str = "cloud";
const KEY_DEVICE_ID: &str = "device_id";
const KEY_SECRET: &str = "secret";

/// UUID text form, e.g. `550e8400-e29b-41d4-a716-446655440000`.
pub const DEVICE_ID_MAX_LEN: usize = 36;
/// 64 hex characters.
pub const SECRET_MAX_LEN: usize = 64;

#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    pub device_id: heapless::String<DEVICE_ID_MAX_LEN>,
    pub secret: heapless::String<SECRET_MAX_LEN>,
}

impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("device_id", &self.device_id)
            .field("secret", &"***")
            .finish()
    }
}

impl DeviceIdentity {
    /// Both fields must be non-empty and fit their bounds.
    pub fn new(device_id: &str, secret: &str) -> Option<Self> {
        if device_id.is_empty() || secret.is_empty() {
            return None;
        }
        let mut id = heapless::String::new();
        id.push_str(device_id).ok()?;
        let mut s = heapless::String::new();
        s.push_str(secret).ok()?;
        Some(Self {
            device_id: id,
            secret: s,
        })
    }

    pub fn load(store: &dyn StoragePort) -> Result<Self, StorageError> {
        let mut id = [0u8; DEVICE_ID_MAX_LEN];
        let n = store.read(NAMESPACE, KEY_DEVICE_ID, &mut id)?;
        let mut secret = [0u8; SECRET_MAX_LEN];
        let m = store.read(NAMESPACE, KEY_SECRET, &mut secret)?;

        let id = core::str::from_utf8(&id[..n]).map_err(|_| StorageError::Corrupted)?;
        let secret = core::str::from_utf8(&secret[..m]).map_err(|_| StorageError::Corrupted)?;
        Self::new(id, secret).ok_or(StorageError::NotFound)
    }

    pub fn save(&self, store: &mut dyn StoragePort) -> Result<(), StorageError> {
        store.write(NAMESPACE, KEY_DEVICE_ID, self.device_id.as_bytes())?;
        store.write(NAMESPACE, KEY_SECRET, self.secret.as_bytes())?;
        store.commit()
    }

    pub fn is_provisioned(store: &dyn StoragePort) -> bool {
        store.exists(NAMESPACE, KEY_DEVICE_ID) && store.exists(NAMESPACE, KEY_SECRET)
    }

    /// Factory reset.  Missing keys are not an error.
    pub fn clear(store: &mut dyn StoragePort) -> Result<(), StorageError> {
        store.delete(NAMESPACE, KEY_DEVICE_ID)?;
        store.delete(NAMESPACE, KEY_SECRET)?;
        store.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::nvs::NvsAdapter;

    const ID: &str = "550e8400-e29b-41d4-a716-446655440000";

    #[test]
    fn bounds_enforced() {
        assert!(DeviceIdentity::new("", "s").is_none());
        assert!(DeviceIdentity::new(ID, "").is_none());
        assert!(DeviceIdentity::new(&"x".repeat(37), "s").is_none());
        assert!(DeviceIdentity::new(ID, &"f".repeat(65)).is_none());
        assert!(DeviceIdentity::new(ID, &"f".repeat(64)).is_some());
    }

    #[test]
    fn save_load_clear() {
        let mut store = NvsAdapter::new();
        assert!(!DeviceIdentity::is_provisioned(&store));
        assert_eq!(DeviceIdentity::load(&store), Err(StorageError::NotFound));

        let ident = DeviceIdentity::new(ID, "deadbeef").unwrap();
        ident.save(&mut store).unwrap();
        assert!(DeviceIdentity::is_provisioned(&store));
        assert_eq!(DeviceIdentity::load(&store).unwrap(), ident);

        DeviceIdentity::clear(&mut store).unwrap();
        assert!(!DeviceIdentity::is_provisioned(&store));
        DeviceIdentity::clear(&mut store).unwrap();
    }

    #[test]
    fn debug_hides_secret() {
        let ident = DeviceIdentity::new(ID, "topsecret").unwrap();
        assert!(!format!("{ident:?}").contains("topsecret"));
    }
}
