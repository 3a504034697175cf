//! Device naming derived from the ESP32 factory MAC address.
//!
//! The pairing (provisioning) name has the form `<PREFIX>_XXYYZZ`: the
//! configured prefix followed by the last 3 bytes of the 6-byte MAC in
//! uppercase hex.  It is stable across reboots (factory-burned eFuse MAC),
//! so a phone app can find the same probe again after a power cycle.

use core::fmt::Write;

use crate::net::types::MacAddress;

/// Advertised pairing name, e.g. `PROV_EFCAFE`.
pub type PairingName = heapless::String<32>;

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    // SAFETY: the buffer is exactly the 6 bytes the call writes.
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

/// `<prefix>_XXYYZZ`.  An over-long prefix is truncated to fit.
pub fn pairing_name(prefix: &str, mac: &MacAddress) -> PairingName {
    let mut name = PairingName::new();
    // Room for "_XXYYZZ".
    let max_prefix = name.capacity() - 7;
    let prefix = match prefix.char_indices().nth(max_prefix) {
        Some((cut, _)) => &prefix[..cut],
        None => prefix,
    };
    let _ = write!(name, "{}_{:02X}{:02X}{:02X}", prefix, mac[3], mac[4], mac[5]);
    name
}
