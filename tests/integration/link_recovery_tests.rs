//! Wireless link loss, reconnect exhaustion and provisioning.

use probelink::app::events::NetworkEvent;
use probelink::cloud::manager::SessionState;
use probelink::net::types::{
    ConnectionError, ConnectionInfo, ConnectionState, Credentials, LinkEvent, ProvisioningConfig,
};

use crate::mock_net::{Boot, Device};

#[test]
fn reconnect_gives_up_after_max_retries() {
    let mut dev = Device::boot(Boot {
        max_retries: 3,
        ..Boot::default()
    });
    dev.backend.token("tok", 3600);
    dev.link_up();
    assert_eq!(dev.runtime.cloud().state(), SessionState::Authenticated);

    for attempt in 1..=3 {
        dev.link_lost();
        assert_eq!(dev.wifi.retry_count(), attempt);
        assert!(dev.timers.fire_next());
    }
    dev.link_lost();

    assert_eq!(dev.wifi.state(), ConnectionState::Failed);
    assert_eq!(
        dev.network_events().last(),
        Some(&NetworkEvent::ConnectionFailed)
    );
    assert_eq!(dev.link.connect_calls(), 4);
    assert_eq!(dev.runtime.cloud().state(), SessionState::Uninitialized);
}

#[test]
fn address_resets_backoff() {
    let mut dev = Device::boot(Boot {
        max_retries: 3,
        ..Boot::default()
    });
    dev.link_up();
    dev.link_lost();
    dev.timers.fire_next();
    dev.link_lost();
    assert_eq!(dev.wifi.retry_count(), 2);

    dev.timers.fire_next();
    dev.link_up();
    assert_eq!(dev.wifi.retry_count(), 0);
    assert_eq!(dev.wifi.state(), ConnectionState::Connected);
}

#[test]
fn empty_pop_is_rejected_without_transition() {
    let dev = Device::boot(Boot {
        wifi: None,
        ..Boot::default()
    });
    assert_eq!(dev.wifi.state(), ConnectionState::Disconnected);
    assert_eq!(
        dev.wifi.start_provisioning(&ProvisioningConfig::default()),
        Err(ConnectionError::InvalidArgument)
    );
    assert_eq!(dev.wifi.state(), ConnectionState::Disconnected);
    assert!(dev.link.pairing().is_none());
}

#[test]
fn provisioning_hands_over_to_cloud() {
    let mut dev = Device::boot(Boot {
        wifi: None,
        ..Boot::default()
    });
    assert!(!dev.wifi.has_credentials());

    let prov = ProvisioningConfig::with_pop("pairing-secret").unwrap();
    dev.wifi.start_provisioning(&prov).unwrap();
    assert_eq!(dev.wifi.state(), ConnectionState::Provisioning);
    let pairing = dev.link.pairing().unwrap();
    assert!(pairing.device_name.starts_with("PROV_"));

    let creds = Credentials::new("Workshop", "bench-wifi-1").unwrap();
    dev.link.emit(LinkEvent::CredentialsReceived(creds));
    dev.link.emit(LinkEvent::ProvisioningEnded);
    assert!(dev.wifi.has_credentials());

    dev.backend.token("tok", 3600);
    dev.link.emit(LinkEvent::GotIp(ConnectionInfo::default()));
    dev.runtime.run_once();

    assert_eq!(dev.wifi.state(), ConnectionState::Connected);
    assert_eq!(dev.runtime.cloud().state(), SessionState::Authenticated);
    let events = dev.network_events();
    assert!(events.contains(&NetworkEvent::ProvisioningStarted));
    assert!(events.contains(&NetworkEvent::CredentialsReceived));
    assert!(events.contains(&NetworkEvent::ProvisioningComplete));
}

#[test]
fn manual_disconnect_does_not_reconnect() {
    let mut dev = Device::boot(Boot::default());
    dev.link_up();
    dev.wifi.disconnect().unwrap();
    dev.link.emit(LinkEvent::Disconnected { reason: 8 });
    dev.runtime.run_once();

    assert_eq!(dev.timers.pending(), 0);
    assert_eq!(dev.wifi.state(), ConnectionState::Disconnected);
}
