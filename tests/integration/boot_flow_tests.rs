//! Boot and session flows: cold boot, wake from sleep, revocation, token
//! refresh and telemetry cadence.

use std::time::Duration;

use probelink::app::commands::ControlMsg;
use probelink::app::events::CloudEvent;
use probelink::cloud::credentials::DeviceIdentity;
use probelink::cloud::manager::SessionState;
use probelink::cloud::telemetry::{Measurement, MeasurementKind};
use probelink::net::types::ConnectionState;

use crate::mock_net::{BOOT_MS, Boot, Device, surviving_token};

const MINUTE: Duration = Duration::from_secs(60);

#[test]
fn cold_boot_without_identity_never_authenticates() {
    let mut dev = Device::boot(Boot {
        identity: None,
        ..Boot::default()
    });
    dev.link_up();

    assert_eq!(dev.wifi.state(), ConnectionState::Connected);
    assert_eq!(dev.runtime.cloud().state(), SessionState::NoCredentials);
    assert_eq!(dev.backend.count("/auth/device"), 0);
    assert!(dev.backend.calls().is_empty());

    dev.advance(MINUTE);
    assert!(dev.backend.calls().is_empty());
}

#[test]
fn wake_with_valid_token_skips_exchange() {
    let mut dev = Device::boot(Boot {
        token: surviving_token("kept-across-sleep", Duration::from_secs(1800)),
        ..Boot::default()
    });
    dev.link_up();

    assert_eq!(dev.runtime.cloud().state(), SessionState::Authenticated);
    assert_eq!(dev.backend.count("/auth/device"), 0);
    let calls = dev.backend.calls();
    assert_eq!(calls[0].path, "/devices/info");
    assert_eq!(
        calls[0].authorization.as_deref(),
        Some("Bearer kept-across-sleep")
    );
}

#[test]
fn cold_boot_exchanges_credentials_once() {
    let mut dev = Device::boot(Boot::default());
    dev.backend.token("fresh", 3600);
    dev.link_up();

    assert_eq!(dev.runtime.cloud().state(), SessionState::Authenticated);
    assert_eq!(dev.backend.paths(), vec!["/auth/device", "/devices/info"]);
    assert_eq!(dev.cloud_events(), vec![CloudEvent::Authenticated]);

    // A link bounce reuses the token.
    dev.link_lost();
    assert_eq!(dev.runtime.cloud().state(), SessionState::Uninitialized);
    dev.link_up();
    assert_eq!(dev.runtime.cloud().state(), SessionState::Authenticated);
    assert_eq!(dev.backend.count("/auth/device"), 1);
}

#[test]
fn revoked_device_stays_quiet() {
    let mut dev = Device::boot(Boot::default());
    dev.backend.reply(403, "");
    dev.link_up();

    assert_eq!(dev.runtime.cloud().state(), SessionState::Revoked);
    assert!(dev.cloud_events().contains(&CloudEvent::Revoked));
    assert_eq!(dev.timers.pending(), 0);

    dev.link_lost();
    dev.link_up();
    for _ in 0..10 {
        dev.advance(MINUTE);
    }
    assert_eq!(dev.backend.calls().len(), 1);
    assert_eq!(dev.runtime.cloud().state(), SessionState::Revoked);
}

#[test]
fn factory_reset_clears_revocation_and_identity() {
    let mut dev = Device::boot(Boot::default());
    dev.backend.reply(403, "");
    dev.link_up();
    assert!(dev.runtime.cloud().is_revoked());

    dev.runtime.handle(ControlMsg::FactoryReset);

    assert_eq!(dev.runtime.cloud().state(), SessionState::NoCredentials);
    assert!(!DeviceIdentity::is_provisioned(&dev.store));
    assert_eq!(dev.system.erases(), 1);
    assert_eq!(dev.system.restarts(), 1);
}

#[test]
fn token_is_refreshed_before_expiry() {
    let mut dev = Device::boot(Boot::default());
    dev.backend.token("first", 3600);
    dev.link_up();

    // 54 minutes in: still outside the 300 s refresh window.
    for _ in 0..54 {
        dev.advance(MINUTE);
    }
    assert_eq!(dev.backend.count("/auth/refresh"), 0);

    dev.clock.advance(2 * MINUTE);
    dev.backend.token("second", 3600);
    dev.runtime.cloud_mut().check_token_refresh().unwrap();
    assert_eq!(dev.backend.count("/auth/refresh"), 1);
    let refresh = dev
        .backend
        .calls()
        .into_iter()
        .find(|c| c.path == "/auth/refresh")
        .unwrap();
    assert_eq!(refresh.authorization.as_deref(), Some("Bearer first"));
    assert!(dev.cloud_events().contains(&CloudEvent::TokenRefreshed));
}

#[test]
fn telemetry_follows_its_interval() {
    let mut dev = Device::boot(Boot::default());
    dev.backend.token("t", 3600);
    dev.link_up();

    dev.inbox
        .push(Measurement::new(MeasurementKind::Temperature, 22.5, BOOT_MS));
    dev.inbox
        .push(Measurement::new(MeasurementKind::Co2, 640.0, BOOT_MS));

    for _ in 0..4 {
        dev.advance(MINUTE);
    }
    assert_eq!(dev.backend.count("/telemetry/proto"), 0);
    assert_eq!(dev.backend.count("/commands?status=pending"), 4);

    dev.advance(MINUTE);
    assert_eq!(dev.backend.count("/telemetry/proto"), 1);
    assert!(dev.inbox.is_empty());
    assert!(dev.cloud_events().contains(&CloudEvent::TelemetrySent));
}
