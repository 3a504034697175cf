//! WiFi station-mode adapter.
//!
//! Implements [`LinkPort`], the hexagonal boundary for the wireless radio
//! and out-of-band credential provisioning.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: [`EspLink`], real ESP-IDF WiFi driver calls
//!   via `esp_idf_svc::wifi` and the IDF provisioning manager.
//! - **all other targets**: [`SimLink`], a scriptable simulation for
//!   host-side tests.  Driver events are injected with [`SimLink::emit`].
//!
//! Driver events are forwarded to the handler installed by the connection
//! manager.  The handler is cloned out of the adapter lock before it runs,
//! so it may call straight back into the adapter.

#[cfg(not(target_os = "espidf"))]
pub use sim::SimLink;

#[cfg(target_os = "espidf")]
pub use esp::EspLink;

// ───────────────────────────────────────────────────────────────
// Simulation
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
mod sim {
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

    use log::info;

    use crate::adapters::device_id::read_mac;
    use crate::app::ports::{LinkError, LinkEventHandler, LinkPort};
    use crate::net::types::{Credentials, LinkEvent, MacAddress, PairingParams};

    #[derive(Default)]
    struct State {
        started: bool,
        handler: Option<Arc<LinkEventHandler>>,
        connect_calls: u32,
        disconnect_calls: u32,
        last_ssid: Option<String>,
        pairing: Option<PairingParams>,
        fail_next_connect: Option<LinkError>,
        fail_next_disconnect: Option<LinkError>,
    }

    /// Host stand-in for the radio.  Records every call; never emits on
    /// its own.
    #[derive(Default)]
    pub struct SimLink {
        state: Mutex<State>,
    }

    impl SimLink {
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> MutexGuard<'_, State> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Deliver a driver event to the installed handler.
        pub fn emit(&self, event: LinkEvent) {
            let handler = self.lock().handler.clone();
            if let Some(h) = handler {
                h(event);
            }
        }

        /// Make the next `connect` fail with `error`.
        pub fn fail_next_connect(&self, error: LinkError) {
            self.lock().fail_next_connect = Some(error);
        }

        /// Make the next `disconnect` fail with `error`.
        pub fn fail_next_disconnect(&self, error: LinkError) {
            self.lock().fail_next_disconnect = Some(error);
        }

        pub fn connect_calls(&self) -> u32 {
            self.lock().connect_calls
        }

        pub fn disconnect_calls(&self) -> u32 {
            self.lock().disconnect_calls
        }

        pub fn last_ssid(&self) -> Option<String> {
            self.lock().last_ssid.clone()
        }

        /// Active pairing session, if any.
        pub fn pairing(&self) -> Option<PairingParams> {
            self.lock().pairing.clone()
        }

        pub fn has_handler(&self) -> bool {
            self.lock().handler.is_some()
        }
    }

    impl LinkPort for SimLink {
        fn start(&self) -> Result<(), LinkError> {
            self.lock().started = true;
            info!("WiFi(sim): driver started");
            Ok(())
        }

        fn connect(&self, credentials: &Credentials) -> Result<(), LinkError> {
            let mut s = self.lock();
            if !s.started {
                return Err(LinkError::NotStarted);
            }
            s.connect_calls += 1;
            s.last_ssid = Some(credentials.ssid.as_str().to_string());
            if let Some(e) = s.fail_next_connect.take() {
                return Err(e);
            }
            info!("WiFi(sim): associating with '{}'", credentials.ssid);
            Ok(())
        }

        fn disconnect(&self) -> Result<(), LinkError> {
            let mut s = self.lock();
            s.disconnect_calls += 1;
            s.fail_next_disconnect.take().map_or(Ok(()), Err)
        }

        fn start_provisioning(&self, params: &PairingParams) -> Result<(), LinkError> {
            let mut s = self.lock();
            if !s.started {
                return Err(LinkError::NotStarted);
            }
            info!("WiFi(sim): pairing session '{}' open", params.device_name);
            s.pairing = Some(params.clone());
            Ok(())
        }

        fn stop_provisioning(&self) {
            if self.lock().pairing.take().is_some() {
                info!("WiFi(sim): pairing session closed");
            }
        }

        fn mac_address(&self) -> MacAddress {
            read_mac()
        }

        fn set_event_handler(&self, handler: Option<LinkEventHandler>) {
            self.lock().handler = handler.map(Arc::new);
        }
    }
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
mod esp {
    use std::net::Ipv4Addr;
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

    use esp_idf_svc::eventloop::{EspSubscription, EspSystemEventLoop, System};
    use esp_idf_hal::modem::Modem;
    use esp_idf_svc::netif::IpEvent;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use esp_idf_svc::sys::*;
    use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration, EspWifi, WifiEvent};
    use log::{info, warn};

    use crate::adapters::device_id::read_mac;
    use crate::app::ports::{LinkError, LinkEventHandler, LinkPort};
    use crate::net::types::{ConnectionInfo, Credentials, LinkEvent, MacAddress, PairingParams};

    type Handler = Arc<RwLock<Option<Arc<LinkEventHandler>>>>;

    pub struct EspLink {
        wifi: Mutex<EspWifi<'static>>,
        handler: Handler,
        _wifi_sub: EspSubscription<'static, System>,
        _ip_sub: EspSubscription<'static, System>,
        provisioning: Mutex<bool>,
    }

    fn forward(handler: &Handler, event: LinkEvent) {
        let h = handler.read().ok().and_then(|g| g.as_ref().cloned());
        if let Some(h) = h {
            h(event);
        }
    }

    fn esp_err(e: esp_idf_svc::sys::EspError) -> LinkError {
        LinkError::Driver(e.code())
    }

    fn current_rssi() -> i8 {
        let mut ap: wifi_ap_record_t = Default::default();
        // SAFETY: `ap` is a valid out-pointer for the duration of the call.
        if unsafe { esp_wifi_sta_get_ap_info(&mut ap) } == ESP_OK as i32 {
            ap.rssi
        } else {
            0
        }
    }

    impl EspLink {
        pub fn new(
            modem: Modem,
            sysloop: EspSystemEventLoop,
            nvs: Option<EspDefaultNvsPartition>,
        ) -> Result<Self, LinkError> {
            let wifi = EspWifi::new(modem, sysloop.clone(), nvs).map_err(esp_err)?;
            let handler: Handler = Arc::new(RwLock::new(None));

            let h = handler.clone();
            let wifi_sub = sysloop
                .subscribe::<WifiEvent, _>(move |event| match event {
                    WifiEvent::StaStarted => forward(&h, LinkEvent::Started),
                    WifiEvent::StaDisconnected(info) => forward(
                        &h,
                        LinkEvent::Disconnected {
                            reason: info.reason() as u16,
                        },
                    ),
                    _ => {}
                })
                .map_err(esp_err)?;

            let h = handler.clone();
            let ip_sub = sysloop
                .subscribe::<IpEvent, _>(move |event| {
                    if let IpEvent::DhcpIpAssigned(assignment) = event {
                        let ip = assignment.ip_settings.ip;
                        let subnet = assignment.ip_settings.subnet;
                        let mask = u32::MAX
                            .checked_shl(32 - u32::from(subnet.mask.0))
                            .unwrap_or(0);
                        let mut primary: u8 = 0;
                        let mut second: wifi_second_chan_t = 0;
                        // SAFETY: both out-pointers are valid locals.
                        unsafe { esp_wifi_get_channel(&mut primary, &mut second) };
                        forward(
                            &h,
                            LinkEvent::GotIp(ConnectionInfo {
                                ip,
                                gateway: subnet.gateway,
                                netmask: Ipv4Addr::from(mask),
                                rssi: current_rssi(),
                                channel: primary,
                            }),
                        );
                    }
                })
                .map_err(esp_err)?;

            info!("WiFi(espidf): driver created");
            Ok(Self {
                wifi: Mutex::new(wifi),
                handler,
                _wifi_sub: wifi_sub,
                _ip_sub: ip_sub,
                provisioning: Mutex::new(false),
            })
        }

        fn wifi(&self) -> MutexGuard<'_, EspWifi<'static>> {
            self.wifi.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Poll the provisioning manager; forwards new credentials and the
        /// end of the session.  Called from the main loop while pairing.
        pub fn poll_provisioning(&self) {
            let mut active = self.provisioning.lock().unwrap_or_else(PoisonError::into_inner);
            if !*active {
                return;
            }
            let mut provisioned = false;
            // SAFETY: out-pointer to a local.
            let rc = unsafe { wifi_prov_mgr_is_provisioned(&mut provisioned) };
            if rc != ESP_OK as i32 || !provisioned {
                return;
            }
            *active = false;
            drop(active);

            let mut cfg: wifi_config_t = Default::default();
            // SAFETY: `cfg` is a valid out-pointer; the STA union member is
            // the one the driver fills for WIFI_IF_STA.
            let creds = unsafe {
                if esp_wifi_get_config(wifi_interface_t_WIFI_IF_STA, &mut cfg) != ESP_OK as i32 {
                    None
                } else {
                    let sta = cfg.sta;
                    let ssid = cstr_field(&sta.ssid);
                    let pass = cstr_field(&sta.password);
                    Credentials::new(ssid, pass).ok()
                }
            };
            match creds {
                Some(c) => forward(&self.handler, LinkEvent::CredentialsReceived(c)),
                None => forward(&self.handler, LinkEvent::CredentialsFailed),
            }
            // SAFETY: the manager was initialised by start_provisioning.
            unsafe { wifi_prov_mgr_deinit() };
            forward(&self.handler, LinkEvent::ProvisioningEnded);
        }
    }

    fn cstr_field(bytes: &[u8]) -> &str {
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
        core::str::from_utf8(&bytes[..end]).unwrap_or("")
    }

    impl LinkPort for EspLink {
        fn start(&self) -> Result<(), LinkError> {
            let mut wifi = self.wifi();
            wifi.set_configuration(&Configuration::Client(ClientConfiguration::default()))
                .map_err(esp_err)?;
            wifi.start().map_err(esp_err)?;
            info!("WiFi(espidf): station started");
            Ok(())
        }

        fn connect(&self, credentials: &Credentials) -> Result<(), LinkError> {
            let mut wifi = self.wifi();
            let auth_method = if credentials.is_open() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            };
            let config = ClientConfiguration {
                ssid: credentials
                    .ssid
                    .as_str()
                    .try_into()
                    .map_err(|_| LinkError::InvalidArgument)?,
                password: credentials
                    .password
                    .as_str()
                    .try_into()
                    .map_err(|_| LinkError::InvalidArgument)?,
                auth_method,
                ..Default::default()
            };
            wifi.set_configuration(&Configuration::Client(config))
                .map_err(esp_err)?;
            wifi.connect().map_err(esp_err)
        }

        fn disconnect(&self) -> Result<(), LinkError> {
            match self.wifi().disconnect() {
                Ok(()) => Ok(()),
                // Not associated is fine.
                Err(e) if e.code() == ESP_ERR_WIFI_NOT_CONNECT as i32 => Ok(()),
                Err(e) => Err(esp_err(e)),
            }
        }

        fn start_provisioning(&self, params: &PairingParams) -> Result<(), LinkError> {
            let mut name = [0u8; 33];
            name[..params.device_name.len()].copy_from_slice(params.device_name.as_bytes());
            let mut pop = [0u8; 65];
            pop[..params.pop.len()].copy_from_slice(params.pop.as_bytes());

            // SAFETY: the config struct is fully initialised; the name and
            // PoP buffers are NUL-terminated and outlive the calls.
            unsafe {
                let mut cfg: wifi_prov_mgr_config_t = Default::default();
                cfg.scheme = wifi_prov_scheme_ble;
                cfg.scheme_event_handler = wifi_prov_event_handler_t {
                    event_cb: Some(wifi_prov_scheme_ble_event_cb_free_btdm),
                    user_data: core::ptr::null_mut(),
                };
                let rc = wifi_prov_mgr_init(cfg);
                if rc != ESP_OK as i32 {
                    return Err(LinkError::Driver(rc));
                }
                if let Some(uuid) = params.service_uuid {
                    let mut uuid = uuid;
                    wifi_prov_scheme_ble_set_service_uuid(uuid.as_mut_ptr());
                }
                let rc = wifi_prov_mgr_start_provisioning(
                    wifi_prov_security_WIFI_PROV_SECURITY_1,
                    pop.as_ptr().cast(),
                    name.as_ptr().cast(),
                    core::ptr::null(),
                );
                if rc != ESP_OK as i32 {
                    wifi_prov_mgr_deinit();
                    return Err(LinkError::Driver(rc));
                }
            }
            *self.provisioning.lock().unwrap_or_else(PoisonError::into_inner) = true;
            info!("WiFi(espidf): BLE provisioning as '{}'", params.device_name);
            Ok(())
        }

        fn stop_provisioning(&self) {
            let mut active = self.provisioning.lock().unwrap_or_else(PoisonError::into_inner);
            if *active {
                // SAFETY: only called while the manager is initialised.
                unsafe {
                    wifi_prov_mgr_stop_provisioning();
                    wifi_prov_mgr_deinit();
                }
                *active = false;
                warn!("WiFi(espidf): provisioning stopped");
            }
        }

        fn mac_address(&self) -> MacAddress {
            read_mac()
        }

        fn set_event_handler(&self, handler: Option<LinkEventHandler>) {
            let h = handler.map(Arc::new);
            match self.handler.write() {
                Ok(mut slot) => *slot = h,
                Err(poisoned) => *poisoned.into_inner() = h,
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
