//! ProbeLink firmware entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  EspLink        EspTimers      EspHttpClient   NvsAdapter      │
//! │  (LinkPort)     (TimerPort)    (HttpClient)    (Storage+Config)│
//! │  SystemClock    EspSystem      ReadingInbox    log_sink        │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ConnectionManager ──NetworkEvent──┐                           │
//! │                                    ├──▶ ControlQueue ──▶ Runtime│
//! │  CloudManager ───────CloudEvent────┘          (main loop)      │
//! └────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use anyhow::{Result, anyhow};
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::timer::EspTaskTimerService;
use log::{info, warn};

use probelink::adapters::http_client::EspHttpClient;
use probelink::adapters::log_sink;
use probelink::adapters::nvs::NvsAdapter;
use probelink::adapters::system::{EspSystem, ReadingInbox};
use probelink::adapters::time::SystemClock;
use probelink::adapters::timer::EspTimers;
use probelink::adapters::wifi::EspLink;
use probelink::app::commands::control_queue;
use probelink::app::events::{CloudEvent, NetworkEvent};
use probelink::app::ports::ConfigPort;
use probelink::app::runtime::{Runtime, wire};
use probelink::cloud::manager::{CloudDeps, CloudManager};
use probelink::config::ProbeConfig;
use probelink::events::LocalEventBus;
use probelink::net::ConnectionManager;
use probelink::net::types::ProvisioningConfig;
use probelink::{Error, power, survivable};

/// Main-loop period.
const LOOP_PERIOD_MS: u32 = 100;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_sys::link_patches();
    esp_idf_logger::init()?;

    info!("ProbeLink v{}", env!("CARGO_PKG_VERSION"));
    info!("Boot: {}", power::wake_reason());

    // ── 2. Config + persistent store ──────────────────────────
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let nvs = NvsAdapter::new(nvs_partition.clone());
    let config = match nvs.load() {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("Config load failed ({}), using defaults", e);
            ProbeConfig::default()
        }
    };

    // Zeroed on cold boot, kept across deep sleep.
    let token = survivable::claim_token_slot().ok_or_else(|| anyhow!("token slot already claimed"))?;
    if power::woke_from_deep_sleep() && token.expires_at().is_some() {
        info!("Boot: survivable session token present");
    }

    // ── 3. Adapters ───────────────────────────────────────────
    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;

    let link = Arc::new(
        EspLink::new(peripherals.modem, sysloop.clone(), Some(nvs_partition)).map_err(Error::from)?,
    );
    let timers = Arc::new(EspTimers::new(EspTaskTimerService::new()?));
    let http = Arc::new(EspHttpClient::new());
    let clock = Arc::new(SystemClock::new());

    let network_bus = Arc::new(LocalEventBus::<NetworkEvent>::new());
    let cloud_bus = Arc::new(LocalEventBus::<CloudEvent>::new());
    let _log_subs = log_sink::attach(network_bus.as_ref(), cloud_bus.as_ref());

    let queue = control_queue();
    let _control_subs = wire(network_bus.as_ref(), cloud_bus.as_ref(), &queue);

    // ── 4. Cloud session ──────────────────────────────────────
    let mut cloud = CloudManager::new(
        CloudDeps {
            http,
            clock,
            timers: timers.clone(),
            events: cloud_bus.clone(),
            control: queue.clone(),
            store: Box::new(nvs.clone()),
            token,
        },
        &config,
    );
    if let Err(e) = cloud.init() {
        warn!("Cloud: {}", e);
    }

    let inbox = ReadingInbox::new();
    let mut runtime = Runtime::new(queue, cloud, Box::new(inbox), Box::new(EspSystem::new()));

    // ── 5. Wireless link ──────────────────────────────────────
    let wifi = ConnectionManager::new(link.clone(), timers, network_bus.clone());
    wifi.init(Box::new(nvs), config.wifi).map_err(Error::from)?;

    if wifi.has_credentials() {
        wifi.connect().map_err(Error::from)?;
    } else {
        let pop = option_env!("PROBELINK_POP").unwrap_or("probe-setup");
        let prov = ProvisioningConfig::with_pop(pop).map_err(Error::from)?;
        wifi.start_provisioning(&prov).map_err(Error::from)?;
    }

    info!("System ready. Entering main loop.");

    // ── 6. Main loop ──────────────────────────────────────────
    loop {
        link.poll_provisioning();
        runtime.run_once();
        FreeRtos::delay_ms(LOOP_PERIOD_MS);
    }
}
