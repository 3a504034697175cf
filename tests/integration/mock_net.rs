//! Scripted backend and a fully wired device for integration tests.
//!
//! [`Backend`] answers HTTP requests from a queue and records every call.
//! [`Device`] assembles the same object graph the firmware builds in
//! `main`, but on simulated adapters and virtual time.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use probelink::adapters::nvs::NvsAdapter;
use probelink::adapters::system::{ReadingInbox, SimSystem};
use probelink::adapters::wifi::SimLink;
use probelink::app::commands::control_queue;
use probelink::app::events::{CloudEvent, NetworkEvent};
use probelink::app::ports::{EventBus, HttpClient, HttpResponse, Subscription};
use probelink::app::runtime::{Runtime, wire};
use probelink::cloud::credentials::DeviceIdentity;
use probelink::cloud::manager::{CloudDeps, CloudManager};
use probelink::config::{CloudConfig, ProbeConfig, RetryPolicy, WifiConfig};
use probelink::events::LocalEventBus;
use probelink::net::types::{ConnectionInfo, Credentials, LinkEvent};
use probelink::net::ConnectionManager;
use probelink::sim::{ManualClock, ManualTimers};
use probelink::survivable::{SurvivableToken, TokenSlot};
use probelink::transport::{ContentType, Method, TransportError};

pub const BASE_URL: &str = "http://backend.test";
pub const BOOT_MS: i64 = 1_750_000_000_000;

// ── Backend ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub method: Method,
    pub path: String,
    pub authorization: Option<String>,
}

/// Replies are consumed in order; an empty queue answers `200` with no
/// body.
#[derive(Default)]
pub struct Backend {
    replies: Mutex<VecDeque<Result<(u16, String), TransportError>>>,
    calls: Mutex<Vec<Call>>,
}

#[allow(dead_code)]
impl Backend {
    pub fn reply(&self, status: u16, body: &str) {
        self.replies.lock().unwrap().push_back(Ok((status, body.to_string())));
    }

    pub fn fail(&self, error: TransportError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    pub fn token(&self, token: &str, expires_in: u64) {
        self.reply(
            200,
            &format!(r#"{{"token":"{}","expires_in":{}}}"#, token, expires_in),
        );
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.path).collect()
    }

    pub fn count(&self, path: &str) -> usize {
        self.calls().iter().filter(|c| c.path == path).count()
    }
}

impl HttpClient for Backend {
    fn perform(
        &self,
        method: Method,
        url: &str,
        headers: &[(&str, &str)],
        _body: &[u8],
        _content_type: ContentType,
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.calls.lock().unwrap().push(Call {
            method,
            path: url.trim_start_matches(BASE_URL).to_string(),
            authorization: headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("authorization"))
                .map(|(_, v)| v.to_string()),
        });
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok((status, body))) => Ok(HttpResponse {
                status,
                body: body.into_bytes(),
            }),
            Some(Err(e)) => Err(e),
            None => Ok(HttpResponse {
                status: 200,
                body: Vec::new(),
            }),
        }
    }
}

// ── Device ────────────────────────────────────────────────────

pub struct Boot {
    pub wifi: Option<Credentials>,
    pub identity: Option<DeviceIdentity>,
    pub token: SurvivableToken,
    pub max_retries: u32,
}

impl Default for Boot {
    fn default() -> Self {
        Self {
            wifi: Some(Credentials::new("LabNet", "correct-horse").unwrap()),
            identity: DeviceIdentity::new("probe-0042", "s3cr3t-key"),
            token: SurvivableToken::zeroed(),
            max_retries: 0,
        }
    }
}

#[allow(dead_code)]
pub struct Device {
    pub backend: Arc<Backend>,
    pub link: Arc<SimLink>,
    pub timers: Arc<ManualTimers>,
    pub clock: Arc<ManualClock>,
    pub store: NvsAdapter,
    pub wifi: ConnectionManager,
    pub runtime: Runtime,
    pub system: SimSystem,
    pub inbox: ReadingInbox,
    pub network_events: Arc<Mutex<Vec<NetworkEvent>>>,
    pub cloud_events: Arc<Mutex<Vec<CloudEvent>>>,
    _subs: Vec<Subscription>,
}

fn recorder<E: Clone + Send + 'static>(
    bus: &dyn EventBus<E>,
) -> (Arc<Mutex<Vec<E>>>, Subscription) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let sub = bus.subscribe(Box::new(move |e: &E| sink.lock().unwrap().push(e.clone())));
    (seen, sub)
}

#[allow(dead_code)]
impl Device {
    pub fn boot(boot: Boot) -> Self {
        let backend = Arc::new(Backend::default());
        let link = Arc::new(SimLink::new());
        let timers = Arc::new(ManualTimers::new());
        let clock = Arc::new(ManualClock::new(BOOT_MS));
        let mut store = NvsAdapter::new();

        if let Some(identity) = &boot.identity {
            identity.save(&mut store).unwrap();
        }

        let network_bus = Arc::new(LocalEventBus::<NetworkEvent>::new());
        let cloud_bus = Arc::new(LocalEventBus::<CloudEvent>::new());
        let (network_events, s1) = recorder(network_bus.as_ref());
        let (cloud_events, s2) = recorder(cloud_bus.as_ref());
        let queue = control_queue();
        let (s3, s4) = wire(network_bus.as_ref(), cloud_bus.as_ref(), &queue);

        let mut config = ProbeConfig::default();
        config.cloud = CloudConfig::with_base_url(BASE_URL).unwrap();
        config.retry = RetryPolicy::none();
        config.wifi = WifiConfig {
            max_retries: boot.max_retries,
            ..WifiConfig::default()
        };

        let mut cloud = CloudManager::new(
            CloudDeps {
                http: backend.clone(),
                clock: clock.clone(),
                timers: timers.clone(),
                events: cloud_bus,
                control: queue.clone(),
                store: Box::new(store.clone()),
                token: TokenSlot::detached(boot.token),
            },
            &config,
        );
        let _ = cloud.init();

        let inbox = ReadingInbox::new();
        let system = SimSystem::new(store.clone());
        let runtime = Runtime::new(
            queue,
            cloud,
            Box::new(inbox.clone()),
            Box::new(system.clone()),
        );

        let wifi = ConnectionManager::new(link.clone(), timers.clone(), network_bus);
        wifi.init(Box::new(store.clone()), config.wifi).unwrap();
        if let Some(creds) = &boot.wifi {
            wifi.connect_with(creds).unwrap();
        }

        Self {
            backend,
            link,
            timers,
            clock,
            store,
            wifi,
            runtime,
            system,
            inbox,
            network_events,
            cloud_events,
            _subs: vec![s1, s2, s3, s4],
        }
    }

    /// Deliver an address and let the main loop react.
    pub fn link_up(&mut self) {
        self.link.emit(LinkEvent::GotIp(ConnectionInfo::default()));
        self.runtime.run_once();
    }

    pub fn link_lost(&mut self) {
        self.link.emit(LinkEvent::Disconnected { reason: 8 });
        self.runtime.run_once();
    }

    /// Move virtual time forward on both clock and timers, then drain.
    pub fn advance(&mut self, by: Duration) -> usize {
        self.clock.advance(by);
        self.timers.advance(by);
        self.runtime.run_once()
    }

    pub fn cloud_events(&self) -> Vec<CloudEvent> {
        self.cloud_events.lock().unwrap().clone()
    }

    pub fn network_events(&self) -> Vec<NetworkEvent> {
        self.network_events.lock().unwrap().clone()
    }
}

/// A token that is still valid `ttl` after boot.
pub fn surviving_token(value: &str, ttl: Duration) -> SurvivableToken {
    let mut t = SurvivableToken::zeroed();
    t.set(value, Some(BOOT_MS + ttl.as_millis() as i64)).unwrap();
    t
}
