//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter       | Implements          | Connects to                  |
//! |---------------|---------------------|------------------------------|
//! | `device_id`   | (helpers)           | eFuse MAC                    |
//! | `http_client` | HttpClient          | esp_http_client / TcpStream  |
//! | `log_sink`    | EventBus subscriber | Serial log output            |
//! | `nvs`         | ConfigPort          | NVS / in-memory store        |
//! |               | StoragePort         |                              |
//! | `system`      | SystemPort          | esp_restart / NVS erase      |
//! |               | MeasurementSource   | shared reading inbox         |
//! | `time`        | ClockPort           | gettimeofday / SystemTime    |
//! | `timer`       | TimerPort           | esp_timer task / threads     |
//! | `wifi`        | LinkPort            | ESP-IDF WiFi STA + prov mgr  |

pub mod device_id;
pub mod http_client;
pub mod log_sink;
pub mod nvs;
pub mod system;
pub mod time;
pub mod timer;
pub mod wifi;
