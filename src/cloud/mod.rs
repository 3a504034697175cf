//! Backend session layer.
//!
//! | Module        | Role                                              |
//! |---------------|---------------------------------------------------|
//! | `auth`        | Token lifecycle against `/auth/*`                 |
//! | `client`      | Authenticated request execution, status mapping   |
//! | `commands`    | Pending-command polling, parsing and acks         |
//! | `credentials` | Device identity in persistent storage             |
//! | `dispatch`    | Handler table and built-in command actions        |
//! | `endpoints`   | REST paths and status codes                       |
//! | `manager`     | Session state machine and periodic work           |
//! | `telemetry`   | Measurement batch upload                          |

pub mod auth;
pub mod client;
pub mod commands;
pub mod credentials;
pub mod dispatch;
pub mod endpoints;
pub mod manager;
pub mod telemetry;

pub use auth::{AuthError, AuthProvider, AuthSession, AuthState};
pub use client::{CloudClient, CloudError};
pub use manager::{CloudDeps, CloudManager, SessionState};
