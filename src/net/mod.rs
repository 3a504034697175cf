//! Wireless link: types and the connection manager.

pub mod connection;
pub mod types;

pub use connection::ConnectionManager;
pub use types::{ConnectionError, ConnectionInfo, ConnectionState, Credentials};
