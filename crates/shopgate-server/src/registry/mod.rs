//! In-memory registry of online device connections.

mod connection;

pub use connection::{DeviceConnection, DeviceRegistry, Outbound, next_conn_id};
