//! Wire message types for the Shopgate WebSocket protocol.
//!
//! Devices (door controllers, machine interlocks) and admin dashboards
//! exchange JSON messages over a persistent WebSocket connection. Every
//! message carries a string `type` tag; the enums here are the closed
//! set of known message kinds, so an unknown tag fails deserialization
//! instead of being silently routed.

pub mod messages;

pub use messages::{
    AdminDescriptor, AdminEvent, ClientMessage, ConnectionStatus, DeviceStatusEntry,
    ResourceDescriptor, ResourceKind, ServerMessage,
};
