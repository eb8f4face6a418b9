//! Shopgate Access-Control Server Library
//!
//! Core functionality for the Shopgate server:
//! - SQLite storage for admins, users, resources, and the access ledger
//! - WebSocket protocol dispatcher for devices and admin dashboards
//! - RFID scan decision engine with machine usage sessions
//! - Connection registry and heartbeat liveness monitor
//! - Event fan-out to connected admin observers

pub mod broadcast;
pub mod engine;
pub mod monitor;
pub mod registry;
pub mod server;
pub mod storage;
