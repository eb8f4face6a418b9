//! Shopgate core library.
//!
//! Shared plumbing for the Shopgate access-control server:
//! - SQLite pool helpers and the `define_database!` macro
//! - millisecond timestamps for session accounting
//! - API-key, resource-id, and password-hash helpers

pub mod auth;
pub mod db;
