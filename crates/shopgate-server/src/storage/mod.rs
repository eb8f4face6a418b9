//! SQLite storage for the Shopgate server.
//!
//! Two contracts live here: the credential store (admins, users,
//! resources, permissions) and the access ledger (attempt records and
//! machine usage sessions).

mod db;
mod models;
mod queries;


pub use db::{Database, DatabaseError};
pub use models::*;
pub use queries::{NewAttempt, REASON_SESSION_COMPLETED, REASON_SESSION_ENDED};
