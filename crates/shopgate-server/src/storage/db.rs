//! Database connection and initialization.

pub use shopgate_core::db::DatabaseError;

shopgate_core::define_database!(Database, "Database migrations complete");
