// imgpipe Infrastructure - SQLite Adapter
// Implements: WorkSource, ResultLedger

mod catalog;
mod connection;
mod migration;

pub use catalog::{NewProduct, SqliteCatalog};
pub use connection::create_pool;
pub use migration::run_migrations;

// Note: sqlx::Error conversion is handled by wrapping in helper functions
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
