//! libSQL-backed local persistence for savestate

mod connection;
mod durable_store;
mod migrations;

pub use connection::Database;
pub use durable_store::LibSqlDurableStore;
