//! savestate-core - Core library for savestate
//!
//! This crate contains the profile models, durable storage, the remote store
//! boundary and the offline-tolerant sync engine used by every savestate
//! client.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod state;
pub mod storage;
pub mod sync;
pub mod util;

pub use config::{parse_sync_config, SyncConfig};
pub use error::{Error, RemoteError, Result};
pub use models::{DeadLetter, Operation, OperationId, ProfileSnapshot};
pub use services::{ProfileSyncService, RemoteApply};
pub use state::SyncStatus;
