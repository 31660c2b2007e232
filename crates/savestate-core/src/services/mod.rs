//! Session services shared across clients.

mod profile_sync;

pub use profile_sync::{ProfileSyncService, RemoteApply};
