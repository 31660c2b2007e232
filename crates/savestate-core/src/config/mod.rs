//! Sync engine configuration.
//!
//! Provides a `SyncConfig` struct shared by the service and the CLI. Every
//! field has a default so a partial (or empty) JSON document is valid. The
//! echo grace window and skew margin are heuristics and deliberately tunable.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::normalize_text_option;

const DEFAULT_PROFILE_COLLECTION: &str = "profiles";
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 30_000;
const DEFAULT_ECHO_GRACE_WINDOW_MS: u64 = 10_000;
const DEFAULT_SKEW_MARGIN_MS: u64 = 5_000;
const DEFAULT_SAVE_DEBOUNCE_MS: u64 = 2_000;
const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Tunables for one profile sync session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct SyncConfig {
    /// Remote collection holding profile documents
    pub profile_collection: String,
    /// Profile document id (usually the account id)
    pub profile_doc_id: Option<String>,
    /// Failed attempts before an operation is dead-lettered
    pub max_retries: u32,
    /// Delay before a retry pass after failures
    pub retry_backoff_ms: u64,
    /// Window after a local write during which remote changes are echoes
    pub echo_grace_window_ms: u64,
    /// Minimum lead a remote timestamp needs to win scalar fields
    pub skew_margin_ms: u64,
    /// Coalescing window for local mutations before a cloud save
    pub save_debounce_ms: u64,
    /// Buffer size of the engine event channel
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            profile_collection: DEFAULT_PROFILE_COLLECTION.to_string(),
            profile_doc_id: None,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            echo_grace_window_ms: DEFAULT_ECHO_GRACE_WINDOW_MS,
            skew_margin_ms: DEFAULT_SKEW_MARGIN_MS,
            save_debounce_ms: DEFAULT_SAVE_DEBOUNCE_MS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SyncConfig {
    /// Create a config for the given profile document with default tunables.
    pub fn for_profile(doc_id: impl Into<String>) -> Self {
        Self {
            profile_doc_id: Some(doc_id.into()),
            ..Self::default()
        }
    }

    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub const fn echo_grace_window(&self) -> Duration {
        Duration::from_millis(self.echo_grace_window_ms)
    }

    pub const fn skew_margin(&self) -> Duration {
        Duration::from_millis(self.skew_margin_ms)
    }

    pub const fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    /// Profile document id, or an error when none is configured.
    pub fn require_profile_doc_id(&self) -> Result<String> {
        normalize_text_option(self.profile_doc_id.clone())
            .ok_or_else(|| Error::Config("profile_doc_id is required".to_string()))
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.profile_collection.trim().is_empty() {
            return Err(Error::Config(
                "profile_collection must not be empty".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(Error::Config(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply `SAVESTATE_*` duration overrides from the environment.
    ///
    /// Unparseable values are logged and ignored.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        let overrides: [(&str, &mut u64); 4] = [
            ("SAVESTATE_RETRY_BACKOFF_MS", &mut self.retry_backoff_ms),
            ("SAVESTATE_ECHO_GRACE_WINDOW_MS", &mut self.echo_grace_window_ms),
            ("SAVESTATE_SKEW_MARGIN_MS", &mut self.skew_margin_ms),
            ("SAVESTATE_SAVE_DEBOUNCE_MS", &mut self.save_debounce_ms),
        ];
        for (name, slot) in overrides {
            let Ok(raw) = std::env::var(name) else {
                continue;
            };
            match raw.trim().parse::<u64>() {
                Ok(value) => *slot = value,
                Err(error) => tracing::warn!("Ignoring {name}={raw:?}: {error}"),
            }
        }
        self
    }
}

/// Parse and validate a sync config from a raw JSON payload.
pub fn parse_sync_config(payload: &str) -> Result<SyncConfig> {
    let config: SyncConfig = serde_json::from_str(payload)
        .map_err(|error| Error::Config(format!("invalid sync config JSON: {error}")))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_document_uses_defaults() {
        let config = parse_sync_config("{}").unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_backoff(), Duration::from_secs(30));
        assert_eq!(config.echo_grace_window(), Duration::from_secs(10));
        assert_eq!(config.skew_margin(), Duration::from_secs(5));
        assert_eq!(config.save_debounce(), Duration::from_secs(2));
    }

    #[test]
    fn parse_rejects_unknown_fields() {
        let error = parse_sync_config(r#"{ "max_retires": 5 }"#).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn parse_rejects_zero_retries() {
        let error = parse_sync_config(r#"{ "max_retries": 0 }"#).unwrap_err();
        assert!(error.to_string().contains("max_retries"));
    }

    #[test]
    fn parse_keeps_partial_overrides() {
        let config = parse_sync_config(
            r#"{ "profile_doc_id": "player-1", "skew_margin_ms": 0, "echo_grace_window_ms": 250 }"#,
        )
        .unwrap();
        assert_eq!(config.profile_doc_id.as_deref(), Some("player-1"));
        assert_eq!(config.skew_margin(), Duration::ZERO);
        assert_eq!(config.echo_grace_window(), Duration::from_millis(250));
        assert_eq!(config.profile_collection, "profiles");
    }

    #[test]
    fn require_profile_doc_id_rejects_blank() {
        let config = SyncConfig {
            profile_doc_id: Some("  ".to_string()),
            ..SyncConfig::default()
        };
        assert!(config.require_profile_doc_id().is_err());
        assert_eq!(
            SyncConfig::for_profile("abc").require_profile_doc_id().unwrap(),
            "abc"
        );
    }
}
