//! Player profile snapshot model
//!
//! Fields are grouped by merge class so the resolver can treat each group
//! exhaustively: scalars are last-writer-wins, progress counters never
//! decrease, and unlock sets only grow.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::FieldMap;

/// Last-writer-wins fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScalarFields {
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub title: Option<String>,
}

/// Counters that only move up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MonotonicFields {
    pub level: u32,
    pub xp: u64,
    pub total_coins: u64,
    /// Best score per game id
    pub high_scores: BTreeMap<String, u64>,
    pub longest_streak: u32,
}

impl MonotonicFields {
    /// Keep `score` if it beats the stored best for `game`.
    pub fn record_high_score(&mut self, game: impl Into<String>, score: u64) {
        let best = self.high_scores.entry(game.into()).or_insert(0);
        *best = (*best).max(score);
    }
}

/// Permanent unlocks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SetFields {
    pub achievements: BTreeSet<String>,
    pub unlocked_skills: BTreeSet<String>,
}

/// Reconciled profile state as stored locally and remotely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProfileSnapshot {
    #[serde(flatten)]
    pub scalars: ScalarFields,
    #[serde(flatten)]
    pub progress: MonotonicFields,
    #[serde(flatten)]
    pub unlocks: SetFields,
    /// Timestamp of the latest local edit or merge decision (Unix ms)
    pub last_modified: i64,
    /// Session that produced this version, used to recognise echoes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_writer: Option<String>,
}

impl ProfileSnapshot {
    /// Empty profile stamped at `now`.
    #[must_use]
    pub fn new(now: i64) -> Self {
        Self {
            last_modified: now,
            ..Self::default()
        }
    }

    /// Advance `last_modified` for a local edit; never moves it backwards.
    pub fn touch(&mut self, now: i64) {
        self.last_modified = now.max(self.last_modified.saturating_add(1));
    }

    /// Compare the mergeable content, ignoring timestamps and writer tags.
    pub fn same_content(&self, other: &Self) -> bool {
        self.scalars == other.scalars
            && self.progress == other.progress
            && self.unlocks == other.unlocks
    }

    /// Flatten into the remote document representation.
    pub fn to_fields(&self) -> serde_json::Result<FieldMap> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(serde::ser::Error::custom(format!(
                "profile serialized to non-object value: {other}"
            ))),
        }
    }

    /// Parse a remote document. Missing fields take their defaults.
    pub fn from_fields(fields: FieldMap) -> serde_json::Result<Self> {
        serde_json::from_value(serde_json::Value::Object(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn touch_only_moves_forward() {
        let mut profile = ProfileSnapshot::new(1_000);
        profile.touch(500);
        assert_eq!(profile.last_modified, 1_001);
        profile.touch(5_000);
        assert_eq!(profile.last_modified, 5_000);
    }

    #[test]
    fn fields_use_flat_camel_case_layout() {
        let mut profile = ProfileSnapshot::new(42);
        profile.scalars.display_name = Some("Ada".to_string());
        profile.progress.xp = 150;
        profile.progress.record_high_score("tetris", 9_000);
        profile.unlocks.achievements.insert("first-win".to_string());

        let fields = profile.to_fields().unwrap();
        assert_eq!(fields.get("displayName"), Some(&json!("Ada")));
        assert_eq!(fields.get("xp"), Some(&json!(150)));
        assert_eq!(fields.get("highScores"), Some(&json!({ "tetris": 9000 })));
        assert_eq!(fields.get("lastModified"), Some(&json!(42)));
        assert!(!fields.contains_key("lastWriter"));

        let parsed = ProfileSnapshot::from_fields(fields).unwrap();
        assert_eq!(parsed, profile);
    }

    #[test]
    fn partial_remote_document_fills_defaults() {
        let fields = json!({ "xp": 120, "lastModified": 7, "lastWriter": "device-b" })
            .as_object()
            .cloned()
            .unwrap();
        let profile = ProfileSnapshot::from_fields(fields).unwrap();
        assert_eq!(profile.progress.xp, 120);
        assert_eq!(profile.progress.level, 0);
        assert!(profile.unlocks.achievements.is_empty());
        assert_eq!(profile.last_writer.as_deref(), Some("device-b"));
    }

    #[test]
    fn record_high_score_keeps_best() {
        let mut progress = MonotonicFields::default();
        progress.record_high_score("snake", 40);
        progress.record_high_score("snake", 10);
        assert_eq!(progress.high_scores.get("snake"), Some(&40));
    }

    #[test]
    fn same_content_ignores_timestamps() {
        let mut a = ProfileSnapshot::new(1);
        let mut b = ProfileSnapshot::new(99);
        b.last_writer = Some("other".to_string());
        assert!(a.same_content(&b));
        a.progress.level = 2;
        assert!(!a.same_content(&b));
    }
}
