//! Profile merge resolver.
//!
//! [`reconcile`] is pure: scalar fields follow the side whose timestamp leads
//! by more than the skew margin (local otherwise), progress counters take the
//! max, unlock sets take the union. Applying it again with the same remote is
//! a no-op.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use super::echo::EchoSuppressor;
use crate::error::{Error, Result};
use crate::models::{MonotonicFields, ProfileSnapshot, SetFields};
use crate::storage::DurableStore;
use crate::util::duration_millis;

/// `remote` wins only when it leads `local` by strictly more than `skew_ms`.
pub fn remote_is_newer(remote: i64, local: i64, skew_ms: i64) -> bool {
    remote > local.saturating_add(skew_ms)
}

fn merge_progress(local: &MonotonicFields, remote: &MonotonicFields) -> MonotonicFields {
    let MonotonicFields {
        level,
        xp,
        total_coins,
        high_scores,
        longest_streak,
    } = local;

    let mut merged_scores = high_scores.clone();
    for (game, score) in &remote.high_scores {
        let best = merged_scores.entry(game.clone()).or_insert(*score);
        *best = (*best).max(*score);
    }

    MonotonicFields {
        level: (*level).max(remote.level),
        xp: (*xp).max(remote.xp),
        total_coins: (*total_coins).max(remote.total_coins),
        high_scores: merged_scores,
        longest_streak: (*longest_streak).max(remote.longest_streak),
    }
}

fn union(local: &BTreeSet<String>, remote: &BTreeSet<String>) -> BTreeSet<String> {
    local.union(remote).cloned().collect()
}

fn merge_unlocks(local: &SetFields, remote: &SetFields) -> SetFields {
    let SetFields {
        achievements,
        unlocked_skills,
    } = local;

    SetFields {
        achievements: union(achievements, &remote.achievements),
        unlocked_skills: union(unlocked_skills, &remote.unlocked_skills),
    }
}

/// Reconcile a local snapshot with a freshly observed remote one.
pub fn reconcile(
    local: &ProfileSnapshot,
    remote: &ProfileSnapshot,
    skew_margin: Duration,
) -> ProfileSnapshot {
    let remote_wins = remote_is_newer(
        remote.last_modified,
        local.last_modified,
        duration_millis(skew_margin),
    );
    reconcile_scalars_from(local, remote, remote_wins)
}

fn reconcile_scalars_from(
    local: &ProfileSnapshot,
    remote: &ProfileSnapshot,
    remote_wins: bool,
) -> ProfileSnapshot {
    let (scalars, last_writer) = if remote_wins {
        (remote.scalars.clone(), remote.last_writer.clone())
    } else {
        (local.scalars.clone(), local.last_writer.clone())
    };

    ProfileSnapshot {
        scalars,
        progress: merge_progress(&local.progress, &remote.progress),
        unlocks: merge_unlocks(&local.unlocks, &remote.unlocks),
        last_modified: local.last_modified.max(remote.last_modified),
        last_writer,
    }
}

/// Whether `local` holds something the remote document lacks.
///
/// Progress and unlock differences always count. Scalar differences count
/// only when the local copy is strictly newer; inside the skew margin two
/// devices may otherwise keep pushing their own scalars at each other.
pub fn remote_needs_update(merged: &ProfileSnapshot, remote: &ProfileSnapshot) -> bool {
    if merged.progress != remote.progress || merged.unlocks != remote.unlocks {
        return true;
    }
    merged.scalars != remote.scalars && merged.last_modified > remote.last_modified
}

/// Result of merging one remote change into the owned snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub snapshot: ProfileSnapshot,
    /// The local snapshot changed and was persisted
    pub changed: bool,
    /// The remote document is missing local state and should be rewritten
    pub needs_push: bool,
}

/// Sole owner of the in-memory profile snapshot.
///
/// All local edits and remote merges go through here so they serialize on one
/// lock, and a new snapshot replaces the old one only after it was persisted.
#[derive(Debug)]
pub struct MergeResolver {
    snapshot: Mutex<ProfileSnapshot>,
    /// Decides whether remote scalars override local ones
    authority: Arc<EchoSuppressor>,
}

/// A committed snapshot never moves `last_modified` backwards.
fn ensure_forward(current: &ProfileSnapshot, next: &ProfileSnapshot) -> Result<()> {
    if next.last_modified < current.last_modified {
        return Err(Error::StaleSnapshot {
            current: current.last_modified,
            incoming: next.last_modified,
        });
    }
    Ok(())
}

impl MergeResolver {
    pub fn new(initial: ProfileSnapshot, authority: Arc<EchoSuppressor>) -> Self {
        Self {
            snapshot: Mutex::new(initial),
            authority,
        }
    }

    pub async fn current(&self) -> ProfileSnapshot {
        self.snapshot.lock().await.clone()
    }

    /// Apply a local edit stamped at `now`.
    pub async fn apply_local<F>(
        &self,
        store: &dyn DurableStore,
        now: i64,
        mutate: F,
    ) -> Result<ProfileSnapshot>
    where
        F: FnOnce(&mut ProfileSnapshot) + Send,
    {
        let mut current = self.snapshot.lock().await;
        let mut next = current.clone();
        mutate(&mut next);
        next.touch(now);

        store.save_snapshot(&next).await?;
        *current = next.clone();
        Ok(next)
    }

    /// Reconcile `remote` into the owned snapshot.
    pub async fn merge_remote(
        &self,
        store: &dyn DurableStore,
        remote: &ProfileSnapshot,
    ) -> Result<MergeOutcome> {
        let mut current = self.snapshot.lock().await;
        let remote_wins = self
            .authority
            .is_authoritative(remote.last_modified, current.last_modified);
        let merged = reconcile_scalars_from(&current, remote, remote_wins);
        ensure_forward(&current, &merged)?;

        let changed = merged != *current;
        if changed {
            store.save_snapshot(&merged).await?;
            *current = merged.clone();
        }

        Ok(MergeOutcome {
            needs_push: remote_needs_update(&merged, remote),
            snapshot: merged,
            changed,
        })
    }
}
