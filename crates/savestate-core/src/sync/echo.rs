//! Echo suppression.
//!
//! Every write this client makes comes back through the remote watch. Treating
//! it as an external edit would re-merge it and possibly enqueue another
//! write, looping forever. A change is dropped when it carries this session's
//! writer tag, or when it arrives inside the grace window that follows a local
//! write. The window check is a heuristic: a genuine edit from another device
//! landing inside the window is dropped too, and is picked up by the next
//! change after the window closes.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use super::merge::remote_is_newer;
use super::watch::RemoteChange;
use crate::util::duration_millis;

const NO_LOCAL_WRITE: i64 = i64::MIN;

/// Why a remote change was (or was not) suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoVerdict {
    /// Tagged with this session's writer id
    SelfOrigin,
    /// Arrived within the grace window after a local write
    WithinGraceWindow,
    /// Genuine external change
    External,
}

#[derive(Debug)]
pub struct EchoSuppressor {
    session_id: String,
    grace_window_ms: i64,
    skew_margin_ms: i64,
    last_local_write: AtomicI64,
}

impl EchoSuppressor {
    pub fn new(session_id: impl Into<String>, grace_window: Duration, skew_margin: Duration) -> Self {
        Self {
            session_id: session_id.into(),
            grace_window_ms: duration_millis(grace_window),
            skew_margin_ms: duration_millis(skew_margin),
            last_local_write: AtomicI64::new(NO_LOCAL_WRITE),
        }
    }

    /// Writer tag stamped on documents written by this session.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Record that this client is about to write (or just wrote) remotely.
    pub fn mark_local_write(&self, now: i64) {
        self.last_local_write.fetch_max(now, Ordering::SeqCst);
    }

    pub fn last_local_write(&self) -> Option<i64> {
        match self.last_local_write.load(Ordering::SeqCst) {
            NO_LOCAL_WRITE => None,
            at => Some(at),
        }
    }

    pub fn classify(&self, change: &RemoteChange, now: i64) -> EchoVerdict {
        if change.origin() == Some(self.session_id.as_str()) {
            return EchoVerdict::SelfOrigin;
        }
        if let Some(written_at) = self.last_local_write() {
            if now.saturating_sub(written_at) < self.grace_window_ms {
                return EchoVerdict::WithinGraceWindow;
            }
        }
        EchoVerdict::External
    }

    /// Boolean form of [`Self::classify`] for callers that do not need the reason.
    pub fn should_ignore(&self, change: &RemoteChange, now: i64) -> bool {
        self.classify(change, now) != EchoVerdict::External
    }

    /// Whether a remote timestamp is far enough ahead to override local scalars.
    ///
    /// [`super::MergeResolver`] consults this for every remote merge.
    pub fn is_authoritative(&self, remote_modified: i64, local_modified: i64) -> bool {
        remote_is_newer(remote_modified, local_modified, self.skew_margin_ms)
    }
}
