//! Waiting for an edit to become visible.
//!
//! A webhook can arrive before the edit it describes shows up in the mirror.
//! [`ChangeWaiter`] first checks whether the edit is already visible and,
//! if not, drains the change feed until a caller-supplied predicate holds or
//! the timeout passes. Whatever changes were seen are applied to the mirror
//! in one batch, whatever the outcome.
//!
//! # States
//!
//! ```text
//! Idle → Satisfied                      (already visible, no remote call)
//! Idle → Waiting → Satisfied | TimedOut
//! ```

use std::time::Duration;

use futures::StreamExt;
use log::{debug, warn};
use tokio::time::Instant;

use crate::domain::{Change, FeedEvent, Item};
use crate::error::StoreError;
use crate::mirror::{Mirror, SyncState};
use crate::store::ThrottledStore;

/// Time allowed past the feed timeout for the store's end-of-feed marker
const MARKER_GRACE: Duration = Duration::from_secs(1);

/// Progress of a wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    /// Nothing checked yet
    Idle,
    /// Reading the change feed
    Waiting,
    /// The predicate holds
    Satisfied,
    /// The feed ran dry or the deadline passed first
    TimedOut,
}

/// Result of [`ChangeWaiter::wait_until`]
#[derive(Debug, Clone)]
pub struct WaitOutcome {
    pub state: WaitState,
    /// Changes read from the feed during the wait
    pub changes: Vec<Change>,
}

impl WaitOutcome {
    pub fn is_satisfied(&self) -> bool {
        self.state == WaitState::Satisfied
    }
}

/// The edit's revision is in the mirror, or a change produced it
pub fn revision_landed(edited: &Item, mirror: &Mirror, changes: &[Change]) -> bool {
    let mirrored_rev = mirror.get(&edited.id).and_then(|item| item.rev.as_ref());
    if mirrored_rev == edited.rev.as_ref() {
        return true;
    }
    match &edited.rev {
        Some(rev) => changes.iter().any(|c| c.id == edited.id && c.has_rev(rev)),
        None => false,
    }
}

/// The item exists in the mirror, or a change mentions it
pub fn item_exists(edited: &Item, mirror: &Mirror, changes: &[Change]) -> bool {
    mirror.contains(&edited.id) || changes.iter().any(|c| c.id == edited.id)
}

/// The item is gone from the mirror, or a deletion change for it was seen
pub fn item_deleted(edited: &Item, mirror: &Mirror, changes: &[Change]) -> bool {
    !mirror.contains(&edited.id) || changes.iter().any(|c| c.id == edited.id && c.deleted)
}

/// Drains the change feed until an edit is visible
#[derive(Debug)]
pub struct ChangeWaiter<'a> {
    remote: &'a ThrottledStore,
    timeout: Duration,
}

impl<'a> ChangeWaiter<'a> {
    pub fn new(remote: &'a ThrottledStore, timeout: Duration) -> Self {
        Self { remote, timeout }
    }

    /// Wait until `is_satisfied(edited, mirror, changes)` holds.
    ///
    /// Returns `Ok` with a non-satisfied outcome on timeout; `Err` only when
    /// the store itself fails. The cursor in `state` is advanced to the last
    /// position observed, and only once the observed changes are applied.
    pub async fn wait_until<P>(
        &self,
        state: &mut SyncState,
        edited: &Item,
        is_satisfied: P,
    ) -> Result<WaitOutcome, StoreError>
    where
        P: Fn(&Item, &Mirror, &[Change]) -> bool,
    {
        if is_satisfied(edited, &state.mirror, &[]) {
            debug!("{} already visible, not waiting", edited.id);
            return Ok(WaitOutcome {
                state: WaitState::Satisfied,
                changes: Vec::new(),
            });
        }

        let deadline = Instant::now() + self.timeout + MARKER_GRACE;
        let mut feed = self.remote.changes_continuous(&state.last_seq, self.timeout).await?;
        let mut changes: Vec<Change> = Vec::new();
        let mut observed_seq: Option<String> = None;
        let mut feed_error: Option<StoreError> = None;
        let mut wait = WaitState::Waiting;

        while wait == WaitState::Waiting {
            match tokio::time::timeout_at(deadline, feed.next()).await {
                Ok(Some(Ok(FeedEvent::Change(change)))) => {
                    debug!("feed change {} at {}", change.id, change.seq);
                    observed_seq = Some(change.seq.clone());
                    changes.push(change);
                    if is_satisfied(edited, &state.mirror, &changes) {
                        wait = WaitState::Satisfied;
                    }
                }
                Ok(Some(Ok(FeedEvent::LastSeq(seq)))) => {
                    debug!("feed exhausted at {}", seq);
                    observed_seq = Some(seq);
                    wait = WaitState::TimedOut;
                }
                Ok(Some(Err(err))) => {
                    feed_error = Some(err);
                    wait = WaitState::TimedOut;
                }
                Ok(None) | Err(_) => wait = WaitState::TimedOut,
            }
        }
        drop(feed);
        self.remote.limiter().touch().await;

        state.mirror.apply(&changes, self.remote).await?;
        if let Some(seq) = observed_seq {
            state.last_seq = seq;
        }
        if let Some(err) = feed_error {
            return Err(err);
        }

        // The predicate also reads the mirror, which only now reflects the batch.
        if wait != WaitState::Satisfied && is_satisfied(edited, &state.mirror, &changes) {
            wait = WaitState::Satisfied;
        }
        if wait != WaitState::Satisfied {
            warn!(
                "{} not visible after {:?}, last_seq = {}",
                edited.id, self.timeout, state.last_seq
            );
        }

        Ok(WaitOutcome { state: wait, changes })
    }
}
