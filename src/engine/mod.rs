//! Reconciliation engine
//!
//! Turns webhook events into rank rewrites. Each handler works out which
//! groupings the event can affect, waits until the edit is visible locally,
//! resorts those groupings and writes back only the items whose rank (or
//! empty note) needs fixing, in one bulk write.
//!
//! Runs are serialized: the mirror and its feed cursor sit behind one async
//! mutex held for the whole run, so two webhooks never interleave feed reads.

mod report;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::config::ReconcileConfig;
use crate::domain::{Change, INBOX_GROUP, Item, fields};
use crate::error::{ReconcileError, Result, StoreError};
use crate::limiter::RateLimiter;
use crate::mirror::{Mirror, SyncState};
use crate::sort::{SortPipeline, StrategyConfig};
use crate::store::{RemoteStore, ThrottledStore};
use crate::waiter::{ChangeWaiter, item_deleted, item_exists, revision_landed};

pub use report::{Outcome, Report};

/// Id of the settings document holding label definitions
pub const LABELS_DOC_ID: &str = "strategySettings.labels";

/// Keeps groupings ranked as the remote store changes
pub struct ReconcileEngine {
    remote: ThrottledStore,
    pipeline: SortPipeline,
    relevant_fields: BTreeSet<String>,
    update_timeout: Duration,
    state: Mutex<SyncState>,
}

impl std::fmt::Debug for ReconcileEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileEngine")
            .field("pipeline", &self.pipeline)
            .field("update_timeout", &self.update_timeout)
            .finish_non_exhaustive()
    }
}

impl ReconcileEngine {
    /// Resolve label titles, bootstrap the mirror and build the engine
    pub async fn start(store: Arc<dyn RemoteStore>, config: &ReconcileConfig) -> Result<Self> {
        let remote = ThrottledStore::new(store, Arc::new(RateLimiter::from_qps(config.qps_rate_limit)));

        let titles = if config.sort.iter().any(StrategyConfig::uses_labels) {
            fetch_label_titles(&remote).await?
        } else {
            HashMap::new()
        };
        let pipeline = SortPipeline::resolve(&config.sort, &titles);

        let state = SyncState::bootstrap(&remote).await?;
        info!(
            "Engine ready: {} mirrored documents, last_seq = {}",
            state.mirror.len(),
            state.last_seq
        );
        Ok(Self::with_state(remote, pipeline, config.update_timeout(), state))
    }

    /// Build an engine around an already-bootstrapped state
    pub fn with_state(remote: ThrottledStore, pipeline: SortPipeline, update_timeout: Duration, state: SyncState) -> Self {
        Self {
            relevant_fields: pipeline.relevant_fields(),
            remote,
            pipeline,
            update_timeout,
            state: Mutex::new(state),
        }
    }

    /// Fields whose change triggers a resort
    pub fn relevant_fields(&self) -> &BTreeSet<String> {
        &self.relevant_fields
    }

    /// Current feed cursor
    pub async fn last_seq(&self) -> String {
        self.state.lock().await.last_seq.clone()
    }

    /// Copy of the mirror and cursor
    pub async fn snapshot(&self) -> SyncState {
        self.state.lock().await.clone()
    }

    /// Summarise a handler result for the caller
    pub async fn outcome(&self, result: &Result<Report>) -> Outcome {
        let last_seq = match result {
            Ok(report) => report.last_seq().to_string(),
            Err(_) => self.last_seq().await,
        };
        Outcome::from_result(result, &last_seq)
    }

    /// An item was edited; `changed_fields` are the wire names that changed
    pub async fn on_edit(&self, item: &Item, changed_fields: &[String]) -> Result<Report> {
        let changed: BTreeSet<&str> = changed_fields.iter().map(String::as_str).collect();
        if !changed.iter().any(|field| self.relevant_fields.contains(*field)) {
            debug!("Edit of {} touched no sort field ({:?})", item.id, changed);
            return Ok(Report::Unchanged {
                last_seq: self.last_seq().await,
            });
        }
        require_id(item)?;
        let group = require_group(item)?;

        let mut state = self.state.lock().await;
        // The mirror still has the old grouping until the wait applies the edit
        let previous_group = if changed.contains(fields::GROUP) {
            state.mirror.get(&item.id).and_then(|old| old.group_id.clone())
        } else {
            None
        };

        self.wait_for(&mut state, item, revision_landed).await?;

        let mut groups = BTreeSet::from([group.to_string()]);
        groups.extend(previous_group);
        if changed.contains(fields::DONE) {
            groups.extend(dependent_groups(&state.mirror, &item.id));
        }
        self.resort_locked(&mut state, groups).await
    }

    /// A new item was created
    pub async fn on_add(&self, item: &Item) -> Result<Report> {
        require_id(item)?;
        let group = match item.group() {
            Some(group) if !group.is_empty() && group != INBOX_GROUP => group.to_string(),
            _ => {
                debug!("{} was added to the inbox, nothing to rank", item.id);
                return Ok(Report::Unchanged {
                    last_seq: self.last_seq().await,
                });
            }
        };

        let mut state = self.state.lock().await;
        self.wait_for(&mut state, item, item_exists).await?;
        self.resort_locked(&mut state, BTreeSet::from([group])).await
    }

    /// An item was marked done
    pub async fn on_mark_done(&self, item: &Item) -> Result<Report> {
        require_id(item)?;
        let group = require_group(item)?;

        let mut state = self.state.lock().await;
        self.wait_for(&mut state, item, revision_landed).await?;

        let mut groups = BTreeSet::from([group.to_string()]);
        groups.extend(dependent_groups(&state.mirror, &item.id));
        self.resort_locked(&mut state, groups).await
    }

    /// An item was deleted
    pub async fn on_delete(&self, item: &Item) -> Result<Report> {
        require_id(item)?;
        let group = require_group(item)?;

        let mut state = self.state.lock().await;
        self.wait_for(&mut state, item, item_deleted).await?;

        let mut groups = BTreeSet::from([group.to_string()]);
        groups.extend(dependent_groups(&state.mirror, &item.id));
        self.resort_locked(&mut state, groups).await
    }

    /// Catch up with every pending change, then resort every category
    pub async fn on_full_resync(&self) -> Result<Report> {
        let mut state = self.state.lock().await;

        let page = self.remote.changes_since(&state.last_seq).await?;
        debug!("Full resync: {} pending changes", page.results.len());
        state.mirror.apply(&page.results, &self.remote).await?;
        state.last_seq = page.last_seq;

        let groups: BTreeSet<String> = state
            .mirror
            .values_where(Item::is_category)
            .map(|category| category.id.clone())
            .collect();
        self.resort_locked(&mut state, groups).await
    }

    /// Resort `groups` and write back what changed
    pub async fn resort_groupings(&self, groups: BTreeSet<String>) -> Result<Report> {
        let mut state = self.state.lock().await;
        self.resort_locked(&mut state, groups).await
    }

    async fn wait_for<P>(&self, state: &mut SyncState, item: &Item, predicate: P) -> Result<()>
    where
        P: Fn(&Item, &Mirror, &[Change]) -> bool,
    {
        let outcome = ChangeWaiter::new(&self.remote, self.update_timeout)
            .wait_until(state, item, predicate)
            .await?;
        if outcome.is_satisfied() {
            Ok(())
        } else {
            Err(ReconcileError::ConsistencyTimeout {
                last_seq: state.last_seq.clone(),
            })
        }
    }

    async fn resort_locked(&self, state: &mut SyncState, mut groups: BTreeSet<String>) -> Result<Report> {
        groups.remove(INBOX_GROUP);

        let mut staged: Vec<Item> = Vec::new();
        let mut affected = 0;
        for group in &groups {
            let members: Vec<Item> = state
                .mirror
                .values_where(|item| item.group() == Some(group.as_str()))
                .cloned()
                .collect();
            affected += members.len();

            let ordered = self.pipeline.sort(members, &state.mirror);
            for (index, mut item) in ordered.into_iter().enumerate() {
                let rank = (index + 1) as f64;
                let empty_note = item.has_empty_note();
                if item.rank != Some(rank) || empty_note {
                    item.rank = Some(rank);
                    if empty_note {
                        item.note = None;
                    }
                    staged.push(item);
                }
            }
        }

        if staged.is_empty() {
            debug!("Groupings {:?} already in order", groups);
            return Ok(Report::Unchanged {
                last_seq: state.last_seq.clone(),
            });
        }

        let attempted = staged.len();
        let results = self.remote.bulk_update(&staged).await?;
        let mut succeeded = 0;
        for (mut item, result) in staged.into_iter().zip(&results) {
            if result.ok {
                if result.rev.is_some() {
                    item.rev = result.rev.clone();
                }
                state.mirror.upsert(item);
                succeeded += 1;
            } else {
                warn!("Write of {} failed", result.id);
            }
        }

        if succeeded < attempted {
            warn!("Only {}/{} docs written, resync to confirm state", succeeded, attempted);
            return Err(ReconcileError::RemoteWrite { attempted, succeeded });
        }

        info!(
            "Resorted {} groupings: updated {}/{} docs, last_seq = {}",
            groups.len(),
            succeeded,
            affected,
            state.last_seq
        );
        Ok(Report::Resorted {
            updated: succeeded,
            affected,
            last_seq: state.last_seq.clone(),
        })
    }
}

/// Load the label title → id map from the settings document
pub async fn fetch_label_titles(remote: &ThrottledStore) -> std::result::Result<HashMap<String, String>, StoreError> {
    let Some(settings) = remote.get(LABELS_DOC_ID).await? else {
        warn!("No {} document, label sorting will match nothing", LABELS_DOC_ID);
        return Ok(HashMap::new());
    };

    let titles: HashMap<String, String> = settings
        .extra
        .get("val")
        .and_then(|val| val.as_array())
        .into_iter()
        .flatten()
        .filter_map(|label| {
            let id = label.get(fields::ID)?.as_str()?;
            let title = label.get("title")?.as_str()?;
            Some((title.to_string(), id.to_string()))
        })
        .collect();
    debug!("Resolved {} label titles", titles.len());
    Ok(titles)
}

/// Groupings holding an item that depends on `id`
fn dependent_groups(mirror: &Mirror, id: &str) -> Vec<String> {
    mirror
        .values_where(|item| item.depends_on(id))
        .filter_map(|item| item.group_id.clone())
        .collect()
}

fn require_id(item: &Item) -> Result<()> {
    if item.id.trim().is_empty() {
        return Err(ReconcileError::Validation("missing _id".to_string()));
    }
    Ok(())
}

fn require_group(item: &Item) -> Result<&str> {
    item.group()
        .filter(|group| !group.is_empty())
        .ok_or_else(|| ReconcileError::Validation(format!("{} has no parentId", item.id)))
}
