//! In-process RemoteStore with a change log, for tests
//!
//! Behaves like a single-node document store: every write bumps the
//! document's revision and appends to the change feed. Call counters let
//! tests assert which remote operations a reconciliation performed.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use super::{FeedStream, RemoteStore};
use crate::domain::{Change, ChangesPage, FeedEvent, Item, Selector, WriteResult};
use crate::error::StoreError;

/// Number of calls made to each store operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub queries: usize,
    pub gets: usize,
    pub bulk_updates: usize,
    pub changes_since: usize,
    pub continuous_feeds: usize,
    /// Documents submitted across all bulk updates
    pub docs_written: usize,
}

#[derive(Debug, Default)]
struct Inner {
    docs: BTreeMap<String, Item>,
    log: Vec<Change>,
    failing_ids: HashSet<String>,
    hang_feed: bool,
    calls: CallCounts,
}

impl Inner {
    fn next_seq(&self) -> u64 {
        self.log.len() as u64 + 1
    }

    /// Store `item` under a fresh revision and log the change
    fn write(&mut self, mut item: Item) -> String {
        let generation = self
            .docs
            .get(&item.id)
            .and_then(|doc| doc.rev.as_deref())
            .and_then(|rev| rev.split('-').next())
            .and_then(|n| n.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        let seq = self.next_seq();
        let rev = format!("{}-{:04x}", generation, seq);
        item.rev = Some(rev.clone());
        self.log.push(Change::updated(seq.to_string(), item.id.clone(), rev.clone()));
        self.docs.insert(item.id.clone(), item);
        rev
    }

    fn changes_after(&self, since: &str) -> Vec<Change> {
        let since: u64 = since.parse().unwrap_or(0);
        self.log.iter().skip(since as usize).cloned().collect()
    }

    fn last_seq(&self) -> String {
        self.log.len().to_string()
    }
}

/// In-memory document store
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or overwrite a document, returning its new revision
    pub fn put(&self, item: Item) -> String {
        self.inner().write(item)
    }

    /// Delete a document and log a deletion change
    pub fn delete(&self, id: &str) {
        let mut inner = self.inner();
        if inner.docs.remove(id).is_some() {
            let seq = inner.next_seq();
            inner.log.push(Change::deletion(seq.to_string(), id, format!("del-{}", seq)));
        }
    }

    /// Current version of a document
    pub fn doc(&self, id: &str) -> Option<Item> {
        self.inner().docs.get(id).cloned()
    }

    /// Make bulk writes of `id` fail
    pub fn fail_writes_for(&self, id: &str) {
        self.inner().failing_ids.insert(id.to_string());
    }

    /// Keep continuous feeds open forever instead of ending with a marker
    pub fn hang_feed(&self, hang: bool) {
        self.inner().hang_feed = hang;
    }

    /// Current feed position
    pub fn current_seq(&self) -> String {
        self.inner().last_seq()
    }

    /// Snapshot of the call counters
    pub fn calls(&self) -> CallCounts {
        self.inner().calls
    }

    /// Reset the call counters
    pub fn reset_calls(&self) {
        self.inner().calls = CallCounts::default();
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn update_seq(&self) -> Result<String, StoreError> {
        Ok(self.inner().last_seq())
    }

    async fn query(&self, selector: &Selector) -> Result<Vec<Item>, StoreError> {
        let mut inner = self.inner();
        inner.calls.queries += 1;
        Ok(inner.docs.values().filter(|doc| selector.matches(doc)).cloned().collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Item>, StoreError> {
        let mut inner = self.inner();
        inner.calls.gets += 1;
        Ok(inner.docs.get(id).cloned())
    }

    async fn bulk_update(&self, items: &[Item]) -> Result<Vec<WriteResult>, StoreError> {
        let mut inner = self.inner();
        inner.calls.bulk_updates += 1;
        inner.calls.docs_written += items.len();

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let current_rev = inner.docs.get(&item.id).and_then(|doc| doc.rev.clone());
            let conflict = current_rev.is_some() && current_rev != item.rev;
            if conflict || inner.failing_ids.contains(&item.id) {
                results.push(WriteResult {
                    id: item.id.clone(),
                    ok: false,
                    rev: None,
                });
                continue;
            }
            let rev = inner.write(item.clone());
            results.push(WriteResult {
                id: item.id.clone(),
                ok: true,
                rev: Some(rev),
            });
        }
        Ok(results)
    }

    async fn changes_since(&self, since: &str) -> Result<ChangesPage, StoreError> {
        let mut inner = self.inner();
        inner.calls.changes_since += 1;
        Ok(ChangesPage {
            results: inner.changes_after(since),
            last_seq: inner.last_seq(),
        })
    }

    async fn changes_continuous(&self, since: &str, _timeout: Duration) -> Result<FeedStream, StoreError> {
        let mut inner = self.inner();
        inner.calls.continuous_feeds += 1;

        let changes: Vec<Result<FeedEvent, StoreError>> =
            inner.changes_after(since).into_iter().map(|c| Ok(FeedEvent::Change(c))).collect();
        let body = stream::iter(changes);

        if inner.hang_feed {
            Ok(body.chain(stream::pending::<Result<FeedEvent, StoreError>>()).boxed())
        } else {
            let marker = Ok(FeedEvent::LastSeq(inner.last_seq()));
            Ok(body.chain(stream::once(async move { marker })).boxed())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str) -> Item {
        Item::new(id).with_kind("Tasks").in_group("p1")
    }

    #[test]
    fn test_put_bumps_revision() {
        let store = MemoryStore::new();
        let first = store.put(task("a"));
        let second = store.put(store.doc("a").unwrap());
        assert!(first.starts_with("1-"));
        assert!(second.starts_with("2-"));
        assert_eq!(store.current_seq(), "2");
    }

    #[tokio::test]
    async fn test_changes_since_skips_earlier_entries() {
        let store = MemoryStore::new();
        store.put(task("a"));
        store.put(task("b"));
        store.delete("a");

        let page = store.changes_since("1").await.unwrap();
        assert_eq!(page.last_seq, "3");
        assert_eq!(page.results.len(), 2);
        assert_eq!(page.results[0].id, "b");
        assert!(page.results[1].deleted);
    }

    #[tokio::test]
    async fn test_continuous_feed_ends_with_marker() {
        let store = MemoryStore::new();
        store.put(task("a"));

        let events: Vec<FeedEvent> = store
            .changes_continuous("0", Duration::from_millis(10))
            .await
            .unwrap()
            .map(|e| e.unwrap())
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], FeedEvent::LastSeq("1".to_string()));
        assert_eq!(store.calls().continuous_feeds, 1);
    }

    #[tokio::test]
    async fn test_bulk_update_reports_conflicts_and_injected_failures() {
        let store = MemoryStore::new();
        store.put(task("a"));
        store.put(task("b"));
        store.fail_writes_for("b");

        let stale = task("a").with_rev("0-stale");
        let fresh_b = store.doc("b").unwrap();
        let new_c = task("c");

        let results = store.bulk_update(&[stale, fresh_b, new_c]).await.unwrap();
        assert_eq!(results.iter().map(|r| r.ok).collect::<Vec<_>>(), vec![false, false, true]);
        assert!(results[2].rev.is_some());
        assert_eq!(store.calls().docs_written, 3);
    }

    #[tokio::test]
    async fn test_query_filters_by_selector() {
        let store = MemoryStore::new();
        store.put(task("a"));
        store.put(Item::new("s").with_kind("Settings"));

        let items = store.query(&Selector::mirrored()).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "a");
    }
}
