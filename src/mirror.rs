//! Local mirror of the remote store.
//!
//! The mirror holds every task and category document keyed by id. It is
//! filled once at startup and afterwards only changed by applying change
//! feed entries (plus the engine's own successful writes). It never invents
//! documents; if it is lost it can be rebuilt with [`SyncState::bootstrap`].

use std::collections::{BTreeSet, HashMap};

use log::{debug, info};

use crate::domain::{Change, Item, Selector};
use crate::error::StoreError;
use crate::store::ThrottledStore;

/// In-memory cache of mirrored documents
#[derive(Debug, Clone, Default)]
pub struct Mirror {
    items: HashMap<String, Item>,
}

impl Mirror {
    /// Create an empty mirror
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a mirror from already-fetched documents, keeping mirrored kinds only
    pub fn from_items(items: impl IntoIterator<Item = Item>) -> Self {
        let mut mirror = Self::new();
        for item in items {
            mirror.upsert(item);
        }
        mirror
    }

    /// Fill the mirror with every document of a mirrored kind
    pub async fn bootstrap(remote: &ThrottledStore) -> Result<Self, StoreError> {
        let items = remote.query(&Selector::mirrored()).await?;
        let mirror = Self::from_items(items);
        info!("Mirror bootstrapped with {} documents", mirror.len());
        Ok(mirror)
    }

    /// Bring the mirror up to date with a batch of changes.
    ///
    /// Updated documents are re-fetched in one query; deletions are dropped.
    /// Applying the same batch twice leaves the mirror unchanged.
    pub async fn apply(&mut self, changes: &[Change], remote: &ThrottledStore) -> Result<(), StoreError> {
        let refreshed: BTreeSet<&str> = changes
            .iter()
            .filter(|c| !c.deleted)
            .map(|c| c.id.as_str())
            .collect();

        if !refreshed.is_empty() {
            let selector = Selector::IdIn(refreshed.iter().map(|id| id.to_string()).collect());
            let docs = remote.query(&selector).await?;
            debug!("Refreshed {} of {} changed documents", docs.len(), refreshed.len());
            for doc in docs {
                self.upsert(doc);
            }
        }

        for change in changes.iter().filter(|c| c.deleted) {
            if self.items.remove(&change.id).is_some() {
                debug!("Removed deleted document {}", change.id);
            }
        }
        Ok(())
    }

    /// Insert or replace a document; documents of other kinds are ignored
    pub fn upsert(&mut self, item: Item) -> bool {
        if !item.is_mirrored_kind() {
            return false;
        }
        self.items.insert(item.id.clone(), item);
        true
    }

    pub fn get(&self, id: &str) -> Option<&Item> {
        self.items.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    /// Every document matching `predicate`, in no particular order
    pub fn values_where<'a, P>(&'a self, predicate: P) -> impl Iterator<Item = &'a Item> + 'a
    where
        P: Fn(&Item) -> bool + 'a,
    {
        self.items.values().filter(move |item| predicate(item))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// The mirror together with the feed position it reflects.
///
/// The two always move together: whoever holds a `&mut SyncState` advances
/// the cursor only after the matching changes have been applied.
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    pub mirror: Mirror,
    /// Feed position up to which changes have been applied
    pub last_seq: String,
}

impl SyncState {
    /// Read the current feed position, then load every mirrored document
    pub async fn bootstrap(remote: &ThrottledStore) -> Result<Self, StoreError> {
        let last_seq = remote.update_seq().await?;
        let mirror = Mirror::bootstrap(remote).await?;
        Ok(Self { mirror, last_seq })
    }
}
