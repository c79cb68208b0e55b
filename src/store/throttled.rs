//! Rate-limited handle to the remote store

use std::sync::Arc;
use std::time::Duration;

use super::{FeedStream, RemoteStore};
use crate::domain::{ChangesPage, Item, Selector, WriteResult};
use crate::error::StoreError;
use crate::limiter::RateLimiter;

/// A [`RemoteStore`] whose every call passes through one shared [`RateLimiter`]
#[derive(Clone)]
pub struct ThrottledStore {
    store: Arc<dyn RemoteStore>,
    limiter: Arc<RateLimiter>,
}

impl std::fmt::Debug for ThrottledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottledStore")
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

impl ThrottledStore {
    pub fn new(store: Arc<dyn RemoteStore>, limiter: Arc<RateLimiter>) -> Self {
        Self { store, limiter }
    }

    /// The shared limiter
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub async fn update_seq(&self) -> Result<String, StoreError> {
        self.limiter.invoke(|| self.store.update_seq()).await
    }

    pub async fn query(&self, selector: &Selector) -> Result<Vec<Item>, StoreError> {
        self.limiter.invoke(|| self.store.query(selector)).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Item>, StoreError> {
        self.limiter.invoke(|| self.store.get(id)).await
    }

    pub async fn bulk_update(&self, items: &[Item]) -> Result<Vec<WriteResult>, StoreError> {
        self.limiter.invoke(|| self.store.bulk_update(items)).await
    }

    pub async fn changes_since(&self, since: &str) -> Result<ChangesPage, StoreError> {
        self.limiter.invoke(|| self.store.changes_since(since)).await
    }

    /// Opening the feed is rate limited; draining it is not
    pub async fn changes_continuous(&self, since: &str, timeout: Duration) -> Result<FeedStream, StoreError> {
        self.limiter
            .invoke(|| self.store.changes_continuous(since, timeout))
            .await
    }
}
