//! Remote store access.
//!
//! The remote document store is reached through the [`RemoteStore`] trait:
//! - **CouchStore**: the real backend over HTTP (CouchDB `_find`, `_bulk_docs`, `_changes`)
//! - **MemoryStore**: an in-process store with a change log, for tests
//!   (built with `cfg(test)` or the `test-util` feature)
//! - **ThrottledStore**: any store behind the shared rate limiter
//!
//! # Example
//!
//! ```ignore
//! use autorank::store::{CouchStore, RemoteStore};
//! use autorank::domain::Selector;
//!
//! let store = CouchStore::new(&config.store)?;
//! let items = store.query(&Selector::mirrored()).await?;
//! ```

mod couch;
#[cfg(any(test, feature = "test-util"))]
mod memory;
mod throttled;

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::domain::{ChangesPage, FeedEvent, Item, Selector, WriteResult};
use crate::error::StoreError;

pub use couch::CouchStore;
#[cfg(any(test, feature = "test-util"))]
pub use memory::{CallCounts, MemoryStore};
pub use throttled::ThrottledStore;

/// Lazily consumed continuous change feed
pub type FeedStream = BoxStream<'static, Result<FeedEvent, StoreError>>;

/// Narrow interface to the remote document store
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Current feed position of the database
    async fn update_seq(&self) -> Result<String, StoreError>;

    /// All documents matching `selector`
    async fn query(&self, selector: &Selector) -> Result<Vec<Item>, StoreError>;

    /// A single document, `None` when it does not exist
    async fn get(&self, id: &str) -> Result<Option<Item>, StoreError>;

    /// Write `items` in one batch; results are order-correlated with the input
    async fn bulk_update(&self, items: &[Item]) -> Result<Vec<WriteResult>, StoreError>;

    /// Every change after `since` that is currently available
    async fn changes_since(&self, since: &str) -> Result<ChangesPage, StoreError>;

    /// Changes after `since` as they arrive. The stream ends with a
    /// [`FeedEvent::LastSeq`] once `timeout` passes without new changes.
    async fn changes_continuous(&self, since: &str, timeout: Duration) -> Result<FeedStream, StoreError>;
}
