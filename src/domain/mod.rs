//! Domain types for autorank
//!
//! - Item: a task or category document from the remote store
//! - Change / FeedEvent: entries of the remote change feed
//! - Selector: which documents a store query returns

pub mod change;
pub mod item;

pub use change::{Change, ChangesPage, FeedEvent, RevRef, Selector, WriteResult};
pub use item::{
    CATEGORIES_KIND, EMPTY_NOTE, INBOX_GROUP, Item, MIRRORED_KINDS, TASKS_KIND, fields,
};
