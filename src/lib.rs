//! Autorank - keeps task ranks in order as the task store changes
//!
//! Webhooks from the task backend are turned into resorts of the affected
//! groupings. A local mirror of the store, kept current from its change
//! feed, lets each resort write back only the items whose rank changed.

pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod limiter;
pub mod mirror;
pub mod server;
pub mod sort;
pub mod store;
pub mod waiter;

pub use error::{ReconcileError, Result, StoreError};
