//! Results of a reconciliation run.

use serde::{Deserialize, Serialize};

use crate::error::{ReconcileError, Result};

/// What a successful run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    /// Nothing relevant changed; no write was made
    Unchanged { last_seq: String },
    /// Groupings were resorted
    Resorted {
        /// Documents written back
        updated: usize,
        /// Documents in the resorted groupings
        affected: usize,
        last_seq: String,
    },
}

impl Report {
    pub fn last_seq(&self) -> &str {
        match self {
            Report::Unchanged { last_seq } | Report::Resorted { last_seq, .. } => last_seq,
        }
    }

    /// Documents written back
    pub fn updated(&self) -> usize {
        match self {
            Report::Unchanged { .. } => 0,
            Report::Resorted { updated, .. } => *updated,
        }
    }
}

/// Result record returned to webhook callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
}

impl Outcome {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    /// Summarise a run. Every message ends with the feed position, taken from
    /// the report or, for failures, from `last_seq`.
    pub fn from_result(result: &Result<Report>, last_seq: &str) -> Self {
        match result {
            Ok(Report::Unchanged { last_seq }) => Self {
                success: true,
                message: format!("No relevant updates, last_seq = {}", last_seq),
            },
            Ok(Report::Resorted {
                updated,
                affected,
                last_seq,
            }) => Self {
                success: true,
                message: format!("Updated {}/{} docs, last_seq = {}", updated, affected, last_seq),
            },
            Err(err @ ReconcileError::ConsistencyTimeout { .. }) => Self::failure(err.to_string()),
            Err(err) => Self::failure(format!("{}, last_seq = {}", err, last_seq)),
        }
    }
}
