//! Durable session storage.
//!
//! One record per chat, keyed by `chat_id`, holding the serde_json encoded
//! [`Session`]. The only write path is [`SessionStore::compare_and_swap`],
//! which succeeds only when the stored version equals the caller's
//! expectation. Callers never write directly; they go through
//! [`retry::read_transform_write`], which reloads on version conflicts and
//! backs off on transient failures.
//!
//! # Backends
//!
//! - [`RedbStore`]: embedded durable KV
//! - [`MemoryStore`]: DashMap, for tests and ephemeral deployments

mod memory;
mod redb;
pub mod retry;

pub use self::memory::MemoryStore;
pub use self::redb::RedbStore;
pub use retry::{Committed, RetryError, RetryPolicy, read_transform_write};

use crate::state::{ChatId, Session};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors from the session store. All of them are treated as transient by
/// the retry loop.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] ::redb::Error),

    #[error("database error: {0}")]
    Database(#[from] ::redb::DatabaseError),

    #[error("table error: {0}")]
    Table(#[from] ::redb::TableError),

    #[error("storage error: {0}")]
    Storage(#[from] ::redb::StorageError),

    #[error("transaction error: {0}")]
    Transaction(#[from] ::redb::TransactionError),

    #[error("commit error: {0}")]
    Commit(#[from] ::redb::CommitError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("store task failed: {0}")]
    TaskJoin(String),

    #[error("proposed version {proposed} does not follow {expected}")]
    NonMonotonic { expected: u64, proposed: u64 },

    #[error("write abandoned before commit")]
    Abandoned,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The record now holds the new session.
    Swapped,
    /// Another writer got there first; `actual` is the stored version
    /// (0 when no record exists).
    VersionConflict { actual: u64 },
}

/// Keyed session storage with optimistic concurrency.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the session for a chat, if one was ever written.
    async fn load(&self, chat_id: ChatId) -> Result<Option<Session>, StoreError>;

    /// Replace the session for a chat if its stored version equals
    /// `expected_version`. An `expected_version` of 0 requires that no record
    /// exists. `session.version` must be greater than `expected_version`.
    ///
    /// Once the returned future is dropped the write must either have
    /// committed already or never commit.
    async fn compare_and_swap(
        &self,
        chat_id: ChatId,
        expected_version: u64,
        session: &Session,
    ) -> Result<CasOutcome, StoreError>;
}

/// Reject writes that would not advance the version.
fn ensure_monotonic(expected: u64, session: &Session) -> Result<(), StoreError> {
    if session.version <= expected {
        return Err(StoreError::NonMonotonic {
            expected,
            proposed: session.version,
        });
    }
    Ok(())
}
