//! Redb-backed durable session store.
//!
//! # Schema
//!
//! ```text
//! SESSIONS: chat_id (i64) -> Session (serde_json)
//! ```
//!
//! The version check and the insert run inside one write transaction;
//! redb serializes write transactions, so the check cannot race another
//! writer. Blocking redb calls run on the blocking pool.
//!
//! A write whose caller stopped waiting (the attempt timed out) is aborted
//! instead of committed. The check and the commit share a lock with the
//! caller's drop, so a timed-out write has either landed before the caller
//! moves on or never lands.

use super::{CasOutcome, SessionStore, StoreError, ensure_monotonic};
use crate::state::{ChatId, Session};
use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Deserialize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

const SESSIONS: TableDefinition<i64, &[u8]> = TableDefinition::new("sessions");

/// The part of a stored record the version check needs.
#[derive(Deserialize)]
struct StoredVersion {
    version: u64,
}

/// Shared between one write and its caller; `true` once the caller is gone.
#[derive(Debug, Default)]
struct WriteGate(Mutex<bool>);

impl WriteGate {
    /// Run `commit` unless the caller is gone. Holds the gate throughout.
    fn commit_unless_abandoned(
        &self,
        commit: impl FnOnce() -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let abandoned = self
            .0
            .lock()
            .map_err(|_| StoreError::Unavailable("write gate poisoned".to_string()))?;
        if *abandoned {
            return Err(StoreError::Abandoned);
        }
        commit()
    }
}

/// Closes the gate when the caller's future is dropped, waiting out a
/// commit already in progress.
struct AbandonOnDrop(Arc<WriteGate>);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        let mut abandoned = match self.0.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *abandoned = true;
    }
}

pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create the database file and its sessions table.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(SESSIONS)?;
        txn.commit()?;

        info!(path = %path.display(), "session store opened");
        Ok(Self { db: Arc::new(db) })
    }

    fn load_blocking(db: &Database, chat_id: ChatId) -> Result<Option<Session>, StoreError> {
        let txn = db.begin_read()?;
        let table = txn.open_table(SESSIONS)?;
        let session = match table.get(chat_id)? {
            Some(raw) => Some(serde_json::from_slice(raw.value())?),
            None => None,
        };
        Ok(session)
    }

    fn swap_blocking(
        db: &Database,
        chat_id: ChatId,
        expected_version: u64,
        encoded: &[u8],
        gate: &WriteGate,
    ) -> Result<CasOutcome, StoreError> {
        let txn = db.begin_write()?;
        let outcome = {
            let mut table = txn.open_table(SESSIONS)?;
            let actual = match table.get(chat_id)? {
                Some(raw) => serde_json::from_slice::<StoredVersion>(raw.value())?.version,
                None => 0,
            };
            if actual == expected_version {
                table.insert(chat_id, encoded)?;
                CasOutcome::Swapped
            } else {
                CasOutcome::VersionConflict { actual }
            }
        };

        match outcome {
            CasOutcome::Swapped => {
                gate.commit_unless_abandoned(|| txn.commit().map_err(StoreError::from))?
            }
            CasOutcome::VersionConflict { .. } => txn.abort()?,
        }
        Ok(outcome)
    }
}

#[async_trait]
impl SessionStore for RedbStore {
    async fn load(&self, chat_id: ChatId) -> Result<Option<Session>, StoreError> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || Self::load_blocking(&db, chat_id))
            .await
            .map_err(|e| StoreError::TaskJoin(e.to_string()))?
    }

    async fn compare_and_swap(
        &self,
        chat_id: ChatId,
        expected_version: u64,
        session: &Session,
    ) -> Result<CasOutcome, StoreError> {
        ensure_monotonic(expected_version, session)?;
        let encoded = serde_json::to_vec(session)?;

        let db = Arc::clone(&self.db);
        let gate = Arc::new(WriteGate::default());
        let _abandon = AbandonOnDrop(Arc::clone(&gate));
        tokio::task::spawn_blocking(move || {
            Self::swap_blocking(&db, chat_id, expected_version, &encoded, &gate)
        })
        .await
        .map_err(|e| StoreError::TaskJoin(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Entry, EntryKind, SessionState};
    use chrono::Utc;

    fn open_session(chat_id: ChatId, version: u64) -> Session {
        let mut s = Session::idle(chat_id, 12);
        s.state = SessionState::Open;
        s.version = version;
        s
    }

    #[tokio::test]
    async fn roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.redb");

        {
            let store = RedbStore::open(&path).unwrap();
            let mut session = open_session(-100, 1);
            session.roster.push(Entry {
                actor_id: 42,
                display_name: "alice".into(),
                kind: EntryKind::WithGuest,
                rating: 7,
                joined_at: Utc::now(),
            });
            assert_eq!(
                store.compare_and_swap(-100, 0, &session).await.unwrap(),
                CasOutcome::Swapped
            );
        }

        let store = RedbStore::open(&path).unwrap();
        let loaded = store.load(-100).await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.roster.len(), 1);
        assert_eq!(loaded.used_slots(), 2);
        assert!(store.load(-101).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn conflict_leaves_record_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("s.redb")).unwrap();

        store.compare_and_swap(1, 0, &open_session(1, 1)).await.unwrap();
        store.compare_and_swap(1, 1, &open_session(1, 2)).await.unwrap();

        let mut stale = open_session(1, 2);
        stale.state = SessionState::Cancelled;
        assert_eq!(
            store.compare_and_swap(1, 1, &stale).await.unwrap(),
            CasOutcome::VersionConflict { actual: 2 }
        );
        assert_eq!(
            store.compare_and_swap(1, 0, &open_session(1, 5)).await.unwrap(),
            CasOutcome::VersionConflict { actual: 2 }
        );

        let loaded = store.load(1).await.unwrap().unwrap();
        assert_eq!(loaded.state, SessionState::Open);
        assert_eq!(loaded.version, 2);
    }

    #[tokio::test]
    async fn abandoned_write_is_not_committed() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("s.redb")).unwrap();
        let encoded = serde_json::to_vec(&open_session(3, 1)).unwrap();

        let gate = WriteGate::default();
        *gate.0.lock().unwrap() = true;

        let err = RedbStore::swap_blocking(&store.db, 3, 0, &encoded, &gate).unwrap_err();
        assert!(matches!(err, StoreError::Abandoned));
        assert!(store.load(3).await.unwrap().is_none());

        // An open gate commits as usual.
        let gate = WriteGate::default();
        let outcome = RedbStore::swap_blocking(&store.db, 3, 0, &encoded, &gate).unwrap();
        assert_eq!(outcome, CasOutcome::Swapped);
        assert_eq!(store.load(3).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn dropping_the_caller_closes_the_gate() {
        let gate = Arc::new(WriteGate::default());
        drop(AbandonOnDrop(Arc::clone(&gate)));
        let err = gate.commit_unless_abandoned(|| Ok(())).unwrap_err();
        assert!(matches!(err, StoreError::Abandoned));
    }

    #[tokio::test]
    async fn missing_record_conflicts_on_nonzero_expectation() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("s.redb")).unwrap();
        assert_eq!(
            store.compare_and_swap(9, 4, &open_session(9, 5)).await.unwrap(),
            CasOutcome::VersionConflict { actual: 0 }
        );
    }
}
