//! In-memory session store.

use super::{CasOutcome, SessionStore, StoreError, ensure_monotonic};
use crate::state::{ChatId, Session};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// DashMap-backed store. Sessions are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: DashMap<ChatId, Session>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chats with a stored session.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self, chat_id: ChatId) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.get(&chat_id).map(|s| s.value().clone()))
    }

    async fn compare_and_swap(
        &self,
        chat_id: ChatId,
        expected_version: u64,
        session: &Session,
    ) -> Result<CasOutcome, StoreError> {
        ensure_monotonic(expected_version, session)?;

        match self.sessions.entry(chat_id) {
            Entry::Occupied(mut stored) => {
                let actual = stored.get().version;
                if actual != expected_version {
                    return Ok(CasOutcome::VersionConflict { actual });
                }
                stored.insert(session.clone());
            }
            Entry::Vacant(slot) => {
                if expected_version != 0 {
                    return Ok(CasOutcome::VersionConflict { actual: 0 });
                }
                slot.insert(session.clone());
            }
        }
        Ok(CasOutcome::Swapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SessionState;

    fn session(chat_id: ChatId, version: u64) -> Session {
        let mut s = Session::idle(chat_id, 12);
        s.state = SessionState::Open;
        s.version = version;
        s
    }

    #[tokio::test]
    async fn missing_chat_loads_none() {
        let store = MemoryStore::new();
        assert!(store.load(1).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn first_write_requires_version_zero() {
        let store = MemoryStore::new();
        assert_eq!(
            store.compare_and_swap(1, 3, &session(1, 4)).await.unwrap(),
            CasOutcome::VersionConflict { actual: 0 }
        );
        assert_eq!(
            store.compare_and_swap(1, 0, &session(1, 1)).await.unwrap(),
            CasOutcome::Swapped
        );
        assert_eq!(store.load(1).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn stale_expectation_conflicts() {
        let store = MemoryStore::new();
        store.compare_and_swap(1, 0, &session(1, 1)).await.unwrap();
        store.compare_and_swap(1, 1, &session(1, 2)).await.unwrap();

        assert_eq!(
            store.compare_and_swap(1, 1, &session(1, 2)).await.unwrap(),
            CasOutcome::VersionConflict { actual: 2 }
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn non_advancing_version_is_refused() {
        let store = MemoryStore::new();
        let err = store.compare_and_swap(1, 0, &session(1, 0)).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::NonMonotonic {
                expected: 0,
                proposed: 0
            }
        ));
    }
}
