use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use scm_sync_core::{Cursor, CursorStats, CursorStore, CursorStoreError, PhysicalJobType, RepoId, should_advance};

/// In-memory [`CursorStore`]; enforces the same monotone-advancement
/// predicate the Postgres implementation enforces under `SELECT ... FOR
/// UPDATE`.
#[derive(Default)]
pub struct FakeCursorStore {
    rows: Mutex<HashMap<(RepoId, PhysicalJobType), (Cursor, CursorStats)>>,
}

impl FakeCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for FakeCursorStore {
    async fn load(
        &self,
        repo_id: RepoId,
        job_type: PhysicalJobType,
    ) -> Result<(Cursor, CursorStats), CursorStoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(&(repo_id, job_type))
            .cloned()
            .unwrap_or((Cursor::Empty, CursorStats::new())))
    }

    async fn save(
        &self,
        repo_id: RepoId,
        job_type: PhysicalJobType,
        new_cursor: Cursor,
        stats: CursorStats,
    ) -> Result<bool, CursorStoreError> {
        let mut rows = self.rows.lock().unwrap();
        let key = (repo_id, job_type);
        let current = rows.get(&key).map(|(c, _)| c.clone()).unwrap_or(Cursor::Empty);
        if !should_advance(&new_cursor, &current) {
            return Ok(false);
        }
        rows.insert(key, (new_cursor, stats));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_is_a_noop_when_not_advancing() {
        let store = FakeCursorStore::new();
        let repo_id = RepoId(1);
        let job_type = PhysicalJobType::Svn;
        assert!(store.save(repo_id, job_type, Cursor::Revision(5), CursorStats::new()).await.unwrap());
        assert!(!store.save(repo_id, job_type, Cursor::Revision(3), CursorStats::new()).await.unwrap());
        let (cursor, _) = store.load(repo_id, job_type).await.unwrap();
        assert_eq!(cursor.as_revision(), Some(5));
    }

    #[tokio::test]
    async fn load_of_unknown_key_is_empty_not_an_error() {
        let store = FakeCursorStore::new();
        let (cursor, stats) = store.load(RepoId(9), PhysicalJobType::GitlabCommits).await.unwrap();
        assert!(cursor.is_empty());
        assert!(stats.is_empty());
    }
}
