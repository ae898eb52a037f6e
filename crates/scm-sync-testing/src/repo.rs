use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use scm_sync_core::{RepoId, RepoInfo, RepoStore, RepoStoreError, RepoType, normalize_repo_url};

use crate::clock::VirtualClock;

#[derive(Default)]
struct State {
    by_id: HashMap<RepoId, RepoInfo>,
    by_key: HashMap<(RepoType, String), RepoId>,
    next_id: i64,
}

/// In-memory [`RepoStore`]; mirrors the `(repo_type, url)` upsert contract
/// without a database round trip.
pub struct FakeRepoStore {
    state: Mutex<State>,
    clock: Arc<VirtualClock>,
}

impl FakeRepoStore {
    pub fn new(clock: Arc<VirtualClock>) -> Self {
        Self { state: Mutex::new(State { next_id: 1, ..Default::default() }), clock }
    }
}

#[async_trait]
impl RepoStore for FakeRepoStore {
    async fn ensure_repo(
        &self,
        repo_type: RepoType,
        url: &str,
        project_key: &str,
        default_branch: Option<&str>,
    ) -> Result<RepoId, RepoStoreError> {
        let normalized = normalize_repo_url(url);
        let mut state = self.state.lock().unwrap();
        let key = (repo_type, normalized.clone());
        if let Some(repo_id) = state.by_key.get(&key) {
            return Ok(*repo_id);
        }
        let repo_id = RepoId(state.next_id);
        state.next_id += 1;
        let now = self.clock.now();
        state.by_key.insert(key, repo_id);
        state.by_id.insert(
            repo_id,
            RepoInfo {
                repo_id,
                repo_type,
                url: normalized,
                project_key: project_key.to_string(),
                default_branch: default_branch.map(str::to_string),
                created_at: now,
            },
        );
        Ok(repo_id)
    }

    async fn get(&self, repo_id: RepoId) -> Result<Option<RepoInfo>, RepoStoreError> {
        Ok(self.state.lock().unwrap().by_id.get(&repo_id).cloned())
    }
}

impl Default for FakeRepoStore {
    fn default() -> Self {
        Self::new(Arc::new(VirtualClock::new(Utc::now())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_repo_is_idempotent_on_natural_key() {
        let store = FakeRepoStore::default();
        let a = store.ensure_repo(RepoType::Git, "https://gitlab.example.com/g/p/", "proj", None).await.unwrap();
        let b = store.ensure_repo(RepoType::Git, "https://gitlab.example.com/g/p", "proj", None).await.unwrap();
        assert_eq!(a, b);
    }
}
