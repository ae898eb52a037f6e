use async_trait::async_trait;
use scm_sync_core::{RepoId, RepoInfo, RepoStore, RepoStoreError, RepoType, normalize_repo_url};
use sqlx::{PgPool, Row};

#[derive(Clone)]
pub struct PgRepoStore {
    pool: PgPool,
}

impl PgRepoStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RepoStore for PgRepoStore {
    async fn ensure_repo(
        &self,
        repo_type: RepoType,
        url: &str,
        project_key: &str,
        default_branch: Option<&str>,
    ) -> Result<RepoId, RepoStoreError> {
        let normalized = normalize_repo_url(url);
        let row = sqlx::query(
            r#"
            INSERT INTO repos (repo_type, url, project_key, default_branch)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (repo_type, url) DO UPDATE SET project_key = repos.project_key
            RETURNING repo_id
            "#,
        )
        .bind(repo_type.to_string())
        .bind(&normalized)
        .bind(project_key)
        .bind(default_branch)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepoStoreError::Storage(e.into()))?;

        Ok(RepoId(row.get("repo_id")))
    }

    async fn get(&self, repo_id: RepoId) -> Result<Option<RepoInfo>, RepoStoreError> {
        let row = sqlx::query(
            "SELECT repo_id, repo_type, url, project_key, default_branch, created_at FROM repos WHERE repo_id = $1",
        )
        .bind(repo_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepoStoreError::Storage(e.into()))?;

        row.map(|row| {
            let repo_type: String = row.get("repo_type");
            Ok(RepoInfo {
                repo_id,
                repo_type: repo_type.parse().unwrap_or(RepoType::Git),
                url: row.get("url"),
                project_key: row.get("project_key"),
                default_branch: row.get("default_branch"),
                created_at: row.get("created_at"),
            })
        })
        .transpose()
    }
}
