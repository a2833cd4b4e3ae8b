//! Tag repository.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::debug;

use super::job_tx::JobTxOps;
use crate::database::models::{Tag, TagDbModel};
use crate::database::{DbPool, WritePool};
use crate::{Error, Result};

/// Tag repository trait.
///
/// Tags reference durable job identifiers only; a job must have left the
/// cache table before it can be tagged.
#[async_trait]
pub trait TagRepository: Send + Sync {
    async fn create_tag(&self, tag_type: &str, name: &str, scope: &str) -> Result<i64>;
    async fn tag_id(&self, tag_type: &str, name: &str, scope: &str) -> Result<Option<i64>>;
    async fn add_tag(&self, db_id: i64, tag_id: i64) -> Result<()>;
    /// Attach a tag, creating it first if it does not exist. Returns the tag id.
    async fn add_tag_or_create(
        &self,
        db_id: i64,
        tag_type: &str,
        name: &str,
        scope: &str,
    ) -> Result<i64>;
    async fn remove_tag(&self, db_id: i64, tag_id: i64) -> Result<()>;
    /// All tags, or only those attached to `db_id`.
    async fn get_tags(&self, db_id: Option<i64>) -> Result<Vec<Tag>>;
    /// Number of tagged jobs per tag name.
    async fn count_tags(&self) -> Result<BTreeMap<String, i64>>;
}

/// SQLx implementation of TagRepository.
pub struct SqlxTagRepository {
    pool: DbPool,
    write_pool: WritePool,
}

impl SqlxTagRepository {
    pub fn new(pool: DbPool, write_pool: WritePool) -> Self {
        Self { pool, write_pool }
    }
}

#[async_trait]
impl TagRepository for SqlxTagRepository {
    async fn create_tag(&self, tag_type: &str, name: &str, scope: &str) -> Result<i64> {
        let tag = Tag::new(tag_type, name).with_scope(scope);
        let mut conn = self.write_pool.acquire().await?;
        let id = JobTxOps::insert_tag(&mut conn, &tag).await?;
        debug!(tag_id = id, tag_type, name, scope, "Created tag");
        Ok(id)
    }

    async fn tag_id(&self, tag_type: &str, name: &str, scope: &str) -> Result<Option<i64>> {
        let mut conn = self.pool.acquire().await?;
        JobTxOps::tag_id(&mut conn, tag_type, name, scope).await
    }

    async fn add_tag(&self, db_id: i64, tag_id: i64) -> Result<()> {
        let mut conn = self.write_pool.acquire().await?;
        JobTxOps::set_tag(&mut conn, db_id, tag_id).await
    }

    async fn add_tag_or_create(
        &self,
        db_id: i64,
        tag_type: &str,
        name: &str,
        scope: &str,
    ) -> Result<i64> {
        if tag_type.is_empty() || name.is_empty() {
            return Err(Error::validation("tag type and name must not be empty"));
        }
        let tag = Tag::new(tag_type, name).with_scope(scope);
        let mut conn = self.write_pool.acquire().await?;
        let tag_id = JobTxOps::ensure_tag(&mut conn, &tag).await?;
        JobTxOps::set_tag(&mut conn, db_id, tag_id).await?;
        Ok(tag_id)
    }

    async fn remove_tag(&self, db_id: i64, tag_id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM jobtag WHERE job_id = ? AND tag_id = ?")
            .bind(db_id)
            .bind(tag_id)
            .execute(&self.write_pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("JobTag", format!("{db_id}/{tag_id}")));
        }
        Ok(())
    }

    async fn get_tags(&self, db_id: Option<i64>) -> Result<Vec<Tag>> {
        match db_id {
            Some(db_id) => {
                let mut conn = self.pool.acquire().await?;
                JobTxOps::tags_for_job(&mut conn, db_id).await
            }
            None => {
                let rows = sqlx::query_as::<_, TagDbModel>(
                    "SELECT id, tag_type, tag_name, tag_scope FROM tag ORDER BY id",
                )
                .fetch_all(&self.pool)
                .await?;
                Ok(rows.into_iter().map(Tag::from).collect())
            }
        }
    }

    async fn count_tags(&self) -> Result<BTreeMap<String, i64>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT tag.tag_name, COUNT(jobtag.tag_id)
            FROM tag
            LEFT JOIN jobtag ON jobtag.tag_id = tag.id
            GROUP BY tag.tag_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }
}
