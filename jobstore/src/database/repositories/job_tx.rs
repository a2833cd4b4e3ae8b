//! Connection-level job and tag statements.
//!
//! Every statement that touches `job`, `job_cache`, `tag` or `jobtag` lives
//! here and runs on a caller-provided connection. Repositories call these on a
//! pooled connection; the importer and the sync path call them inside an open
//! [`Transaction`](crate::database::Transaction). Nothing here commits.

use sqlx::SqliteConnection;

use crate::Result;
use crate::database::models::{JobDbModel, NaturalKey, Tag, TagDbModel};

/// Column list shared by both job tables, without `id`.
const JOB_COLUMNS: &str = "job_id, cluster, sub_cluster, start_time, hpc_user, project, \
     cluster_partition, array_job_id, duration, walltime, job_state, meta_data, resources, \
     num_nodes, num_hwthreads, num_acc, smt, exclusive, monitoring_status, energy, \
     energy_footprint, footprint";

/// Cache columns projected into the durable shape. Stop-time columns that are
/// still unset in the cache get their durable defaults.
const CACHE_AS_DURABLE: &str = "job_id, cluster, sub_cluster, start_time, hpc_user, project, \
     cluster_partition, array_job_id, COALESCE(duration, 0), walltime, job_state, meta_data, \
     resources, num_nodes, num_hwthreads, num_acc, smt, exclusive, monitoring_status, \
     COALESCE(energy, 0.0), energy_footprint, footprint";

const JOB_PLACEHOLDERS: &str = "?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?";

/// The two job tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTable {
    Cache,
    Durable,
}

impl JobTable {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cache => "job_cache",
            Self::Durable => "job",
        }
    }

    pub fn other(&self) -> Self {
        match self {
            Self::Cache => Self::Durable,
            Self::Durable => Self::Cache,
        }
    }
}

/// `WHERE` clause excluding the given cache ids, with one placeholder each.
///
/// The clause is never empty: an `INSERT ... SELECT` needs a `WHERE` before
/// `ON CONFLICT` or SQLite parses the conflict clause as a join constraint.
fn exclusion_clause(skip: &[i64]) -> String {
    if skip.is_empty() {
        return "WHERE true".to_string();
    }
    let placeholders = vec!["?"; skip.len()].join(", ");
    format!("WHERE id NOT IN ({placeholders})")
}

/// Job statements that operate on an existing connection or transaction.
pub struct JobTxOps;

impl JobTxOps {
    /// Insert one row and return its table-local identifier.
    ///
    /// Cache rows never carry stop-time values; `duration` and `energy` are
    /// left NULL there.
    pub async fn insert(conn: &mut SqliteConnection, table: JobTable, job: &JobDbModel) -> Result<i64> {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table.name(),
            JOB_COLUMNS,
            JOB_PLACEHOLDERS
        );
        let (duration, energy) = match table {
            JobTable::Cache => (None, None),
            JobTable::Durable => (job.duration, job.energy),
        };

        let result = sqlx::query(&sql)
            .bind(job.job_id)
            .bind(&job.cluster)
            .bind(&job.sub_cluster)
            .bind(job.start_time)
            .bind(&job.hpc_user)
            .bind(&job.project)
            .bind(&job.cluster_partition)
            .bind(job.array_job_id)
            .bind(duration)
            .bind(job.walltime)
            .bind(&job.job_state)
            .bind(&job.meta_data)
            .bind(&job.resources)
            .bind(job.num_nodes)
            .bind(job.num_hwthreads)
            .bind(job.num_acc)
            .bind(job.smt)
            .bind(job.exclusive)
            .bind(job.monitoring_status)
            .bind(energy)
            .bind(&job.energy_footprint)
            .bind(&job.footprint)
            .execute(conn)
            .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn insert_durable(conn: &mut SqliteConnection, job: &JobDbModel) -> Result<i64> {
        Self::insert(conn, JobTable::Durable, job).await
    }

    pub async fn insert_cache(conn: &mut SqliteConnection, job: &JobDbModel) -> Result<i64> {
        Self::insert(conn, JobTable::Cache, job).await
    }

    /// Raw cache rows in insertion order. Decoding is left to the caller so
    /// one bad row does not hide the others.
    pub async fn load_cache_rows(conn: &mut SqliteConnection) -> Result<Vec<JobDbModel>> {
        let rows = sqlx::query_as::<_, JobDbModel>("SELECT * FROM job_cache ORDER BY id")
            .fetch_all(conn)
            .await?;
        Ok(rows)
    }

    /// Whether `table` holds a row with this natural key.
    pub async fn key_exists(
        conn: &mut SqliteConnection,
        table: JobTable,
        key: &NaturalKey,
    ) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE job_id = ? AND cluster = ? AND start_time = ?)",
            table.name()
        );
        let exists = sqlx::query_scalar::<_, bool>(&sql)
            .bind(key.job_id)
            .bind(&key.cluster)
            .bind(key.start_time)
            .fetch_one(conn)
            .await?;
        Ok(exists)
    }

    pub async fn find_row(
        conn: &mut SqliteConnection,
        table: JobTable,
        id: i64,
    ) -> Result<Option<JobDbModel>> {
        let sql = format!("SELECT * FROM {} WHERE id = ?", table.name());
        let row = sqlx::query_as::<_, JobDbModel>(&sql)
            .bind(id)
            .fetch_optional(conn)
            .await?;
        Ok(row)
    }

    pub async fn find_row_by_key(
        conn: &mut SqliteConnection,
        table: JobTable,
        key: &NaturalKey,
    ) -> Result<Option<JobDbModel>> {
        let sql = format!(
            "SELECT * FROM {} WHERE job_id = ? AND cluster = ? AND start_time = ?",
            table.name()
        );
        let row = sqlx::query_as::<_, JobDbModel>(&sql)
            .bind(key.job_id)
            .bind(&key.cluster)
            .bind(key.start_time)
            .fetch_optional(conn)
            .await?;
        Ok(row)
    }

    /// Durable identifier for a natural key.
    pub async fn resolve_durable_id(
        conn: &mut SqliteConnection,
        key: &NaturalKey,
    ) -> Result<Option<i64>> {
        let id = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM job WHERE job_id = ? AND cluster = ? AND start_time = ?",
        )
        .bind(key.job_id)
        .bind(&key.cluster)
        .bind(key.start_time)
        .fetch_optional(conn)
        .await?;
        Ok(id)
    }

    /// Copy every cache row except `skip` into the durable table, skipping
    /// natural keys that are already present. Returns the number of rows copied.
    pub async fn copy_all_cached(conn: &mut SqliteConnection, skip: &[i64]) -> Result<u64> {
        let sql = format!(
            "INSERT INTO job ({JOB_COLUMNS}) SELECT {CACHE_AS_DURABLE} FROM job_cache {} \
             ON CONFLICT (job_id, cluster, start_time) DO NOTHING",
            exclusion_clause(skip)
        );
        let query = skip.iter().fold(sqlx::query(&sql), |q, id| q.bind(*id));
        let result = query.execute(conn).await?;
        Ok(result.rows_affected())
    }

    /// Copy one cache row into the durable table, insert-if-absent.
    pub async fn copy_cached(conn: &mut SqliteConnection, cache_id: i64) -> Result<u64> {
        let sql = format!(
            "INSERT INTO job ({JOB_COLUMNS}) SELECT {CACHE_AS_DURABLE} FROM job_cache WHERE id = ? \
             ON CONFLICT (job_id, cluster, start_time) DO NOTHING"
        );
        let result = sqlx::query(&sql).bind(cache_id).execute(conn).await?;
        Ok(result.rows_affected())
    }

    /// Delete every cache row except `skip`.
    pub async fn delete_all_cached(conn: &mut SqliteConnection, skip: &[i64]) -> Result<u64> {
        let sql = format!("DELETE FROM job_cache {}", exclusion_clause(skip));
        let query = skip.iter().fold(sqlx::query(&sql), |q, id| q.bind(*id));
        let result = query.execute(conn).await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_cached(conn: &mut SqliteConnection, cache_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM job_cache WHERE id = ?")
            .bind(cache_id)
            .execute(conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Set stop-time fields on one row. Returns the number of rows updated.
    pub async fn update_stop(
        conn: &mut SqliteConnection,
        table: JobTable,
        id: i64,
        duration: i32,
        state: &str,
        monitoring_status: i32,
    ) -> Result<u64> {
        let sql = format!(
            "UPDATE {} SET job_state = ?, duration = ?, monitoring_status = ? WHERE id = ?",
            table.name()
        );
        let result = sqlx::query(&sql)
            .bind(state)
            .bind(duration)
            .bind(monitoring_status)
            .bind(id)
            .execute(conn)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn tag_id(
        conn: &mut SqliteConnection,
        tag_type: &str,
        name: &str,
        scope: &str,
    ) -> Result<Option<i64>> {
        let id = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM tag WHERE tag_type = ? AND tag_name = ? AND tag_scope = ?",
        )
        .bind(tag_type)
        .bind(name)
        .bind(scope)
        .fetch_optional(conn)
        .await?;
        Ok(id)
    }

    pub async fn insert_tag(conn: &mut SqliteConnection, tag: &Tag) -> Result<i64> {
        let result = sqlx::query("INSERT INTO tag (tag_type, tag_name, tag_scope) VALUES (?, ?, ?)")
            .bind(&tag.tag_type)
            .bind(&tag.name)
            .bind(&tag.scope)
            .execute(conn)
            .await?;
        Ok(result.last_insert_rowid())
    }

    /// Id of the tag, inserting it first if absent.
    ///
    /// Safe against a concurrent insert of the same tag: the insert is a no-op
    /// on conflict and the id is read back on the same connection.
    pub async fn ensure_tag(conn: &mut SqliteConnection, tag: &Tag) -> Result<i64> {
        sqlx::query(
            "INSERT INTO tag (tag_type, tag_name, tag_scope) VALUES (?, ?, ?) \
             ON CONFLICT (tag_type, tag_name, tag_scope) DO NOTHING",
        )
        .bind(&tag.tag_type)
        .bind(&tag.name)
        .bind(&tag.scope)
        .execute(&mut *conn)
        .await?;

        let id = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM tag WHERE tag_type = ? AND tag_name = ? AND tag_scope = ?",
        )
        .bind(&tag.tag_type)
        .bind(&tag.name)
        .bind(&tag.scope)
        .fetch_one(conn)
        .await?;
        Ok(id)
    }

    /// Attach a tag to a durable job. Attaching twice is a no-op.
    pub async fn set_tag(conn: &mut SqliteConnection, db_id: i64, tag_id: i64) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO jobtag (job_id, tag_id) VALUES (?, ?)")
            .bind(db_id)
            .bind(tag_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    pub async fn tags_for_job(conn: &mut SqliteConnection, db_id: i64) -> Result<Vec<Tag>> {
        let rows = sqlx::query_as::<_, TagDbModel>(
            r#"
            SELECT tag.id, tag.tag_type, tag.tag_name, tag.tag_scope
            FROM tag
            JOIN jobtag ON jobtag.tag_id = tag.id
            WHERE jobtag.job_id = ?
            ORDER BY tag.id
            "#,
        )
        .bind(db_id)
        .fetch_all(conn)
        .await?;
        Ok(rows.into_iter().map(Tag::from).collect())
    }
}
