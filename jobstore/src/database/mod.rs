//! Database module for jobstore.
//!
//! SQLite persistence through sqlx: pool construction, migrations, the
//! transaction handle, models and repositories. Callers build the pools once
//! at startup and hand them to every component that needs them.

pub mod models;
pub mod repositories;
pub mod retry;
pub mod time;
pub mod transaction;

pub use transaction::{SqlArg, Transaction, TxState};

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions,
    SqliteSynchronous,
};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Pool used for reads. Several connections run side by side under WAL.
pub type DbPool = Pool<Sqlite>;

/// Pool used for every write. Always holds exactly one connection.
pub type WritePool = Pool<Sqlite>;

/// Upper bound for the read pool.
const MAX_READ_CONNECTIONS: u32 = 10;

/// How long a statement waits on a locked database before `SQLITE_BUSY`.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Pragmas applied to every new connection of either pool.
///
/// `cache_size` is negative, which SQLite reads as KiB (about 64 MB). The WAL
/// is checkpointed every 1000 pages and truncated back to 64 MiB.
const CONNECTION_PRAGMAS: &[(&str, &str)] = &[
    ("wal_autocheckpoint", "1000"),
    ("journal_size_limit", "67108864"),
    ("cache_size", "-64000"),
    ("temp_store", "MEMORY"),
];

/// Which side of the database a pool serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolRole {
    Read,
    Write,
}

impl PoolRole {
    fn name(self) -> &'static str {
        match self {
            PoolRole::Read => "read_pool",
            PoolRole::Write => "write_pool",
        }
    }

    /// Writers queue behind each other, so they get the longer wait.
    fn acquire_timeout(self) -> Duration {
        match self {
            PoolRole::Read => Duration::from_secs(30),
            PoolRole::Write => Duration::from_secs(60),
        }
    }
}

async fn apply_connection_pragmas(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    for (pragma, value) in CONNECTION_PRAGMAS {
        sqlx::query(&format!("PRAGMA {pragma} = {value}"))
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Check the journal mode a pool actually got and switch it to WAL if not.
///
/// `memory` is accepted so in-memory databases still open.
async fn verify_journal_mode(pool: &DbPool, role: PoolRole) -> Result<(), sqlx::Error> {
    let mut conn = pool.acquire().await?;
    let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
        .fetch_one(&mut *conn)
        .await?;
    if !matches!(mode.as_str(), "wal" | "memory") {
        warn!(pool = role.name(), %mode, "Journal mode is not WAL, switching");
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Connection options shared by both pools: WAL, NORMAL sync, busy timeout,
/// foreign keys on, and the file created on first use.
fn connect_options(database_url: &str) -> Result<SqliteConnectOptions, sqlx::Error> {
    Ok(SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true)
        .create_if_missing(true))
}

async fn open_pool(
    database_url: &str,
    role: PoolRole,
    max_connections: u32,
) -> Result<Pool<Sqlite>, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(role.acquire_timeout())
        .after_connect(|conn, _meta| Box::pin(async move { apply_connection_pragmas(conn).await }))
        .connect_with(connect_options(database_url)?)
        .await?;

    verify_journal_mode(&pool, role).await?;
    info!(pool = role.name(), max_connections, "Database pool ready");
    Ok(pool)
}

/// Read pool size: two connections per core, capped at [`MAX_READ_CONNECTIONS`].
pub fn default_read_pool_size() -> u32 {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(2);
    (cores * 2).min(MAX_READ_CONNECTIONS)
}

/// Open a read pool with `max_connections` connections.
///
/// `database_url` is a sqlx SQLite URL such as `sqlite:jobstore.db`.
pub async fn init_pool_with_size(
    database_url: &str,
    max_connections: u32,
) -> Result<DbPool, sqlx::Error> {
    open_pool(database_url, PoolRole::Read, max_connections).await
}

pub async fn init_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    init_pool_with_size(database_url, default_read_pool_size()).await
}

/// Open the single-connection write pool.
///
/// Every [`Transaction`] and every single-statement write goes through this
/// pool, so only one connection ever contends for the SQLite write lock. WAL
/// frames left by an earlier crash are checkpointed passively on open.
pub async fn init_write_pool(database_url: &str) -> Result<WritePool, sqlx::Error> {
    let pool = open_pool(database_url, PoolRole::Write, 1).await?;

    let (busy, log_frames, checkpointed): (i32, i32, i32) =
        sqlx::query_as("PRAGMA wal_checkpoint(PASSIVE)")
            .fetch_one(&pool)
            .await?;
    info!(busy, log_frames, checkpointed, "Startup WAL checkpoint");

    Ok(pool)
}

/// Apply the embedded migrations in `./migrations`.
pub async fn run_migrations(pool: &DbPool) -> crate::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations applied");
    Ok(())
}

/// Read and write pools over the same database file.
#[derive(Clone)]
pub struct Database {
    pub pool: DbPool,
    pub write_pool: WritePool,
}

impl Database {
    /// Open both pools and apply migrations through the write pool.
    pub async fn connect(database_url: &str) -> crate::Result<Self> {
        let pool = init_pool(database_url)
            .await
            .map_err(crate::Error::BackendUnavailable)?;
        let write_pool = init_write_pool(database_url)
            .await
            .map_err(crate::Error::BackendUnavailable)?;
        run_migrations(&write_pool).await?;
        Ok(Self { pool, write_pool })
    }

    /// Close the write pool first so pending writes finish before readers go.
    pub async fn close(&self) {
        self.write_pool.close().await;
        self.pool.close().await;
    }
}
