//! Scoped write transactions.
//!
//! A [`Transaction`] owns one connection from the write pool for its whole
//! life and moves through `Open -> Committed` or `Open -> RolledBack` exactly
//! once. `rollback` is always safe to call, so callers can unconditionally
//! clean up after a commit attempt. Dropping a still-open transaction closes
//! the connection instead of returning it to the pool, which discards the
//! pending writes.

use std::sync::LazyLock;

use regex::Regex;
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::{Sqlite, SqliteConnection};
use tracing::{debug, warn};

use super::WritePool;
use crate::{Error, Result};

/// Quoted literals are matched first so `:name` inside a string is left alone.
static NAMED_PARAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"'(?:[^']|'')*'|:([A-Za-z_][A-Za-z0-9_]*)").expect("named param regex is valid")
});

/// Lifecycle state of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Open,
    Committed,
    RolledBack,
}

/// A dynamically typed statement argument.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlArg {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<i64> for SqlArg {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for SqlArg {
    fn from(v: i32) -> Self {
        Self::Integer(v.into())
    }
}

impl From<bool> for SqlArg {
    fn from(v: bool) -> Self {
        Self::Integer(v.into())
    }
}

impl From<f64> for SqlArg {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<String> for SqlArg {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for SqlArg {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<Vec<u8>> for SqlArg {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl<T: Into<SqlArg>> From<Option<T>> for SqlArg {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

fn bind_arg<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    arg: &SqlArg,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match arg {
        SqlArg::Null => query.bind(None::<i64>),
        SqlArg::Integer(v) => query.bind(*v),
        SqlArg::Real(v) => query.bind(*v),
        SqlArg::Text(v) => query.bind(v.clone()),
        SqlArg::Blob(v) => query.bind(v.clone()),
    }
}

/// Rewrite `:name` placeholders to numbered `?N` placeholders.
///
/// Returns the rewritten SQL and the arguments in positional order. A name
/// used more than once maps to the same position.
pub(crate) fn resolve_named(sql: &str, args: &[(&str, SqlArg)]) -> Result<(String, Vec<SqlArg>)> {
    let mut out = String::with_capacity(sql.len());
    let mut order: Vec<&str> = Vec::new();
    let mut last = 0;

    for caps in NAMED_PARAM.captures_iter(sql) {
        let Some(name) = caps.get(1) else {
            continue;
        };
        let whole = caps.get(0).map_or(name.range(), |m| m.range());

        let position = match order.iter().position(|n| *n == name.as_str()) {
            Some(i) => i + 1,
            None => {
                order.push(name.as_str());
                order.len()
            }
        };

        out.push_str(&sql[last..whole.start]);
        out.push('?');
        out.push_str(&position.to_string());
        last = whole.end;
    }
    out.push_str(&sql[last..]);

    let positional = order
        .iter()
        .map(|name| {
            args.iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| Error::validation(format!("missing named argument :{name}")))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((out, positional))
}

/// A write transaction started with `BEGIN IMMEDIATE`.
pub struct Transaction {
    conn: PoolConnection<Sqlite>,
    state: TxState,
}

impl Transaction {
    /// Acquire a write connection and open a transaction on it.
    ///
    /// The write lock is taken up front so a later statement never has to
    /// upgrade a read lock.
    pub async fn begin(pool: &WritePool) -> Result<Self> {
        let mut conn = pool.acquire().await.map_err(Error::BackendUnavailable)?;
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(Error::BackendUnavailable)?;
        Ok(Self {
            conn,
            state: TxState::Open,
        })
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == TxState::Open
    }

    /// The open connection, for statements that need typed binds or rows.
    pub fn connection(&mut self) -> Result<&mut SqliteConnection> {
        if !self.is_open() {
            return Err(Error::TransactionClosed);
        }
        Ok(&mut self.conn)
    }

    /// Commit pending writes.
    ///
    /// Fails with [`Error::AlreadyCompleted`] once the transaction has been
    /// committed or rolled back. If `COMMIT` itself fails the transaction
    /// stays open so a following [`rollback`](Self::rollback) still cleans up.
    pub async fn commit(&mut self) -> Result<()> {
        if !self.is_open() {
            return Err(Error::AlreadyCompleted);
        }
        sqlx::query("COMMIT").execute(&mut *self.conn).await?;
        self.state = TxState::Committed;
        debug!("Transaction committed");
        Ok(())
    }

    /// Roll back pending writes. A no-op after commit or rollback.
    pub async fn rollback(&mut self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        let result = sqlx::query("ROLLBACK").execute(&mut *self.conn).await;
        // Even a failed ROLLBACK leaves nothing to retry; the connection is
        // discarded below if SQLite still considers it inside a transaction.
        self.state = TxState::RolledBack;
        if let Err(e) = result {
            warn!(error = %e, "Rollback failed, closing connection");
            self.conn.close_on_drop();
            return Err(e.into());
        }
        debug!("Transaction rolled back");
        Ok(())
    }

    /// Run one statement with positional `?` arguments.
    ///
    /// Returns the rowid of the last inserted row on this connection.
    pub async fn execute(&mut self, sql: &str, args: &[SqlArg]) -> Result<i64> {
        let conn = self.connection()?;
        let query = args.iter().fold(sqlx::query(sql), bind_arg);
        let result = query.execute(&mut *conn).await?;
        Ok(result.last_insert_rowid())
    }

    /// Run one statement with `:name` arguments.
    pub async fn execute_named(&mut self, sql: &str, args: &[(&str, SqlArg)]) -> Result<i64> {
        if !self.is_open() {
            return Err(Error::TransactionClosed);
        }
        let (sql, positional) = resolve_named(sql, args)?;
        self.execute(&sql, &positional).await
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TxState::Open {
            warn!("Open transaction dropped without commit or rollback");
            self.conn.close_on_drop();
        }
    }
}
