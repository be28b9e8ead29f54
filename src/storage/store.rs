//! Generic Transactional Store
//!
//! [`Store<T>`] binds the single pooled SQLite connection to a domain
//! transaction type `T` (keys, strings, or the combined [`Tx`](super::Tx)).
//!
//! ## Concurrency
//!
//! The pool holds exactly one connection. Every transaction, read or write,
//! has to acquire it, so transactions are serialized by the pool itself and
//! never interleave their statements:
//!
//! ```text
//!   conn task A ──┐
//!   conn task B ──┼──▶ acquire ──▶ [ single SQLite connection ] ──▶ commit
//!   sweeper     ──┘      (queue)
//! ```
//!
//! Inside a transaction the raw `sqlx::Transaction` is shared by the
//! domain handles through a [`TxConn`]; each repository call locks it for
//! the duration of its statements.
//!
//! ## Rollback
//!
//! `update` commits when the closure returns `Ok` and rolls back on `Err`.
//! If the closure panics or the future is dropped (cancelled context,
//! elapsed deadline), the `sqlx::Transaction` is dropped unfinished and
//! rolls itself back.

use super::context::Context;
use super::schema;
use crate::config::Options;
use crate::error::{Error, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Sqlite, Transaction};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{trace, warn};

/// Shared handle to an open transaction.
pub type TxConn = Arc<Mutex<Transaction<'static, Sqlite>>>;

/// Opens a pool pinned to one connection and creates the schema.
pub(crate) async fn connect(opts: &Options) -> Result<SqlitePool> {
    let connect = match &opts.path {
        None => SqliteConnectOptions::from_str("sqlite::memory:")?,
        Some(path) => SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal),
    }
    .busy_timeout(opts.busy_timeout)
    .foreign_keys(true);

    // The connection must never be reaped: an in-memory database lives
    // exactly as long as its connection.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .acquire_timeout(opts.acquire_timeout)
        .connect_with(connect)
        .await?;

    let mut conn = pool.acquire().await?;
    schema::init(&mut conn).await?;
    Ok(pool)
}

/// Runs closures inside transactions of domain type `T`.
pub struct Store<T> {
    pool: SqlitePool,
    factory: fn(TxConn) -> T,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            factory: self.factory,
        }
    }
}

impl<T> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl<T: Send> Store<T> {
    /// Creates a store over `pool` that wraps every transaction with
    /// `factory`.
    pub fn new(pool: SqlitePool, factory: fn(TxConn) -> T) -> Self {
        Self { pool, factory }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Runs `f` in a write transaction. Commits if `f` succeeds, rolls back
    /// otherwise.
    pub async fn update<F, Fut, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(T) -> Fut + Send,
        Fut: Future<Output = Result<R>> + Send,
        R: Send,
    {
        self.update_ctx(&Context::background(), f).await
    }

    /// Like [`update`](Self::update), bounded by `ctx`.
    pub async fn update_ctx<F, Fut, R>(&self, ctx: &Context, f: F) -> Result<R>
    where
        F: FnOnce(T) -> Fut + Send,
        Fut: Future<Output = Result<R>> + Send,
        R: Send,
    {
        ctx.run(self.transact("update", f)).await
    }

    /// Runs `f` in a read transaction.
    ///
    /// Read-only is a convention: the transaction is the same kind `update`
    /// uses, and nothing stops `f` from writing. Callers must not.
    pub async fn view<F, Fut, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(T) -> Fut + Send,
        Fut: Future<Output = Result<R>> + Send,
        R: Send,
    {
        self.view_ctx(&Context::background(), f).await
    }

    /// Like [`view`](Self::view), bounded by `ctx`.
    pub async fn view_ctx<F, Fut, R>(&self, ctx: &Context, f: F) -> Result<R>
    where
        F: FnOnce(T) -> Fut + Send,
        Fut: Future<Output = Result<R>> + Send,
        R: Send,
    {
        ctx.run(self.transact("view", f)).await
    }

    async fn transact<F, Fut, R>(&self, kind: &'static str, f: F) -> Result<R>
    where
        F: FnOnce(T) -> Fut + Send,
        Fut: Future<Output = Result<R>> + Send,
        R: Send,
    {
        let conn: TxConn = Arc::new(Mutex::new(self.pool.begin().await?));
        trace!(kind, "transaction started");

        let res = f((self.factory)(Arc::clone(&conn))).await;

        // The domain handle was moved into `f`; if a copy escaped, the
        // transaction cannot be finished here. Dropping it rolls back, and
        // an error from `f` takes precedence.
        let tx = match Arc::try_unwrap(conn) {
            Ok(tx) => tx.into_inner(),
            Err(_) => return res.and(Err(Error::TxInUse)),
        };

        match res {
            Ok(value) => {
                tx.commit().await?;
                trace!(kind, "transaction committed");
                Ok(value)
            }
            Err(err) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(kind, error = %rb, "rollback failed");
                }
                trace!(kind, error = %err, "transaction rolled back");
                Err(err)
            }
        }
    }
}
