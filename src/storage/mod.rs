//! Storage Engine Module
//!
//! Redis data model on top of SQLite. Every key is a row in the shared key
//! table; every value type has a payload table joined to it by key id.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                           Db                                │
//! │  ┌──────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │ Store<Tx>│   │ KeyDb        │   │ StringDb     │         │
//! │  │ (combined│   │ Store<KeyTx> │   │ Store<String │         │
//! │  │  tx)     │   │              │   │  Tx>         │         │
//! │  └────┬─────┘   └──────┬───────┘   └──────┬───────┘         │
//! │       └────────────────┼──────────────────┘                 │
//! │                        ▼                                    │
//! │            SqlitePool (exactly one connection)              │
//! │          rkey ◀── rstring / rlist / rset / rhash / rzset    │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!              ┌─────────────┴─────────────┐
//!              │     ExpirySweeper         │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Single Writer**: one pooled connection serializes all transactions
//! - **Atomic Closures**: `update`/`view` commit or roll back as a unit
//! - **TTL Support**: keys can carry an absolute expiry time
//! - **Lazy Expiry**: expired keys are filtered out of every read
//! - **Active Expiry**: background sweeper deletes them in batches
//!
//! ## Example
//!
//! ```no_run
//! use tablekv::{config::Options, Db};
//!
//! # async fn demo() -> tablekv::Result<()> {
//! let db = Db::open(Options::memory()).await?;
//! db.strings().set("name", "alice").await?;
//!
//! // Several operations in one transaction.
//! db.update(|tx| async move {
//!     tx.strings().incr("visits", 1).await?;
//!     tx.keys().expire("visits", std::time::Duration::from_secs(60)).await?;
//!     Ok(())
//! })
//! .await?;
//!
//! db.close().await;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod expiry;
pub mod keys;
pub(crate) mod schema;
pub mod store;
pub mod strings;

pub use context::Context;
pub use expiry::{ExpiryConfig, ExpirySweeper};
pub use keys::{KeyDb, KeyTx, Scanner};
pub use store::{Store, TxConn};
pub use strings::{SetCmd, SetOut, StringDb, StringTx};

use crate::config::Options;
use crate::error::Result;
use sqlx::SqlitePool;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// All repositories over one transaction.
#[derive(Debug, Clone)]
pub struct Tx {
    keys: KeyTx,
    strings: StringTx,
}

impl Tx {
    fn new(conn: TxConn) -> Self {
        Self {
            keys: KeyTx::new(Arc::clone(&conn)),
            strings: StringTx::new(conn),
        }
    }

    pub fn keys(&self) -> &KeyTx {
        &self.keys
    }

    pub fn strings(&self) -> &StringTx {
        &self.strings
    }
}

/// An open database.
///
/// Cheap to clone; clones share the connection and the sweeper.
#[derive(Debug, Clone)]
pub struct Db {
    store: Store<Tx>,
    keys: KeyDb,
    strings: StringDb,
    sweeper: Arc<Mutex<Option<ExpirySweeper>>>,
}

impl Db {
    /// Opens the database described by `opts`, creating the schema if
    /// needed and starting the sweeper if configured.
    pub async fn open(opts: Options) -> Result<Self> {
        let pool = store::connect(&opts).await?;
        info!(
            path = %opts.path.as_deref().map(|p| p.display().to_string()).unwrap_or_else(|| ":memory:".into()),
            "Database opened"
        );

        let keys = KeyDb::new(Store::new(pool.clone(), KeyTx::new));
        let sweeper = opts
            .expiry
            .map(|config| ExpirySweeper::start(keys.clone(), config));

        Ok(Self {
            store: Store::new(pool.clone(), Tx::new),
            keys,
            strings: StringDb::new(Store::new(pool, StringTx::new)),
            sweeper: Arc::new(Mutex::new(sweeper)),
        })
    }

    pub fn keys(&self) -> &KeyDb {
        &self.keys
    }

    pub fn strings(&self) -> &StringDb {
        &self.strings
    }

    /// Runs `f` with all repositories in one write transaction.
    pub async fn update<F, Fut, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(Tx) -> Fut + Send,
        Fut: Future<Output = Result<R>> + Send,
        R: Send,
    {
        self.store.update(f).await
    }

    /// Like [`update`](Self::update), bounded by `ctx`.
    pub async fn update_ctx<F, Fut, R>(&self, ctx: &Context, f: F) -> Result<R>
    where
        F: FnOnce(Tx) -> Fut + Send,
        Fut: Future<Output = Result<R>> + Send,
        R: Send,
    {
        self.store.update_ctx(ctx, f).await
    }

    /// Runs `f` with all repositories in one read transaction.
    pub async fn view<F, Fut, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(Tx) -> Fut + Send,
        Fut: Future<Output = Result<R>> + Send,
        R: Send,
    {
        self.store.view(f).await
    }

    /// Like [`view`](Self::view), bounded by `ctx`.
    pub async fn view_ctx<F, Fut, R>(&self, ctx: &Context, f: F) -> Result<R>
    where
        F: FnOnce(Tx) -> Fut + Send,
        Fut: Future<Output = Result<R>> + Send,
        R: Send,
    {
        self.store.view_ctx(ctx, f).await
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        self.store.pool()
    }

    /// Stops the sweeper and closes the connection.
    pub async fn close(&self) {
        if let Some(sweeper) = self.sweeper.lock().await.take() {
            sweeper.shutdown().await;
        }
        self.pool().close().await;
        info!("Database closed");
    }
}
