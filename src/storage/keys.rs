//! Key Repository
//!
//! Owns the `rkey` table: identity, type, version and expiry of every key
//! regardless of the value type it holds.
//!
//! ## Expiration
//!
//! A row stays in the table after its `etime` passes. Every query filters
//! with `etime is null or etime > now` (lazy expiration), and the sweeper
//! removes dead rows in the background (active expiration). Writers purge a
//! dead row for the name they are about to write, so a new value never
//! inherits the version, type or TTL of an expired one.
//!
//! ## Write semantics
//!
//! Typed repositories pair every payload write with [`write_key`]:
//!
//! - [`Expiry::Replace`]: `etime` becomes the caller's TTL, or is cleared
//!   (SET, SETEX, MSET)
//! - [`Expiry::Keep`]: `etime` of an existing key is kept; a new key gets
//!   none (INCR, APPEND, SETRANGE)
//!
//! Both bump `version` and refresh `mtime`, and both refuse to touch a live
//! key of a different type.

use super::store::{Store, TxConn};
use crate::error::{Error, Result};
use crate::types::{expire_at, now_ms, Key, ScanResult, TypeId};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::collections::VecDeque;
use std::time::Duration;

/// Page size used by [`KeyTx::scan`] when the caller passes 0.
pub const DEFAULT_SCAN_COUNT: usize = 10;

const KEY_COLUMNS: &str = "id, key, type, version, etime, mtime";

type KeyRow = (i64, String, i64, i64, Option<i64>, i64);

fn key_from_row((id, name, ktype, version, etime, mtime): KeyRow) -> Result<Key> {
    let ktype = TypeId::try_from(ktype).map_err(|t| {
        Error::Database(sqlx::Error::Decode(
            format!("unknown type {t} for key {name:?}").into(),
        ))
    })?;
    Ok(Key {
        id,
        name,
        ktype,
        version,
        etime,
        mtime,
    })
}

/// How a write treats the key's expiry time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expiry {
    /// Set `etime` to the given time, or clear it.
    Replace(Option<i64>),
    /// Keep the current `etime` of an existing key.
    Keep,
}

/// Deletes the row for `name` if it exists but has expired.
pub(crate) async fn purge_expired(conn: &mut SqliteConnection, name: &str, now: i64) -> Result<()> {
    sqlx::query("delete from rkey where key = ? and etime <= ?")
        .bind(name)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Creates or bumps the key row for `name` and returns its id.
///
/// Fails with [`Error::KeyType`] if a live key of another type holds the
/// name.
pub(crate) async fn write_key(
    conn: &mut SqliteConnection,
    name: &str,
    ktype: TypeId,
    expiry: Expiry,
    now: i64,
) -> Result<i64> {
    purge_expired(conn, name, now).await?;

    let (sql, etime) = match expiry {
        Expiry::Replace(etime) => (
            "insert into rkey (key, type, version, etime, mtime)
            values (?, ?, 1, ?, ?)
            on conflict (key) do update set
                version = version + 1,
                etime = excluded.etime,
                mtime = excluded.mtime
            where type = excluded.type
            returning id",
            etime,
        ),
        Expiry::Keep => (
            "insert into rkey (key, type, version, etime, mtime)
            values (?, ?, 1, ?, ?)
            on conflict (key) do update set
                version = version + 1,
                mtime = excluded.mtime
            where type = excluded.type
            returning id",
            None,
        ),
    };

    let id: Option<i64> = sqlx::query_scalar(sql)
        .bind(name)
        .bind(ktype as i64)
        .bind(etime)
        .bind(now)
        .fetch_optional(&mut *conn)
        .await?;
    id.ok_or(Error::KeyType)
}

/// Returns the live key row for `name`.
pub(crate) async fn select_key(
    conn: &mut SqliteConnection,
    name: &str,
    now: i64,
) -> Result<Option<Key>> {
    let sql = format!(
        "select {KEY_COLUMNS} from rkey
        where key = ? and (etime is null or etime > ?)"
    );
    let row: Option<KeyRow> = sqlx::query_as(&sql)
        .bind(name)
        .bind(now)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(key_from_row).transpose()
}

/// Counts live keys among `names`.
pub(crate) async fn count_live<S: AsRef<str>>(
    conn: &mut SqliteConnection,
    names: &[S],
    now: i64,
) -> Result<i64> {
    if names.is_empty() {
        return Ok(0);
    }
    let mut qb = QueryBuilder::<Sqlite>::new("select count(*) from rkey where key in (");
    let mut list = qb.separated(", ");
    for name in names {
        let name: &str = name.as_ref();
        list.push_bind(name);
    }
    qb.push(") and (etime is null or etime > ")
        .push_bind(now)
        .push(")");
    let n = qb.build_query_scalar::<i64>().fetch_one(&mut *conn).await?;
    Ok(n)
}

/// Deletes live keys among `names` along with their payloads.
pub(crate) async fn delete_live<S: AsRef<str>>(
    conn: &mut SqliteConnection,
    names: &[S],
    now: i64,
) -> Result<u64> {
    if names.is_empty() {
        return Ok(0);
    }
    let mut qb = QueryBuilder::<Sqlite>::new("delete from rkey where key in (");
    let mut list = qb.separated(", ");
    for name in names {
        let name: &str = name.as_ref();
        list.push_bind(name);
    }
    qb.push(") and (etime is null or etime > ")
        .push_bind(now)
        .push(")");
    let done = qb.build().execute(&mut *conn).await?;
    Ok(done.rows_affected())
}

async fn set_etime(
    conn: &mut SqliteConnection,
    name: &str,
    etime: Option<i64>,
    now: i64,
) -> Result<bool> {
    let done = sqlx::query(
        "update rkey set etime = ?, version = version + 1, mtime = ?
        where key = ? and (etime is null or etime > ?)",
    )
    .bind(etime)
    .bind(now)
    .bind(name)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(done.rows_affected() > 0)
}

async fn move_key(conn: &mut SqliteConnection, key: &Key, new_name: &str, now: i64) -> Result<()> {
    sqlx::query("delete from rkey where key = ?")
        .bind(new_name)
        .execute(&mut *conn)
        .await?;
    sqlx::query("update rkey set key = ?, version = version + 1, mtime = ? where id = ?")
        .bind(new_name)
        .bind(now)
        .bind(key.id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Key operations inside a transaction.
#[derive(Debug, Clone)]
pub struct KeyTx {
    conn: TxConn,
}

impl KeyTx {
    pub fn new(conn: TxConn) -> Self {
        Self { conn }
    }

    /// Returns how many of `names` exist. A name listed twice counts once.
    pub async fn exists<S: AsRef<str> + Sync>(&self, names: &[S]) -> Result<i64> {
        let mut tx = self.conn.lock().await;
        count_live(&mut tx, names, now_ms()).await
    }

    /// Returns all live keys matching the glob `pattern`, in creation order.
    pub async fn search(&self, pattern: &str) -> Result<Vec<Key>> {
        let sql = format!(
            "select {KEY_COLUMNS} from rkey
            where key glob ? and (etime is null or etime > ?)
            order by id"
        );
        let mut tx = self.conn.lock().await;
        let rows: Vec<KeyRow> = sqlx::query_as(&sql)
            .bind(pattern)
            .bind(now_ms())
            .fetch_all(&mut **tx)
            .await?;
        rows.into_iter().map(key_from_row).collect()
    }

    /// Returns the next page of live keys after `cursor`.
    ///
    /// The returned cursor is the largest id in the page, or 0 when the page
    /// is empty. Keys created during a scan may or may not show up; keys that
    /// exist for the whole scan show up exactly once.
    pub async fn scan(
        &self,
        cursor: i64,
        pattern: &str,
        ktype: Option<TypeId>,
        count: usize,
    ) -> Result<ScanResult> {
        let count = if count == 0 { DEFAULT_SCAN_COUNT } else { count };
        let ktype = ktype.map(|t| t as i64);
        let sql = format!(
            "select {KEY_COLUMNS} from rkey
            where id > ? and key glob ?
                and (etime is null or etime > ?)
                and (? is null or type = ?)
            order by id
            limit ?"
        );
        let mut tx = self.conn.lock().await;
        let rows: Vec<KeyRow> = sqlx::query_as(&sql)
            .bind(cursor)
            .bind(pattern)
            .bind(now_ms())
            .bind(ktype)
            .bind(ktype)
            .bind(count as i64)
            .fetch_all(&mut **tx)
            .await?;

        let keys = rows
            .into_iter()
            .map(key_from_row)
            .collect::<Result<Vec<_>>>()?;
        let cursor = keys.iter().map(|k| k.id).max().unwrap_or(0);
        Ok(ScanResult { cursor, keys })
    }

    /// Returns a random live key, or `None` if there are none.
    pub async fn random(&self) -> Result<Option<Key>> {
        let sql = format!(
            "select {KEY_COLUMNS} from rkey
            where etime is null or etime > ?
            order by random() limit 1"
        );
        let mut tx = self.conn.lock().await;
        let row: Option<KeyRow> = sqlx::query_as(&sql)
            .bind(now_ms())
            .fetch_optional(&mut **tx)
            .await?;
        row.map(key_from_row).transpose()
    }

    /// Returns the key's metadata, or `None` if it does not exist.
    pub async fn get(&self, name: &str) -> Result<Option<Key>> {
        let mut tx = self.conn.lock().await;
        select_key(&mut tx, name, now_ms()).await
    }

    /// Sets the key to expire `ttl` from now. Returns false if the key does
    /// not exist.
    pub async fn expire(&self, name: &str, ttl: Duration) -> Result<bool> {
        let now = now_ms();
        let mut tx = self.conn.lock().await;
        set_etime(&mut tx, name, Some(expire_at(now, ttl)), now).await
    }

    /// Sets the key to expire at `at` (epoch milliseconds). Returns false if
    /// the key does not exist.
    pub async fn expire_at(&self, name: &str, at: i64) -> Result<bool> {
        let mut tx = self.conn.lock().await;
        set_etime(&mut tx, name, Some(at), now_ms()).await
    }

    /// Removes the key's expiry. Returns false if the key does not exist.
    pub async fn persist(&self, name: &str) -> Result<bool> {
        let mut tx = self.conn.lock().await;
        set_etime(&mut tx, name, None, now_ms()).await
    }

    /// Renames a key, replacing any key already called `new_name`.
    ///
    /// The key keeps its id, type and expiry. Fails with
    /// [`Error::NotFound`] if `name` does not exist.
    pub async fn rename(&self, name: &str, new_name: &str) -> Result<()> {
        let now = now_ms();
        let mut tx = self.conn.lock().await;
        let key = select_key(&mut tx, name, now)
            .await?
            .ok_or(Error::NotFound)?;
        if name == new_name {
            return Ok(());
        }
        move_key(&mut tx, &key, new_name, now).await
    }

    /// Renames a key only if `new_name` does not exist. Returns whether the
    /// key was renamed.
    pub async fn rename_nx(&self, name: &str, new_name: &str) -> Result<bool> {
        let now = now_ms();
        let mut tx = self.conn.lock().await;
        let key = select_key(&mut tx, name, now)
            .await?
            .ok_or(Error::NotFound)?;
        if name == new_name || select_key(&mut tx, new_name, now).await?.is_some() {
            return Ok(false);
        }
        move_key(&mut tx, &key, new_name, now).await?;
        Ok(true)
    }

    /// Deletes keys and their values. Returns how many existed.
    pub async fn delete<S: AsRef<str> + Sync>(&self, names: &[S]) -> Result<u64> {
        let mut tx = self.conn.lock().await;
        delete_live(&mut tx, names, now_ms()).await
    }

    /// Deletes up to `limit` expired keys (0 means no limit). Returns how
    /// many were deleted.
    pub async fn delete_expired(&self, limit: usize) -> Result<u64> {
        let limit = if limit == 0 { -1 } else { limit as i64 };
        let mut tx = self.conn.lock().await;
        let done = sqlx::query(
            "delete from rkey where id in (
                select id from rkey where etime <= ? limit ?
            )",
        )
        .bind(now_ms())
        .bind(limit)
        .execute(&mut **tx)
        .await?;
        Ok(done.rows_affected())
    }

    /// Returns the number of live keys.
    pub async fn len(&self) -> Result<i64> {
        let mut tx = self.conn.lock().await;
        let n: i64 = sqlx::query_scalar(
            "select count(*) from rkey where etime is null or etime > ?",
        )
        .bind(now_ms())
        .fetch_one(&mut **tx)
        .await?;
        Ok(n)
    }

    /// Deletes every key, live or expired.
    pub async fn delete_all(&self) -> Result<u64> {
        let mut tx = self.conn.lock().await;
        let done = sqlx::query("delete from rkey").execute(&mut **tx).await?;
        Ok(done.rows_affected())
    }
}

/// Key operations, each in its own transaction.
#[derive(Debug, Clone)]
pub struct KeyDb {
    store: Store<KeyTx>,
}

impl KeyDb {
    pub fn new(store: Store<KeyTx>) -> Self {
        Self { store }
    }

    pub async fn exists<S: AsRef<str> + Sync>(&self, names: &[S]) -> Result<i64> {
        self.store.view(|tx| async move { tx.exists(names).await }).await
    }

    pub async fn search(&self, pattern: &str) -> Result<Vec<Key>> {
        self.store.view(|tx| async move { tx.search(pattern).await }).await
    }

    pub async fn scan(
        &self,
        cursor: i64,
        pattern: &str,
        ktype: Option<TypeId>,
        count: usize,
    ) -> Result<ScanResult> {
        self.store
            .view(|tx| async move { tx.scan(cursor, pattern, ktype, count).await })
            .await
    }

    /// Returns an iterator over all live keys matching `pattern`, fetching
    /// `page_size` keys per transaction.
    pub fn scanner(&self, pattern: &str, ktype: Option<TypeId>, page_size: usize) -> Scanner {
        Scanner {
            db: self.clone(),
            pattern: pattern.to_string(),
            ktype,
            page_size: if page_size == 0 { DEFAULT_SCAN_COUNT } else { page_size },
            cursor: 0,
            page: VecDeque::new(),
            done: false,
        }
    }

    pub async fn random(&self) -> Result<Option<Key>> {
        self.store.view(|tx| async move { tx.random().await }).await
    }

    pub async fn get(&self, name: &str) -> Result<Option<Key>> {
        self.store.view(|tx| async move { tx.get(name).await }).await
    }

    pub async fn expire(&self, name: &str, ttl: Duration) -> Result<bool> {
        self.store
            .update(|tx| async move { tx.expire(name, ttl).await })
            .await
    }

    pub async fn expire_at(&self, name: &str, at: i64) -> Result<bool> {
        self.store
            .update(|tx| async move { tx.expire_at(name, at).await })
            .await
    }

    pub async fn persist(&self, name: &str) -> Result<bool> {
        self.store.update(|tx| async move { tx.persist(name).await }).await
    }

    pub async fn rename(&self, name: &str, new_name: &str) -> Result<()> {
        self.store
            .update(|tx| async move { tx.rename(name, new_name).await })
            .await
    }

    pub async fn rename_nx(&self, name: &str, new_name: &str) -> Result<bool> {
        self.store
            .update(|tx| async move { tx.rename_nx(name, new_name).await })
            .await
    }

    pub async fn delete<S: AsRef<str> + Sync>(&self, names: &[S]) -> Result<u64> {
        self.store.update(|tx| async move { tx.delete(names).await }).await
    }

    pub async fn delete_expired(&self, limit: usize) -> Result<u64> {
        self.store
            .update(|tx| async move { tx.delete_expired(limit).await })
            .await
    }

    pub async fn len(&self) -> Result<i64> {
        self.store.view(|tx| async move { tx.len().await }).await
    }

    pub async fn delete_all(&self) -> Result<u64> {
        self.store.update(|tx| async move { tx.delete_all().await }).await
    }
}

/// Walks every matching key page by page, one read transaction per page.
#[derive(Debug)]
pub struct Scanner {
    db: KeyDb,
    pattern: String,
    ktype: Option<TypeId>,
    page_size: usize,
    cursor: i64,
    page: VecDeque<Key>,
    done: bool,
}

impl Scanner {
    /// Returns the next key, or `None` once the scan is exhausted.
    pub async fn next(&mut self) -> Result<Option<Key>> {
        loop {
            if let Some(key) = self.page.pop_front() {
                return Ok(Some(key));
            }
            if self.done {
                return Ok(None);
            }
            let res = self
                .db
                .scan(self.cursor, &self.pattern, self.ktype, self.page_size)
                .await?;
            if res.keys.len() < self.page_size {
                self.done = true;
            }
            self.cursor = res.cursor;
            self.page.extend(res.keys);
        }
    }
}
