//! String Repository
//!
//! String values live in `rstring`, one row per key, joined to `rkey` by
//! `key_id`. Identity, type and expiry belong to the key table; this module
//! only stores bytes and pairs each payload write with a key write in the
//! same transaction.
//!
//! Replacing writes (`set`, `set_expires`, `get_set`, `set_many`) reset the
//! expiry to the caller's TTL. Mutating writes (`append`, `set_range`,
//! `incr`, `incr_float`) keep it.

use super::keys::{self, Expiry};
use super::store::{Store, TxConn};
use crate::error::{Error, Result};
use crate::types::{expire_at, now_ms, KeyValue, Scalar, TypeId, Value};
use bytes::Bytes;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::collections::HashMap;
use std::time::Duration;

/// Maximum string length reachable through `set_range` (512 MiB).
pub const MAX_STRING_LEN: usize = 512 * 1024 * 1024;

/// Converts a TTL into an expiry time; zero means no expiry.
fn ttl_etime(now: i64, ttl: Duration) -> Option<i64> {
    if ttl.is_zero() {
        None
    } else {
        Some(expire_at(now, ttl))
    }
}

/// Returns the string stored at `name`, or `KeyType` if the key holds
/// another type.
async fn select_value(conn: &mut SqliteConnection, name: &str, now: i64) -> Result<Option<Value>> {
    let row: Option<(i64, Option<Vec<u8>>)> = sqlx::query_as(
        "select rkey.type, rstring.value
        from rkey left join rstring on rstring.key_id = rkey.id
        where rkey.key = ? and (rkey.etime is null or rkey.etime > ?)",
    )
    .bind(name)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        None => Ok(None),
        Some((ktype, _)) if ktype != TypeId::String as i64 => Err(Error::KeyType),
        Some((_, value)) => Ok(Some(Value::from(value.unwrap_or_default()))),
    }
}

/// Writes `value` to `name` together with its key row.
async fn put(
    conn: &mut SqliteConnection,
    name: &str,
    value: &[u8],
    expiry: Expiry,
    now: i64,
) -> Result<()> {
    let id = keys::write_key(conn, name, TypeId::String, expiry, now).await?;
    sqlx::query(
        "insert into rstring (key_id, value) values (?, ?)
        on conflict (key_id) do update set value = excluded.value",
    )
    .bind(id)
    .bind(value)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Resolves Redis-style `start..=end` offsets (negative counts from the end)
/// against a string of length `len`.
fn byte_range(len: usize, start: i64, end: i64) -> Option<(usize, usize)> {
    if len == 0 || (start < 0 && end < 0 && start > end) {
        return None;
    }
    let len = len as i64;
    let start = if start < 0 { len + start } else { start }.max(0);
    let end = if end < 0 { len + end } else { end }.clamp(0, len - 1);
    if start > end {
        return None;
    }
    Some((start as usize, end as usize))
}

/// Result of a [`SetCmd`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetOut {
    /// Value held before the command, if any.
    pub prev: Option<Value>,
    /// The key did not exist and was created.
    pub created: bool,
    /// The key existed and was overwritten.
    pub updated: bool,
}

#[derive(Debug, Clone, Copy)]
enum SetTarget<'a> {
    Tx(&'a StringTx),
    Db(&'a StringDb),
}

/// A SET with conditions and expiry options. Built by
/// [`StringTx::set_with`] or [`StringDb::set_with`].
#[derive(Debug)]
pub struct SetCmd<'a> {
    target: SetTarget<'a>,
    name: &'a str,
    value: Scalar,
    if_exists: bool,
    if_not_exists: bool,
    ttl: Option<Duration>,
    at: Option<i64>,
    keep_ttl: bool,
}

impl<'a> SetCmd<'a> {
    fn new(target: SetTarget<'a>, name: &'a str, value: Scalar) -> Self {
        Self {
            target,
            name,
            value,
            if_exists: false,
            if_not_exists: false,
            ttl: None,
            at: None,
            keep_ttl: false,
        }
    }

    /// Only set the key if it already exists (XX).
    pub fn if_exists(mut self) -> Self {
        self.if_exists = true;
        self
    }

    /// Only set the key if it does not exist (NX).
    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }

    /// Expire the key `ttl` from now (EX, PX).
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Expire the key at `at` epoch milliseconds (EXAT, PXAT).
    pub fn at(mut self, at: i64) -> Self {
        self.at = Some(at);
        self
    }

    /// Keep the key's current expiry (KEEPTTL).
    pub fn keep_ttl(mut self) -> Self {
        self.keep_ttl = true;
        self
    }

    pub async fn run(self) -> Result<SetOut> {
        match self.target {
            SetTarget::Tx(tx) => tx.apply_set(&self).await,
            SetTarget::Db(db) => {
                db.store
                    .update(|tx| async move { tx.apply_set(&self).await })
                    .await
            }
        }
    }
}

/// String operations inside a transaction.
#[derive(Debug, Clone)]
pub struct StringTx {
    conn: TxConn,
}

impl StringTx {
    pub fn new(conn: TxConn) -> Self {
        Self { conn }
    }

    /// Returns the value of a key, or `None` if it does not exist.
    pub async fn get(&self, name: &str) -> Result<Option<Value>> {
        let mut tx = self.conn.lock().await;
        select_value(&mut tx, name, now_ms()).await
    }

    /// Returns one entry per name; missing keys and keys of other types
    /// are `None`.
    pub async fn get_many<S: AsRef<str> + Sync>(&self, names: &[S]) -> Result<Vec<Option<Value>>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(
            "select rkey.key, rstring.value
            from rkey join rstring on rstring.key_id = rkey.id
            where rkey.key in (",
        );
        let mut list = qb.separated(", ");
        for name in names {
            let name: &str = name.as_ref();
            list.push_bind(name);
        }
        qb.push(") and (rkey.etime is null or rkey.etime > ")
            .push_bind(now_ms())
            .push(")");

        let mut tx = self.conn.lock().await;
        let rows: Vec<(String, Vec<u8>)> = qb.build_query_as().fetch_all(&mut **tx).await?;
        let found: HashMap<String, Vec<u8>> = rows.into_iter().collect();
        Ok(names
            .iter()
            .map(|name| {
                let name: &str = name.as_ref();
                found.get(name).cloned().map(Value::from)
            })
            .collect())
    }

    /// Sets a key's value and clears its expiry.
    pub async fn set(&self, name: &str, value: impl Into<Scalar>) -> Result<()> {
        self.set_expires(name, value, Duration::ZERO).await
    }

    /// Sets a key's value to expire `ttl` from now. A zero `ttl` clears the
    /// expiry.
    pub async fn set_expires(&self, name: &str, value: impl Into<Scalar>, ttl: Duration) -> Result<()> {
        let value = value.into().encode()?;
        let now = now_ms();
        let mut tx = self.conn.lock().await;
        put(&mut tx, name, &value, Expiry::Replace(ttl_etime(now, ttl)), now).await
    }

    /// Sets the value only if the key does not exist. Returns whether the
    /// value was set.
    pub async fn set_not_exists(&self, name: &str, value: impl Into<Scalar>, ttl: Duration) -> Result<bool> {
        let value = value.into().encode()?;
        let now = now_ms();
        let mut tx = self.conn.lock().await;
        if keys::select_key(&mut tx, name, now).await?.is_some() {
            return Ok(false);
        }
        put(&mut tx, name, &value, Expiry::Replace(ttl_etime(now, ttl)), now).await?;
        Ok(true)
    }

    /// Sets the value only if the key exists. Returns whether the value was
    /// set.
    pub async fn set_exists(&self, name: &str, value: impl Into<Scalar>, ttl: Duration) -> Result<bool> {
        let value = value.into().encode()?;
        let now = now_ms();
        let mut tx = self.conn.lock().await;
        if keys::select_key(&mut tx, name, now).await?.is_none() {
            return Ok(false);
        }
        put(&mut tx, name, &value, Expiry::Replace(ttl_etime(now, ttl)), now).await?;
        Ok(true)
    }

    /// Sets a new value and returns the old one. Clears the expiry.
    pub async fn get_set(&self, name: &str, value: impl Into<Scalar>) -> Result<Option<Value>> {
        let value = value.into().encode()?;
        let now = now_ms();
        let mut tx = self.conn.lock().await;
        let prev = select_value(&mut tx, name, now).await?;
        put(&mut tx, name, &value, Expiry::Replace(None), now).await?;
        Ok(prev)
    }

    /// Returns a builder for a SET with options.
    pub fn set_with<'a>(&'a self, name: &'a str, value: impl Into<Scalar>) -> SetCmd<'a> {
        SetCmd::new(SetTarget::Tx(self), name, value.into())
    }

    async fn apply_set(&self, cmd: &SetCmd<'_>) -> Result<SetOut> {
        let value = cmd.value.encode()?;
        let now = now_ms();
        let mut tx = self.conn.lock().await;

        let prev = select_value(&mut tx, cmd.name, now).await?;
        let exists = prev.is_some();
        if (cmd.if_exists && !exists) || (cmd.if_not_exists && exists) {
            return Ok(SetOut {
                prev,
                ..SetOut::default()
            });
        }

        let expiry = if cmd.keep_ttl {
            Expiry::Keep
        } else {
            match (cmd.at, cmd.ttl) {
                (Some(at), _) => Expiry::Replace(Some(at)),
                (None, Some(ttl)) => Expiry::Replace(ttl_etime(now, ttl)),
                (None, None) => Expiry::Replace(None),
            }
        };
        put(&mut tx, cmd.name, &value, expiry, now).await?;
        Ok(SetOut {
            prev,
            created: !exists,
            updated: exists,
        })
    }

    /// Sets several keys at once, clearing their expiry.
    pub async fn set_many(&self, items: &[KeyValue]) -> Result<()> {
        let values = encode_all(items)?;
        let now = now_ms();
        let mut tx = self.conn.lock().await;
        for (item, value) in items.iter().zip(&values) {
            put(&mut tx, &item.key, value, Expiry::Replace(None), now).await?;
        }
        Ok(())
    }

    /// Sets several keys only if none of them exist. Returns whether the
    /// keys were set; if any key exists, nothing is written.
    pub async fn set_many_nx(&self, items: &[KeyValue]) -> Result<bool> {
        let values = encode_all(items)?;
        let now = now_ms();
        let names: Vec<&str> = items.iter().map(|kv| kv.key.as_str()).collect();
        let mut tx = self.conn.lock().await;
        if keys::count_live(&mut tx, &names[..], now).await? > 0 {
            return Ok(false);
        }
        for (item, value) in items.iter().zip(&values) {
            put(&mut tx, &item.key, value, Expiry::Replace(None), now).await?;
        }
        Ok(true)
    }

    /// Appends to the value, creating the key if needed. Returns the new
    /// length.
    pub async fn append(&self, name: &str, value: impl Into<Scalar>) -> Result<usize> {
        let suffix = value.into().encode()?;
        let now = now_ms();
        let mut tx = self.conn.lock().await;
        let mut data = select_value(&mut tx, name, now)
            .await?
            .map(|v| v.into_bytes().to_vec())
            .unwrap_or_default();
        data.extend_from_slice(&suffix);
        put(&mut tx, name, &data, Expiry::Keep, now).await?;
        Ok(data.len())
    }

    /// Overwrites part of the value starting at `offset`, zero-padding if
    /// the value is shorter. Returns the new length.
    pub async fn set_range(&self, name: &str, offset: usize, value: impl Into<Scalar>) -> Result<usize> {
        let patch = value.into().encode()?;
        let now = now_ms();
        let mut tx = self.conn.lock().await;
        let mut data = select_value(&mut tx, name, now)
            .await?
            .map(|v| v.into_bytes().to_vec())
            .unwrap_or_default();
        if patch.is_empty() {
            return Ok(data.len());
        }
        let end = offset.checked_add(patch.len()).filter(|&end| end <= MAX_STRING_LEN);
        let end = end.ok_or(Error::ValueType)?;
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(&patch);
        put(&mut tx, name, &data, Expiry::Keep, now).await?;
        Ok(data.len())
    }

    /// Returns the bytes between `start` and `end` inclusive. Negative
    /// offsets count from the end of the value.
    pub async fn get_range(&self, name: &str, start: i64, end: i64) -> Result<Value> {
        let Some(value) = self.get(name).await? else {
            return Ok(Value::default());
        };
        let bytes = value.into_bytes();
        Ok(match byte_range(bytes.len(), start, end) {
            Some((from, to)) => Value::new(bytes.slice(from..=to)),
            None => Value::default(),
        })
    }

    /// Returns the length of the value, or 0 if the key does not exist.
    pub async fn len(&self, name: &str) -> Result<usize> {
        Ok(self.get(name).await?.map(|v| v.len()).unwrap_or(0))
    }

    /// Increments the integer value by `delta`, creating the key at 0 if
    /// needed. Returns the new value.
    pub async fn incr(&self, name: &str, delta: i64) -> Result<i64> {
        let now = now_ms();
        let mut tx = self.conn.lock().await;
        let current = match select_value(&mut tx, name, now).await? {
            Some(value) => value.to_int()?,
            None => 0,
        };
        let next = current.checked_add(delta).ok_or(Error::Overflow)?;
        put(&mut tx, name, next.to_string().as_bytes(), Expiry::Keep, now).await?;
        Ok(next)
    }

    /// Increments the float value by `delta`, creating the key at 0 if
    /// needed. Returns the new value.
    pub async fn incr_float(&self, name: &str, delta: f64) -> Result<f64> {
        let now = now_ms();
        let mut tx = self.conn.lock().await;
        let current = match select_value(&mut tx, name, now).await? {
            Some(value) => value.to_float()?,
            None => 0.0,
        };
        let next = current + delta;
        let encoded = Scalar::Float(next).encode()?;
        put(&mut tx, name, &encoded, Expiry::Keep, now).await?;
        Ok(next)
    }

    /// Returns the value and deletes the key.
    pub async fn get_delete(&self, name: &str) -> Result<Option<Value>> {
        let now = now_ms();
        let mut tx = self.conn.lock().await;
        let value = select_value(&mut tx, name, now).await?;
        if value.is_some() {
            keys::delete_live(&mut tx, &[name], now).await?;
        }
        Ok(value)
    }

    /// Deletes keys. Returns how many existed.
    pub async fn delete<S: AsRef<str> + Sync>(&self, names: &[S]) -> Result<u64> {
        let mut tx = self.conn.lock().await;
        keys::delete_live(&mut tx, names, now_ms()).await
    }
}

fn encode_all(items: &[KeyValue]) -> Result<Vec<Bytes>> {
    items.iter().map(|kv| kv.value.encode()).collect()
}

/// String operations, each in its own transaction.
#[derive(Debug, Clone)]
pub struct StringDb {
    store: Store<StringTx>,
}

impl StringDb {
    pub fn new(store: Store<StringTx>) -> Self {
        Self { store }
    }

    pub async fn get(&self, name: &str) -> Result<Option<Value>> {
        self.store.view(|tx| async move { tx.get(name).await }).await
    }

    pub async fn get_many<S: AsRef<str> + Sync>(&self, names: &[S]) -> Result<Vec<Option<Value>>> {
        self.store
            .view(|tx| async move { tx.get_many(names).await })
            .await
    }

    pub async fn set(&self, name: &str, value: impl Into<Scalar>) -> Result<()> {
        let value = value.into();
        self.store
            .update(|tx| async move { tx.set(name, value).await })
            .await
    }

    pub async fn set_expires(&self, name: &str, value: impl Into<Scalar>, ttl: Duration) -> Result<()> {
        let value = value.into();
        self.store
            .update(|tx| async move { tx.set_expires(name, value, ttl).await })
            .await
    }

    pub async fn set_not_exists(&self, name: &str, value: impl Into<Scalar>, ttl: Duration) -> Result<bool> {
        let value = value.into();
        self.store
            .update(|tx| async move { tx.set_not_exists(name, value, ttl).await })
            .await
    }

    pub async fn set_exists(&self, name: &str, value: impl Into<Scalar>, ttl: Duration) -> Result<bool> {
        let value = value.into();
        self.store
            .update(|tx| async move { tx.set_exists(name, value, ttl).await })
            .await
    }

    pub async fn get_set(&self, name: &str, value: impl Into<Scalar>) -> Result<Option<Value>> {
        let value = value.into();
        self.store
            .update(|tx| async move { tx.get_set(name, value).await })
            .await
    }

    pub fn set_with<'a>(&'a self, name: &'a str, value: impl Into<Scalar>) -> SetCmd<'a> {
        SetCmd::new(SetTarget::Db(self), name, value.into())
    }

    pub async fn set_many(&self, items: &[KeyValue]) -> Result<()> {
        self.store
            .update(|tx| async move { tx.set_many(items).await })
            .await
    }

    pub async fn set_many_nx(&self, items: &[KeyValue]) -> Result<bool> {
        self.store
            .update(|tx| async move { tx.set_many_nx(items).await })
            .await
    }

    pub async fn append(&self, name: &str, value: impl Into<Scalar>) -> Result<usize> {
        let value = value.into();
        self.store
            .update(|tx| async move { tx.append(name, value).await })
            .await
    }

    pub async fn set_range(&self, name: &str, offset: usize, value: impl Into<Scalar>) -> Result<usize> {
        let value = value.into();
        self.store
            .update(|tx| async move { tx.set_range(name, offset, value).await })
            .await
    }

    pub async fn get_range(&self, name: &str, start: i64, end: i64) -> Result<Value> {
        self.store
            .view(|tx| async move { tx.get_range(name, start, end).await })
            .await
    }

    pub async fn len(&self, name: &str) -> Result<usize> {
        self.store.view(|tx| async move { tx.len(name).await }).await
    }

    pub async fn incr(&self, name: &str, delta: i64) -> Result<i64> {
        self.store
            .update(|tx| async move { tx.incr(name, delta).await })
            .await
    }

    pub async fn incr_float(&self, name: &str, delta: f64) -> Result<f64> {
        self.store
            .update(|tx| async move { tx.incr_float(name, delta).await })
            .await
    }

    pub async fn get_delete(&self, name: &str) -> Result<Option<Value>> {
        self.store
            .update(|tx| async move { tx.get_delete(name).await })
            .await
    }

    pub async fn delete<S: AsRef<str> + Sync>(&self, names: &[S]) -> Result<u64> {
        self.store
            .update(|tx| async move { tx.delete(names).await })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;
    use crate::storage::Db;
    use tokio_test::assert_ok;

    async fn open() -> Db {
        Db::open(Options::memory().without_expiry()).await.unwrap()
    }

    async fn get_str(db: &Db, name: &str) -> Option<String> {
        db.strings()
            .get(name)
            .await
            .unwrap()
            .map(|v| v.to_string())
    }

    #[test]
    fn test_byte_range() {
        assert_eq!(byte_range(5, 0, -1), Some((0, 4)));
        assert_eq!(byte_range(5, 1, 2), Some((1, 2)));
        assert_eq!(byte_range(5, -3, -2), Some((2, 3)));
        assert_eq!(byte_range(5, 0, 100), Some((0, 4)));
        assert_eq!(byte_range(5, 3, 1), None);
        assert_eq!(byte_range(5, 10, 20), None);
        assert_eq!(byte_range(0, 0, -1), None);
        assert_eq!(byte_range(5, 0, -100), Some((0, 0)));
        assert_eq!(byte_range(5, -100, -100), Some((0, 0)));
        assert_eq!(byte_range(5, -1, -3), None);
    }

    #[tokio::test]
    async fn test_set_get() {
        let db = open().await;
        assert_ok!(db.strings().set("name", "alice").await);
        assert_eq!(get_str(&db, "name").await.as_deref(), Some("alice"));
        assert!(db.strings().get("missing").await.unwrap().is_none());

        db.strings().set("age", 25).await.unwrap();
        assert_eq!(db.strings().get("age").await.unwrap().unwrap().to_int().unwrap(), 25);

        db.strings().set("ok", true).await.unwrap();
        assert!(db.strings().get("ok").await.unwrap().unwrap().to_bool().unwrap());
    }

    #[tokio::test]
    async fn test_set_rejects_bad_values() {
        let db = open().await;
        let res = db.strings().set("x", f64::NAN).await;
        assert!(matches!(res, Err(Error::ValueType)));
        assert!(db.keys().get("x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let db = open().await;
        db.update(|tx| async move {
            let mut conn = tx.strings().conn.lock().await;
            keys::write_key(&mut conn, "h", TypeId::Hash, Expiry::Keep, now_ms()).await?;
            Ok(())
        })
        .await
        .unwrap();

        assert!(matches!(db.strings().get("h").await, Err(Error::KeyType)));
        assert!(matches!(db.strings().set("h", "v").await, Err(Error::KeyType)));
        assert!(matches!(db.strings().incr("h", 1).await, Err(Error::KeyType)));
        assert_eq!(db.strings().get_many(&["h"]).await.unwrap(), vec![None]);
    }

    #[tokio::test]
    async fn test_set_clears_ttl() {
        let db = open().await;
        db.strings()
            .set_expires("name", "alice", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(db.keys().get("name").await.unwrap().unwrap().etime.is_some());

        db.strings().set_expires("name", "bob", Duration::ZERO).await.unwrap();
        assert_eq!(db.keys().get("name").await.unwrap().unwrap().etime, None);
        assert_eq!(get_str(&db, "name").await.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_expired_key_is_replaced() {
        let db = open().await;
        db.strings().set("name", "alice").await.unwrap();
        db.keys().expire("name", Duration::ZERO).await.unwrap();
        assert!(db.strings().get("name").await.unwrap().is_none());

        // A mutating write on a dead key starts from scratch.
        assert_eq!(db.strings().append("name", "bob").await.unwrap(), 3);
        let key = db.keys().get("name").await.unwrap().unwrap();
        assert_eq!(key.version, 1);
        assert_eq!(key.etime, None);
    }

    #[tokio::test]
    async fn test_set_not_exists_and_exists() {
        let db = open().await;
        let s = db.strings();
        assert!(!s.set_exists("k", "v1", Duration::ZERO).await.unwrap());
        assert!(s.get("k").await.unwrap().is_none());

        assert!(s.set_not_exists("k", "v1", Duration::ZERO).await.unwrap());
        assert!(!s.set_not_exists("k", "v2", Duration::ZERO).await.unwrap());
        assert_eq!(get_str(&db, "k").await.as_deref(), Some("v1"));

        assert!(s.set_exists("k", "v3", Duration::from_secs(60)).await.unwrap());
        assert_eq!(get_str(&db, "k").await.as_deref(), Some("v3"));
        assert!(db.keys().get("k").await.unwrap().unwrap().etime.is_some());
    }

    #[tokio::test]
    async fn test_get_set() {
        let db = open().await;
        assert!(db.strings().get_set("k", "a").await.unwrap().is_none());
        db.keys().expire("k", Duration::from_secs(60)).await.unwrap();

        let prev = db.strings().get_set("k", "b").await.unwrap();
        assert_eq!(prev.unwrap().to_string(), "a");
        assert_eq!(db.keys().get("k").await.unwrap().unwrap().etime, None);
    }

    #[tokio::test]
    async fn test_set_with_options() {
        let db = open().await;
        let s = db.strings();

        let out = s.set_with("k", "a").if_exists().run().await.unwrap();
        assert_eq!(out, SetOut::default());

        let out = s.set_with("k", "a").if_not_exists().run().await.unwrap();
        assert!(out.created && !out.updated);

        let out = s
            .set_with("k", "b")
            .ttl(Duration::from_secs(60))
            .run()
            .await
            .unwrap();
        assert_eq!(out.prev.unwrap().to_string(), "a");
        assert!(out.updated);
        let etime = db.keys().get("k").await.unwrap().unwrap().etime;
        assert!(etime.is_some());

        s.set_with("k", "c").keep_ttl().run().await.unwrap();
        assert_eq!(db.keys().get("k").await.unwrap().unwrap().etime, etime);

        let at = now_ms() + 10_000;
        s.set_with("k", "d").at(at).run().await.unwrap();
        assert_eq!(db.keys().get("k").await.unwrap().unwrap().etime, Some(at));
    }

    #[tokio::test]
    async fn test_get_many() {
        let db = open().await;
        db.strings().set("a", 1).await.unwrap();
        db.strings().set("c", 3).await.unwrap();
        let values = db.strings().get_many(&["a", "b", "c", "a"]).await.unwrap();
        let values: Vec<Option<String>> =
            values.into_iter().map(|v| v.map(|v| v.to_string())).collect();
        assert_eq!(
            values,
            [Some("1".into()), None, Some("3".into()), Some("1".into())]
        );
    }

    #[tokio::test]
    async fn test_set_many() {
        let db = open().await;
        db.strings()
            .set_expires("a", "old", Duration::from_secs(60))
            .await
            .unwrap();
        let items = [KeyValue::new("a", 1), KeyValue::new("b", "two")];
        assert_ok!(db.strings().set_many(&items).await);
        assert_eq!(get_str(&db, "a").await.as_deref(), Some("1"));
        assert_eq!(get_str(&db, "b").await.as_deref(), Some("two"));
        assert_eq!(db.keys().get("a").await.unwrap().unwrap().etime, None);

        // One bad value means nothing is written.
        let items = [KeyValue::new("c", 1), KeyValue::new("d", f64::INFINITY)];
        assert!(db.strings().set_many(&items).await.is_err());
        assert_eq!(db.keys().exists(&["c", "d"]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_many_nx() {
        let db = open().await;
        db.strings().set("a", "old").await.unwrap();

        let items = [KeyValue::new("a", 1), KeyValue::new("b", 2)];
        assert!(!db.strings().set_many_nx(&items).await.unwrap());
        assert_eq!(get_str(&db, "a").await.as_deref(), Some("old"));
        assert!(db.strings().get("b").await.unwrap().is_none());

        let items = [KeyValue::new("b", 2), KeyValue::new("c", 3)];
        assert!(db.strings().set_many_nx(&items).await.unwrap());
        assert_eq!(db.keys().exists(&["b", "c"]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_append_keeps_ttl() {
        let db = open().await;
        assert_eq!(db.strings().append("city", "par").await.unwrap(), 3);
        assert_eq!(db.keys().get("city").await.unwrap().unwrap().etime, None);

        db.keys().expire("city", Duration::from_secs(60)).await.unwrap();
        let etime = db.keys().get("city").await.unwrap().unwrap().etime;
        assert_eq!(db.strings().append("city", "is").await.unwrap(), 5);
        assert_eq!(get_str(&db, "city").await.as_deref(), Some("paris"));
        assert_eq!(db.keys().get("city").await.unwrap().unwrap().etime, etime);
    }

    #[tokio::test]
    async fn test_set_range() {
        let db = open().await;
        db.strings().set("k", "Hello World").await.unwrap();
        assert_eq!(db.strings().set_range("k", 6, "Redis").await.unwrap(), 11);
        assert_eq!(get_str(&db, "k").await.as_deref(), Some("Hello Redis"));

        assert_eq!(db.strings().set_range("pad", 3, "x").await.unwrap(), 4);
        let value = db.strings().get("pad").await.unwrap().unwrap();
        assert_eq!(value.as_bytes(), b"\0\0\0x");

        assert_eq!(db.strings().set_range("none", 5, "").await.unwrap(), 0);
        assert!(db.keys().get("none").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_range_and_len() {
        let db = open().await;
        db.strings().set("k", "This is a string").await.unwrap();
        let s = db.strings();
        assert_eq!(s.get_range("k", 0, 3).await.unwrap().to_string(), "This");
        assert_eq!(s.get_range("k", -3, -1).await.unwrap().to_string(), "ing");
        assert_eq!(s.get_range("k", 10, 100).await.unwrap().to_string(), "string");
        assert!(s.get_range("missing", 0, -1).await.unwrap().is_empty());
        assert_eq!(s.len("k").await.unwrap(), 16);
    }

    #[tokio::test]
    async fn test_get_range_clamps_negative_end() {
        let db = open().await;
        db.strings().set("k", "hello").await.unwrap();
        let s = db.strings();
        assert_eq!(s.get_range("k", 0, -100).await.unwrap().to_string(), "h");
        assert_eq!(s.get_range("k", -100, 1).await.unwrap().to_string(), "he");
        assert!(s.get_range("k", -1, -3).await.unwrap().is_empty());
        assert_eq!(s.len("missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_incr() {
        let db = open().await;
        let s = db.strings();
        assert_eq!(s.incr("n", 1).await.unwrap(), 1);
        assert_eq!(s.incr("n", 41).await.unwrap(), 42);
        assert_eq!(s.incr("n", -50).await.unwrap(), -8);
        assert_eq!(db.keys().get("n").await.unwrap().unwrap().etime, None);

        s.set("big", i64::MAX).await.unwrap();
        assert!(matches!(s.incr("big", 1).await, Err(Error::Overflow)));

        s.set("word", "abc").await.unwrap();
        assert!(matches!(s.incr("word", 1).await, Err(Error::NotInteger)));
        assert_eq!(get_str(&db, "word").await.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_incr_keeps_ttl() {
        let db = open().await;
        db.strings()
            .set_expires("n", 10, Duration::from_secs(60))
            .await
            .unwrap();
        let etime = db.keys().get("n").await.unwrap().unwrap().etime;
        db.strings().incr("n", 5).await.unwrap();
        let key = db.keys().get("n").await.unwrap().unwrap();
        assert_eq!(key.etime, etime);
        assert_eq!(key.version, 2);
    }

    #[tokio::test]
    async fn test_incr_float() {
        let db = open().await;
        let s = db.strings();
        assert_eq!(s.incr_float("f", 10.5).await.unwrap(), 10.5);
        assert_eq!(s.incr_float("f", 0.1).await.unwrap(), 10.6);
        assert_eq!(get_str(&db, "f").await.as_deref(), Some("10.6"));

        s.set("word", "abc").await.unwrap();
        assert!(matches!(s.incr_float("word", 1.0).await, Err(Error::NotFloat)));

        s.set("huge", 1.0e308).await.unwrap();
        assert!(matches!(
            s.incr_float("huge", 1.0e308).await,
            Err(Error::ValueType)
        ));
    }

    #[tokio::test]
    async fn test_get_delete_and_delete() {
        let db = open().await;
        db.strings().set("a", "1").await.unwrap();
        db.strings().set("b", "2").await.unwrap();

        assert_eq!(db.strings().get_delete("a").await.unwrap().unwrap().to_string(), "1");
        assert!(db.strings().get_delete("a").await.unwrap().is_none());

        assert_eq!(db.strings().delete(&["a", "b"]).await.unwrap(), 1);
        assert_eq!(db.keys().len().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_incr() {
        let db = open().await;
        let (tasks, rounds) = (8, 25);

        let mut handles = Vec::new();
        for _ in 0..tasks {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..rounds {
                    db.strings().incr("counter", 1).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let value = db.strings().get("counter").await.unwrap().unwrap();
        assert_eq!(value.to_int().unwrap(), tasks * rounds);
    }
}
