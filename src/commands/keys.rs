//! Key commands.

use super::parser::{self, ParseError, ParseResult, Pipeline};
use super::Redis;
use crate::error::Result;
use crate::protocol::Reply;
use crate::storage::Tx;
use crate::types::{now_ms, TypeId};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// Multiplier from the command's time unit to milliseconds.
fn unit_ms(name: &str) -> i64 {
    if name.starts_with('p') {
        1
    } else {
        1000
    }
}

fn key_names(keys: Vec<crate::types::Key>) -> Reply {
    Reply::array(keys.into_iter().map(|k| Reply::bulk(k.name)).collect())
}

/// DEL key [key ...], UNLINK key [key ...]
#[derive(Debug, Default)]
pub struct Del {
    keys: Vec<String>,
}

impl Del {
    pub fn parse(args: &[Bytes]) -> ParseResult<Self> {
        let mut cmd = Self::default();
        Pipeline::new()
            .required(1)
            .arg(parser::strings(&mut cmd.keys))
            .run(args)?;
        Ok(cmd)
    }
}

#[async_trait]
impl Redis for Del {
    fn name(&self) -> &'static str {
        "del"
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        let n = tx.keys().delete(&self.keys).await?;
        Ok(Reply::integer(n as i64))
    }
}

/// EXISTS key [key ...]
#[derive(Debug, Default)]
pub struct Exists {
    keys: Vec<String>,
}

impl Exists {
    pub fn parse(args: &[Bytes]) -> ParseResult<Self> {
        let mut cmd = Self::default();
        Pipeline::new()
            .required(1)
            .arg(parser::strings(&mut cmd.keys))
            .run(args)?;
        Ok(cmd)
    }
}

#[async_trait]
impl Redis for Exists {
    fn name(&self) -> &'static str {
        "exists"
    }

    fn readonly(&self) -> bool {
        true
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        Ok(Reply::integer(tx.keys().exists(&self.keys).await?))
    }
}

/// EXPIRE key seconds, PEXPIRE key milliseconds
///
/// A TTL of zero or less expires the key immediately.
#[derive(Debug)]
pub struct Expire {
    name: &'static str,
    key: String,
    ttl_ms: i64,
}

impl Expire {
    pub fn parse(name: &'static str, args: &[Bytes]) -> ParseResult<Self> {
        let (mut key, mut ttl) = (String::new(), 0);
        Pipeline::new()
            .required(2)
            .arg(parser::string(&mut key))
            .arg(parser::int(&mut ttl))
            .run(args)?;
        let ttl_ms = ttl
            .checked_mul(unit_ms(name))
            .ok_or(ParseError::InvalidExpireTime(name))?;
        Ok(Self { name, key, ttl_ms })
    }
}

#[async_trait]
impl Redis for Expire {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        let ttl = Duration::from_millis(self.ttl_ms.max(0) as u64);
        let ok = tx.keys().expire(&self.key, ttl).await?;
        Ok(Reply::integer(ok as i64))
    }
}

/// EXPIREAT key unix-seconds, PEXPIREAT key unix-milliseconds
#[derive(Debug)]
pub struct ExpireAt {
    name: &'static str,
    key: String,
    at: i64,
}

impl ExpireAt {
    pub fn parse(name: &'static str, args: &[Bytes]) -> ParseResult<Self> {
        let (mut key, mut at) = (String::new(), 0);
        Pipeline::new()
            .required(2)
            .arg(parser::string(&mut key))
            .arg(parser::int(&mut at))
            .run(args)?;
        let at = at
            .checked_mul(unit_ms(name))
            .ok_or(ParseError::InvalidExpireTime(name))?;
        Ok(Self { name, key, at })
    }
}

#[async_trait]
impl Redis for ExpireAt {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        let ok = tx.keys().expire_at(&self.key, self.at).await?;
        Ok(Reply::integer(ok as i64))
    }
}

/// PERSIST key
#[derive(Debug, Default)]
pub struct Persist {
    key: String,
}

impl Persist {
    pub fn parse(args: &[Bytes]) -> ParseResult<Self> {
        let mut cmd = Self::default();
        Pipeline::new()
            .required(1)
            .arg(parser::string(&mut cmd.key))
            .run(args)?;
        Ok(cmd)
    }
}

#[async_trait]
impl Redis for Persist {
    fn name(&self) -> &'static str {
        "persist"
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        let ok = tx.keys().persist(&self.key).await?;
        Ok(Reply::integer(ok as i64))
    }
}

/// TTL key, PTTL key
///
/// Replies -2 if the key does not exist and -1 if it has no expiry.
#[derive(Debug)]
pub struct Ttl {
    name: &'static str,
    key: String,
}

impl Ttl {
    pub fn parse(name: &'static str, args: &[Bytes]) -> ParseResult<Self> {
        let mut key = String::new();
        Pipeline::new()
            .required(1)
            .arg(parser::string(&mut key))
            .run(args)?;
        Ok(Self { name, key })
    }
}

#[async_trait]
impl Redis for Ttl {
    fn name(&self) -> &'static str {
        self.name
    }

    fn readonly(&self) -> bool {
        true
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        let Some(key) = tx.keys().get(&self.key).await? else {
            return Ok(Reply::integer(-2));
        };
        let ttl = match key.ttl_ms(now_ms()) {
            None => -1,
            Some(ms) if self.name == "pttl" => ms,
            Some(ms) => (ms + 500) / 1000,
        };
        Ok(Reply::integer(ttl))
    }
}

/// TYPE key
#[derive(Debug, Default)]
pub struct Type {
    key: String,
}

impl Type {
    pub fn parse(args: &[Bytes]) -> ParseResult<Self> {
        let mut cmd = Self::default();
        Pipeline::new()
            .required(1)
            .arg(parser::string(&mut cmd.key))
            .run(args)?;
        Ok(cmd)
    }
}

#[async_trait]
impl Redis for Type {
    fn name(&self) -> &'static str {
        "type"
    }

    fn readonly(&self) -> bool {
        true
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        let key = tx.keys().get(&self.key).await?;
        Ok(Reply::status(key.map_or("none", |k| k.ktype.as_str())))
    }
}

/// KEYS pattern
#[derive(Debug, Default)]
pub struct Keys {
    pattern: String,
}

impl Keys {
    pub fn parse(args: &[Bytes]) -> ParseResult<Self> {
        let mut cmd = Self::default();
        Pipeline::new()
            .required(1)
            .arg(parser::string(&mut cmd.pattern))
            .run(args)?;
        Ok(cmd)
    }
}

#[async_trait]
impl Redis for Keys {
    fn name(&self) -> &'static str {
        "keys"
    }

    fn readonly(&self) -> bool {
        true
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        Ok(key_names(tx.keys().search(&self.pattern).await?))
    }
}

/// SCAN cursor [MATCH pattern] [COUNT count] [TYPE type]
#[derive(Debug)]
pub struct Scan {
    cursor: i64,
    pattern: String,
    count: usize,
    ktype: Option<TypeId>,
}

impl Scan {
    pub fn parse(args: &[Bytes]) -> ParseResult<Self> {
        let (mut cursor, mut pattern, mut count, mut ktype) =
            (0, String::from("*"), None, String::new());
        Pipeline::new()
            .required(1)
            .arg(parser::int(&mut cursor))
            .arg(parser::named("match", vec![parser::string(&mut pattern)]))
            .arg(parser::named("count", vec![parser::opt_int(&mut count)]))
            .arg(parser::named("type", vec![parser::string(&mut ktype)]))
            .run(args)?;

        let count = match count {
            None => 0,
            Some(n) if n >= 1 => n as usize,
            Some(_) => return Err(ParseError::Syntax),
        };
        let ktype = if ktype.is_empty() {
            None
        } else {
            Some(ktype.parse::<TypeId>().map_err(|_| ParseError::Syntax)?)
        };
        Ok(Self {
            cursor,
            pattern,
            count,
            ktype,
        })
    }
}

#[async_trait]
impl Redis for Scan {
    fn name(&self) -> &'static str {
        "scan"
    }

    fn readonly(&self) -> bool {
        true
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        let page = tx
            .keys()
            .scan(self.cursor, &self.pattern, self.ktype, self.count)
            .await?;
        Ok(Reply::array(vec![
            Reply::bulk(page.cursor.to_string()),
            key_names(page.keys),
        ]))
    }
}

/// RANDOMKEY
#[derive(Debug, Default)]
pub struct RandomKey;

impl RandomKey {
    pub fn parse(args: &[Bytes]) -> ParseResult<Self> {
        Pipeline::new().run(args)?;
        Ok(Self)
    }
}

#[async_trait]
impl Redis for RandomKey {
    fn name(&self) -> &'static str {
        "randomkey"
    }

    fn readonly(&self) -> bool {
        true
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        let key = tx.keys().random().await?;
        Ok(Reply::bulk_or_null(key.map(|k| k.name)))
    }
}

/// RENAME key newkey
#[derive(Debug, Default)]
pub struct Rename {
    key: String,
    new_key: String,
}

impl Rename {
    pub fn parse(args: &[Bytes]) -> ParseResult<Self> {
        let mut cmd = Self::default();
        Pipeline::new()
            .required(2)
            .arg(parser::string(&mut cmd.key))
            .arg(parser::string(&mut cmd.new_key))
            .run(args)?;
        Ok(cmd)
    }
}

#[async_trait]
impl Redis for Rename {
    fn name(&self) -> &'static str {
        "rename"
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        tx.keys().rename(&self.key, &self.new_key).await?;
        Ok(Reply::ok())
    }
}

/// RENAMENX key newkey
#[derive(Debug, Default)]
pub struct RenameNx {
    key: String,
    new_key: String,
}

impl RenameNx {
    pub fn parse(args: &[Bytes]) -> ParseResult<Self> {
        let mut cmd = Self::default();
        Pipeline::new()
            .required(2)
            .arg(parser::string(&mut cmd.key))
            .arg(parser::string(&mut cmd.new_key))
            .run(args)?;
        Ok(cmd)
    }
}

#[async_trait]
impl Redis for RenameNx {
    fn name(&self) -> &'static str {
        "renamenx"
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        let ok = tx.keys().rename_nx(&self.key, &self.new_key).await?;
        Ok(Reply::integer(ok as i64))
    }
}

/// DBSIZE
#[derive(Debug, Default)]
pub struct DbSize;

impl DbSize {
    pub fn parse(args: &[Bytes]) -> ParseResult<Self> {
        Pipeline::new().run(args)?;
        Ok(Self)
    }
}

#[async_trait]
impl Redis for DbSize {
    fn name(&self) -> &'static str {
        "dbsize"
    }

    fn readonly(&self) -> bool {
        true
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        Ok(Reply::integer(tx.keys().len().await?))
    }
}

/// FLUSHDB [ASYNC | SYNC], FLUSHALL [ASYNC | SYNC]
///
/// Both modes delete synchronously.
#[derive(Debug, Default)]
pub struct FlushDb;

impl FlushDb {
    pub fn parse(args: &[Bytes]) -> ParseResult<Self> {
        let (mut is_async, mut is_sync) = (false, false);
        Pipeline::new()
            .arg(parser::one_of(vec![
                parser::flag("async", &mut is_async),
                parser::flag("sync", &mut is_sync),
            ]))
            .run(args)?;
        Ok(Self)
    }
}

#[async_trait]
impl Redis for FlushDb {
    fn name(&self) -> &'static str {
        "flushdb"
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        tx.keys().delete_all().await?;
        Ok(Reply::ok())
    }
}
