//! String commands.

use super::parser::{self, ParseError, ParseResult, Pipeline};
use super::Redis;
use crate::error::Result;
use crate::protocol::Reply;
use crate::storage::Tx;
use crate::types::{KeyValue, Value};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

fn value_reply(value: Option<Value>) -> Reply {
    Reply::bulk_or_null(value.map(Value::into_bytes))
}

/// GET key
#[derive(Debug, Default)]
pub struct Get {
    key: String,
}

impl Get {
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
impl Redis for Get {
    fn name(&self) -> &'static str {
        "get"
    }

    fn readonly(&self) -> bool {
        true
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        Ok(value_reply(tx.strings().get(&self.key).await?))
    }
}

/// Expiry requested by SET.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SetExpiry {
    #[default]
    Clear,
    Ttl(Duration),
    At(i64),
    Keep,
}

/// SET key value [NX | XX] [GET] [EX seconds | PX milliseconds |
/// EXAT unix-seconds | PXAT unix-milliseconds | KEEPTTL]
#[derive(Debug, Default)]
pub struct Set {
    key: String,
    value: Bytes,
    nx: bool,
    xx: bool,
    get: bool,
    expiry: SetExpiry,
}

impl Set {
    pub fn parse(args: &[Bytes]) -> ParseResult<Self> {
        let mut cmd = Self::default();
        let (mut ex, mut px, mut exat, mut pxat) = (None, None, None, None);
        let mut keep_ttl = false;
        Pipeline::new()
            .required(2)
            .arg(parser::string(&mut cmd.key))
            .arg(parser::bytes(&mut cmd.value))
            .arg(parser::one_of(vec![
                parser::flag("nx", &mut cmd.nx),
                parser::flag("xx", &mut cmd.xx),
            ]))
            .arg(parser::flag("get", &mut cmd.get))
            .arg(parser::one_of(vec![
                parser::named("ex", vec![parser::opt_int(&mut ex)]),
                parser::named("px", vec![parser::opt_int(&mut px)]),
                parser::named("exat", vec![parser::opt_int(&mut exat)]),
                parser::named("pxat", vec![parser::opt_int(&mut pxat)]),
                parser::flag("keepttl", &mut keep_ttl),
            ]))
            .run(args)?;

        cmd.expiry = match (ex, px, exat, pxat) {
            (Some(s), ..) => SetExpiry::Ttl(Duration::from_millis(
                parser::positive_ms(s, 1000, "set")? as u64,
            )),
            (_, Some(ms), ..) => {
                SetExpiry::Ttl(Duration::from_millis(parser::positive_ms(ms, 1, "set")? as u64))
            }
            (_, _, Some(s), _) => SetExpiry::At(parser::positive_ms(s, 1000, "set")?),
            (_, _, _, Some(ms)) => SetExpiry::At(parser::positive_ms(ms, 1, "set")?),
            _ if keep_ttl => SetExpiry::Keep,
            _ => SetExpiry::Clear,
        };
        Ok(cmd)
    }
}

#[async_trait]
impl Redis for Set {
    fn name(&self) -> &'static str {
        "set"
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        let mut set = tx.strings().set_with(&self.key, self.value.clone());
        if self.nx {
            set = set.if_not_exists();
        }
        if self.xx {
            set = set.if_exists();
        }
        set = match self.expiry {
            SetExpiry::Clear => set,
            SetExpiry::Ttl(ttl) => set.ttl(ttl),
            SetExpiry::At(at) => set.at(at),
            SetExpiry::Keep => set.keep_ttl(),
        };

        let out = set.run().await?;
        if self.get {
            return Ok(value_reply(out.prev));
        }
        if out.created || out.updated {
            Ok(Reply::ok())
        } else {
            Ok(Reply::Null)
        }
    }
}

/// SETNX key value
#[derive(Debug, Default)]
pub struct SetNx {
    key: String,
    value: Bytes,
}

impl SetNx {
    pub fn parse(args: &[Bytes]) -> ParseResult<Self> {
        let mut cmd = Self::default();
        Pipeline::new()
            .required(2)
            .arg(parser::string(&mut cmd.key))
            .arg(parser::bytes(&mut cmd.value))
            .run(args)?;
        Ok(cmd)
    }
}

#[async_trait]
impl Redis for SetNx {
    fn name(&self) -> &'static str {
        "setnx"
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        let ok = tx
            .strings()
            .set_not_exists(&self.key, self.value.clone(), Duration::ZERO)
            .await?;
        Ok(Reply::integer(ok as i64))
    }
}

/// SETEX key seconds value, PSETEX key milliseconds value
#[derive(Debug)]
pub struct SetEx {
    name: &'static str,
    key: String,
    ttl: Duration,
    value: Bytes,
}

impl SetEx {
    pub fn parse(name: &'static str, args: &[Bytes]) -> ParseResult<Self> {
        let (mut key, mut ttl, mut value) = (String::new(), 0, Bytes::new());
        Pipeline::new()
            .required(3)
            .arg(parser::string(&mut key))
            .arg(parser::int(&mut ttl))
            .arg(parser::bytes(&mut value))
            .run(args)?;
        let unit = if name == "setex" { 1000 } else { 1 };
        let ms = parser::positive_ms(ttl, unit, name)?;
        Ok(Self {
            name,
            key,
            ttl: Duration::from_millis(ms as u64),
            value,
        })
    }
}

#[async_trait]
impl Redis for SetEx {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        tx.strings()
            .set_expires(&self.key, self.value.clone(), self.ttl)
            .await?;
        Ok(Reply::ok())
    }
}

/// GETSET key value
#[derive(Debug, Default)]
pub struct GetSet {
    key: String,
    value: Bytes,
}

impl GetSet {
    pub fn parse(args: &[Bytes]) -> ParseResult<Self> {
        let mut cmd = Self::default();
        Pipeline::new()
            .required(2)
            .arg(parser::string(&mut cmd.key))
            .arg(parser::bytes(&mut cmd.value))
            .run(args)?;
        Ok(cmd)
    }
}

#[async_trait]
impl Redis for GetSet {
    fn name(&self) -> &'static str {
        "getset"
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        let prev = tx.strings().get_set(&self.key, self.value.clone()).await?;
        Ok(value_reply(prev))
    }
}

/// GETDEL key
#[derive(Debug, Default)]
pub struct GetDel {
    key: String,
}

impl GetDel {
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
impl Redis for GetDel {
    fn name(&self) -> &'static str {
        "getdel"
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        Ok(value_reply(tx.strings().get_delete(&self.key).await?))
    }
}

/// MGET key [key ...]
#[derive(Debug, Default)]
pub struct MGet {
    keys: Vec<String>,
}

impl MGet {
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
impl Redis for MGet {
    fn name(&self) -> &'static str {
        "mget"
    }

    fn readonly(&self) -> bool {
        true
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        let values = tx.strings().get_many(&self.keys).await?;
        Ok(Reply::array(values.into_iter().map(value_reply).collect()))
    }
}

/// MSET key value [key value ...]
#[derive(Debug, Default)]
pub struct MSet {
    items: Vec<KeyValue>,
}

impl MSet {
    pub fn parse(args: &[Bytes]) -> ParseResult<Self> {
        let mut cmd = Self::default();
        Pipeline::new()
            .required(2)
            .arg(parser::key_values(&mut cmd.items))
            .run(args)?;
        Ok(cmd)
    }
}

#[async_trait]
impl Redis for MSet {
    fn name(&self) -> &'static str {
        "mset"
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        tx.strings().set_many(&self.items).await?;
        Ok(Reply::ok())
    }
}

/// MSETNX key value [key value ...]
#[derive(Debug, Default)]
pub struct MSetNx {
    items: Vec<KeyValue>,
}

impl MSetNx {
    pub fn parse(args: &[Bytes]) -> ParseResult<Self> {
        let mut cmd = Self::default();
        Pipeline::new()
            .required(2)
            .arg(parser::key_values(&mut cmd.items))
            .run(args)?;
        Ok(cmd)
    }
}

#[async_trait]
impl Redis for MSetNx {
    fn name(&self) -> &'static str {
        "msetnx"
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        let ok = tx.strings().set_many_nx(&self.items).await?;
        Ok(Reply::integer(ok as i64))
    }
}

/// APPEND key value
#[derive(Debug, Default)]
pub struct Append {
    key: String,
    value: Bytes,
}

impl Append {
    pub fn parse(args: &[Bytes]) -> ParseResult<Self> {
        let mut cmd = Self::default();
        Pipeline::new()
            .required(2)
            .arg(parser::string(&mut cmd.key))
            .arg(parser::bytes(&mut cmd.value))
            .run(args)?;
        Ok(cmd)
    }
}

#[async_trait]
impl Redis for Append {
    fn name(&self) -> &'static str {
        "append"
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        let len = tx.strings().append(&self.key, self.value.clone()).await?;
        Ok(Reply::integer(len as i64))
    }
}

/// STRLEN key
#[derive(Debug, Default)]
pub struct Strlen {
    key: String,
}

impl Strlen {
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
impl Redis for Strlen {
    fn name(&self) -> &'static str {
        "strlen"
    }

    fn readonly(&self) -> bool {
        true
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        let len = tx.strings().len(&self.key).await?;
        Ok(Reply::integer(len as i64))
    }
}

/// GETRANGE key start end
#[derive(Debug, Default)]
pub struct GetRange {
    key: String,
    start: i64,
    end: i64,
}

impl GetRange {
    pub fn parse(args: &[Bytes]) -> ParseResult<Self> {
        let mut cmd = Self::default();
        Pipeline::new()
            .required(3)
            .arg(parser::string(&mut cmd.key))
            .arg(parser::int(&mut cmd.start))
            .arg(parser::int(&mut cmd.end))
            .run(args)?;
        Ok(cmd)
    }
}

#[async_trait]
impl Redis for GetRange {
    fn name(&self) -> &'static str {
        "getrange"
    }

    fn readonly(&self) -> bool {
        true
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        let value = tx
            .strings()
            .get_range(&self.key, self.start, self.end)
            .await?;
        Ok(Reply::bulk(value.into_bytes()))
    }
}

/// SETRANGE key offset value
#[derive(Debug, Default)]
pub struct SetRange {
    key: String,
    offset: usize,
    value: Bytes,
}

impl SetRange {
    pub fn parse(args: &[Bytes]) -> ParseResult<Self> {
        let (mut key, mut offset, mut value) = (String::new(), 0, Bytes::new());
        Pipeline::new()
            .required(3)
            .arg(parser::string(&mut key))
            .arg(parser::int(&mut offset))
            .arg(parser::bytes(&mut value))
            .run(args)?;
        let offset = usize::try_from(offset).map_err(|_| ParseError::InvalidInt)?;
        Ok(Self { key, offset, value })
    }
}

#[async_trait]
impl Redis for SetRange {
    fn name(&self) -> &'static str {
        "setrange"
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        let len = tx
            .strings()
            .set_range(&self.key, self.offset, self.value.clone())
            .await?;
        Ok(Reply::integer(len as i64))
    }
}

/// INCR key, INCRBY key increment, DECR key, DECRBY key decrement
#[derive(Debug)]
pub struct Incr {
    name: &'static str,
    key: String,
    delta: i64,
}

impl Incr {
    pub fn parse(name: &'static str, args: &[Bytes]) -> ParseResult<Self> {
        let mut key = String::new();
        let mut by = 1;
        let by_arg = name.ends_with("by");
        let mut pipeline = Pipeline::new().arg(parser::string(&mut key));
        if by_arg {
            pipeline = pipeline.required(2).arg(parser::int(&mut by));
        } else {
            pipeline = pipeline.required(1);
        }
        pipeline.run(args)?;

        let delta = if name.starts_with("decr") {
            by.checked_neg().ok_or(ParseError::InvalidInt)?
        } else {
            by
        };
        Ok(Self { name, key, delta })
    }
}

#[async_trait]
impl Redis for Incr {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        let value = tx.strings().incr(&self.key, self.delta).await?;
        Ok(Reply::integer(value))
    }
}

/// INCRBYFLOAT key increment
#[derive(Debug, Default)]
pub struct IncrByFloat {
    key: String,
    delta: f64,
}

impl IncrByFloat {
    pub fn parse(args: &[Bytes]) -> ParseResult<Self> {
        let mut cmd = Self::default();
        Pipeline::new()
            .required(2)
            .arg(parser::string(&mut cmd.key))
            .arg(parser::float(&mut cmd.delta))
            .run(args)?;
        Ok(cmd)
    }
}

#[async_trait]
impl Redis for IncrByFloat {
    fn name(&self) -> &'static str {
        "incrbyfloat"
    }

    async fn run(&self, tx: &Tx) -> Result<Reply> {
        let value = tx.strings().incr_float(&self.key, self.delta).await?;
        Ok(Reply::bulk(value.to_string()))
    }
}
