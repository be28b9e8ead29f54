//! Key and Value Types
//!
//! The data model shared by every repository:
//!
//! - [`Key`]: one row of the key table (identity, type tag, version, TTL)
//! - [`Value`]: an opaque stored payload
//! - [`Scalar`]: the closed set of input types a caller may store
//! - [`KeyValue`] and [`ScanResult`]: multi-key inputs and scan pages
//!
//! All timestamps are milliseconds since the Unix epoch.

use crate::error::{Error, Result};
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Returns the current time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Converts a relative TTL into an absolute expiry time.
pub fn expire_at(now: i64, ttl: Duration) -> i64 {
    now.saturating_add(ttl.as_millis().min(i64::MAX as u128) as i64)
}

/// The type tag stored with every key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum TypeId {
    String = 1,
    List = 2,
    Set = 3,
    Hash = 4,
    ZSet = 5,
}

impl TypeId {
    /// Returns the name reported by the TYPE command.
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeId::String => "string",
            TypeId::List => "list",
            TypeId::Set => "set",
            TypeId::Hash => "hash",
            TypeId::ZSet => "zset",
        }
    }
}

impl TryFrom<i64> for TypeId {
    type Error = i64;

    fn try_from(value: i64) -> std::result::Result<Self, i64> {
        match value {
            1 => Ok(TypeId::String),
            2 => Ok(TypeId::List),
            3 => Ok(TypeId::Set),
            4 => Ok(TypeId::Hash),
            5 => Ok(TypeId::ZSet),
            other => Err(other),
        }
    }
}

impl FromStr for TypeId {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s.to_ascii_lowercase().as_str() {
            "string" => Ok(TypeId::String),
            "list" => Ok(TypeId::List),
            "set" => Ok(TypeId::Set),
            "hash" => Ok(TypeId::Hash),
            "zset" => Ok(TypeId::ZSet),
            _ => Err(()),
        }
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata for a key, as stored in the key table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    /// Stable surrogate id; also the scan cursor position.
    pub id: i64,
    /// Key name, unique among stored rows.
    pub name: String,
    /// Type of the value the key holds.
    pub ktype: TypeId,
    /// Incremented on every write to the key.
    pub version: i64,
    /// Expiry time, or `None` if the key never expires.
    pub etime: Option<i64>,
    /// Time of the last write.
    pub mtime: i64,
}

impl Key {
    /// Returns true if the key has not expired at `now`.
    pub fn is_live(&self, now: i64) -> bool {
        self.etime.map(|at| at > now).unwrap_or(true)
    }

    /// Returns the remaining TTL in milliseconds, or `None` if the key has
    /// no expiry.
    pub fn ttl_ms(&self, now: i64) -> Option<i64> {
        self.etime.map(|at| (at - now).max(0))
    }
}

/// A stored payload.
///
/// Values are opaque bytes; the typed accessors interpret them on demand
/// and fail with a type error when the bytes have the wrong shape.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Value(Bytes);

impl Value {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Value(data.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the value as UTF-8 text, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    /// Interprets the value as a signed 64-bit integer.
    pub fn to_int(&self) -> Result<i64> {
        self.as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or(Error::NotInteger)
    }

    /// Interprets the value as a finite float.
    pub fn to_float(&self) -> Result<f64> {
        self.as_str()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|f| !f.is_nan())
            .ok_or(Error::NotFloat)
    }

    /// Interprets the value as a boolean (`1/0`, `t/f`, `true/false`).
    pub fn to_bool(&self) -> Result<bool> {
        match self.as_str().map(str::to_ascii_lowercase).as_deref() {
            Some("1" | "t" | "true") => Ok(true),
            Some("0" | "f" | "false") => Ok(false),
            _ => Err(Error::ValueType),
        }
    }
}

impl From<Bytes> for Value {
    fn from(data: Bytes) -> Self {
        Value(data)
    }
}

impl From<Vec<u8>> for Value {
    fn from(data: Vec<u8>) -> Self {
        Value(Bytes::from(data))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// A value accepted for storage.
///
/// This is the complete set of input shapes; there is no catch-all variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Bytes(Bytes),
}

impl Scalar {
    /// Encodes the scalar into the bytes stored in a payload table.
    ///
    /// NaN and infinite floats are rejected with [`Error::ValueType`].
    pub fn encode(&self) -> Result<Bytes> {
        match self {
            Scalar::Text(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
            Scalar::Int(n) => Ok(Bytes::from(n.to_string())),
            Scalar::Float(f) if f.is_finite() => Ok(Bytes::from(f.to_string())),
            Scalar::Float(_) => Err(Error::ValueType),
            Scalar::Bool(true) => Ok(Bytes::from_static(b"1")),
            Scalar::Bool(false) => Ok(Bytes::from_static(b"0")),
            Scalar::Bytes(b) => Ok(b.clone()),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Text(s)
    }
}

impl From<i64> for Scalar {
    fn from(n: i64) -> Self {
        Scalar::Int(n)
    }
}

impl From<i32> for Scalar {
    fn from(n: i32) -> Self {
        Scalar::Int(n as i64)
    }
}

impl From<f64> for Scalar {
    fn from(f: f64) -> Self {
        Scalar::Float(f)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

impl From<Bytes> for Scalar {
    fn from(b: Bytes) -> Self {
        Scalar::Bytes(b)
    }
}

impl From<Vec<u8>> for Scalar {
    fn from(b: Vec<u8>) -> Self {
        Scalar::Bytes(Bytes::from(b))
    }
}

impl From<&[u8]> for Scalar {
    fn from(b: &[u8]) -> Self {
        Scalar::Bytes(Bytes::copy_from_slice(b))
    }
}

/// A key name paired with the value to store under it.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub key: String,
    pub value: Scalar,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One page of a cursor scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Largest id in the page, or 0 once the scan is exhausted.
    pub cursor: i64,
    pub keys: Vec<Key>,
}
