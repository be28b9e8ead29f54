//! Command Module
//!
//! Turns request tokens into typed commands and runs them against the
//! storage layer.
//!
//! ## Architecture
//!
//! ```text
//! Request tokens
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  parse()        │  name lookup + argument Pipeline
//! └────────┬────────┘
//!          │ Box<dyn Redis>
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  MULTI/EXEC batching, view vs update
//! └────────┬────────┘
//!          │ &Tx
//!          ▼
//! ┌─────────────────┐
//! │ Db              │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! ### String Commands
//! - `GET`, `SET`, `SETNX`, `SETEX`, `PSETEX`, `GETSET`, `GETDEL`
//! - `MGET`, `MSET`, `MSETNX`
//! - `APPEND`, `STRLEN`, `GETRANGE`, `SETRANGE`
//! - `INCR`, `INCRBY`, `DECR`, `DECRBY`, `INCRBYFLOAT`
//!
//! ### Key Commands
//! - `DEL`, `UNLINK`, `EXISTS`, `TYPE`
//! - `EXPIRE`, `PEXPIRE`, `EXPIREAT`, `PEXPIREAT`, `PERSIST`, `TTL`, `PTTL`
//! - `KEYS`, `SCAN`, `RANDOMKEY`, `RENAME`, `RENAMENX`
//! - `DBSIZE`, `FLUSHDB`, `FLUSHALL`
//!
//! ### Server Commands
//! - `PING`, `ECHO`, `TIME`
//!
//! ### Transactions
//! - `MULTI`, `EXEC`, `DISCARD` (handled by [`CommandHandler`])

pub mod batch;
pub mod handler;
pub mod keys;
pub mod parser;
pub mod server;
pub mod strings;

pub use batch::{Batch, BatchError};
pub use handler::CommandHandler;
pub use parser::{ParseError, ParseResult, Pipeline};

use crate::error::Result;
use crate::protocol::Reply;
use crate::storage::Tx;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

/// A parsed command, ready to run inside a transaction.
#[async_trait]
pub trait Redis: Send + Sync + fmt::Debug {
    /// Lowercase command name.
    fn name(&self) -> &'static str;

    /// Read-only commands run in a read transaction.
    fn readonly(&self) -> bool {
        false
    }

    /// Runs the command with all repositories of one transaction.
    async fn run(&self, tx: &Tx) -> Result<Reply>;
}

/// Looks up the command named by the first token and parses the rest.
pub fn parse(tokens: &[Bytes]) -> ParseResult<Box<dyn Redis>> {
    let Some((name, args)) = tokens.split_first() else {
        return Err(ParseError::UnknownCmd(String::new()));
    };
    let name = String::from_utf8_lossy(name).to_ascii_lowercase();

    let cmd: Box<dyn Redis> = match name.as_str() {
        // String commands
        "get" => Box::new(strings::Get::parse(args)?),
        "set" => Box::new(strings::Set::parse(args)?),
        "setnx" => Box::new(strings::SetNx::parse(args)?),
        "setex" => Box::new(strings::SetEx::parse("setex", args)?),
        "psetex" => Box::new(strings::SetEx::parse("psetex", args)?),
        "getset" => Box::new(strings::GetSet::parse(args)?),
        "getdel" => Box::new(strings::GetDel::parse(args)?),
        "mget" => Box::new(strings::MGet::parse(args)?),
        "mset" => Box::new(strings::MSet::parse(args)?),
        "msetnx" => Box::new(strings::MSetNx::parse(args)?),
        "append" => Box::new(strings::Append::parse(args)?),
        "strlen" => Box::new(strings::Strlen::parse(args)?),
        "getrange" | "substr" => Box::new(strings::GetRange::parse(args)?),
        "setrange" => Box::new(strings::SetRange::parse(args)?),
        "incr" => Box::new(strings::Incr::parse("incr", args)?),
        "incrby" => Box::new(strings::Incr::parse("incrby", args)?),
        "decr" => Box::new(strings::Incr::parse("decr", args)?),
        "decrby" => Box::new(strings::Incr::parse("decrby", args)?),
        "incrbyfloat" => Box::new(strings::IncrByFloat::parse(args)?),

        // Key commands
        "del" | "unlink" => Box::new(keys::Del::parse(args)?),
        "exists" => Box::new(keys::Exists::parse(args)?),
        "expire" => Box::new(keys::Expire::parse("expire", args)?),
        "pexpire" => Box::new(keys::Expire::parse("pexpire", args)?),
        "expireat" => Box::new(keys::ExpireAt::parse("expireat", args)?),
        "pexpireat" => Box::new(keys::ExpireAt::parse("pexpireat", args)?),
        "persist" => Box::new(keys::Persist::parse(args)?),
        "ttl" => Box::new(keys::Ttl::parse("ttl", args)?),
        "pttl" => Box::new(keys::Ttl::parse("pttl", args)?),
        "type" => Box::new(keys::Type::parse(args)?),
        "keys" => Box::new(keys::Keys::parse(args)?),
        "scan" => Box::new(keys::Scan::parse(args)?),
        "randomkey" => Box::new(keys::RandomKey::parse(args)?),
        "rename" => Box::new(keys::Rename::parse(args)?),
        "renamenx" => Box::new(keys::RenameNx::parse(args)?),
        "dbsize" => Box::new(keys::DbSize::parse(args)?),
        "flushdb" | "flushall" => Box::new(keys::FlushDb::parse(args)?),

        // Server commands
        "ping" => Box::new(server::Ping::parse(args)?),
        "echo" => Box::new(server::Echo::parse(args)?),
        "time" => Box::new(server::Time::parse(args)?),

        _ => return Err(ParseError::UnknownCmd(name)),
    };
    Ok(cmd)
}
