//! # tablekv - Redis Semantics on SQLite
//!
//! tablekv is a Redis-compatible key-value server whose data lives in an
//! SQLite database. Keys, typed values, TTL expiration, atomic renames and
//! cursor iteration are all SQL against a small normalized schema, wrapped
//! in a transaction abstraction that reproduces Redis atomicity on top of a
//! single-writer database.
//!
//! ## Features
//!
//! - **Redis-Compatible**: Speaks RESP (and inline commands) to any Redis client
//! - **Durable**: State lives in SQLite, in memory or in a WAL-mode file
//! - **Atomic**: Every command, and every MULTI/EXEC batch, is one transaction
//! - **TTL Support**: Lazy filtering on every read plus a background sweeper
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              tablekv                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │ parser::Pipeline        │
//! │                            ▼                  │ Batch (MULTI/EXEC)      │
//! │                     ┌─────────────┐           ▼                         │
//! │                     │ frame/reply │    ┌──────────────────────────────┐ │
//! │                     │ (RESP)      │    │ Db: update / view            │ │
//! │                     └─────────────┘    │  KeyTx  StringTx             │ │
//! │                                        │  SqlitePool (one connection) │ │
//! │                                        └──────────────────────────────┘ │
//! │                                               ▲                         │
//! │                     ┌─────────────────────────┴───────────────────────┐ │
//! │                     │           ExpirySweeper                         │ │
//! │                     │      (Background Tokio Task)                    │ │
//! │                     └─────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use tablekv::{config::Options, Db};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> tablekv::Result<()> {
//!     let db = Db::open(Options::file("data.db")).await?;
//!
//!     db.strings().set("name", "alice").await?;
//!     db.keys().expire("name", Duration::from_secs(60)).await?;
//!     let name = db.strings().get("name").await?;
//!     assert_eq!(name.map(|v| v.to_string()), Some("alice".to_string()));
//!
//!     db.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: transactional store, key and string repositories, sweeper
//! - [`commands`]: argument pipeline, typed commands, MULTI/EXEC batching
//! - [`protocol`]: request framing and reply encoding
//! - [`connection`]: client connection management
//! - [`types`], [`error`], [`config`]: shared data types, errors and options
//!
//! ## Design Highlights
//!
//! ### Single Writer
//!
//! The pool holds exactly one SQLite connection, so transactions never
//! interleave. Atomic check-then-write operations need no extra locking.
//!
//! ### Lazy + Active Expiry
//!
//! Keys with TTL are expired in two ways:
//! 1. **Lazy**: every query ignores rows whose expiry time has passed
//! 2. **Active**: a background task periodically deletes them
//!
//! This keeps reads correct without waiting for a sweep, while the sweep
//! reclaims storage for keys that are never touched again.

pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod storage;
pub mod types;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use config::Options;
pub use connection::{handle_connection, ConnectionStats};
pub use error::{Error, Result};
pub use protocol::{FrameError, Reply};
pub use storage::{Context, Db, ExpiryConfig, ExpirySweeper, Tx};
pub use types::{Key, KeyValue, Scalar, ScanResult, TypeId, Value};

/// The default port tablekv listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host tablekv binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of tablekv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
