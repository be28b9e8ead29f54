//! Connection Handler Module
//!
//! This module manages individual client connections.
//! Each client connection is handled by its own async task with its own
//! `CommandHandler`, so MULTI state never leaks between clients.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener                            │
//! │                    (main.rs)                                │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ accept()
//!                        ▼
//!           ┌────────────────────────┐
//!           │   For each client...   │
//!           └────────────┬───────────┘
//!                        │
//!                        │ spawn task
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ Read bytes  │───>│ Decode      │───>│ Execute cmd │      │
//! │  └─────────────┘    └─────────────┘    └─────────────┘      │
//! │                                               │             │
//! │                                               ▼             │
//! │                                      ┌─────────────┐        │
//! │                                      │ Send reply  │        │
//! │                                      └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Async I/O**: Uses Tokio for non-blocking network operations
//! - **Buffer Management**: Efficient BytesMut buffer for incoming data
//! - **Pipelining**: Replies to several requests are flushed together
//! - **Statistics**: Tracks connection and command metrics
//!
//! ## Example
//!
//! ```no_run
//! use tablekv::commands::CommandHandler;
//! use tablekv::config::Options;
//! use tablekv::connection::{handle_connection, ConnectionStats};
//! use tablekv::Db;
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let db = Db::open(Options::memory()).await?;
//! let stats = Arc::new(ConnectionStats::new());
//! let listener = TcpListener::bind("127.0.0.1:6380").await?;
//!
//! // For each accepted connection...
//! let (stream, addr) = listener.accept().await?;
//! let handler = CommandHandler::new(db.clone());
//! tokio::spawn(handle_connection(stream, addr, handler, stats));
//! # Ok(())
//! # }
//! ```

pub mod handler;

// Re-export commonly used types
pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
