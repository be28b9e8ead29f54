//! Command Handler
//!
//! One `CommandHandler` per connection. It owns the connection's batch state
//! and turns request tokens into a reply:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │   parse()   │───>│   Batch     │───>│ view/update │      │
//! │  └─────────────┘    │ (MULTI/EXEC)│    └──────┬──────┘      │
//! │                     └─────────────┘           │             │
//! │                                               ▼             │
//! │                                              Db             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Errors become error replies here and never close the connection.

use super::batch::{Batch, BatchError};
use super::parser::ParseError;
use super::{parse, Redis};
use crate::error::Error;
use crate::protocol::Reply;
use crate::storage::{Context, Db};
use bytes::Bytes;
use tracing::{debug, warn};

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

/// Converts a storage error into an error reply.
pub fn error_reply(err: &Error) -> Reply {
    match err {
        Error::KeyType => Reply::error(WRONGTYPE),
        Error::Database(e) => {
            warn!(error = %e, "Database error");
            Reply::error(format!("ERR {}", err))
        }
        _ => Reply::error(format!("ERR {}", err)),
    }
}

/// Converts an argument error for command `name` into an error reply.
pub fn parse_error_reply(name: &str, err: &ParseError) -> Reply {
    match err {
        ParseError::InvalidArgNum => Reply::error(format!(
            "ERR wrong number of arguments for '{}' command",
            name
        )),
        _ => Reply::error(format!("ERR {}", err)),
    }
}

fn batch_error_reply(err: &BatchError) -> Reply {
    match err {
        BatchError::Aborted => Reply::error(format!("EXECABORT {}", err)),
        _ => Reply::error(format!("ERR {}", err)),
    }
}

/// Runs commands for one connection.
#[derive(Debug)]
pub struct CommandHandler {
    db: Db,
    batch: Batch,
    ctx: Context,
}

impl CommandHandler {
    /// Creates a handler whose transactions run without a deadline.
    pub fn new(db: Db) -> Self {
        Self::with_context(db, Context::background())
    }

    /// Creates a handler whose transactions are bounded by `ctx`.
    pub fn with_context(db: Db, ctx: Context) -> Self {
        Self {
            db,
            batch: Batch::new(),
            ctx,
        }
    }

    /// Returns true while MULTI is queuing commands.
    pub fn in_batch(&self) -> bool {
        self.batch.in_batch()
    }

    /// Executes one request and returns its reply.
    pub async fn execute(&mut self, tokens: &[Bytes]) -> Reply {
        let Some(first) = tokens.first() else {
            return Reply::error("ERR empty command");
        };
        let name = String::from_utf8_lossy(first).to_ascii_lowercase();

        match name.as_str() {
            "multi" => return self.multi(),
            "exec" => return self.exec().await,
            "discard" => return self.discard(),
            _ => {}
        }

        let cmd = match parse(tokens) {
            Ok(cmd) => cmd,
            Err(err) => {
                self.batch.abort();
                return parse_error_reply(&name, &err);
            }
        };

        if self.batch.in_batch() {
            self.batch.push(cmd);
            return Reply::status("QUEUED");
        }
        self.run(cmd).await
    }

    fn multi(&mut self) -> Reply {
        match self.batch.begin() {
            Ok(()) => Reply::ok(),
            Err(err) => batch_error_reply(&err),
        }
    }

    fn discard(&mut self) -> Reply {
        match self.batch.clear() {
            Ok(()) => Reply::ok(),
            Err(err) => batch_error_reply(&err),
        }
    }

    /// Runs the queued commands in one write transaction. Any failure rolls
    /// back the whole batch and becomes the reply.
    async fn exec(&mut self) -> Reply {
        let cmds = match self.batch.pop() {
            Ok(cmds) => cmds,
            Err(err) => return batch_error_reply(&err),
        };
        debug!(commands = cmds.len(), "Executing batch");

        let res = self
            .db
            .update_ctx(&self.ctx, |tx| async move {
                let mut replies = Vec::with_capacity(cmds.len());
                for cmd in &cmds {
                    replies.push(cmd.run(&tx).await?);
                }
                Ok(replies)
            })
            .await;

        match res {
            Ok(replies) => Reply::array(replies),
            Err(err) => error_reply(&err),
        }
    }

    async fn run(&self, cmd: Box<dyn Redis>) -> Reply {
        let res = if cmd.readonly() {
            self.db
                .view_ctx(&self.ctx, |tx| async move { cmd.run(&tx).await })
                .await
        } else {
            self.db
                .update_ctx(&self.ctx, |tx| async move { cmd.run(&tx).await })
                .await
        };
        res.unwrap_or_else(|err| error_reply(&err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;

    async fn create_handler() -> CommandHandler {
        let db = Db::open(Options::memory().without_expiry()).await.unwrap();
        CommandHandler::new(db)
    }

    fn make_command(args: &[&str]) -> Vec<Bytes> {
        args.iter()
            .map(|s| Bytes::copy_from_slice(s.as_bytes()))
            .collect()
    }

    async fn exec(handler: &mut CommandHandler, args: &[&str]) -> Reply {
        handler.execute(&make_command(args)).await
    }

    #[tokio::test]
    async fn test_ping() {
        let mut handler = create_handler().await;
        assert_eq!(exec(&mut handler, &["PING"]).await, Reply::status("PONG"));
        assert_eq!(exec(&mut handler, &["PING", "hello"]).await, Reply::bulk("hello"));
    }

    #[tokio::test]
    async fn test_set_get() {
        let mut handler = create_handler().await;
        assert_eq!(exec(&mut handler, &["SET", "name", "alice"]).await, Reply::ok());
        assert_eq!(exec(&mut handler, &["GET", "name"]).await, Reply::bulk("alice"));
        assert_eq!(exec(&mut handler, &["GET", "missing"]).await, Reply::Null);
    }

    #[tokio::test]
    async fn test_binary_key_names() {
        let mut handler = create_handler().await;
        for (key, value) in [(&b"\xff"[..], "one"), (&b"\xfe"[..], "two")] {
            let cmd = vec![Bytes::from("SET"), Bytes::copy_from_slice(key), Bytes::from(value)];
            assert_eq!(
                handler.execute(&cmd).await,
                Reply::error("ERR argument is not valid UTF-8")
            );
        }
        assert_eq!(exec(&mut handler, &["DBSIZE"]).await, Reply::integer(0));

        assert_eq!(exec(&mut handler, &["SET", "ключ", "one"]).await, Reply::ok());
        assert_eq!(exec(&mut handler, &["SET", "клюк", "two"]).await, Reply::ok());
        assert_eq!(exec(&mut handler, &["GET", "ключ"]).await, Reply::bulk("one"));
        assert_eq!(exec(&mut handler, &["DBSIZE"]).await, Reply::integer(2));
    }

    #[tokio::test]
    async fn test_error_replies() {
        let mut handler = create_handler().await;
        assert_eq!(
            exec(&mut handler, &["GET"]).await,
            Reply::error("ERR wrong number of arguments for 'get' command")
        );
        assert_eq!(
            exec(&mut handler, &["NOPE"]).await,
            Reply::error("ERR unknown command 'nope'")
        );
        assert_eq!(
            exec(&mut handler, &["SET", "k", "v", "EX", "0"]).await,
            Reply::error("ERR invalid expire time in 'set' command")
        );

        exec(&mut handler, &["SET", "k", "abc"]).await;
        assert_eq!(
            exec(&mut handler, &["INCR", "k"]).await,
            Reply::error("ERR value is not an integer or out of range")
        );
        assert_eq!(
            exec(&mut handler, &["RENAME", "missing", "x"]).await,
            Reply::error("ERR no such key")
        );
    }

    #[tokio::test]
    async fn test_wrongtype_reply() {
        let mut handler = create_handler().await;
        handler.db.strings().set("list", "v").await.unwrap();
        sqlx::query("update rkey set type = 2 where key = 'list'")
            .execute(handler.db.pool())
            .await
            .unwrap();
        assert_eq!(exec(&mut handler, &["GET", "list"]).await, Reply::error(WRONGTYPE));
        assert_eq!(exec(&mut handler, &["TYPE", "list"]).await, Reply::status("list"));
    }

    #[tokio::test]
    async fn test_multi_exec() {
        let mut handler = create_handler().await;
        assert_eq!(exec(&mut handler, &["MULTI"]).await, Reply::ok());
        assert!(handler.in_batch());
        assert_eq!(exec(&mut handler, &["SET", "a", "1"]).await, Reply::status("QUEUED"));
        assert_eq!(exec(&mut handler, &["INCR", "a"]).await, Reply::status("QUEUED"));

        // Nothing runs before EXEC.
        assert_eq!(handler.db.strings().get("a").await.unwrap(), None);

        assert_eq!(
            exec(&mut handler, &["EXEC"]).await,
            Reply::array(vec![Reply::ok(), Reply::integer(2)])
        );
        assert!(!handler.in_batch());
        assert_eq!(exec(&mut handler, &["GET", "a"]).await, Reply::bulk("2"));
    }

    #[tokio::test]
    async fn test_exec_failure_rolls_back_batch() {
        let mut handler = create_handler().await;
        exec(&mut handler, &["SET", "text", "abc"]).await;

        exec(&mut handler, &["MULTI"]).await;
        exec(&mut handler, &["SET", "a", "1"]).await;
        exec(&mut handler, &["INCR", "text"]).await;
        exec(&mut handler, &["SET", "b", "2"]).await;
        let reply = exec(&mut handler, &["EXEC"]).await;
        assert!(reply.is_error());

        assert_eq!(exec(&mut handler, &["EXISTS", "a", "b"]).await, Reply::integer(0));
        assert!(!handler.in_batch());
    }

    #[tokio::test]
    async fn test_multi_state_errors() {
        let mut handler = create_handler().await;
        assert_eq!(
            exec(&mut handler, &["EXEC"]).await,
            Reply::error("ERR EXEC without MULTI")
        );
        assert_eq!(
            exec(&mut handler, &["DISCARD"]).await,
            Reply::error("ERR DISCARD without MULTI")
        );

        exec(&mut handler, &["MULTI"]).await;
        assert_eq!(
            exec(&mut handler, &["MULTI"]).await,
            Reply::error("ERR MULTI calls can not be nested")
        );
        assert!(handler.in_batch());
        assert_eq!(exec(&mut handler, &["DISCARD"]).await, Reply::ok());
        assert!(!handler.in_batch());
    }

    #[tokio::test]
    async fn test_parse_error_aborts_batch() {
        let mut handler = create_handler().await;
        exec(&mut handler, &["MULTI"]).await;
        exec(&mut handler, &["SET", "a", "1"]).await;
        assert!(exec(&mut handler, &["SET", "a"]).await.is_error());
        assert_eq!(
            exec(&mut handler, &["EXEC"]).await,
            Reply::error("EXECABORT Transaction discarded because of previous errors.")
        );
        assert_eq!(exec(&mut handler, &["GET", "a"]).await, Reply::Null);
    }

    #[tokio::test]
    async fn test_cancelled_context() {
        let db = Db::open(Options::memory().without_expiry()).await.unwrap();
        let (ctx, cancel) = Context::cancellable();
        let mut handler = CommandHandler::with_context(db, ctx);
        cancel.cancel();
        assert_eq!(
            exec(&mut handler, &["SET", "k", "v"]).await,
            Reply::error("ERR transaction cancelled")
        );
    }
}
