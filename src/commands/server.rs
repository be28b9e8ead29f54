//! Server commands.

use super::parser::{self, ParseResult, Pipeline};
use super::Redis;
use crate::error::Result;
use crate::protocol::Reply;
use crate::storage::Tx;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

/// PING [message]
#[derive(Debug, Default)]
pub struct Ping {
    message: Option<Bytes>,
}

impl Ping {
    pub fn parse(args: &[Bytes]) -> ParseResult<Self> {
        let mut cmd = Self::default();
        Pipeline::new()
            .arg(parser::Parser::new(|args: &[Bytes]| match args.first() {
                Some(token) => {
                    cmd.message = Some(token.clone());
                    Ok(Some(1))
                }
                None => Ok(None),
            }))
            .run(args)?;
        Ok(cmd)
    }
}

#[async_trait]
impl Redis for Ping {
    fn name(&self) -> &'static str {
        "ping"
    }

    fn readonly(&self) -> bool {
        true
    }

    async fn run(&self, _tx: &Tx) -> Result<Reply> {
        Ok(match &self.message {
            Some(message) => Reply::bulk(message.clone()),
            None => Reply::status("PONG"),
        })
    }
}

/// ECHO message
#[derive(Debug, Default)]
pub struct Echo {
    message: Bytes,
}

impl Echo {
    pub fn parse(args: &[Bytes]) -> ParseResult<Self> {
        let mut cmd = Self::default();
        Pipeline::new()
            .required(1)
            .arg(parser::bytes(&mut cmd.message))
            .run(args)?;
        Ok(cmd)
    }
}

#[async_trait]
impl Redis for Echo {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn readonly(&self) -> bool {
        true
    }

    async fn run(&self, _tx: &Tx) -> Result<Reply> {
        Ok(Reply::bulk(self.message.clone()))
    }
}

/// TIME
///
/// Replies with the server's unix time as seconds and microseconds.
#[derive(Debug, Default)]
pub struct Time;

impl Time {
    pub fn parse(args: &[Bytes]) -> ParseResult<Self> {
        Pipeline::new().run(args)?;
        Ok(Self)
    }
}

#[async_trait]
impl Redis for Time {
    fn name(&self) -> &'static str {
        "time"
    }

    fn readonly(&self) -> bool {
        true
    }

    async fn run(&self, _tx: &Tx) -> Result<Reply> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Ok(Reply::array(vec![
            Reply::bulk(now.as_secs().to_string()),
            Reply::bulk(now.subsec_micros().to_string()),
        ]))
    }
}
