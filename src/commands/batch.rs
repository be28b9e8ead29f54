//! MULTI/EXEC batching.
//!
//! A connection is either idle or queuing. MULTI starts queuing; every
//! command that parses cleanly is queued instead of run; EXEC takes the
//! queue and runs it in one write transaction; DISCARD drops it.
//!
//! ```text
//!          MULTI                 EXEC / DISCARD
//!   Idle ─────────▶ Queuing ─────────────────────▶ Idle
//!                    │    ▲
//!                    └────┘ command → QUEUED
//! ```
//!
//! A command that fails to parse while queuing is not queued and marks the
//! batch as aborted; EXEC then discards the whole batch.

use super::Redis;
use thiserror::Error;

/// Errors for MULTI, EXEC and DISCARD used in the wrong state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error("MULTI calls can not be nested")]
    Nested,

    #[error("{0} without MULTI")]
    NotStarted(&'static str),

    #[error("Transaction discarded because of previous errors.")]
    Aborted,
}

#[derive(Debug)]
struct Queue {
    cmds: Vec<Box<dyn Redis>>,
    aborted: bool,
}

/// Per-connection batch state.
#[derive(Debug, Default)]
pub struct Batch {
    queue: Option<Queue>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts queuing (MULTI).
    pub fn begin(&mut self) -> Result<(), BatchError> {
        if self.queue.is_some() {
            return Err(BatchError::Nested);
        }
        self.queue = Some(Queue {
            cmds: Vec::new(),
            aborted: false,
        });
        Ok(())
    }

    /// Returns true while queuing.
    pub fn in_batch(&self) -> bool {
        self.queue.is_some()
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.queue.as_ref().map_or(0, |q| q.cmds.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queues a command. Returns false, dropping the command, when not
    /// queuing.
    pub fn push(&mut self, cmd: Box<dyn Redis>) -> bool {
        match &mut self.queue {
            Some(queue) => {
                queue.cmds.push(cmd);
                true
            }
            None => false,
        }
    }

    /// Marks the batch so that EXEC discards it.
    pub fn abort(&mut self) {
        if let Some(queue) = &mut self.queue {
            queue.aborted = true;
        }
    }

    /// Takes the queued commands and returns to idle (EXEC).
    pub fn pop(&mut self) -> Result<Vec<Box<dyn Redis>>, BatchError> {
        let queue = self.queue.take().ok_or(BatchError::NotStarted("EXEC"))?;
        if queue.aborted {
            return Err(BatchError::Aborted);
        }
        Ok(queue.cmds)
    }

    /// Drops the queued commands and returns to idle (DISCARD).
    pub fn clear(&mut self) -> Result<(), BatchError> {
        self.queue
            .take()
            .map(|_| ())
            .ok_or(BatchError::NotStarted("DISCARD"))
    }
}
