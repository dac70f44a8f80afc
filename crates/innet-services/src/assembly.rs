//! Message assembly — collects chunks per message until the last one arrives.
//!
//! Chunks are kept in arrival order. Nothing is sorted and nothing is
//! requested again: a message is handed over when the chunk numbered
//! `total_chunk_num - 1` arrives, and the caller's integrity check decides
//! whether it survives.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use innet_core::fragment::Chunk;
use innet_core::wire::{MessageType, MAX_CHUNK_NUM};

type MessageKey = (MessageType, u16);

struct Pending {
    chunks: Vec<Chunk>,
    started_at: Instant,
}

struct Buffered {
    chunks: Vec<Chunk>,
    stored_at: Instant,
}

pub struct MessageAssembler {
    pending: HashMap<MessageKey, Pending>,
    /// Completed, integrity-checked raw data messages waiting for the
    /// matching intermediate result.
    data: HashMap<u16, Buffered>,
    timeout: Duration,
}

/// What [`MessageAssembler::push`] did with a chunk.
#[derive(Debug)]
pub enum Assembled {
    Incomplete,
    Complete(Vec<Chunk>),
    /// The message grew past [`MAX_CHUNK_NUM`] without ending and was dropped.
    Overflow { msg_num: u16 },
}

impl MessageAssembler {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            data: HashMap::new(),
            timeout,
        }
    }

    pub fn push(&mut self, chunk: Chunk) -> Assembled {
        let key = (chunk.header.msg_type, chunk.header.msg_num);
        let is_last = chunk.header.is_last_chunk();

        let entry = self.pending.entry(key).or_insert_with(|| Pending {
            chunks: Vec::new(),
            started_at: Instant::now(),
        });
        entry.chunks.push(chunk);

        if is_last {
            let done = self.pending.remove(&key).map(|p| p.chunks).unwrap_or_default();
            return Assembled::Complete(done);
        }
        if entry.chunks.len() > MAX_CHUNK_NUM {
            self.pending.remove(&key);
            return Assembled::Overflow { msg_num: key.1 };
        }
        Assembled::Incomplete
    }

    /// Keep a checked raw data message until its result arrives.
    pub fn store_data(&mut self, msg_num: u16, chunks: Vec<Chunk>) {
        if self
            .data
            .insert(
                msg_num,
                Buffered {
                    chunks,
                    stored_at: Instant::now(),
                },
            )
            .is_some()
        {
            tracing::debug!(msg_num, "replaced buffered raw data message");
        }
    }

    pub fn take_data(&mut self, msg_num: u16) -> Option<Vec<Chunk>> {
        self.data.remove(&msg_num).map(|b| b.chunks)
    }

    pub fn pending_messages(&self) -> usize {
        self.pending.len()
    }

    pub fn buffered_data(&self) -> usize {
        self.data.len()
    }

    /// Drop assemblies and buffered data older than the timeout. Returns how
    /// many were dropped.
    pub fn cleanup_stale(&mut self) -> usize {
        let timeout = self.timeout;
        let before = self.pending.len() + self.data.len();
        self.pending.retain(|(msg_type, msg_num), p| {
            let stale = p.started_at.elapsed() > timeout;
            if stale {
                tracing::warn!(
                    ?msg_type,
                    msg_num,
                    received = p.chunks.len(),
                    "discarding incomplete message (timed out)"
                );
            }
            !stale
        });
        self.data.retain(|msg_num, b| {
            let stale = b.stored_at.elapsed() > timeout;
            if stale {
                tracing::warn!(msg_num, "discarding raw data with no result (timed out)");
            }
            !stale
        });
        before - (self.pending.len() + self.data.len())
    }
}
