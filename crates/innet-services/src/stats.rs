//! Hop statistics — counters and a per-message trace for the status endpoint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::hop::{HopAction, HopError};
use crate::iteration::StateError;

/// Why a datagram or message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropClass {
    Format,
    Sequence,
    State,
    Kernel,
    /// Intermediate result with no buffered raw data.
    Orphan,
}

impl DropClass {
    pub fn of(err: &HopError) -> Self {
        match err {
            HopError::Format(_) | HopError::Continuation(_) => DropClass::Format,
            HopError::Sequence(_) => DropClass::Sequence,
            HopError::State(StateError::Kernel(_)) => DropClass::Kernel,
            HopError::State(_) => DropClass::State,
            HopError::MissingData { .. } => DropClass::Orphan,
        }
    }
}

#[derive(Default)]
struct Counters {
    datagrams_received: AtomicU64,
    chunks_forwarded: AtomicU64,
    messages_computed: AtomicU64,
    messages_fast_forwarded: AtomicU64,
    final_results: AtomicU64,
    dropped_format: AtomicU64,
    dropped_sequence: AtomicU64,
    dropped_state: AtomicU64,
    dropped_kernel: AtomicU64,
    dropped_orphan: AtomicU64,
}

/// Last outcome seen for a message number.
#[derive(Debug, Clone, Serialize)]
pub struct MessageTrace {
    pub msg_num: u16,
    pub outcome: String,
    pub resume_at: Option<u8>,
    pub is_final: bool,
    #[serde(skip)]
    pub at: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub datagrams_received: u64,
    pub chunks_forwarded: u64,
    pub messages_computed: u64,
    pub messages_fast_forwarded: u64,
    pub final_results: u64,
    pub dropped_format: u64,
    pub dropped_sequence: u64,
    pub dropped_state: u64,
    pub dropped_kernel: u64,
    pub dropped_orphan: u64,
    pub recent: Vec<MessageTrace>,
}

/// Shared, cheaply cloned hop counters.
#[derive(Clone, Default)]
pub struct HopStats {
    counters: Arc<Counters>,
    traces: Arc<DashMap<u16, MessageTrace>>,
}

impl HopStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn datagram_received(&self) {
        self.counters.datagrams_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chunks_forwarded(&self, n: usize) {
        self.counters
            .chunks_forwarded
            .fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn dropped(&self, class: DropClass, msg_num: Option<u16>) {
        let counter = match class {
            DropClass::Format => &self.counters.dropped_format,
            DropClass::Sequence => &self.counters.dropped_sequence,
            DropClass::State => &self.counters.dropped_state,
            DropClass::Kernel => &self.counters.dropped_kernel,
            DropClass::Orphan => &self.counters.dropped_orphan,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if let Some(msg_num) = msg_num {
            self.trace(msg_num, format!("dropped: {class:?}").to_lowercase(), None, false);
        }
    }

    pub fn processed(&self, msg_num: u16, action: HopAction, resume_at: u8, is_final: bool) {
        let outcome = match action {
            HopAction::Computed { stop, rounds } => {
                self.counters.messages_computed.fetch_add(1, Ordering::Relaxed);
                format!("computed {rounds} rounds, stop: {stop:?}")
            }
            HopAction::FastForwarded => {
                self.counters
                    .messages_fast_forwarded
                    .fetch_add(1, Ordering::Relaxed);
                "fast forwarded".to_string()
            }
        };
        if is_final {
            self.counters.final_results.fetch_add(1, Ordering::Relaxed);
        }
        self.trace(msg_num, outcome, Some(resume_at), is_final);
    }

    fn trace(&self, msg_num: u16, outcome: String, resume_at: Option<u8>, is_final: bool) {
        self.traces.insert(
            msg_num,
            MessageTrace {
                msg_num,
                outcome,
                resume_at,
                is_final,
                at: Instant::now(),
            },
        );
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = &self.counters;
        let mut recent: Vec<MessageTrace> = self.traces.iter().map(|e| e.value().clone()).collect();
        recent.sort_by_key(|t| std::cmp::Reverse(t.at));
        StatsSnapshot {
            datagrams_received: c.datagrams_received.load(Ordering::Relaxed),
            chunks_forwarded: c.chunks_forwarded.load(Ordering::Relaxed),
            messages_computed: c.messages_computed.load(Ordering::Relaxed),
            messages_fast_forwarded: c.messages_fast_forwarded.load(Ordering::Relaxed),
            final_results: c.final_results.load(Ordering::Relaxed),
            dropped_format: c.dropped_format.load(Ordering::Relaxed),
            dropped_sequence: c.dropped_sequence.load(Ordering::Relaxed),
            dropped_state: c.dropped_state.load(Ordering::Relaxed),
            dropped_kernel: c.dropped_kernel.load(Ordering::Relaxed),
            dropped_orphan: c.dropped_orphan.load(Ordering::Relaxed),
            recent,
        }
    }
}
