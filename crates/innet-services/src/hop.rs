//! Chain hop — what one node does with a message's worth of chunks.
//!
//! The hop keeps nothing between messages. Everything needed to resume the
//! computation arrives in the chunks: the raw data message and, past the
//! first hop, the intermediate-result message carrying the continuation.

use innet_core::fragment::{fragment, reassemble, Chunk, SequenceError};
use innet_core::wire::{FormatError, MessageType, FLAG_ITERATION_COMPLETE};
use innet_core::{Continuation, ContinuationError};

use crate::iteration::{IterationController, StateError, StopReason};
use crate::kernel::IterationKernel;

/// What the hop did with the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopAction {
    Computed { stop: StopReason, rounds: u32 },
    /// The incoming result was already final and is passed on unchanged.
    FastForwarded,
}

#[derive(Debug, Clone)]
pub struct HopOutput {
    /// Intermediate-result chunks to send downstream, in order.
    pub chunks: Vec<Chunk>,
    pub is_final: bool,
    pub resume_at: u8,
    pub action: HopAction,
}

#[derive(Debug, thiserror::Error)]
pub enum HopError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Sequence(#[from] SequenceError),

    #[error(transparent)]
    Continuation(#[from] ContinuationError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("no raw data buffered for message {msg_num}")]
    MissingData { msg_num: u16 },
}

pub struct ChainHop<K> {
    controller: IterationController<K>,
    max_rounds: u32,
}

impl<K: IterationKernel> ChainHop<K> {
    pub fn new(kernel: K, max_rounds: u32) -> Self {
        Self {
            controller: IterationController::new(kernel),
            max_rounds,
        }
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    /// Start a computation from the raw data message alone.
    pub fn start(&self, data: &[Chunk]) -> Result<HopOutput, HopError> {
        self.compute(data, None)
    }

    /// Continue from an upstream intermediate result. A final result is
    /// passed through untouched and does not need `data`.
    pub fn resume(&self, result: &[Chunk], data: Option<&[Chunk]>) -> Result<HopOutput, HopError> {
        let record = reassemble(result)?;
        let continuation = Continuation::decode(&record)?;

        // reassemble() guarantees at least one chunk
        let header = result[result.len() - 1].header;
        let header_final = header.iteration_complete();
        if header_final != continuation.is_final
            || header.iter_num != continuation.resume_at as u16
        {
            return Err(StateError::HeaderMismatch {
                header_final,
                header_iter: header.iter_num,
                record_final: continuation.is_final,
                record_iter: continuation.resume_at,
            }
            .into());
        }

        if continuation.is_final {
            tracing::debug!(
                msg_num = header.msg_num,
                resume_at = continuation.resume_at,
                "final result, fast forwarding"
            );
            return Ok(HopOutput {
                chunks: result.to_vec(),
                is_final: true,
                resume_at: continuation.resume_at,
                action: HopAction::FastForwarded,
            });
        }

        let data = data.ok_or(HopError::MissingData {
            msg_num: header.msg_num,
        })?;
        self.compute(data, Some(continuation))
    }

    fn compute(
        &self,
        data: &[Chunk],
        prior: Option<Continuation>,
    ) -> Result<HopOutput, HopError> {
        let payload = reassemble(data)?;
        let identity = data[0].header;

        let (prior_state, iter_num) = match &prior {
            Some(c) => (c.iterate.clone(), c.resume_at as u16),
            None => (bytes::Bytes::new(), 0),
        };

        let advance =
            self.controller
                .advance_detailed(&payload, &prior_state, iter_num, self.max_rounds)?;
        let continuation = advance.continuation;
        let chunks = continuation_chunks(&continuation, identity.total_msg_num, identity.msg_num)?;

        tracing::info!(
            msg_num = identity.msg_num,
            iter_num,
            resume_at = continuation.resume_at,
            rounds = advance.rounds,
            is_final = continuation.is_final,
            chunks = chunks.len(),
            "hop computed"
        );

        Ok(HopOutput {
            chunks,
            is_final: continuation.is_final,
            resume_at: continuation.resume_at,
            action: HopAction::Computed {
                stop: advance.stop,
                rounds: advance.rounds,
            },
        })
    }
}

/// Fragment a continuation record as an intermediate-result message, with
/// the final flag and resume index mirrored into every header.
pub fn continuation_chunks(
    continuation: &Continuation,
    total_msg_num: u16,
    msg_num: u16,
) -> Result<Vec<Chunk>, FormatError> {
    let record = continuation.encode();
    let mut chunks = fragment(&record, MessageType::IntermediateResult, total_msg_num, msg_num)?.chunks;
    for chunk in &mut chunks {
        chunk.header.msg_flags = if continuation.is_final {
            FLAG_ITERATION_COMPLETE
        } else {
            0
        };
        chunk.header.iter_num = continuation.resume_at as u16;
    }
    Ok(chunks)
}
