//! Resumable iteration controller — runs a bounded number of rounds per hop.
//!
//! A hop either starts a computation (`iter_num == 0`, no prior state) or
//! resumes one from the iterate handed over by the previous hop. It then
//! runs rounds until one of three things happens, checked in this order
//! after every round:
//!
//!   1. the kernel reports convergence        → final
//!   2. the last round of the problem has run → final
//!   3. this call has used `max_rounds`       → not final, hand off
//!
//! The output is a [`Continuation`] whose `resume_at` is the next round to
//! run, or the total round count when final.

use bytes::Bytes;
use innet_core::Continuation;

use crate::kernel::{IterationKernel, KernelError};

/// Why a call to `advance` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Converged,
    /// Every round of the problem has run.
    Completed,
    /// The hop's round budget ran out first.
    BudgetExceeded,
}

impl StopReason {
    pub fn is_final(self) -> bool {
        !matches!(self, StopReason::BudgetExceeded)
    }
}

/// Result of one bounded run.
#[derive(Debug, Clone)]
pub struct Advance {
    pub continuation: Continuation,
    pub stop: StopReason,
    /// Rounds consumed by this call.
    pub rounds: u32,
}

/// Iteration-number / prior-state mismatch. Fatal to this hop's processing
/// of the message.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("iteration {iter_num} needs prior state, none supplied")]
    MissingPriorState { iter_num: u16 },

    #[error("fresh computation must not carry prior state ({len} bytes supplied)")]
    UnexpectedPriorState { len: usize },

    #[error("round budget must be at least 1")]
    ZeroBudget,

    #[error("cannot resume at round {iter_num}, problem has {total} rounds")]
    ResumePastEnd { iter_num: u16, total: u16 },

    #[error("problem needs {0} rounds, at most 255 fit in a continuation")]
    TooManyRounds(u16),

    #[error("header says final={header_final} iter={header_iter}, record says final={record_final} iter={record_iter}")]
    HeaderMismatch {
        header_final: bool,
        header_iter: u16,
        record_final: bool,
        record_iter: u8,
    },

    #[error(transparent)]
    Kernel(#[from] KernelError),
}

pub struct IterationController<K> {
    kernel: K,
}

impl<K: IterationKernel> IterationController<K> {
    pub fn new(kernel: K) -> Self {
        Self { kernel }
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Run up to `max_rounds` rounds and return the encoded continuation.
    pub fn advance(
        &self,
        payload: &[u8],
        prior_state: &[u8],
        iter_num: u16,
        max_rounds: u32,
    ) -> Result<Bytes, StateError> {
        Ok(self
            .advance_detailed(payload, prior_state, iter_num, max_rounds)?
            .continuation
            .encode())
    }

    /// Same as [`advance`](Self::advance), keeping the stop reason and round count.
    pub fn advance_detailed(
        &self,
        payload: &[u8],
        prior_state: &[u8],
        iter_num: u16,
        max_rounds: u32,
    ) -> Result<Advance, StateError> {
        if max_rounds == 0 {
            return Err(StateError::ZeroBudget);
        }
        if iter_num == 0 && !prior_state.is_empty() {
            return Err(StateError::UnexpectedPriorState {
                len: prior_state.len(),
            });
        }
        if iter_num != 0 && prior_state.is_empty() {
            return Err(StateError::MissingPriorState { iter_num });
        }

        let problem = self.kernel.load(payload)?;
        let total = self.kernel.total_rounds(&problem);
        if total > u8::MAX as u16 {
            return Err(StateError::TooManyRounds(total));
        }

        let mut iterate = if iter_num == 0 {
            self.kernel.init(&problem)
        } else {
            self.kernel.decode_iterate(&problem, prior_state)?
        };

        if total == 0 {
            return self.finish(iterate, StopReason::Completed, 0, 0);
        }
        if iter_num >= total {
            return Err(StateError::ResumePastEnd { iter_num, total });
        }

        let mut round = iter_num;
        let mut rounds = 0u32;
        let stop = loop {
            let step = self.kernel.step(&problem, &iterate, round);
            iterate = step.next;
            rounds += 1;

            if step.converged {
                break StopReason::Converged;
            }
            if round + 1 == total {
                break StopReason::Completed;
            }
            if rounds == max_rounds {
                break StopReason::BudgetExceeded;
            }
            round += 1;
        };

        let resume_at = if stop.is_final() { total } else { round + 1 };

        tracing::debug!(
            iter_num,
            resume_at,
            rounds,
            total,
            ?stop,
            "iteration advanced"
        );

        self.finish(iterate, stop, resume_at, rounds)
    }

    fn finish(
        &self,
        iterate: K::Iterate,
        stop: StopReason,
        resume_at: u16,
        rounds: u32,
    ) -> Result<Advance, StateError> {
        let encoded = self.kernel.encode_iterate(&iterate)?;
        Ok(Advance {
            continuation: Continuation {
                is_final: stop.is_final(),
                // total <= 255 was checked above
                resume_at: resume_at as u8,
                iterate: Bytes::from(encoded),
            },
            stop,
            rounds,
        })
    }
}
