//! Continuation record — the payload of every intermediate-result message.
//!
//! ```text
//! +--------+-----------+------------------------+
//! | final  | resume_at | serialized iterate ... |
//! | 1 byte | 1 byte    |                        |
//! +--------+-----------+------------------------+
//! ```
//!
//! `resume_at` is the next unconsumed round when the record is not final,
//! and the total round count when it is.

use bytes::{BufMut, Bytes, BytesMut};

/// Bytes in front of the serialized iterate.
pub const CONTINUATION_PREFIX_LEN: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuation {
    pub is_final: bool,
    pub resume_at: u8,
    pub iterate: Bytes,
}

impl Continuation {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(CONTINUATION_PREFIX_LEN + self.iterate.len());
        buf.put_u8(u8::from(self.is_final));
        buf.put_u8(self.resume_at);
        buf.put_slice(&self.iterate);
        buf.freeze()
    }

    pub fn decode(record: &Bytes) -> Result<Self, ContinuationError> {
        if record.len() < CONTINUATION_PREFIX_LEN {
            return Err(ContinuationError::TooShort(record.len()));
        }
        let is_final = match record[0] {
            0 => false,
            1 => true,
            other => return Err(ContinuationError::BadFinalFlag(other)),
        };
        Ok(Self {
            is_final,
            resume_at: record[1],
            iterate: record.slice(CONTINUATION_PREFIX_LEN..),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContinuationError {
    #[error("continuation record is {0} bytes, need at least {}", CONTINUATION_PREFIX_LEN)]
    TooShort(usize),

    #[error("final flag must be 0 or 1, got {0}")]
    BadFinalFlag(u8),
}
