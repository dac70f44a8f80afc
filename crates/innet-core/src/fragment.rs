//! Fragmentation and reassembly of messages into header-prefixed chunks.
//!
//! A message is split into `floor(len / MAX_CHUNK_PAYLOAD)` full chunks plus
//! one final chunk carrying the remainder. The remainder may be empty, so an
//! empty payload (or an exact multiple of the chunk size) still ends with a
//! chunk that has zero payload bytes.
//!
//! The receiving side never reorders: chunks are checked in the order they
//! are handed over, and any gap, duplicate, or inversion discards the whole
//! message.

use bytes::{BufMut, Bytes, BytesMut};

use crate::wire::{
    narrow_u16, FormatError, MessageType, ServiceHeader, HEADER_LEN, MAX_CHUNK_NUM,
    MAX_CHUNK_PAYLOAD,
};

// ── Chunk ─────────────────────────────────────────────────────────────────────

/// One header-prefixed fragment of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub header: ServiceHeader,
    pub payload: Bytes,
}

impl Chunk {
    /// Header bytes followed by payload bytes, ready for `send_to`.
    pub fn to_datagram(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_slice(&self.header.serialize());
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parse a received datagram. Bytes past the declared chunk length are
    /// padding and are dropped.
    pub fn from_datagram(datagram: &[u8]) -> Result<Self, FormatError> {
        if datagram.len() < HEADER_LEN {
            return Err(FormatError::WrongLength {
                expected: HEADER_LEN,
                actual: datagram.len(),
            });
        }
        let header = ServiceHeader::parse(&datagram[..HEADER_LEN])?;
        let declared = header.chunk_len as usize;
        if declared < HEADER_LEN {
            return Err(FormatError::ChunkLenTooShort(header.chunk_len));
        }
        if datagram.len() < declared {
            return Err(FormatError::Truncated {
                declared,
                actual: datagram.len(),
            });
        }
        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(&datagram[HEADER_LEN..declared]),
        })
    }
}

// ── Fragmentation ─────────────────────────────────────────────────────────────

/// Output of [`fragment`]: the chunks in send order plus the payload length.
#[derive(Debug, Clone)]
pub struct Fragmented {
    pub chunks: Vec<Chunk>,
    pub payload_len: usize,
}

/// Number of chunks a payload of `len` bytes is split into.
pub fn chunk_count(len: usize) -> usize {
    len / MAX_CHUNK_PAYLOAD + 1
}

/// Split `payload` into chunks of at most [`MAX_CHUNK_PAYLOAD`] bytes.
///
/// Every header gets `iter_num = 0` and `msg_flags = 0`; callers that
/// fragment iteration continuations stamp those afterwards.
pub fn fragment(
    payload: &Bytes,
    msg_type: MessageType,
    total_msg_num: u16,
    msg_num: u16,
) -> Result<Fragmented, FormatError> {
    let total = chunk_count(payload.len());
    if total > MAX_CHUNK_NUM {
        return Err(FormatError::TooManyChunks { chunks: total });
    }
    let total_chunk_num = narrow_u16("total_chunk_num", total)?;
    let data_chunk_num = match msg_type {
        MessageType::RawData => total_chunk_num,
        MessageType::IntermediateResult => 0,
    };

    let mut chunks = Vec::with_capacity(total);
    for index in 0..total {
        let start = index * MAX_CHUNK_PAYLOAD;
        let end = (start + MAX_CHUNK_PAYLOAD).min(payload.len());
        let body = payload.slice(start..end);
        chunks.push(Chunk {
            header: ServiceHeader {
                msg_type,
                msg_flags: 0,
                total_msg_num,
                msg_num,
                total_chunk_num,
                chunk_num: narrow_u16("chunk_num", index)?,
                chunk_len: narrow_u16("chunk_len", body.len() + HEADER_LEN)?,
                data_chunk_num,
                iter_num: 0,
            },
            payload: body,
        });
    }

    tracing::trace!(
        msg_num,
        payload_len = payload.len(),
        chunks = total,
        "payload fragmented"
    );

    Ok(Fragmented {
        chunks,
        payload_len: payload.len(),
    })
}

// ── Integrity and reassembly ──────────────────────────────────────────────────

/// True when chunk numbers run 0, 1, 2, … with no gaps, duplicates, or
/// inversions.
pub fn check(chunks: &[Chunk]) -> bool {
    verify(chunks).is_ok()
}

/// Like [`check`], but says what is wrong. Also requires that the list is
/// non-empty and that its length matches the declared chunk count.
pub fn verify(chunks: &[Chunk]) -> Result<(), SequenceError> {
    let last = chunks.last().ok_or(SequenceError::Empty)?;
    for (expected, chunk) in chunks.iter().enumerate() {
        let found = chunk.header.chunk_num;
        if found as usize != expected {
            return Err(SequenceError::OutOfSequence { expected, found });
        }
    }
    let declared = last.header.total_chunk_num as usize;
    if declared != chunks.len() {
        return Err(SequenceError::CountMismatch {
            declared,
            received: chunks.len(),
        });
    }
    Ok(())
}

/// Concatenate chunk payloads in order. Callers must have checked the
/// sequence first; use [`reassemble`] otherwise.
pub fn defragment(chunks: &[Chunk]) -> Bytes {
    let total: usize = chunks.iter().map(|c| c.payload.len()).sum();
    let mut buf = BytesMut::with_capacity(total);
    for chunk in chunks {
        buf.put_slice(&chunk.payload);
    }
    buf.freeze()
}

/// Check, then defragment. Fails closed on any sequence violation.
pub fn reassemble(chunks: &[Chunk]) -> Result<Bytes, SequenceError> {
    verify(chunks)?;
    Ok(defragment(chunks))
}

/// Chunk-sequence integrity violation. The whole message is discarded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequenceError {
    #[error("message has no chunks")]
    Empty,

    #[error("expected chunk {expected}, found chunk {found}")]
    OutOfSequence { expected: usize, found: u16 },

    #[error("message declares {declared} chunks, received {received}")]
    CountMismatch { declared: usize, received: usize },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
