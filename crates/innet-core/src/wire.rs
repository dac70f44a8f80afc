//! Innet wire format — the service header carried in every UDP datagram.
//!
//! These types ARE the protocol. Every field and every size below is part of
//! the wire format shared by end hosts and every hop in the chain. All
//! multi-byte fields are network byte order.
//!
//! ```text
//! 0               1               2               3
//! +---------------+---------------+---------------+---------------+
//! | Message Type  | Message Flags | Total Message Number          |
//! +---------------+---------------+---------------+---------------+
//! | Message Number                | Total Chunk Number            |
//! +---------------+---------------+---------------+---------------+
//! | Chunk Number                  | Chunk Length                  |
//! +---------------+---------------+---------------+---------------+
//! | Data Chunk Number             | Iteration Number              |
//! +---------------+---------------+---------------+---------------+
//! ```
//!
//! The on-wire layout is a zerocopy struct; callers work with the decoded
//! [`ServiceHeader`] and never touch byte offsets directly.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{NetworkEndian, U16};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── On-wire layout ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
struct RawServiceHeader {
    msg_type: u8,
    msg_flags: u8,
    total_msg_num: U16<NetworkEndian>,
    msg_num: U16<NetworkEndian>,
    total_chunk_num: U16<NetworkEndian>,
    chunk_num: U16<NetworkEndian>,
    chunk_len: U16<NetworkEndian>,
    data_chunk_num: U16<NetworkEndian>,
    iter_num: U16<NetworkEndian>,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(RawServiceHeader, [u8; 16]);

// ── Constants ─────────────────────────────────────────────────────────────────

/// Serialized service header length in bytes.
pub const HEADER_LEN: usize = 16;

/// Maximum payload bytes per chunk. Sized so that a chunk plus IP/UDP
/// headers stays under a 1500-byte link MTU.
pub const MAX_CHUNK_PAYLOAD: usize = 1400;

/// Hard cap on chunks per message. The number of chunks drives queuing and
/// transmission latency at every hop; larger data must use more messages.
pub const MAX_CHUNK_NUM: usize = 4096;

/// Intermediate results: bit 0 of `msg_flags` marks a completed iteration.
pub const FLAG_ITERATION_COMPLETE: u8 = 0x01;

// ── Message type ──────────────────────────────────────────────────────────────

/// What a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Unprocessed raw data, e.g. the mixture matrix.
    RawData = 0,
    /// Intermediate (or final) result of the distributed iteration.
    IntermediateResult = 1,
}

impl TryFrom<u8> for MessageType {
    type Error = FormatError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::RawData),
            1 => Ok(MessageType::IntermediateResult),
            other => Err(FormatError::UnknownMessageType(other)),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(t: MessageType) -> u8 {
        t as u8
    }
}

// ── Service header ────────────────────────────────────────────────────────────

/// Decoded service header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceHeader {
    pub msg_type: MessageType,
    /// Semantics depend on `msg_type`; see [`FLAG_ITERATION_COMPLETE`].
    pub msg_flags: u8,
    pub total_msg_num: u16,
    pub msg_num: u16,
    pub total_chunk_num: u16,
    /// 0-based position of this chunk in its message.
    pub chunk_num: u16,
    /// Payload plus header bytes, excluding any padding.
    pub chunk_len: u16,
    /// Historically redundant with `total_chunk_num`.
    pub data_chunk_num: u16,
    pub iter_num: u16,
}

impl ServiceHeader {
    pub fn serialize(&self) -> [u8; HEADER_LEN] {
        let raw = RawServiceHeader {
            msg_type: self.msg_type.into(),
            msg_flags: self.msg_flags,
            total_msg_num: U16::new(self.total_msg_num),
            msg_num: U16::new(self.msg_num),
            total_chunk_num: U16::new(self.total_chunk_num),
            chunk_num: U16::new(self.chunk_num),
            chunk_len: U16::new(self.chunk_len),
            data_chunk_num: U16::new(self.data_chunk_num),
            iter_num: U16::new(self.iter_num),
        };
        let mut out = [0u8; HEADER_LEN];
        out.copy_from_slice(raw.as_bytes());
        out
    }

    /// Parse exactly [`HEADER_LEN`] bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, FormatError> {
        let raw = RawServiceHeader::read_from(bytes).ok_or(FormatError::WrongLength {
            expected: HEADER_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self {
            msg_type: MessageType::try_from(raw.msg_type)?,
            msg_flags: raw.msg_flags,
            total_msg_num: raw.total_msg_num.get(),
            msg_num: raw.msg_num.get(),
            total_chunk_num: raw.total_chunk_num.get(),
            chunk_num: raw.chunk_num.get(),
            chunk_len: raw.chunk_len.get(),
            data_chunk_num: raw.data_chunk_num.get(),
            iter_num: raw.iter_num.get(),
        })
    }

    /// Payload bytes this chunk declares.
    pub fn payload_len(&self) -> usize {
        (self.chunk_len as usize).saturating_sub(HEADER_LEN)
    }

    pub fn is_last_chunk(&self) -> bool {
        self.chunk_num.wrapping_add(1) == self.total_chunk_num
    }

    pub fn iteration_complete(&self) -> bool {
        self.msg_type == MessageType::IntermediateResult
            && self.msg_flags & FLAG_ITERATION_COMPLETE != 0
    }
}

/// Narrow a count into a 16-bit header field.
pub fn narrow_u16(field: &'static str, value: usize) -> Result<u16, FormatError> {
    u16::try_from(value).map_err(|_| FormatError::FieldOverflow { field, value })
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Malformed header or datagram. Fatal to the single chunk only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("header must be {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },

    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    #[error("{field} value {value} does not fit in 16 bits")]
    FieldOverflow { field: &'static str, value: usize },

    #[error("chunk length {0} is shorter than the header")]
    ChunkLenTooShort(u16),

    #[error("chunk declares {declared} bytes but datagram carries {actual}")]
    Truncated { declared: usize, actual: usize },

    #[error("payload needs {chunks} chunks, maximum is {}", MAX_CHUNK_NUM)]
    TooManyChunks { chunks: usize },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
