//! Error types for stepflate engines.
//!
//! Flow-control conditions ("the sink is full", "the stream is finished")
//! are *not* errors; they travel through
//! [`StepStatus`](crate::engine::StepStatus). This enum covers the
//! conditions that actually terminate a stream: malformed input, protocol
//! misuse, and resource refusals.

use thiserror::Error;

/// The main error type for stepflate operations.
#[derive(Debug, Error)]
pub enum FlateError {
    /// Stream parameters the engine cannot handle.
    #[error("Unsupported stream parameter: {message}")]
    Unsupported {
        /// Description of the offending parameter.
        message: String,
    },

    /// Refused table or buffer allocation.
    #[error("Allocation refused: {requested} entries requested")]
    OutOfMemory {
        /// Number of entries requested.
        requested: usize,
    },

    /// Call-sequence violation on an engine.
    #[error("Bad engine state: {message}")]
    BadState {
        /// Description of the violation.
        message: String,
    },

    /// Invalid argument.
    #[error("Bad parameter: {message}")]
    BadParam {
        /// Description of the argument.
        message: String,
    },

    /// Huffman code length outside 0..=15.
    #[error("Code length {length} outside 0..=15")]
    BadCodeLength {
        /// The offending length.
        length: u32,
    },

    /// Code lengths oversubscribe the prefix-code space.
    #[error("Code lengths oversubscribe the prefix space")]
    CodeExcess,

    /// Bit-string length outside 1..=15 in a table lookup.
    #[error("Bit-string length {length} outside 1..=15")]
    BadBitLength {
        /// The accumulated bit count.
        length: u32,
    },

    /// Reserved block type 3 in the stream.
    #[error("Reserved block type in stream")]
    BadBlockType,

    /// Stored-block LEN/NLEN complement check failed.
    #[error("Stored block length check failed")]
    CorruptLength,

    /// A state machine failed to advance within its step bound.
    #[error("State machine failed to advance after {steps} steps")]
    LoopedState {
        /// Number of steps taken before giving up.
        steps: u32,
    },

    /// Stream ended before the final block completed.
    #[error("Unexpected end of stream")]
    UnexpectedEof,
}

/// Result type alias for stepflate operations.
pub type Result<T> = std::result::Result<T, FlateError>;

impl FlateError {
    /// Create an unsupported-parameter error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Create an out-of-memory error.
    pub fn out_of_memory(requested: usize) -> Self {
        Self::OutOfMemory { requested }
    }

    /// Create a bad-state error.
    pub fn bad_state(message: impl Into<String>) -> Self {
        Self::BadState {
            message: message.into(),
        }
    }

    /// Create a bad-parameter error.
    pub fn bad_param(message: impl Into<String>) -> Self {
        Self::BadParam {
            message: message.into(),
        }
    }
}
