//! # stepflate-core
//!
//! Shared primitives for the stepflate codec crates:
//!
//! - [`engine`]: the resumable byte-at-a-time engine contract
//!   (`FlateEngine`, `StepStatus`, `ByteSink`, `StreamParams`)
//! - [`error`]: the `FlateError` taxonomy and `Result` alias
//! - [`history`]: the LZ77 sliding history ring

#![warn(missing_docs)]

pub mod engine;
pub mod error;
pub mod history;

pub use engine::{
    BlockLevel, ByteSink, FlateEngine, MAX_WINDOW_BITS, SinkStatus, StepStatus, StreamParams,
};
pub use error::{FlateError, Result};
pub use history::HistoryRing;

/// Commonly used types, importable in one line.
pub mod prelude {
    pub use crate::engine::{
        BlockLevel, ByteSink, FlateEngine, SinkStatus, StepStatus, StreamParams,
    };
    pub use crate::error::{FlateError, Result};
    pub use crate::history::HistoryRing;
}
