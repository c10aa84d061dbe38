//! # stepflate-deflate
//!
//! DEFLATE (RFC 1951) compression and decompression built on the
//! resumable engine contract from [`stepflate_core`].
//!
//! Both engines move one input byte per call and write through a caller
//! sink, so a stream of any size can be processed with constant memory
//! and interrupted whenever the sink runs out of room:
//!
//! - [`Deflater`]: LZ77 match finding over a sliding history ring,
//!   encoded with stored, fixed, or dynamic Huffman blocks
//! - [`Inflater`]: bit-stepped decoder for all three block types
//!
//! For whole buffers the [`compress`] and [`decompress`] helpers drive
//! the engines end to end.
//!
//! ## Example
//!
//! ```rust
//! use stepflate_deflate::{compress, decompress};
//!
//! let original = b"Hello, World! Hello, World!";
//! let packed = compress(original, 2, 7).unwrap();
//! let unpacked = decompress(&packed).unwrap();
//! assert_eq!(&unpacked, original);
//! ```

#![warn(missing_docs)]

pub mod deflate;
pub mod hash;
pub mod huffman;
pub mod inflate;
pub mod tables;

pub use deflate::{BlockType, Deflater};
pub use hash::MatchHash;
pub use huffman::{Code, CodeTable};
pub use inflate::Inflater;

pub use stepflate_core::{
    ByteSink, FlateEngine, FlateError, Result, SinkStatus, StepStatus, StreamParams,
};

/// Compress a whole buffer into a DEFLATE stream.
///
/// `level` selects the match-finding effort (0 emits stored blocks only,
/// 3 is the most thorough); `window_bits` sizes the history window to
/// `1 << (8 + window_bits)` bytes, at most 7 (32 KiB).
pub fn compress(input: &[u8], level: u8, window_bits: u8) -> Result<Vec<u8>> {
    let params = StreamParams {
        level,
        window_bits,
        ..StreamParams::default()
    };
    let mut engine = Deflater::new();
    engine.start(params)?;
    let mut out = Vec::new();
    for &b in input {
        let mut status = engine.step(Some(b), &mut out)?;
        while status == StepStatus::NeedsOutput {
            status = engine.step(None, &mut out)?;
        }
    }
    while engine.finish(&mut out)? != StepStatus::Done {}
    Ok(out)
}

/// Decompress a whole DEFLATE stream.
///
/// Trailing bytes after the final block are ignored; a stream that ends
/// before its final block yields [`FlateError::UnexpectedEof`].
pub fn decompress(input: &[u8]) -> Result<Vec<u8>> {
    let mut engine = Inflater::new();
    engine.start(StreamParams::default())?;
    let mut out = Vec::new();
    for &b in input {
        if engine.step(Some(b), &mut out)? == StepStatus::Done {
            break;
        }
    }
    engine.finish(&mut out)?;
    Ok(out)
}
