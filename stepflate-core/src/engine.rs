//! The engine contract shared by the compressor and the decompressor.
//!
//! Both engines are resumable state machines driven one input byte at a
//! time. A call to [`FlateEngine::step`] either consumes the byte, reports
//! that the output sink refused a byte (`NeedsOutput`), or reports stream
//! completion. After `NeedsOutput` the caller drains its sink and calls
//! `step(None, ...)` until the engine accepts input again; no engine state
//! is lost across the retry.

use crate::error::{FlateError, Result};

/// Progress report from a single engine step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// The byte was consumed; the engine wants the next one.
    NeedsInput,
    /// The output sink refused a byte; drain it and call `step(None, ...)`.
    NeedsOutput,
    /// The final block has been fully processed.
    Done,
}

/// Whether a sink accepted a byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    /// The byte was stored.
    Accepted,
    /// No room; the engine will re-offer the same byte later.
    Full,
}

/// Receiver for decompressed or compressed output, one byte at a time.
pub trait ByteSink {
    /// Offer one byte. A `Full` return must leave the sink unchanged.
    fn put(&mut self, byte: u8) -> SinkStatus;
}

impl ByteSink for Vec<u8> {
    fn put(&mut self, byte: u8) -> SinkStatus {
        self.push(byte);
        SinkStatus::Accepted
    }
}

/// Compression effort selected at stream start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BlockLevel {
    /// Stored blocks only, no matching.
    Off,
    /// Matching with cheap (unchained) history updates inside matches.
    Low,
    /// Full chaining, matches truncated past the cut-off length.
    Medium,
    /// Full chaining, no truncation.
    High,
}

impl BlockLevel {
    /// Map a numeric level to an effort tier. 0 disables matching,
    /// anything above 3 clamps to `High`.
    pub fn from_flevel(level: u8) -> Self {
        match level {
            0 => Self::Off,
            1 => Self::Low,
            2 => Self::Medium,
            _ => Self::High,
        }
    }
}

/// Largest supported window exponent; the window is `1 << (8 + bits)`.
pub const MAX_WINDOW_BITS: u8 = 7;

/// Stream parameters handed to [`FlateEngine::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    /// Whether a preset dictionary will be fed via `dict_byte` first.
    pub preset_dict: bool,
    /// Compression effort, clamped through [`BlockLevel::from_flevel`].
    pub level: u8,
    /// Compression method; only 8 (deflate) is supported.
    pub method: u8,
    /// Window exponent 0..=7; the window is `1 << (8 + window_bits)` bytes.
    pub window_bits: u8,
}

impl Default for StreamParams {
    fn default() -> Self {
        Self {
            preset_dict: false,
            level: 2,
            method: 8,
            window_bits: MAX_WINDOW_BITS,
        }
    }
}

impl StreamParams {
    /// Window size in bytes implied by `window_bits`.
    pub fn window_size(&self) -> usize {
        1 << (8 + self.window_bits as usize)
    }

    /// Reject parameter combinations no engine can honor.
    pub fn validate(&self) -> Result<()> {
        if self.method != 8 {
            return Err(FlateError::unsupported(format!(
                "compression method {}",
                self.method
            )));
        }
        if self.window_bits > MAX_WINDOW_BITS {
            return Err(FlateError::unsupported(format!(
                "window bits {}",
                self.window_bits
            )));
        }
        Ok(())
    }
}

/// A resumable compression or decompression engine.
///
/// Sessions are strictly ordered: `start`, optional `dict_byte` calls,
/// `step` per input byte, then `finish`. Out-of-order calls yield
/// [`FlateError::BadState`]. `finish` is idempotent once it has reported
/// `Done`.
pub trait FlateEngine {
    /// Begin a stream with the given parameters, resetting all state.
    fn start(&mut self, params: StreamParams) -> Result<()>;

    /// Preload one preset-dictionary byte into the history window.
    fn dict_byte(&mut self, byte: u8) -> Result<()>;

    /// Advance the engine by one input byte, or resume with `None` after
    /// a `NeedsOutput` report.
    fn step(&mut self, byte: Option<u8>, sink: &mut dyn ByteSink) -> Result<StepStatus>;

    /// Mark the stream complete and drain the remaining output.
    fn finish(&mut self, sink: &mut dyn ByteSink) -> Result<StepStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_sink_accepts() {
        let mut out = Vec::new();
        assert_eq!(out.put(0x41), SinkStatus::Accepted);
        assert_eq!(out, vec![0x41]);
    }

    #[test]
    fn test_level_clamping() {
        assert_eq!(BlockLevel::from_flevel(0), BlockLevel::Off);
        assert_eq!(BlockLevel::from_flevel(1), BlockLevel::Low);
        assert_eq!(BlockLevel::from_flevel(2), BlockLevel::Medium);
        assert_eq!(BlockLevel::from_flevel(3), BlockLevel::High);
        assert_eq!(BlockLevel::from_flevel(200), BlockLevel::High);
        assert!(BlockLevel::Low < BlockLevel::Medium);
    }

    #[test]
    fn test_params_validation() {
        assert!(StreamParams::default().validate().is_ok());

        let bad_method = StreamParams {
            method: 9,
            ..Default::default()
        };
        assert!(matches!(
            bad_method.validate(),
            Err(crate::error::FlateError::Unsupported { .. })
        ));

        let bad_window = StreamParams {
            window_bits: 8,
            ..Default::default()
        };
        assert!(bad_window.validate().is_err());
    }

    #[test]
    fn test_window_size() {
        let params = StreamParams {
            window_bits: 0,
            ..Default::default()
        };
        assert_eq!(params.window_size(), 256);

        let params = StreamParams::default();
        assert_eq!(params.window_size(), 32768);
    }
}
