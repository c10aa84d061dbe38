//! The bit-stepped DEFLATE decompressor.
//!
//! Input bytes are split into bits and fed through the state machine one
//! bit at a time, LSB first. Huffman codes accumulate MSB-first into the
//! bit accumulator and are probed against the active table after every
//! bit; extra-bit fields and integers accumulate LSB-first. Stored blocks
//! switch to a byte-wise path after aligning to the next byte boundary.
//!
//! When the output sink refuses a byte, the engine stops with the
//! offending bit still pending. The next `step(None, ...)` replays that
//! bit with a repeat flag so accumulators are not fed twice, re-attempts
//! the refused write, and continues with the rest of the buffered byte.

use stepflate_core::engine::{ByteSink, FlateEngine, SinkStatus, StepStatus, StreamParams};
use stepflate_core::error::{FlateError, Result};
use stepflate_core::history::HistoryRing;

use crate::huffman::{Code, CodeTable};
use crate::tables;

/// Which table alphabet extraction is currently filling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AlphaTarget {
    LitLen,
    Dist,
}

/// Result of storing one extracted code length.
enum AlphaStep {
    More(AlphaTarget),
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InflateState {
    /// 3-bit block header.
    Header,
    /// Discard bits up to the byte boundary before a stored block.
    RawPatience,
    /// Stored block LEN/NLEN bytes.
    RawLength,
    /// Stored block payload bytes.
    RawBytes,
    /// Final block completed.
    Done,
    /// Reserved block type seen; latched.
    BadBlock,
    /// Literal/length code accumulation.
    LitLen,
    /// Length extra bits.
    LenExtra,
    /// Distance code accumulation.
    Distance,
    /// Distance extra bits.
    DistExtra,
    /// Replaying a back-reference through the history ring.
    HistoryFetch,
    /// 14-bit HLIT/HDIST/HCLEN microheader.
    DynamicHeader,
    /// 3-bit code-length-table lengths in transmission order.
    CodeLengths,
    /// One code-length symbol per table entry.
    AlphaExtract(AlphaTarget),
    /// Repeat code 16: copy the previous length 3..=6 times.
    AlphaRepeat(AlphaTarget),
    /// Repeat code 17: 3..=10 zero lengths.
    AlphaZero3(AlphaTarget),
    /// Repeat code 18: 11..=138 zero lengths.
    AlphaZero7(AlphaTarget),
}

/// Outcome of consuming (or replaying) one bit.
enum BitFlow {
    Taken,
    Blocked,
    Finished,
}

/// The decompressor engine.
#[derive(Debug)]
pub struct Inflater {
    started: bool,
    last: bool,
    blocked: bool,
    state: InflateState,
    bitpos: u8,
    last_input_byte: u8,
    bitline: u32,
    bitlength: u32,
    short_pos: usize,
    shortbuf: [u8; 4],
    prev_length: u8,
    block_length: usize,
    repeat_length: u32,
    repeat_distance: u32,
    code_table: CodeTable,
    length_table: CodeTable,
    distance_table: CodeTable,
    history: HistoryRing,
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}

impl Inflater {
    /// Create an engine; call [`FlateEngine::start`] before feeding it.
    pub fn new() -> Self {
        Self {
            started: false,
            last: false,
            blocked: false,
            state: InflateState::Header,
            bitpos: 0,
            last_input_byte: 0,
            bitline: 0,
            bitlength: 0,
            short_pos: 0,
            shortbuf: [0; 4],
            prev_length: 0,
            block_length: 0,
            repeat_length: 0,
            repeat_distance: 0,
            code_table: CodeTable::new(),
            length_table: CodeTable::new(),
            distance_table: CodeTable::new(),
            history: HistoryRing::default(),
        }
    }

    fn clear_bits(&mut self) {
        self.bitline = 0;
        self.bitlength = 0;
    }

    fn accumulate_lsb(&mut self, bit: bool, repeat: bool) {
        if !repeat {
            self.bitline |= u32::from(bit) << self.bitlength;
            self.bitlength += 1;
        }
    }

    fn accumulate_msb(&mut self, bit: bool, repeat: bool) {
        if !repeat {
            self.bitline = (self.bitline << 1) | u32::from(bit);
            self.bitlength += 1;
        }
    }

    /// Replay the pending back-reference into the sink. False means the
    /// sink refused mid-way; call again to continue.
    fn fetch(&mut self, sink: &mut dyn ByteSink) -> bool {
        while self.repeat_length > 0 {
            let value = self.history.get(self.repeat_distance as usize);
            if matches!(sink.put(value), SinkStatus::Full) {
                return false;
            }
            self.history.record(value);
            self.repeat_length -= 1;
        }
        true
    }

    fn alpha_table(&mut self, target: AlphaTarget) -> &mut CodeTable {
        match target {
            AlphaTarget::LitLen => &mut self.length_table,
            AlphaTarget::Dist => &mut self.distance_table,
        }
    }

    fn alpha_store(&mut self, target: AlphaTarget, length: u8) {
        let entry = Code {
            length,
            bits: 0,
            value: self.short_pos as u16,
        };
        let index = self.short_pos;
        self.alpha_table(target).set(index, entry);
    }

    /// Advance the extraction cursor, finalizing each table as it fills.
    fn alpha_advance(&mut self, target: AlphaTarget) -> Result<AlphaStep> {
        self.short_pos += 1;
        let filled = self.short_pos >= self.alpha_table(target).len();
        if !filled {
            return Ok(AlphaStep::More(target));
        }
        let table = self.alpha_table(target);
        table.assign_canonical()?;
        table.sort_by_bits();
        self.short_pos = 0;
        match target {
            AlphaTarget::LitLen => Ok(AlphaStep::More(AlphaTarget::Dist)),
            AlphaTarget::Dist => Ok(AlphaStep::Finished),
        }
    }

    /// Store `count` copies of `fill`, crossing from the literal/length
    /// table into the distance table as needed.
    fn alpha_run(&mut self, target: AlphaTarget, fill: u8, count: u32) -> Result<()> {
        let mut target = target;
        let mut finished = false;
        for _ in 0..count {
            if finished {
                // a repeat run past the end of both tables
                return Err(FlateError::CodeExcess);
            }
            self.alpha_store(target, fill);
            match self.alpha_advance(target)? {
                AlphaStep::More(next) => target = next,
                AlphaStep::Finished => finished = true,
            }
        }
        self.clear_bits();
        self.prev_length = fill;
        self.state = if finished {
            InflateState::LitLen
        } else {
            InflateState::AlphaExtract(target)
        };
        Ok(())
    }

    fn begin_distance(&mut self, row: &tables::PairBase, sink: &mut dyn ByteSink) -> BitFlow {
        self.repeat_distance = row.base as u32;
        self.short_pos = row.extra_bits as usize;
        self.clear_bits();
        if row.extra_bits > 0 {
            self.state = InflateState::DistExtra;
            return BitFlow::Taken;
        }
        self.state = InflateState::HistoryFetch;
        if self.fetch(sink) {
            self.state = InflateState::LitLen;
            BitFlow::Taken
        } else {
            BitFlow::Blocked
        }
    }

    fn take_bit(&mut self, bit: bool, repeat: bool, sink: &mut dyn ByteSink) -> Result<BitFlow> {
        match self.state {
            InflateState::Header => {
                self.accumulate_lsb(bit, repeat);
                if self.bitlength >= 3 {
                    self.last = self.bitline & 1 != 0;
                    let block_type = (self.bitline >> 1) & 3;
                    self.clear_bits();
                    match block_type {
                        0 => {
                            if self.bitpos == 7 {
                                self.state = InflateState::RawLength;
                                self.short_pos = 0;
                            } else {
                                self.state = InflateState::RawPatience;
                            }
                        }
                        1 => {
                            self.length_table.fill_fixed_literals();
                            self.distance_table.fill_fixed_distances();
                            self.length_table.sort_by_bits();
                            self.distance_table.sort_by_bits();
                            self.state = InflateState::LitLen;
                        }
                        2 => {
                            self.state = InflateState::DynamicHeader;
                        }
                        _ => {
                            self.state = InflateState::BadBlock;
                            return Err(FlateError::BadBlockType);
                        }
                    }
                }
            }
            InflateState::RawPatience => {
                if self.bitpos == 7 {
                    self.state = InflateState::RawLength;
                    self.short_pos = 0;
                }
            }
            InflateState::RawLength | InflateState::RawBytes => {
                // byte-wise states never see individual bits
                return Err(FlateError::bad_state("bit fed to a stored-block state"));
            }
            InflateState::Done => return Ok(BitFlow::Finished),
            InflateState::BadBlock => return Err(FlateError::BadBlockType),
            InflateState::LitLen => {
                self.accumulate_msb(bit, repeat);
                match self.length_table.lookup_by_bits(self.bitlength, self.bitline)? {
                    None => {}
                    Some(256) => {
                        self.clear_bits();
                        self.state = InflateState::Header;
                    }
                    Some(value) if value < 256 => {
                        if matches!(sink.put(value as u8), SinkStatus::Full) {
                            return Ok(BitFlow::Blocked);
                        }
                        self.history.record(value as u8);
                        self.clear_bits();
                    }
                    Some(value) => {
                        let row = tables::length_decode(value).ok_or_else(|| {
                            FlateError::bad_param("reserved length code in stream")
                        })?;
                        self.repeat_length = row.base as u32;
                        self.short_pos = row.extra_bits as usize;
                        self.clear_bits();
                        self.state = if row.extra_bits > 0 {
                            InflateState::LenExtra
                        } else {
                            InflateState::Distance
                        };
                    }
                }
            }
            InflateState::LenExtra => {
                if self.bitlength < self.short_pos as u32 {
                    self.accumulate_lsb(bit, repeat);
                }
                if self.bitlength >= self.short_pos as u32 {
                    self.repeat_length += self.bitline;
                    self.clear_bits();
                    self.state = InflateState::Distance;
                }
            }
            InflateState::Distance => {
                self.accumulate_msb(bit, repeat);
                match self
                    .distance_table
                    .lookup_by_bits(self.bitlength, self.bitline)?
                {
                    None => {}
                    Some(value) => {
                        let row = *tables::distance_decode(value).ok_or_else(|| {
                            FlateError::bad_param("reserved distance code in stream")
                        })?;
                        if matches!(self.begin_distance(&row, sink), BitFlow::Blocked) {
                            return Ok(BitFlow::Blocked);
                        }
                    }
                }
            }
            InflateState::DistExtra => {
                if self.bitlength < self.short_pos as u32 {
                    self.accumulate_lsb(bit, repeat);
                }
                if self.bitlength >= self.short_pos as u32 {
                    self.repeat_distance += self.bitline;
                    self.clear_bits();
                    self.state = InflateState::HistoryFetch;
                    if self.fetch(sink) {
                        self.state = InflateState::LitLen;
                    } else {
                        return Ok(BitFlow::Blocked);
                    }
                }
            }
            InflateState::HistoryFetch => {
                // re-entered with the pending bit after a refusal
                if self.fetch(sink) {
                    self.state = InflateState::LitLen;
                } else {
                    return Ok(BitFlow::Blocked);
                }
            }
            InflateState::DynamicHeader => {
                self.accumulate_lsb(bit, repeat);
                if self.bitlength >= 14 {
                    let hlit = (self.bitline & 31) as usize;
                    let hdist = ((self.bitline >> 5) & 31) as usize;
                    let hclen = ((self.bitline >> 10) & 15) as usize;
                    self.code_table.fill_code_length_symbols(hclen + 4);
                    self.length_table.resize(257 + hlit)?;
                    self.distance_table.resize(1 + hdist)?;
                    self.state = InflateState::CodeLengths;
                    self.short_pos = 0;
                    self.clear_bits();
                }
            }
            InflateState::CodeLengths => {
                self.accumulate_lsb(bit, repeat);
                if self.bitlength >= 3 {
                    let mut entry = self.code_table.get(self.short_pos);
                    entry.length = self.bitline as u8;
                    self.code_table.set(self.short_pos, entry);
                    self.short_pos += 1;
                    self.clear_bits();
                    if self.short_pos >= self.code_table.len() {
                        self.code_table.sort_by_value();
                        self.code_table.assign_canonical()?;
                        self.code_table.sort_by_bits();
                        self.state = InflateState::AlphaExtract(AlphaTarget::LitLen);
                        self.short_pos = 0;
                        self.prev_length = 0;
                    }
                }
            }
            InflateState::AlphaExtract(target) => {
                self.accumulate_msb(bit, repeat);
                match self.code_table.lookup_by_bits(self.bitlength, self.bitline)? {
                    None => {}
                    Some(value @ 0..=15) => {
                        self.alpha_store(target, value as u8);
                        self.prev_length = value as u8;
                        self.clear_bits();
                        match self.alpha_advance(target)? {
                            AlphaStep::More(next) => {
                                self.state = InflateState::AlphaExtract(next);
                            }
                            AlphaStep::Finished => {
                                self.state = InflateState::LitLen;
                            }
                        }
                    }
                    Some(16) => {
                        self.clear_bits();
                        self.state = InflateState::AlphaRepeat(target);
                    }
                    Some(17) => {
                        self.clear_bits();
                        self.state = InflateState::AlphaZero3(target);
                    }
                    Some(_) => {
                        self.clear_bits();
                        self.state = InflateState::AlphaZero7(target);
                    }
                }
            }
            InflateState::AlphaRepeat(target) => {
                self.accumulate_lsb(bit, repeat);
                if self.bitlength >= 2 {
                    let count = self.bitline + 3;
                    let fill = self.prev_length;
                    self.alpha_run(target, fill, count)?;
                }
            }
            InflateState::AlphaZero3(target) => {
                self.accumulate_lsb(bit, repeat);
                if self.bitlength >= 3 {
                    let count = self.bitline + 3;
                    self.alpha_run(target, 0, count)?;
                }
            }
            InflateState::AlphaZero7(target) => {
                self.accumulate_lsb(bit, repeat);
                if self.bitlength >= 7 {
                    let count = self.bitline + 11;
                    self.alpha_run(target, 0, count)?;
                }
            }
        }
        if self.state == InflateState::Header && self.last {
            self.state = InflateState::Done;
            return Ok(BitFlow::Finished);
        }
        Ok(BitFlow::Taken)
    }

    /// Byte-wise path for stored blocks.
    fn raw_byte(&mut self, ch: u8, sink: &mut dyn ByteSink) -> Result<StepStatus> {
        match self.state {
            InflateState::RawLength => {
                self.shortbuf[self.short_pos] = if self.short_pos < 2 { ch } else { !ch };
                self.short_pos += 1;
                if self.short_pos >= 4 {
                    if self.shortbuf[0] != self.shortbuf[2] || self.shortbuf[1] != self.shortbuf[3]
                    {
                        return Err(FlateError::CorruptLength);
                    }
                    self.block_length =
                        self.shortbuf[0] as usize | ((self.shortbuf[1] as usize) << 8);
                    if self.block_length > 0 {
                        self.state = InflateState::RawBytes;
                    } else if self.last {
                        self.state = InflateState::Done;
                        return Ok(StepStatus::Done);
                    } else {
                        self.state = InflateState::Header;
                        self.clear_bits();
                    }
                }
                Ok(StepStatus::NeedsInput)
            }
            InflateState::RawBytes => {
                if self.block_length > 0 {
                    if matches!(sink.put(ch), SinkStatus::Full) {
                        self.last_input_byte = ch;
                        return Ok(StepStatus::NeedsOutput);
                    }
                    self.history.record(ch);
                    self.block_length -= 1;
                }
                if self.block_length == 0 {
                    if self.last {
                        self.state = InflateState::Done;
                        return Ok(StepStatus::Done);
                    }
                    self.state = InflateState::Header;
                    self.clear_bits();
                }
                Ok(StepStatus::NeedsInput)
            }
            _ => Err(FlateError::bad_state("stored-block path entered out of turn")),
        }
    }

    fn drive(&mut self, byte: Option<u8>, sink: &mut dyn ByteSink) -> Result<StepStatus> {
        if matches!(self.state, InflateState::RawLength | InflateState::RawBytes) {
            let ch = byte.unwrap_or(self.last_input_byte);
            return self.raw_byte(ch, sink);
        }
        let ch = match byte {
            Some(b) => {
                self.bitpos = 0;
                b
            }
            None => {
                // replay the refused bit without re-accumulating it
                let ch = self.last_input_byte;
                let bit = ch & (1 << self.bitpos) != 0;
                match self.take_bit(bit, true, sink)? {
                    BitFlow::Blocked => return Ok(StepStatus::NeedsOutput),
                    BitFlow::Finished => return Ok(StepStatus::Done),
                    BitFlow::Taken => self.bitpos += 1,
                }
                ch
            }
        };
        while self.bitpos < 8 {
            let bit = ch & (1 << self.bitpos) != 0;
            match self.take_bit(bit, false, sink)? {
                BitFlow::Blocked => {
                    self.last_input_byte = ch;
                    return Ok(StepStatus::NeedsOutput);
                }
                BitFlow::Finished => {
                    self.last_input_byte = ch;
                    return Ok(StepStatus::Done);
                }
                BitFlow::Taken => self.bitpos += 1,
            }
        }
        Ok(StepStatus::NeedsInput)
    }
}

impl FlateEngine for Inflater {
    fn start(&mut self, params: StreamParams) -> Result<()> {
        params.validate()?;
        self.history = HistoryRing::new(params.window_size());
        self.state = InflateState::Header;
        self.last = false;
        self.blocked = false;
        self.bitpos = 0;
        self.last_input_byte = 0;
        self.clear_bits();
        self.short_pos = 0;
        self.shortbuf = [0; 4];
        self.prev_length = 0;
        self.block_length = 0;
        self.repeat_length = 0;
        self.repeat_distance = 0;
        self.started = true;
        Ok(())
    }

    fn dict_byte(&mut self, byte: u8) -> Result<()> {
        if !self.started {
            return Err(FlateError::bad_state("dictionary byte before start"));
        }
        self.history.record(byte);
        Ok(())
    }

    fn step(&mut self, byte: Option<u8>, sink: &mut dyn ByteSink) -> Result<StepStatus> {
        if !self.started {
            return Err(FlateError::bad_state("step before start"));
        }
        if byte.is_some() && self.blocked {
            return Err(FlateError::bad_state("input offered while output is pending"));
        }
        if byte.is_none() && !self.blocked {
            return Err(FlateError::bad_state("nothing pending to resume"));
        }
        let status = self.drive(byte, sink)?;
        self.blocked = status == StepStatus::NeedsOutput;
        Ok(status)
    }

    fn finish(&mut self, _sink: &mut dyn ByteSink) -> Result<StepStatus> {
        if !self.started {
            return Err(FlateError::bad_state("finish before start"));
        }
        if self.state == InflateState::Done {
            Ok(StepStatus::Done)
        } else {
            Err(FlateError::UnexpectedEof)
        }
    }
}
