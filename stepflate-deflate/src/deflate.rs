//! The byte-stepped DEFLATE compressor.
//!
//! Input bytes pass through a 4-byte lookahead into a symbol queue bounded
//! by the window size. The queue holds the block under assembly as
//! interleaved tokens: literals, length codes with their extra values,
//! distance codes with theirs. A commit index separates tokens already
//! recorded into the history window (including the currently open
//! back-reference, which may still grow) from freshly queued literals.
//!
//! When the queue cannot take the next intake (keeping 4 slots of slack
//! for the final flush), the engine serializes the block and starts over.
//! Serialization is itself a resumable state machine emitting one bit at
//! a time, so an output-sink refusal can interrupt it anywhere and the
//! next `step(None, ...)` resumes exactly there.

use stepflate_core::engine::{
    BlockLevel, ByteSink, FlateEngine, SinkStatus, StepStatus, StreamParams,
};
use stepflate_core::error::{FlateError, Result};
use stepflate_core::history::HistoryRing;

use crate::hash::MatchHash;
use crate::huffman::{Code, CodeTable};
use crate::tables;

/// Block encoding selected per block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    /// Stored block (type 00).
    Plain,
    /// Fixed Huffman tables (type 01).
    Fixed,
    /// Per-block dynamic tables (type 10).
    Dynamic,
}

/// Scratch buffer slots: HLIT/HDIST/HCLEN header values plus the
/// RLE-encoded code-length sequence and a terminator.
const ALPHABET_CAP: usize = 3 + 286 + 30 + 1;

/// Terminator value in the alphabet scratch (no code-length symbol is 19).
const ALPHABET_END: u16 = 19;

/// Stale marker bit set on queue slots between blocks.
const STALE: u16 = 0x8000;

/// `swap_literal` values at or above this mean "no displaced literal".
const NO_SWAP: u16 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeflateState {
    /// Accepting input through the lookahead.
    Gather,
    /// 3-bit block header.
    BlockHeader,
    /// Stored block LEN.
    RawLength,
    /// Stored block NLEN.
    RawNlen,
    /// Stored block payload bytes.
    RawBytes,
    /// Final-block drain.
    Final,
    /// Load the fixed tables.
    FixedSetup,
    /// Literal/length symbol emission.
    LitLen,
    /// Length extra bits.
    LenExtra,
    /// Distance code emission.
    Distance,
    /// Distance extra bits.
    DistExtra,
    /// Build dynamic tables and the code-length sequence.
    DynamicSetup,
    /// HLIT/HDIST/HCLEN microheader.
    AlphabetHeader,
    /// 3-bit code-length-table lengths.
    AlphabetLengths,
    /// Code-length symbols for both tables.
    Alphabet,
    /// Repeat-code extra bits.
    AlphabetExtra,
}

/// Outcome of one serializer pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chunk {
    /// Progress made; run the serializer again.
    Again,
    /// The sink refused a byte.
    Blocked,
    /// The final block is fully flushed.
    Done,
}

/// Whether an intake fit the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Taken,
    Overflow,
}

/// Open match plus the speculative one-byte-later alternate.
#[derive(Debug, Clone, Copy)]
struct AltMatch {
    length: u16,
    distance: u16,
    /// Literal displaced if the alternate wins; `>= 256` means none.
    swap_literal: u16,
    alt_length: u16,
    alt_distance: u16,
}

impl AltMatch {
    fn closed() -> Self {
        Self {
            length: 0,
            distance: 0,
            swap_literal: u16::MAX,
            alt_length: 0,
            alt_distance: 0,
        }
    }

    fn has_swap(&self) -> bool {
        self.swap_literal < NO_SWAP
    }
}

/// The compressor engine.
#[derive(Debug)]
pub struct Deflater {
    started: bool,
    last: bool,
    /// Whether the block being serialized carried the final-block flag.
    block_final: bool,
    state: DeflateState,
    block_type: BlockType,
    level: BlockLevel,
    match_truncate: u16,
    // bit-level output
    bitpos: u8,
    partial: u8,
    bitline: u32,
    bitlength: u32,
    // symbol queue for the block under assembly
    queue: Vec<u16>,
    block_length: usize,
    commit: usize,
    emit_pos: usize,
    // lookahead
    shortbuf: [u8; 4],
    short_pos: usize,
    alt: AltMatch,
    // dynamic block scratch
    alphabet: Vec<u16>,
    code_table: CodeTable,
    length_table: CodeTable,
    distance_table: CodeTable,
    history: HistoryRing,
    hash: MatchHash,
}

impl Default for Deflater {
    fn default() -> Self {
        Self::new()
    }
}

impl Deflater {
    /// Create an engine; call [`FlateEngine::start`] before feeding it.
    pub fn new() -> Self {
        Self {
            started: false,
            last: false,
            block_final: false,
            state: DeflateState::Gather,
            block_type: BlockType::Dynamic,
            level: BlockLevel::Medium,
            match_truncate: 16,
            bitpos: 0,
            partial: 0,
            bitline: 0,
            bitlength: 0,
            queue: Vec::new(),
            block_length: 0,
            commit: 0,
            emit_pos: 0,
            shortbuf: [0; 4],
            short_pos: 0,
            alt: AltMatch::closed(),
            alphabet: Vec::new(),
            code_table: CodeTable::new(),
            length_table: CodeTable::new(),
            distance_table: CodeTable::new(),
            history: HistoryRing::default(),
            hash: MatchHash::default(),
        }
    }

    /// Override the block encoding for subsequent blocks.
    ///
    /// `start` picks `Plain` at level 0 and `Dynamic` otherwise; `Fixed`
    /// is only ever chosen through this.
    pub fn set_block_type(&mut self, block_type: BlockType) {
        self.block_type = block_type;
    }

    // ---- bit-level output -------------------------------------------------

    fn send_bit(&mut self, bit: u8, sink: &mut dyn ByteSink) -> bool {
        if self.bitpos >= 8 {
            if matches!(sink.put(self.partial), SinkStatus::Full) {
                return false;
            }
            self.bitpos = 0;
            self.partial = 0;
        }
        self.partial |= bit << self.bitpos;
        self.bitpos += 1;
        true
    }

    /// Send the next bit of `bitline`, LSB first.
    fn send_integer(&mut self, sink: &mut dyn ByteSink) -> bool {
        if self.bitlength > 0 {
            if !self.send_bit((self.bitline & 1) as u8, sink) {
                return false;
            }
            self.bitlength -= 1;
            self.bitline >>= 1;
        }
        true
    }

    /// Send the next bit of `bitline`, MSB first.
    fn send_code(&mut self, sink: &mut dyn ByteSink) -> bool {
        if self.bitlength > 0 {
            let bit = ((self.bitline >> (self.bitlength - 1)) & 1) as u8;
            if !self.send_bit(bit, sink) {
                return false;
            }
            self.bitlength -= 1;
        }
        true
    }

    fn flush_bits(&mut self, sink: &mut dyn ByteSink) -> bool {
        if self.bitpos > 0 {
            if matches!(sink.put(self.partial), SinkStatus::Full) {
                return false;
            }
            self.bitpos = 0;
            self.partial = 0;
        }
        true
    }

    // ---- symbol queue -----------------------------------------------------

    /// Room for `count` more tokens, reserving 4 slots of slack before
    /// the final block.
    fn queue_check(&self, count: usize) -> Flow {
        let free = self.queue.len() - self.block_length;
        if self.last && free >= count {
            Flow::Taken
        } else if free >= count + 4 {
            Flow::Taken
        } else {
            Flow::Overflow
        }
    }

    fn queue_value(&mut self, value: u16) {
        debug_assert!(self.block_length < self.queue.len());
        self.queue[self.block_length] = value;
        self.block_length += 1;
    }

    /// Write the open back-reference's tokens at the commit index.
    fn queue_pair(&mut self, length: u16, distance: u16) -> Result<Flow> {
        let length_row = tables::length_encode(length)
            .ok_or_else(|| FlateError::bad_param(format!("match length {length}")))?;
        let distance_row = tables::distance_encode(distance)
            .ok_or_else(|| FlateError::bad_param(format!("match distance {distance}")))?;
        let mut pen = self.commit;
        if self.queue.len() < pen + 4 {
            return Ok(Flow::Overflow);
        }
        self.queue[pen] = length_row.code;
        pen += 1;
        if length_row.extra_bits > 0 {
            self.queue[pen] = length - length_row.base;
            pen += 1;
        }
        self.queue[pen] = distance_row.code;
        pen += 1;
        if distance_row.extra_bits > 0 {
            self.queue[pen] = distance - distance_row.base;
            pen += 1;
        }
        self.block_length = pen;
        Ok(Flow::Taken)
    }

    /// Token count of the back-reference starting at the commit index,
    /// or 0 when a literal sits there.
    fn pair_skip(&self) -> usize {
        let head = self.queue[self.commit];
        if head == 256 {
            return 1;
        }
        if head < 256 {
            return 0;
        }
        let mut count = 1;
        if let Some(row) = tables::length_decode(head) {
            if row.extra_bits > 0 {
                count += 1;
            }
        }
        let distance_code = self.queue[self.commit + count];
        count += 1;
        if let Some(row) = tables::distance_decode(distance_code) {
            if row.extra_bits > 0 {
                count += 1;
            }
        }
        count
    }

    fn clear_block(&mut self) {
        self.emit_pos = 0;
        self.block_length = 0;
        self.commit = 0;
        for slot in &mut self.queue {
            *slot |= STALE;
        }
    }

    // ---- history ----------------------------------------------------------

    fn record_input(&mut self, byte: u8) {
        self.history.record(byte);
        self.hash.insert(byte);
    }

    /// Record a byte inside an open match; at `Low` effort the hash chain
    /// is not extended for it.
    fn record_skippable(&mut self, byte: u8) {
        self.history.record(byte);
        if self.level <= BlockLevel::Low {
            self.hash.skip(byte);
        } else {
            self.hash.insert(byte);
        }
    }

    // ---- intake -----------------------------------------------------------

    fn ready_pair(&self) -> bool {
        self.commit < self.block_length
            && (257..=285).contains(&self.queue[self.commit])
    }

    fn ready_triple(&self) -> bool {
        let queued = self.block_length - self.commit;
        if queued >= 2 && self.ready_pair() {
            return true;
        }
        queued >= 3 && self.queue[self.commit] < 256
    }

    fn churn_input(&mut self, byte: Option<u8>) -> Result<Flow> {
        if let Some(b) = byte {
            if self.short_pos >= 4 {
                return Err(FlateError::bad_state("input offered while a block is pending"));
            }
            self.shortbuf.copy_within(1.., 0);
            self.shortbuf[3] = b;
            self.short_pos += 1;
        }
        if self.level == BlockLevel::Off {
            if self.queue_check(self.short_pos) == Flow::Overflow {
                return Ok(Flow::Overflow);
            }
            let mut point = 4 - self.short_pos;
            for _ in 0..self.short_pos {
                let value = self.shortbuf[point];
                self.queue_value(value as u16);
                self.record_input(value);
                point += 1;
            }
            self.commit = self.block_length;
            self.short_pos = 0;
            return Ok(Flow::Taken);
        }
        self.churn_matching(byte.is_none())
    }

    fn churn_matching(&mut self, draining: bool) -> Result<Flow> {
        let mut result = Flow::Taken;
        if !self.ready_pair() {
            if self.queue_check(self.short_pos) == Flow::Taken {
                let mut point = 4 - self.short_pos;
                for _ in 0..self.short_pos {
                    self.queue_value(self.shortbuf[point] as u16);
                    point += 1;
                }
                self.short_pos = 0;
            } else {
                result = Flow::Overflow;
            }
            self.alt = AltMatch {
                length: 0,
                distance: 0,
                ..AltMatch::closed()
            };
        }
        if self.ready_triple() {
            let head = self.queue[self.commit];
            if head < 256 {
                result = self.form_match(result)?;
            } else if (257..=285).contains(&head) {
                result = self.extend_match(result)?;
            }
        }
        if result == Flow::Overflow {
            // catch up the history before the block is serialized
            while self.commit < self.block_length {
                let skip = self.pair_skip();
                if skip > 0 {
                    self.commit += skip;
                    continue;
                }
                let value = self.queue[self.commit] as u8;
                self.record_input(value);
                self.commit += 1;
            }
        }
        if draining {
            if self.queue_check(self.short_pos) == Flow::Taken {
                let mut point = 4 - self.short_pos;
                for _ in 0..self.short_pos {
                    self.queue_value(self.shortbuf[point] as u16);
                    point += 1;
                }
                self.short_pos = 0;
                result = Flow::Taken;
            } else {
                result = Flow::Overflow;
            }
        }
        Ok(result)
    }

    /// Three uncommitted literals sit at the commit index: record the
    /// older ones and try to open a back-reference on the newest triple.
    fn form_match(&mut self, incoming: Flow) -> Result<Flow> {
        if self.queue_check(4) == Flow::Overflow {
            while self.commit < self.block_length {
                let value = self.queue[self.commit] as u8;
                self.record_input(value);
                self.commit += 1;
            }
            return Ok(Flow::Overflow);
        }
        let triple_start = self.block_length - 3;
        while self.commit < triple_start {
            let value = self.queue[self.commit] as u8;
            self.record_input(value);
            self.commit += 1;
        }
        let triple = [
            self.queue[self.commit] as u8,
            self.queue[self.commit + 1] as u8,
            self.queue[self.commit + 2] as u8,
        ];
        let found = self.hash.find(self.history.bytes(), triple, 0);
        if found == 0 {
            let value = self.queue[self.commit] as u8;
            self.record_input(value);
            self.commit += 1;
        } else {
            for pos in self.commit..self.block_length {
                let value = self.queue[pos] as u8;
                self.record_input(value);
            }
            self.alt.length = 3;
            self.alt.distance = found as u16;
            // the three literals become the pair's tokens
            self.queue_pair(3, found as u16)?;
        }
        Ok(incoming)
    }

    /// An open back-reference sits at the commit index: try to grow it
    /// with the pending lookahead bytes, watching the speculative
    /// alternate one byte later.
    fn extend_match(&mut self, incoming: Flow) -> Result<Flow> {
        let mut result = incoming;
        let mut distance_back = self.alt.distance as usize;
        let mut consumed = 0usize;
        let mut point = 4 - self.short_pos;

        if self.alt.length == 3 && self.short_pos > 0 {
            // look for a better match starting one byte into this one
            let mut quartet = [0u8; 4];
            self.alt.swap_literal = NO_SWAP;
            self.alt.alt_length = 0;
            self.alt.alt_distance = 0;
            for back in 1..=3usize {
                quartet[3 - back] = self.history.get(back);
            }
            quartet[3] = self.shortbuf[point];
            let probe = [quartet[1], quartet[2], quartet[3]];
            let mut alt_found = self.hash.find(self.history.bytes(), probe, 0);
            if alt_found > 0 && alt_found <= 2 {
                alt_found = self.hash.find(self.history.bytes(), probe, alt_found);
            }
            if alt_found > 2 {
                self.alt.swap_literal = quartet[0] as u16;
                self.alt.alt_length = 3;
                self.alt.alt_distance = (alt_found - 2) as u16;
            }
            if self.alt.has_swap() {
                let present = quartet[3];
                if self.history.get(distance_back) == present {
                    self.alt.length += 1;
                    self.short_pos -= 1;
                    point += 1;
                    self.record_input(present);
                    consumed += 1;
                } else if self.queue.len() < self.commit + 5 {
                    // no room to restructure the queue; seal the block
                    self.commit = self.block_length;
                    self.alt = AltMatch::closed();
                    return Ok(Flow::Overflow);
                } else {
                    // the alternate continues and the open match does
                    // not: displace one literal and adopt the alternate
                    self.alt.length = self.alt.alt_length;
                    self.alt.distance = self.alt.alt_distance;
                    self.queue[self.commit] = self.alt.swap_literal;
                    self.commit += 1;
                    self.alt.swap_literal = NO_SWAP;
                    distance_back = self.alt.distance as usize;
                    self.queue_pair(self.alt.length, self.alt.distance)?;
                    self.short_pos -= 1;
                    point += 1;
                    self.record_input(present);
                    consumed += 1;
                }
            }
        }

        while consumed < self.short_pos && self.alt.length < 256 {
            let present = self.shortbuf[point];
            let historic = self.history.get(distance_back);
            let posthistoric = if self.alt.has_swap() {
                Some(self.history.get(self.alt.alt_distance as usize))
            } else {
                None
            };
            if historic == present {
                self.alt.length += 1;
                self.record_skippable(present);
                if self.level <= BlockLevel::Medium && self.alt.length > self.match_truncate {
                    self.alt.swap_literal = NO_SWAP;
                }
                if posthistoric == Some(present) {
                    self.alt.alt_length += 1;
                } else {
                    self.alt.swap_literal = NO_SWAP;
                }
            } else if posthistoric == Some(present) {
                if self.queue.len() < self.commit + 5 {
                    break;
                }
                self.alt.length = self.alt.alt_length + 1;
                self.alt.distance = self.alt.alt_distance;
                self.queue[self.commit] = self.alt.swap_literal;
                self.alt.swap_literal = NO_SWAP;
                self.commit += 1;
                self.record_skippable(present);
                distance_back = self.alt.distance as usize;
            } else {
                break;
            }
            point += 1;
            consumed += 1;
        }

        if consumed > 0 {
            self.queue_pair(self.alt.length, distance_back as u16)?;
        }
        if consumed < self.short_pos {
            // a byte refused to extend the match: seal it and queue the
            // stragglers as plain literals
            let rest = self.short_pos - consumed;
            if self.queue_check(rest) == Flow::Taken {
                self.commit = self.block_length;
                self.alt = AltMatch::closed();
                while consumed < self.short_pos {
                    self.queue_value(self.shortbuf[point] as u16);
                    point += 1;
                    consumed += 1;
                }
                self.short_pos = 0;
            } else {
                result = Flow::Overflow;
            }
        } else {
            self.short_pos = 0;
        }
        Ok(result)
    }

    // ---- dynamic block construction ---------------------------------------

    /// Histogram the queued tokens and build 15-bit-limited canonical
    /// tables for them.
    fn compose_tables(&mut self) -> Result<()> {
        #[derive(PartialEq)]
        enum Expect {
            Symbol,
            LengthExtra,
            DistanceCode,
            DistanceExtra,
        }
        let mut length_hist = [0u32; 288];
        let mut distance_hist = [0u32; 32];
        length_hist[256] = 1;
        self.length_table.resize(288)?;
        self.distance_table.resize(32)?;
        for i in 0..288 {
            self.length_table.set(i, Code::literal(i as u16));
        }
        for i in 0..32 {
            self.distance_table.set(i, Code::literal(i as u16));
        }
        let mut expect = Expect::Symbol;
        for pos in 0..self.block_length {
            let value = self.queue[pos];
            if value & STALE != 0 {
                return Err(FlateError::bad_state("stale token in block queue"));
            }
            match expect {
                Expect::Symbol => {
                    if value > 256 {
                        let row = tables::length_decode(value).ok_or_else(|| {
                            FlateError::bad_state("malformed length token in block queue")
                        })?;
                        length_hist[value as usize] += 1;
                        expect = if row.extra_bits > 0 {
                            Expect::LengthExtra
                        } else {
                            Expect::DistanceCode
                        };
                    } else {
                        length_hist[value as usize] += 1;
                    }
                }
                Expect::LengthExtra => expect = Expect::DistanceCode,
                Expect::DistanceCode => {
                    let row = tables::distance_decode(value).ok_or_else(|| {
                        FlateError::bad_state("malformed distance token in block queue")
                    })?;
                    distance_hist[value as usize] += 1;
                    expect = if row.extra_bits > 0 {
                        Expect::DistanceExtra
                    } else {
                        Expect::Symbol
                    };
                }
                Expect::DistanceExtra => expect = Expect::Symbol,
            }
        }
        if expect != Expect::Symbol {
            return Err(FlateError::bad_state("truncated token in block queue"));
        }
        self.length_table.assign_lengths(&length_hist);
        self.distance_table.assign_lengths(&distance_hist);
        self.length_table.assign_canonical()?;
        self.distance_table.assign_canonical()?;
        Ok(())
    }

    /// RLE-encode both tables' code lengths into the alphabet scratch and
    /// 7-bit-limit the code-length table over the result.
    fn fashion_alphabet(&mut self) {
        let mut literal_maximum = 257usize;
        for i in 257..286 {
            if self.length_table.get(i).length > 0 {
                literal_maximum = i + 1;
            }
        }
        let mut distance_maximum = 1usize;
        for i in 1..30 {
            if self.distance_table.get(i).length > 0 {
                distance_maximum = i + 1;
            }
        }
        self.alphabet[0] = (literal_maximum - 257) as u16;
        self.alphabet[1] = (distance_maximum - 1) as u16;

        let mut alpha_hist = [0u32; 19];
        let total = literal_maximum + distance_maximum;
        let mut write_pos = 3usize;
        let mut last_length: u16 = 23; // matches nothing
        let mut repeat: u16 = 0;
        for j in 0..=total {
            let length: u16 = if j < literal_maximum {
                self.length_table.get(j).length as u16
            } else if j < total {
                self.distance_table.get(j - literal_maximum).length as u16
            } else {
                ALPHABET_END
            };
            if last_length == length {
                repeat += 1;
                if length > 0 {
                    if repeat == 6 {
                        self.alphabet[write_pos] = 16 | ((repeat - 3) << 5);
                        alpha_hist[16] += 1;
                        write_pos += 1;
                        repeat = 0;
                    }
                } else if repeat == 138 {
                    self.alphabet[write_pos] = 18 | ((repeat - 11) << 5);
                    alpha_hist[18] += 1;
                    write_pos += 1;
                    repeat = 0;
                }
                continue;
            }
            if repeat >= 3 {
                if last_length > 0 {
                    self.alphabet[write_pos] = 16 | ((repeat - 3) << 5);
                    alpha_hist[16] += 1;
                } else if repeat >= 11 {
                    self.alphabet[write_pos] = 18 | ((repeat - 11) << 5);
                    alpha_hist[18] += 1;
                } else {
                    self.alphabet[write_pos] = 17 | ((repeat - 3) << 5);
                    alpha_hist[17] += 1;
                }
                write_pos += 1;
                repeat = 0;
            } else {
                while repeat > 0 {
                    self.alphabet[write_pos] = last_length;
                    alpha_hist[last_length as usize] += 1;
                    write_pos += 1;
                    repeat -= 1;
                }
            }
            self.alphabet[write_pos] = length;
            write_pos += 1;
            if length < 16 {
                alpha_hist[length as usize] += 1;
            }
            last_length = length;
        }

        // histogram in transmission order, then limit to 7 bits
        let mut swizzled = [0u32; 19];
        let mut alphabet_maximum = 4usize;
        for i in 0..19 {
            let symbol = self.code_table.get(i).value as usize;
            swizzled[i] = alpha_hist[symbol];
            if swizzled[i] > 0 && i >= 4 {
                alphabet_maximum = i + 1;
            }
        }
        self.code_table.limit_lengths(&swizzled, 7);
        self.alphabet[2] = (alphabet_maximum - 4) as u16;
    }

    // ---- block serialization ----------------------------------------------

    fn fashion_chunk(&mut self, sink: &mut dyn ByteSink) -> Result<Chunk> {
        match self.state {
            DeflateState::Gather => Err(FlateError::bad_state("serializer entered while gathering")),
            DeflateState::BlockHeader => {
                if self.bitlength == 0 {
                    self.block_final = self.last;
                    let type_bits: u32 = match self.block_type {
                        BlockType::Plain => 0,
                        BlockType::Fixed => 1,
                        BlockType::Dynamic => 2,
                    };
                    self.bitline = (type_bits << 1) | u32::from(self.block_final);
                    self.bitlength = 3;
                }
                while self.bitlength > 0 {
                    if !self.send_integer(sink) {
                        return Ok(Chunk::Blocked);
                    }
                }
                self.state = match self.block_type {
                    BlockType::Plain => DeflateState::RawLength,
                    BlockType::Fixed => DeflateState::FixedSetup,
                    BlockType::Dynamic => DeflateState::DynamicSetup,
                };
                Ok(Chunk::Again)
            }
            DeflateState::RawLength => {
                if !self.flush_bits(sink) {
                    return Ok(Chunk::Blocked);
                }
                if self.bitlength == 0 {
                    self.bitline = self.block_length as u32;
                    self.bitlength = 16;
                }
                while self.bitlength > 0 {
                    if !self.send_integer(sink) {
                        return Ok(Chunk::Blocked);
                    }
                }
                self.state = DeflateState::RawNlen;
                Ok(Chunk::Again)
            }
            DeflateState::RawNlen => {
                if self.bitlength == 0 {
                    self.bitline = (self.block_length as u32) ^ 0xFFFF;
                    self.bitlength = 16;
                }
                while self.bitlength > 0 {
                    if !self.send_integer(sink) {
                        return Ok(Chunk::Blocked);
                    }
                }
                self.state = DeflateState::RawBytes;
                self.emit_pos = 0;
                Ok(Chunk::Again)
            }
            DeflateState::RawBytes => {
                if !self.flush_bits(sink) {
                    return Ok(Chunk::Blocked);
                }
                if self.emit_pos < self.block_length {
                    let byte = self.queue[self.emit_pos] as u8;
                    if matches!(sink.put(byte), SinkStatus::Full) {
                        return Ok(Chunk::Blocked);
                    }
                    self.emit_pos += 1;
                }
                if self.emit_pos >= self.block_length {
                    self.state = if self.block_final {
                        DeflateState::Final
                    } else {
                        DeflateState::Gather
                    };
                    self.clear_block();
                }
                Ok(Chunk::Again)
            }
            DeflateState::Final => {
                if !self.flush_bits(sink) {
                    return Ok(Chunk::Blocked);
                }
                Ok(Chunk::Done)
            }
            DeflateState::FixedSetup => {
                self.length_table.fill_fixed_literals();
                self.distance_table.fill_fixed_distances();
                self.state = DeflateState::LitLen;
                self.bitlength = 0;
                self.emit_pos = 0;
                Ok(Chunk::Again)
            }
            DeflateState::LitLen => {
                let value = if self.emit_pos < self.block_length {
                    self.queue[self.emit_pos]
                } else {
                    256
                };
                if self.bitlength == 0 {
                    let code = self.length_table.get(value as usize);
                    self.bitline = code.bits;
                    self.bitlength = code.length as u32;
                }
                while self.bitlength > 0 {
                    if !self.send_code(sink) {
                        return Ok(Chunk::Blocked);
                    }
                }
                if value == 256 {
                    self.state = if self.block_final {
                        DeflateState::Final
                    } else {
                        DeflateState::Gather
                    };
                    self.clear_block();
                } else if value > 256 {
                    let row = tables::length_decode(value).ok_or_else(|| {
                        FlateError::bad_state("malformed length token in block queue")
                    })?;
                    self.emit_pos += 1;
                    if row.extra_bits > 0 {
                        if self.emit_pos >= self.block_length {
                            return Err(FlateError::bad_state("truncated token in block queue"));
                        }
                        self.bitline = self.queue[self.emit_pos] as u32;
                        self.bitlength = row.extra_bits as u32;
                        self.state = DeflateState::LenExtra;
                    } else {
                        self.state = DeflateState::Distance;
                    }
                } else {
                    self.emit_pos += 1;
                }
                Ok(Chunk::Again)
            }
            DeflateState::LenExtra => {
                while self.bitlength > 0 {
                    if !self.send_integer(sink) {
                        return Ok(Chunk::Blocked);
                    }
                }
                self.state = DeflateState::Distance;
                self.emit_pos += 1;
                Ok(Chunk::Again)
            }
            DeflateState::Distance => {
                if self.emit_pos >= self.block_length {
                    return Err(FlateError::bad_state("truncated token in block queue"));
                }
                let value = self.queue[self.emit_pos];
                if self.bitlength == 0 {
                    let code = self.distance_table.get(value as usize);
                    self.bitline = code.bits;
                    self.bitlength = code.length as u32;
                }
                while self.bitlength > 0 {
                    if !self.send_code(sink) {
                        return Ok(Chunk::Blocked);
                    }
                }
                let row = tables::distance_decode(value).ok_or_else(|| {
                    FlateError::bad_state("malformed distance token in block queue")
                })?;
                self.emit_pos += 1;
                if row.extra_bits > 0 {
                    if self.emit_pos >= self.block_length {
                        return Err(FlateError::bad_state("truncated token in block queue"));
                    }
                    self.bitline = self.queue[self.emit_pos] as u32;
                    self.bitlength = row.extra_bits as u32;
                    self.state = DeflateState::DistExtra;
                } else {
                    self.state = DeflateState::LitLen;
                }
                Ok(Chunk::Again)
            }
            DeflateState::DistExtra => {
                while self.bitlength > 0 {
                    if !self.send_integer(sink) {
                        return Ok(Chunk::Blocked);
                    }
                }
                self.state = DeflateState::LitLen;
                self.emit_pos += 1;
                Ok(Chunk::Again)
            }
            DeflateState::DynamicSetup => {
                self.code_table.fill_code_length_symbols(19);
                self.compose_tables()?;
                self.fashion_alphabet();
                self.state = DeflateState::AlphabetHeader;
                self.bitlength = 0;
                self.emit_pos = 0;
                Ok(Chunk::Again)
            }
            DeflateState::AlphabetHeader => {
                if self.bitlength == 0 {
                    self.bitline = self.alphabet[self.emit_pos] as u32;
                    self.bitlength = if self.emit_pos == 2 { 4 } else { 5 };
                }
                while self.bitlength > 0 {
                    if !self.send_integer(sink) {
                        return Ok(Chunk::Blocked);
                    }
                }
                self.emit_pos += 1;
                if self.emit_pos >= 3 {
                    self.state = DeflateState::AlphabetLengths;
                    self.emit_pos = 0;
                }
                Ok(Chunk::Again)
            }
            DeflateState::AlphabetLengths => {
                if self.bitlength == 0 {
                    self.bitline = self.code_table.get(self.emit_pos).length as u32;
                    self.bitlength = 3;
                }
                while self.bitlength > 0 {
                    if !self.send_integer(sink) {
                        return Ok(Chunk::Blocked);
                    }
                }
                self.emit_pos += 1;
                if self.emit_pos >= (self.alphabet[2] + 4) as usize {
                    self.code_table.sort_by_value();
                    self.code_table.assign_canonical()?;
                    self.state = DeflateState::Alphabet;
                    self.emit_pos = 3;
                }
                Ok(Chunk::Again)
            }
            DeflateState::Alphabet => {
                if self.emit_pos >= self.alphabet.len()
                    || self.alphabet[self.emit_pos] == ALPHABET_END
                {
                    self.state = DeflateState::LitLen;
                    self.emit_pos = 0;
                    return Ok(Chunk::Again);
                }
                let entry = self.alphabet[self.emit_pos];
                let core = entry & 31;
                if self.bitlength == 0 {
                    let code = self.code_table.get(core as usize);
                    self.bitline = code.bits;
                    self.bitlength = code.length as u32;
                }
                while self.bitlength > 0 {
                    if !self.send_code(sink) {
                        return Ok(Chunk::Blocked);
                    }
                }
                match core {
                    18 => {
                        self.bitline = (entry >> 5) as u32;
                        self.bitlength = 7;
                        self.state = DeflateState::AlphabetExtra;
                    }
                    17 => {
                        self.bitline = (entry >> 5) as u32;
                        self.bitlength = 3;
                        self.state = DeflateState::AlphabetExtra;
                    }
                    16 => {
                        self.bitline = (entry >> 5) as u32;
                        self.bitlength = 2;
                        self.state = DeflateState::AlphabetExtra;
                    }
                    _ => {
                        self.emit_pos += 1;
                    }
                }
                Ok(Chunk::Again)
            }
            DeflateState::AlphabetExtra => {
                while self.bitlength > 0 {
                    if !self.send_integer(sink) {
                        return Ok(Chunk::Blocked);
                    }
                }
                self.state = DeflateState::Alphabet;
                self.emit_pos += 1;
                Ok(Chunk::Again)
            }
        }
    }

    fn drive(&mut self, byte: Option<u8>, sink: &mut dyn ByteSink) -> Result<StepStatus> {
        let trouble_max = (self.queue.len() + 341) as u32;
        let mut trouble = 0u32;
        let mut churned = false;
        loop {
            trouble += 1;
            if trouble >= trouble_max {
                return Err(FlateError::LoopedState { steps: trouble });
            }
            if self.state == DeflateState::Gather {
                if churned {
                    return Ok(StepStatus::NeedsInput);
                }
                churned = true;
                match self.churn_input(byte)? {
                    Flow::Taken => return Ok(StepStatus::NeedsInput),
                    Flow::Overflow => self.state = DeflateState::BlockHeader,
                }
            }
            match self.fashion_chunk(sink)? {
                Chunk::Again => continue,
                Chunk::Blocked => return Ok(StepStatus::NeedsOutput),
                Chunk::Done => return Ok(StepStatus::Done),
            }
        }
    }
}

impl FlateEngine for Deflater {
    fn start(&mut self, params: StreamParams) -> Result<()> {
        params.validate()?;
        let window = params.window_size();
        self.level = BlockLevel::from_flevel(params.level);
        self.block_type = if self.level == BlockLevel::Off {
            BlockType::Plain
        } else {
            BlockType::Dynamic
        };
        self.history = HistoryRing::new(window);
        self.hash = MatchHash::prepare(window)?;
        self.queue = vec![0; window];
        self.alphabet = vec![0; ALPHABET_CAP];
        self.match_truncate = 16;
        self.state = DeflateState::Gather;
        self.last = false;
        self.block_final = false;
        self.bitpos = 0;
        self.partial = 0;
        self.bitline = 0;
        self.bitlength = 0;
        self.block_length = 0;
        self.commit = 0;
        self.emit_pos = 0;
        self.shortbuf = [0; 4];
        self.short_pos = 0;
        self.alt = AltMatch::closed();
        self.started = true;
        Ok(())
    }

    fn dict_byte(&mut self, byte: u8) -> Result<()> {
        if !self.started {
            return Err(FlateError::bad_state("dictionary byte before start"));
        }
        self.record_input(byte);
        Ok(())
    }

    fn step(&mut self, byte: Option<u8>, sink: &mut dyn ByteSink) -> Result<StepStatus> {
        if !self.started {
            return Err(FlateError::bad_state("step before start"));
        }
        if byte.is_some() && self.state != DeflateState::Gather {
            return Err(FlateError::bad_state("input offered while output is pending"));
        }
        self.drive(byte, sink)
    }

    fn finish(&mut self, sink: &mut dyn ByteSink) -> Result<StepStatus> {
        if !self.started {
            return Err(FlateError::bad_state("finish before start"));
        }
        self.last = true;
        let trouble_max = (self.queue.len() + 341) as u32;
        let mut trouble = 0u32;
        loop {
            trouble += 1;
            if trouble >= trouble_max {
                return Err(FlateError::LoopedState { steps: trouble });
            }
            if self.state == DeflateState::Gather {
                // queue whatever the lookahead still holds, then emit
                // the final block no matter how full the queue is
                self.churn_input(None)?;
                self.state = DeflateState::BlockHeader;
            }
            match self.fashion_chunk(sink)? {
                Chunk::Again => continue,
                Chunk::Blocked => return Ok(StepStatus::NeedsOutput),
                Chunk::Done => return Ok(StepStatus::Done),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(level: u8, window_bits: u8) -> Deflater {
        let mut engine = Deflater::new();
        engine
            .start(StreamParams {
                level,
                window_bits,
                ..Default::default()
            })
            .unwrap();
        engine
    }

    #[test]
    fn test_stored_block_exact_bytes() {
        let mut engine = started(0, 0);
        let mut out = Vec::new();
        for _ in 0..4 {
            assert_eq!(
                engine.step(Some(b'A'), &mut out).unwrap(),
                StepStatus::NeedsInput
            );
        }
        assert_eq!(engine.finish(&mut out).unwrap(), StepStatus::Done);
        assert_eq!(out, vec![0x01, 0x04, 0x00, 0xFB, 0xFF, b'A', b'A', b'A', b'A']);
    }

    #[test]
    fn test_empty_stored_stream() {
        let mut engine = started(0, 0);
        let mut out = Vec::new();
        assert_eq!(engine.finish(&mut out).unwrap(), StepStatus::Done);
        assert_eq!(out, vec![0x01, 0x00, 0x00, 0xFF, 0xFF]);
    }

    #[test]
    fn test_finish_is_idempotent() {
        let mut engine = started(0, 0);
        let mut out = Vec::new();
        engine.step(Some(7), &mut out).unwrap();
        assert_eq!(engine.finish(&mut out).unwrap(), StepStatus::Done);
        let produced = out.len();
        assert_eq!(engine.finish(&mut out).unwrap(), StepStatus::Done);
        assert_eq!(out.len(), produced);
    }

    #[test]
    fn test_protocol_guards() {
        let mut engine = Deflater::new();
        let mut out = Vec::new();
        assert!(matches!(
            engine.step(Some(0), &mut out),
            Err(FlateError::BadState { .. })
        ));
        assert!(matches!(engine.dict_byte(0), Err(FlateError::BadState { .. })));
        assert!(matches!(
            engine.finish(&mut out),
            Err(FlateError::BadState { .. })
        ));
        assert!(matches!(
            engine.start(StreamParams {
                method: 7,
                ..Default::default()
            }),
            Err(FlateError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_queue_check_reserves_slack() {
        let mut engine = started(0, 0);
        engine.block_length = engine.queue.len() - 4;
        assert_eq!(engine.queue_check(1), Flow::Overflow);
        engine.last = true;
        assert_eq!(engine.queue_check(4), Flow::Taken);
    }

    #[test]
    fn test_pair_skip_counts_extra_tokens() {
        let mut engine = started(2, 0);
        // length 11 (code 265, 1 extra) at distance 5 (code 4, 1 extra)
        engine.queue[0] = 265;
        engine.queue[1] = 0;
        engine.queue[2] = 4;
        engine.queue[3] = 0;
        engine.block_length = 4;
        engine.commit = 0;
        assert_eq!(engine.pair_skip(), 4);
        // length 3 at distance 1: no extras
        engine.queue[0] = 257;
        engine.queue[1] = 0;
        engine.block_length = 2;
        assert_eq!(engine.pair_skip(), 2);
        // end-of-block and literals
        engine.queue[0] = 256;
        assert_eq!(engine.pair_skip(), 1);
        engine.queue[0] = 65;
        assert_eq!(engine.pair_skip(), 0);
    }

    #[test]
    fn test_multiple_blocks_from_small_window() {
        // force several stored blocks through a 256-byte queue
        let mut engine = started(0, 0);
        let mut out = Vec::new();
        for i in 0..1000u32 {
            let mut status = engine.step(Some(i as u8), &mut out).unwrap();
            while status == StepStatus::NeedsOutput {
                status = engine.step(None, &mut out).unwrap();
            }
            assert_eq!(status, StepStatus::NeedsInput);
        }
        assert_eq!(engine.finish(&mut out).unwrap(), StepStatus::Done);
        // at least four stored blocks of ≤ 252 payload bytes each
        assert!(out.len() > 1000);
    }
}
