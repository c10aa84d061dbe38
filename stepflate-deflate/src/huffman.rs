//! Canonical Huffman code tables.
//!
//! A [`CodeTable`] holds `(length, bits, value)` triples and supports the
//! operations both engines need: canonical bit assignment from lengths,
//! length-limited length assignment from a histogram, sorting for either
//! lookup direction, and bit-string lookup while a code accumulates
//! MSB-first.
//!
//! Length limiting uses package-merge: starting from the deepest
//! permitted width, each pass packages pairs of the lightest items and
//! folds in a fresh rank of leaves; a symbol's length is the number of
//! lightest top-row items containing its leaf. When the instance is
//! degenerate (more live symbols than the limit can address) or the top
//! row comes up short, a three-band weighted-average heuristic takes
//! over; it is not optimal but always terminates within the limit and
//! never oversubscribes the code space.

use stepflate_core::error::{FlateError, Result};

use crate::tables::CODE_LENGTH_ORDER;

/// Largest table the codec ever asks for, with guard headroom.
const MAX_TABLE: usize = 1 << 15;

/// One canonical Huffman code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Code {
    /// Code length in bits, 0 (absent) ..= 15.
    pub length: u8,
    /// Bit string, MSB transmitted first.
    pub bits: u32,
    /// Symbol value.
    pub value: u16,
}

impl Code {
    /// A zero-length placeholder for the given symbol.
    pub fn literal(value: u16) -> Self {
        Self {
            length: 0,
            bits: 0,
            value,
        }
    }
}

/// Arena node in the package-merge rows: a single live symbol's leaf,
/// or a package of two items from the row below.
#[derive(Debug, Clone, Copy)]
struct PackNode {
    hist: u64,
    kids: Option<(u32, u32)>,
    symbol: u16,
}

/// A resizable table of canonical Huffman codes.
#[derive(Debug, Clone, Default)]
pub struct CodeTable {
    codes: Vec<Code>,
}

impl CodeTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of codes.
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Copy of the code at `index`.
    pub fn get(&self, index: usize) -> Code {
        self.codes[index]
    }

    /// Replace the code at `index`.
    pub fn set(&mut self, index: usize, code: Code) {
        self.codes[index] = code;
    }

    /// Grow or shrink to `size` codes, zero-filling new entries.
    pub fn resize(&mut self, size: usize) -> Result<()> {
        if size > MAX_TABLE {
            return Err(FlateError::out_of_memory(size));
        }
        self.codes.resize(size, Code::default());
        Ok(())
    }

    /// Fill with the 288-entry fixed literal/length table (RFC 1951 §3.2.6).
    pub fn fill_fixed_literals(&mut self) {
        self.codes.clear();
        for value in 0..288u16 {
            let (length, bits) = match value {
                0..=143 => (8, 0x30 + value as u32),
                144..=255 => (9, 0x190 + (value as u32 - 144)),
                256..=279 => (7, value as u32 - 256),
                _ => (8, 0xC0 + (value as u32 - 280)),
            };
            self.codes.push(Code {
                length,
                bits,
                value,
            });
        }
    }

    /// Fill with the 32-entry fixed distance table (five bits each).
    pub fn fill_fixed_distances(&mut self) {
        self.codes.clear();
        for value in 0..32u16 {
            self.codes.push(Code {
                length: 5,
                bits: value as u32,
                value,
            });
        }
    }

    /// Fill with `size` placeholder codes whose values follow the
    /// code-length alphabet transmission order.
    pub fn fill_code_length_symbols(&mut self, size: usize) {
        self.codes.clear();
        for &value in CODE_LENGTH_ORDER.iter().take(size) {
            self.codes.push(Code::literal(value));
        }
    }

    /// Sort by (length, bits) for bit-string lookup.
    pub fn sort_by_bits(&mut self) {
        self.codes.sort_by_key(|c| (c.length, c.bits));
    }

    /// Sort by symbol value for canonical assignment and index access.
    pub fn sort_by_value(&mut self) {
        self.codes.sort_by_key(|c| c.value);
    }

    /// Assign canonical bit strings from the stored lengths.
    ///
    /// Shorter codes sort numerically first; codes of equal length are
    /// numbered in table order, so the table must already be in symbol
    /// order for RFC 1951 canonical codes. Oversubscribed lengths are
    /// `CodeExcess`.
    pub fn assign_canonical(&mut self) -> Result<()> {
        let mut counts = [0u32; 16];
        for code in &self.codes {
            if code.length > 15 {
                return Err(FlateError::BadCodeLength {
                    length: code.length as u32,
                });
            }
            counts[code.length as usize] += 1;
        }
        // next available bit string per length; length 0 takes no space
        let mut bitstring = 0u32;
        let mut maxxer = 1u32;
        for slot in counts.iter_mut().skip(1) {
            let count = *slot;
            bitstring <<= 1;
            maxxer <<= 1;
            *slot = bitstring;
            if count > maxxer || bitstring > maxxer - count {
                return Err(FlateError::CodeExcess);
            }
            bitstring += count;
        }
        for code in &mut self.codes {
            let slot = &mut counts[code.length as usize];
            code.bits = *slot;
            *slot += 1;
        }
        Ok(())
    }

    /// Assign 15-bit-limited code lengths from a symbol histogram.
    pub fn assign_lengths(&mut self, hist: &[u32]) {
        self.limit_lengths(hist, 15);
    }

    /// Assign code lengths no longer than `max_len` from a histogram.
    ///
    /// Symbols with a zero count get length 0. Bit strings are not
    /// touched; call [`assign_canonical`](Self::assign_canonical) after.
    pub fn limit_lengths(&mut self, hist: &[u32], max_len: u32) {
        debug_assert_eq!(hist.len(), self.codes.len());
        if max_len == 0 || max_len > 15 {
            self.band_lengths(hist);
            return;
        }
        let mut count = 0usize;
        for (code, &h) in self.codes.iter_mut().zip(hist) {
            if h > 0 {
                count += 1;
            } else {
                code.length = 0;
            }
        }
        if count > (1usize << max_len) {
            self.band_lengths(hist);
            return;
        }
        if count <= 2 {
            for (code, &h) in self.codes.iter_mut().zip(hist) {
                code.length = if h > 0 { 1 } else { 0 };
            }
            return;
        }
        if !self.merge_lengths(hist, max_len, count) {
            self.band_lengths(hist);
        }
    }

    /// Package-merge proper. Returns false when the top row cannot
    /// cover the required width and the caller should fall back.
    fn merge_lengths(&mut self, hist: &[u32], max_len: u32, count: usize) -> bool {
        // live symbols, lightest first; leaves occupy arena[0..count]
        let mut arena: Vec<PackNode> = hist
            .iter()
            .enumerate()
            .filter(|&(_, &h)| h > 0)
            .map(|(i, &h)| PackNode {
                hist: h as u64,
                kids: None,
                symbol: i as u16,
            })
            .collect();
        arena.sort_by_key(|node| node.hist);
        let leaf_count = count as u32;

        // deepest row is just the leaves; each pass packages pairs and
        // merges in a fresh rank of leaves, ending at single-bit width
        let mut row: Vec<u32> = (0..leaf_count).collect();
        for _ in 1..max_len {
            let mut next = Vec::with_capacity(count + row.len() / 2);
            let mut leaf = 0u32;
            for pair in row.chunks_exact(2) {
                let hist = arena[pair[0] as usize]
                    .hist
                    .saturating_add(arena[pair[1] as usize].hist);
                while leaf < leaf_count && arena[leaf as usize].hist <= hist {
                    next.push(leaf);
                    leaf += 1;
                }
                arena.push(PackNode {
                    hist,
                    kids: Some((pair[0], pair[1])),
                    symbol: 0,
                });
                next.push((arena.len() - 1) as u32);
            }
            next.extend(leaf..leaf_count);
            row = next;
        }
        if row.len() < 2 * count - 2 {
            return false;
        }
        row.truncate(2 * count - 2);

        for node in arena.iter().take(count) {
            self.codes[node.symbol as usize].length = 0;
        }
        // every chosen item deepens each leaf it contains by one level
        let mut stack = row;
        while let Some(index) = stack.pop() {
            let node = arena[index as usize];
            match node.kids {
                Some((a, b)) => {
                    stack.push(a);
                    stack.push(b);
                }
                None => self.codes[node.symbol as usize].length += 1,
            }
        }
        true
    }

    /// Three-band fallback: cluster symbols around the weighted average
    /// count into three adjacent code lengths.
    fn band_lengths(&mut self, hist: &[u32]) {
        let mut count = 0u64;
        let mut max_level = 0u64;
        let mut min_level = u64::MAX;
        let mut average = 0u64;
        for &h in hist {
            if h > 0 {
                count += 1;
                average += h as u64;
                max_level = max_level.max(h as u64);
                min_level = min_level.min(h as u64);
            }
        }
        if count == 0 {
            for code in &mut self.codes {
                code.length = 0;
            }
            return;
        }
        average /= count;
        let limits = [
            average - ((average - min_level.min(average)) >> 1),
            average + ((max_level.max(average) - average) >> 1),
            max_level,
        ];
        let mut min_code: u8 = 1;
        let mut band_counts: [i64; 3] = match count {
            1 => [1, 0, 0],
            2 => [2, 0, 0],
            3 => [1, 2, 0],
            _ => {
                let mut bands: [i64; 3] = [1, 1, 2];
                for _ in 4..count {
                    if bands[0] == 0 {
                        bands = [bands[1], bands[2], 0];
                        min_code += 1;
                    }
                    if bands[1] > bands[2] / 2 {
                        bands[1] -= 1;
                        bands[2] += 2;
                    } else if bands[0] > 0 {
                        bands[0] -= 1;
                        bands[1] += 2;
                    }
                }
                bands
            }
        };
        for (code, &h) in self.codes.iter_mut().zip(hist) {
            if h == 0 {
                code.length = 0;
                continue;
            }
            let mut assigned = None;
            for (band, &limit) in limits.iter().enumerate() {
                if (h as u64) <= limit && band_counts[band] > 0 {
                    assigned = Some(band);
                    break;
                }
            }
            if assigned.is_none() {
                assigned = band_counts.iter().position(|&c| c > 0);
            }
            if let Some(band) = assigned {
                band_counts[band] -= 1;
                code.length = min_code + band as u8;
            } else {
                code.length = min_code + 2;
            }
        }
    }

    /// Binary search over a (length, bits)-sorted table.
    ///
    /// `Ok(None)` means "no code with exactly this prefix yet"; keep
    /// accumulating bits. Accumulations past 15 bits are an error.
    pub fn lookup_by_bits(&self, length: u32, bits: u32) -> Result<Option<u16>> {
        if length == 0 || length > 15 {
            return Err(FlateError::BadBitLength { length });
        }
        let mut start = 0usize;
        let mut stop = self.codes.len();
        while start < stop {
            let mid = start + ((stop - start) >> 1);
            let code = self.codes[mid];
            let probe = (code.length as u32, code.bits);
            if probe == (length, bits) {
                return Ok(Some(code.value));
            }
            if probe > (length, bits) {
                stop = mid;
            } else {
                start = mid + 1;
            }
        }
        Ok(None)
    }

    /// Linear variant of [`lookup_by_bits`](Self::lookup_by_bits); works
    /// on tables in any order.
    pub fn scan_by_bits(&self, length: u32, bits: u32) -> Result<Option<u16>> {
        if length == 0 || length > 15 {
            return Err(FlateError::BadBitLength { length });
        }
        for code in &self.codes {
            if code.length as u32 == length && code.bits == bits {
                return Ok(Some(code.value));
            }
        }
        Ok(None)
    }
}
