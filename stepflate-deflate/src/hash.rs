//! Chained three-byte match hash over the history ring.
//!
//! `first[key]` holds the most recent ring position whose three bytes
//! hash to `key`; `next[pos]` chains to the previous position with the
//! same key. Positions are ring slots, so entries eventually get lapped
//! by the write cursor; a lookup prunes an entry the moment it finds the
//! chain crossing the write boundary, or the moment the stored bytes no
//! longer hash to the chain's key (the slot was overwritten).
//!
//! The hash write cursor trails the ring cursor by two: a position is
//! only keyed once all three of its bytes have been seen.

use stepflate_core::error::{FlateError, Result};

/// Chain terminator / pruned-entry marker.
const UNSET: u16 = u16::MAX;

/// Where the previous chain link lives, for in-place pruning.
enum Link {
    First(usize),
    Next(usize),
}

/// Hash chains locating earlier occurrences of byte triples.
#[derive(Debug, Clone, Default)]
pub struct MatchHash {
    first: Vec<u16>,
    next: Vec<u16>,
    key_mask: u8,
    pending: [u8; 2],
    fill: u8,
    pos: u16,
}

fn triple_key(a: u8, b: u8, c: u8, mask: u8) -> usize {
    ((a ^ b ^ c) & mask) as usize
}

impl MatchHash {
    /// Allocate chains for a window of `size` bytes (power of two,
    /// 256..=32768). The first-table gets `size >> 7` slots, minimum 2.
    pub fn prepare(size: usize) -> Result<Self> {
        if size > 32768 {
            return Err(FlateError::out_of_memory(size));
        }
        if size < 256 || !size.is_power_of_two() {
            return Err(FlateError::bad_param(format!("hash window size {size}")));
        }
        let first_size = (((size >> 7) - 1) as u32).next_power_of_two() as usize;
        Ok(Self {
            first: vec![UNSET; first_size.max(2)],
            next: vec![UNSET; size],
            key_mask: (first_size.max(2) - 1) as u8,
            pending: [0; 2],
            fill: 0,
            pos: 0,
        })
    }

    fn read_link(&self, link: &Link) -> u16 {
        match *link {
            Link::First(key) => self.first[key],
            Link::Next(index) => self.next[index],
        }
    }

    fn write_link(&mut self, link: &Link, value: u16) {
        match *link {
            Link::First(key) => self.first[key] = value,
            Link::Next(index) => self.next[index] = value,
        }
    }

    fn shift_pending(&mut self, byte: u8) {
        self.pending[0] = self.pending[1];
        self.pending[1] = byte;
    }

    /// Key the position completed by `byte` and link it into its chain.
    pub fn insert(&mut self, byte: u8) {
        if self.next.is_empty() {
            return;
        }
        if self.fill < 2 {
            // warm-up: no complete triple yet
            self.pending[self.fill as usize] = byte;
            self.fill += 1;
            return;
        }
        let key = triple_key(self.pending[0], self.pending[1], byte, self.key_mask);
        self.next[self.pos as usize] = self.first[key];
        self.first[key] = self.pos;
        self.pos = ((self.pos as usize + 1) % self.next.len()) as u16;
        self.shift_pending(byte);
    }

    /// Advance past the position completed by `byte` without linking it.
    /// Cheaper than [`insert`](Self::insert); used inside matches at low
    /// effort levels.
    pub fn skip(&mut self, byte: u8) {
        if self.next.is_empty() {
            return;
        }
        if self.fill < 2 {
            self.pending[self.fill as usize] = byte;
            self.fill += 1;
            return;
        }
        self.pos = ((self.pos as usize + 1) % self.next.len()) as u16;
        self.shift_pending(byte);
    }

    /// Look for an earlier occurrence of `triple` in `history` (the ring
    /// storage, indexed by slot). Returns the back-distance, or 0 when no
    /// live occurrence exists. `resume` re-enters a chain behind an
    /// earlier result to find the next older occurrence.
    ///
    /// Dead entries encountered on the walk are pruned in place.
    pub fn find(&mut self, history: &[u8], triple: [u8; 3], resume: u32) -> u32 {
        if self.next.is_empty() {
            return 0;
        }
        let size = self.next.len() as u32;
        let adjusted_pos = self.pos as u32 + 2;
        let key = triple_key(triple[0], triple[1], triple[2], self.key_mask);
        let mut tracking;
        let mut prev = if resume == 0 {
            tracking = adjusted_pos;
            Link::First(key)
        } else {
            let mut back = resume;
            if back > adjusted_pos {
                back = back.wrapping_sub(size);
            }
            back = adjusted_pos.wrapping_sub(back);
            tracking = back;
            Link::Next((back % size) as usize)
        };
        let mut distance = 0u32;
        for _ in 0..self.next.len() {
            let current = self.read_link(&prev);
            if current == UNSET {
                break;
            }
            let current = current as u32;
            if current <= adjusted_pos && (tracking > adjusted_pos || tracking <= current) {
                // chain crossed the write boundary
                self.write_link(&prev, UNSET);
                break;
            }
            tracking = current;
            let slot = current as usize;
            let here = [
                history[slot],
                history[(slot + 1) % history.len()],
                history[(slot + 2) % history.len()],
            ];
            if here == triple {
                distance = adjusted_pos.wrapping_sub(current);
                // a full-window distance is still valid; only fold
                // wrapped subtractions back into range
                if distance > size {
                    distance = distance.wrapping_add(size);
                }
                break;
            }
            if triple_key(here[0], here[1], here[2], self.key_mask) != key {
                // slot overwritten since it was keyed
                self.write_link(&prev, UNSET);
                break;
            }
            prev = Link::Next(slot);
        }
        if distance > size { 0 } else { distance }
    }
}
