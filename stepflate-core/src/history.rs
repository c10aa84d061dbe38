//! Sliding history window for LZ77 back-references.
//!
//! A fixed-capacity ring of the most recent output bytes. Distances count
//! backwards from the write cursor; a distance that reaches past everything
//! the ring can address reads as 0 rather than erroring, which keeps the
//! engines panic-free on corrupt streams.

/// Ring buffer over the last `capacity` stream bytes.
#[derive(Debug, Clone, Default)]
pub struct HistoryRing {
    bytes: Vec<u8>,
    pos: usize,
}

impl HistoryRing {
    /// Create a ring of the given capacity, zero-filled.
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0; capacity],
            pos: 0,
        }
    }

    /// Ring capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Current write cursor.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Raw view of the ring storage, indexed by absolute slot.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Append one byte, overwriting the oldest slot once full.
    pub fn record(&mut self, byte: u8) {
        if self.bytes.is_empty() {
            return;
        }
        self.bytes[self.pos] = byte;
        self.pos += 1;
        if self.pos >= self.bytes.len() {
            self.pos = 0;
        }
    }

    /// Read the byte `distance` positions behind the cursor.
    ///
    /// Distances beyond what the ring can address return 0.
    pub fn get(&self, distance: usize) -> u8 {
        let size = self.bytes.len();
        let slot = if distance > self.pos {
            (size + self.pos).wrapping_sub(distance)
        } else {
            self.pos - distance
        };
        if slot >= size { 0 } else { self.bytes[slot] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_get() {
        let mut ring = HistoryRing::new(256);
        for &b in b"abcde" {
            ring.record(b);
        }
        assert_eq!(ring.get(1), b'e');
        assert_eq!(ring.get(5), b'a');
        assert_eq!(ring.position(), 5);
    }

    #[test]
    fn test_wraparound() {
        let mut ring = HistoryRing::new(256);
        for i in 0..300u32 {
            ring.record(i as u8);
        }
        // 299 was recorded last
        assert_eq!(ring.get(1), 299u32 as u8);
        assert_eq!(ring.get(256), (300 - 256) as u8);
        assert_eq!(ring.position(), 300 - 256);
    }

    #[test]
    fn test_out_of_range_reads_zero() {
        let mut ring = HistoryRing::new(256);
        ring.record(7);
        assert_eq!(ring.get(300), 0);
    }

    #[test]
    fn test_empty_ring_is_inert() {
        let mut ring = HistoryRing::default();
        ring.record(1);
        assert_eq!(ring.get(1), 0);
        assert_eq!(ring.capacity(), 0);
    }
}
