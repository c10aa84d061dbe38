//! RFC 1951 constant tables.
//!
//! Length codes 257..=285 and distance codes 0..=29 each map to a base
//! value plus a count of extra bits holding the offset from that base.
//! Encoding walks the table by base (binary search for the greatest base
//! not exceeding the value); decoding indexes it by code.

/// One row of a length or distance code table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairBase {
    /// Symbol code as transmitted.
    pub code: u16,
    /// Smallest value the code covers.
    pub base: u16,
    /// Extra bits carrying `value - base`, sent LSB-first.
    pub extra_bits: u8,
}

const fn pb(code: u16, base: u16, extra_bits: u8) -> PairBase {
    PairBase {
        code,
        base,
        extra_bits,
    }
}

/// Match length codes 257..=285 (lengths 3..=258).
pub const LENGTH_CODES: [PairBase; 29] = [
    pb(257, 3, 0),
    pb(258, 4, 0),
    pb(259, 5, 0),
    pb(260, 6, 0),
    pb(261, 7, 0),
    pb(262, 8, 0),
    pb(263, 9, 0),
    pb(264, 10, 0),
    pb(265, 11, 1),
    pb(266, 13, 1),
    pb(267, 15, 1),
    pb(268, 17, 1),
    pb(269, 19, 2),
    pb(270, 23, 2),
    pb(271, 27, 2),
    pb(272, 31, 2),
    pb(273, 35, 3),
    pb(274, 43, 3),
    pb(275, 51, 3),
    pb(276, 59, 3),
    pb(277, 67, 4),
    pb(278, 83, 4),
    pb(279, 99, 4),
    pb(280, 115, 4),
    pb(281, 131, 5),
    pb(282, 163, 5),
    pb(283, 195, 5),
    pb(284, 227, 5),
    pb(285, 258, 0),
];

/// Distance codes 0..=29 (distances 1..=32768).
pub const DISTANCE_CODES: [PairBase; 30] = [
    pb(0, 1, 0),
    pb(1, 2, 0),
    pb(2, 3, 0),
    pb(3, 4, 0),
    pb(4, 5, 1),
    pb(5, 7, 1),
    pb(6, 9, 2),
    pb(7, 13, 2),
    pb(8, 17, 3),
    pb(9, 25, 3),
    pb(10, 33, 4),
    pb(11, 49, 4),
    pb(12, 65, 5),
    pb(13, 97, 5),
    pb(14, 129, 6),
    pb(15, 193, 6),
    pb(16, 257, 7),
    pb(17, 385, 7),
    pb(18, 513, 8),
    pb(19, 769, 8),
    pb(20, 1025, 9),
    pb(21, 1537, 9),
    pb(22, 2049, 10),
    pb(23, 3073, 10),
    pb(24, 4097, 11),
    pb(25, 6145, 11),
    pb(26, 8193, 12),
    pb(27, 12289, 12),
    pb(28, 16385, 13),
    pb(29, 24577, 13),
];

/// Transmission order of the code-length alphabet (RFC 1951 §3.2.7).
pub const CODE_LENGTH_ORDER: [u16; 19] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

fn encode(table: &'static [PairBase], value: u16) -> &'static PairBase {
    // greatest base not exceeding the value
    let idx = table.partition_point(|e| e.base <= value) - 1;
    &table[idx]
}

/// Length value (3..=258) to its code row.
pub fn length_encode(length: u16) -> Option<&'static PairBase> {
    if !(3..=258).contains(&length) {
        return None;
    }
    Some(encode(&LENGTH_CODES, length))
}

/// Length code (257..=285) to its row.
pub fn length_decode(code: u16) -> Option<&'static PairBase> {
    if !(257..=285).contains(&code) {
        return None;
    }
    Some(&LENGTH_CODES[(code - 257) as usize])
}

/// Distance value (1..=32768) to its code row.
pub fn distance_encode(distance: u16) -> Option<&'static PairBase> {
    if !(1..=32768).contains(&distance) {
        return None;
    }
    Some(encode(&DISTANCE_CODES, distance))
}

/// Distance code (0..=29) to its row.
pub fn distance_decode(code: u16) -> Option<&'static PairBase> {
    DISTANCE_CODES.get(code as usize)
}
