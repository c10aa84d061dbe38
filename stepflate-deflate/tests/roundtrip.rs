//! Compress-then-decompress tests across inputs, levels, and windows.

use stepflate_deflate::{
    BlockType, ByteSink, Deflater, FlateEngine, Inflater, SinkStatus, StepStatus, StreamParams,
    compress, decompress,
};

fn roundtrip(input: &[u8], level: u8, window_bits: u8) {
    let packed = compress(input, level, window_bits).unwrap();
    let unpacked = decompress(&packed).unwrap();
    assert_eq!(unpacked, input, "level {level} window_bits {window_bits}");
}

#[test]
fn test_empty_input() {
    roundtrip(b"", 2, 7);
}

#[test]
fn test_single_byte() {
    roundtrip(b"A", 2, 7);
}

#[test]
fn test_all_zeros() {
    let input = vec![0u8; 1000];
    let packed = compress(&input, 2, 7).unwrap();
    assert_eq!(decompress(&packed).unwrap(), input);
    // long zero runs should shrink dramatically
    assert!(packed.len() < input.len() / 10);
}

#[test]
fn test_all_same_byte() {
    let input = vec![255u8; 5000];
    let packed = compress(&input, 3, 7).unwrap();
    assert_eq!(decompress(&packed).unwrap(), input);
    assert!(packed.len() < input.len() / 20);
}

#[test]
fn test_max_match_length() {
    let pattern = vec![42u8; 258];
    let mut input = Vec::new();
    for _ in 0..10 {
        input.extend_from_slice(&pattern);
    }
    roundtrip(&input, 3, 7);
}

#[test]
fn test_alternating_pattern() {
    let mut input = Vec::with_capacity(2000);
    for i in 0..2000 {
        input.push(if i % 2 == 0 { 0xAA } else { 0x55 });
    }
    roundtrip(&input, 2, 7);
}

#[test]
fn test_text_input() {
    let input = "the quick brown fox jumps over the lazy dog. "
        .repeat(40)
        .into_bytes();
    let packed = compress(&input, 2, 7).unwrap();
    assert_eq!(decompress(&packed).unwrap(), input);
    assert!(packed.len() < input.len());
}

#[test]
fn test_incompressible_input() {
    // simple LCG noise, no useful repeats
    let mut state = 0x2545F491u32;
    let input: Vec<u8> = (0..4096)
        .map(|_| {
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            (state >> 16) as u8
        })
        .collect();
    roundtrip(&input, 2, 7);
}

#[test]
fn test_level_sweep() {
    let input = "abracadabra alakazam ".repeat(64).into_bytes();
    for level in 0..=3 {
        roundtrip(&input, level, 7);
    }
}

#[test]
fn test_window_sizes() {
    let input = "round and round the ragged rock ".repeat(100).into_bytes();
    for window_bits in [0, 3, 7] {
        roundtrip(&input, 2, window_bits);
    }
}

#[test]
fn test_input_larger_than_window() {
    // forces multiple blocks through the smallest window
    let mut input = Vec::new();
    for i in 0..5000u32 {
        input.push((i % 251) as u8);
    }
    roundtrip(&input, 2, 0);
    roundtrip(&input, 0, 0);
}

#[test]
fn test_fixed_block_roundtrip() {
    let input = b"fixed-table block, small payload";
    let mut engine = Deflater::new();
    engine.start(StreamParams::default()).unwrap();
    engine.set_block_type(BlockType::Fixed);
    let mut packed = Vec::new();
    for &b in input.iter() {
        engine.step(Some(b), &mut packed).unwrap();
    }
    while engine.finish(&mut packed).unwrap() != StepStatus::Done {}
    assert_eq!(decompress(&packed).unwrap(), input);
}

#[test]
fn test_preset_dictionary() {
    let dict = b"a dictionary of common phrases";
    let input = b"a dictionary of common phrases, reused";
    let params = StreamParams {
        preset_dict: true,
        ..StreamParams::default()
    };

    let mut packer = Deflater::new();
    packer.start(params).unwrap();
    for &b in dict.iter() {
        packer.dict_byte(b).unwrap();
    }
    let mut packed = Vec::new();
    for &b in input.iter() {
        packer.step(Some(b), &mut packed).unwrap();
    }
    while packer.finish(&mut packed).unwrap() != StepStatus::Done {}

    let mut unpacker = Inflater::new();
    unpacker.start(params).unwrap();
    for &b in dict.iter() {
        unpacker.dict_byte(b).unwrap();
    }
    let mut unpacked = Vec::new();
    for &b in packed.iter() {
        if unpacker.step(Some(b), &mut unpacked).unwrap() == StepStatus::Done {
            break;
        }
    }
    unpacker.finish(&mut unpacked).unwrap();
    assert_eq!(unpacked, input);
}

struct TrickleSink {
    buf: Vec<u8>,
    room: usize,
}

impl ByteSink for TrickleSink {
    fn put(&mut self, byte: u8) -> SinkStatus {
        if self.room == 0 {
            return SinkStatus::Full;
        }
        self.room -= 1;
        self.buf.push(byte);
        SinkStatus::Accepted
    }
}

#[test]
fn test_decompress_through_one_byte_sink() {
    let input = "trickle trickle little star ".repeat(30).into_bytes();
    let packed = compress(&input, 2, 7).unwrap();

    let mut engine = Inflater::new();
    engine.start(StreamParams::default()).unwrap();
    let mut sink = TrickleSink {
        buf: Vec::new(),
        room: 1,
    };
    'outer: for &b in packed.iter() {
        let mut status = engine.step(Some(b), &mut sink).unwrap();
        loop {
            match status {
                StepStatus::Done => break 'outer,
                StepStatus::NeedsInput => break,
                StepStatus::NeedsOutput => {
                    sink.room = 1;
                    status = engine.step(None, &mut sink).unwrap();
                }
            }
        }
    }
    engine.finish(&mut sink).unwrap();
    assert_eq!(sink.buf, input);
}

#[test]
fn test_compress_through_one_byte_sink() {
    let input = "drip by drip the stream fills ".repeat(30).into_bytes();
    let reference = compress(&input, 2, 7).unwrap();

    let mut engine = Deflater::new();
    engine.start(StreamParams::default()).unwrap();
    let mut sink = TrickleSink {
        buf: Vec::new(),
        room: 1,
    };
    for &b in input.iter() {
        let mut status = engine.step(Some(b), &mut sink).unwrap();
        while status == StepStatus::NeedsOutput {
            sink.room = 1;
            status = engine.step(None, &mut sink).unwrap();
        }
    }
    loop {
        match engine.finish(&mut sink).unwrap() {
            StepStatus::Done => break,
            _ => sink.room = 1,
        }
    }
    assert_eq!(sink.buf, reference);
}
