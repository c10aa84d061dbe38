//! Wire-level tests pinning the stream layout against hand-assembled
//! RFC 1951 byte vectors.

use stepflate_deflate::{
    FlateEngine, FlateError, Inflater, StepStatus, StreamParams, compress, decompress,
};

#[test]
fn test_stored_block_layout() {
    // BFINAL=1 type=00, pad to byte, LEN=4 NLEN=!4, then the payload
    let packed = compress(b"AAAA", 0, 7).unwrap();
    assert_eq!(packed, [0x01, 0x04, 0x00, 0xFB, 0xFF, 0x41, 0x41, 0x41, 0x41]);
}

#[test]
fn test_empty_stored_stream_layout() {
    let packed = compress(b"", 0, 7).unwrap();
    assert_eq!(packed, [0x01, 0x00, 0x00, 0xFF, 0xFF]);
}

#[test]
fn test_fixed_block_single_literal_decode() {
    // header 1,01 then the 8-bit code for 'A' and the 7-bit end code
    let mut engine = Inflater::new();
    engine.start(StreamParams::default()).unwrap();
    let mut out = Vec::new();
    assert_eq!(
        engine.step(Some(0x73), &mut out).unwrap(),
        StepStatus::NeedsInput
    );
    assert_eq!(
        engine.step(Some(0x04), &mut out).unwrap(),
        StepStatus::NeedsInput
    );
    assert_eq!(engine.step(Some(0x00), &mut out).unwrap(), StepStatus::Done);
    assert_eq!(out, b"A");
}

#[test]
fn test_reserved_block_type_rejected() {
    assert!(matches!(
        decompress(&[0x07]),
        Err(FlateError::BadBlockType)
    ));
}

#[test]
fn test_corrupt_stored_length_rejected() {
    assert!(matches!(
        decompress(&[0x01, 0x04, 0x00, 0xFB, 0xFE]),
        Err(FlateError::CorruptLength)
    ));
}

#[test]
fn test_truncated_stream_rejected() {
    // stream ends inside a non-final stored block's payload
    assert!(matches!(
        decompress(&[0x00, 0x04, 0x00, 0xFB, 0xFF, 0x41]),
        Err(FlateError::UnexpectedEof)
    ));
}

#[test]
fn test_trailing_bytes_ignored() {
    let mut packed = compress(b"tail", 0, 7).unwrap();
    packed.extend_from_slice(&[0xDE, 0xAD]);
    assert_eq!(decompress(&packed).unwrap(), b"tail");
}

#[test]
fn test_back_reference_decode() {
    // stored "abc" (non-final) then a fixed block repeating it via a
    // length-3 distance-3 pair: header 1,01; code 257 = 0000001;
    // distance code 2 = 00010; end code 0000000
    let mut stream = vec![0x00, 0x03, 0x00, 0xFC, 0xFF, b'a', b'b', b'c'];
    // packed LSB-first: 1, 1,0, 0000001, 00010, 0000000
    stream.extend_from_slice(&[0x03, 0x22, 0x00]);
    assert_eq!(decompress(&stream).unwrap(), b"abcabc");
}
