//! Stream-level tests: reference vectors, streaming I/O and corruption.

use oxibz_bzip2::{
    BzDecoder, BzEncoder, CompressionLevel, DecoderOptions, EncoderOptions, compress, decompress,
};
use oxibz_core::{Bzip2Crc, BzError, combine_stream_crc};
use std::io::{Read, Write};

fn hex(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
        .collect()
}

/// Produced by the reference `bzip2 -1`.
const HELLO_STREAM: &str = "425a683131415926535947b4bd870000135180001040040644908020003100301151a36914d0c42310b1b71c43a21e636fc5dc914e142411ed2f61c0";

#[test]
fn test_reference_vector() {
    let expected = b"hello, hello, hello world\n".repeat(3);
    let output = decompress(&hex(HELLO_STREAM)[..]).unwrap();
    assert_eq!(output, expected);
}

#[test]
fn test_reference_vector_crcs() {
    let stream = hex(HELLO_STREAM);
    let mut decoder = BzDecoder::new(&stream[..]).unwrap();
    let mut output = Vec::new();
    decoder.read_to_end(&mut output).unwrap();

    let block_crc = Bzip2Crc::compute(&output);
    assert_eq!(block_crc, 0x47B4_BD87);
    assert_eq!(decoder.block_crcs(), &[block_crc]);
    assert_eq!(decoder.block_size(), 100_000);
    // Everything but the final byte's padding is consumed
    let bits = decoder.compressed_bits();
    assert!(bits > (stream.len() as u64 - 1) * 8 && bits <= stream.len() as u64 * 8);
}

#[test]
fn test_streaming_matches_one_shot() {
    let input = b"streaming input, written in uneven pieces ".repeat(300);
    let one_shot = compress(&input, CompressionLevel::new(2)).unwrap();

    let mut encoder = BzEncoder::new(Vec::new(), CompressionLevel::new(2));
    for chunk in input.chunks(7) {
        encoder.write_all(chunk).unwrap();
    }
    let streamed = encoder.finish().unwrap();

    assert_eq!(streamed, one_shot);
}

#[test]
fn test_small_reads() {
    let input = b"read me one byte at a time".repeat(40);
    let compressed = compress(&input, CompressionLevel::new(1)).unwrap();

    let mut decoder = BzDecoder::new(&compressed[..]).unwrap();
    let mut output = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = decoder.read(&mut byte).unwrap();
        if n == 0 {
            break;
        }
        output.push(byte[0]);
    }
    assert_eq!(output, input);
    assert_eq!(decoder.total_out(), input.len() as u64);
}

#[test]
fn test_headerless_roundtrip() {
    let input = b"no magic in front".repeat(10);

    let options = EncoderOptions::new(CompressionLevel::new(3)).headerless(true);
    let mut encoder = BzEncoder::with_options(Vec::new(), options);
    encoder.write_all(&input).unwrap();
    let compressed = encoder.finish().unwrap();
    assert_eq!(&compressed[..2], b"h3");

    let options = DecoderOptions::default().headerless(true);
    let mut decoder = BzDecoder::with_options(&compressed[..], options).unwrap();
    let mut output = Vec::new();
    decoder.read_to_end(&mut output).unwrap();
    assert_eq!(output, input);

    // The regular decoder wants the magic
    assert!(matches!(
        decompress(&compressed[..]),
        Err(BzError::InvalidMagic { .. })
    ));
}

#[test]
fn test_stream_crc_is_block_fold() {
    // Distinct neighbours: every level-1 block holds exactly 99996 bytes
    let input: Vec<u8> = (0..220_000u32).map(|i| (i * 7 % 253) as u8).collect();
    let compressed = compress(&input, CompressionLevel::new(1)).unwrap();

    let mut decoder = BzDecoder::new(&compressed[..]).unwrap();
    let mut output = Vec::new();
    decoder.read_to_end(&mut output).unwrap();

    let expected: Vec<u32> = input.chunks(99_996).map(Bzip2Crc::compute).collect();
    assert_eq!(decoder.block_crcs(), expected.as_slice());

    let folded = expected
        .iter()
        .fold(0u32, |acc, &crc| combine_stream_crc(acc, crc));
    assert_eq!(decoder.stream_crc(), folded);
}

#[test]
fn test_single_bit_flips_never_pass_silently() {
    let input = b"Every flipped bit must be caught or harmless. ".repeat(8);
    let compressed = compress(&input, CompressionLevel::new(1)).unwrap();

    for byte in 0..compressed.len() {
        for bit in 0..8 {
            let mut corrupted = compressed.clone();
            corrupted[byte] ^= 1 << bit;

            if let Ok(output) = decompress(&corrupted[..]) {
                // Padding bits and a larger block size digit are harmless
                assert_eq!(
                    output, input,
                    "bit {} of byte {} changed the output silently",
                    bit, byte
                );
            }
        }
    }
}

#[test]
fn test_corrupt_block_crc_reported() {
    let mut stream = hex(HELLO_STREAM);
    // Bytes 10..14 hold the block CRC
    stream[12] ^= 0x01;

    let mut decoder = BzDecoder::new(&stream[..]).unwrap();
    let mut output = Vec::new();
    let err = decoder.read_to_end(&mut output).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);

    let mut buf = [0u8; 8];
    assert!(matches!(
        decoder.read_bytes(&mut buf),
        Err(BzError::StreamFailed { .. })
    ));
}

#[test]
fn test_trailing_data_ignored() {
    let mut stream = compress(b"payload", CompressionLevel::new(1)).unwrap();
    stream.extend_from_slice(b"garbage after the end");
    assert_eq!(decompress(&stream[..]).unwrap(), b"payload");
}
