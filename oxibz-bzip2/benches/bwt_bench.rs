//! Benchmarks for the suffix-array Burrows-Wheeler Transform.

use oxibz_bzip2::bwt::{InverseBwt, inverse_transform, transform};

fn main() {
    // Suffix sorting keeps repetitive input near linear, so the full
    // level-9 block size is exercised for every pattern.
    let test_cases = vec![
        ("small_text", generate_text(1024)),
        ("medium_text", generate_text(64 * 1024)),
        ("block_text", generate_text(900_000)),
        ("small_random", generate_random(1024)),
        ("medium_random", generate_random(64 * 1024)),
        ("block_random", generate_random(900_000)),
        ("small_repeated", generate_repeated(1024)),
        ("medium_repeated", generate_repeated(64 * 1024)),
        ("block_repeated", generate_repeated(900_000)),
        ("block_uniform", vec![b'A'; 900_000]),
    ];

    println!("Burrows-Wheeler Transform Benchmarks");
    println!("=====================================\n");

    for (name, data) in &test_cases {
        println!("Test: {} ({} bytes)", name, data.len());

        let start = std::time::Instant::now();
        let (transformed, origin) = transform(data);
        let forward_time = start.elapsed();

        let forward_throughput = data.len() as f64 / forward_time.as_secs_f64() / 1024.0 / 1024.0;

        let start = std::time::Instant::now();
        let reconstructed = match inverse_transform(&transformed, origin) {
            Ok(bytes) => bytes,
            Err(e) => panic!("inverse BWT failed for {}: {}", name, e),
        };
        let inverse_time = start.elapsed();

        let inverse_throughput =
            reconstructed.len() as f64 / inverse_time.as_secs_f64() / 1024.0 / 1024.0;

        assert_eq!(reconstructed, *data, "BWT roundtrip failed for {}", name);

        // Streaming inverse, as used by the block decompressor
        let start = std::time::Instant::now();
        let streamed = match InverseBwt::new(&transformed, origin) {
            Ok(iter) => iter.map(u64::from).sum::<u64>(),
            Err(e) => panic!("inverse BWT failed for {}: {}", name, e),
        };
        let streaming_time = start.elapsed();
        std::hint::black_box(streamed);

        println!(
            "  Forward:   {:7.2} MB/s ({:8} µs)",
            forward_throughput,
            forward_time.as_micros()
        );
        println!(
            "  Inverse:   {:7.2} MB/s ({:8} µs)",
            inverse_throughput,
            inverse_time.as_micros()
        );
        println!("  Streaming: {:8} µs", streaming_time.as_micros());
        println!();
    }
}

fn generate_text(size: usize) -> Vec<u8> {
    let words: &[&[u8]] = &[
        b"the", b"quick", b"brown", b"fox", b"jumps", b"over", b"lazy", b"dog", b"and", b"runs",
        b"through", b"forest", b"near", b"river", b"under", b"blue", b"sky",
    ];

    let mut data = Vec::with_capacity(size);
    let mut seed = 42u32;

    while data.len() < size {
        seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
        let word_idx = (seed as usize) % words.len();
        data.extend_from_slice(words[word_idx]);
        data.push(b' ');
    }
    data.truncate(size);
    data
}

fn generate_random(size: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut seed = 12345u32;
    for _ in 0..size {
        seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((seed >> 16) as u8);
    }
    data
}

fn generate_repeated(size: usize) -> Vec<u8> {
    let pattern = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut data = Vec::with_capacity(size);
    while data.len() < size {
        data.extend_from_slice(pattern);
    }
    data.truncate(size);
    data
}
