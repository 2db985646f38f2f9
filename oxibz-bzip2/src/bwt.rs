//! Burrows-Wheeler Transform for BZip2.
//!
//! The forward transform sorts the cyclic rotations of a block with the
//! suffix sorter in [`crate::divsufsort`]; the inverse walks a table of
//! merged pointers, each holding the successor row in its upper 24 bits
//! and the output byte in its low 8 bits.

use crate::divsufsort::{DivSufSort, workspace_len};
use oxibz_core::error::{BzError, Result};

/// Perform the Burrows-Wheeler Transform.
/// Returns the transformed data and the index of the original string.
pub fn transform(data: &[u8]) -> (Vec<u8>, u32) {
    if data.is_empty() {
        return (Vec::new(), 0);
    }

    let n = data.len();
    let mut text = Vec::with_capacity(n + 1);
    text.extend_from_slice(data);
    text.push(data[0]);

    let mut sa = vec![0i32; workspace_len(n)];
    let origin = DivSufSort::new(&text, &mut sa, n).bwt();

    let transformed = sa[..n].iter().map(|&v| v as u8).collect();
    (transformed, origin)
}

/// Perform inverse Burrows-Wheeler Transform.
/// Reconstructs the original data from the transformed data and origin pointer.
pub fn inverse_transform(data: &[u8], origin: u32) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    Ok(InverseBwt::new(data, origin)?.collect())
}

/// Streaming inverse BWT over one block.
///
/// Yields the block's bytes in their original order. Block lengths never
/// exceed 900 000 bytes, so a row index fits in the upper 24 bits of each
/// merged pointer.
#[derive(Debug)]
pub struct InverseBwt {
    merged: Vec<u32>,
    current: u32,
    remaining: usize,
}

impl InverseBwt {
    /// Build the merged pointer table for `block`, starting at row `origin`.
    pub fn new(block: &[u8], origin: u32) -> Result<Self> {
        if origin as usize >= block.len() {
            return Err(BzError::corrupted(format!(
                "BWT start pointer {} outside block of {} bytes",
                origin,
                block.len()
            )));
        }

        let mut counts = [0u32; 256];
        for &byte in block {
            counts[byte as usize] += 1;
        }

        // First row of each byte value in the sorted column
        let mut base = [0u32; 256];
        let mut total = 0;
        for (slot, &count) in base.iter_mut().zip(counts.iter()) {
            *slot = total;
            total += count;
        }

        let mut merged = vec![0u32; block.len()];
        for (i, &byte) in block.iter().enumerate() {
            let row = &mut base[byte as usize];
            merged[*row as usize] = ((i as u32) << 8) | byte as u32;
            *row += 1;
        }

        let current = merged[origin as usize];
        Ok(Self {
            remaining: merged.len(),
            merged,
            current,
        })
    }

    /// Number of bytes still to be produced.
    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl Iterator for InverseBwt {
    type Item = u8;

    #[inline]
    fn next(&mut self) -> Option<u8> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let byte = self.current as u8;
        self.current = self.merged[(self.current >> 8) as usize];
        Some(byte)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for InverseBwt {}
