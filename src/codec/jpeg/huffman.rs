//! Canonical Huffman tables for entropy-coded segments.

use crate::error::{ImagingError, Result};
use crate::io::MsbBitReader;

use super::super::ImageFormat;

/// Decoding table built from a DHT segment (code lengths 1 to 16).
#[derive(Debug, Clone)]
pub(super) struct HuffmanTable {
    max_code: [i32; 17],
    min_code: [i32; 17],
    first_index: [i32; 17],
    values: Vec<u8>,
}

impl HuffmanTable {
    /// Build from the 16 per-length counts and the symbol list.
    pub fn new(counts: &[u8; 16], values: &[u8]) -> Result<Self> {
        let total: usize = counts.iter().map(|&c| c as usize).sum();
        if total != values.len() || total > 256 {
            return Err(ImagingError::data(
                ImageFormat::Jpeg,
                format!("Huffman table lists {} codes for {} symbols", total, values.len()),
            ));
        }
        let mut table = Self {
            max_code: [-1; 17],
            min_code: [0; 17],
            first_index: [0; 17],
            values: values.to_vec(),
        };
        let mut code = 0i32;
        let mut index = 0i32;
        for len in 1..=16 {
            let count = counts[len - 1] as i32;
            table.first_index[len] = index;
            table.min_code[len] = code;
            if count > 0 {
                code += count;
                index += count;
                table.max_code[len] = code - 1;
                if code > (1 << len) {
                    return Err(ImagingError::data(ImageFormat::Jpeg, "oversubscribed Huffman table"));
                }
            }
            code <<= 1;
        }
        Ok(table)
    }

    /// Decode one symbol.
    pub fn decode(&self, bits: &mut MsbBitReader<'_>) -> Result<u8> {
        let mut code = bits.read_bits(1)? as i32;
        let mut len = 1;
        while code > self.max_code[len] {
            if len == 16 {
                return Err(ImagingError::data(ImageFormat::Jpeg, "invalid Huffman code"));
            }
            code = (code << 1) | bits.read_bits(1)? as i32;
            len += 1;
        }
        let index = self.first_index[len] + code - self.min_code[len];
        self.values
            .get(index as usize)
            .copied()
            .ok_or_else(|| ImagingError::data(ImageFormat::Jpeg, "invalid Huffman code"))
    }
}

/// Read `size` magnitude bits and sign-extend them.
pub(super) fn receive_extend(bits: &mut MsbBitReader<'_>, size: u8) -> Result<i32> {
    if size == 0 {
        return Ok(0);
    }
    if size > 16 {
        return Err(ImagingError::data(ImageFormat::Jpeg, format!("coefficient size {}", size)));
    }
    let value = bits.read_bits(size)? as i32;
    Ok(if value < 1 << (size - 1) { value - (1 << size) + 1 } else { value })
}
