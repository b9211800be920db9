//! Variable-width LZW shared by GIF and TIFF.
//!
//! GIF packs codes least significant bit first and widens the code after
//! the table reaches a power of two. TIFF packs most significant bit first,
//! always uses 8-bit roots and widens one code early.

use std::collections::HashMap;

use crate::error::{ImagingError, Result};
use crate::io::{LsbBitReader, LsbBitWriter, MsbBitReader, MsbBitWriter};

use super::ImageFormat;

const MAX_CODE_BITS: u8 = 12;
const TABLE_SIZE: usize = 1 << MAX_CODE_BITS;
/// The encoder resets before the table can need a 13th bit.
const ENCODER_LIMIT: u16 = 4094;

trait CodeSource {
    fn code(&mut self, bits: u8) -> Result<u32>;
}

impl CodeSource for LsbBitReader<'_> {
    fn code(&mut self, bits: u8) -> Result<u32> {
        self.read_bits(bits)
    }
}

impl CodeSource for MsbBitReader<'_> {
    fn code(&mut self, bits: u8) -> Result<u32> {
        self.read_bits(bits)
    }
}

trait CodeSink {
    fn put(&mut self, code: u16, bits: u8);
}

impl CodeSink for LsbBitWriter {
    fn put(&mut self, code: u16, bits: u8) {
        self.write_bits(code as u32, bits);
    }
}

impl CodeSink for MsbBitWriter {
    fn put(&mut self, code: u16, bits: u8) {
        self.write_bits(code as u32, bits);
    }
}

struct Table {
    prefix: Vec<u16>,
    suffix: Vec<u8>,
    first: Vec<u8>,
    length: Vec<u16>,
}

impl Table {
    fn new(roots: usize) -> Self {
        let mut table = Self {
            prefix: Vec::with_capacity(TABLE_SIZE),
            suffix: Vec::with_capacity(TABLE_SIZE),
            first: Vec::with_capacity(TABLE_SIZE),
            length: Vec::with_capacity(TABLE_SIZE),
        };
        // Roots plus the clear and end codes.
        for i in 0..roots + 2 {
            table.prefix.push(0);
            table.suffix.push(i as u8);
            table.first.push(i as u8);
            table.length.push(1);
        }
        table
    }

    fn reset(&mut self, roots: usize) {
        self.prefix.truncate(roots + 2);
        self.suffix.truncate(roots + 2);
        self.first.truncate(roots + 2);
        self.length.truncate(roots + 2);
    }

    fn next(&self) -> usize {
        self.prefix.len()
    }

    fn push(&mut self, prefix: u16, byte: u8) {
        let p = prefix as usize;
        self.prefix.push(prefix);
        self.suffix.push(byte);
        self.first.push(self.first[p]);
        self.length.push(self.length[p] + 1);
    }

    fn emit(&self, code: u16, out: &mut Vec<u8>) {
        let len = self.length[code as usize] as usize;
        let start = out.len();
        out.resize(start + len, 0);
        let mut c = code as usize;
        for slot in out[start..].iter_mut().rev() {
            *slot = self.suffix[c];
            c = self.prefix[c] as usize;
        }
    }
}

fn decode_codes<S: CodeSource>(
    format: ImageFormat,
    source: &mut S,
    root_bits: u8,
    early_change: usize,
    expected: usize,
) -> Result<Vec<u8>> {
    let roots = 1usize << root_bits;
    let clear = roots as u32;
    let end = clear + 1;
    let mut table = Table::new(roots);
    let mut bits = root_bits + 1;
    let mut prev: Option<u16> = None;
    let mut out = Vec::with_capacity(expected);

    while out.len() < expected {
        let code = source.code(bits)?;
        if code == clear {
            table.reset(roots);
            bits = root_bits + 1;
            prev = None;
            continue;
        }
        if code == end {
            break;
        }
        let next = table.next();
        match prev {
            None => {
                if code >= clear {
                    return Err(ImagingError::data(format, format!("LZW code {} before any root", code)));
                }
                table.emit(code as u16, &mut out);
            }
            Some(p) => {
                if (code as usize) < next {
                    table.emit(code as u16, &mut out);
                    if next < TABLE_SIZE {
                        let first = table.first[code as usize];
                        table.push(p, first);
                    }
                } else if code as usize == next && next < TABLE_SIZE {
                    let first = table.first[p as usize];
                    table.push(p, first);
                    table.emit(code as u16, &mut out);
                } else {
                    return Err(ImagingError::data(format, format!("LZW code {} out of range", code)));
                }
                if table.next() + early_change >= (1 << bits) && bits < MAX_CODE_BITS {
                    bits += 1;
                }
            }
        }
        prev = Some(code as u16);
    }

    if out.len() < expected {
        return Err(ImagingError::truncated(format!(
            "{} LZW data produced {} of {} bytes",
            format,
            out.len(),
            expected
        )));
    }
    out.truncate(expected);
    Ok(out)
}

fn encode_codes<S: CodeSink>(sink: &mut S, data: &[u8], root_bits: u8, early_change: usize) {
    let roots = 1u16 << root_bits;
    let clear = roots;
    let end = clear + 1;
    let mut bits = root_bits + 1;
    let mut next = clear + 2;
    let mut dict: HashMap<(u16, u8), u16> = HashMap::new();

    sink.put(clear, bits);
    let mut prefix: Option<u16> = None;

    // Mirrors the decoder, which adds each entry one code later.
    let grow = |next: &mut u16, bits: &mut u8| {
        *next += 1;
        if (*next as usize - 1) + early_change >= (1usize << *bits) && *bits < MAX_CODE_BITS {
            *bits += 1;
        }
    };

    for &byte in data {
        let p = match prefix {
            None => {
                prefix = Some(byte as u16);
                continue;
            }
            Some(p) => p,
        };
        if let Some(&code) = dict.get(&(p, byte)) {
            prefix = Some(code);
            continue;
        }
        sink.put(p, bits);
        if next < ENCODER_LIMIT {
            dict.insert((p, byte), next);
            grow(&mut next, &mut bits);
        } else {
            sink.put(clear, bits);
            dict.clear();
            bits = root_bits + 1;
            next = clear + 2;
        }
        prefix = Some(byte as u16);
    }

    if let Some(p) = prefix {
        sink.put(p, bits);
        if next < ENCODER_LIMIT {
            grow(&mut next, &mut bits);
        }
    }
    sink.put(end, bits);
}

/// Decode a GIF image data stream (sub-blocks already joined).
pub(crate) fn decode_gif(data: &[u8], min_code_size: u8, expected: usize) -> Result<Vec<u8>> {
    if !(2..=8).contains(&min_code_size) {
        return Err(ImagingError::data(
            ImageFormat::Gif,
            format!("LZW minimum code size {}", min_code_size),
        ));
    }
    let mut source = LsbBitReader::new(data);
    decode_codes(ImageFormat::Gif, &mut source, min_code_size, 0, expected)
}

/// Encode indices for GIF.
pub(crate) fn encode_gif(data: &[u8], min_code_size: u8) -> Vec<u8> {
    let mut sink = LsbBitWriter::new();
    encode_codes(&mut sink, data, min_code_size, 0);
    sink.finish()
}

/// Decode one TIFF strip or tile.
pub(crate) fn decode_tiff(data: &[u8], expected: usize) -> Result<Vec<u8>> {
    if data.len() >= 2 && data[0] == 0x00 && data[1] & 0x01 != 0 {
        return Err(ImagingError::feature(ImageFormat::Tiff, "pre-6.0 LZW bit order"));
    }
    let mut source = MsbBitReader::new(data);
    decode_codes(ImageFormat::Tiff, &mut source, 8, 1, expected)
}

/// Encode one TIFF strip.
pub(crate) fn encode_tiff(data: &[u8]) -> Vec<u8> {
    let mut sink = MsbBitWriter::new();
    encode_codes(&mut sink, data, 8, 1);
    sink.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize, alphabet: u8) -> Vec<u8> {
        let mut state = 12345u32;
        (0..len)
            .map(|i| {
                state = state.wrapping_mul(1103515245).wrapping_add(12345);
                if i % 7 < 3 {
                    0
                } else {
                    ((state >> 16) % alphabet as u32) as u8
                }
            })
            .collect()
    }

    #[test]
    fn test_gif_roundtrip_across_resets() {
        for &(bits, alphabet) in &[(2u8, 4u8), (4, 16), (8, 255)] {
            let data = sample(90_000, alphabet);
            let packed = encode_gif(&data, bits);
            assert_eq!(decode_gif(&packed, bits, data.len()).unwrap(), data);
        }
    }

    #[test]
    fn test_tiff_roundtrip_across_resets() {
        let data = sample(200_000, 200);
        let packed = encode_tiff(&data);
        assert_eq!(decode_tiff(&packed, data.len()).unwrap(), data);
        let runs = vec![9u8; 50_000];
        assert_eq!(decode_tiff(&encode_tiff(&runs), runs.len()).unwrap(), runs);
    }

    #[test]
    fn test_truncated_stream() {
        let data = sample(5000, 64);
        let packed = encode_gif(&data, 8);
        let err = decode_gif(&packed[..packed.len() / 3], 8, data.len()).unwrap_err();
        assert!(err.is_truncation());
    }

    #[test]
    fn test_empty_input() {
        let packed = encode_tiff(&[]);
        assert_eq!(decode_tiff(&packed, 0).unwrap(), Vec::<u8>::new());
    }
}
