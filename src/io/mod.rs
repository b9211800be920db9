//! Bounded byte and bit level readers and writers.
//!
//! Every format parser reads through [`ByteReader`], which turns any read past
//! the end of the input into [`ImagingError::TruncatedData`] instead of a panic.
//! Writers append to an owned `Vec<u8>` and never fail.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{ImagingError, Result};

/// Byte order of multi-byte integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    /// Least significant byte first (Intel).
    Little,
    /// Most significant byte first (Motorola).
    Big,
}

/// Sequential reader over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
    endian: Endian,
}

macro_rules! read_int {
    ($name:ident, $le:ident, $be:ident, $ty:ty, $size:expr, $read:ident) => {
        /// Read an integer in the reader's byte order.
        pub fn $name(&mut self) -> Result<$ty> {
            match self.endian {
                Endian::Little => self.$le(),
                Endian::Big => self.$be(),
            }
        }

        /// Read a little-endian integer.
        pub fn $le(&mut self) -> Result<$ty> {
            Ok(LittleEndian::$read(self.bytes($size)?))
        }

        /// Read a big-endian integer.
        pub fn $be(&mut self) -> Result<$ty> {
            Ok(BigEndian::$read(self.bytes($size)?))
        }
    };
}

impl<'a> ByteReader<'a> {
    /// Create a reader positioned at the start of `data`.
    pub fn new(data: &'a [u8], endian: Endian) -> Self {
        Self {
            data,
            pos: 0,
            endian,
        }
    }

    /// Create a reader positioned at `pos`.
    pub fn at(data: &'a [u8], pos: usize, endian: Endian) -> Result<Self> {
        let mut reader = Self::new(data, endian);
        reader.seek(pos)?;
        Ok(reader)
    }

    /// Current byte offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Total length of the underlying data.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Bytes left after the current position.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Whether every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Byte order used by the unsuffixed integer reads.
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Change the byte order used by the unsuffixed integer reads.
    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    /// Move to an absolute offset. Seeking exactly to the end is allowed.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(ImagingError::truncated(format!(
                "offset {} is beyond the end of {} bytes",
                pos,
                self.data.len()
            )));
        }
        self.pos = pos;
        Ok(())
    }

    /// Skip `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.bytes(n).map(|_| ())
    }

    /// Borrow the next `n` bytes and advance past them.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.data.len());
        match end {
            Some(end) => {
                let slice = &self.data[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(ImagingError::truncated(format!(
                "needed {} bytes at offset {}, only {} available",
                n,
                self.pos,
                self.remaining()
            ))),
        }
    }

    /// Read a fixed-size record.
    pub fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    /// Everything from the current position to the end.
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }

    /// Look at the next byte without consuming it.
    pub fn peek_u8(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Read one byte.
    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    /// Read one signed byte.
    pub fn i8(&mut self) -> Result<i8> {
        Ok(self.u8()? as i8)
    }

    read_int!(u16, u16_le, u16_be, u16, 2, read_u16);
    read_int!(i16, i16_le, i16_be, i16, 2, read_i16);
    read_int!(u32, u32_le, u32_be, u32, 4, read_u32);
    read_int!(i32, i32_le, i32_be, i32, 4, read_i32);
    read_int!(u64, u64_le, u64_be, u64, 8, read_u64);
}

/// Growable little- or big-endian byte sink.
#[derive(Debug, Clone)]
pub struct ByteWriter {
    buf: Vec<u8>,
    endian: Endian,
}

macro_rules! write_int {
    ($name:ident, $le:ident, $be:ident, $ty:ty, $size:expr, $write:ident) => {
        /// Write an integer in the writer's byte order.
        pub fn $name(&mut self, value: $ty) {
            match self.endian {
                Endian::Little => self.$le(value),
                Endian::Big => self.$be(value),
            }
        }

        /// Write a little-endian integer.
        pub fn $le(&mut self, value: $ty) {
            let mut tmp = [0u8; $size];
            LittleEndian::$write(&mut tmp, value);
            self.buf.extend_from_slice(&tmp);
        }

        /// Write a big-endian integer.
        pub fn $be(&mut self, value: $ty) {
            let mut tmp = [0u8; $size];
            BigEndian::$write(&mut tmp, value);
            self.buf.extend_from_slice(&tmp);
        }
    };
}

impl ByteWriter {
    /// Create an empty writer.
    pub fn new(endian: Endian) -> Self {
        Self {
            buf: Vec::new(),
            endian,
        }
    }

    /// Create an empty writer with reserved capacity.
    pub fn with_capacity(endian: Endian, capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            endian,
        }
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Write one byte.
    pub fn u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Write raw bytes.
    pub fn bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Write `n` zero bytes.
    pub fn zeros(&mut self, n: usize) {
        self.buf.resize(self.buf.len() + n, 0);
    }

    write_int!(u16, u16_le, u16_be, u16, 2, write_u16);
    write_int!(i16, i16_le, i16_be, i16, 2, write_i16);
    write_int!(u32, u32_le, u32_be, u32, 4, write_u32);
    write_int!(i32, i32_le, i32_be, i32, 4, write_i32);

    /// Overwrite a previously written 16-bit value.
    pub fn set_u16_at(&mut self, pos: usize, value: u16) {
        let slot = &mut self.buf[pos..pos + 2];
        match self.endian {
            Endian::Little => LittleEndian::write_u16(slot, value),
            Endian::Big => BigEndian::write_u16(slot, value),
        }
    }

    /// Overwrite a previously written 32-bit value.
    pub fn set_u32_at(&mut self, pos: usize, value: u32) {
        let slot = &mut self.buf[pos..pos + 4];
        match self.endian {
            Endian::Little => LittleEndian::write_u32(slot, value),
            Endian::Big => BigEndian::write_u32(slot, value),
        }
    }

    /// Borrow the written bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Take the written bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads variable-width codes packed most significant bit first.
#[derive(Debug)]
pub struct MsbBitReader<'a> {
    data: &'a [u8],
    pos: usize,
    acc: u32,
    nbits: u8,
}

impl<'a> MsbBitReader<'a> {
    /// Create a reader over `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            acc: 0,
            nbits: 0,
        }
    }

    /// Read `n` (at most 24) bits.
    pub fn read_bits(&mut self, n: u8) -> Result<u32> {
        debug_assert!(n <= 24);
        while self.nbits < n {
            let byte = *self
                .data
                .get(self.pos)
                .ok_or_else(|| ImagingError::truncated("bit stream exhausted"))?;
            self.pos += 1;
            self.acc = (self.acc << 8) | byte as u32;
            self.nbits += 8;
        }
        self.nbits -= n;
        let value = (self.acc >> self.nbits) & ((1u32 << n) - 1);
        self.acc &= (1u32 << self.nbits) - 1;
        Ok(value)
    }

    /// Whether no whole code can be read anymore.
    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.data.len()
    }
}

/// Reads variable-width codes packed least significant bit first.
#[derive(Debug)]
pub struct LsbBitReader<'a> {
    data: &'a [u8],
    pos: usize,
    acc: u32,
    nbits: u8,
}

impl<'a> LsbBitReader<'a> {
    /// Create a reader over `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            acc: 0,
            nbits: 0,
        }
    }

    /// Read `n` (at most 24) bits.
    pub fn read_bits(&mut self, n: u8) -> Result<u32> {
        debug_assert!(n <= 24);
        while self.nbits < n {
            let byte = *self
                .data
                .get(self.pos)
                .ok_or_else(|| ImagingError::truncated("bit stream exhausted"))?;
            self.pos += 1;
            self.acc |= (byte as u32) << self.nbits;
            self.nbits += 8;
        }
        let value = self.acc & ((1u32 << n) - 1);
        self.acc >>= n;
        self.nbits -= n;
        Ok(value)
    }
}

/// Packs variable-width codes most significant bit first.
#[derive(Debug, Default)]
pub struct MsbBitWriter {
    buf: Vec<u8>,
    acc: u32,
    nbits: u8,
}

impl MsbBitWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the low `n` (at most 24) bits of `value`.
    pub fn write_bits(&mut self, value: u32, n: u8) {
        debug_assert!(n <= 24);
        self.acc = (self.acc << n) | (value & ((1u32 << n) - 1));
        self.nbits += n;
        while self.nbits >= 8 {
            self.nbits -= 8;
            self.buf.push((self.acc >> self.nbits) as u8);
        }
        self.acc &= (1u32 << self.nbits) - 1;
    }

    /// Flush a partial byte, zero padded, and return the output.
    pub fn finish(mut self) -> Vec<u8> {
        if self.nbits > 0 {
            self.buf.push((self.acc << (8 - self.nbits)) as u8);
        }
        self.buf
    }
}

/// Packs variable-width codes least significant bit first.
#[derive(Debug, Default)]
pub struct LsbBitWriter {
    buf: Vec<u8>,
    acc: u32,
    nbits: u8,
}

impl LsbBitWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the low `n` (at most 24) bits of `value`.
    pub fn write_bits(&mut self, value: u32, n: u8) {
        debug_assert!(n <= 24);
        self.acc |= (value & ((1u32 << n) - 1)) << self.nbits;
        self.nbits += n;
        while self.nbits >= 8 {
            self.buf.push(self.acc as u8);
            self.acc >>= 8;
            self.nbits -= 8;
        }
    }

    /// Flush a partial byte and return the output.
    pub fn finish(mut self) -> Vec<u8> {
        if self.nbits > 0 {
            self.buf.push(self.acc as u8);
        }
        self.buf
    }
}

/// Number of bytes needed to hold `count` samples of `bits` each.
pub fn packed_len(count: usize, bits: u8) -> usize {
    (count * bits as usize).div_ceil(8)
}

/// Unpack `count` samples of 1, 2, 4 or 8 bits, MSB first.
pub fn unpack_samples(row: &[u8], bits: u8, count: usize) -> Result<Vec<u8>> {
    let needed = packed_len(count, bits);
    if row.len() < needed {
        return Err(ImagingError::truncated(format!(
            "row needs {} bytes, only {} available",
            needed,
            row.len()
        )));
    }
    if bits == 8 {
        return Ok(row[..count].to_vec());
    }
    let per_byte = 8 / bits as usize;
    let mask = (1u8 << bits) - 1;
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let byte = row[i / per_byte];
        let shift = 8 - bits as usize * (i % per_byte + 1);
        out.push((byte >> shift) & mask);
    }
    Ok(out)
}

/// Pack samples of 1, 2, 4 or 8 bits MSB first, zero padding the last byte.
pub fn pack_samples(samples: &[u8], bits: u8) -> Vec<u8> {
    if bits == 8 {
        return samples.to_vec();
    }
    let per_byte = 8 / bits as usize;
    let mask = (1u8 << bits) - 1;
    let mut out = vec![0u8; packed_len(samples.len(), bits)];
    for (i, &sample) in samples.iter().enumerate() {
        let shift = 8 - bits as usize * (i % per_byte + 1);
        out[i / per_byte] |= (sample & mask) << shift;
    }
    out
}

/// Whether the text following a C array's closing brace holds the `;` and
/// the end of that line.
pub fn closes_c_array(after_brace: &str) -> bool {
    after_brace
        .trim_start_matches([' ', '\t'])
        .strip_prefix(';')
        .is_some_and(|rest| rest.contains('\n'))
}

/// Scale a sample in `0..=max` to `0..=255`, rounding to nearest.
pub fn scale_to_u8(value: u32, max: u32) -> u8 {
    if max == 255 {
        return value.min(255) as u8;
    }
    if max == 0 {
        return 0;
    }
    ((value.min(max) as u64 * 255 + max as u64 / 2) / max as u64) as u8
}

/// Expand a sample of `bits` bits to eight bits by bit replication.
pub fn expand_bits(value: u8, bits: u8) -> u8 {
    match bits {
        1 => {
            if value & 1 != 0 {
                255
            } else {
                0
            }
        }
        2 => (value & 3) * 0x55,
        4 => (value & 0xF) * 0x11,
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closes_c_array() {
        assert!(closes_c_array(";\n"));
        assert!(closes_c_array(" ;\r\n"));
        assert!(!closes_c_array(";"));
        assert!(!closes_c_array("\n"));
        assert!(!closes_c_array(""));
    }

    #[test]
    fn test_reader_endianness() {
        let data = [0x01, 0x02, 0x03, 0x04];
        let mut le = ByteReader::new(&data, Endian::Little);
        assert_eq!(le.u16().unwrap(), 0x0201);
        let mut be = ByteReader::new(&data, Endian::Big);
        assert_eq!(be.u32().unwrap(), 0x01020304);
    }

    #[test]
    fn test_reader_truncation() {
        let data = [0xAA, 0xBB, 0xCC];
        let mut reader = ByteReader::new(&data, Endian::Little);
        assert_eq!(reader.u16().unwrap(), 0xBBAA);
        let err = reader.u16().unwrap_err();
        assert!(err.is_truncation());
        // A failed read does not move the cursor.
        assert_eq!(reader.position(), 2);
        assert_eq!(reader.u8().unwrap(), 0xCC);
        assert!(reader.is_empty());
        assert!(reader.seek(4).is_err());
    }

    #[test]
    fn test_writer_patch() {
        let mut writer = ByteWriter::new(Endian::Big);
        writer.u32(0);
        writer.u16(0xBEEF);
        writer.set_u32_at(0, 0x0A0B0C0D);
        assert_eq!(writer.as_slice(), &[0x0A, 0x0B, 0x0C, 0x0D, 0xBE, 0xEF]);
    }

    #[test]
    fn test_msb_bits_roundtrip() {
        let mut writer = MsbBitWriter::new();
        let codes = [(5u32, 3u8), (300, 9), (1, 1), (4095, 12)];
        for &(value, bits) in &codes {
            writer.write_bits(value, bits);
        }
        let data = writer.finish();
        let mut reader = MsbBitReader::new(&data);
        for &(value, bits) in &codes {
            assert_eq!(reader.read_bits(bits).unwrap(), value);
        }
    }

    #[test]
    fn test_lsb_bits_roundtrip() {
        let mut writer = LsbBitWriter::new();
        let codes = [(256u32, 9u8), (7, 3), (511, 9), (2, 2)];
        for &(value, bits) in &codes {
            writer.write_bits(value, bits);
        }
        let data = writer.finish();
        let mut reader = LsbBitReader::new(&data);
        for &(value, bits) in &codes {
            assert_eq!(reader.read_bits(bits).unwrap(), value);
        }
        assert!(reader.read_bits(9).is_err());
    }

    #[test]
    fn test_sample_packing() {
        let samples = [1, 0, 1, 1, 0, 0, 0, 1, 1];
        let packed = pack_samples(&samples, 1);
        assert_eq!(packed, vec![0b1011_0001, 0b1000_0000]);
        assert_eq!(unpack_samples(&packed, 1, 9).unwrap(), samples);

        let nibbles = [0xA, 0x3, 0xF];
        let packed = pack_samples(&nibbles, 4);
        assert_eq!(packed, vec![0xA3, 0xF0]);
        assert_eq!(unpack_samples(&packed, 4, 3).unwrap(), nibbles);
        assert!(unpack_samples(&packed, 4, 5).is_err());
    }

    #[test]
    fn test_scaling() {
        assert_eq!(scale_to_u8(65535, 65535), 255);
        assert_eq!(scale_to_u8(1, 1), 255);
        assert_eq!(scale_to_u8(7, 15), 119);
        assert_eq!(expand_bits(0b10, 2), 0xAA);
        assert_eq!(expand_bits(0x7, 4), 0x77);
    }
}
