//! Image file directory parsing and writing.

use std::collections::{BTreeMap, HashSet};

use crate::error::{ImagingError, Result};
use crate::io::{ByteReader, ByteWriter, Endian};

use super::super::ImageFormat;

pub(crate) const BYTE: u16 = 1;
pub(crate) const ASCII: u16 = 2;
pub(crate) const SHORT: u16 = 3;
pub(crate) const LONG: u16 = 4;
pub(crate) const RATIONAL: u16 = 5;
pub(crate) const UNDEFINED: u16 = 7;

/// Most IFDs a file may chain before it is considered cyclic.
const MAX_DIRECTORIES: usize = 4096;

fn type_size(field_type: u16) -> Option<usize> {
    match field_type {
        1 | 2 | 6 | 7 => Some(1),
        3 | 8 => Some(2),
        4 | 9 | 11 | 13 => Some(4),
        5 | 10 | 12 => Some(8),
        _ => None,
    }
}

/// One directory entry with its value bytes resolved.
#[derive(Debug, Clone)]
pub(crate) struct Entry<'a> {
    pub field_type: u16,
    pub count: u32,
    pub data: &'a [u8],
    endian: Endian,
}

impl<'a> Entry<'a> {
    /// Integer values of a BYTE, SHORT or LONG field.
    pub fn values(&self) -> Result<Vec<u32>> {
        let mut r = ByteReader::new(self.data, self.endian);
        let mut out = Vec::with_capacity(self.count as usize);
        for _ in 0..self.count {
            out.push(match self.field_type {
                BYTE | UNDEFINED => r.u8()? as u32,
                SHORT => r.u16()? as u32,
                LONG | 13 => r.u32()?,
                other => {
                    return Err(ImagingError::header(
                        ImageFormat::Tiff,
                        format!("field type {} where an integer was expected", other),
                    ));
                }
            });
        }
        Ok(out)
    }

    /// First integer value.
    pub fn value(&self) -> Result<u32> {
        self.values()?
            .first()
            .copied()
            .ok_or_else(|| ImagingError::header(ImageFormat::Tiff, "empty field"))
    }

    /// First RATIONAL value as a float.
    pub fn rational(&self) -> Result<f64> {
        let mut r = ByteReader::new(self.data, self.endian);
        match self.field_type {
            RATIONAL => {
                let num = r.u32()? as f64;
                let den = r.u32()? as f64;
                Ok(if den == 0.0 { 0.0 } else { num / den })
            }
            _ => Ok(self.value()? as f64),
        }
    }

    /// ASCII value without the trailing NUL.
    pub fn ascii(&self) -> String {
        let end = self.data.iter().position(|&b| b == 0).unwrap_or(self.data.len());
        String::from_utf8_lossy(&self.data[..end]).into_owned()
    }
}

/// A parsed directory.
#[derive(Debug, Clone)]
pub(crate) struct Ifd<'a> {
    entries: BTreeMap<u16, Entry<'a>>,
}

impl<'a> Ifd<'a> {
    pub fn get(&self, tag: u16) -> Option<&Entry<'a>> {
        self.entries.get(&tag)
    }

    pub fn value_or(&self, tag: u16, default: u32) -> Result<u32> {
        match self.get(tag) {
            Some(entry) => entry.value(),
            None => Ok(default),
        }
    }

    pub fn required(&self, tag: u16, name: &str) -> Result<&Entry<'a>> {
        self.get(tag)
            .ok_or_else(|| ImagingError::header(ImageFormat::Tiff, format!("missing {} tag", name)))
    }
}

/// Byte order and directory chain of a file.
#[derive(Debug)]
pub(crate) struct Directories<'a> {
    pub endian: Endian,
    pub ifds: Vec<Ifd<'a>>,
}

fn parse_ifd(data: &[u8], offset: usize, endian: Endian) -> Result<(Ifd<'_>, u32)> {
    let mut r = ByteReader::at(data, offset, endian)?;
    let count = r.u16()?;
    let mut entries = BTreeMap::new();
    for _ in 0..count {
        let tag = r.u16()?;
        let field_type = r.u16()?;
        let value_count = r.u32()?;
        let inline = r.bytes(4)?;
        let Some(size) = type_size(field_type) else {
            log::trace!("TIFF: skipping tag {} of unknown type {}", tag, field_type);
            continue;
        };
        let len = size
            .checked_mul(value_count as usize)
            .ok_or_else(|| ImagingError::header(ImageFormat::Tiff, "field too large"))?;
        let value = if len <= 4 {
            &inline[..len]
        } else {
            let at = ByteReader::new(inline, endian).u32()? as usize;
            ByteReader::at(data, at, endian)?.bytes(len)?
        };
        entries.insert(
            tag,
            Entry {
                field_type,
                count: value_count,
                data: value,
                endian,
            },
        );
    }
    let next = r.u32()?;
    Ok((Ifd { entries }, next))
}

/// Parse the header and every directory in the chain.
pub(crate) fn parse(data: &[u8]) -> Result<Directories<'_>> {
    let mut r = ByteReader::new(data, Endian::Little);
    let endian = match r.bytes(2)? {
        b"II" => Endian::Little,
        b"MM" => Endian::Big,
        _ => return Err(ImagingError::header(ImageFormat::Tiff, "bad byte order mark")),
    };
    r.set_endian(endian);
    match r.u16()? {
        42 => {}
        43 => return Err(ImagingError::feature(ImageFormat::Tiff, "BigTIFF")),
        other => {
            return Err(ImagingError::header(ImageFormat::Tiff, format!("magic number {}", other)));
        }
    }
    let mut offset = r.u32()?;
    let mut ifds = Vec::new();
    let mut seen = HashSet::new();
    while offset != 0 {
        if !seen.insert(offset) || ifds.len() >= MAX_DIRECTORIES {
            log::warn!("TIFF: directory chain loops at offset {}", offset);
            break;
        }
        let (ifd, next) = parse_ifd(data, offset as usize, endian)?;
        ifds.push(ifd);
        offset = next;
    }
    if ifds.is_empty() {
        return Err(ImagingError::header(ImageFormat::Tiff, "no image directory"));
    }
    Ok(Directories { endian, ifds })
}

/// Collects entries and lays out one directory at the end of a file.
#[derive(Debug, Default)]
pub(crate) struct IfdBuilder {
    entries: BTreeMap<u16, (u16, u32, Vec<u8>)>,
}

impl IfdBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn raw(&mut self, tag: u16, field_type: u16, count: u32, bytes: Vec<u8>) {
        self.entries.insert(tag, (field_type, count, bytes));
    }

    pub fn shorts(&mut self, tag: u16, values: &[u16]) {
        let mut w = ByteWriter::new(Endian::Little);
        values.iter().for_each(|&v| w.u16(v));
        self.raw(tag, SHORT, values.len() as u32, w.into_inner());
    }

    pub fn short(&mut self, tag: u16, value: u16) {
        self.shorts(tag, &[value]);
    }

    pub fn longs(&mut self, tag: u16, values: &[u32]) {
        let mut w = ByteWriter::new(Endian::Little);
        values.iter().for_each(|&v| w.u32(v));
        self.raw(tag, LONG, values.len() as u32, w.into_inner());
    }

    pub fn long(&mut self, tag: u16, value: u32) {
        self.longs(tag, &[value]);
    }

    pub fn rational(&mut self, tag: u16, numerator: u32, denominator: u32) {
        let mut w = ByteWriter::new(Endian::Little);
        w.u32(numerator);
        w.u32(denominator);
        self.raw(tag, RATIONAL, 1, w.into_inner());
    }

    pub fn ascii(&mut self, tag: u16, text: &str) {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        let count = bytes.len() as u32;
        self.raw(tag, ASCII, count, bytes);
    }

    pub fn undefined(&mut self, tag: u16, bytes: &[u8]) {
        self.raw(tag, UNDEFINED, bytes.len() as u32, bytes.to_vec());
    }

    /// Append out-of-line values and the directory to `out`, little endian.
    /// Returns the directory offset. The directory is the last thing written.
    pub fn write(self, out: &mut ByteWriter) -> u32 {
        let mut placed = Vec::with_capacity(self.entries.len());
        for (tag, (field_type, count, bytes)) in self.entries {
            if bytes.len() > 4 {
                if out.len() % 2 == 1 {
                    out.u8(0);
                }
                let at = out.len() as u32;
                out.bytes(&bytes);
                placed.push((tag, field_type, count, at.to_le_bytes().to_vec()));
            } else {
                let mut inline = bytes;
                inline.resize(4, 0);
                placed.push((tag, field_type, count, inline));
            }
        }
        if out.len() % 2 == 1 {
            out.u8(0);
        }
        let ifd_offset = out.len() as u32;
        out.u16(placed.len() as u16);
        for (tag, field_type, count, value) in placed {
            out.u16(tag);
            out.u16(field_type);
            out.u32(count);
            out.bytes(&value);
        }
        out.u32(0);
        ifd_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_then_parse() {
        let mut out = ByteWriter::new(Endian::Little);
        out.bytes(b"II");
        out.u16(42);
        out.u32(0);
        let mut builder = IfdBuilder::new();
        builder.long(256, 70_000);
        builder.shorts(258, &[8, 8, 8]);
        builder.rational(282, 150, 1);
        builder.ascii(305, "pixelcodec");
        let offset = builder.write(&mut out);
        out.set_u32_at(4, offset);
        let data = out.into_inner();
        assert_eq!(offset % 2, 0);
        assert_eq!(data.len(), offset as usize + 2 + 4 * 12 + 4);

        let dirs = parse(&data).unwrap();
        let ifd = &dirs.ifds[0];
        assert_eq!(ifd.get(256).unwrap().value().unwrap(), 70_000);
        assert_eq!(ifd.get(258).unwrap().values().unwrap(), vec![8, 8, 8]);
        assert_eq!(ifd.get(282).unwrap().rational().unwrap(), 150.0);
        assert_eq!(ifd.get(305).unwrap().ascii(), "pixelcodec");
        assert!(ifd.required(257, "ImageLength").is_err());
    }

    #[test]
    fn test_big_endian_header() {
        let data = [b'M', b'M', 0, 42, 0, 0, 0, 8, 0, 1, 1, 0, 0, 3, 0, 0, 0, 1, 0, 9, 0, 0, 0, 0, 0, 0];
        let dirs = parse(&data).unwrap();
        assert_eq!(dirs.endian, Endian::Big);
        assert_eq!(dirs.ifds[0].get(256).unwrap().value().unwrap(), 9);
    }

    #[test]
    fn test_truncated_directory() {
        let data = [b'I', b'I', 42, 0, 8, 0, 0, 0, 3, 0];
        assert!(parse(&data).unwrap_err().is_truncation());
    }
}
