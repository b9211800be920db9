//! Frame state and entropy-coded scan decoding (sequential and progressive).

use crate::error::{ImagingError, Result};
use crate::io::{ByteReader, Endian, MsbBitReader};

use super::super::ImageFormat;
use super::huffman::{receive_extend, HuffmanTable};
use super::ZIGZAG;

/// One coefficient block in zigzag-natural order.
pub(super) type Block = [i16; 64];

#[derive(Debug, Clone)]
pub(super) struct Component {
    pub id: u8,
    pub h: usize,
    pub v: usize,
    pub quant_table: usize,
    /// Blocks per line and per column, padded to whole MCUs.
    pub blocks_w: usize,
    pub blocks_h: usize,
    pub coefficients: Vec<Block>,
}

#[derive(Debug, Clone)]
pub(super) struct Frame {
    pub width: u32,
    pub height: u32,
    pub progressive: bool,
    pub components: Vec<Component>,
    pub max_h: usize,
    pub max_v: usize,
    pub mcus_x: usize,
    pub mcus_y: usize,
}

impl Frame {
    /// Parse a SOF0/1/2 segment body.
    pub fn parse(body: &[u8], progressive: bool) -> Result<Self> {
        let mut r = ByteReader::new(body, Endian::Big);
        let precision = r.u8()?;
        if precision != 8 {
            return Err(ImagingError::feature(ImageFormat::Jpeg, format!("{}-bit samples", precision)));
        }
        let height = r.u16()? as u32;
        let width = r.u16()? as u32;
        if height == 0 {
            return Err(ImagingError::feature(ImageFormat::Jpeg, "height defined by DNL marker"));
        }
        let count = r.u8()? as usize;
        if !matches!(count, 1 | 3 | 4) {
            return Err(ImagingError::feature(ImageFormat::Jpeg, format!("{} color components", count)));
        }
        let mut components = Vec::with_capacity(count);
        for _ in 0..count {
            let id = r.u8()?;
            let sampling = r.u8()?;
            let quant_table = r.u8()? as usize;
            let (h, v) = ((sampling >> 4) as usize, (sampling & 15) as usize);
            if !(1..=4).contains(&h) || !(1..=4).contains(&v) || quant_table > 3 {
                return Err(ImagingError::header(
                    ImageFormat::Jpeg,
                    format!("component {} sampling {}x{} table {}", id, h, v, quant_table),
                ));
            }
            components.push(Component {
                id,
                h,
                v,
                quant_table,
                blocks_w: 0,
                blocks_h: 0,
                coefficients: Vec::new(),
            });
        }
        let max_h = components.iter().map(|c| c.h).max().unwrap_or(1);
        let max_v = components.iter().map(|c| c.v).max().unwrap_or(1);
        Ok(Self {
            width,
            height,
            progressive,
            mcus_x: (width as usize).div_ceil(8 * max_h),
            mcus_y: (height as usize).div_ceil(8 * max_v),
            components,
            max_h,
            max_v,
        })
    }

    /// Allocate coefficient storage once dimensions have been checked.
    pub fn allocate(&mut self) {
        for c in &mut self.components {
            c.blocks_w = self.mcus_x * c.h;
            c.blocks_h = self.mcus_y * c.v;
            c.coefficients = vec![[0i16; 64]; c.blocks_w * c.blocks_h];
        }
    }

    /// Blocks covering the visible part of a component, used by
    /// non-interleaved scans.
    fn visible_blocks(&self, c: &Component) -> (usize, usize) {
        let w = (self.width as usize * c.h).div_ceil(self.max_h);
        let h = (self.height as usize * c.v).div_ceil(self.max_v);
        (w.div_ceil(8), h.div_ceil(8))
    }
}

/// Header of one SOS segment.
#[derive(Debug, Clone)]
pub(super) struct ScanHeader {
    /// Frame component index with its DC and AC table selectors.
    pub components: Vec<(usize, usize, usize)>,
    pub start: usize,
    pub end: usize,
    pub high: u8,
    pub low: u8,
}

impl ScanHeader {
    pub fn parse(body: &[u8], frame: &Frame) -> Result<Self> {
        let mut r = ByteReader::new(body, Endian::Big);
        let count = r.u8()? as usize;
        if count == 0 || count > 4 {
            return Err(ImagingError::header(ImageFormat::Jpeg, format!("scan with {} components", count)));
        }
        let mut components = Vec::with_capacity(count);
        for _ in 0..count {
            let id = r.u8()?;
            let tables = r.u8()?;
            let index = frame
                .components
                .iter()
                .position(|c| c.id == id)
                .ok_or_else(|| ImagingError::header(ImageFormat::Jpeg, format!("scan names unknown component {}", id)))?;
            components.push((index, (tables >> 4) as usize, (tables & 15) as usize));
        }
        let start = r.u8()? as usize;
        let end = r.u8()? as usize;
        let approx = r.u8()?;
        let scan = Self {
            components,
            start,
            end,
            high: approx >> 4,
            low: approx & 15,
        };
        let valid = if frame.progressive {
            scan.start <= scan.end
                && scan.end < 64
                && (scan.start == 0) == (scan.end == 0)
                && (scan.start == 0 || scan.components.len() == 1)
                && scan.low < 14
        } else {
            scan.start == 0 && scan.end == 63
        };
        if !valid {
            return Err(ImagingError::data(
                ImageFormat::Jpeg,
                format!("bad spectral selection {}..={} / {}:{}", scan.start, scan.end, scan.high, scan.low),
            ));
        }
        Ok(scan)
    }
}

/// Huffman tables currently installed, by class and slot.
#[derive(Debug, Clone, Default)]
pub(super) struct Tables {
    pub dc: [Option<HuffmanTable>; 4],
    pub ac: [Option<HuffmanTable>; 4],
}

impl Tables {
    fn dc(&self, slot: usize) -> Result<&HuffmanTable> {
        self.dc
            .get(slot)
            .and_then(Option::as_ref)
            .ok_or_else(|| ImagingError::data(ImageFormat::Jpeg, format!("missing DC table {}", slot)))
    }

    fn ac(&self, slot: usize) -> Result<&HuffmanTable> {
        self.ac
            .get(slot)
            .and_then(Option::as_ref)
            .ok_or_else(|| ImagingError::data(ImageFormat::Jpeg, format!("missing AC table {}", slot)))
    }
}

/// Entropy-coded data following an SOS header, with stuffed bytes removed
/// and split at restart markers. Returns the intervals and the offset of the
/// marker that ends the scan.
pub(super) fn entropy_intervals(data: &[u8], start: usize) -> Result<(Vec<Vec<u8>>, usize)> {
    let mut intervals = vec![Vec::new()];
    let mut pos = start;
    loop {
        let byte = *data
            .get(pos)
            .ok_or_else(|| ImagingError::truncated("JPEG entropy-coded data ends without a marker"))?;
        if byte != 0xFF {
            if let Some(current) = intervals.last_mut() {
                current.push(byte);
            }
            pos += 1;
            continue;
        }
        let next = *data
            .get(pos + 1)
            .ok_or_else(|| ImagingError::truncated("JPEG entropy-coded data ends inside a marker"))?;
        match next {
            0x00 => {
                if let Some(current) = intervals.last_mut() {
                    current.push(0xFF);
                }
                pos += 2;
            }
            0xFF => pos += 1,
            0xD0..=0xD7 => {
                intervals.push(Vec::new());
                pos += 2;
            }
            _ => return Ok((intervals, pos)),
        }
    }
}

struct ScanState<'a> {
    intervals: std::slice::Iter<'a, Vec<u8>>,
    bits: MsbBitReader<'a>,
    restart_interval: usize,
    units_left: usize,
    predictors: [i32; 4],
    eob_run: u32,
}

impl<'a> ScanState<'a> {
    fn new(intervals: &'a [Vec<u8>], restart_interval: usize) -> Self {
        let mut iter = intervals.iter();
        let first = iter.next().map_or(&[][..], |v| &v[..]);
        Self {
            intervals: iter,
            bits: MsbBitReader::new(first),
            restart_interval,
            units_left: restart_interval,
            predictors: [0; 4],
            eob_run: 0,
        }
    }

    /// Called before each MCU (or block in a non-interleaved scan).
    fn next_unit(&mut self) -> Result<()> {
        if self.restart_interval == 0 {
            return Ok(());
        }
        if self.units_left == 0 {
            let next = self
                .intervals
                .next()
                .ok_or_else(|| ImagingError::data(ImageFormat::Jpeg, "missing restart marker"))?;
            self.bits = MsbBitReader::new(next);
            self.units_left = self.restart_interval;
            self.predictors = [0; 4];
            self.eob_run = 0;
        }
        self.units_left -= 1;
        Ok(())
    }
}

fn clamp16(v: i32) -> i16 {
    v.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Decode one scan's worth of coefficients into `frame`.
pub(super) fn decode_scan(
    frame: &mut Frame,
    scan: &ScanHeader,
    tables: &Tables,
    intervals: &[Vec<u8>],
    restart_interval: usize,
) -> Result<()> {
    let mut state = ScanState::new(intervals, restart_interval);
    let progressive = frame.progressive;

    if scan.components.len() == 1 {
        let (ci, dc, ac) = scan.components[0];
        let (bw, bh) = frame.visible_blocks(&frame.components[ci]);
        for by in 0..bh {
            for bx in 0..bw {
                state.next_unit()?;
                let stride = frame.components[ci].blocks_w;
                let block = &mut frame.components[ci].coefficients[by * stride + bx];
                decode_block(block, ci, dc, ac, scan, tables, &mut state, progressive)?;
            }
        }
        return Ok(());
    }

    for my in 0..frame.mcus_y {
        for mx in 0..frame.mcus_x {
            state.next_unit()?;
            for &(ci, dc, ac) in &scan.components {
                let c = &mut frame.components[ci];
                for v in 0..c.v {
                    for h in 0..c.h {
                        let index = (my * c.v + v) * c.blocks_w + mx * c.h + h;
                        let block = &mut c.coefficients[index];
                        decode_block(block, ci, dc, ac, scan, tables, &mut state, progressive)?;
                    }
                }
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn decode_block(
    block: &mut Block,
    ci: usize,
    dc: usize,
    ac: usize,
    scan: &ScanHeader,
    tables: &Tables,
    state: &mut ScanState<'_>,
    progressive: bool,
) -> Result<()> {
    if !progressive {
        decode_dc_first(block, ci, tables.dc(dc)?, 0, state)?;
        return decode_ac_first(block, tables.ac(ac)?, 1, 63, 0, state);
    }
    match (scan.start, scan.high) {
        (0, 0) => decode_dc_first(block, ci, tables.dc(dc)?, scan.low, state),
        (0, _) => {
            if state.bits.read_bits(1)? == 1 {
                block[0] |= 1 << scan.low;
            }
            Ok(())
        }
        (_, 0) => decode_ac_first(block, tables.ac(ac)?, scan.start, scan.end, scan.low, state),
        _ => decode_ac_refine(block, tables.ac(ac)?, scan.start, scan.end, scan.low, state),
    }
}

fn decode_dc_first(block: &mut Block, ci: usize, table: &HuffmanTable, low: u8, state: &mut ScanState<'_>) -> Result<()> {
    let size = table.decode(&mut state.bits)?;
    let diff = receive_extend(&mut state.bits, size)?;
    let predictor = &mut state.predictors[ci];
    *predictor += diff;
    block[0] = clamp16(*predictor << low);
    Ok(())
}

fn decode_ac_first(
    block: &mut Block,
    table: &HuffmanTable,
    start: usize,
    end: usize,
    low: u8,
    state: &mut ScanState<'_>,
) -> Result<()> {
    if state.eob_run > 0 {
        state.eob_run -= 1;
        return Ok(());
    }
    let mut k = start;
    while k <= end {
        let symbol = table.decode(&mut state.bits)?;
        let run = (symbol >> 4) as usize;
        let size = symbol & 15;
        if size == 0 {
            if run < 15 {
                state.eob_run = (1u32 << run) - 1;
                if run > 0 {
                    state.eob_run += state.bits.read_bits(run as u8)?;
                }
                break;
            }
            k += 16;
            continue;
        }
        k += run;
        if k > end {
            return Err(ImagingError::data(ImageFormat::Jpeg, "coefficient run past end of block"));
        }
        let value = receive_extend(&mut state.bits, size)?;
        block[ZIGZAG[k] as usize] = clamp16(value * (1 << low));
        k += 1;
    }
    Ok(())
}

fn decode_ac_refine(
    block: &mut Block,
    table: &HuffmanTable,
    start: usize,
    end: usize,
    low: u8,
    state: &mut ScanState<'_>,
) -> Result<()> {
    let plus = 1i16 << low;
    let minus = -1i16 << low;
    let mut k = start;

    let refine = |coef: &mut i16, bits: &mut MsbBitReader<'_>| -> Result<()> {
        if bits.read_bits(1)? == 1 && *coef & plus == 0 {
            *coef += if *coef >= 0 { plus } else { minus };
        }
        Ok(())
    };

    if state.eob_run == 0 {
        while k <= end {
            let symbol = table.decode(&mut state.bits)?;
            let mut run = (symbol >> 4) as i32;
            let size = symbol & 15;
            let mut value = 0i16;
            if size == 0 {
                if run < 15 {
                    state.eob_run = 1u32 << run;
                    if run > 0 {
                        state.eob_run += state.bits.read_bits(run as u8)?;
                    }
                    break;
                }
            } else {
                if size != 1 {
                    return Err(ImagingError::data(ImageFormat::Jpeg, "refinement coefficient larger than one bit"));
                }
                value = if state.bits.read_bits(1)? == 1 { plus } else { minus };
            }
            while k <= end {
                let z = ZIGZAG[k] as usize;
                if block[z] != 0 {
                    refine(&mut block[z], &mut state.bits)?;
                } else {
                    if run == 0 {
                        break;
                    }
                    run -= 1;
                }
                k += 1;
            }
            if value != 0 && k <= end {
                block[ZIGZAG[k] as usize] = value;
            }
            k += 1;
        }
    }
    if state.eob_run > 0 {
        while k <= end {
            let z = ZIGZAG[k] as usize;
            if block[z] != 0 {
                refine(&mut block[z], &mut state.bits)?;
            }
            k += 1;
        }
        state.eob_run -= 1;
    }
    Ok(())
}
