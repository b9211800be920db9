//! PackBits run-length coding (TIFF compression 32773, PSD).

use crate::error::{ImagingError, Result};

/// Decode PackBits runs until `expected` bytes are produced.
///
/// Returns the decoded bytes and the number of input bytes consumed.
pub(crate) fn decode(data: &[u8], expected: usize) -> Result<(Vec<u8>, usize)> {
    let mut out = Vec::with_capacity(expected);
    let mut pos = 0;
    let short = || ImagingError::truncated("PackBits run ended early");
    while out.len() < expected {
        let header = *data.get(pos).ok_or_else(short)? as i8;
        pos += 1;
        match header {
            0..=127 => {
                let n = header as usize + 1;
                let run = data.get(pos..pos + n).ok_or_else(short)?;
                out.extend_from_slice(run);
                pos += n;
            }
            -127..=-1 => {
                let value = *data.get(pos).ok_or_else(short)?;
                pos += 1;
                out.resize(out.len() + (1 - header as isize) as usize, value);
            }
            -128 => {}
        }
    }
    out.truncate(expected);
    Ok((out, pos))
}

/// Encode one row. Runs never cross the end of `row`.
pub(crate) fn encode(row: &[u8], out: &mut Vec<u8>) {
    let mut i = 0;
    while i < row.len() {
        let mut run = 1;
        while i + run < row.len() && run < 128 && row[i + run] == row[i] {
            run += 1;
        }
        if run >= 2 {
            out.push((1 - run as isize) as i8 as u8);
            out.push(row[i]);
            i += run;
            continue;
        }
        let start = i;
        while i < row.len() && i - start < 128 {
            if i + 1 < row.len() && row[i] == row[i + 1] {
                break;
            }
            i += 1;
        }
        if i == start {
            i += 1;
        }
        out.push((i - start - 1) as u8);
        out.extend_from_slice(&row[start..i]);
    }
}
