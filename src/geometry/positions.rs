//! Channel position sources
//!
//! Kilosort writes channel positions as `channel_positions.npy`, an
//! `(n_channels, 2)` array. Only the small subset of the NPY format that
//! kilosort produces is read here.

use std::fs;
use std::path::Path;

use crate::error::{QcError, Result};
use crate::geometry::labeler::ChannelGeometry;

pub const CHANNEL_POSITIONS_FILE: &str = "channel_positions.npy";

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// Anything that can produce the channel geometry for a staged directory.
pub trait GeometrySource {
    fn channel_geometry(&self, ks_dir: &Path) -> Result<ChannelGeometry>;
}

/// Fixed geometry, independent of the directory asked about.
impl GeometrySource for ChannelGeometry {
    fn channel_geometry(&self, _ks_dir: &Path) -> Result<ChannelGeometry> {
        Ok(self.clone())
    }
}

/// Reads `channel_positions.npy` from a kilosort output directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct KilosortGeometry;

impl GeometrySource for KilosortGeometry {
    fn channel_geometry(&self, ks_dir: &Path) -> Result<ChannelGeometry> {
        let path = ks_dir.join(CHANNEL_POSITIONS_FILE);
        let bytes = fs::read(&path).map_err(|e| QcError::GeometryRead {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let positions = parse_positions(&bytes).map_err(|reason| QcError::GeometryRead {
            path: path.clone(),
            reason,
        })?;
        Ok(ChannelGeometry::new(positions).with_source(ks_dir))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Dtype {
    F8,
    F4,
    I8,
    I4,
}

impl Dtype {
    fn parse(descr: &str) -> std::result::Result<Self, String> {
        match descr {
            "<f8" => Ok(Dtype::F8),
            "<f4" => Ok(Dtype::F4),
            "<i8" => Ok(Dtype::I8),
            "<i4" => Ok(Dtype::I4),
            other => Err(format!("unsupported dtype '{}'", other)),
        }
    }

    fn width(&self) -> usize {
        match self {
            Dtype::F8 | Dtype::I8 => 8,
            Dtype::F4 | Dtype::I4 => 4,
        }
    }

    fn read(&self, b: &[u8]) -> f64 {
        match self {
            Dtype::F8 => f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]),
            Dtype::F4 => f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
            Dtype::I8 => i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f64,
            Dtype::I4 => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
        }
    }
}

#[derive(Debug, PartialEq)]
struct Header {
    dtype: Dtype,
    fortran_order: bool,
    shape: Vec<usize>,
}

/// Value following `'key':` in the header dict, up to the next top-level comma.
fn header_field<'a>(header: &'a str, key: &str) -> std::result::Result<&'a str, String> {
    let needle = format!("'{}':", key);
    let start = header
        .find(&needle)
        .ok_or_else(|| format!("header has no '{}'", key))?
        + needle.len();
    let rest = header[start..].trim_start();
    let end = if rest.starts_with('(') {
        rest.find(')').map(|i| i + 1)
    } else {
        rest.find(|c: char| c == ',' || c == '}')
    }
    .ok_or_else(|| format!("malformed '{}' in header", key))?;
    Ok(rest[..end].trim())
}

fn parse_header(header: &str) -> std::result::Result<Header, String> {
    let descr = header_field(header, "descr")?.trim_matches(|c: char| c == '\'' || c == '"');
    let fortran_order = match header_field(header, "fortran_order")? {
        "True" => true,
        "False" => false,
        other => return Err(format!("bad fortran_order '{}'", other)),
    };
    let shape = header_field(header, "shape")?
        .trim_matches(|c: char| c == '(' || c == ')')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().map_err(|e| format!("bad shape '{}': {}", s, e)))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Header {
        dtype: Dtype::parse(descr)?,
        fortran_order,
        shape,
    })
}

/// Decode an `(n, k >= 2)` NPY array into (x, y) rows.
pub fn parse_positions(bytes: &[u8]) -> std::result::Result<Vec<[f64; 2]>, String> {
    if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
        return Err("not an NPY file".to_string());
    }
    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 if bytes.len() >= 12 => (
            u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
            12,
        ),
        _ => return Err(format!("unsupported NPY version {}", major)),
    };
    let data_start = header_start + header_len;
    let header = bytes
        .get(header_start..data_start)
        .ok_or_else(|| "truncated NPY header".to_string())?;
    let header = std::str::from_utf8(header).map_err(|e| e.to_string())?;
    let header = parse_header(header)?;

    let (rows, cols) = match header.shape.as_slice() {
        [rows, cols] if *cols >= 2 => (*rows, *cols),
        other => return Err(format!("expected shape (n, 2), got {:?}", other)),
    };

    let width = header.dtype.width();
    let needed = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(width))
        .ok_or_else(|| format!("shape too large: ({}, {})", rows, cols))?;
    let data = bytes
        .get(data_start..)
        .ok_or_else(|| "truncated NPY header".to_string())?;
    if data.len() < needed {
        return Err(format!(
            "truncated NPY data: {} bytes for {}x{} values",
            data.len(),
            rows,
            cols
        ));
    }

    let at = |r: usize, c: usize| {
        let index = if header.fortran_order {
            c * rows + r
        } else {
            r * cols + c
        };
        header.dtype.read(&data[index * width..(index + 1) * width])
    };
    Ok((0..rows).map(|r| [at(r, 0), at(r, 1)]).collect())
}
