//! # The ``.flo`` Binary Format
//!
//! Layout: the f32 magic `202021.25` (reads as "PIEH" in ASCII), i32
//! width, i32 height, then row-major little-endian `(dx, dy)` f32 pairs.
//!
//! [`decode`] of [`encode`] output is bit-identical; format violations
//! are reported separately from I/O failures.

use crate::flowio::FlowField;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

/// File tag; the float value of the ASCII bytes "PIEH".
pub const FLO_MAGIC: f32 = 202021.25;

/// Upper bound on sane header dimensions, as in the reference codec.
pub const MAX_DIMENSION: i32 = 99_999;

/// Flow-file codec failure.
#[derive(Debug, Error)]
pub enum FloCodecError {
    /// The header tag did not match [`FLO_MAGIC`].
    #[error("bad flow file magic: expected {FLO_MAGIC}, found {found}")]
    BadMagic {
        /// The tag actually present.
        found: f32,
    },

    /// The header dimensions were non-positive or implausibly large.
    #[error("bad flow file dimensions: {width}x{height}")]
    BadDimensions {
        /// Header width.
        width: i32,
        /// Header height.
        height: i32,
    },

    /// An underlying I/O failure, distinct from format violations.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Serialize a flow field into the ``.flo`` layout.
pub fn encode<W: Write>(
    flow: &FlowField,
    writer: &mut W,
) -> Result<(), FloCodecError> {
    writer.write_all(&FLO_MAGIC.to_le_bytes())?;
    writer.write_all(&(flow.width() as i32).to_le_bytes())?;
    writer.write_all(&(flow.height() as i32).to_le_bytes())?;
    for value in flow.data() {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

/// Deserialize a flow field from the ``.flo`` layout.
pub fn decode<R: Read>(reader: &mut R) -> Result<FlowField, FloCodecError> {
    let magic = read_f32(reader)?;
    if magic.to_bits() != FLO_MAGIC.to_bits() {
        return Err(FloCodecError::BadMagic { found: magic });
    }

    let width = read_i32(reader)?;
    let height = read_i32(reader)?;
    if width <= 0 || height <= 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(FloCodecError::BadDimensions { width, height });
    }

    let count = (width as usize) * (height as usize) * 2;
    let mut data = Vec::with_capacity(count);
    for _ in 0..count {
        data.push(read_f32(reader)?);
    }

    Ok(FlowField::new(width as usize, height as usize, data))
}

/// Write a flow field to a ``.flo`` file.
pub fn write_flow_file<P: AsRef<Path>>(
    flow: &FlowField,
    path: P,
) -> Result<(), FloCodecError> {
    let mut writer = BufWriter::new(File::create(path)?);
    encode(flow, &mut writer)?;
    writer.flush()?;
    Ok(())
}

/// Read a flow field from a ``.flo`` file.
pub fn read_flow_file<P: AsRef<Path>>(path: P) -> Result<FlowField, FloCodecError> {
    let mut reader = BufReader::new(File::open(path)?);
    decode(&mut reader)
}

fn read_f32<R: Read>(reader: &mut R) -> Result<f32, FloCodecError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(f32::from_le_bytes(buf))
}

fn read_i32<R: Read>(reader: &mut R) -> Result<i32, FloCodecError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}
