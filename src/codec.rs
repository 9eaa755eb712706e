//! Row wire format: a 4 byte header followed by one 8 byte entry per column,
//! each entry a little-endian `u32` color and a little-endian `u32` owner index.

use crate::{
    board::Cell,
    error::DecodeError,
};

pub const ROW_HEADER_LEN: usize = 4;
pub const CELL_ENTRY_LEN: usize = 8;

pub const fn encoded_row_len(width: usize) -> usize {
    ROW_HEADER_LEN + CELL_ENTRY_LEN * width
}

/// Header carries the column count, the same way a length-prefixed vector is laid out
/// on the ledger. Decoders ignore it.
pub fn encode_row(cells: &[Cell]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(encoded_row_len(cells.len()));
    buf.extend_from_slice(&(cells.len() as u32).to_le_bytes());
    for cell in cells {
        buf.extend_from_slice(&cell.color.to_le_bytes());
        buf.extend_from_slice(&cell.owner.to_le_bytes());
    }
    buf
}

pub fn decode_row(bytes: &[u8], width: usize) -> Result<Vec<Cell>, DecodeError> {
    let expected = encoded_row_len(width);
    if bytes.len() != expected {
        return Err(DecodeError::Length {
            expected,
            actual: bytes.len(),
        });
    }
    let cells = bytes[ROW_HEADER_LEN..]
        .chunks_exact(CELL_ENTRY_LEN)
        .map(|entry| Cell {
            color: u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]),
            owner: u32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]),
        })
        .collect();
    Ok(cells)
}
