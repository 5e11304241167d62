use super::FieldReader;
use crate::error::DecodeError;
use crate::frame::RawFrame;
use serde::Serialize;

/// Command byte of a cell voltages frame
pub(crate) const COMMAND: u8 = 0x04;

/// Per-cell voltage readings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CellState {
    /// Number of cells in the pack
    pub numcells: u16,
    /// The voltage of each cell in mV, in cell order
    pub cells: Vec<i16>,
}

impl CellState {
    /// The length field at offset 2 counts bytes; each cell is two bytes.
    pub(crate) fn decode(frame: &RawFrame) -> Result<Self, DecodeError> {
        let reader = FieldReader::new(frame);
        let raw = reader.i16_be(2)? / 2;
        // A negative cell count is a malformed length, reported like any
        // other failed bounds check.
        let numcells = u16::try_from(raw).map_err(|_| reader.truncated(4))?;

        let mut cells = Vec::with_capacity(usize::from(numcells));
        for i in 0..usize::from(numcells) {
            cells.push(reader.i16_be(4 + i * 2)?);
        }

        Ok(Self { numcells, cells })
    }
}

#[test]
fn test_decode_cell_state() {
    let mut bytes = vec![0xdd, COMMAND, 0x00, 0x10];
    for mv in [3301i16, 3302, 3303, 3304, 3305, 3306, 3307, 3308] {
        bytes.extend_from_slice(&mv.to_be_bytes());
    }
    bytes.push(0x77);

    let state = CellState::decode(&super::test_frame(&bytes)).unwrap();
    assert_eq!(state.numcells, 8);
    assert_eq!(
        state.cells,
        vec![3301, 3302, 3303, 3304, 3305, 3306, 3307, 3308]
    );
}

#[test]
fn test_decode_cell_state_missing_cells() {
    // Claims eight cells, carries two
    let frame = super::test_frame(&[
        0xdd, COMMAND, 0x00, 0x10, 0x0c, 0xe5, 0x0c, 0xe6, 0x77,
    ]);
    let err = CellState::decode(&frame).unwrap_err();
    assert!(matches!(err, DecodeError::Truncated { command: 0x04, .. }));
}

#[test]
fn test_decode_negative_cell_count() {
    let frame = super::test_frame(&[0xdd, COMMAND, 0xff, 0xfe, 0x00, 0x77]);
    let err = CellState::decode(&frame).unwrap_err();
    assert!(matches!(err, DecodeError::Truncated { .. }));
}
