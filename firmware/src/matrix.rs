//! Switch matrix wiring of the Teensy 2.0 board.
//!
//! Columns are on PB0-PB3, PD2 and PD3; rows are on PF0, PF1, PF4-PF7 and
//! PB6. Idle lines are inputs with pull-ups, a driven line is pulled low,
//! so a line reads active when it is low.

use matrixkb_core::{KeyMatrix, LineMap};

use crate::gpio::{Pin, B0, B1, B2, B3, B6, D2, D3, F0, F1, F4, F5, F6, F7};

const COL_PINS: [Pin; 6] = [B0, B1, B2, B3, D2, D3];
const ROW_PINS: [Pin; 7] = [F0, F1, F4, F5, F6, F7, B6];

pub struct BoardMatrix;

fn read_lines(pins: &[Pin]) -> LineMap {
    let mut lines = LineMap::new();
    for (n, pin) in pins.iter().enumerate() {
        if pin.is_low() {
            lines.set(n);
        }
    }
    lines
}

impl KeyMatrix for BoardMatrix {
    const COLS: u8 = COL_PINS.len() as u8;
    const ROWS: u8 = ROW_PINS.len() as u8;

    fn prepare(&mut self) {
        for pin in COL_PINS.iter().chain(ROW_PINS.iter()) {
            pin.release();
        }
    }

    fn prepare_col_scan(&mut self, col: u8) {
        for pin in COL_PINS {
            pin.release();
        }
        COL_PINS[col as usize].drive_low();
    }

    fn prepare_row_scan(&mut self, row: u8) {
        for pin in COL_PINS {
            pin.release();
        }
        ROW_PINS[row as usize].drive_low();
    }

    fn finish_row_scan(&mut self) {
        for pin in ROW_PINS {
            pin.release();
        }
    }

    fn read_rows(&mut self) -> LineMap {
        read_lines(&ROW_PINS)
    }

    fn read_cols(&mut self) -> LineMap {
        read_lines(&COL_PINS)
    }
}
