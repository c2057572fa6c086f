//! Key matrix scanning.
//!
//! A board describes its wiring by implementing [`KeyMatrix`]. Columns are
//! the driven lines of a normal scan and rows are sampled, but the ghost
//! resolver also needs the reverse direction (drive a row, sample the
//! columns), so both are part of the trait.

use embedded_hal::delay::DelayNs;

use crate::bitmap::{Bitmap, LineMap};

/// Settle time between driving a line and sampling the orthogonal lines.
pub const SETTLE_US: u32 = 5;

/// Most lines a [`LineMap`] can describe in either direction.
pub const MAX_LINES: u8 = 32;

/// Register-level access to a switch matrix.
///
/// A line reads as "active" when a pressed switch connects it to the line
/// currently being driven.
pub trait KeyMatrix {
    const COLS: u8;
    const ROWS: u8;

    /// Put every line into its idle (input, pulled-up) state.
    fn prepare(&mut self);

    /// Drive `col` and leave every other line as an input.
    fn prepare_col_scan(&mut self, col: u8);

    /// Drive `row` and leave every other line as an input.
    fn prepare_row_scan(&mut self, row: u8);

    /// Return the rows to inputs after a row scan. Always called before the
    /// next [`KeyMatrix::prepare_col_scan`].
    fn finish_row_scan(&mut self);

    /// Sample the row lines; bit `n` set means row `n` is active.
    fn read_rows(&mut self) -> LineMap;

    /// Sample the column lines; bit `n` set means column `n` is active.
    fn read_cols(&mut self) -> LineMap;
}

/// Position of `(col, row)` in a key map for a matrix with `cols` columns.
#[inline]
pub const fn key_index(cols: u8, col: u8, row: u8) -> usize {
    row as usize * cols as usize + col as usize
}

/// Drive one column and sample the rows once they settle.
pub fn sample_col<M: KeyMatrix, D: DelayNs>(matrix: &mut M, delay: &mut D, col: u8) -> LineMap {
    matrix.prepare_col_scan(col);
    delay.delay_us(SETTLE_US);
    matrix.read_rows()
}

/// Drive one row and sample the columns once they settle.
pub fn sample_row<M: KeyMatrix, D: DelayNs>(matrix: &mut M, delay: &mut D, row: u8) -> LineMap {
    matrix.prepare_row_scan(row);
    delay.delay_us(SETTLE_US);
    let cols = matrix.read_cols();
    matrix.finish_row_scan();
    cols
}

/// Scan every column into `map` (which is cleared first) and return the
/// number of positions detected as pressed.
///
/// This is the raw electrical view: ghosted positions are included.
pub fn scan_matrix<M: KeyMatrix, D: DelayNs, const BYTES: usize>(
    matrix: &mut M,
    delay: &mut D,
    map: &mut Bitmap<BYTES>,
) -> usize {
    map.clear();
    let mut pressed = 0;
    for col in 0..M::COLS {
        let rows = sample_col(matrix, delay, col);
        for row in 0..M::ROWS {
            if rows.get(row as usize) {
                pressed += 1;
                map.set(key_index(M::COLS, col, row));
            }
        }
    }
    pressed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{NoDelay, SimMatrix};

    type Sim = SimMatrix<4, 3>;

    fn detected(sim: &mut Sim) -> (Bitmap<2>, usize) {
        let mut map = Bitmap::new();
        let count = scan_matrix(sim, &mut NoDelay, &mut map);
        (map, count)
    }

    #[test]
    fn test_single_keys() {
        let mut sim = Sim::new();
        sim.press(1, 2);
        sim.press(3, 0);
        let (map, count) = detected(&mut sim);
        assert_eq!(count, 2);
        assert!(map.get(key_index(4, 1, 2)));
        assert!(map.get(key_index(4, 3, 0)));
        assert_eq!(map.count_ones(), 2);
    }

    #[test]
    fn test_three_corners_ghost_the_fourth() {
        // Every choice of released corner is reproduced as a ghost.
        let corners = [(0, 0), (0, 2), (3, 0), (3, 2)];
        for released in 0..4 {
            let mut sim = Sim::new();
            for (n, &(c, r)) in corners.iter().enumerate() {
                if n != released {
                    sim.press(c, r);
                }
            }
            let (map, count) = detected(&mut sim);
            assert_eq!(count, 4, "released corner {}", released);
            for &(c, r) in &corners {
                assert!(map.get(key_index(4, c, r)));
            }
        }
    }

    #[test]
    fn test_diode_prevents_ghost_on_opposite_corner() {
        let mut sim = Sim::new();
        sim.press(0, 0);
        sim.press(0, 1);
        sim.press(2, 0);
        // (2, 1) would be ghosted through (0, 0) without the diode.
        sim.add_diode(0, 0);
        let (map, count) = detected(&mut sim);
        assert_eq!(count, 3);
        assert!(!map.get(key_index(4, 2, 1)));
    }

    #[test]
    fn test_row_sample() {
        let mut sim = Sim::new();
        sim.press(1, 1);
        sim.press(2, 1);
        let cols = sample_row(&mut sim, &mut NoDelay, 1);
        assert!(cols.get(1));
        assert!(cols.get(2));
        assert!(!cols.get(0));
        assert!(!sample_row(&mut sim, &mut NoDelay, 0).get(1));
    }
}
