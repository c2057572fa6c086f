//! Key state tracking with diode-aware ghost resolution.
//!
//! On a matrix without a diode per switch, three pressed corners of a
//! rectangle make the fourth corner read as pressed too. A diode on a
//! switch stops current flowing from its column back into its row, so a
//! diode on one corner guarantees the *opposite* corner cannot be a ghost.
//! [`DiodeKeyboard`] uses the board's diode map to decide which corners of a
//! detected rectangle are certain, probes the matrix again where that can
//! settle the question, and otherwise falls back to blocking: a corner that
//! cannot be proven is only reported if it was already reported by the
//! previous scan.

use core::fmt;

use embedded_hal::delay::DelayNs;
use log::{debug, trace};

use crate::bitmap::Bitmap;
use crate::matrix::{key_index, sample_col, sample_row, scan_matrix, KeyMatrix, MAX_LINES};
use crate::report::KeyReport;

/// Most rectangles resolved individually in one scan. Any further
/// rectangle is blocked outright.
pub const MAX_RECTS: usize = 4;

/// Fewest pressed keys that can form a rectangle.
const MIN_GHOST_KEYS: usize = 4;

/// A keyboard that can be scanned for changes and flattened into a report.
pub trait Keyboard {
    /// Get the lines ready for scanning. Call once before the first scan.
    fn prepare(&mut self);

    /// Scan all keys. Returns true if the reported key state changed since
    /// the previous call.
    ///
    /// Callers should wait 2 to 5 ms between calls so key bounce is not
    /// seen as a change.
    fn scan_keys(&mut self) -> bool;

    /// Flatten the reported key state into a boot keyboard report.
    fn state(&self) -> KeyReport;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyboardError {
    /// A key or modifier table does not have one entry per matrix position.
    TableSize { expected: usize, found: usize },
    /// The matrix does not fit the key maps or the line maps.
    MatrixTooLarge,
    /// A diode was declared outside the matrix.
    DiodeOutOfRange { col: u8, row: u8 },
}

impl fmt::Display for KeyboardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyboardError::TableSize { expected, found } => {
                write!(f, "key table has {} entries, matrix has {}", found, expected)
            }
            KeyboardError::MatrixTooLarge => write!(f, "matrix too large for key map"),
            KeyboardError::DiodeOutOfRange { col, row } => {
                write!(f, "diode at ({}, {}) is outside the matrix", col, row)
            }
        }
    }
}

/// Per-position lookup tables, indexed by `row * COLS + col`.
#[derive(Debug, Clone, Copy)]
pub struct KeyTable {
    /// HID key code reported for each position (0 for none).
    pub keys: &'static [u8],
    /// Modifier bits contributed by each position.
    pub modifiers: &'static [u8],
}

/// Four corners `(col_a, row_a)`, `(col_a, row_b)`, `(col_b, row_a)` and
/// `(col_b, row_b)` that all read as pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub col_a: u8,
    pub col_b: u8,
    pub row_a: u8,
    pub row_b: u8,
}

impl Rect {
    /// Key indexes of the corners, in `[aa, ab, ba, bb]` order.
    fn corners(&self, cols: u8) -> [usize; 4] {
        [
            key_index(cols, self.col_a, self.row_a),
            key_index(cols, self.col_a, self.row_b),
            key_index(cols, self.col_b, self.row_a),
            key_index(cols, self.col_b, self.row_b),
        ]
    }

    fn swap_cols(self) -> Self {
        Self {
            col_a: self.col_b,
            col_b: self.col_a,
            ..self
        }
    }

    fn swap_rows(self) -> Self {
        Self {
            row_a: self.row_b,
            row_b: self.row_a,
            ..self
        }
    }
}

/// Keyboard for matrices with diodes on some (or none, or all) positions.
///
/// `BYTES` sizes the key maps and must cover `COLS * ROWS` bits.
pub struct DiodeKeyboard<M, D, const BYTES: usize> {
    matrix: M,
    delay: D,
    table: KeyTable,
    diodes: Bitmap<BYTES>,
    maps: [Bitmap<BYTES>; 2],
    current: usize,
}

impl<M: KeyMatrix, D: DelayNs, const BYTES: usize> DiodeKeyboard<M, D, BYTES> {
    pub fn new(
        matrix: M,
        delay: D,
        table: KeyTable,
        diodes: &[(u8, u8)],
    ) -> Result<Self, KeyboardError> {
        let positions = M::COLS as usize * M::ROWS as usize;
        if positions > Bitmap::<BYTES>::capacity() || M::COLS > MAX_LINES || M::ROWS > MAX_LINES {
            return Err(KeyboardError::MatrixTooLarge);
        }
        for len in [table.keys.len(), table.modifiers.len()] {
            if len != positions {
                return Err(KeyboardError::TableSize {
                    expected: positions,
                    found: len,
                });
            }
        }

        let mut diode_map = Bitmap::new();
        for &(col, row) in diodes {
            if col >= M::COLS || row >= M::ROWS {
                return Err(KeyboardError::DiodeOutOfRange { col, row });
            }
            diode_map.set(key_index(M::COLS, col, row));
        }

        Ok(Self {
            matrix,
            delay,
            table,
            diodes: diode_map,
            maps: [Bitmap::new(); 2],
            current: 0,
        })
    }

    /// The reported key map from the most recent scan.
    pub fn key_map(&self) -> &Bitmap<BYTES> {
        &self.maps[self.current]
    }

    pub fn matrix_mut(&mut self) -> &mut M {
        &mut self.matrix
    }

    #[inline]
    fn index(col: u8, row: u8) -> usize {
        key_index(M::COLS, col, row)
    }

    fn maps_mut(&mut self) -> (&mut Bitmap<BYTES>, &Bitmap<BYTES>) {
        let [a, b] = &mut self.maps;
        if self.current == 0 {
            (a, &*b)
        } else {
            (b, &*a)
        }
    }

    fn is_pressed(&self, idx: usize) -> bool {
        self.maps[self.current].get(idx)
    }

    fn unset(&mut self, idx: usize) {
        self.maps[self.current].unset(idx);
    }

    /// Drop `idx` from this scan unless the previous scan reported it.
    fn block(&mut self, idx: usize) {
        let (cur, prev) = self.maps_mut();
        if !prev.get(idx) {
            cur.unset(idx);
        }
    }

    fn block_rect(&mut self, rect: Rect) {
        debug!(
            "blocking rectangle ({}, {}) x ({}, {})",
            rect.col_a, rect.row_a, rect.col_b, rect.row_b
        );
        for idx in rect.corners(M::COLS) {
            self.block(idx);
        }
    }

    fn resolve_ghosting(&mut self) {
        // Collect every rectangle first: overlapping rectangles cannot be
        // resolved independently.
        let mut rects = [Rect::default(); MAX_RECTS];
        let mut num_rects = 0;
        let mut in_rect = Bitmap::<BYTES>::new();
        let mut overlaps = Bitmap::<BYTES>::new();

        for col_a in 0..M::COLS {
            for row_a in 0..M::ROWS {
                if !self.is_pressed(Self::index(col_a, row_a)) {
                    continue;
                }
                for row_b in row_a + 1..M::ROWS {
                    if !self.is_pressed(Self::index(col_a, row_b)) {
                        continue;
                    }
                    for col_b in col_a + 1..M::COLS {
                        if !self.is_pressed(Self::index(col_b, row_a))
                            || !self.is_pressed(Self::index(col_b, row_b))
                        {
                            continue;
                        }

                        let rect = Rect {
                            col_a,
                            col_b,
                            row_a,
                            row_b,
                        };
                        debug!(
                            "found rectangle ({}, {}) x ({}, {})",
                            col_a, row_a, col_b, row_b
                        );
                        for idx in rect.corners(M::COLS) {
                            overlaps.set_to(idx, in_rect.get(idx));
                            in_rect.set(idx);
                        }

                        if num_rects >= MAX_RECTS {
                            debug!("too many rectangles, falling back to blocking");
                            self.block_rect(rect);
                            continue;
                        }
                        rects[num_rects] = rect;
                        num_rects += 1;
                    }
                }
            }
        }

        for &rect in &rects[..num_rects] {
            if rect.corners(M::COLS).iter().any(|&idx| overlaps.get(idx)) {
                debug!("overlapping rectangles, falling back to blocking");
                self.block_rect(rect);
                continue;
            }
            if !self.resolve_rect(rect) {
                self.block_rect(rect);
            }
        }
    }

    /// Try to settle a single rectangle. Returns false if nothing could be
    /// decided and the whole rectangle needs blocking.
    fn resolve_rect(&mut self, rect: Rect) -> bool {
        let [aa, ab, ba, bb] = rect.corners(M::COLS);
        let diode_aa = self.diodes.get(aa);
        let diode_ab = self.diodes.get(ab);
        let diode_ba = self.diodes.get(ba);
        let diode_bb = self.diodes.get(bb);
        let num_diodes = [diode_aa, diode_ab, diode_ba, diode_bb]
            .iter()
            .filter(|&&d| d)
            .count();
        trace!("rectangle has {} diodes", num_diodes);

        match num_diodes {
            0 => false,
            4 => true,
            1 => {
                // Rotate so the diode sits on (col_a, row_a).
                let rect = if diode_aa {
                    rect
                } else if diode_ab {
                    rect.swap_rows()
                } else if diode_ba {
                    rect.swap_cols()
                } else {
                    rect.swap_cols().swap_rows()
                };
                self.resolve_one_diode(rect)
            }
            2 if (diode_aa && diode_bb) || (diode_ab && diode_ba) => {
                let rect = if diode_aa { rect } else { rect.swap_cols() };
                self.resolve_diagonal_diodes(rect)
            }
            2 => {
                // Both diodes on one line: the corners opposite them are
                // certain, the diode corners themselves are not.
                for (idx, diode) in [(aa, diode_aa), (ab, diode_ab), (ba, diode_ba), (bb, diode_bb)] {
                    if diode {
                        self.block(idx);
                    }
                }
                true
            }
            _ => {
                // Only the corner opposite the undioded one can be a ghost.
                let ambiguous = if !diode_aa {
                    bb
                } else if !diode_ab {
                    ba
                } else if !diode_ba {
                    ab
                } else {
                    aa
                };
                self.block(ambiguous);
                true
            }
        }
    }

    /// Resolve a rectangle whose only diode is on `(col_a, row_a)`.
    ///
    /// `(col_b, row_b)` is certain. `(col_a, row_b)` and `(col_b, row_a)`
    /// can be probed; `(col_a, row_a)` itself can only be blocked.
    fn resolve_one_diode(&mut self, r: Rect) -> bool {
        let [aa, ab, ba, bb] = r.corners(M::COLS);

        // Keys may have been released since the main scan.
        let rows = sample_col(&mut self.matrix, &mut self.delay, r.col_a);
        for (row, idx) in [(r.row_a, aa), (r.row_b, ab)] {
            if !rows.get(row as usize) {
                debug!("key lifted off ({}, {})", r.col_a, row);
                self.unset(idx);
                return true;
            }
        }
        let rows = sample_col(&mut self.matrix, &mut self.delay, r.col_b);
        for (row, idx) in [(r.row_a, ba), (r.row_b, bb)] {
            if !rows.get(row as usize) {
                debug!("key lifted off ({}, {})", r.col_b, row);
                self.unset(idx);
                return true;
            }
        }

        // With col_b still driven, col_a only sees it through (col_a, row_b).
        let cols = self.matrix.read_cols();
        if !cols.get(r.col_a as usize) {
            debug!("fixed ghosting on ({}, {})", r.col_a, r.row_b);
            self.unset(ab);
            return true;
        }

        // Driving row_a reaches col_a only through (col_b, row_a).
        let cols = sample_row(&mut self.matrix, &mut self.delay, r.row_a);
        if !cols.get(r.col_a as usize) {
            debug!("fixed ghosting on ({}, {})", r.col_b, r.row_a);
            self.unset(ba);
            return true;
        }

        debug!("blocking single diode corner ({}, {})", r.col_a, r.row_a);
        self.block(aa);
        true
    }

    /// Resolve a rectangle with diodes on `(col_a, row_a)` and
    /// `(col_b, row_b)`; only the other diagonal is in doubt.
    fn resolve_diagonal_diodes(&mut self, r: Rect) -> bool {
        let cols = sample_row(&mut self.matrix, &mut self.delay, r.row_a);
        if !cols.get(r.col_b as usize) {
            debug!("fixed ghosting on ({}, {})", r.col_b, r.row_a);
            self.unset(Self::index(r.col_b, r.row_a));
            return true;
        }
        // (col_b, row_a) is down, so col_a answers only if (col_a, row_b) is.
        if !cols.get(r.col_a as usize) {
            debug!("fixed ghosting on ({}, {})", r.col_a, r.row_b);
            self.unset(Self::index(r.col_a, r.row_b));
        }
        true
    }
}

impl<M: KeyMatrix, D: DelayNs, const BYTES: usize> Keyboard for DiodeKeyboard<M, D, BYTES> {
    fn prepare(&mut self) {
        self.matrix.prepare();
    }

    fn scan_keys(&mut self) -> bool {
        self.current ^= 1;
        let current = self.current;
        let pressed = scan_matrix(&mut self.matrix, &mut self.delay, &mut self.maps[current]);

        if pressed >= MIN_GHOST_KEYS {
            self.resolve_ghosting();
        }

        self.maps[0] != self.maps[1]
    }

    fn state(&self) -> KeyReport {
        let map = self.key_map();
        let mut report = KeyReport::empty();
        let mut pressed = 0;

        for col in 0..M::COLS {
            for row in 0..M::ROWS {
                let idx = Self::index(col, row);
                if !map.get(idx) {
                    continue;
                }
                trace!("({}, {}) = {:#04x}", col, row, self.table.keys[idx]);
                pressed += 1;
                report.modifiers |= self.table.modifiers[idx];
                let code = self.table.keys[idx];
                if code != 0 {
                    report.push_key(code);
                }
            }
        }
        trace!("{} pressed", pressed);

        report
    }
}
