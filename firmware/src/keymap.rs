//! Key layout of the board, one entry per matrix position (row-major,
//! six columns per row).

use matrixkb_core::keycode::{key_codes, modifier_masks, Keycode};
use matrixkb_core::{KeyMatrix, KeyTable};

use crate::matrix::BoardMatrix;

const POSITIONS: usize = BoardMatrix::COLS as usize * BoardMatrix::ROWS as usize;

/// Bytes needed for one key map of this matrix.
pub const MAP_BYTES: usize = (POSITIONS + 7) / 8;

// Short aliases to keep the layout table readable
const ESC: Keycode = Keycode::Escape;
const TAB: Keycode = Keycode::Tab;
const CAPS: Keycode = Keycode::CapsLock;
const BSP: Keycode = Keycode::Backspace;
const ENT: Keycode = Keycode::Enter;
const SPC: Keycode = Keycode::Space;
const DEL: Keycode = Keycode::Delete;
const LSFT: Keycode = Keycode::LShift;
const RSFT: Keycode = Keycode::RShift;
const LCTL: Keycode = Keycode::LCtrl;
const LALT: Keycode = Keycode::LAlt;
const LGUI: Keycode = Keycode::LGui;
const RALT: Keycode = Keycode::RAlt;

#[rustfmt::skip]
const LAYOUT: [Keycode; POSITIONS] = [
    ESC,  Keycode::N1, Keycode::N2, Keycode::N3, Keycode::N4, Keycode::N5,
    TAB,  Keycode::Q,  Keycode::W,  Keycode::E,  Keycode::R,  Keycode::T,
    CAPS, Keycode::A,  Keycode::S,  Keycode::D,  Keycode::F,  Keycode::G,
    LSFT, Keycode::Z,  Keycode::X,  Keycode::C,  Keycode::V,  Keycode::B,
    LCTL, LGUI,        LALT,        SPC,         ENT,         BSP,
    Keycode::Grave, Keycode::Minus, Keycode::Equal, Keycode::LBracket, Keycode::RBracket, RSFT,
    Keycode::Left, Keycode::Down, Keycode::Up, Keycode::Right, DEL, RALT,
];

static KEYS: [u8; POSITIONS] = key_codes(&LAYOUT);
static MODIFIERS: [u8; POSITIONS] = modifier_masks(&LAYOUT);

/// Positions fitted with a diode, as `(col, row)`. The modifiers are the
/// keys most often held together with others.
pub static DIODES: [(u8, u8); 6] = [(0, 3), (0, 4), (1, 4), (2, 4), (5, 5), (5, 6)];

pub fn table() -> KeyTable {
    KeyTable {
        keys: &KEYS,
        modifiers: &MODIFIERS,
    }
}

