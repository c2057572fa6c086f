//! HID boot keyboard report.

/// Number of key slots in a boot keyboard report.
pub const MAX_KEYS: usize = 6;
/// Size of the encoded report in bytes.
pub const REPORT_SIZE: usize = 8;

/// Standard USB HID keyboard report.
/// Byte 0: modifier keys bitmask
/// Byte 1: reserved (0x00)
/// Bytes 2-7: up to 6 simultaneous keycodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyReport {
    pub modifiers: u8,
    keys: [u8; MAX_KEYS],
    len: u8,
}

impl KeyReport {
    pub const fn empty() -> Self {
        Self {
            modifiers: 0,
            keys: [0; MAX_KEYS],
            len: 0,
        }
    }

    pub fn new(modifiers: u8, keys: &[u8]) -> Self {
        let mut report = Self::empty();
        report.modifiers = modifiers;
        for &key in keys {
            report.push_key(key);
        }
        report
    }

    /// Append a key code. Returns false once all slots are taken; the
    /// extra key is dropped (boot protocol limit).
    pub fn push_key(&mut self, code: u8) -> bool {
        let len = self.len as usize;
        if len >= MAX_KEYS {
            return false;
        }
        self.keys[len] = code;
        self.len += 1;
        true
    }

    pub fn keys(&self) -> &[u8] {
        &self.keys[..self.len as usize]
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0 && self.modifiers == 0
    }

    pub fn to_bytes(&self) -> [u8; REPORT_SIZE] {
        let mut out = [0u8; REPORT_SIZE];
        out[0] = self.modifiers;
        out[2..].copy_from_slice(&self.keys);
        out
    }
}
