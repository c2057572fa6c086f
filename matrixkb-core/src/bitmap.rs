//! Fixed-size bit-packed sets over a matrix index space.

/// A packed set of `BYTES * 8` booleans.
///
/// Indexing past [`Bitmap::capacity`] panics, the same way slice indexing
/// does. Bits are stored LSB-first within each byte, so the raw bytes can
/// double as a register image (see [`LineMap`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bitmap<const BYTES: usize> {
    bytes: [u8; BYTES],
}

/// A set of matrix lines (rows or columns), one bit per line.
pub type LineMap = Bitmap<4>;

impl<const BYTES: usize> Bitmap<BYTES> {
    pub const fn new() -> Self {
        Self { bytes: [0; BYTES] }
    }

    pub const fn from_bytes(bytes: [u8; BYTES]) -> Self {
        Self { bytes }
    }

    /// Number of indices this map can hold.
    pub const fn capacity() -> usize {
        BYTES * 8
    }

    #[inline]
    pub fn get(&self, index: usize) -> bool {
        self.bytes[index / 8] & (1 << (index % 8)) != 0
    }

    #[inline]
    pub fn set(&mut self, index: usize) {
        self.bytes[index / 8] |= 1 << (index % 8);
    }

    #[inline]
    pub fn unset(&mut self, index: usize) {
        self.bytes[index / 8] &= !(1 << (index % 8));
    }

    #[inline]
    pub fn set_to(&mut self, index: usize, value: bool) {
        if value {
            self.set(index);
        } else {
            self.unset(index);
        }
    }

    pub fn clear(&mut self) {
        self.bytes = [0; BYTES];
    }

    pub fn count_ones(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.iter().all(|&b| b == 0)
    }

    pub fn bytes(&self) -> &[u8; BYTES] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8; BYTES] {
        &mut self.bytes
    }

    /// Iterate over the indices of all set bits, in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..Self::capacity()).filter(move |&i| self.get(i))
    }
}

impl LineMap {
    /// Build a line map from the low 32 lines of a register image.
    pub const fn from_bits(bits: u32) -> Self {
        Self::from_bytes(bits.to_le_bytes())
    }

    pub const fn bits(&self) -> u32 {
        u32::from_le_bytes(self.bytes)
    }
}

impl<const BYTES: usize> Default for Bitmap<BYTES> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_resets_every_bit() {
        let mut map = Bitmap::<3>::from_bytes([0xFF, 0x5A, 0x01]);
        map.clear();
        for i in 0..Bitmap::<3>::capacity() {
            assert!(!map.get(i), "bit {} still set", i);
        }
        assert_eq!(map.bytes(), &[0, 0, 0]);
    }

    #[test]
    fn test_set_get_unset() {
        let mut map = Bitmap::<2>::new();
        map.set(0);
        map.set(9);
        map.set(15);
        assert!(map.get(0));
        assert!(map.get(9));
        assert!(map.get(15));
        assert!(!map.get(8));
        assert_eq!(map.count_ones(), 3);

        map.unset(9);
        assert!(!map.get(9));
        map.set_to(3, true);
        map.set_to(0, false);
        assert_eq!(map.bytes(), &[0x08, 0x80]);
    }

    #[test]
    fn test_equality_detects_single_bit() {
        let mut a = Bitmap::<5>::new();
        let b = a;
        assert_eq!(a, a);
        assert_eq!(a, b);
        for i in 0..Bitmap::<5>::capacity() {
            a.set(i);
            assert_ne!(a, b, "bit {} not detected", i);
            a.unset(i);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_iter_ones() {
        let map = Bitmap::<2>::from_bytes([0b1000_0010, 0b0000_0100]);
        let ones: Vec<usize> = map.iter_ones().collect();
        assert_eq!(ones, vec![1, 7, 10]);
        assert!(!map.is_empty());
        assert!(Bitmap::<2>::new().is_empty());
    }

    #[test]
    fn test_line_map_bits() {
        let lines = LineMap::from_bits(0x8000_0005);
        assert!(lines.get(0));
        assert!(!lines.get(1));
        assert!(lines.get(2));
        assert!(lines.get(31));
        assert_eq!(lines.bits(), 0x8000_0005);
    }

    #[test]
    #[should_panic]
    fn test_out_of_range_panics() {
        let map = Bitmap::<1>::new();
        map.get(8);
    }
}
