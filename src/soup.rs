//! The soup: `width * height` tapes of `tape_len` bytes, stored back to back.

use crate::error::{EngineError, Result};
use crate::rng::SplitMix64;
use rand::RngCore;

/// Flat tape buffer. The length is fixed at `width * height * tape_len`.
#[derive(Clone, Debug)]
pub struct Soup {
    bytes: Vec<u8>,
    width: usize,
    height: usize,
    tape_len: usize,
    tape_shift: u32,
}

impl Soup {
    /// Zeroed soup. `tape_len` must be a power of two (checked by config validation).
    pub fn new(width: usize, height: usize, tape_len: usize) -> Self {
        debug_assert!(tape_len.is_power_of_two());
        Self {
            bytes: vec![0u8; width * height * tape_len],
            width,
            height,
            tape_len,
            tape_shift: tape_len.trailing_zeros(),
        }
    }

    /// Fill every byte, in index order, with the low byte of one draw.
    pub fn fill(&mut self, rng: &mut SplitMix64) {
        for b in &mut self.bytes {
            *b = rng.next_u64() as u8;
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn tape_len(&self) -> usize {
        self.tape_len
    }

    /// `log2(tape_len)`.
    #[inline]
    pub fn tape_shift(&self) -> u32 {
        self.tape_shift
    }

    pub fn tape_count(&self) -> usize {
        self.width * self.height
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// Grid coordinates `(x, y)` of tape `t`.
    #[inline]
    pub fn coords(&self, t: usize) -> (usize, usize) {
        (t % self.width, t / self.width)
    }

    /// Raw soup bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    fn check(&self, t: usize) -> Result<usize> {
        if t >= self.tape_count() {
            return Err(EngineError::OutOfRange {
                what: "tape",
                index: t,
                len: self.tape_count(),
            });
        }
        Ok(t << self.tape_shift)
    }

    /// Bytes of tape `t`.
    pub fn tape(&self, t: usize) -> Result<&[u8]> {
        let start = self.check(t)?;
        Ok(&self.bytes[start..start + self.tape_len])
    }

    pub fn tape_mut(&mut self, t: usize) -> Result<&mut [u8]> {
        let start = self.check(t)?;
        Ok(&mut self.bytes[start..start + self.tape_len])
    }

    /// Overwrite tape `t` with exactly `tape_len` bytes.
    pub fn write(&mut self, t: usize, tape: &[u8]) -> Result<()> {
        if tape.len() != self.tape_len {
            return Err(EngineError::invalid(format!(
                "tape write of {} bytes, tapes are {} bytes",
                tape.len(),
                self.tape_len
            )));
        }
        self.tape_mut(t)?.copy_from_slice(tape);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let soup = Soup::new(5, 3, 8);
        assert_eq!(soup.tape_count(), 15);
        assert_eq!(soup.byte_len(), 15 * 8);
        assert_eq!(soup.tape_shift(), 3);
        assert_eq!(soup.coords(0), (0, 0));
        assert_eq!(soup.coords(7), (2, 1));
        assert_eq!(soup.coords(14), (4, 2));
    }

    #[test]
    fn test_fill_uses_one_draw_per_byte() {
        let mut soup = Soup::new(2, 2, 4);
        let mut rng = SplitMix64::new(42);
        soup.fill(&mut rng);

        let mut reference = SplitMix64::new(42);
        let expected: Vec<u8> = (0..16).map(|_| reference.next_u64() as u8).collect();
        assert_eq!(soup.as_bytes(), expected.as_slice());
        assert_eq!(rng.state(), reference.state());
    }

    #[test]
    fn test_read_write_tape() {
        let mut soup = Soup::new(3, 3, 4);
        soup.write(4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(soup.tape(4).unwrap(), &[1, 2, 3, 4]);
        assert_eq!(&soup.as_bytes()[16..20], &[1, 2, 3, 4]);
        assert_eq!(soup.tape(3).unwrap(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_out_of_range_and_bad_length() {
        let mut soup = Soup::new(3, 3, 4);
        assert!(matches!(
            soup.tape(9),
            Err(EngineError::OutOfRange { index: 9, len: 9, .. })
        ));
        assert!(matches!(
            soup.write(0, &[1, 2, 3]),
            Err(EngineError::InvalidArgument(_))
        ));
        assert_eq!(soup.tape(0).unwrap(), &[0, 0, 0, 0]);
    }
}
