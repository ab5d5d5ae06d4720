//! Modular sequence number arithmetic
//!
//! Every window comparison is made on offsets from a window base, so wraparound
//! never needs special casing.

use common::types::SnFieldWidth;

/// Sequence number space of one direction of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnSpace {
    width: SnFieldWidth,
    modulus: u32,
}

impl SnSpace {
    pub fn new(width: SnFieldWidth) -> Self {
        Self {
            width,
            modulus: width.modulus(),
        }
    }

    pub fn width(&self) -> SnFieldWidth {
        self.width
    }

    pub fn bits(&self) -> u8 {
        self.width.bits()
    }

    pub fn modulus(&self) -> u32 {
        self.modulus
    }

    /// Half the SN space, the natural window size of the space
    pub fn half(&self) -> u32 {
        self.modulus / 2
    }

    pub fn add(&self, sn: u32, n: u32) -> u32 {
        ((sn as u64 + n as u64) % self.modulus as u64) as u32
    }

    pub fn inc(&self, sn: u32) -> u32 {
        self.add(sn, 1)
    }

    /// `sn - n` modulo the space
    pub fn sub(&self, sn: u32, n: u32) -> u32 {
        let n = n % self.modulus;
        (sn % self.modulus + self.modulus - n) % self.modulus
    }

    /// Distance of `sn` ahead of `base`
    pub fn offset(&self, sn: u32, base: u32) -> u32 {
        self.sub(sn, base)
    }

    /// `base <= sn < base + size`
    pub fn in_window(&self, sn: u32, base: u32, size: u32) -> bool {
        self.offset(sn, base) < size
    }

    /// `a < b` with both measured from `base`
    pub fn lt(&self, a: u32, b: u32, base: u32) -> bool {
        self.offset(a, base) < self.offset(b, base)
    }

    /// `a <= b` with both measured from `base`
    pub fn le(&self, a: u32, b: u32, base: u32) -> bool {
        self.offset(a, base) <= self.offset(b, base)
    }

    /// SNs from `start` (inclusive) to `end` (exclusive), following wraparound
    pub fn range(&self, start: u32, end: u32) -> impl Iterator<Item = u32> {
        let space = *self;
        let count = space.offset(end, start);
        (0..count).map(move |i| space.add(start, i))
    }
}
