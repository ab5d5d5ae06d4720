//! Common Utilities
//!
//! Provides utility functions used across the protocol stack

use bytes::{BufMut, BytesMut};

/// Convert a byte slice to hex string for debugging
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// MSB-first bit packer used by the header and control PDU encoders
#[derive(Debug, Default)]
pub struct BitWriter {
    buf: BytesMut,
    acc: u8,
    used: u8,
}

impl BitWriter {
    /// Create a writer with room for `bytes` output bytes
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(bytes),
            acc: 0,
            used: 0,
        }
    }

    /// Append the `count` least significant bits of `value`, MSB first
    pub fn put_bits(&mut self, value: u32, count: u8) {
        debug_assert!(count <= 32);
        for i in (0..count).rev() {
            let bit = ((value >> i) & 1) as u8;
            self.acc = (self.acc << 1) | bit;
            self.used += 1;
            if self.used == 8 {
                self.buf.put_u8(self.acc);
                self.acc = 0;
                self.used = 0;
            }
        }
    }

    /// Append a single flag bit
    pub fn put_flag(&mut self, flag: bool) {
        self.put_bits(flag as u32, 1);
    }

    /// Number of bits written so far
    pub fn bit_len(&self) -> usize {
        self.buf.len() * 8 + self.used as usize
    }

    /// Zero-pad to the next byte boundary and return the packed bytes
    pub fn finish(mut self) -> BytesMut {
        if self.used > 0 {
            self.buf.put_u8(self.acc << (8 - self.used));
        }
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_hex() {
        let data = vec![0x12, 0x34, 0xAB, 0xCD];
        assert_eq!(bytes_to_hex(&data), "12 34 ab cd");
    }

    #[test]
    fn test_bit_writer_packs_msb_first() {
        let mut writer = BitWriter::with_capacity(2);
        writer.put_bits(0b101, 3);
        writer.put_flag(false);
        writer.put_bits(0xA, 4);
        writer.put_bits(0b11, 2);
        assert_eq!(writer.bit_len(), 10);

        let packed = writer.finish();
        assert_eq!(&packed[..], &[0xAA, 0xC0]);
    }

    #[test]
    fn test_bit_writer_empty() {
        let writer = BitWriter::default();
        assert!(writer.finish().is_empty());
    }
}
