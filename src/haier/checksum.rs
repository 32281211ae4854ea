use crc::{Crc, CRC_16_ARC};

// Reflected 0xA001 polynomial, init 0, no final xor
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_ARC);

/// Truncating 8-bit sum of `data`.
pub fn additive(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}
