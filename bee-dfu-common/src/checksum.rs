// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Buffer checksum used by the buffer-check flow control.

use crc::{Crc, CRC_16_ARC};

/// CRC-16/ARC: polynomial x^16+x^15+x^2+1, reflected, init 0.
pub const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_ARC);

/// Compute the buffer CRC of `data` in one shot.
pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}
