// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Flash access in absolute addresses.
//!
//! The engine talks about flash in the part's memory-mapped addresses, while
//! `embedded-storage` devices are addressed from 0. Every helper here takes
//! the layout's `flash_base` and translates before touching the device.

use bee_dfu_common::checksum::CRC16;
use bee_dfu_common::header::{patch_image_byte, ImageHeader, CTRL_FLAG_OFFSET, DEFAULT_HEADER_SIZE};
use bee_dfu_common::{HeaderError, FLASH_SECTOR_SIZE};
use embedded_storage::nor_flash::{
    check_erase, check_read, check_write, ErrorType, NorFlash, NorFlashError, NorFlashErrorKind,
    ReadNorFlash,
};

/// Bytes read per step when streaming flash through a digest.
pub const READ_CHUNK: usize = 256;

/// Flash access failure, reduced to what the engine acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    #[error("flash access out of bounds")]
    OutOfBounds,
    #[error("unaligned flash access")]
    NotAligned,
    #[error("flash device error")]
    Device,
}

impl FlashError {
    fn from_device<E: NorFlashError>(e: E) -> Self {
        match e.kind() {
            NorFlashErrorKind::OutOfBounds => Self::OutOfBounds,
            NorFlashErrorKind::NotAligned => Self::NotAligned,
            _ => Self::Device,
        }
    }
}

/// Failure while loading an image header from flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HeaderReadError {
    #[error(transparent)]
    Flash(#[from] FlashError),
    #[error(transparent)]
    Header(#[from] HeaderError),
}

/// Convert an absolute flash address to a device offset.
pub fn addr_to_offset(base: u32, abs_addr: u32) -> Result<u32, FlashError> {
    abs_addr.checked_sub(base).ok_or(FlashError::OutOfBounds)
}

pub fn read<F: ReadNorFlash>(flash: &mut F, base: u32, abs_addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
    let offset = addr_to_offset(base, abs_addr)?;
    flash.read(offset, buf).map_err(FlashError::from_device)
}

pub fn program<F: NorFlash>(flash: &mut F, base: u32, abs_addr: u32, data: &[u8]) -> Result<(), FlashError> {
    let offset = addr_to_offset(base, abs_addr)?;
    flash.write(offset, data).map_err(FlashError::from_device)
}

/// Erase the sector starting at `abs_addr`.
pub fn erase_sector<F: NorFlash>(flash: &mut F, base: u32, abs_addr: u32) -> Result<(), FlashError> {
    if abs_addr % FLASH_SECTOR_SIZE != 0 {
        return Err(FlashError::NotAligned);
    }
    let offset = addr_to_offset(base, abs_addr)?;
    flash
        .erase(offset, offset + FLASH_SECTOR_SIZE)
        .map_err(FlashError::from_device)
}

/// Load the raw header bytes at `abs_addr`.
pub fn read_header_bytes<F: ReadNorFlash>(
    flash: &mut F,
    base: u32,
    abs_addr: u32,
) -> Result<[u8; DEFAULT_HEADER_SIZE], FlashError> {
    let mut bytes = [0u8; DEFAULT_HEADER_SIZE];
    read(flash, base, abs_addr, &mut bytes)?;
    Ok(bytes)
}

/// Load and parse the header at `abs_addr`, without validating it.
pub fn read_header<F: ReadNorFlash>(flash: &mut F, base: u32, abs_addr: u32) -> Result<ImageHeader, HeaderReadError> {
    if abs_addr == 0 || abs_addr < base {
        return Err(HeaderError::BadAddress.into());
    }
    let bytes = read_header_bytes(flash, base, abs_addr)?;
    Ok(ImageHeader::parse(&bytes)?)
}

/// Read the control flag word of the header at `header_addr`.
pub fn read_flag_word<F: ReadNorFlash>(flash: &mut F, base: u32, header_addr: u32) -> Result<u16, FlashError> {
    let mut word = [0u8; 2];
    read(flash, base, header_addr + CTRL_FLAG_OFFSET as u32, &mut word)?;
    Ok(u16::from_le_bytes(word))
}

/// CRC16 over `len` bytes of flash at `abs_addr`.
///
/// `restore` puts back a byte that was altered on its way into flash, given
/// as (absolute address, original value).
pub fn crc16_region<F: ReadNorFlash>(
    flash: &mut F,
    base: u32,
    abs_addr: u32,
    len: u32,
    restore: Option<(u32, u8)>,
) -> Result<u16, FlashError> {
    let mut digest = CRC16.digest();
    let mut chunk = [0u8; READ_CHUNK];
    let mut addr = abs_addr;
    let mut remaining = len as usize;

    while remaining > 0 {
        let n = remaining.min(chunk.len());
        read(flash, base, addr, &mut chunk[..n])?;
        if let Some((restore_addr, value)) = restore {
            patch_image_byte(&mut chunk[..n], addr, restore_addr, |_| value);
        }
        digest.update(&chunk[..n]);
        addr += n as u32;
        remaining -= n;
    }

    Ok(digest.finalize())
}

/// Absolute address of the control flag low byte for the image at `image_addr`.
pub const fn flag_byte_addr(image_addr: u32) -> u32 {
    image_addr + CTRL_FLAG_OFFSET as u32
}

/// NOR flash emulated in RAM.
///
/// Erase sets bytes to `0xFF`, programming can only clear bits, like the real
/// part. Used by the host tool and the tests.
pub struct MemFlash<'a> {
    mem: &'a mut [u8],
}

impl<'a> MemFlash<'a> {
    pub fn new(mem: &'a mut [u8]) -> Self {
        Self { mem }
    }

    pub fn as_slice(&self) -> &[u8] {
        self.mem
    }
}

impl ErrorType for MemFlash<'_> {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for MemFlash<'_> {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        check_read(self, offset, bytes.len())?;
        let start = offset as usize;
        bytes.copy_from_slice(&self.mem[start..start + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.mem.len()
    }
}

impl NorFlash for MemFlash<'_> {
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = FLASH_SECTOR_SIZE as usize;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        check_erase(self, from, to)?;
        self.mem[from as usize..to as usize].fill(0xFF);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        check_write(self, offset, bytes.len())?;
        let start = offset as usize;
        for (cell, byte) in self.mem[start..start + bytes.len()].iter_mut().zip(bytes) {
            *cell &= *byte;
        }
        Ok(())
    }
}
