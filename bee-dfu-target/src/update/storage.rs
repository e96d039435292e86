// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

use super::session::TransferSession;
use crate::error::TransferError;
use crate::flash::{self, READ_CHUNK};
use bee_dfu_common::header::{patch_image_byte, CTRL_FLAG_OFFSET, NOT_READY_BIT};
use bee_dfu_common::FLASH_SECTOR_SIZE;
use embedded_storage::nor_flash::NorFlash;

const NOT_READY_MASK: u8 = NOT_READY_BIT as u8;

/// Erase every sector `[from, to)` touches.
pub(super) fn erase_range<F: NorFlash>(flash: &mut F, base: u32, from: u32, to: u32) -> Result<(), TransferError> {
    let mut sector = from - from % FLASH_SECTOR_SIZE;
    while sector < to {
        flash::erase_sector(flash, base, sector).map_err(TransferError::FlashErase)?;
        sector += FLASH_SECTOR_SIZE;
    }
    Ok(())
}

/// Write one packet at the session's current offset.
///
/// Sectors are erased as the write front reaches them. When `has_header` is
/// set the header's `not_ready` bit is forced on as it lands and the peer's
/// original byte is kept for the buffer CRC.
pub(super) fn write_chunk<F: NorFlash>(
    flash: &mut F,
    base: u32,
    session: &mut TransferSession,
    data: &mut [u8],
    has_header: bool,
) -> Result<(), TransferError> {
    let dest = session.slot.addr + session.cur_offset;
    let end = dest + data.len() as u32;

    if session.erased_end < end {
        erase_range(flash, base, session.erased_end, end)?;
        session.erased_end = end.div_ceil(FLASH_SECTOR_SIZE) * FLASH_SECTOR_SIZE;
    }

    if has_header {
        patch_image_byte(data, session.cur_offset, CTRL_FLAG_OFFSET as u32, |b| {
            session.saved_flag_byte = Some(b);
            b | NOT_READY_MASK
        });
    }

    flash::program(flash, base, dest, data).map_err(TransferError::FlashWrite)?;
    session.cur_offset += data.len() as u32;
    Ok(())
}

/// Copy an image between flash regions, landing it with `not_ready` set.
pub(super) fn copy_image<F: NorFlash>(
    flash: &mut F,
    base: u32,
    from: u32,
    to: u32,
    len: u32,
) -> Result<(), TransferError> {
    erase_range(flash, base, to, to + len)?;

    let mut chunk = [0u8; READ_CHUNK];
    let mut done = 0u32;
    while done < len {
        let n = ((len - done) as usize).min(chunk.len());
        let bytes = &mut chunk[..n];
        flash::read(flash, base, from + done, bytes).map_err(TransferError::FlashWrite)?;
        patch_image_byte(bytes, done, CTRL_FLAG_OFFSET as u32, |b| b | NOT_READY_MASK);
        flash::program(flash, base, to + done, bytes).map_err(TransferError::FlashWrite)?;
        done += n as u32;
    }
    Ok(())
}
