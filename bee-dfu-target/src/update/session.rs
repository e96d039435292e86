// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

use crate::error::AbortCause;
use crate::partition::{align_up, TempSlot};
use bee_dfu_common::image_id::BANK_IMAGE_COUNT;
use bee_dfu_common::{CtrlHeader, DfuConfig, ImageId};
use heapless::Vec;

/// Transfer session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    /// No `START_DFU` yet.
    Idle,
    /// Session open, waiting for `RECEIVE_FW_IMAGE_INFO`.
    Started,
    /// Accepting packet writes.
    Receiving,
    /// A full buffer landed, waiting for `REPORT_BUFFER_CRC`.
    BufferPending,
    /// Checking a complete image.
    Verifying,
    /// Images activated, waiting for the link to drop.
    Committed,
    /// Terminal: the device resets with the cause's reason.
    Aborted(AbortCause),
}

impl SessionState {
    /// Packet data is expected in this state.
    pub fn is_transferring(&self) -> bool {
        matches!(self, Self::Receiving | Self::BufferPending)
    }
}

/// Per-connection transfer data.
#[derive(Debug, Clone)]
pub struct TransferSession {
    /// Control header announced by `START_DFU`.
    pub start: Option<CtrlHeader>,
    pub image_id: Option<ImageId>,
    /// Where the current image is written.
    pub slot: TempSlot,
    pub image_total_length: u32,
    pub cur_offset: u32,
    /// Image offset of the first byte not yet covered by a buffer CRC.
    pub buffer_check_offset: u32,
    pub buffer_check_en: bool,
    pub mtu_size: u16,
    pub buffer_size: u16,
    /// Images packed into `OTA_TMP` during this session.
    pub temp_image_info: Vec<(ImageId, TempSlot), BANK_IMAGE_COUNT>,
    /// Fill level of `OTA_TMP`.
    pub next_subimage_offset: u32,
    /// Flash is erased from `slot.addr` up to here.
    pub erased_end: u32,
    /// Peer's original flag byte, when the image header has landed.
    pub saved_flag_byte: Option<u8>,
    pub crc_retries_left: u8,
    pub images_received: u8,
}

impl TransferSession {
    pub fn new(config: &DfuConfig) -> Self {
        Self {
            start: None,
            image_id: None,
            slot: TempSlot { addr: 0, size: 0 },
            image_total_length: 0,
            cur_offset: 0,
            buffer_check_offset: 0,
            buffer_check_en: false,
            mtu_size: config.mtu_size,
            buffer_size: config.buffer_size,
            temp_image_info: Vec::new(),
            next_subimage_offset: 0,
            erased_end: 0,
            saved_flag_byte: None,
            crc_retries_left: config.buffer_crc_retries,
            images_received: 0,
        }
    }

    /// Set up for a new image at `slot`.
    pub fn begin_image(&mut self, id: ImageId, slot: TempSlot, length: u32, retries: u8) {
        self.image_id = Some(id);
        self.slot = slot;
        self.image_total_length = length;
        self.cur_offset = 0;
        self.buffer_check_offset = 0;
        self.erased_end = slot.addr;
        self.saved_flag_byte = None;
        self.crc_retries_left = retries;
    }

    /// Bytes written since the last accepted buffer CRC.
    pub fn buffered(&self) -> u32 {
        self.cur_offset - self.buffer_check_offset
    }

    pub fn image_complete(&self) -> bool {
        self.image_id.is_some() && self.cur_offset == self.image_total_length
    }

    /// Remember an image packed into `OTA_TMP` and move the fill level past it.
    pub fn record_temp_image(&mut self, id: ImageId, slot: TempSlot, length: u32) {
        self.temp_image_info.retain(|(known, _)| *known != id);
        let _ = self.temp_image_info.push((id, slot));
        self.next_subimage_offset = self
            .next_subimage_offset
            .checked_add(length)
            .and_then(align_up)
            .unwrap_or(u32::MAX);
    }

    pub fn temp_image(&self, id: ImageId) -> Option<TempSlot> {
        self.temp_image_info
            .iter()
            .find(|(known, _)| *known == id)
            .map(|(_, slot)| *slot)
    }
}
