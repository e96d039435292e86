// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

use bee_dfu_common::image_id::MAX_IMAGE_NUM;
use bee_dfu_common::ImageId;
use heapless::Vec;

/// What the update task knows about verified images.
///
/// Owned by the update task and only changed by it.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UpdateState {
    valid_bitmap: u32,
    user_data_bitmap: u8,
    /// Verified images waiting for activation, with their header address.
    pending: Vec<(ImageId, u32), MAX_IMAGE_NUM>,
    /// A commit happened: the next disconnect resets into the new images.
    pub active_reset_pending: bool,
    /// The next reset stays in OTA mode.
    pub reset_to_ota_mode: bool,
}

impl UpdateState {
    pub fn valid_bitmap(&self) -> u32 {
        self.valid_bitmap
    }

    pub fn user_data_bitmap(&self) -> u8 {
        self.user_data_bitmap
    }

    pub fn is_valid(&self, id: ImageId) -> bool {
        match (id.valid_bit(), id.user_data_bit()) {
            (Some(bit), _) => self.valid_bitmap & bit != 0,
            (_, Some(bit)) => self.user_data_bitmap & bit != 0,
            _ => false,
        }
    }

    /// Record `id` as verified at `header_addr`, replacing an older record.
    pub fn mark_valid(&mut self, id: ImageId, header_addr: u32) {
        if let Some(bit) = id.user_data_bit() {
            self.user_data_bitmap |= bit;
            return;
        }
        let Some(bit) = id.valid_bit() else {
            return;
        };
        self.valid_bitmap |= bit;
        self.pending.retain(|(pending, _)| *pending != id);
        // One slot per DFU image id.
        let _ = self.pending.push((id, header_addr));
    }

    /// Forget `id`, because a new copy is about to overwrite it.
    pub fn invalidate(&mut self, id: ImageId) {
        if let Some(bit) = id.valid_bit() {
            self.valid_bitmap &= !bit;
        }
        if let Some(bit) = id.user_data_bit() {
            self.user_data_bitmap &= !bit;
        }
        self.pending.retain(|(pending, _)| *pending != id);
    }

    pub fn pending(&self) -> &[(ImageId, u32)] {
        &self.pending
    }

    pub fn pending_addr(&self, id: ImageId) -> Option<u32> {
        self.pending.iter().find(|(p, _)| *p == id).map(|(_, addr)| *addr)
    }

    /// Drop activated images from the pending list. They stay valid.
    pub fn clear_pending(&mut self, done: &[(ImageId, u32)]) {
        self.pending.retain(|entry| !done.contains(entry));
    }
}
