// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Image placement.
//!
//! Maps an image id to the flash address of its active copy and to the slot
//! an incoming copy is written to. The temp bank is derived from the active
//! bank each time it is asked for, never stored, so it stays correct as long
//! as the active bank snapshot does.

use crate::bank::{ActiveBanks, BankFamily};
use crate::error::LayoutError;
use crate::flash;
use bee_dfu_common::header::{ImageHeader, OTA_HEADER_SIZE};
use bee_dfu_common::image_id::ImageFamily;
use bee_dfu_common::layout::PartitionRecord;
use bee_dfu_common::{DfuConfig, FlashLayout, ImageId, PartitionName, FLASH_SECTOR_SIZE};
use embedded_storage::nor_flash::ReadNorFlash;

/// Destination of an incoming image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TempSlot {
    pub addr: u32,
    /// Bytes available at `addr`. Zero when the image cannot be received.
    pub size: u32,
}

/// Round up to a sector boundary. `None` past the end of the address space.
pub const fn align_up(value: u32) -> Option<u32> {
    value.checked_next_multiple_of(FLASH_SECTOR_SIZE)
}

/// Offset of a sub-image from the start of its OTA bank.
///
/// Sub-images follow the container header in id order, each starting on a
/// sector boundary.
pub fn container_offset(header: &ImageHeader, id: ImageId) -> Result<u32, LayoutError> {
    ImageId::BANK_IMAGES
        .iter()
        .take_while(|b| **b < id)
        .try_fold(OTA_HEADER_SIZE, |offset, b| {
            offset.checked_add(align_up(header.sub_image_size(*b))?)
        })
        .ok_or(LayoutError::NotPlaceable(id.raw()))
}

/// Region of `bank` the container header assigns to `id`.
///
/// Fails when the sub-image would reach past the end of the bank.
pub fn sub_image_slot(header: &ImageHeader, bank: &PartitionRecord, id: ImageId) -> Result<TempSlot, LayoutError> {
    let offset = container_offset(header, id)?;
    let size = header.sub_image_size(id);
    match offset.checked_add(size) {
        Some(end) if end <= bank.size => Ok(TempSlot {
            addr: bank.base + offset,
            size,
        }),
        _ => Err(LayoutError::SubImageOverrun(id.raw())),
    }
}

/// Every sub-image listed by `header` must fit in `bank`.
fn check_container_fits(header: &ImageHeader, bank: &PartitionRecord) -> Result<(), LayoutError> {
    for id in ImageId::BANK_IMAGES {
        if header.sub_image_size(id) != 0 {
            sub_image_slot(header, bank, id)?;
        }
    }
    Ok(())
}

/// Lookups against one layout and one active bank snapshot.
pub struct Resolver<'a> {
    layout: &'a FlashLayout,
    banks: &'a ActiveBanks,
    config: &'a DfuConfig,
}

impl<'a> Resolver<'a> {
    pub fn new(layout: &'a FlashLayout, banks: &'a ActiveBanks, config: &'a DfuConfig) -> Self {
        Self {
            layout,
            banks,
            config,
        }
    }

    pub fn layout(&self) -> &'a FlashLayout {
        self.layout
    }

    fn record(&self, name: PartitionName) -> Result<&'a PartitionRecord, LayoutError> {
        self.layout.get(name).ok_or(LayoutError::UnknownPartition(name))
    }

    pub fn bank_address(&self, name: PartitionName) -> Result<u32, LayoutError> {
        Ok(self.record(name)?.base)
    }

    pub fn bank_size(&self, name: PartitionName) -> Result<u32, LayoutError> {
        Ok(self.record(name)?.size)
    }

    /// The bank currently reported active for `family`.
    pub fn active_bank(&self, family: BankFamily) -> Result<PartitionRecord, LayoutError> {
        let addr = self.banks.get(family).ok_or(LayoutError::NoActiveBank)?;
        family
            .records(self.layout)
            .into_iter()
            .find(|r| r.base == addr)
            .ok_or(LayoutError::NoActiveBank)
    }

    /// The bank after the active one, in enumeration order.
    pub fn temp_bank(&self, family: BankFamily) -> Result<PartitionRecord, LayoutError> {
        let records = family.records(self.layout);
        if records.len() < 2 {
            return Err(LayoutError::NoTempBank);
        }
        let addr = self.banks.get(family).ok_or(LayoutError::NoActiveBank)?;
        let index = records
            .iter()
            .position(|r| r.base == addr)
            .ok_or(LayoutError::NoActiveBank)?;
        Ok(records[(index + 1) % records.len()])
    }

    fn user_data_record(&self, id: ImageId) -> Result<&'a PartitionRecord, LayoutError> {
        let index = id.user_data_index().ok_or(LayoutError::NotPlaceable(id.raw()))?;
        self.record(PartitionName::USER_DATA[index])
    }

    /// Read and check the OTA container header at the start of `bank`.
    ///
    /// The `image_info` table must place every listed sub-image inside the bank.
    pub fn container_header<F: ReadNorFlash>(
        &self,
        flash: &mut F,
        bank: &PartitionRecord,
    ) -> Result<ImageHeader, LayoutError> {
        let header = flash::read_header(flash, self.layout.flash_base, bank.base)
            .map_err(LayoutError::OtaHeader)?;
        header
            .validate(ImageId::Ota, &self.config.header_check(bank.size))
            .map_err(|e| LayoutError::OtaHeader(e.into()))?;
        check_container_fits(&header, bank)?;
        Ok(header)
    }

    /// Address of the active copy's header.
    pub fn image_header_addr<F: ReadNorFlash>(&self, flash: &mut F, id: ImageId) -> Result<u32, LayoutError> {
        match id.family() {
            ImageFamily::BootPatch => Ok(self.active_bank(BankFamily::BootPatch)?.base),
            ImageFamily::SecureApp => Ok(self.active_bank(BankFamily::SecureApp)?.base),
            ImageFamily::SecureAppData => Ok(self.active_bank(BankFamily::SecureAppData)?.base),
            ImageFamily::OtaHeader => Ok(self.active_bank(BankFamily::Ota)?.base),
            ImageFamily::OtaSubImage => {
                let bank = self.active_bank(BankFamily::Ota)?;
                let header = self.container_header(flash, &bank)?;
                if header.sub_image_size(id) == 0 {
                    return Err(LayoutError::NotPlaceable(id.raw()));
                }
                Ok(sub_image_slot(&header, &bank, id)?.addr)
            }
            ImageFamily::UserData => Ok(self.user_data_record(id)?.base),
            ImageFamily::Fixed => Err(LayoutError::NotPlaceable(id.raw())),
        }
    }

    /// Where an incoming copy of `id` goes.
    ///
    /// `tmp_offset` is the fill level of `OTA_TMP` when the part cannot switch
    /// OTA banks.
    pub fn temp_slot<F: ReadNorFlash>(
        &self,
        flash: &mut F,
        id: ImageId,
        tmp_offset: u32,
    ) -> Result<TempSlot, LayoutError> {
        let whole = |r: PartitionRecord| TempSlot {
            addr: r.base,
            size: r.size,
        };

        match id.family() {
            ImageFamily::BootPatch => Ok(whole(self.temp_bank(BankFamily::BootPatch)?)),
            ImageFamily::SecureApp => Ok(whole(self.temp_bank(BankFamily::SecureApp)?)),
            ImageFamily::SecureAppData => Ok(whole(self.temp_bank(BankFamily::SecureAppData)?)),
            ImageFamily::UserData => Ok(whole(*self.user_data_record(id)?)),
            ImageFamily::Fixed => Err(LayoutError::NotPlaceable(id.raw())),
            ImageFamily::OtaHeader => {
                if !self.layout.bank_switch {
                    return Err(LayoutError::NotPlaceable(id.raw()));
                }
                let bank = self.temp_bank(BankFamily::Ota)?;
                let size = if self.layout.dual_bank_merge {
                    bank.size
                } else {
                    OTA_HEADER_SIZE
                };
                Ok(TempSlot {
                    addr: bank.base,
                    size,
                })
            }
            ImageFamily::OtaSubImage if !self.layout.bank_switch => {
                let tmp = self.record(PartitionName::OtaTmp)?;
                let offset = tmp_offset.min(tmp.size);
                Ok(TempSlot {
                    addr: tmp.base + offset,
                    size: tmp.size - offset,
                })
            }
            ImageFamily::OtaSubImage => {
                let bank = self.temp_bank(BankFamily::Ota)?;
                if self.layout.dual_bank_merge {
                    return Ok(TempSlot {
                        addr: bank.base,
                        size: 0,
                    });
                }
                let slot = self
                    .container_header(flash, &bank)
                    .and_then(|header| sub_image_slot(&header, &bank, id));
                match slot {
                    Ok(slot) => Ok(slot),
                    Err(e) => {
                        debug!("Resolver: temp container header unusable: {:?}", e);
                        Ok(TempSlot {
                            addr: bank.base,
                            size: 0,
                        })
                    }
                }
            }
        }
    }

    pub fn temp_bank_addr<F: ReadNorFlash>(&self, flash: &mut F, id: ImageId) -> Result<u32, LayoutError> {
        Ok(self.temp_slot(flash, id, 0)?.addr)
    }

    pub fn temp_bank_size<F: ReadNorFlash>(&self, flash: &mut F, id: ImageId) -> Result<u32, LayoutError> {
        Ok(self.temp_slot(flash, id, 0)?.size)
    }
}
