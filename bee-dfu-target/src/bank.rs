// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Bank selection.
//!
//! Works out which bank of each family the boot picker will run, by reading
//! the header flags and versions of every bank. Nothing here switches banks:
//! the picker does that on the next reset, from the flags the commit step
//! leaves behind.

use crate::flash;
use bee_dfu_common::header::ImageVersion;
use bee_dfu_common::layout::PartitionRecord;
use bee_dfu_common::{DfuConfig, FlashLayout, ImageId, PartitionName};
use embedded_storage::nor_flash::ReadNorFlash;
use heapless::Vec;

/// Largest number of banks in one family.
pub const MAX_BANKS: usize = 4;

/// A set of banks holding copies of the same image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BankFamily {
    BootPatch,
    SecureApp,
    SecureAppData,
    Ota,
}

impl BankFamily {
    pub const ALL: [BankFamily; 4] = [
        BankFamily::BootPatch,
        BankFamily::SecureApp,
        BankFamily::SecureAppData,
        BankFamily::Ota,
    ];

    /// Candidate banks in enumeration order.
    pub const fn banks(self) -> &'static [PartitionName] {
        match self {
            Self::BootPatch => &[PartitionName::BootPatch0, PartitionName::BootPatch1],
            Self::SecureApp => &[PartitionName::SecureApp0, PartitionName::SecureApp1],
            Self::SecureAppData => &[PartitionName::SecureAppData0, PartitionName::SecureAppData1],
            Self::Ota => &[PartitionName::OtaBank0, PartitionName::OtaBank1],
        }
    }

    /// Image whose header sits at the start of each bank.
    pub const fn header_id(self) -> ImageId {
        match self {
            Self::BootPatch => ImageId::BootPatch,
            Self::SecureApp => ImageId::SecureApp,
            Self::SecureAppData => ImageId::SecureAppData,
            Self::Ota => ImageId::Ota,
        }
    }

    /// Family an image is banked with, if it is banked at all.
    pub const fn of(id: ImageId) -> Option<Self> {
        match id {
            ImageId::BootPatch => Some(Self::BootPatch),
            ImageId::SecureApp => Some(Self::SecureApp),
            ImageId::SecureAppData => Some(Self::SecureAppData),
            _ if id.is_bank_image() => Some(Self::Ota),
            ImageId::Ota => Some(Self::Ota),
            _ => None,
        }
    }

    /// Banks of this family present in `layout`.
    pub fn records(self, layout: &FlashLayout) -> Vec<PartitionRecord, MAX_BANKS> {
        let mut records = Vec::new();
        for name in self.banks() {
            if let Some(record) = layout.get(*name) {
                if self == Self::Ota && !layout.bank_switch && !records.is_empty() {
                    break;
                }
                // Capacity matches the longest family.
                let _ = records.push(*record);
            }
        }
        records
    }
}

/// What the header at the start of a bank says.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BankState {
    /// No valid header of the family.
    Empty,
    /// Valid header, not yet made ready.
    Staged,
    /// Ready and not obsolete: a boot candidate.
    Current(ImageVersion),
    /// Marked obsolete.
    Obsolete,
}

/// Inspect the header at the start of `record`.
pub fn bank_state<F: ReadNorFlash>(
    flash: &mut F,
    layout: &FlashLayout,
    config: &DfuConfig,
    family: BankFamily,
    record: &PartitionRecord,
) -> BankState {
    let Ok(header) = flash::read_header(flash, layout.flash_base, record.base) else {
        return BankState::Empty;
    };
    let check = config.header_check(record.size);
    if header.validate_staged(family.header_id(), &check).is_err() {
        return BankState::Empty;
    }
    let flags = header.ctrl.flags;
    match (flags.not_ready, flags.not_obsolete) {
        (_, false) => BankState::Obsolete,
        (true, true) => BankState::Staged,
        (false, true) => BankState::Current(header.git_ver.version),
    }
}

/// Base address of the bank the picker will boot for `family`.
///
/// The current bank with the highest version wins, the first enumerated on a
/// tie. With no current bank the first bank is reported.
pub fn active_bank<F: ReadNorFlash>(
    flash: &mut F,
    layout: &FlashLayout,
    config: &DfuConfig,
    family: BankFamily,
) -> Option<u32> {
    let records = family.records(layout);
    let mut best: Option<(ImageVersion, u32)> = None;

    for record in &records {
        if let BankState::Current(version) = bank_state(flash, layout, config, family, record) {
            if best.map_or(true, |(v, _)| version > v) {
                best = Some((version, record.base));
            }
        }
    }

    best.map(|(_, base)| base)
        .or_else(|| records.first().map(|r| r.base))
}

/// Banks of `family` currently flagged valid and current.
pub fn current_banks<F: ReadNorFlash>(
    flash: &mut F,
    layout: &FlashLayout,
    config: &DfuConfig,
    family: BankFamily,
) -> Vec<PartitionName, MAX_BANKS> {
    let mut current = Vec::new();
    for record in &family.records(layout) {
        if matches!(bank_state(flash, layout, config, family, record), BankState::Current(_)) {
            let _ = current.push(record.name);
        }
    }
    current
}

/// Active bank base address per family, snapshotted when the update task starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ActiveBanks {
    pub boot_patch: Option<u32>,
    pub secure_app: Option<u32>,
    pub secure_app_data: Option<u32>,
    pub ota: Option<u32>,
}

impl ActiveBanks {
    /// Inspect every family.
    pub fn scan<F: ReadNorFlash>(flash: &mut F, layout: &FlashLayout, config: &DfuConfig) -> Self {
        let secure_app = active_bank(flash, layout, config, BankFamily::SecureApp);

        // Secure app data is banked in step with the secure app.
        let secure_app_data = secure_app.and_then(|addr| {
            let apps = BankFamily::SecureApp.records(layout);
            let index = apps.iter().position(|r| r.base == addr)?;
            BankFamily::SecureAppData.records(layout).get(index).map(|r| r.base)
        });

        let banks = Self {
            boot_patch: active_bank(flash, layout, config, BankFamily::BootPatch),
            secure_app,
            secure_app_data,
            ota: active_bank(flash, layout, config, BankFamily::Ota),
        };
        info!(
            "Banks: ota=0x{:08x} boot_patch=0x{:08x} secure_app=0x{:08x}",
            banks.ota.unwrap_or(0),
            banks.boot_patch.unwrap_or(0),
            banks.secure_app.unwrap_or(0)
        );
        banks
    }

    pub fn get(&self, family: BankFamily) -> Option<u32> {
        match family {
            BankFamily::BootPatch => self.boot_patch,
            BankFamily::SecureApp => self.secure_app,
            BankFamily::SecureAppData => self.secure_app_data,
            BankFamily::Ota => self.ota,
        }
    }

    /// Bank number as reported in `DeviceInfo`: 0 without a spare bank, else index + 1.
    pub fn bank_number(&self, layout: &FlashLayout, family: BankFamily) -> u8 {
        let records = family.records(layout);
        if records.len() < 2 {
            return bee_dfu_common::protocol::BANK_NOT_SWITCHABLE;
        }
        self.get(family)
            .and_then(|addr| records.iter().position(|r| r.base == addr))
            .map_or(bee_dfu_common::protocol::BANK_NOT_SWITCHABLE, |i| i as u8 + 1)
    }
}
