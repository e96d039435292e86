// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Flash partition table.

use heapless::Vec;
use serde::{Deserialize, Serialize};

/// Erase granularity of the NOR flash.
pub const FLASH_SECTOR_SIZE: u32 = 0x1000;
/// Maximum number of records in a layout.
pub const MAX_PARTITIONS: usize = 32;

/// Named flash partition.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PartitionName {
    Occd,
    BootPatch0,
    BootPatch1,
    OtaBank0,
    OtaBank1,
    SecureApp0,
    SecureApp1,
    SecureAppData0,
    SecureAppData1,
    RoData1,
    RoData2,
    RoData3,
    RoData4,
    RoData5,
    RoData6,
    BkpData1,
    BkpData2,
    OtaTmp,
    Ftl,
    UserData1,
    UserData2,
    UserData3,
    UserData4,
    UserData5,
    UserData6,
    UserData7,
    UserData8,
}

impl PartitionName {
    pub const USER_DATA: [PartitionName; 8] = [
        Self::UserData1,
        Self::UserData2,
        Self::UserData3,
        Self::UserData4,
        Self::UserData5,
        Self::UserData6,
        Self::UserData7,
        Self::UserData8,
    ];
}

/// One contiguous flash region.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PartitionRecord {
    pub name: PartitionName,
    pub base: u32,
    pub size: u32,
}

impl PartitionRecord {
    pub const fn new(name: PartitionName, base: u32, size: u32) -> Self {
        Self { name, base, size }
    }

    pub const fn end(&self) -> u32 {
        self.base + self.size
    }

    pub const fn contains(&self, addr: u32, len: u32) -> bool {
        addr >= self.base && len <= self.size && addr - self.base <= self.size - len
    }
}

/// The partition table plus the bank switching capabilities of the part.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct FlashLayout {
    /// Address of the first flash byte.
    pub flash_base: u32,
    pub flash_size: u32,
    /// The boot picker can run from either OTA bank.
    pub bank_switch: bool,
    /// Both OTA banks form one large image area.
    pub dual_bank_merge: bool,
    pub partitions: Vec<PartitionRecord, MAX_PARTITIONS>,
}

const REFERENCE_PARTITIONS: [PartitionRecord; 12] = [
    PartitionRecord::new(PartitionName::Occd, 0x0200_0000, 0x2000),
    PartitionRecord::new(PartitionName::BootPatch0, 0x0200_3000, 0x8000),
    PartitionRecord::new(PartitionName::BootPatch1, 0x0200_B000, 0x8000),
    PartitionRecord::new(PartitionName::OtaBank0, 0x0201_3000, 0x7_0000),
    PartitionRecord::new(PartitionName::OtaBank1, 0x0208_3000, 0x7_0000),
    PartitionRecord::new(PartitionName::SecureApp0, 0x020F_3000, 0x1_0000),
    PartitionRecord::new(PartitionName::SecureApp1, 0x0210_3000, 0x1_0000),
    PartitionRecord::new(PartitionName::SecureAppData0, 0x0211_3000, 0x4000),
    PartitionRecord::new(PartitionName::SecureAppData1, 0x0211_7000, 0x4000),
    PartitionRecord::new(PartitionName::OtaTmp, 0x0211_B000, 0x7_0000),
    PartitionRecord::new(PartitionName::Ftl, 0x0218_B000, 0x4000),
    PartitionRecord::new(PartitionName::UserData1, 0x0218_F000, 0x1_0000),
];

impl Default for FlashLayout {
    /// Reference 4 MiB part with dual OTA banks.
    fn default() -> Self {
        Self {
            flash_base: 0x0200_0000,
            flash_size: 0x40_0000,
            bank_switch: true,
            dual_bank_merge: false,
            partitions: Vec::from_slice(&REFERENCE_PARTITIONS).unwrap_or_default(),
        }
    }
}

impl FlashLayout {
    pub fn get(&self, name: PartitionName) -> Option<&PartitionRecord> {
        self.partitions.iter().find(|p| p.name == name)
    }

    pub fn flash_end(&self) -> u32 {
        self.flash_base.saturating_add(self.flash_size)
    }

    /// `addr..addr + len` lies inside the flash device.
    pub fn in_flash(&self, addr: u32, len: u32) -> bool {
        addr >= self.flash_base
            && len <= self.flash_size
            && addr - self.flash_base <= self.flash_size - len
    }

    /// Partition containing `addr`.
    pub fn partition_at(&self, addr: u32) -> Option<&PartitionRecord> {
        self.partitions.iter().find(|p| p.contains(addr, 0) && addr < p.end())
    }
}
