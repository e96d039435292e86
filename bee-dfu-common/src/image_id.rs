// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Firmware image identifiers.
//!
//! Every image carries its identifier in `ctrl.image_id`. Identifiers in
//! `[BootPatch, IMG_MAX)` are DFU images tracked in the valid bitmap; the
//! `UserData*` identifiers live at the top of the 16-bit range and have a
//! bitmap of their own.

use serde::{Deserialize, Serialize};

/// First identifier tracked in the valid bitmap.
pub const IMG_DFU_FIRST: u16 = 0x379F;
/// First identifier stored inside an OTA bank container.
pub const IMG_BANK_FIRST: u16 = 0x37A6;
/// One past the last OTA identifier.
pub const IMG_MAX: u16 = 0x37B5;
/// First user-data identifier (`UserData8`).
pub const IMG_USER_DATA_FIRST: u16 = 0xFFF7;
/// One past the last user-data identifier.
pub const IMG_USER_DATA_MAX: u16 = 0xFFFF;

/// Number of user-data images.
pub const USER_DATA_COUNT: usize = (IMG_USER_DATA_MAX - IMG_USER_DATA_FIRST) as usize;
/// Number of images that can live inside an OTA bank container.
pub const BANK_IMAGE_COUNT: usize = (IMG_MAX - IMG_BANK_FIRST) as usize;
/// Upper bound on the number of images reported in one notification.
pub const MAX_IMAGE_NUM: usize = (IMG_MAX - IMG_DFU_FIRST) as usize + USER_DATA_COUNT;

/// Identifier of a firmware component.
#[repr(u16)]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ImageId {
    Sccd = 0x379D,
    Occd = 0x379E,
    BootPatch = 0x379F,
    Ota = 0x37A0,
    SecureApp = 0x37A2,
    SecureAppData = 0x37A3,
    BtStackPatch = 0x37A6,
    McuPatch = 0x37A7,
    UpperStack = 0x37A8,
    McuApp = 0x37A9,
    McuCfgData = 0x37AA,
    McuAppData1 = 0x37AE,
    McuAppData2 = 0x37AF,
    McuAppData3 = 0x37B0,
    McuAppData4 = 0x37B1,
    McuAppData5 = 0x37B2,
    McuAppData6 = 0x37B3,
    ZigbeeStack = 0x37B4,
    UserData8 = 0xFFF7,
    UserData7 = 0xFFF8,
    UserData6 = 0xFFF9,
    UserData5 = 0xFFFA,
    UserData4 = 0xFFFB,
    UserData3 = 0xFFFC,
    UserData2 = 0xFFFD,
    UserData1 = 0xFFFE,
}

/// Which flash bank family an image belongs to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ImageFamily {
    /// ROM patch, own bank pair.
    BootPatch,
    /// Secure application, own bank pair.
    SecureApp,
    /// Secure application data, banked in step with the secure application.
    SecureAppData,
    /// The OTA container header itself.
    OtaHeader,
    /// An image packed inside the OTA container.
    OtaSubImage,
    /// Single-copy user data.
    UserData,
    /// Not updatable over DFU.
    Fixed,
}

impl ImageId {
    /// Every image the engine can receive, in identifier order.
    pub const TRANSFERABLE: [ImageId; 24] = [
        ImageId::BootPatch,
        ImageId::Ota,
        ImageId::SecureApp,
        ImageId::SecureAppData,
        ImageId::BtStackPatch,
        ImageId::McuPatch,
        ImageId::UpperStack,
        ImageId::McuApp,
        ImageId::McuCfgData,
        ImageId::McuAppData1,
        ImageId::McuAppData2,
        ImageId::McuAppData3,
        ImageId::McuAppData4,
        ImageId::McuAppData5,
        ImageId::McuAppData6,
        ImageId::ZigbeeStack,
        ImageId::UserData1,
        ImageId::UserData2,
        ImageId::UserData3,
        ImageId::UserData4,
        ImageId::UserData5,
        ImageId::UserData6,
        ImageId::UserData7,
        ImageId::UserData8,
    ];

    /// Images stored inside an OTA bank container, in placement order.
    pub const BANK_IMAGES: [ImageId; 12] = [
        ImageId::BtStackPatch,
        ImageId::McuPatch,
        ImageId::UpperStack,
        ImageId::McuApp,
        ImageId::McuCfgData,
        ImageId::McuAppData1,
        ImageId::McuAppData2,
        ImageId::McuAppData3,
        ImageId::McuAppData4,
        ImageId::McuAppData5,
        ImageId::McuAppData6,
        ImageId::ZigbeeStack,
    ];

    /// Decode a raw identifier. Returns `None` for ids that are not assigned.
    pub const fn from_raw(raw: u16) -> Option<Self> {
        Some(match raw {
            0x379D => Self::Sccd,
            0x379E => Self::Occd,
            0x379F => Self::BootPatch,
            0x37A0 => Self::Ota,
            0x37A2 => Self::SecureApp,
            0x37A3 => Self::SecureAppData,
            0x37A6 => Self::BtStackPatch,
            0x37A7 => Self::McuPatch,
            0x37A8 => Self::UpperStack,
            0x37A9 => Self::McuApp,
            0x37AA => Self::McuCfgData,
            0x37AE => Self::McuAppData1,
            0x37AF => Self::McuAppData2,
            0x37B0 => Self::McuAppData3,
            0x37B1 => Self::McuAppData4,
            0x37B2 => Self::McuAppData5,
            0x37B3 => Self::McuAppData6,
            0x37B4 => Self::ZigbeeStack,
            0xFFF7 => Self::UserData8,
            0xFFF8 => Self::UserData7,
            0xFFF9 => Self::UserData6,
            0xFFFA => Self::UserData5,
            0xFFFB => Self::UserData4,
            0xFFFC => Self::UserData3,
            0xFFFD => Self::UserData2,
            0xFFFE => Self::UserData1,
            _ => return None,
        })
    }

    pub const fn raw(self) -> u16 {
        self as u16
    }

    pub const fn family(self) -> ImageFamily {
        match self {
            Self::BootPatch => ImageFamily::BootPatch,
            Self::SecureApp => ImageFamily::SecureApp,
            Self::SecureAppData => ImageFamily::SecureAppData,
            Self::Ota => ImageFamily::OtaHeader,
            Self::Sccd | Self::Occd => ImageFamily::Fixed,
            _ if self.is_user_data() => ImageFamily::UserData,
            _ => ImageFamily::OtaSubImage,
        }
    }

    pub const fn is_user_data(self) -> bool {
        let raw = self.raw();
        raw >= IMG_USER_DATA_FIRST && raw < IMG_USER_DATA_MAX
    }

    /// Whether the image is stored inside an OTA bank container.
    pub const fn is_bank_image(self) -> bool {
        let raw = self.raw();
        raw >= IMG_BANK_FIRST && raw < IMG_MAX
    }

    /// Bit in the valid bitmap, for DFU images.
    pub const fn valid_bit(self) -> Option<u32> {
        let raw = self.raw();
        if raw >= IMG_DFU_FIRST && raw < IMG_MAX {
            Some(1 << (raw - IMG_DFU_FIRST))
        } else {
            None
        }
    }

    /// Bit in the user-data valid bitmap.
    pub const fn user_data_bit(self) -> Option<u8> {
        if self.is_user_data() {
            Some(1 << (self.raw() - IMG_USER_DATA_FIRST))
        } else {
            None
        }
    }

    /// Index into the OTA header's `image_info` table.
    pub const fn image_info_index(self) -> Option<usize> {
        let raw = self.raw();
        if raw > ImageId::Ota.raw() && raw < IMG_MAX {
            Some((raw - ImageId::Ota.raw() - 1) as usize)
        } else {
            None
        }
    }

    /// Slot in the per-session sub-image offset table.
    pub const fn bank_slot(self) -> Option<usize> {
        if self.is_bank_image() {
            Some((self.raw() - IMG_BANK_FIRST) as usize)
        } else {
            None
        }
    }

    /// Zero-based user-data index (`UserData1` is 0).
    pub const fn user_data_index(self) -> Option<usize> {
        if self.is_user_data() {
            Some((IMG_USER_DATA_MAX - 1 - self.raw()) as usize)
        } else {
            None
        }
    }
}

impl TryFrom<u16> for ImageId {
    type Error = u16;

    fn try_from(raw: u16) -> Result<Self, Self::Error> {
        Self::from_raw(raw).ok_or(raw)
    }
}

impl From<ImageId> for u16 {
    fn from(id: ImageId) -> u16 {
        id.raw()
    }
}
