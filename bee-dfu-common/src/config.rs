// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Runtime configuration of the update engine.

use crate::header::{HeaderCheck, UUID_SIZE};
use crate::protocol::MAX_BUFFER_SIZE;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Default time allowed for a peer to connect after entering DFU mode.
pub const WAIT_FOR_CONNECTION_MS: u32 = 60_000;
/// Default total transfer budget for each started budget unit.
pub const TOTAL_TRANSFER_MS: u32 = 240_000;
/// Announced image bytes covered by one total-transfer budget.
pub const TOTAL_TIMEOUT_UNIT: u32 = 100 * 1024;

bitflags! {
    /// Features advertised to the peer in `DeviceInfo`.
    #[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceFeatures: u8 {
        const SUPPORT_BUFFER_CHECK = 1 << 0;
        const ENABLE_AES_ENCRYPT = 1 << 1;
        const ENCRYPT_MODE_16N = 1 << 2;
        const SUPPORT_MULTIIMAGE = 1 << 3;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for DeviceFeatures {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "DeviceFeatures(0x{=u8:02x})", self.bits());
    }
}

/// Vendor signature carried in the image auth block.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SignatureScheme {
    /// Images are checked against their SHA-256 digest only.
    #[default]
    None,
    Rsa3072,
    Ecdsa,
    Ed25519,
}

impl SignatureScheme {
    /// Length of the public key inside the header's key field.
    pub const fn public_key_len(self) -> usize {
        match self {
            Self::None => 0,
            Self::Rsa3072 => 384 + 4,
            Self::Ecdsa => 65,
            Self::Ed25519 => 32,
        }
    }
}

/// Engine configuration. Loaded from TOML by the host tool.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct DfuConfig {
    /// Chip type every image must be built for.
    pub ic_type: u8,
    /// UUID of the ROM symbol table images are linked against.
    pub rom_uuid: [u8; UUID_SIZE],
    /// Lowest `secure_version` accepted by `START_DFU`.
    pub min_secure_version: u8,
    pub features: DeviceFeatures,
    /// Bytes between two buffer checks.
    pub buffer_size: u16,
    pub mtu_size: u16,
    pub wait_for_connection_ms: u32,
    pub total_transfer_ms: u32,
    pub total_timeout_unit: u32,
    pub signature: SignatureScheme,
    /// Buffer CRC mismatches the peer may recover from by resending.
    pub buffer_crc_retries: u8,
}

impl Default for DfuConfig {
    fn default() -> Self {
        Self {
            ic_type: 0xF,
            rom_uuid: [0; UUID_SIZE],
            min_secure_version: 0,
            features: DeviceFeatures::SUPPORT_BUFFER_CHECK | DeviceFeatures::SUPPORT_MULTIIMAGE,
            buffer_size: MAX_BUFFER_SIZE,
            mtu_size: 247,
            wait_for_connection_ms: WAIT_FOR_CONNECTION_MS,
            total_transfer_ms: TOTAL_TRANSFER_MS,
            total_timeout_unit: TOTAL_TIMEOUT_UNIT,
            signature: SignatureScheme::None,
            buffer_crc_retries: 0,
        }
    }
}

impl DfuConfig {
    pub fn header_check(&self, partition_size: u32) -> HeaderCheck {
        HeaderCheck {
            ic_type: self.ic_type,
            rom_uuid: self.rom_uuid,
            partition_size,
        }
    }

    pub fn supports(&self, feature: DeviceFeatures) -> bool {
        self.features.contains(feature)
    }
}
