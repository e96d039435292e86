// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Firmware image header codec.
//!
//! Every image starts with a fixed 1280-byte little-endian header:
//!
//! ```text
//!   0  auth signature (384)     384  image_hash (32)
//! 416  ctrl header (12)         428  uuid (16)
//! 444  exe_base / load_src / load_len / image_base
//! 460  dev_id, flash_layout_size, magic_pattern, dec_key, load_dst, ex_info
//! 512  git_ver (16)             528  public key (388)
//! 916  flash_sec_cfg (20)       936  ver_val
//! 940  image_info[40]          1100  reserved (180)
//! ```
//!
//! The payload follows at `header + DEFAULT_HEADER_SIZE`.

use crate::image_id::{ImageFamily, ImageId};
use serde::{Deserialize, Serialize};

/// Size of the image header that precedes every payload.
pub const DEFAULT_HEADER_SIZE: usize = 0x400 + 256;
/// Space reserved for the OTA container header at the start of an OTA bank.
pub const OTA_HEADER_SIZE: u32 = 0x1000;
/// Magic pattern carried by the OTA container header.
pub const OTA_MAGIC_PATTERN: u32 = 0x5A5A_12A5;
/// Erased `image_info` entries read as this value.
pub const IMG_INFO_DEFAULT_VALUE: u32 = 0xFFFF_FFFF;

pub const AUTH_SIGNATURE_SIZE: usize = 384;
pub const SHA256_SIZE: usize = 32;
pub const UUID_SIZE: usize = 16;
pub const PUBLIC_KEY_SIZE: usize = 388;
pub const IMAGE_INFO_WORDS: usize = 40;
pub const CTRL_HEADER_SIZE: usize = 12;

pub const IMAGE_HASH_OFFSET: usize = 384;
pub const CTRL_HEADER_OFFSET: usize = 416;
pub const CTRL_FLAG_OFFSET: usize = 420;
const IMAGE_ID_OFFSET: usize = 422;
const UUID_OFFSET: usize = 428;
const EXE_BASE_OFFSET: usize = 444;
const MAGIC_OFFSET: usize = 464;
const DEC_KEY_OFFSET: usize = 468;
const LOAD_DST_OFFSET: usize = 484;
const EX_INFO_OFFSET: usize = 488;
const GIT_VER_OFFSET: usize = 512;
const PUBLIC_KEY_OFFSET: usize = 528;
const FLASH_SEC_CFG_OFFSET: usize = 916;
const VER_VAL_OFFSET: usize = 936;
const IMAGE_INFO_OFFSET: usize = 940;
const RESERVED_OFFSET: usize = 1100;

/// First byte covered by the image digest.
pub const HASH_START: usize = CTRL_HEADER_OFFSET;
/// First byte covered by a vendor signature.
pub const SIGNATURE_START: usize = IMAGE_HASH_OFFSET;

pub const NOT_READY_BIT: u16 = 1 << 7;
pub const NOT_OBSOLETE_BIT: u16 = 1 << 8;

/// Header validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HeaderError {
    #[error("input shorter than an image header")]
    Truncated,
    #[error("header address outside of flash")]
    BadAddress,
    #[error("unexpected image id")]
    UnknownId,
    #[error("payload larger than its partition")]
    SizeExceeded,
    #[error("bad OTA magic pattern")]
    BadMagic,
    #[error("image is not ready")]
    NotReady,
    #[error("image built for another IC")]
    BadIcType,
    #[error("image UUID does not match ROM")]
    BadUuid,
}

/// Key used to decrypt an encrypted payload.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EncKeySelect {
    Scek,
    ScekWithRtkConst,
    Ocek,
    OcekWithOemConst,
    OnFlash,
    Reserved(u8),
}

/// Block chaining applied to encrypted payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CipherMode {
    Cbc,
    Ctr,
}

impl EncKeySelect {
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x7 {
            0 => Self::Scek,
            1 => Self::ScekWithRtkConst,
            2 => Self::Ocek,
            3 => Self::OcekWithOemConst,
            4 => Self::OnFlash,
            other => Self::Reserved(other),
        }
    }

    pub const fn bits(self) -> u8 {
        match self {
            Self::Scek => 0,
            Self::ScekWithRtkConst => 1,
            Self::Ocek => 2,
            Self::OcekWithOemConst => 3,
            Self::OnFlash => 4,
            Self::Reserved(bits) => bits & 0x7,
        }
    }

    /// Secure-chip keys decrypt in CBC, OEM and on-flash keys in CTR.
    pub const fn cipher_mode(self) -> Option<CipherMode> {
        match self {
            Self::Scek | Self::ScekWithRtkConst => Some(CipherMode::Cbc),
            Self::Ocek | Self::OcekWithOemConst | Self::OnFlash => Some(CipherMode::Ctr),
            Self::Reserved(_) => None,
        }
    }
}

/// Decoded `ctrl_flag` word.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CtrlFlags {
    pub xip: bool,
    pub enc: bool,
    pub load_when_boot: bool,
    pub enc_load: bool,
    pub enc_key_select: EncKeySelect,
    pub not_ready: bool,
    pub not_obsolete: bool,
    pub integrity_check_en_in_boot: bool,
    pub compressed_not_ready: bool,
    pub compressed_not_obsolete: bool,
    pub reserved: bool,
    pub image_type: u8,
}

const fn bit(bits: u16, n: u32) -> bool {
    bits & (1 << n) != 0
}

impl CtrlFlags {
    /// Flags of a freshly built image: not yet ready, not obsolete.
    pub const fn shipped() -> Self {
        Self::from_bits(NOT_READY_BIT | NOT_OBSOLETE_BIT)
    }

    pub const fn from_bits(bits: u16) -> Self {
        Self {
            xip: bit(bits, 0),
            enc: bit(bits, 1),
            load_when_boot: bit(bits, 2),
            enc_load: bit(bits, 3),
            enc_key_select: EncKeySelect::from_bits(((bits >> 4) & 0x7) as u8),
            not_ready: bit(bits, 7),
            not_obsolete: bit(bits, 8),
            integrity_check_en_in_boot: bit(bits, 9),
            compressed_not_ready: bit(bits, 10),
            compressed_not_obsolete: bit(bits, 11),
            reserved: bit(bits, 12),
            image_type: ((bits >> 13) & 0x7) as u8,
        }
    }

    pub const fn bits(&self) -> u16 {
        (self.xip as u16)
            | (self.enc as u16) << 1
            | (self.load_when_boot as u16) << 2
            | (self.enc_load as u16) << 3
            | ((self.enc_key_select.bits() as u16) & 0x7) << 4
            | (self.not_ready as u16) << 7
            | (self.not_obsolete as u16) << 8
            | (self.integrity_check_en_in_boot as u16) << 9
            | (self.compressed_not_ready as u16) << 10
            | (self.compressed_not_obsolete as u16) << 11
            | (self.reserved as u16) << 12
            | ((self.image_type as u16) & 0x7) << 13
    }

    /// `not_ready=0` together with `not_obsolete=1`.
    pub const fn is_valid_and_current(&self) -> bool {
        !self.not_ready && self.not_obsolete
    }
}

/// The 12-byte control header. Also the payload of `START_DFU`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CtrlHeader {
    pub crc16: u16,
    pub ic_type: u8,
    pub secure_version: u8,
    pub flags: CtrlFlags,
    pub image_id: u16,
    pub payload_len: u32,
}

impl CtrlHeader {
    pub fn decode(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() < CTRL_HEADER_SIZE {
            return Err(HeaderError::Truncated);
        }
        Ok(Self {
            crc16: le_u16(bytes, 0),
            ic_type: bytes[2],
            secure_version: bytes[3],
            flags: CtrlFlags::from_bits(le_u16(bytes, 4)),
            image_id: le_u16(bytes, 6),
            payload_len: le_u32(bytes, 8),
        })
    }

    pub fn encode(&self) -> [u8; CTRL_HEADER_SIZE] {
        let mut out = [0u8; CTRL_HEADER_SIZE];
        put_u16(&mut out, 0, self.crc16);
        out[2] = self.ic_type;
        out[3] = self.secure_version;
        put_u16(&mut out, 4, self.flags.bits());
        put_u16(&mut out, 6, self.image_id);
        put_u32(&mut out, 8, self.payload_len);
        out
    }
}

/// Packed image version: major 4 bits, minor 8, revision 15, reserved 5.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImageVersion {
    pub major: u8,
    pub minor: u8,
    pub revision: u16,
    pub reserved: u8,
}

impl ImageVersion {
    pub const fn new(major: u8, minor: u8, revision: u16) -> Self {
        Self {
            major: major & 0xF,
            minor,
            revision: revision & 0x7FFF,
            reserved: 0,
        }
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self {
            major: (bits & 0xF) as u8,
            minor: ((bits >> 4) & 0xFF) as u8,
            revision: ((bits >> 12) & 0x7FFF) as u16,
            reserved: ((bits >> 27) & 0x1F) as u8,
        }
    }

    pub const fn bits(&self) -> u32 {
        (self.major as u32 & 0xF)
            | (self.minor as u32) << 4
            | (self.revision as u32 & 0x7FFF) << 12
            | (self.reserved as u32 & 0x1F) << 27
    }
}

/// Version block embedded by the build.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GitVersion {
    pub version: ImageVersion,
    pub commit_id: u32,
    pub customer_name: [u8; 8],
}

/// Fields the header is validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HeaderCheck {
    pub ic_type: u8,
    pub rom_uuid: [u8; UUID_SIZE],
    pub partition_size: u32,
}

/// A fully decoded image header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    pub signature: [u8; AUTH_SIGNATURE_SIZE],
    pub image_hash: [u8; SHA256_SIZE],
    pub ctrl: CtrlHeader,
    pub uuid: [u8; UUID_SIZE],
    pub exe_base: u32,
    pub load_src: u32,
    pub load_len: u32,
    pub image_base: u32,
    pub dev_id: u16,
    pub flash_layout_size: u16,
    pub magic_pattern: u32,
    pub dec_key: [u8; 16],
    pub load_dst: u32,
    pub ex_info: [u8; 24],
    pub git_ver: GitVersion,
    pub public_key: [u8; PUBLIC_KEY_SIZE],
    pub flash_sec_cfg: [u8; 20],
    pub ver_val: u32,
    pub image_info: [u32; IMAGE_INFO_WORDS],
    pub reserved: [u8; 180],
}

impl ImageHeader {
    /// Header template for `image_id`, in its shipped (not ready) state.
    pub fn new(image_id: ImageId, ic_type: u8) -> Self {
        Self {
            signature: [0; AUTH_SIGNATURE_SIZE],
            image_hash: [0; SHA256_SIZE],
            ctrl: CtrlHeader {
                crc16: 0,
                ic_type,
                secure_version: 0,
                flags: CtrlFlags::shipped(),
                image_id: image_id.raw(),
                payload_len: 0,
            },
            uuid: [0; UUID_SIZE],
            exe_base: 0,
            load_src: 0,
            load_len: 0,
            image_base: 0,
            dev_id: 0,
            flash_layout_size: 0,
            magic_pattern: if image_id == ImageId::Ota {
                OTA_MAGIC_PATTERN
            } else {
                0
            },
            dec_key: [0; 16],
            load_dst: 0,
            ex_info: [0; 24],
            git_ver: GitVersion::default(),
            public_key: [0; PUBLIC_KEY_SIZE],
            flash_sec_cfg: [0; 20],
            ver_val: 0,
            image_info: [IMG_INFO_DEFAULT_VALUE; IMAGE_INFO_WORDS],
            reserved: [0; 180],
        }
    }

    /// Decode the header fields without validating them.
    pub fn parse(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() < DEFAULT_HEADER_SIZE {
            return Err(HeaderError::Truncated);
        }

        let mut image_info = [0u32; IMAGE_INFO_WORDS];
        for (i, word) in image_info.iter_mut().enumerate() {
            *word = le_u32(bytes, IMAGE_INFO_OFFSET + i * 4);
        }

        Ok(Self {
            signature: array(bytes, 0),
            image_hash: array(bytes, IMAGE_HASH_OFFSET),
            ctrl: CtrlHeader::decode(&bytes[CTRL_HEADER_OFFSET..])?,
            uuid: array(bytes, UUID_OFFSET),
            exe_base: le_u32(bytes, EXE_BASE_OFFSET),
            load_src: le_u32(bytes, EXE_BASE_OFFSET + 4),
            load_len: le_u32(bytes, EXE_BASE_OFFSET + 8),
            image_base: le_u32(bytes, EXE_BASE_OFFSET + 12),
            dev_id: le_u16(bytes, EXE_BASE_OFFSET + 16),
            flash_layout_size: le_u16(bytes, EXE_BASE_OFFSET + 18),
            magic_pattern: le_u32(bytes, MAGIC_OFFSET),
            dec_key: array(bytes, DEC_KEY_OFFSET),
            load_dst: le_u32(bytes, LOAD_DST_OFFSET),
            ex_info: array(bytes, EX_INFO_OFFSET),
            git_ver: GitVersion {
                version: ImageVersion::from_bits(le_u32(bytes, GIT_VER_OFFSET)),
                commit_id: le_u32(bytes, GIT_VER_OFFSET + 4),
                customer_name: array(bytes, GIT_VER_OFFSET + 8),
            },
            public_key: array(bytes, PUBLIC_KEY_OFFSET),
            flash_sec_cfg: array(bytes, FLASH_SEC_CFG_OFFSET),
            ver_val: le_u32(bytes, VER_VAL_OFFSET),
            image_info,
            reserved: array(bytes, RESERVED_OFFSET),
        })
    }

    /// Serialise field by field.
    pub fn encode(&self) -> [u8; DEFAULT_HEADER_SIZE] {
        let mut out = [0u8; DEFAULT_HEADER_SIZE];
        out[..AUTH_SIGNATURE_SIZE].copy_from_slice(&self.signature);
        out[IMAGE_HASH_OFFSET..CTRL_HEADER_OFFSET].copy_from_slice(&self.image_hash);
        out[CTRL_HEADER_OFFSET..UUID_OFFSET].copy_from_slice(&self.ctrl.encode());
        out[UUID_OFFSET..EXE_BASE_OFFSET].copy_from_slice(&self.uuid);
        put_u32(&mut out, EXE_BASE_OFFSET, self.exe_base);
        put_u32(&mut out, EXE_BASE_OFFSET + 4, self.load_src);
        put_u32(&mut out, EXE_BASE_OFFSET + 8, self.load_len);
        put_u32(&mut out, EXE_BASE_OFFSET + 12, self.image_base);
        put_u16(&mut out, EXE_BASE_OFFSET + 16, self.dev_id);
        put_u16(&mut out, EXE_BASE_OFFSET + 18, self.flash_layout_size);
        put_u32(&mut out, MAGIC_OFFSET, self.magic_pattern);
        out[DEC_KEY_OFFSET..LOAD_DST_OFFSET].copy_from_slice(&self.dec_key);
        put_u32(&mut out, LOAD_DST_OFFSET, self.load_dst);
        out[EX_INFO_OFFSET..GIT_VER_OFFSET].copy_from_slice(&self.ex_info);
        put_u32(&mut out, GIT_VER_OFFSET, self.git_ver.version.bits());
        put_u32(&mut out, GIT_VER_OFFSET + 4, self.git_ver.commit_id);
        out[GIT_VER_OFFSET + 8..PUBLIC_KEY_OFFSET].copy_from_slice(&self.git_ver.customer_name);
        out[PUBLIC_KEY_OFFSET..FLASH_SEC_CFG_OFFSET].copy_from_slice(&self.public_key);
        out[FLASH_SEC_CFG_OFFSET..VER_VAL_OFFSET].copy_from_slice(&self.flash_sec_cfg);
        put_u32(&mut out, VER_VAL_OFFSET, self.ver_val);
        for (i, word) in self.image_info.iter().enumerate() {
            put_u32(&mut out, IMAGE_INFO_OFFSET + i * 4, *word);
        }
        out[RESERVED_OFFSET..].copy_from_slice(&self.reserved);
        out
    }

    pub fn image_id(&self) -> Option<ImageId> {
        ImageId::from_raw(self.ctrl.image_id)
    }

    /// Header plus payload, in bytes.
    ///
    /// Fails with `SizeExceeded` when `payload_len` leaves no room for the header.
    pub fn total_len(&self) -> Result<u32, HeaderError> {
        (DEFAULT_HEADER_SIZE as u32)
            .checked_add(self.ctrl.payload_len)
            .ok_or(HeaderError::SizeExceeded)
    }

    /// Size recorded in `image_info` for a sub-image; erased entries read as 0.
    pub fn sub_image_size(&self, id: ImageId) -> u32 {
        self.sub_image_word(id, 1)
    }

    /// Address recorded in `image_info` for a sub-image.
    pub fn sub_image_addr(&self, id: ImageId) -> u32 {
        self.sub_image_word(id, 0)
    }

    fn sub_image_word(&self, id: ImageId, word: usize) -> u32 {
        let Some(index) = id.image_info_index() else {
            return 0;
        };
        match self.image_info[index * 2 + word] {
            IMG_INFO_DEFAULT_VALUE => 0,
            value => value,
        }
    }

    pub fn set_sub_image(&mut self, id: ImageId, addr: u32, size: u32) {
        if let Some(index) = id.image_info_index() {
            self.image_info[index * 2] = addr;
            self.image_info[index * 2 + 1] = size;
        }
    }

    /// Validate as the boot picker would: the image must be ready.
    pub fn validate(&self, expected: ImageId, check: &HeaderCheck) -> Result<(), HeaderError> {
        self.check(expected, check, true)
    }

    /// Validate an image that has been written but not yet committed.
    pub fn validate_staged(&self, expected: ImageId, check: &HeaderCheck) -> Result<(), HeaderError> {
        self.check(expected, check, false)
    }

    fn check(&self, expected: ImageId, check: &HeaderCheck, require_ready: bool) -> Result<(), HeaderError> {
        if self.ctrl.image_id != expected.raw() {
            return Err(HeaderError::UnknownId);
        }
        if self.ctrl.payload_len > check.partition_size {
            return Err(HeaderError::SizeExceeded);
        }

        match expected.family() {
            ImageFamily::OtaHeader => {
                if self.magic_pattern != OTA_MAGIC_PATTERN {
                    return Err(HeaderError::BadMagic);
                }
                Ok(())
            }
            ImageFamily::BootPatch
            | ImageFamily::SecureApp
            | ImageFamily::SecureAppData
            | ImageFamily::OtaSubImage => {
                if require_ready && self.ctrl.flags.not_ready {
                    return Err(HeaderError::NotReady);
                }
                if self.ctrl.ic_type != check.ic_type {
                    return Err(HeaderError::BadIcType);
                }
                if self.uuid != check.rom_uuid {
                    return Err(HeaderError::BadUuid);
                }
                Ok(())
            }
            ImageFamily::UserData | ImageFamily::Fixed => Err(HeaderError::UnknownId),
        }
    }
}

/// Parse and validate a header in one step.
pub fn decode(bytes: &[u8], expected: ImageId, check: &HeaderCheck) -> Result<ImageHeader, HeaderError> {
    let header = ImageHeader::parse(bytes)?;
    header.validate(expected, check)?;
    Ok(header)
}

/// Apply `f` to the byte at `image_offset` if it falls inside `chunk`.
///
/// `chunk_offset` is the image offset of `chunk[0]`.
pub fn patch_image_byte(chunk: &mut [u8], chunk_offset: u32, image_offset: u32, f: impl FnOnce(u8) -> u8) {
    let Some(pos) = image_offset.checked_sub(chunk_offset) else {
        return;
    };
    if let Some(byte) = chunk.get_mut(pos as usize) {
        *byte = f(*byte);
    }
}

/// Put the flag word bytes of `chunk` back into their shipped state
/// (`not_ready=1`, `not_obsolete=1`) so the digest does not depend on activation.
pub fn normalize_flag_bytes(chunk: &mut [u8], chunk_offset: u32) {
    let [ready_mask, obsolete_mask] = (NOT_READY_BIT | NOT_OBSOLETE_BIT).to_le_bytes();
    patch_image_byte(chunk, chunk_offset, CTRL_FLAG_OFFSET as u32, |b| b | ready_mask);
    patch_image_byte(chunk, chunk_offset, CTRL_FLAG_OFFSET as u32 + 1, |b| b | obsolete_mask);
}

fn le_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn le_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn put_u16(out: &mut [u8], offset: usize, value: u16) {
    out[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut [u8], offset: usize, value: u32) {
    out[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn array<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}
