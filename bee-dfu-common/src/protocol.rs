// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Control-point protocol shared by the device engine and host tools.
//!
//! Requests are written to the control-point characteristic as a one-byte
//! opcode followed by a fixed little-endian payload. Image data is written to
//! the packet characteristic as raw chunks. Every response is a notification
//! framed `[DFU_OPCODE_NOTIF, opcode, status, body...]`.

use crate::image_id::MAX_IMAGE_NUM;
use heapless::Vec;
use serde::{Deserialize, Serialize};

/// DFU GATT service.
pub const DFU_SERVICE_UUID: u128 = 0x12A2_4D2E_FE14_488E_93D2_173C_8762_0000;
/// Packet characteristic (image data, write without response).
pub const DFU_PACKET_UUID: u128 = 0x12A2_4D2E_FE14_488E_93D2_173C_8763_0000;
/// Control-point characteristic (requests and notifications).
pub const DFU_CONTROL_POINT_UUID: u128 = 0x12A2_4D2E_FE14_488E_93D2_173C_8764_0000;

/// First byte of every notification.
pub const DFU_OPCODE_NOTIF: u8 = 0x10;
/// Largest buffer the peer may send before a buffer check.
pub const MAX_BUFFER_SIZE: u16 = 4096;
/// Largest packet-characteristic write.
pub const MAX_PACKET_LEN: usize = 512;
/// Largest control-point write.
pub const MAX_CONTROL_POINT_LEN: usize = 512;
/// Largest notification the device emits.
pub const MAX_NOTIFICATION_LEN: usize = 3 + 2 + MAX_IMAGE_NUM * 6;
/// Entries accepted in one `CHECK_SHA256` request.
pub const MAX_SHA256_CHECKS: usize = 15;
/// Size of one `CHECK_SHA256` entry.
pub const SHA256_CHECK_ENTRY_LEN: usize = 2 + 32;
/// Packed `DeviceInfo` characteristic value.
pub const DEVICE_INFO_LEN: usize = 12;
/// Protocol revision reported in `DeviceInfo::spec_ver`.
pub const DFU_SPEC_VERSION: u8 = 5;

const START_DFU_LEN: usize = 1 + 12 + 4;
const RECEIVE_FW_IMAGE_INFO_LEN: usize = 1 + 2 + 4;
const VALID_FW_LEN: usize = 1 + 2 + 1;
const ACTIVE_IMAGE_RESET_LEN: usize = 1 + 1;
const SYSTEM_RESET_LEN: usize = 1;
const REPORT_TARGET_INFO_LEN: usize = 1 + 2;
const CONN_PARA_UPDATE_REQ_LEN: usize = 1 + 8;
const REPORT_BUFFER_CRC_LEN: usize = 1 + 2 + 2;

/// Bank numbers reported to the peer.
pub const BANK_NOT_SWITCHABLE: u8 = 0;
pub const BANK_0: u8 = 1;
pub const BANK_1: u8 = 2;

/// Control-point opcodes.
#[repr(u8)]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Opcode {
    StartDfu = 0x01,
    ReceiveFwImageInfo = 0x02,
    ValidFw = 0x03,
    ActiveImageReset = 0x04,
    SystemReset = 0x05,
    ReportTargetInfo = 0x06,
    ConnParaUpdateReq = 0x07,
    BufferCheckEn = 0x09,
    ReportBufferCrc = 0x0a,
    CopyImg = 0x0c,
    GetImageVer = 0x0d,
    GetSectionSize = 0x0e,
    CheckSha256 = 0x0f,
}

impl Opcode {
    pub const fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0x01 => Self::StartDfu,
            0x02 => Self::ReceiveFwImageInfo,
            0x03 => Self::ValidFw,
            0x04 => Self::ActiveImageReset,
            0x05 => Self::SystemReset,
            0x06 => Self::ReportTargetInfo,
            0x07 => Self::ConnParaUpdateReq,
            0x09 => Self::BufferCheckEn,
            0x0a => Self::ReportBufferCrc,
            0x0c => Self::CopyImg,
            0x0d => Self::GetImageVer,
            0x0e => Self::GetSectionSize,
            0x0f => Self::CheckSha256,
            _ => return None,
        })
    }
}

/// Result code carried in every notification.
#[repr(u8)]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DfuStatus {
    Success = 0x01,
    InvalidParameter = 0x02,
    FailOperation = 0x03,
    DataSizeExceedsLimit = 0x04,
    CrcError = 0x05,
    DataLengthError = 0x06,
    FlashWriteError = 0x07,
    FlashEraseError = 0x08,
    SysVersionError = 0x09,
}

impl DfuStatus {
    pub const fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0x01 => Self::Success,
            0x02 => Self::InvalidParameter,
            0x03 => Self::FailOperation,
            0x04 => Self::DataSizeExceedsLimit,
            0x05 => Self::CrcError,
            0x06 => Self::DataLengthError,
            0x07 => Self::FlashWriteError,
            0x08 => Self::FlashEraseError,
            0x09 => Self::SysVersionError,
            _ => return None,
        })
    }
}

/// Control-point decoding failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseError {
    #[error("empty frame")]
    Empty,
    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),
    #[error("unknown status 0x{0:02x}")]
    UnknownStatus(u8),
    #[error("bad length {len} for {opcode:?}")]
    BadLength { opcode: Opcode, len: usize },
}

/// Connection parameters requested by the peer, in controller units.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnParams {
    pub interval_min: u16,
    pub interval_max: u16,
    pub latency: u16,
    pub supervision_timeout: u16,
}

/// Bank addressed by `GET_IMAGE_VER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BankQuery {
    Active,
    Inactive,
}

/// Raw `CHECK_SHA256` entries: `N x (image_id u16, digest [u8; 32])`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sha256Entries<'a>(&'a [u8]);

impl<'a> Sha256Entries<'a> {
    pub fn len(&self) -> usize {
        self.0.len() / SHA256_CHECK_ENTRY_LEN
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, [u8; 32])> + 'a {
        self.0.chunks_exact(SHA256_CHECK_ENTRY_LEN).map(|entry| {
            let mut digest = [0u8; 32];
            digest.copy_from_slice(&entry[2..]);
            (u16::from_le_bytes([entry[0], entry[1]]), digest)
        })
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.0
    }
}

/// A decoded control-point write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlPoint<'a> {
    /// 12-byte control header plus 4 bytes of padding, possibly encrypted.
    StartDfu { payload: [u8; 16] },
    ReceiveFwImageInfo { image_id: u16, length: u32 },
    ValidFw { image_id: u16, last: bool },
    ActiveImageReset { enter_dfu_mode: bool },
    SystemReset,
    ReportTargetInfo { image_id: u16 },
    ConnParaUpdateReq(ConnParams),
    BufferCheckEn { enable: bool },
    ReportBufferCrc { crc: u16, offset: u16 },
    CopyImg,
    GetImageVer { bank: BankQuery },
    GetSectionSize,
    CheckSha256 { entries: Sha256Entries<'a> },
}

fn rd16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn rd32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

impl<'a> ControlPoint<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ParseError> {
        let (&raw, _) = bytes.split_first().ok_or(ParseError::Empty)?;
        let opcode = Opcode::from_raw(raw).ok_or(ParseError::UnknownOpcode(raw))?;
        let len = bytes.len();
        let bad_length = ParseError::BadLength { opcode, len };
        let expect = |want: usize| if len == want { Ok(()) } else { Err(bad_length) };

        match opcode {
            Opcode::StartDfu => {
                expect(START_DFU_LEN)?;
                let mut payload = [0u8; 16];
                payload.copy_from_slice(&bytes[1..]);
                Ok(Self::StartDfu { payload })
            }
            Opcode::ReceiveFwImageInfo => {
                expect(RECEIVE_FW_IMAGE_INFO_LEN)?;
                Ok(Self::ReceiveFwImageInfo {
                    image_id: rd16(bytes, 1),
                    length: rd32(bytes, 3),
                })
            }
            Opcode::ValidFw => {
                expect(VALID_FW_LEN)?;
                Ok(Self::ValidFw {
                    image_id: rd16(bytes, 1),
                    last: bytes[3] == 1,
                })
            }
            Opcode::ActiveImageReset => {
                expect(ACTIVE_IMAGE_RESET_LEN)?;
                Ok(Self::ActiveImageReset {
                    enter_dfu_mode: bytes[1] == 1,
                })
            }
            Opcode::SystemReset => {
                expect(SYSTEM_RESET_LEN)?;
                Ok(Self::SystemReset)
            }
            Opcode::ReportTargetInfo => {
                expect(REPORT_TARGET_INFO_LEN)?;
                Ok(Self::ReportTargetInfo {
                    image_id: rd16(bytes, 1),
                })
            }
            Opcode::ConnParaUpdateReq => {
                expect(CONN_PARA_UPDATE_REQ_LEN)?;
                Ok(Self::ConnParaUpdateReq(ConnParams {
                    interval_min: rd16(bytes, 1),
                    interval_max: rd16(bytes, 3),
                    latency: rd16(bytes, 5),
                    supervision_timeout: rd16(bytes, 7),
                }))
            }
            Opcode::BufferCheckEn => match len {
                1 => Ok(Self::BufferCheckEn { enable: true }),
                2 => Ok(Self::BufferCheckEn {
                    enable: bytes[1] != 0,
                }),
                _ => Err(bad_length),
            },
            Opcode::ReportBufferCrc => {
                expect(REPORT_BUFFER_CRC_LEN)?;
                Ok(Self::ReportBufferCrc {
                    crc: rd16(bytes, 1),
                    offset: rd16(bytes, 3),
                })
            }
            Opcode::CopyImg => {
                expect(1)?;
                Ok(Self::CopyImg)
            }
            Opcode::GetImageVer => match len {
                1 => Ok(Self::GetImageVer {
                    bank: BankQuery::Active,
                }),
                2 if bytes[1] <= 1 => Ok(Self::GetImageVer {
                    bank: if bytes[1] == 0 {
                        BankQuery::Active
                    } else {
                        BankQuery::Inactive
                    },
                }),
                _ => Err(bad_length),
            },
            Opcode::GetSectionSize => {
                expect(1)?;
                Ok(Self::GetSectionSize)
            }
            Opcode::CheckSha256 => {
                let body = &bytes[1..];
                let count = body.len() / SHA256_CHECK_ENTRY_LEN;
                if body.is_empty()
                    || body.len() % SHA256_CHECK_ENTRY_LEN != 0
                    || count > MAX_SHA256_CHECKS
                {
                    return Err(bad_length);
                }
                Ok(Self::CheckSha256 {
                    entries: Sha256Entries(body),
                })
            }
        }
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Self::StartDfu { .. } => Opcode::StartDfu,
            Self::ReceiveFwImageInfo { .. } => Opcode::ReceiveFwImageInfo,
            Self::ValidFw { .. } => Opcode::ValidFw,
            Self::ActiveImageReset { .. } => Opcode::ActiveImageReset,
            Self::SystemReset => Opcode::SystemReset,
            Self::ReportTargetInfo { .. } => Opcode::ReportTargetInfo,
            Self::ConnParaUpdateReq(_) => Opcode::ConnParaUpdateReq,
            Self::BufferCheckEn { .. } => Opcode::BufferCheckEn,
            Self::ReportBufferCrc { .. } => Opcode::ReportBufferCrc,
            Self::CopyImg => Opcode::CopyImg,
            Self::GetImageVer { .. } => Opcode::GetImageVer,
            Self::GetSectionSize => Opcode::GetSectionSize,
            Self::CheckSha256 { .. } => Opcode::CheckSha256,
        }
    }

    /// Serialise a request, as a peer would write it.
    pub fn encode(&self) -> Result<Vec<u8, MAX_CONTROL_POINT_LEN>, ParseError> {
        let mut out: Vec<u8, MAX_CONTROL_POINT_LEN> = Vec::new();
        let opcode = self.opcode();
        let mut frame = [0u8; 9];
        frame[0] = opcode as u8;
        let head: &[u8] = match *self {
            Self::StartDfu { ref payload } => {
                let mut start = [0u8; START_DFU_LEN];
                start[0] = opcode as u8;
                start[1..].copy_from_slice(payload);
                return push(out, &start, opcode);
            }
            Self::ReceiveFwImageInfo { image_id, length } => {
                frame[1..3].copy_from_slice(&image_id.to_le_bytes());
                frame[3..7].copy_from_slice(&length.to_le_bytes());
                &frame[..RECEIVE_FW_IMAGE_INFO_LEN]
            }
            Self::ValidFw { image_id, last } => {
                frame[1..3].copy_from_slice(&image_id.to_le_bytes());
                frame[3] = last as u8;
                &frame[..VALID_FW_LEN]
            }
            Self::ActiveImageReset { enter_dfu_mode } => {
                frame[1] = enter_dfu_mode as u8;
                &frame[..ACTIVE_IMAGE_RESET_LEN]
            }
            Self::ReportTargetInfo { image_id } => {
                frame[1..3].copy_from_slice(&image_id.to_le_bytes());
                &frame[..REPORT_TARGET_INFO_LEN]
            }
            Self::ConnParaUpdateReq(params) => {
                frame[1..3].copy_from_slice(&params.interval_min.to_le_bytes());
                frame[3..5].copy_from_slice(&params.interval_max.to_le_bytes());
                frame[5..7].copy_from_slice(&params.latency.to_le_bytes());
                frame[7..9].copy_from_slice(&params.supervision_timeout.to_le_bytes());
                &frame[..CONN_PARA_UPDATE_REQ_LEN]
            }
            Self::BufferCheckEn { enable } => {
                frame[1] = enable as u8;
                &frame[..2]
            }
            Self::ReportBufferCrc { crc, offset } => {
                frame[1..3].copy_from_slice(&crc.to_le_bytes());
                frame[3..5].copy_from_slice(&offset.to_le_bytes());
                &frame[..REPORT_BUFFER_CRC_LEN]
            }
            Self::GetImageVer { bank } => {
                frame[1] = matches!(bank, BankQuery::Inactive) as u8;
                &frame[..2]
            }
            Self::SystemReset | Self::CopyImg | Self::GetSectionSize => &frame[..1],
            Self::CheckSha256 { entries } => {
                out = push(out, &frame[..1], opcode)?;
                return push(out, entries.as_bytes(), opcode);
            }
        };
        push(out, head, opcode)
    }
}

fn push<const N: usize>(mut out: Vec<u8, N>, bytes: &[u8], opcode: Opcode) -> Result<Vec<u8, N>, ParseError> {
    out.extend_from_slice(bytes).map_err(|_| ParseError::BadLength {
        opcode,
        len: out.len() + bytes.len(),
    })?;
    Ok(out)
}

/// Build the raw `CHECK_SHA256` body from `(image_id, digest)` pairs.
pub fn sha256_entries<'a>(
    entries: &[(u16, [u8; 32])],
    scratch: &'a mut [u8],
) -> Result<Sha256Entries<'a>, ParseError> {
    let len = entries.len() * SHA256_CHECK_ENTRY_LEN;
    if entries.is_empty() || entries.len() > MAX_SHA256_CHECKS || scratch.len() < len {
        return Err(ParseError::BadLength {
            opcode: Opcode::CheckSha256,
            len: 1 + len,
        });
    }
    for (chunk, (id, digest)) in scratch.chunks_exact_mut(SHA256_CHECK_ENTRY_LEN).zip(entries) {
        chunk[..2].copy_from_slice(&id.to_le_bytes());
        chunk[2..].copy_from_slice(digest);
    }
    Ok(Sha256Entries(&scratch[..len]))
}

/// Outcome of comparing a digest with the copies held on the device.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Sha256Match {
    Neither = 0,
    SameAsInactive = 1,
    SameAsActive = 2,
    SameAsBoth = 3,
}

impl Sha256Match {
    pub const fn from_matches(inactive: bool, active: bool) -> Self {
        match (inactive, active) {
            (false, false) => Self::Neither,
            (true, false) => Self::SameAsInactive,
            (false, true) => Self::SameAsActive,
            (true, true) => Self::SameAsBoth,
        }
    }
}

/// A device-to-peer notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification<'a> {
    Status {
        opcode: Opcode,
        status: DfuStatus,
    },
    TargetInfo {
        status: DfuStatus,
        version: u32,
        cur_offset: u32,
        buffered: u16,
    },
    BufferCheckEn {
        status: DfuStatus,
        max_buffer_size: u16,
        mtu: u16,
    },
    BufferCheck {
        status: DfuStatus,
        cur_offset: u32,
    },
    Sha256Results {
        status: DfuStatus,
        results: &'a [(u16, Sha256Match)],
    },
    ImageVersions {
        status: DfuStatus,
        bank_num: u8,
        images: &'a [(u16, u32)],
    },
    SectionSizes {
        status: DfuStatus,
        images: &'a [(u16, u32)],
    },
}

impl Notification<'_> {
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Status { opcode, .. } => *opcode,
            Self::TargetInfo { .. } => Opcode::ReportTargetInfo,
            Self::BufferCheckEn { .. } => Opcode::BufferCheckEn,
            Self::BufferCheck { .. } => Opcode::ReportBufferCrc,
            Self::Sha256Results { .. } => Opcode::CheckSha256,
            Self::ImageVersions { .. } => Opcode::GetImageVer,
            Self::SectionSizes { .. } => Opcode::GetSectionSize,
        }
    }

    pub fn status(&self) -> DfuStatus {
        match self {
            Self::Status { status, .. }
            | Self::TargetInfo { status, .. }
            | Self::BufferCheckEn { status, .. }
            | Self::BufferCheck { status, .. }
            | Self::Sha256Results { status, .. }
            | Self::ImageVersions { status, .. }
            | Self::SectionSizes { status, .. } => *status,
        }
    }

    /// Frame as `[DFU_OPCODE_NOTIF, opcode, status, body...]`.
    ///
    /// Lists longer than the protocol allows are truncated.
    pub fn encode(&self) -> Vec<u8, MAX_NOTIFICATION_LEN> {
        let mut out = FrameWriter(Vec::new());
        out.put(&[DFU_OPCODE_NOTIF, self.opcode() as u8, self.status() as u8]);

        match *self {
            Self::Status { .. } => {}
            Self::TargetInfo {
                version,
                cur_offset,
                buffered,
                ..
            } => {
                out.put(&version.to_le_bytes());
                out.put(&cur_offset.to_le_bytes());
                out.put(&buffered.to_le_bytes());
            }
            Self::BufferCheckEn {
                max_buffer_size,
                mtu,
                ..
            } => {
                out.put(&max_buffer_size.to_le_bytes());
                out.put(&mtu.to_le_bytes());
            }
            Self::BufferCheck { cur_offset, .. } => out.put(&cur_offset.to_le_bytes()),
            Self::Sha256Results { results, .. } => {
                for (id, result) in results.iter().take(MAX_SHA256_CHECKS) {
                    out.put(&id.to_le_bytes());
                    out.put(&[*result as u8]);
                }
            }
            Self::ImageVersions {
                bank_num, images, ..
            } => {
                let images = &images[..images.len().min(MAX_IMAGE_NUM)];
                out.put(&[bank_num, images.len() as u8]);
                out.put_pairs(images);
            }
            Self::SectionSizes { images, .. } => {
                let images = &images[..images.len().min(MAX_IMAGE_NUM)];
                out.put(&[images.len() as u8]);
                out.put_pairs(images);
            }
        }
        out.0
    }
}

struct FrameWriter(Vec<u8, MAX_NOTIFICATION_LEN>);

impl FrameWriter {
    fn put(&mut self, bytes: &[u8]) {
        // Bodies are bounded by MAX_IMAGE_NUM, so the frame always fits.
        let _ = self.0.extend_from_slice(bytes);
    }

    fn put_pairs(&mut self, pairs: &[(u16, u32)]) {
        for (id, value) in pairs {
            self.put(&id.to_le_bytes());
            self.put(&value.to_le_bytes());
        }
    }
}

/// A received notification, split into header and body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationFrame<'a> {
    pub opcode: Opcode,
    pub status: DfuStatus,
    pub body: &'a [u8],
}

impl<'a> NotificationFrame<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ParseError> {
        match *bytes {
            [] => Err(ParseError::Empty),
            [DFU_OPCODE_NOTIF, opcode, status, ref body @ ..] => {
                let opcode = Opcode::from_raw(opcode).ok_or(ParseError::UnknownOpcode(opcode))?;
                let status = DfuStatus::from_raw(status).ok_or(ParseError::UnknownStatus(status))?;
                Ok(Self {
                    opcode,
                    status,
                    body,
                })
            }
            [first, ..] => Err(ParseError::UnknownOpcode(first)),
        }
    }

    pub fn u16_at(&self, offset: usize) -> Option<u16> {
        let bytes = self.body.get(offset..offset + 2)?;
        Some(rd16(bytes, 0))
    }

    pub fn u32_at(&self, offset: usize) -> Option<u32> {
        let bytes = self.body.get(offset..offset + 4)?;
        Some(rd32(bytes, 0))
    }
}

/// Mode bits of the device info characteristic.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceInfoMode {
    pub buffer_check_en: bool,
    pub aes_en: bool,
    /// Every 16-byte block of a packet is encrypted, not only the first.
    pub aes_mode_16n: bool,
    pub support_multi_image: bool,
    pub support_normal_ota: bool,
    pub dual_bank_merge: bool,
}

impl DeviceInfoMode {
    pub const fn from_bits(bits: u8) -> Self {
        Self {
            buffer_check_en: bits & 1 != 0,
            aes_en: bits & (1 << 1) != 0,
            aes_mode_16n: bits & (1 << 2) != 0,
            support_multi_image: bits & (1 << 3) != 0,
            support_normal_ota: bits & (1 << 4) != 0,
            dual_bank_merge: bits & (1 << 5) != 0,
        }
    }

    pub const fn bits(&self) -> u8 {
        (self.buffer_check_en as u8)
            | (self.aes_en as u8) << 1
            | (self.aes_mode_16n as u8) << 2
            | (self.support_multi_image as u8) << 3
            | (self.support_normal_ota as u8) << 4
            | (self.dual_bank_merge as u8) << 5
    }
}

/// Packed 12-byte device info characteristic.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceInfo {
    pub ic_type: u8,
    pub spec_ver: u8,
    pub mode: DeviceInfoMode,
    /// Temp bank size in 4 KiB units.
    pub ota_temp_size: u16,
    pub active_banknum: u8,
    pub bootpatch_active_banknum: u8,
    pub secureapp_active_banknum: u8,
    pub ctrl_header_offset: u16,
}

impl DeviceInfo {
    pub fn encode(&self) -> [u8; DEVICE_INFO_LEN] {
        let mut out = [0u8; DEVICE_INFO_LEN];
        out[0] = self.ic_type;
        out[1] = self.spec_ver;
        out[2] = self.mode.bits();
        out[4..6].copy_from_slice(&self.ota_temp_size.to_le_bytes());
        out[6] = self.active_banknum;
        out[7] = self.bootpatch_active_banknum;
        out[8] = self.secureapp_active_banknum;
        out[9..11].copy_from_slice(&self.ctrl_header_offset.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8; DEVICE_INFO_LEN]) -> Self {
        Self {
            ic_type: bytes[0],
            spec_ver: bytes[1],
            mode: DeviceInfoMode::from_bits(bytes[2]),
            ota_temp_size: rd16(bytes, 4),
            active_banknum: bytes[6],
            bootpatch_active_banknum: bytes[7],
            secureapp_active_banknum: bytes[8],
            ctrl_header_offset: rd16(bytes, 9),
        }
    }
}
