// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Shared fixtures: a small flash layout, recording collaborators and image builders.

#![allow(dead_code)]

use bee_dfu_common::checksum::crc16;
use bee_dfu_common::header::{
    ImageVersion, CTRL_FLAG_OFFSET, HASH_START, IMAGE_HASH_OFFSET, NOT_OBSOLETE_BIT, NOT_READY_BIT,
};
use bee_dfu_common::layout::PartitionRecord;
use bee_dfu_common::protocol::{ConnParams, NotificationFrame};
use bee_dfu_common::{
    ControlPoint, CtrlHeader, DfuConfig, DfuStatus, FlashLayout, ImageHeader, ImageId, Opcode,
    PartitionName, SignatureScheme,
};
use bee_dfu_target::flash::{self, MemFlash};
use bee_dfu_target::platform::{
    BlockCipher, BootTarget, Clock, CryptoError, KeySlot, Peripherals, ResetReason,
    SignatureVerifier, System, Transport, TransportError,
};
use bee_dfu_target::UpdateContext;
use sha2::{Digest, Sha256};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

pub const BASE: u32 = 0x0200_0000;
pub const FLASH_SIZE: u32 = 0x3_0000;

pub const BOOT_PATCH_0: u32 = 0x0200_0000;
pub const BOOT_PATCH_1: u32 = 0x0200_2000;
pub const OTA_BANK_0: u32 = 0x0200_4000;
pub const OTA_BANK_1: u32 = 0x0200_C000;
pub const SECURE_APP_0: u32 = 0x0201_4000;
pub const SECURE_APP_1: u32 = 0x0201_6000;
pub const SECURE_APP_DATA_0: u32 = 0x0201_8000;
pub const SECURE_APP_DATA_1: u32 = 0x0201_A000;
pub const OTA_TMP: u32 = 0x0201_C000;
pub const USER_DATA_1: u32 = 0x0202_4000;

/// Compact dual-bank part used by every engine test.
pub fn test_layout() -> FlashLayout {
    let records = [
        PartitionRecord::new(PartitionName::BootPatch0, BOOT_PATCH_0, 0x2000),
        PartitionRecord::new(PartitionName::BootPatch1, BOOT_PATCH_1, 0x2000),
        PartitionRecord::new(PartitionName::OtaBank0, OTA_BANK_0, 0x8000),
        PartitionRecord::new(PartitionName::OtaBank1, OTA_BANK_1, 0x8000),
        PartitionRecord::new(PartitionName::SecureApp0, SECURE_APP_0, 0x2000),
        PartitionRecord::new(PartitionName::SecureApp1, SECURE_APP_1, 0x2000),
        PartitionRecord::new(PartitionName::SecureAppData0, SECURE_APP_DATA_0, 0x2000),
        PartitionRecord::new(PartitionName::SecureAppData1, SECURE_APP_DATA_1, 0x2000),
        PartitionRecord::new(PartitionName::OtaTmp, OTA_TMP, 0x8000),
        PartitionRecord::new(PartitionName::UserData1, USER_DATA_1, 0x2000),
    ];
    FlashLayout {
        flash_base: BASE,
        flash_size: FLASH_SIZE,
        bank_switch: true,
        dual_bank_merge: false,
        partitions: heapless::Vec::from_slice(&records).unwrap(),
    }
}

/// Same part without OTA bank switching: sub-images go through `OTA_TMP`.
pub fn single_bank_layout() -> FlashLayout {
    FlashLayout {
        bank_switch: false,
        ..test_layout()
    }
}

pub fn test_config() -> DfuConfig {
    DfuConfig {
        buffer_size: 1024,
        ..DfuConfig::default()
    }
}

/// Everything the transport saw.
#[derive(Debug, Default)]
pub struct TransportLog {
    pub frames: Vec<Vec<u8>>,
    pub disconnects: usize,
    pub conn_params: Vec<ConnParams>,
    pub refuse_conn_params: bool,
}

impl TransportLog {
    /// `(opcode, status)` of every notification, in order.
    pub fn statuses(&self) -> Vec<(Opcode, DfuStatus)> {
        self.frames
            .iter()
            .map(|f| {
                let frame = NotificationFrame::parse(f).unwrap();
                (frame.opcode, frame.status)
            })
            .collect()
    }

    pub fn last_status(&self) -> Option<(Opcode, DfuStatus)> {
        self.statuses().last().copied()
    }

    pub fn last_frame(&self) -> Vec<u8> {
        self.frames.last().cloned().unwrap_or_default()
    }
}

pub struct RecordingTransport {
    log: Rc<RefCell<TransportLog>>,
}

impl Transport for RecordingTransport {
    fn notify(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.log.borrow_mut().frames.push(frame.to_vec());
        Ok(())
    }

    fn disconnect(&mut self) {
        self.log.borrow_mut().disconnects += 1;
    }

    fn request_conn_params(&mut self, params: ConnParams) -> Result<(), TransportError> {
        let mut log = self.log.borrow_mut();
        if log.refuse_conn_params {
            return Err(TransportError::Rejected);
        }
        log.conn_params.push(params);
        Ok(())
    }
}

pub struct RecordingSystem {
    resets: Rc<RefCell<Vec<(ResetReason, BootTarget)>>>,
}

impl System for RecordingSystem {
    fn reboot(&mut self, reason: ResetReason, target: BootTarget) {
        self.resets.borrow_mut().push((reason, target));
    }
}

pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

/// XOR "block cipher": encryption and decryption are the same operation.
pub struct XorCipher;

pub fn xor_key(key: KeySlot) -> u8 {
    match key {
        KeySlot::Link => 0xA5,
        KeySlot::Image(select) => 0x5A ^ select.bits(),
    }
}

impl BlockCipher for XorCipher {
    fn encrypt_block(&self, key: KeySlot, block: &mut [u8; 16]) -> Result<(), CryptoError> {
        block.iter_mut().for_each(|b| *b ^= xor_key(key));
        Ok(())
    }

    fn decrypt_block(&self, key: KeySlot, block: &mut [u8; 16]) -> Result<(), CryptoError> {
        self.encrypt_block(key, block)
    }
}

/// Signature backend answering a fixed verdict and recording what it was asked.
pub struct FixedSigner {
    pub verdict: bool,
    pub seen: RefCell<Vec<(SignatureScheme, usize, usize, [u8; 32])>>,
}

impl FixedSigner {
    pub fn new(verdict: bool) -> Self {
        Self {
            verdict,
            seen: RefCell::new(Vec::new()),
        }
    }
}

impl SignatureVerifier for FixedSigner {
    fn verify(&self, scheme: SignatureScheme, public_key: &[u8], digest: &[u8; 32], signature: &[u8]) -> bool {
        self.seen
            .borrow_mut()
            .push((scheme, public_key.len(), signature.len(), *digest));
        self.verdict
    }
}

/// A board in DFU mode: RAM flash plus recording collaborators.
pub struct Rig {
    pub flash: MemFlash<'static>,
    pub config: DfuConfig,
    pub layout: FlashLayout,
    transport: RecordingTransport,
    system: RecordingSystem,
    clock: ManualClock,
    cipher: XorCipher,
    signer: FixedSigner,
    pub wire: Rc<RefCell<TransportLog>>,
    pub resets: Rc<RefCell<Vec<(ResetReason, BootTarget)>>>,
    pub now: Rc<Cell<u64>>,
}

impl Rig {
    pub fn new(config: DfuConfig, layout: FlashLayout) -> Self {
        let mem: &'static mut [u8] = Box::leak(vec![0xFF; layout.flash_size as usize].into_boxed_slice());
        let wire = Rc::new(RefCell::new(TransportLog::default()));
        let resets = Rc::new(RefCell::new(Vec::new()));
        let now = Rc::new(Cell::new(0));
        Self {
            flash: MemFlash::new(mem),
            config,
            layout,
            transport: RecordingTransport { log: wire.clone() },
            system: RecordingSystem {
                resets: resets.clone(),
            },
            clock: ManualClock { now: now.clone() },
            cipher: XorCipher,
            signer: FixedSigner::new(true),
            wire,
            resets,
            now,
        }
    }

    pub fn with_signer(mut self, signer: FixedSigner) -> Self {
        self.signer = signer;
        self
    }

    /// Program `bytes` at `addr`, erasing the sectors first.
    pub fn stage(&mut self, addr: u32, bytes: &[u8]) {
        let end = addr + bytes.len() as u32;
        let mut sector = addr - addr % 0x1000;
        while sector < end {
            flash::erase_sector(&mut self.flash, BASE, sector).unwrap();
            sector += 0x1000;
        }
        flash::program(&mut self.flash, BASE, addr, bytes).unwrap();
    }

    pub fn read(&mut self, addr: u32, len: usize) -> Vec<u8> {
        let mut buf = vec![0; len];
        flash::read(&mut self.flash, BASE, addr, &mut buf).unwrap();
        buf
    }

    pub fn flags_at(&mut self, header_addr: u32) -> u16 {
        flash::read_flag_word(&mut self.flash, BASE, header_addr).unwrap()
    }

    /// Enter DFU mode.
    pub fn engine(&mut self) -> UpdateContext<'_, MemFlash<'static>> {
        let peripherals = Peripherals {
            flash: &mut self.flash,
            transport: &mut self.transport,
            system: &mut self.system,
            clock: &self.clock,
            cipher: &self.cipher,
            signer: &self.signer,
        };
        UpdateContext::new(peripherals, &self.config, &self.layout)
    }
}

/// Header flags of a copy as the boot picker sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flags {
    Shipped,
    Current,
    Obsolete,
}

pub fn flag_word(flags: Flags) -> u16 {
    match flags {
        Flags::Shipped => NOT_READY_BIT | NOT_OBSOLETE_BIT,
        Flags::Current => NOT_OBSOLETE_BIT,
        Flags::Obsolete => 0,
    }
}

pub fn set_flags(image: &mut [u8], flags: Flags) {
    let off = CTRL_FLAG_OFFSET;
    let word = u16::from_le_bytes([image[off], image[off + 1]]);
    let word = (word & !(NOT_READY_BIT | NOT_OBSOLETE_BIT)) | flag_word(flags);
    image[off..off + 2].copy_from_slice(&word.to_le_bytes());
}

/// SHA-256 of an image the way the engine computes it.
pub fn image_digest(image: &[u8]) -> [u8; 32] {
    let mut normalized = image.to_vec();
    normalized[CTRL_FLAG_OFFSET] |= (NOT_READY_BIT & 0xFF) as u8;
    normalized[CTRL_FLAG_OFFSET + 1] |= (NOT_OBSOLETE_BIT >> 8) as u8;
    Sha256::digest(&normalized[HASH_START..]).into()
}

pub fn seal(image: &mut [u8]) {
    let digest = image_digest(image);
    image[IMAGE_HASH_OFFSET..IMAGE_HASH_OFFSET + 32].copy_from_slice(&digest);
}

pub fn header_for(id: ImageId, config: &DfuConfig, payload_len: u32, version: ImageVersion) -> ImageHeader {
    let mut header = ImageHeader::new(id, config.ic_type);
    header.ctrl.payload_len = payload_len;
    header.ctrl.image_id = id.raw();
    header.git_ver.version = version;
    header.uuid = config.rom_uuid;
    header
}

/// Encoded header followed by a patterned payload, digest filled in.
pub fn build_from_header(header: &ImageHeader) -> Vec<u8> {
    let mut image = header.encode().to_vec();
    let seed = header.ctrl.image_id as u8;
    image.extend((0..header.ctrl.payload_len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)));
    seal(&mut image);
    image
}

/// A signed-off image of `total_len` bytes, header included.
pub fn build_image(id: ImageId, config: &DfuConfig, total_len: u32, version: ImageVersion) -> Vec<u8> {
    let payload_len = total_len - bee_dfu_common::header::DEFAULT_HEADER_SIZE as u32;
    build_from_header(&header_for(id, config, payload_len, version))
}

/// OTA container header listing `subs` with their sizes.
pub fn build_container(config: &DfuConfig, subs: &[(ImageId, u32)], version: ImageVersion) -> Vec<u8> {
    let mut header = header_for(ImageId::Ota, config, 0, version);
    for (id, size) in subs {
        header.set_sub_image(*id, 0, *size);
    }
    build_from_header(&header)
}

pub fn v(major: u8, minor: u8) -> ImageVersion {
    ImageVersion::new(major, minor, 0)
}

pub fn start_dfu(config: &DfuConfig, id: ImageId, len: u32) -> Vec<u8> {
    let ctrl = CtrlHeader {
        crc16: 0,
        ic_type: config.ic_type,
        secure_version: 0,
        flags: bee_dfu_common::CtrlFlags::shipped(),
        image_id: id.raw(),
        payload_len: len,
    };
    let mut payload = [0u8; 16];
    payload[..12].copy_from_slice(&ctrl.encode());
    cp(ControlPoint::StartDfu { payload })
}

pub fn cp(cmd: ControlPoint<'_>) -> Vec<u8> {
    cmd.encode().unwrap().to_vec()
}

/// Buffer CRC the peer computes over `data`.
pub fn buffer_crc(data: &[u8]) -> Vec<u8> {
    cp(ControlPoint::ReportBufferCrc {
        crc: crc16(data),
        offset: data.len() as u16,
    })
}
