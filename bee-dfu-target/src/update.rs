// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Firmware update state machine over the DFU control point.
//!
//! This module implements the update protocol:
//! - `START_DFU`: open a session for the announced control header
//! - `RECEIVE_FW_IMAGE_INFO`: pick the destination of the next image
//! - packet writes: stream image data into the temp bank
//! - `REPORT_BUFFER_CRC`: acknowledge each buffer once its CRC matches flash
//! - `VALID_FW` / `ACTIVE_IMAGE_RESET`: verify, activate and reset
//! - informational requests: target info, image versions, section sizes, digests
mod commands;
mod session;
mod state;
mod storage;

pub use commands::{dispatch_command, dispatch_control_point, dispatch_packet, report_conn_params};
pub use session::{SessionState, TransferSession};
pub use state::UpdateState;

use crate::bank::{ActiveBanks, BankFamily};
use crate::partition::Resolver;
use crate::platform::Peripherals;
use crate::supervisor::Supervisor;
use bee_dfu_common::header::CTRL_HEADER_OFFSET;
use bee_dfu_common::protocol::{DeviceInfoMode, DFU_SPEC_VERSION};
use bee_dfu_common::{DeviceFeatures, DeviceInfo, DfuConfig, FlashLayout, PartitionName, FLASH_SECTOR_SIZE};
use embedded_storage::nor_flash::NorFlash;

/// Everything one update attempt works on.
pub struct UpdateContext<'a, F> {
    pub peripherals: Peripherals<'a, F>,
    pub config: &'a DfuConfig,
    pub layout: &'a FlashLayout,
    /// Active bank snapshot, refreshed after each commit.
    pub banks: ActiveBanks,
    pub update: UpdateState,
    pub session: TransferSession,
    pub supervisor: Supervisor,
}

impl<'a, F: NorFlash> UpdateContext<'a, F> {
    /// Enter DFU mode: scan the banks and arm the session timers.
    pub fn new(peripherals: Peripherals<'a, F>, config: &'a DfuConfig, layout: &'a FlashLayout) -> Self {
        let banks = ActiveBanks::scan(&mut *peripherals.flash, layout, config);
        let mut supervisor = Supervisor::new(config);
        supervisor.start(peripherals.clock.now_ms());
        Self {
            peripherals,
            config,
            layout,
            banks,
            update: UpdateState::default(),
            session: TransferSession::new(config),
            supervisor,
        }
    }

    pub fn rescan_banks(&mut self) {
        self.banks = ActiveBanks::scan(&mut *self.peripherals.flash, self.layout, self.config);
    }

    /// The device info characteristic value.
    pub fn device_info(&self) -> DeviceInfo {
        let features = self.config.features;
        let resolver = Resolver::new(self.layout, &self.banks, self.config);
        let temp_size = if self.layout.bank_switch {
            resolver.temp_bank(BankFamily::Ota).map(|bank| bank.size)
        } else {
            resolver.bank_size(PartitionName::OtaTmp)
        }
        .unwrap_or(0);

        DeviceInfo {
            ic_type: self.config.ic_type,
            spec_ver: DFU_SPEC_VERSION,
            mode: DeviceInfoMode {
                buffer_check_en: features.contains(DeviceFeatures::SUPPORT_BUFFER_CHECK),
                aes_en: features.contains(DeviceFeatures::ENABLE_AES_ENCRYPT),
                aes_mode_16n: features.contains(DeviceFeatures::ENCRYPT_MODE_16N),
                support_multi_image: features.contains(DeviceFeatures::SUPPORT_MULTIIMAGE),
                support_normal_ota: true,
                dual_bank_merge: self.layout.dual_bank_merge,
            },
            ota_temp_size: (temp_size / FLASH_SECTOR_SIZE) as u16,
            active_banknum: self.banks.bank_number(self.layout, BankFamily::Ota),
            bootpatch_active_banknum: self.banks.bank_number(self.layout, BankFamily::BootPatch),
            secureapp_active_banknum: self.banks.bank_number(self.layout, BankFamily::SecureApp),
            ctrl_header_offset: CTRL_HEADER_OFFSET as u16,
        }
    }
}
