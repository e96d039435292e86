// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! End-to-end tests of the transfer session, driven through the dispatch functions.

mod common;

use bee_dfu_common::header::{CtrlFlags, DEFAULT_HEADER_SIZE};
use bee_dfu_common::protocol::{sha256_entries, BankQuery, ConnParams, NotificationFrame, Sha256Match};
use bee_dfu_common::{ControlPoint, DeviceFeatures, DfuConfig, DfuStatus, ImageId, Opcode};
use bee_dfu_target::flash::MemFlash;
use bee_dfu_target::update::{dispatch_control_point, dispatch_packet, report_conn_params};
use bee_dfu_target::{AbortCause, SessionState, TransferError, UpdateContext};
use common::*;

type Engine<'a> = UpdateContext<'a, MemFlash<'static>>;

const HEADER: u32 = DEFAULT_HEADER_SIZE as u32;

fn send_packets(ctx: &mut Engine<'_>, mut state: SessionState, data: &[u8], chunk: usize) -> SessionState {
    for packet in data.chunks(chunk) {
        state = dispatch_packet(ctx, state, packet);
    }
    state
}

/// Send `image` in buffers, acknowledging each one with its CRC.
fn send_buffered(ctx: &mut Engine<'_>, mut state: SessionState, image: &[u8], buffer: usize) -> SessionState {
    for block in image.chunks(buffer) {
        state = send_packets(ctx, state, block, 256);
        assert_eq!(state, SessionState::BufferPending);
        state = dispatch_control_point(ctx, state, &buffer_crc(block));
    }
    state
}

fn open_session(ctx: &mut Engine<'_>, config: &DfuConfig, id: ImageId, len: u32) -> SessionState {
    let state = dispatch_control_point(ctx, SessionState::Idle, &start_dfu(config, id, len));
    assert_eq!(state, SessionState::Started);
    announce(ctx, state, id, len)
}

/// Like `open_session`, with buffer checks switched on before the image is announced.
fn open_buffered_session(ctx: &mut Engine<'_>, config: &DfuConfig, id: ImageId, len: u32) -> SessionState {
    let state = dispatch_control_point(ctx, SessionState::Idle, &start_dfu(config, id, len));
    let state = dispatch_control_point(ctx, state, &cp(ControlPoint::BufferCheckEn { enable: true }));
    assert_eq!(state, SessionState::Started);
    announce(ctx, state, id, len)
}

fn announce(ctx: &mut Engine<'_>, state: SessionState, id: ImageId, len: u32) -> SessionState {
    let state = dispatch_control_point(
        ctx,
        state,
        &cp(ControlPoint::ReceiveFwImageInfo {
            image_id: id.raw(),
            length: len,
        }),
    );
    assert_eq!(state, SessionState::Receiving);
    state
}

fn all_succeeded(rig_wire: &std::rc::Rc<std::cell::RefCell<TransportLog>>) -> bool {
    rig_wire
        .borrow()
        .statuses()
        .iter()
        .all(|(_, status)| *status == DfuStatus::Success)
}

/// Dual-bank part running container v1 with one sub-image, v2 container staged.
fn ota_rig(config: &DfuConfig, subs: &[(ImageId, u32)]) -> Rig {
    let mut rig = Rig::new(config.clone(), test_layout());
    let mut active = build_container(config, subs, v(1, 0));
    set_flags(&mut active, Flags::Current);
    rig.stage(OTA_BANK_0, &active);
    let mut offset = 0x1000;
    for (id, size) in subs {
        let mut image = build_image(*id, config, *size, v(1, 0));
        set_flags(&mut image, Flags::Current);
        rig.stage(OTA_BANK_0 + offset, &image);
        offset += size;
    }
    rig.stage(OTA_BANK_1, &build_container(config, subs, v(2, 0)));
    rig
}

#[test]
fn test_buffered_sub_image_flips_ota_bank() {
    let config = test_config();
    let mut rig = ota_rig(&config, &[(ImageId::McuApp, 0x1000)]);
    let image = build_image(ImageId::McuApp, &config, 0x1000, v(2, 0));
    let wire = rig.wire.clone();

    let mut ctx = rig.engine();
    assert_eq!(ctx.banks.ota, Some(OTA_BANK_0));
    let state = dispatch_control_point(&mut ctx, SessionState::Idle, &start_dfu(&config, ImageId::McuApp, 0x1000));
    let state = dispatch_control_point(&mut ctx, state, &cp(ControlPoint::BufferCheckEn { enable: true }));
    assert_eq!(state, SessionState::Started);
    {
        let frame = wire.borrow().last_frame();
        let frame = NotificationFrame::parse(&frame).unwrap();
        assert_eq!(frame.opcode, Opcode::BufferCheckEn);
        assert_eq!(frame.u16_at(0), Some(1024));
        assert_eq!(frame.u16_at(2), Some(247));
    }
    let state = dispatch_control_point(
        &mut ctx,
        state,
        &cp(ControlPoint::ReceiveFwImageInfo {
            image_id: ImageId::McuApp.raw(),
            length: 0x1000,
        }),
    );
    assert_eq!(state, SessionState::Receiving);

    let state = send_buffered(&mut ctx, state, &image, 1024);
    assert_eq!(state, SessionState::Committed);
    assert!(ctx.update.active_reset_pending);
    assert_eq!(ctx.banks.ota, Some(OTA_BANK_1));
    assert!(ctx.update.pending().is_empty());
    assert_eq!(wire.borrow().disconnects, 0);
    assert!(all_succeeded(&wire));
    drop(ctx);

    for addr in [OTA_BANK_1, OTA_BANK_1 + 0x1000] {
        assert!(CtrlFlags::from_bits(rig.flags_at(addr)).is_valid_and_current());
    }
    for addr in [OTA_BANK_0, OTA_BANK_0 + 0x1000] {
        assert!(!CtrlFlags::from_bits(rig.flags_at(addr)).not_obsolete);
    }
    assert_eq!(rig.read(OTA_BANK_1 + 0x1000 + HEADER, 0x1000 - HEADER as usize), image[HEADER as usize..].to_vec());
}

#[test]
fn test_corrupted_buffer_aborts_without_activation() {
    let config = test_config();
    let mut rig = ota_rig(&config, &[(ImageId::McuApp, 0x1000)]);
    let image = build_image(ImageId::McuApp, &config, 0x1000, v(2, 0));
    let wire = rig.wire.clone();

    let mut ctx = rig.engine();
    let mut state = open_buffered_session(&mut ctx, &config, ImageId::McuApp, 0x1000);
    assert_eq!(state, SessionState::Receiving);

    let mut corrupted = image[..1024].to_vec();
    corrupted[600] ^= 0xFF;
    state = send_packets(&mut ctx, state, &corrupted, 256);
    assert_eq!(state, SessionState::BufferPending);
    state = dispatch_control_point(&mut ctx, state, &buffer_crc(&image[..1024]));

    assert_eq!(state, SessionState::Aborted(AbortCause::Transfer(TransferError::CrcMismatch)));
    let frame = wire.borrow().last_frame();
    let frame = NotificationFrame::parse(&frame).unwrap();
    assert_eq!((frame.opcode, frame.status), (Opcode::ReportBufferCrc, DfuStatus::CrcError));
    assert_eq!(frame.u32_at(0), Some(1024));
    assert!(!ctx.update.active_reset_pending);
    drop(ctx);

    for addr in [OTA_BANK_0, OTA_BANK_0 + 0x1000] {
        assert!(CtrlFlags::from_bits(rig.flags_at(addr)).is_valid_and_current());
    }
    assert!(CtrlFlags::from_bits(rig.flags_at(OTA_BANK_1)).not_ready);
    assert!(CtrlFlags::from_bits(rig.flags_at(OTA_BANK_1 + 0x1000)).not_ready);
}

#[test]
fn test_sector_buffer_is_rewound_on_crc_error() {
    let config = DfuConfig {
        buffer_size: 4096,
        buffer_crc_retries: 1,
        ..test_config()
    };
    let mut rig = ota_rig(&config, &[(ImageId::McuApp, 0x1000)]);
    let image = build_image(ImageId::McuApp, &config, 0x1000, v(2, 0));
    let wire = rig.wire.clone();

    let mut ctx = rig.engine();
    let mut state = open_buffered_session(&mut ctx, &config, ImageId::McuApp, 0x1000);

    let mut corrupted = image.clone();
    corrupted[3000] ^= 0x01;
    state = send_packets(&mut ctx, state, &corrupted, 256);
    assert_eq!(state, SessionState::BufferPending);
    state = dispatch_control_point(&mut ctx, state, &buffer_crc(&image));
    assert_eq!(state, SessionState::Receiving);
    {
        let frame = wire.borrow().last_frame();
        let frame = NotificationFrame::parse(&frame).unwrap();
        assert_eq!((frame.opcode, frame.status), (Opcode::ReportBufferCrc, DfuStatus::CrcError));
        assert_eq!(frame.u32_at(0), Some(0));
    }
    assert_eq!(ctx.session.cur_offset, 0);

    state = send_buffered(&mut ctx, state, &image, 4096);
    assert_eq!(state, SessionState::Committed);
    assert_eq!(ctx.banks.ota, Some(OTA_BANK_1));
}

#[test]
fn test_buffer_crc_offset_must_match() {
    let config = test_config();
    let mut rig = ota_rig(&config, &[(ImageId::McuApp, 0x1000)]);
    let image = build_image(ImageId::McuApp, &config, 0x1000, v(2, 0));
    let wire = rig.wire.clone();

    let mut ctx = rig.engine();
    let mut state = open_buffered_session(&mut ctx, &config, ImageId::McuApp, 0x1000);
    state = send_packets(&mut ctx, state, &image[..1024], 256);
    let report = cp(ControlPoint::ReportBufferCrc {
        crc: bee_dfu_common::checksum::crc16(&image[..1024]),
        offset: 512,
    });
    state = dispatch_control_point(&mut ctx, state, &report);

    assert_eq!(state, SessionState::Aborted(AbortCause::Transfer(TransferError::LengthMismatch)));
    assert_eq!(wire.borrow().last_status(), Some((Opcode::ReportBufferCrc, DfuStatus::DataLengthError)));
}

#[test]
fn test_packet_past_buffer_is_rejected() {
    let config = test_config();
    let mut rig = ota_rig(&config, &[(ImageId::McuApp, 0x1000)]);
    let image = build_image(ImageId::McuApp, &config, 0x1000, v(2, 0));

    let mut ctx = rig.engine();
    let mut state = open_buffered_session(&mut ctx, &config, ImageId::McuApp, 0x1000);
    state = send_packets(&mut ctx, state, &image[..1024], 256);
    assert_eq!(state, SessionState::BufferPending);

    state = dispatch_packet(&mut ctx, state, &image[1024..1280]);
    assert_eq!(state, SessionState::Aborted(AbortCause::Transfer(TransferError::LengthMismatch)));
}

#[test]
fn test_secure_app_commits_on_completion() {
    let config = test_config();
    let mut rig = Rig::new(config.clone(), test_layout());
    let mut old = build_image(ImageId::SecureApp, &config, 0x1000, v(1, 0));
    set_flags(&mut old, Flags::Current);
    rig.stage(SECURE_APP_0, &old);
    let image = build_image(ImageId::SecureApp, &config, 0x1800, v(1, 1));
    let wire = rig.wire.clone();

    let mut ctx = rig.engine();
    let state = open_session(&mut ctx, &config, ImageId::SecureApp, 0x1800);
    let state = send_packets(&mut ctx, state, &image, 244);
    assert_eq!(state, SessionState::Committed);
    assert_eq!(ctx.banks.secure_app, Some(SECURE_APP_1));
    assert_eq!(ctx.banks.secure_app_data, Some(SECURE_APP_DATA_1));
    assert!(all_succeeded(&wire));
    drop(ctx);

    assert!(CtrlFlags::from_bits(rig.flags_at(SECURE_APP_1)).is_valid_and_current());
    assert!(!CtrlFlags::from_bits(rig.flags_at(SECURE_APP_0)).not_obsolete);
}

#[test]
fn test_single_image_part_disconnects_after_commit() {
    let config = DfuConfig {
        features: DeviceFeatures::SUPPORT_BUFFER_CHECK,
        ..test_config()
    };
    let mut rig = Rig::new(config.clone(), test_layout());
    let image = build_image(ImageId::BootPatch, &config, 0x1000, v(1, 0));
    let wire = rig.wire.clone();

    let mut ctx = rig.engine();
    let state = open_session(&mut ctx, &config, ImageId::BootPatch, 0x1000);
    let state = send_packets(&mut ctx, state, &image, 200);
    assert_eq!(state, SessionState::Committed);
    assert_eq!(wire.borrow().disconnects, 1);

    // A second image is not accepted in the same session.
    let state = dispatch_control_point(
        &mut ctx,
        state,
        &cp(ControlPoint::ReceiveFwImageInfo {
            image_id: ImageId::SecureApp.raw(),
            length: 0x1000,
        }),
    );
    assert_eq!(state, SessionState::Aborted(AbortCause::Transfer(TransferError::BadState)));
}

#[test]
fn test_encrypted_link_is_decrypted() {
    let config = DfuConfig {
        features: DeviceFeatures::SUPPORT_MULTIIMAGE | DeviceFeatures::ENABLE_AES_ENCRYPT,
        ..test_config()
    };
    let mut rig = Rig::new(config.clone(), test_layout());
    let image = build_image(ImageId::SecureApp, &config, 0x1000, v(1, 0));

    let mut ctx = rig.engine();
    let mut start = start_dfu(&config, ImageId::SecureApp, 0x1000);
    start[1..].iter_mut().for_each(|b| *b ^= 0xA5);
    let state = dispatch_control_point(&mut ctx, SessionState::Idle, &start);
    assert_eq!(state, SessionState::Started);
    let state = dispatch_control_point(
        &mut ctx,
        state,
        &cp(ControlPoint::ReceiveFwImageInfo {
            image_id: ImageId::SecureApp.raw(),
            length: 0x1000,
        }),
    );

    let mut state = state;
    for packet in image.chunks(100) {
        let mut wire_bytes = packet.to_vec();
        if wire_bytes.len() >= 16 {
            wire_bytes[..16].iter_mut().for_each(|b| *b ^= 0xA5);
        }
        state = dispatch_packet(&mut ctx, state, &wire_bytes);
    }
    assert_eq!(state, SessionState::Committed);
    drop(ctx);

    assert_eq!(rig.read(SECURE_APP_1 + HEADER, 0x1000 - HEADER as usize), image[HEADER as usize..].to_vec());
}

#[test]
fn test_user_data_is_written_raw() {
    let config = test_config();
    let mut rig = Rig::new(config.clone(), test_layout());
    let data: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();

    let mut ctx = rig.engine();
    let state = open_session(&mut ctx, &config, ImageId::UserData1, 3000);
    let state = send_packets(&mut ctx, state, &data, 240);
    assert_eq!(state, SessionState::Committed);
    assert!(ctx.update.is_valid(ImageId::UserData1));
    assert!(ctx.update.pending().is_empty());
    drop(ctx);

    assert_eq!(rig.read(USER_DATA_1, 3000), data);
}

#[test]
fn test_ota_tmp_images_commit_on_last_valid_fw() {
    let config = test_config();
    let mut rig = Rig::new(config.clone(), single_bank_layout());
    let app = build_image(ImageId::McuApp, &config, 0x1800, v(3, 0));
    let cfg = build_image(ImageId::McuCfgData, &config, 0x600, v(3, 0));
    let wire = rig.wire.clone();

    let mut ctx = rig.engine();
    let state = open_session(&mut ctx, &config, ImageId::McuApp, 0x1800);
    let state = send_packets(&mut ctx, state, &app, 256);
    assert_eq!(state, SessionState::Started);
    assert_eq!(ctx.session.next_subimage_offset, 0x2000);

    let state = dispatch_control_point(
        &mut ctx,
        state,
        &cp(ControlPoint::ReceiveFwImageInfo {
            image_id: ImageId::McuCfgData.raw(),
            length: 0x600,
        }),
    );
    assert_eq!(ctx.session.slot.addr, OTA_TMP + 0x2000);
    let state = send_packets(&mut ctx, state, &cfg, 256);
    assert_eq!(state, SessionState::Started);
    assert!(!ctx.update.active_reset_pending);

    let state = dispatch_control_point(
        &mut ctx,
        state,
        &cp(ControlPoint::ValidFw {
            image_id: ImageId::McuCfgData.raw(),
            last: true,
        }),
    );
    assert_eq!(state, SessionState::Committed);
    assert_eq!(wire.borrow().last_status(), Some((Opcode::ValidFw, DfuStatus::Success)));
    assert!(ctx.update.reset_to_ota_mode);
    drop(ctx);

    assert!(CtrlFlags::from_bits(rig.flags_at(OTA_TMP)).is_valid_and_current());
    assert!(CtrlFlags::from_bits(rig.flags_at(OTA_TMP + 0x2000)).is_valid_and_current());
}

#[test]
fn test_copy_img_fills_unchanged_sub_images() {
    let config = test_config();
    let subs = [(ImageId::McuApp, 0x1000), (ImageId::McuCfgData, 0x1000)];
    let mut rig = ota_rig(&config, &subs);
    let app = build_image(ImageId::McuApp, &config, 0x1000, v(2, 0));

    let mut ctx = rig.engine();
    let state = open_session(&mut ctx, &config, ImageId::McuApp, 0x1000);
    let state = send_packets(&mut ctx, state, &app, 256);
    assert_eq!(state, SessionState::Started);
    assert!(ctx.update.is_valid(ImageId::McuApp));

    let state = dispatch_control_point(&mut ctx, state, &cp(ControlPoint::CopyImg));
    assert_eq!(state, SessionState::Committed);
    assert_eq!(ctx.banks.ota, Some(OTA_BANK_1));
    drop(ctx);

    let copied = OTA_BANK_1 + 0x2000;
    assert!(CtrlFlags::from_bits(rig.flags_at(copied)).is_valid_and_current());
    assert_eq!(rig.read(copied + HEADER, 0x1000 - HEADER as usize), rig.read(OTA_BANK_0 + 0x2000 + HEADER, 0x1000 - HEADER as usize));
}

#[test]
fn test_valid_fw_last_with_incomplete_container_aborts() {
    let config = test_config();
    let subs = [(ImageId::McuApp, 0x1000), (ImageId::McuCfgData, 0x1000)];
    let mut rig = ota_rig(&config, &subs);
    let app = build_image(ImageId::McuApp, &config, 0x1000, v(2, 0));
    let wire = rig.wire.clone();

    let mut ctx = rig.engine();
    let state = open_session(&mut ctx, &config, ImageId::McuApp, 0x1000);
    let state = send_packets(&mut ctx, state, &app, 256);
    let state = dispatch_control_point(
        &mut ctx,
        state,
        &cp(ControlPoint::ValidFw {
            image_id: ImageId::McuApp.raw(),
            last: true,
        }),
    );

    assert!(matches!(state, SessionState::Aborted(AbortCause::Commit(_))));
    assert_eq!(wire.borrow().last_status(), Some((Opcode::ValidFw, DfuStatus::FailOperation)));
    assert_eq!(ctx.banks.ota, Some(OTA_BANK_0));
}

#[test]
fn test_start_dfu_rejections() {
    let config = DfuConfig {
        min_secure_version: 2,
        ..test_config()
    };
    let mut rig = Rig::new(config.clone(), test_layout());
    let wire = rig.wire.clone();
    let mut ctx = rig.engine();

    let other_ic = DfuConfig {
        ic_type: 0x3,
        ..config.clone()
    };
    let state = dispatch_control_point(&mut ctx, SessionState::Idle, &start_dfu(&other_ic, ImageId::SecureApp, 0x1000));
    assert_eq!(state, SessionState::Idle);
    assert_eq!(wire.borrow().last_status(), Some((Opcode::StartDfu, DfuStatus::InvalidParameter)));

    // secure_version 0 is below the configured minimum
    let state = dispatch_control_point(&mut ctx, state, &start_dfu(&config, ImageId::SecureApp, 0x1000));
    assert_eq!(state, SessionState::Idle);
    assert_eq!(wire.borrow().last_status(), Some((Opcode::StartDfu, DfuStatus::SysVersionError)));

    let mut bad_len = start_dfu(&config, ImageId::SecureApp, 0x1000);
    bad_len.pop();
    let state = dispatch_control_point(&mut ctx, state, &bad_len);
    assert_eq!(state, SessionState::Idle);
    assert_eq!(wire.borrow().last_status(), Some((Opcode::StartDfu, DfuStatus::InvalidParameter)));

    let frames = wire.borrow().frames.len();
    let state = dispatch_control_point(&mut ctx, state, &[0x42]);
    assert_eq!(state, SessionState::Idle);
    assert_eq!(wire.borrow().frames.len(), frames);
}

#[test]
fn test_second_start_dfu_is_refused() {
    let config = test_config();
    let mut rig = Rig::new(config.clone(), test_layout());
    let wire = rig.wire.clone();
    let mut ctx = rig.engine();

    let state = dispatch_control_point(&mut ctx, SessionState::Idle, &start_dfu(&config, ImageId::SecureApp, 0x1000));
    let state = dispatch_control_point(&mut ctx, state, &start_dfu(&config, ImageId::SecureApp, 0x1000));
    assert_eq!(state, SessionState::Started);
    assert_eq!(wire.borrow().last_status(), Some((Opcode::StartDfu, DfuStatus::FailOperation)));
}

#[test]
fn test_image_info_errors() {
    let config = test_config();
    let mut rig = Rig::new(config.clone(), test_layout());
    let wire = rig.wire.clone();
    let mut ctx = rig.engine();
    let info = |id: u16, length: u32| cp(ControlPoint::ReceiveFwImageInfo { image_id: id, length });

    // Before START_DFU the request is only refused.
    let state = dispatch_control_point(&mut ctx, SessionState::Idle, &info(ImageId::SecureApp.raw(), 0x1000));
    assert_eq!(state, SessionState::Idle);
    assert_eq!(wire.borrow().last_status(), Some((Opcode::ReceiveFwImageInfo, DfuStatus::FailOperation)));

    let started = dispatch_control_point(&mut ctx, state, &start_dfu(&config, ImageId::SecureApp, 0x3000));
    let state = dispatch_control_point(&mut ctx, started, &info(ImageId::SecureApp.raw(), 0x3000));
    assert_eq!(
        state,
        SessionState::Aborted(AbortCause::Transfer(TransferError::DataSizeExceedsLimit))
    );
    assert_eq!(
        wire.borrow().last_status(),
        Some((Opcode::ReceiveFwImageInfo, DfuStatus::DataSizeExceedsLimit))
    );

    let state = dispatch_control_point(&mut ctx, started, &info(0x1234, 0x1000));
    assert_eq!(state, SessionState::Aborted(AbortCause::Transfer(TransferError::InvalidParameter)));

    let state = dispatch_control_point(&mut ctx, started, &info(ImageId::SecureApp.raw(), 100));
    assert_eq!(state, SessionState::Aborted(AbortCause::Transfer(TransferError::InvalidParameter)));
}

/// Bank 1 running container v2, bank 0 holding a staged container that lists `staged`.
fn second_bank_rig(config: &DfuConfig, staged: &[(ImageId, u32)]) -> Rig {
    let mut rig = Rig::new(config.clone(), test_layout());
    let mut active = build_container(config, &[(ImageId::McuApp, 0x1000)], v(2, 0));
    set_flags(&mut active, Flags::Current);
    rig.stage(OTA_BANK_1, &active);
    let mut app = build_image(ImageId::McuApp, config, 0x1000, v(2, 0));
    set_flags(&mut app, Flags::Current);
    rig.stage(OTA_BANK_1 + 0x1000, &app);
    rig.stage(OTA_BANK_0, &build_container(config, staged, v(3, 0)));
    rig
}

#[test]
fn test_sub_image_past_temp_bank_end_leaves_live_bank() {
    let config = test_config();
    let mut rig = second_bank_rig(&config, &[(ImageId::McuApp, 0x9000)]);
    let live = rig.read(OTA_BANK_1, 0x2000);
    let wire = rig.wire.clone();

    let mut ctx = rig.engine();
    assert_eq!(ctx.banks.ota, Some(OTA_BANK_1));
    let started = dispatch_control_point(&mut ctx, SessionState::Idle, &start_dfu(&config, ImageId::McuApp, 0x9000));
    let info = cp(ControlPoint::ReceiveFwImageInfo {
        image_id: ImageId::McuApp.raw(),
        length: 0x9000,
    });
    let state = dispatch_control_point(&mut ctx, started, &info);
    assert_eq!(
        state,
        SessionState::Aborted(AbortCause::Transfer(TransferError::DataSizeExceedsLimit))
    );
    assert_eq!(
        wire.borrow().last_status(),
        Some((Opcode::ReceiveFwImageInfo, DfuStatus::DataSizeExceedsLimit))
    );

    // Data after the abort is dropped.
    let state = send_packets(&mut ctx, state, &vec![0x5A; 0x8000], 256);
    assert!(matches!(state, SessionState::Aborted(_)));
    drop(ctx);

    assert_eq!(rig.read(OTA_BANK_1, 0x2000), live);
    assert!(CtrlFlags::from_bits(rig.flags_at(OTA_BANK_1)).is_valid_and_current());
}

#[test]
fn test_wrapping_sub_image_table_aborts_cleanly() {
    let config = test_config();
    let mut rig = second_bank_rig(&config, &[(ImageId::McuPatch, 0xFFFF_F001), (ImageId::McuApp, 0x1000)]);
    let live = rig.read(OTA_BANK_1, 0x2000);
    let wire = rig.wire.clone();

    let mut ctx = rig.engine();
    let started = dispatch_control_point(&mut ctx, SessionState::Idle, &start_dfu(&config, ImageId::McuApp, 0x1000));
    let info = |id: ImageId, length: u32| {
        cp(ControlPoint::ReceiveFwImageInfo {
            image_id: id.raw(),
            length,
        })
    };
    for id in [ImageId::McuApp, ImageId::McuPatch] {
        let state = dispatch_control_point(&mut ctx, started, &info(id, 0x1000));
        assert_eq!(
            state,
            SessionState::Aborted(AbortCause::Transfer(TransferError::DataSizeExceedsLimit))
        );
        assert_eq!(
            wire.borrow().last_status(),
            Some((Opcode::ReceiveFwImageInfo, DfuStatus::DataSizeExceedsLimit))
        );
    }
    drop(ctx);

    assert_eq!(rig.read(OTA_BANK_1, 0x2000), live);
}

#[test]
fn test_system_reset_ends_session() {
    let config = test_config();
    let mut rig = Rig::new(config.clone(), test_layout());
    let mut ctx = rig.engine();

    let state = open_session(&mut ctx, &config, ImageId::SecureApp, 0x1000);
    let state = dispatch_control_point(&mut ctx, state, &cp(ControlPoint::SystemReset));
    assert_eq!(state, SessionState::Aborted(AbortCause::ResetCommand));

    // Nothing is processed after an abort.
    let after = dispatch_control_point(&mut ctx, state, &start_dfu(&config, ImageId::SecureApp, 0x1000));
    assert_eq!(after, state);
}

#[test]
fn test_target_info_reports_progress() {
    let config = test_config();
    let mut rig = ota_rig(&config, &[(ImageId::McuApp, 0x1000)]);
    let image = build_image(ImageId::McuApp, &config, 0x1000, v(2, 0));
    let wire = rig.wire.clone();

    let mut ctx = rig.engine();
    let mut state = open_buffered_session(&mut ctx, &config, ImageId::McuApp, 0x1000);
    state = send_packets(&mut ctx, state, &image[..512], 256);

    let query = cp(ControlPoint::ReportTargetInfo {
        image_id: ImageId::McuApp.raw(),
    });
    let after = dispatch_control_point(&mut ctx, state, &query);
    assert_eq!(after, state);
    let frame = wire.borrow().last_frame();
    let frame = NotificationFrame::parse(&frame).unwrap();
    assert_eq!((frame.opcode, frame.status), (Opcode::ReportTargetInfo, DfuStatus::Success));
    assert_eq!(frame.u32_at(0), Some(v(1, 0).bits()));
    assert_eq!(frame.u32_at(4), Some(512));
    assert_eq!(frame.u16_at(8), Some(512));

    let unknown = cp(ControlPoint::ReportTargetInfo { image_id: 0x0001 });
    assert_eq!(dispatch_control_point(&mut ctx, state, &unknown), state);
    assert_eq!(
        wire.borrow().last_status(),
        Some((Opcode::ReportTargetInfo, DfuStatus::InvalidParameter))
    );
}

#[test]
fn test_target_info_without_buffer_check_reports_nothing_buffered() {
    let config = test_config();
    let mut rig = Rig::new(config.clone(), test_layout());
    let image = build_image(ImageId::SecureApp, &config, 0x1000, v(1, 0));
    let wire = rig.wire.clone();

    let mut ctx = rig.engine();
    let mut state = open_session(&mut ctx, &config, ImageId::SecureApp, 0x1000);
    state = send_packets(&mut ctx, state, &image[..768], 256);

    let query = cp(ControlPoint::ReportTargetInfo {
        image_id: ImageId::SecureApp.raw(),
    });
    assert_eq!(dispatch_control_point(&mut ctx, state, &query), state);
    let last = wire.borrow().last_frame();
    let frame = NotificationFrame::parse(&last).unwrap();
    assert_eq!((frame.opcode, frame.status), (Opcode::ReportTargetInfo, DfuStatus::Success));
    assert_eq!(frame.u32_at(4), Some(768));
    assert_eq!(frame.u16_at(8), Some(0));
}

#[test]
fn test_image_versions_per_bank() {
    let config = test_config();
    let mut rig = ota_rig(&config, &[(ImageId::McuApp, 0x1000)]);
    let wire = rig.wire.clone();
    let mut ctx = rig.engine();

    dispatch_control_point(&mut ctx, SessionState::Idle, &cp(ControlPoint::GetImageVer { bank: BankQuery::Active }));
    let frame = wire.borrow().last_frame();
    let frame = NotificationFrame::parse(&frame).unwrap();
    assert_eq!(frame.opcode, Opcode::GetImageVer);
    assert_eq!(frame.body[0], 1);
    assert_eq!(frame.body[1], 2);
    assert_eq!(frame.u16_at(2), Some(ImageId::Ota.raw()));
    assert_eq!(frame.u32_at(4), Some(v(1, 0).bits()));
    assert_eq!(frame.u16_at(8), Some(ImageId::McuApp.raw()));

    dispatch_control_point(&mut ctx, SessionState::Idle, &cp(ControlPoint::GetImageVer { bank: BankQuery::Inactive }));
    let frame = wire.borrow().last_frame();
    let frame = NotificationFrame::parse(&frame).unwrap();
    assert_eq!(frame.body[0], 2);
    // Only the staged container: its sub-image has not been received.
    assert_eq!(frame.body[1], 1);
    assert_eq!(frame.u32_at(4), Some(v(2, 0).bits()));
}

#[test]
fn test_section_sizes_list_receivable_images() {
    let config = test_config();
    let mut rig = ota_rig(&config, &[(ImageId::McuApp, 0x1000)]);
    let wire = rig.wire.clone();
    let mut ctx = rig.engine();

    dispatch_control_point(&mut ctx, SessionState::Idle, &cp(ControlPoint::GetSectionSize));
    let frame = wire.borrow().last_frame();
    let frame = NotificationFrame::parse(&frame).unwrap();
    let count = frame.body[0] as usize;
    let entries: Vec<(u16, u32)> = (0..count)
        .map(|i| (frame.u16_at(1 + i * 6).unwrap(), frame.u32_at(3 + i * 6).unwrap()))
        .collect();

    assert!(entries.contains(&(ImageId::BootPatch.raw(), 0x2000)));
    assert!(entries.contains(&(ImageId::Ota.raw(), 0x1000)));
    assert!(entries.contains(&(ImageId::McuApp.raw(), 0x1000)));
    assert!(entries.contains(&(ImageId::UserData1.raw(), 0x2000)));
    assert!(!entries.iter().any(|(id, _)| *id == ImageId::UpperStack.raw()));
}

#[test]
fn test_check_sha256_compares_both_copies() {
    let config = test_config();
    let mut rig = ota_rig(&config, &[(ImageId::McuApp, 0x1000)]);
    let active = build_image(ImageId::McuApp, &config, 0x1000, v(1, 0));
    let digest = image_digest(&active);
    let wire = rig.wire.clone();
    let mut ctx = rig.engine();

    let mut scratch = [0u8; 68];
    let entries = sha256_entries(&[(ImageId::McuApp.raw(), digest), (0x0001, [0; 32])], &mut scratch).unwrap();
    dispatch_control_point(&mut ctx, SessionState::Idle, &cp(ControlPoint::CheckSha256 { entries }));

    let frame = wire.borrow().last_frame();
    let frame = NotificationFrame::parse(&frame).unwrap();
    assert_eq!(frame.opcode, Opcode::CheckSha256);
    assert_eq!(frame.u16_at(0), Some(ImageId::McuApp.raw()));
    assert_eq!(frame.body[2], Sha256Match::SameAsActive as u8);
    assert_eq!(frame.u16_at(3), Some(0x0001));
    assert_eq!(frame.body[5], Sha256Match::Neither as u8);
}

#[test]
fn test_conn_params_are_forwarded() {
    let config = test_config();
    let mut rig = Rig::new(config.clone(), test_layout());
    let wire = rig.wire.clone();
    let mut ctx = rig.engine();
    let params = ConnParams {
        interval_min: 6,
        interval_max: 12,
        latency: 0,
        supervision_timeout: 500,
    };

    dispatch_control_point(&mut ctx, SessionState::Idle, &cp(ControlPoint::ConnParaUpdateReq(params)));
    assert_eq!(wire.borrow().conn_params, vec![params]);
    assert!(wire.borrow().frames.is_empty());
    report_conn_params(&mut ctx, true);
    assert_eq!(wire.borrow().last_status(), Some((Opcode::ConnParaUpdateReq, DfuStatus::Success)));

    wire.borrow_mut().refuse_conn_params = true;
    dispatch_control_point(&mut ctx, SessionState::Idle, &cp(ControlPoint::ConnParaUpdateReq(params)));
    assert_eq!(wire.borrow().last_status(), Some((Opcode::ConnParaUpdateReq, DfuStatus::FailOperation)));
}

#[test]
fn test_buffer_check_needs_support() {
    let config = DfuConfig {
        features: DeviceFeatures::SUPPORT_MULTIIMAGE,
        ..test_config()
    };
    let mut rig = Rig::new(config.clone(), test_layout());
    let wire = rig.wire.clone();
    let mut ctx = rig.engine();

    let state = dispatch_control_point(&mut ctx, SessionState::Idle, &start_dfu(&config, ImageId::SecureApp, 0x1000));
    let state = dispatch_control_point(&mut ctx, state, &cp(ControlPoint::BufferCheckEn { enable: true }));
    assert_eq!(state, SessionState::Started);
    assert_eq!(wire.borrow().last_status(), Some((Opcode::BufferCheckEn, DfuStatus::FailOperation)));
    assert!(!ctx.session.buffer_check_en);
}

#[test]
fn test_device_info_reflects_layout() {
    let config = test_config();
    let mut rig = ota_rig(&config, &[(ImageId::McuApp, 0x1000)]);
    let ctx = rig.engine();
    let info = ctx.device_info();

    assert_eq!(info.ic_type, config.ic_type);
    assert!(info.mode.buffer_check_en);
    assert!(info.mode.support_multi_image);
    assert!(!info.mode.aes_en);
    assert_eq!(info.ota_temp_size, 8);
    assert_eq!(info.active_banknum, 1);
    assert_eq!(info.ctrl_header_offset, 416);
}
