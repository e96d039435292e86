// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Tests for control-point parsing and notification framing.

use bee_dfu_common::checksum::crc16;
use bee_dfu_common::protocol::{
    sha256_entries, BankQuery, ConnParams, ControlPoint, DeviceInfo, DeviceInfoMode, DfuStatus,
    Notification, NotificationFrame, Opcode, ParseError, Sha256Match, DFU_OPCODE_NOTIF,
};

#[test]
fn test_parse_start_dfu() {
    let mut frame = [0u8; 17];
    frame[0] = 0x01;
    for (i, b) in frame[1..].iter_mut().enumerate() {
        *b = i as u8;
    }
    let ControlPoint::StartDfu { payload } = ControlPoint::parse(&frame).unwrap() else {
        panic!("expected StartDfu");
    };
    assert_eq!(payload[0], 0);
    assert_eq!(payload[15], 15);
}

#[test]
fn test_parse_receive_fw_image_info() {
    let frame = [0x02, 0xA9, 0x37, 0x00, 0x10, 0x00, 0x00];
    assert_eq!(
        ControlPoint::parse(&frame),
        Ok(ControlPoint::ReceiveFwImageInfo {
            image_id: 0x37A9,
            length: 4096,
        })
    );
}

#[test]
fn test_parse_rejects_bad_length() {
    let frame = [0x02, 0xA9, 0x37, 0x00, 0x10, 0x00];
    assert_eq!(
        ControlPoint::parse(&frame),
        Err(ParseError::BadLength {
            opcode: Opcode::ReceiveFwImageInfo,
            len: 6,
        })
    );
    assert!(ControlPoint::parse(&[0x05, 0x00]).is_err());
}

#[test]
fn test_parse_unknown_and_empty() {
    assert_eq!(ControlPoint::parse(&[]), Err(ParseError::Empty));
    assert_eq!(ControlPoint::parse(&[0x08]), Err(ParseError::UnknownOpcode(0x08)));
    assert_eq!(ControlPoint::parse(&[0x10]), Err(ParseError::UnknownOpcode(0x10)));
}

#[test]
fn test_parse_optional_payloads() {
    assert_eq!(
        ControlPoint::parse(&[0x09]),
        Ok(ControlPoint::BufferCheckEn { enable: true })
    );
    assert_eq!(
        ControlPoint::parse(&[0x09, 0x00]),
        Ok(ControlPoint::BufferCheckEn { enable: false })
    );
    assert_eq!(
        ControlPoint::parse(&[0x0d]),
        Ok(ControlPoint::GetImageVer {
            bank: BankQuery::Active
        })
    );
    assert_eq!(
        ControlPoint::parse(&[0x0d, 0x01]),
        Ok(ControlPoint::GetImageVer {
            bank: BankQuery::Inactive
        })
    );
}

#[test]
fn test_parse_conn_params() {
    let frame = [0x07, 6, 0, 12, 0, 0, 0, 0xF4, 0x01];
    assert_eq!(
        ControlPoint::parse(&frame),
        Ok(ControlPoint::ConnParaUpdateReq(ConnParams {
            interval_min: 6,
            interval_max: 12,
            latency: 0,
            supervision_timeout: 500,
        }))
    );
}

#[test]
fn test_check_sha256_entries() {
    let mut scratch = [0u8; 68];
    let entries = sha256_entries(&[(0x37A9, [1; 32]), (0x379F, [2; 32])], &mut scratch).unwrap();
    let request = ControlPoint::CheckSha256 { entries };
    let frame = request.encode().unwrap();
    assert_eq!(frame.len(), 1 + 68);

    let ControlPoint::CheckSha256 { entries } = ControlPoint::parse(&frame).unwrap() else {
        panic!("expected CheckSha256");
    };
    let decoded: Vec<_> = entries.iter().collect();
    assert_eq!(decoded, vec![(0x37A9, [1; 32]), (0x379F, [2; 32])]);
}

#[test]
fn test_check_sha256_rejects_partial_entry() {
    let frame = [0x0f; 1 + 33];
    assert!(matches!(
        ControlPoint::parse(&frame),
        Err(ParseError::BadLength { .. })
    ));
}

#[test]
fn test_encode_matches_parse() {
    let requests = [
        ControlPoint::ReceiveFwImageInfo {
            image_id: 0x37A9,
            length: 0x1234,
        },
        ControlPoint::ValidFw {
            image_id: 0x37A9,
            last: true,
        },
        ControlPoint::ActiveImageReset {
            enter_dfu_mode: false,
        },
        ControlPoint::SystemReset,
        ControlPoint::ReportBufferCrc {
            crc: 0xBEEF,
            offset: 1024,
        },
        ControlPoint::CopyImg,
    ];
    for request in requests {
        let frame = request.encode().unwrap();
        assert_eq!(ControlPoint::parse(&frame), Ok(request));
    }
}

#[test]
fn test_status_notification_framing() {
    let frame = Notification::Status {
        opcode: Opcode::StartDfu,
        status: DfuStatus::Success,
    }
    .encode();
    assert_eq!(frame.as_slice(), &[DFU_OPCODE_NOTIF, 0x01, 0x01]);
}

#[test]
fn test_target_info_notification() {
    let frame = Notification::TargetInfo {
        status: DfuStatus::Success,
        version: 0x0102_0304,
        cur_offset: 2048,
        buffered: 512,
    }
    .encode();
    assert_eq!(frame.len(), 3 + 10);
    let parsed = NotificationFrame::parse(&frame).unwrap();
    assert_eq!(parsed.opcode, Opcode::ReportTargetInfo);
    assert_eq!(parsed.u32_at(0), Some(0x0102_0304));
    assert_eq!(parsed.u32_at(4), Some(2048));
    assert_eq!(parsed.u16_at(8), Some(512));
    assert_eq!(parsed.u16_at(9), None);
}

#[test]
fn test_buffer_check_notification() {
    let frame = Notification::BufferCheck {
        status: DfuStatus::CrcError,
        cur_offset: 1024,
    }
    .encode();
    assert_eq!(frame.as_slice(), &[0x10, 0x0a, 0x05, 0x00, 0x04, 0x00, 0x00]);
}

#[test]
fn test_image_versions_notification() {
    let images = [(0x37A0u16, 1u32), (0x37A9, 2)];
    let frame = Notification::ImageVersions {
        status: DfuStatus::Success,
        bank_num: 1,
        images: &images,
    }
    .encode();
    assert_eq!(&frame[..5], &[0x10, 0x0d, 0x01, 1, 2]);
    assert_eq!(frame.len(), 5 + 12);
}

#[test]
fn test_sha256_results_notification() {
    let results = [(0x37A9u16, Sha256Match::SameAsActive)];
    let frame = Notification::Sha256Results {
        status: DfuStatus::Success,
        results: &results,
    }
    .encode();
    assert_eq!(frame.as_slice(), &[0x10, 0x0f, 0x01, 0xA9, 0x37, 0x02]);
}

#[test]
fn test_sha256_match_codes() {
    assert_eq!(Sha256Match::from_matches(false, false) as u8, 0);
    assert_eq!(Sha256Match::from_matches(true, false) as u8, 1);
    assert_eq!(Sha256Match::from_matches(false, true) as u8, 2);
    assert_eq!(Sha256Match::from_matches(true, true) as u8, 3);
}

#[test]
fn test_notification_frame_rejects_garbage() {
    assert_eq!(NotificationFrame::parse(&[]), Err(ParseError::Empty));
    assert_eq!(
        NotificationFrame::parse(&[0x10, 0x01, 0x77]),
        Err(ParseError::UnknownStatus(0x77))
    );
    assert_eq!(
        NotificationFrame::parse(&[0x01, 0x01, 0x01]),
        Err(ParseError::UnknownOpcode(0x01))
    );
}

#[test]
fn test_device_info_layout() {
    let info = DeviceInfo {
        ic_type: 0xF,
        spec_ver: 5,
        mode: DeviceInfoMode {
            buffer_check_en: true,
            support_multi_image: true,
            support_normal_ota: true,
            ..Default::default()
        },
        ota_temp_size: 0x70,
        active_banknum: 1,
        bootpatch_active_banknum: 2,
        secureapp_active_banknum: 0,
        ctrl_header_offset: 416,
    };
    let bytes = info.encode();
    assert_eq!(
        bytes,
        [0x0F, 5, 0b1_1001, 0, 0x70, 0, 1, 2, 0, 0xA0, 0x01, 0]
    );
    assert_eq!(DeviceInfo::decode(&bytes), info);
}

#[test]
fn test_crc16_arc_check_value() {
    assert_eq!(crc16(b"123456789"), 0xBB3D);
    assert_eq!(crc16(&[]), 0);
}
