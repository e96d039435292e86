// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

use super::session::{SessionState, TransferSession};
use super::{storage, UpdateContext};
use crate::bank::BankFamily;
use crate::commit;
use crate::error::{AbortCause, CommitError, IntegrityError, TransferError};
use crate::flash;
use crate::partition::{sub_image_slot, Resolver, TempSlot};
use crate::platform::KeySlot;
use crate::verify;
use bee_dfu_common::header::{CtrlHeader, DEFAULT_HEADER_SIZE};
use bee_dfu_common::image_id::{ImageFamily, BANK_IMAGE_COUNT, MAX_IMAGE_NUM};
use bee_dfu_common::protocol::{
    BankQuery, ConnParams, Sha256Entries, Sha256Match, BANK_0, BANK_1, BANK_NOT_SWITCHABLE,
    MAX_BUFFER_SIZE, MAX_PACKET_LEN, MAX_SHA256_CHECKS,
};
use bee_dfu_common::{
    ControlPoint, DeviceFeatures, DfuStatus, ImageId, Notification, Opcode, ParseError,
    FLASH_SECTOR_SIZE,
};
use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};
use heapless::Vec;

type Entries = Vec<(ImageId, u32), MAX_IMAGE_NUM>;
type ImageList = Vec<(u16, u32), MAX_IMAGE_NUM>;

fn notify<F>(ctx: &mut UpdateContext<'_, F>, notification: Notification<'_>) {
    if let Err(e) = ctx.peripherals.transport.notify(&notification.encode()) {
        warn!("Update: notification dropped: {:?}", e);
    }
}

fn send_status<F>(ctx: &mut UpdateContext<'_, F>, opcode: Opcode, status: DfuStatus) {
    notify(ctx, Notification::Status { opcode, status });
}

fn reject_with<F>(
    ctx: &mut UpdateContext<'_, F>,
    opcode: Opcode,
    status: DfuStatus,
    state: SessionState,
) -> SessionState {
    send_status(ctx, opcode, status);
    state
}

fn abort_with<F>(ctx: &mut UpdateContext<'_, F>, cause: AbortCause, report: Notification<'_>) -> SessionState {
    error!("Update: session aborted: {:?}", cause);
    notify(ctx, report);
    SessionState::Aborted(cause)
}

/// Reject before `START_DFU`, abort once a session is open.
fn fail<F>(ctx: &mut UpdateContext<'_, F>, state: SessionState, opcode: Opcode, cause: AbortCause) -> SessionState {
    let status = cause.status();
    match state {
        SessionState::Idle => reject_with(ctx, opcode, status, state),
        _ => abort_with(ctx, cause, Notification::Status { opcode, status }),
    }
}

/// Abort from the data path, reporting the write front to the peer.
fn abort_transfer<F>(ctx: &mut UpdateContext<'_, F>, cause: AbortCause) -> SessionState {
    let cur_offset = ctx.session.cur_offset;
    abort_with(
        ctx,
        cause,
        Notification::BufferCheck {
            status: cause.status(),
            cur_offset,
        },
    )
}

/// Gate shared by the requests that drive a transfer.
fn check_open<F>(
    ctx: &mut UpdateContext<'_, F>,
    state: SessionState,
    opcode: Opcode,
) -> Result<(), SessionState> {
    match state {
        SessionState::Idle => Err(reject_with(ctx, opcode, DfuStatus::FailOperation, state)),
        s if s.is_transferring() => Err(fail(ctx, state, opcode, TransferError::BadState.into())),
        _ => Ok(()),
    }
}

/// Parse a control-point write and dispatch it.
pub fn dispatch_control_point<F: NorFlash>(
    ctx: &mut UpdateContext<'_, F>,
    state: SessionState,
    bytes: &[u8],
) -> SessionState {
    match ControlPoint::parse(bytes) {
        Ok(cmd) => dispatch_command(ctx, state, cmd),
        Err(ParseError::BadLength { opcode, len }) => {
            warn!("Update: {:?} with {} bytes", opcode, len);
            reject_with(ctx, opcode, DfuStatus::InvalidParameter, state)
        }
        Err(e) => {
            warn!("Update: control point write ignored: {:?}", e);
            state
        }
    }
}

/// Dispatch a command to its handler.
pub fn dispatch_command<F: NorFlash>(
    ctx: &mut UpdateContext<'_, F>,
    state: SessionState,
    cmd: ControlPoint<'_>,
) -> SessionState {
    if let SessionState::Aborted(_) = state {
        warn!("Update: {:?} after abort", cmd.opcode());
        return state;
    }

    match cmd {
        ControlPoint::StartDfu { payload } => handle_start_dfu(ctx, state, payload),
        ControlPoint::ReceiveFwImageInfo { image_id, length } => {
            handle_receive_image_info(ctx, state, image_id, length)
        }
        ControlPoint::ValidFw { image_id, last } => handle_valid_fw(ctx, state, image_id, last),
        ControlPoint::ActiveImageReset { enter_dfu_mode } => {
            handle_active_image_reset(ctx, state, enter_dfu_mode)
        }
        ControlPoint::SystemReset => handle_system_reset(state),
        ControlPoint::ReportTargetInfo { image_id } => handle_report_target_info(ctx, state, image_id),
        ControlPoint::ConnParaUpdateReq(params) => handle_conn_para_update(ctx, state, params),
        ControlPoint::BufferCheckEn { enable } => handle_buffer_check_en(ctx, state, enable),
        ControlPoint::ReportBufferCrc { crc, offset } => {
            handle_report_buffer_crc(ctx, state, crc, offset)
        }
        ControlPoint::CopyImg => handle_copy_img(ctx, state),
        ControlPoint::GetImageVer { bank } => handle_get_image_ver(ctx, state, bank),
        ControlPoint::GetSectionSize => handle_get_section_size(ctx, state),
        ControlPoint::CheckSha256 { entries } => handle_check_sha256(ctx, state, entries),
    }
}

/// Handle `START_DFU`: check the announced control header and open a session.
fn handle_start_dfu<F: NorFlash>(
    ctx: &mut UpdateContext<'_, F>,
    state: SessionState,
    mut payload: [u8; 16],
) -> SessionState {
    const OPCODE: Opcode = Opcode::StartDfu;
    if state != SessionState::Idle {
        warn!("START_DFU: session already open");
        return reject_with(ctx, OPCODE, DfuStatus::FailOperation, state);
    }

    if ctx.config.supports(DeviceFeatures::ENABLE_AES_ENCRYPT) {
        if let Err(e) = verify::decrypt_blocks(ctx.peripherals.cipher, KeySlot::Link, &mut payload) {
            warn!("START_DFU: link decrypt failed: {:?}", e);
            return reject_with(ctx, OPCODE, DfuStatus::FailOperation, state);
        }
    }

    let Ok(start) = CtrlHeader::decode(&payload) else {
        return reject_with(ctx, OPCODE, DfuStatus::InvalidParameter, state);
    };
    if start.ic_type != ctx.config.ic_type || ImageId::from_raw(start.image_id).is_none() {
        warn!(
            "START_DFU: ic_type 0x{:02x}, image 0x{:04x} refused",
            start.ic_type,
            start.image_id
        );
        return reject_with(ctx, OPCODE, DfuStatus::InvalidParameter, state);
    }
    if start.secure_version < ctx.config.min_secure_version {
        warn!(
            "START_DFU: secure version {} below {}",
            start.secure_version,
            ctx.config.min_secure_version
        );
        return reject_with(ctx, OPCODE, DfuStatus::SysVersionError, state);
    }

    info!(
        "START_DFU: image 0x{:04x}, {} bytes",
        start.image_id,
        start.payload_len
    );
    // The link MTU outlives the session.
    let mtu = ctx.session.mtu_size;
    ctx.session = TransferSession::new(ctx.config);
    ctx.session.mtu_size = mtu;
    ctx.session.start = Some(start);
    send_status(ctx, OPCODE, DfuStatus::Success);
    SessionState::Started
}

/// Handle `RECEIVE_FW_IMAGE_INFO`: resolve the destination of the next image.
fn handle_receive_image_info<F: NorFlash>(
    ctx: &mut UpdateContext<'_, F>,
    state: SessionState,
    image_id: u16,
    length: u32,
) -> SessionState {
    const OPCODE: Opcode = Opcode::ReceiveFwImageInfo;
    if let Err(state) = check_open(ctx, state, OPCODE) {
        return state;
    }

    match prepare_image(ctx, image_id, length) {
        Ok(()) => {
            send_status(ctx, OPCODE, DfuStatus::Success);
            SessionState::Receiving
        }
        Err(e) => fail(ctx, state, OPCODE, e.into()),
    }
}

fn prepare_image<F: NorFlash>(ctx: &mut UpdateContext<'_, F>, raw_id: u16, length: u32) -> Result<(), TransferError> {
    if ctx.session.images_received > 0 && !ctx.config.supports(DeviceFeatures::SUPPORT_MULTIIMAGE) {
        warn!("RECEIVE_FW_IMAGE_INFO: multi-image transfer not supported");
        return Err(TransferError::BadState);
    }
    let id = ImageId::from_raw(raw_id).ok_or(TransferError::InvalidParameter)?;
    if length == 0 || (!id.is_user_data() && length < DEFAULT_HEADER_SIZE as u32) {
        return Err(TransferError::InvalidParameter);
    }

    let resolver = Resolver::new(ctx.layout, &ctx.banks, ctx.config);
    let slot = resolver.temp_slot(&mut *ctx.peripherals.flash, id, ctx.session.next_subimage_offset)?;
    if length > slot.size {
        warn!(
            "RECEIVE_FW_IMAGE_INFO: {} bytes do not fit in {} at 0x{:08x}",
            length,
            slot.size,
            slot.addr
        );
        return Err(TransferError::DataSizeExceedsLimit);
    }

    ctx.update.invalidate(id);
    ctx.session.begin_image(id, slot, length, ctx.config.buffer_crc_retries);
    ctx.supervisor.scale_total(length);
    info!(
        "Image 0x{:04x}: {} bytes to 0x{:08x}",
        raw_id,
        length,
        slot.addr
    );
    Ok(())
}

/// Handle a packet write: store the chunk and advance the session.
pub fn dispatch_packet<F: NorFlash>(ctx: &mut UpdateContext<'_, F>, state: SessionState, data: &[u8]) -> SessionState {
    match state {
        SessionState::Receiving => {}
        SessionState::Idle | SessionState::Aborted(_) => {
            warn!("Update: packet ignored in {:?}", state);
            return state;
        }
        SessionState::BufferPending => return abort_transfer(ctx, TransferError::LengthMismatch.into()),
        _ => return abort_transfer(ctx, TransferError::BadState.into()),
    }

    let mut chunk: Vec<u8, MAX_PACKET_LEN> = Vec::new();
    if chunk.extend_from_slice(data).is_err() {
        return abort_transfer(ctx, TransferError::LengthMismatch.into());
    }
    if let Err(cause) = receive_packet(ctx, &mut chunk) {
        return abort_transfer(ctx, cause);
    }
    trace!("Packet: {} bytes, offset {}", data.len(), ctx.session.cur_offset);

    let session = &ctx.session;
    if session.buffer_check_en {
        if session.buffered() >= u32::from(session.buffer_size) || session.image_complete() {
            return SessionState::BufferPending;
        }
        SessionState::Receiving
    } else if session.image_complete() {
        complete_image(ctx)
    } else {
        SessionState::Receiving
    }
}

fn receive_packet<F: NorFlash>(ctx: &mut UpdateContext<'_, F>, data: &mut [u8]) -> Result<(), AbortCause> {
    let len = data.len() as u32;
    let session = &ctx.session;
    if session.cur_offset + len > session.image_total_length {
        return Err(TransferError::LengthMismatch.into());
    }
    if session.buffer_check_en && session.buffered() + len > u32::from(session.buffer_size) {
        return Err(TransferError::LengthMismatch.into());
    }

    if ctx.config.supports(DeviceFeatures::ENABLE_AES_ENCRYPT) {
        let blocks = if ctx.config.supports(DeviceFeatures::ENCRYPT_MODE_16N) {
            data.len() - data.len() % 16
        } else if data.len() >= 16 {
            16
        } else {
            0
        };
        verify::decrypt_blocks(ctx.peripherals.cipher, KeySlot::Link, &mut data[..blocks])
            .map_err(IntegrityError::Crypto)?;
    }

    let has_header = ctx.session.image_id.is_some_and(|id| !id.is_user_data());
    storage::write_chunk(
        &mut *ctx.peripherals.flash,
        ctx.layout.flash_base,
        &mut ctx.session,
        data,
        has_header,
    )?;
    Ok(())
}

/// Handle `REPORT_BUFFER_CRC`: compare the peer's CRC with what landed in flash.
fn handle_report_buffer_crc<F: NorFlash>(
    ctx: &mut UpdateContext<'_, F>,
    state: SessionState,
    crc: u16,
    offset: u16,
) -> SessionState {
    match state {
        SessionState::BufferPending => {}
        SessionState::Idle => {
            return reject_with(ctx, Opcode::ReportBufferCrc, DfuStatus::FailOperation, state)
        }
        _ => return abort_transfer(ctx, TransferError::BadState.into()),
    }

    let buffered = ctx.session.buffered();
    if u32::from(offset) != buffered {
        warn!("REPORT_BUFFER_CRC: peer buffered {}, device {}", offset, buffered);
        return abort_transfer(ctx, TransferError::LengthMismatch.into());
    }

    let image_addr = ctx.session.slot.addr;
    let start = image_addr + ctx.session.buffer_check_offset;
    let restore = ctx
        .session
        .saved_flag_byte
        .map(|byte| (flash::flag_byte_addr(image_addr), byte));
    let computed = match flash::crc16_region(
        &mut *ctx.peripherals.flash,
        ctx.layout.flash_base,
        start,
        buffered,
        restore,
    ) {
        Ok(computed) => computed,
        Err(e) => return abort_transfer(ctx, TransferError::FlashWrite(e).into()),
    };

    if computed != crc {
        warn!(
            "REPORT_BUFFER_CRC: mismatch at 0x{:08x}: peer 0x{:04x}, flash 0x{:04x}",
            start,
            crc,
            computed
        );
        return retry_buffer(ctx, start, buffered);
    }

    ctx.session.buffer_check_offset = ctx.session.cur_offset;
    let cur_offset = ctx.session.cur_offset;
    notify(
        ctx,
        Notification::BufferCheck {
            status: DfuStatus::Success,
            cur_offset,
        },
    );

    if ctx.session.image_complete() {
        complete_image(ctx)
    } else {
        SessionState::Receiving
    }
}

/// Rewind a sector-aligned buffer for retransmission, or give up.
fn retry_buffer<F: NorFlash>(ctx: &mut UpdateContext<'_, F>, start: u32, buffered: u32) -> SessionState {
    let buffer_size = u32::from(ctx.session.buffer_size);
    let rewindable = ctx.session.crc_retries_left > 0
        && start % FLASH_SECTOR_SIZE == 0
        && buffer_size % FLASH_SECTOR_SIZE == 0;
    if !rewindable {
        return abort_transfer(ctx, TransferError::CrcMismatch.into());
    }

    if let Err(e) = storage::erase_range(&mut *ctx.peripherals.flash, ctx.layout.flash_base, start, start + buffered) {
        return abort_transfer(ctx, e.into());
    }
    ctx.session.crc_retries_left -= 1;
    ctx.session.cur_offset = ctx.session.buffer_check_offset;
    let cur_offset = ctx.session.cur_offset;
    info!("REPORT_BUFFER_CRC: buffer rewound to {}", cur_offset);
    notify(
        ctx,
        Notification::BufferCheck {
            status: DfuStatus::CrcError,
            cur_offset,
        },
    );
    SessionState::Receiving
}

/// The last byte of an image landed: verify it and activate what is complete.
fn complete_image<F: NorFlash>(ctx: &mut UpdateContext<'_, F>) -> SessionState {
    let state = SessionState::Verifying;
    ctx.session.images_received = ctx.session.images_received.saturating_add(1);
    trace!("Update: {:?}", state);

    match finish_image(ctx) {
        Ok(next) => next,
        Err(cause) => fail(ctx, state, Opcode::ValidFw, cause),
    }
}

fn finish_image<F: NorFlash>(ctx: &mut UpdateContext<'_, F>) -> Result<SessionState, AbortCause> {
    let id = ctx.session.image_id.ok_or(TransferError::BadState)?;
    let slot = ctx.session.slot;
    let length = ctx.session.image_total_length;

    if id.is_user_data() {
        ctx.update.mark_valid(id, slot.addr);
        info!("User data 0x{:04x} written at 0x{:08x}", id.raw(), slot.addr);
        return Ok(mark_committed(ctx));
    }

    verify_at(ctx, id, slot, Some(length))?;
    if !ctx.layout.bank_switch && id.family() == ImageFamily::OtaSubImage {
        ctx.session.record_temp_image(id, slot, length);
    }
    auto_commit(ctx, id)
}

/// Check the copy of `id` whose header sits at `slot.addr` and mark it valid.
fn verify_at<F: NorFlash>(
    ctx: &mut UpdateContext<'_, F>,
    id: ImageId,
    slot: TempSlot,
    expected_len: Option<u32>,
) -> Result<(), AbortCause> {
    let base = ctx.layout.flash_base;
    let flash = &mut *ctx.peripherals.flash;
    let header = flash::read_header(flash, base, slot.addr).map_err(IntegrityError::from)?;
    header
        .validate_staged(id, &ctx.config.header_check(slot.size))
        .map_err(TransferError::Header)?;
    let total_len = header.total_len().map_err(TransferError::Header)?;
    if expected_len.is_some_and(|len| len != total_len) {
        return Err(TransferError::LengthMismatch.into());
    }

    verify::verify_image(
        flash,
        base,
        slot.addr,
        &header,
        ctx.peripherals.cipher,
        ctx.peripherals.signer,
        ctx.config.signature,
    )?;
    ctx.update.mark_valid(id, slot.addr);
    info!("Image 0x{:04x} verified at 0x{:08x}", id.raw(), slot.addr);
    Ok(())
}

fn pending_where<F>(ctx: &UpdateContext<'_, F>, mut keep: impl FnMut(ImageId) -> bool) -> Entries {
    ctx.update
        .pending()
        .iter()
        .filter(|(id, _)| keep(*id))
        .copied()
        .collect()
}

fn is_ota_family(id: ImageId) -> bool {
    BankFamily::of(id) == Some(BankFamily::Ota)
}

/// Activate what the image just verified completes.
fn auto_commit<F: NorFlash>(ctx: &mut UpdateContext<'_, F>, id: ImageId) -> Result<SessionState, AbortCause> {
    let ready = match id.family() {
        ImageFamily::BootPatch | ImageFamily::SecureApp | ImageFamily::SecureAppData => {
            pending_where(ctx, |pending| pending == id)
        }
        ImageFamily::OtaHeader | ImageFamily::OtaSubImage if ctx.layout.bank_switch => {
            if container_complete(ctx)? {
                pending_where(ctx, is_ota_family)
            } else {
                Entries::new()
            }
        }
        // OTA_TMP images wait for VALID_FW(last) or ACTIVE_IMAGE_RESET.
        _ => Entries::new(),
    };

    if ready.is_empty() {
        return Ok(SessionState::Started);
    }
    commit_entries(ctx, &ready)?;
    Ok(mark_committed(ctx))
}

/// Whether the temp OTA bank holds a complete, verified container.
///
/// A container header staged before this session is verified here.
fn container_complete<F: NorFlash>(ctx: &mut UpdateContext<'_, F>) -> Result<bool, AbortCause> {
    let resolver = Resolver::new(ctx.layout, &ctx.banks, ctx.config);
    let temp = resolver.temp_bank(BankFamily::Ota).map_err(TransferError::from)?;
    let header = match resolver.container_header(&mut *ctx.peripherals.flash, &temp) {
        Ok(header) => header,
        Err(e) => {
            debug!("Update: temp container not ready: {:?}", e);
            return Ok(false);
        }
    };

    let missing = ImageId::BANK_IMAGES
        .into_iter()
        .filter(|id| header.sub_image_size(*id) != 0)
        .find(|id| {
            let slot = sub_image_slot(&header, &temp, *id).ok();
            ctx.update.pending_addr(*id) != slot.map(|slot| slot.addr)
        });
    if let Some(id) = missing {
        debug!("Update: container still needs 0x{:04x}", id.raw());
        return Ok(false);
    }

    if ctx.update.pending_addr(ImageId::Ota) != Some(temp.base) {
        let slot = TempSlot {
            addr: temp.base,
            size: temp.size,
        };
        verify_at(ctx, ImageId::Ota, slot, None)?;
    }
    Ok(true)
}

fn commit_entries<F: NorFlash>(ctx: &mut UpdateContext<'_, F>, entries: &[(ImageId, u32)]) -> Result<(), CommitError> {
    let resolver = Resolver::new(ctx.layout, &ctx.banks, ctx.config);
    commit::commit(&mut *ctx.peripherals.flash, &resolver, ctx.config, entries)?;

    ctx.update.clear_pending(entries);
    if !ctx.layout.bank_switch && entries.iter().any(|(id, _)| id.family() == ImageFamily::OtaSubImage) {
        ctx.update.reset_to_ota_mode = true;
    }
    ctx.rescan_banks();
    Ok(())
}

/// Activate every pending image. `None` when there was nothing to do.
fn commit_remaining<F: NorFlash>(ctx: &mut UpdateContext<'_, F>) -> Result<Option<SessionState>, AbortCause> {
    if ctx.update.pending().is_empty() {
        return Ok(None);
    }
    let ota_pending = ctx.update.pending().iter().any(|(id, _)| is_ota_family(*id));
    if ota_pending && ctx.layout.bank_switch && !container_complete(ctx)? {
        return Err(CommitError::Incomplete.into());
    }

    let entries = pending_where(ctx, |_| true);
    commit_entries(ctx, &entries)?;
    Ok(Some(mark_committed(ctx)))
}

fn mark_committed<F>(ctx: &mut UpdateContext<'_, F>) -> SessionState {
    ctx.update.active_reset_pending = true;
    if !ctx.config.supports(DeviceFeatures::SUPPORT_MULTIIMAGE) {
        ctx.peripherals.transport.disconnect();
    }
    SessionState::Committed
}

/// Handle `VALID_FW`: verify the image if needed, activate on the last one.
fn handle_valid_fw<F: NorFlash>(
    ctx: &mut UpdateContext<'_, F>,
    state: SessionState,
    image_id: u16,
    last: bool,
) -> SessionState {
    const OPCODE: Opcode = Opcode::ValidFw;
    if let Err(state) = check_open(ctx, state, OPCODE) {
        return state;
    }

    match validate_image(ctx, image_id, last) {
        Ok(next) => {
            send_status(ctx, OPCODE, DfuStatus::Success);
            next.unwrap_or(state)
        }
        Err(cause) => fail(ctx, state, OPCODE, cause),
    }
}

fn validate_image<F: NorFlash>(
    ctx: &mut UpdateContext<'_, F>,
    raw_id: u16,
    last: bool,
) -> Result<Option<SessionState>, AbortCause> {
    let id = ImageId::from_raw(raw_id).ok_or(TransferError::InvalidParameter)?;
    if !ctx.update.is_valid(id) {
        if id.is_user_data() {
            return Err(TransferError::InvalidParameter.into());
        }
        let slot = match ctx.session.temp_image(id) {
            Some(slot) => slot,
            None => {
                let resolver = Resolver::new(ctx.layout, &ctx.banks, ctx.config);
                resolver
                    .temp_slot(&mut *ctx.peripherals.flash, id, 0)
                    .map_err(TransferError::from)?
            }
        };
        verify_at(ctx, id, slot, None)?;
    }

    if last {
        commit_remaining(ctx)
    } else {
        Ok(None)
    }
}

/// Handle `ACTIVE_IMAGE_RESET`: activate what is pending and drop the link.
///
/// The reset itself happens once the disconnect is confirmed.
fn handle_active_image_reset<F: NorFlash>(
    ctx: &mut UpdateContext<'_, F>,
    state: SessionState,
    enter_dfu_mode: bool,
) -> SessionState {
    const OPCODE: Opcode = Opcode::ActiveImageReset;
    if let Err(state) = check_open(ctx, state, OPCODE) {
        return state;
    }

    let next = match commit_remaining(ctx) {
        Ok(next) => next.unwrap_or(state),
        Err(cause) => return fail(ctx, state, OPCODE, cause),
    };
    if !ctx.update.active_reset_pending {
        warn!("ACTIVE_IMAGE_RESET: no verified image");
        return fail(ctx, state, OPCODE, CommitError::Incomplete.into());
    }

    ctx.update.reset_to_ota_mode |= enter_dfu_mode;
    info!("ACTIVE_IMAGE_RESET: disconnecting");
    ctx.peripherals.transport.disconnect();
    next
}

/// Handle `SYSTEM_RESET`: end the session without activating anything.
fn handle_system_reset(state: SessionState) -> SessionState {
    info!("SYSTEM_RESET in {:?}", state);
    SessionState::Aborted(AbortCause::ResetCommand)
}

fn recorded_header<F: ReadNorFlash>(
    flash: &mut F,
    base: u32,
    addr: u32,
    id: ImageId,
) -> Option<bee_dfu_common::ImageHeader> {
    flash::read_header(flash, base, addr)
        .ok()
        .filter(|header| header.ctrl.image_id == id.raw())
}

/// Handle `REPORT_TARGET_INFO`: active version and resume point of an image.
fn handle_report_target_info<F: NorFlash>(
    ctx: &mut UpdateContext<'_, F>,
    state: SessionState,
    image_id: u16,
) -> SessionState {
    let Some(id) = ImageId::from_raw(image_id) else {
        return reject_with(ctx, Opcode::ReportTargetInfo, DfuStatus::InvalidParameter, state);
    };

    let base = ctx.layout.flash_base;
    let resolver = Resolver::new(ctx.layout, &ctx.banks, ctx.config);
    let flash = &mut *ctx.peripherals.flash;
    let version = resolver
        .image_header_addr(flash, id)
        .ok()
        .and_then(|addr| recorded_header(flash, base, addr, id))
        .map_or(0, |header| header.git_ver.version.bits());

    let (cur_offset, buffered) = if ctx.session.image_id == Some(id) {
        let buffered = if ctx.session.buffer_check_en {
            u16::try_from(ctx.session.buffered()).unwrap_or(u16::MAX)
        } else {
            0
        };
        (ctx.session.cur_offset, buffered)
    } else {
        (0, 0)
    };
    notify(
        ctx,
        Notification::TargetInfo {
            status: DfuStatus::Success,
            version,
            cur_offset,
            buffered,
        },
    );
    state
}

/// Handle `CONN_PARA_UPDATE_REQ`. The outcome is reported when the stack answers.
fn handle_conn_para_update<F>(ctx: &mut UpdateContext<'_, F>, state: SessionState, params: ConnParams) -> SessionState {
    match ctx.peripherals.transport.request_conn_params(params) {
        Ok(()) => {
            debug!(
                "CONN_PARA_UPDATE_REQ: interval {}..{} requested",
                params.interval_min,
                params.interval_max
            );
            state
        }
        Err(e) => {
            warn!("CONN_PARA_UPDATE_REQ: {:?}", e);
            reject_with(ctx, Opcode::ConnParaUpdateReq, DfuStatus::FailOperation, state)
        }
    }
}

/// Report the stack's answer to a connection parameter request.
pub fn report_conn_params<F>(ctx: &mut UpdateContext<'_, F>, accepted: bool) {
    let status = if accepted {
        DfuStatus::Success
    } else {
        DfuStatus::FailOperation
    };
    send_status(ctx, Opcode::ConnParaUpdateReq, status);
}

/// Handle `BUFFER_CHECK_EN`: switch per-buffer CRC flow control.
fn handle_buffer_check_en<F>(ctx: &mut UpdateContext<'_, F>, state: SessionState, enable: bool) -> SessionState {
    const OPCODE: Opcode = Opcode::BufferCheckEn;
    if !ctx.config.supports(DeviceFeatures::SUPPORT_BUFFER_CHECK) {
        return reject_with(ctx, OPCODE, DfuStatus::FailOperation, state);
    }
    if let Err(state) = check_open(ctx, state, OPCODE) {
        return state;
    }

    let max_buffer_size = ctx.session.buffer_size.min(MAX_BUFFER_SIZE);
    ctx.session.buffer_size = max_buffer_size;
    ctx.session.buffer_check_en = enable;
    let mtu = ctx.session.mtu_size;
    notify(
        ctx,
        Notification::BufferCheckEn {
            status: DfuStatus::Success,
            max_buffer_size,
            mtu,
        },
    );
    state
}

/// Handle `COPY_IMG`: reuse sub-images that did not change.
fn handle_copy_img<F: NorFlash>(ctx: &mut UpdateContext<'_, F>, state: SessionState) -> SessionState {
    const OPCODE: Opcode = Opcode::CopyImg;
    if let Err(state) = check_open(ctx, state, OPCODE) {
        return state;
    }

    match copy_unchanged_images(ctx) {
        Ok(next) => {
            send_status(ctx, OPCODE, DfuStatus::Success);
            match next {
                SessionState::Started => state,
                next => next,
            }
        }
        Err(cause) => fail(ctx, state, OPCODE, cause),
    }
}

/// Copy into the temp container every sub-image it lists with the same size
/// as the active container, when no new copy was received.
fn copy_unchanged_images<F: NorFlash>(ctx: &mut UpdateContext<'_, F>) -> Result<SessionState, AbortCause> {
    if !ctx.layout.bank_switch {
        return Err(TransferError::BadState.into());
    }

    let base = ctx.layout.flash_base;
    let resolver = Resolver::new(ctx.layout, &ctx.banks, ctx.config);
    let flash = &mut *ctx.peripherals.flash;
    let active = resolver.active_bank(BankFamily::Ota).map_err(TransferError::from)?;
    let temp = resolver.temp_bank(BankFamily::Ota).map_err(TransferError::from)?;
    let active_header = resolver.container_header(flash, &active).map_err(TransferError::from)?;
    let temp_header = resolver.container_header(flash, &temp).map_err(TransferError::from)?;

    let mut copies: Vec<(ImageId, u32, TempSlot), BANK_IMAGE_COUNT> = Vec::new();
    for id in ImageId::BANK_IMAGES {
        let size = temp_header.sub_image_size(id);
        if size == 0 || ctx.update.is_valid(id) || active_header.sub_image_size(id) != size {
            continue;
        }
        let from = sub_image_slot(&active_header, &active, id).map_err(TransferError::from)?;
        let to = sub_image_slot(&temp_header, &temp, id).map_err(TransferError::from)?;
        let _ = copies.push((id, from.addr, to));
    }

    for (id, from, to) in copies {
        storage::copy_image(&mut *ctx.peripherals.flash, base, from, to.addr, to.size)?;
        verify_at(ctx, id, to, None)?;
        info!("COPY_IMG: 0x{:04x} from 0x{:08x}", id.raw(), from);
    }
    auto_commit(ctx, ImageId::Ota)
}

/// Handle `GET_IMAGE_VER`: versions of every image in the requested bank.
fn handle_get_image_ver<F: NorFlash>(ctx: &mut UpdateContext<'_, F>, state: SessionState, bank: BankQuery) -> SessionState {
    let images = image_versions(ctx, bank);
    let active = ctx.banks.bank_number(ctx.layout, BankFamily::Ota);
    let bank_num = match (bank, active) {
        (BankQuery::Active, n) => n,
        (BankQuery::Inactive, BANK_0) => BANK_1,
        (BankQuery::Inactive, BANK_1) => BANK_0,
        (BankQuery::Inactive, _) => BANK_NOT_SWITCHABLE,
    };
    notify(
        ctx,
        Notification::ImageVersions {
            status: DfuStatus::Success,
            bank_num,
            images: &images,
        },
    );
    state
}

fn image_versions<F: NorFlash>(ctx: &mut UpdateContext<'_, F>, bank: BankQuery) -> ImageList {
    let base = ctx.layout.flash_base;
    let resolver = Resolver::new(ctx.layout, &ctx.banks, ctx.config);
    let flash = &mut *ctx.peripherals.flash;
    let mut images = ImageList::new();

    for family in BankFamily::ALL {
        let record = match bank {
            BankQuery::Active => resolver.active_bank(family),
            BankQuery::Inactive => resolver.temp_bank(family),
        };
        let Ok(record) = record else {
            continue;
        };
        let check = ctx.config.header_check(record.size);
        let Some(header) = recorded_header(flash, base, record.base, family.header_id())
            .filter(|header| header.validate_staged(family.header_id(), &check).is_ok())
        else {
            continue;
        };
        let _ = images.push((header.ctrl.image_id, header.git_ver.version.bits()));

        if family != BankFamily::Ota {
            continue;
        }
        for id in ImageId::BANK_IMAGES {
            let size = header.sub_image_size(id);
            if size == 0 {
                continue;
            }
            let Ok(slot) = sub_image_slot(&header, &record, id) else {
                continue;
            };
            let addr = slot.addr;
            let check = ctx.config.header_check(size);
            if let Some(sub) = recorded_header(flash, base, addr, id).filter(|sub| sub.validate_staged(id, &check).is_ok()) {
                let _ = images.push((sub.ctrl.image_id, sub.git_ver.version.bits()));
            }
        }
    }
    images
}

/// Handle `GET_SECTION_SIZE`: room available to each transferable image.
fn handle_get_section_size<F: NorFlash>(ctx: &mut UpdateContext<'_, F>, state: SessionState) -> SessionState {
    let resolver = Resolver::new(ctx.layout, &ctx.banks, ctx.config);
    let flash = &mut *ctx.peripherals.flash;
    let mut images = ImageList::new();
    for id in ImageId::TRANSFERABLE {
        if let Ok(slot) = resolver.temp_slot(flash, id, ctx.session.next_subimage_offset) {
            if slot.size > 0 {
                let _ = images.push((id.raw(), slot.size));
            }
        }
    }
    notify(
        ctx,
        Notification::SectionSizes {
            status: DfuStatus::Success,
            images: &images,
        },
    );
    state
}

/// Handle `CHECK_SHA256`: compare digests with the recorded ones of both copies.
fn handle_check_sha256<F: NorFlash>(
    ctx: &mut UpdateContext<'_, F>,
    state: SessionState,
    entries: Sha256Entries<'_>,
) -> SessionState {
    let base = ctx.layout.flash_base;
    let resolver = Resolver::new(ctx.layout, &ctx.banks, ctx.config);
    let flash = &mut *ctx.peripherals.flash;
    let mut results: Vec<(u16, Sha256Match), MAX_SHA256_CHECKS> = Vec::new();

    for (raw_id, digest) in entries.iter().take(MAX_SHA256_CHECKS) {
        let outcome = match ImageId::from_raw(raw_id) {
            Some(id) => {
                let active = resolver.image_header_addr(flash, id).ok();
                let inactive = resolver.temp_bank_addr(flash, id).ok();
                let mut matches = |addr: Option<u32>| {
                    addr.and_then(|addr| recorded_header(flash, base, addr, id))
                        .is_some_and(|header| header.image_hash == digest)
                };
                Sha256Match::from_matches(matches(inactive), matches(active))
            }
            None => Sha256Match::Neither,
        };
        let _ = results.push((raw_id, outcome));
    }

    notify(
        ctx,
        Notification::Sha256Results {
            status: DfuStatus::Success,
            results: &results,
        },
    );
    state
}
