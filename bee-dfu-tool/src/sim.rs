// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Offline update: the engine runs against RAM flash while this module plays
//! the peer.
//!
//! The peer follows the usual sequence: `START_DFU` with the control header of
//! the first image, optionally `BUFFER_CHECK_EN`, then for every image
//! `RECEIVE_FW_IMAGE_INFO`, the packets and `VALID_FW`, and finally
//! `ACTIVE_IMAGE_RESET`. Every notification must report success.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use anyhow::{anyhow, bail, Context, Result};
use indicatif::ProgressBar;

use bee_dfu_common::checksum::crc16;
use bee_dfu_common::header::{CTRL_HEADER_OFFSET, CTRL_HEADER_SIZE};
use bee_dfu_common::protocol::{ConnParams, NotificationFrame, MAX_PACKET_LEN};
use bee_dfu_common::{
    ControlPoint, CtrlFlags, CtrlHeader, DeviceInfo, DfuConfig, DfuStatus, FlashLayout, ImageId,
};
use bee_dfu_target::flash::MemFlash;
use bee_dfu_target::platform::{
    BootTarget, Clock, NoCrypto, Peripherals, ResetReason, System, Transport, TransportError,
};
use bee_dfu_target::{
    ActiveBanks, DfuMessage, DfuService, MessageQueue, ServiceContext, ServiceState, SessionState,
    UpdateContext,
};

/// ATT header bytes taken from every write.
const ATT_OVERHEAD: u16 = 3;

/// One image as sent over the link.
#[derive(Debug, Clone)]
pub struct SimImage {
    pub id: ImageId,
    pub bytes: Vec<u8>,
}

/// How the simulated peer drives the transfer.
#[derive(Debug, Clone, Copy)]
pub struct SimOptions {
    pub buffer_check: bool,
    pub mtu: u16,
    pub ota_mode: bool,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            buffer_check: false,
            mtu: 247,
            ota_mode: false,
        }
    }
}

/// State of the device once it asked for a reset.
#[derive(Debug, Clone)]
pub struct SimReport {
    pub reset: (ResetReason, BootTarget),
    pub banks: ActiveBanks,
    pub device_info: DeviceInfo,
    pub notifications: usize,
    /// Flash contents after the update.
    pub flash: Vec<u8>,
}

#[derive(Default)]
struct Link {
    frames: Vec<Vec<u8>>,
    dropped: bool,
}

struct PeerLink(Rc<RefCell<Link>>);

impl Transport for PeerLink {
    fn notify(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let mut link = self.0.borrow_mut();
        if link.dropped {
            return Err(TransportError::NotConnected);
        }
        link.frames.push(frame.to_vec());
        Ok(())
    }

    fn disconnect(&mut self) {
        self.0.borrow_mut().dropped = true;
    }

    fn request_conn_params(&mut self, _params: ConnParams) -> Result<(), TransportError> {
        // The simulated link keeps its parameters.
        Err(TransportError::Rejected)
    }
}

struct ResetLatch(Rc<Cell<Option<(ResetReason, BootTarget)>>>);

impl System for ResetLatch {
    fn reboot(&mut self, reason: ResetReason, target: BootTarget) {
        self.0.set(Some((reason, target)));
    }
}

/// Advanced by one millisecond per delivered message.
struct SimClock(Cell<u64>);

impl Clock for SimClock {
    fn now_ms(&self) -> u64 {
        self.0.get()
    }
}

struct Peer<'a, 'p, 'f> {
    service: DfuService,
    ctx: ServiceContext<'a, UpdateContext<'p, MemFlash<'f>>>,
    link: Rc<RefCell<Link>>,
    clock: &'a SimClock,
    seen: usize,
}

impl Peer<'_, '_, '_> {
    fn dropped(&self) -> bool {
        self.link.borrow().dropped
    }

    fn rebooted(&self) -> bool {
        self.service.state() == ServiceState::Rebooted
    }

    /// Run the service over a message that was just queued.
    fn pump(&mut self, posted: bool) -> Result<()> {
        if !posted {
            bail!("device queue overflow");
        }
        self.clock.0.set(self.clock.0.get() + 1);
        self.service.drain(&mut self.ctx);

        if let SessionState::Aborted(cause) = self.service.session_state() {
            bail!("device aborted the session: {:?}", cause);
        }
        let link = self.link.borrow();
        for frame in &link.frames[self.seen..] {
            let frame = NotificationFrame::parse(frame).context("malformed notification")?;
            if frame.status != DfuStatus::Success {
                bail!("{:?} answered {:?}", frame.opcode, frame.status);
            }
        }
        self.seen = link.frames.len();
        Ok(())
    }

    fn deliver(&mut self, message: DfuMessage) -> Result<()> {
        let posted = self.ctx.messages.post(message);
        self.pump(posted)
    }

    fn control(&mut self, cmd: ControlPoint<'_>) -> Result<()> {
        let bytes = cmd.encode().map_err(|e| anyhow!("cannot encode {:?}: {}", cmd.opcode(), e))?;
        self.deliver(DfuMessage::ControlPoint(bytes))
    }

    fn packet(&mut self, bytes: &[u8]) -> Result<()> {
        let posted = self.ctx.messages.post_packet(bytes);
        self.pump(posted)
    }

    fn last_frame(&self) -> Option<Vec<u8>> {
        self.link.borrow().frames.last().cloned()
    }

    /// Ask for buffer checks; returns the device's buffer size.
    fn enable_buffer_check(&mut self) -> Result<usize> {
        self.control(ControlPoint::BufferCheckEn { enable: true })?;
        let frame = self.last_frame().context("no answer to BUFFER_CHECK_EN")?;
        let frame = NotificationFrame::parse(&frame)?;
        let size = frame.u16_at(0).context("short BUFFER_CHECK_EN answer")?;
        if size == 0 {
            bail!("device reports a zero buffer size");
        }
        Ok(usize::from(size))
    }

    fn send(&mut self, image: &SimImage, chunk: usize, buffer: Option<usize>, pb: &ProgressBar) -> Result<()> {
        let length = u32::try_from(image.bytes.len()).context("image too large")?;
        self.control(ControlPoint::ReceiveFwImageInfo {
            image_id: image.id.raw(),
            length,
        })?;

        let block_size = buffer.unwrap_or(image.bytes.len().max(1));
        for block in image.bytes.chunks(block_size) {
            for packet in block.chunks(chunk) {
                self.packet(packet)?;
                pb.inc(packet.len() as u64);
            }
            if buffer.is_some() {
                self.control(ControlPoint::ReportBufferCrc {
                    crc: crc16(block),
                    offset: block.len() as u16,
                })?;
            }
        }
        Ok(())
    }
}

/// The 16-byte `START_DFU` payload announcing `image`.
fn start_payload(config: &DfuConfig, image: &SimImage) -> Result<[u8; 16]> {
    let mut payload = [0u8; 16];
    if image.id.is_user_data() {
        let ctrl = CtrlHeader {
            crc16: 0,
            ic_type: config.ic_type,
            secure_version: 0,
            flags: CtrlFlags::shipped(),
            image_id: image.id.raw(),
            payload_len: u32::try_from(image.bytes.len())?,
        };
        payload[..CTRL_HEADER_SIZE].copy_from_slice(&ctrl.encode());
    } else {
        let ctrl = image
            .bytes
            .get(CTRL_HEADER_OFFSET..CTRL_HEADER_OFFSET + CTRL_HEADER_SIZE)
            .context("image shorter than its header")?;
        payload[..CTRL_HEADER_SIZE].copy_from_slice(ctrl);
    }
    Ok(payload)
}

/// Send `images` to an engine running on erased RAM flash.
pub fn simulate(
    config: &DfuConfig,
    layout: &FlashLayout,
    images: &[SimImage],
    options: &SimOptions,
    pb: &ProgressBar,
) -> Result<SimReport> {
    let first = images.first().context("nothing to send")?;
    let mtu = options.mtu.max(ATT_OVERHEAD + 20);
    let chunk = usize::from(mtu - ATT_OVERHEAD).min(MAX_PACKET_LEN);

    let mut mem = vec![0xFF; layout.flash_size as usize];
    let mut flash = MemFlash::new(&mut mem);
    let link = Rc::new(RefCell::new(Link::default()));
    let reset = Rc::new(Cell::new(None));
    let mut transport = PeerLink(link.clone());
    let mut system = ResetLatch(reset.clone());
    let clock = SimClock(Cell::new(0));
    let crypto = NoCrypto;

    let peripherals = Peripherals {
        flash: &mut flash,
        transport: &mut transport,
        system: &mut system,
        clock: &clock,
        cipher: &crypto,
        signer: &crypto,
    };
    let mut engine = UpdateContext::new(peripherals, config, layout);
    let queue: MessageQueue = MessageQueue::new();
    let mut peer = Peer {
        service: DfuService::new(),
        ctx: ServiceContext {
            engine: &mut engine,
            messages: &queue,
        },
        link,
        clock: &clock,
        seen: 0,
    };

    peer.deliver(DfuMessage::Connected)?;
    peer.deliver(DfuMessage::MtuChanged(mtu))?;
    peer.control(ControlPoint::StartDfu {
        payload: start_payload(config, first)?,
    })?;
    let buffer = if options.buffer_check {
        Some(peer.enable_buffer_check()?)
    } else {
        None
    };

    for (index, image) in images.iter().enumerate() {
        peer.send(image, chunk, buffer, pb)?;
        if peer.dropped() {
            // Single-image parts hang up as soon as the image is active.
            break;
        }
        if !image.id.is_user_data() {
            peer.control(ControlPoint::ValidFw {
                image_id: image.id.raw(),
                last: index + 1 == images.len(),
            })?;
        }
    }

    if !peer.dropped() {
        peer.control(ControlPoint::ActiveImageReset {
            enter_dfu_mode: options.ota_mode,
        })?;
    }
    if peer.dropped() && !peer.rebooted() {
        peer.deliver(DfuMessage::Disconnected)?;
    }
    if !peer.rebooted() {
        bail!("device did not reset, session ended in {:?}", peer.service.session_state());
    }

    let banks = peer.ctx.engine.banks;
    let device_info = peer.ctx.engine.device_info();
    let notifications = peer.seen;
    drop(peer);
    drop(engine);

    let reset = reset.get().ok_or_else(|| anyhow!("reset was not requested"))?;
    Ok(SimReport {
        reset,
        banks,
        device_info,
        notifications,
        flash: mem,
    })
}
