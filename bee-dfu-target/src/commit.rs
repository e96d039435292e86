// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Activation of verified images.
//!
//! Activation only ever clears bits of the control flag word, with a write of
//! that word alone. New copies are made ready first, previous copies are
//! marked obsolete afterwards, so at every point at least one copy of each
//! family stays current.

use crate::bank::{self, BankFamily, BankState};
use crate::error::CommitError;
use crate::flash;
use crate::partition::Resolver;
use bee_dfu_common::header::{CtrlFlags, CTRL_FLAG_OFFSET, NOT_OBSOLETE_BIT, NOT_READY_BIT};
use bee_dfu_common::image_id::ImageFamily;
use bee_dfu_common::{DfuConfig, ImageId};
use embedded_storage::nor_flash::NorFlash;

/// Set the flag word at `header_addr` to the requested state.
///
/// `ready` clears `not_ready`, `obsolete` clears `not_obsolete`. A request
/// that would need a bit to go from 0 back to 1 fails without writing.
pub fn encode_flags<F: NorFlash>(
    flash: &mut F,
    base: u32,
    header_addr: u32,
    ready: bool,
    obsolete: bool,
) -> Result<(), CommitError> {
    let current = flash::read_flag_word(flash, base, header_addr)?;
    let mut wanted = current & !(NOT_READY_BIT | NOT_OBSOLETE_BIT);
    if !ready {
        wanted |= NOT_READY_BIT;
    }
    if !obsolete {
        wanted |= NOT_OBSOLETE_BIT;
    }

    if wanted & !current != 0 {
        return Err(CommitError::FlagNotProgrammable { addr: header_addr });
    }
    if wanted == current {
        return Ok(());
    }

    flash::program(flash, base, header_addr + CTRL_FLAG_OFFSET as u32, &wanted.to_le_bytes())?;
    trace!("Commit: flags at 0x{:08x}: 0x{:04x} -> 0x{:04x}", header_addr, current, wanted);
    Ok(())
}

/// Make the copy at `header_addr` ready, keeping it not obsolete.
pub fn activate<F: NorFlash>(flash: &mut F, base: u32, header_addr: u32) -> Result<(), CommitError> {
    encode_flags(flash, base, header_addr, true, false)
}

/// Mark the copy at `header_addr` obsolete, leaving its readiness alone.
pub fn retire<F: NorFlash>(flash: &mut F, base: u32, header_addr: u32) -> Result<(), CommitError> {
    let flags = CtrlFlags::from_bits(flash::read_flag_word(flash, base, header_addr)?);
    encode_flags(flash, base, header_addr, !flags.not_ready, true)
}

/// The copy an activated image replaces, if there is one to retire.
fn previous_copy<F: NorFlash>(
    flash: &mut F,
    resolver: &Resolver,
    id: ImageId,
    new_addr: u32,
) -> Option<u32> {
    let layout = resolver.layout();
    match id.family() {
        ImageFamily::UserData | ImageFamily::Fixed => None,
        ImageFamily::OtaHeader | ImageFamily::OtaSubImage if !layout.bank_switch => None,
        _ => {
            let old = resolver.image_header_addr(flash, id).ok()?;
            if old == new_addr {
                return None;
            }
            let header = flash::read_header(flash, layout.flash_base, old).ok()?;
            (header.ctrl.image_id == id.raw() && header.ctrl.flags.not_obsolete).then_some(old)
        }
    }
}

/// Families touched by a commit, checked once it is done.
fn touched(staged: &[(ImageId, u32)]) -> impl Iterator<Item = BankFamily> + '_ {
    BankFamily::ALL
        .into_iter()
        .filter(move |family| staged.iter().any(|(id, _)| BankFamily::of(*id) == Some(*family)))
}

/// Activate every staged image, then retire what they replace.
///
/// `staged` lists verified images with the address of their new header.
/// The OTA container header is activated after its sub-images.
pub fn commit<F: NorFlash>(
    flash: &mut F,
    resolver: &Resolver,
    config: &DfuConfig,
    staged: &[(ImageId, u32)],
) -> Result<(), CommitError> {
    let layout = resolver.layout();
    let base = layout.flash_base;
    let with_header = |id: &ImageId| !id.is_user_data();

    // Resolve what gets retired before any flag changes the active picture.
    let mut retire_list: heapless::Vec<u32, { bee_dfu_common::image_id::MAX_IMAGE_NUM }> =
        heapless::Vec::new();
    for (id, addr) in staged.iter().filter(|(id, _)| with_header(id)) {
        if let Some(old) = previous_copy(flash, resolver, *id, *addr) {
            let _ = retire_list.push(old);
        }
    }

    let ordered = staged
        .iter()
        .filter(|(id, _)| with_header(id) && *id != ImageId::Ota)
        .chain(staged.iter().filter(|(id, _)| *id == ImageId::Ota));
    for (id, addr) in ordered {
        activate(flash, base, *addr)?;
        info!("Commit: 0x{:04x} ready at 0x{:08x}", id.raw(), *addr);
    }

    for old in &retire_list {
        retire(flash, base, *old)?;
        info!("Commit: retired copy at 0x{:08x}", *old);
    }

    for family in touched(staged) {
        check_single_current(flash, resolver, config, family)?;
    }
    Ok(())
}

/// At most one bank of `family` may be not obsolete.
pub fn check_single_current<F: NorFlash>(
    flash: &mut F,
    resolver: &Resolver,
    config: &DfuConfig,
    family: BankFamily,
) -> Result<(), CommitError> {
    let layout = resolver.layout();
    let mut live = family.records(layout).into_iter().filter(|record| {
        matches!(
            bank::bank_state(flash, layout, config, family, record),
            BankState::Staged | BankState::Current(_)
        )
    });
    let first = live.next();
    match (first, live.next()) {
        (Some(_), Some(second)) => {
            error!("Commit: two live banks in {:?}", family);
            Err(CommitError::BothBanksCurrent(second.name))
        }
        _ => Ok(()),
    }
}
