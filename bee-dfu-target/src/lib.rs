// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Device side of the bee-dfu firmware update protocol.
//!
//! The engine runs in a DFU-mode image on the target. A peer writes control
//! point commands and packet data over the link; the engine stages the
//! received images in the inactive bank, checks them and then flips the
//! header flags that make the bootloader pick them up.
//!
//! Hardware stays behind the traits in [`platform`]: flash is any
//! `embedded-storage` [`NorFlash`](embedded_storage::nor_flash::NorFlash),
//! and the transport, reset, clock and crypto primitives are supplied by the
//! integration.
//!
//! ```text
//! transport callbacks ──► MessageQueue ──► DfuService ──► update::dispatch_*
//!                                              │                 │
//!                                              ▼                 ▼
//!                                          Supervisor     flash / verify / commit
//! ```

#![no_std]

mod fmt;

pub mod bank;
pub mod commit;
pub mod error;
pub mod flash;
pub mod partition;
pub mod platform;
pub mod queue;
pub mod service;
pub mod supervisor;
pub mod update;
pub mod verify;

pub use bank::{ActiveBanks, BankFamily, BankState};
pub use error::{AbortCause, CommitError, IntegrityError, LayoutError, TransferError};
pub use flash::MemFlash;
pub use partition::Resolver;
pub use platform::{BootTarget, Peripherals, ResetReason};
pub use queue::{DfuMessage, MessageQueue};
pub use service::{DfuService, Service, ServiceContext, ServiceState};
pub use supervisor::{Supervisor, TimerId};
pub use update::{SessionState, UpdateContext};
