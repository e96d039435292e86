// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Common types and codecs for the bee-dfu firmware update engine.
//!
//! This crate supports both `no_std` (device) and `std` (host) environments:
//! - Default: `no_std` mode for the update engine
//! - `std` feature: Enables `std` support for host tools
//! - `defmt` feature: Derives `defmt::Format` on the shared types

#![cfg_attr(not(feature = "std"), no_std)]

pub mod checksum;
pub mod config;
pub mod header;
pub mod image_id;
pub mod layout;
pub mod protocol;

// Re-export commonly used types
pub use config::{DeviceFeatures, DfuConfig, SignatureScheme};
pub use header::{CtrlFlags, CtrlHeader, EncKeySelect, HeaderCheck, HeaderError, ImageHeader};
pub use image_id::ImageId;
pub use layout::{FlashLayout, PartitionName, PartitionRecord, FLASH_SECTOR_SIZE};
pub use protocol::{ControlPoint, DeviceInfo, DfuStatus, Notification, Opcode, ParseError};
