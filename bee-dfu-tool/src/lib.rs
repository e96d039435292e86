// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Host side of bee-dfu: image packing, inspection and an offline run of the
//! update engine against RAM flash.
//!
//! Set `RUST_LOG=info` (or `debug`) to see the engine's own log output.

pub mod cli;
pub mod commands;
pub mod config;
pub mod image;
pub mod sim;
