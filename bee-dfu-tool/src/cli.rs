// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command-line interface definitions.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use bee_dfu_common::header::ImageVersion;
use bee_dfu_common::ImageId;

use crate::commands;
use crate::config::ToolConfig;
use crate::image;

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "bee-dfu")]
#[command(about = "Image packer and offline update simulator for bee-dfu")]
pub struct Cli {
    /// Engine configuration and flash layout (TOML)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Decode an image header and check its digest
    Info {
        /// Image file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Build an image from a raw payload, or an OTA container from packed sub-images
    Pack {
        /// Image id, by name (e.g. mcu_app) or in hex (e.g. 0x37A9)
        #[arg(short, long, value_parser = parse_image_id)]
        id: ImageId,

        /// Raw payload file
        #[arg(short, long, value_name = "FILE", required_unless_present = "sub", conflicts_with = "sub")]
        payload: Option<PathBuf>,

        /// Packed sub-image listed by the OTA container (repeatable)
        #[arg(short, long, value_name = "FILE")]
        sub: Vec<PathBuf>,

        /// Image version (MAJOR.MINOR.REVISION)
        #[arg(short, long, default_value = "1.0.0", value_parser = parse_version)]
        version: ImageVersion,

        /// Secure version compared against the device's minimum
        #[arg(long, default_value = "0")]
        secure_version: u8,

        /// Output file
        #[arg(short, long, value_name = "OUTPUT")]
        output: PathBuf,
    },

    /// Print the CRC16 the peer reports for each buffer of a file
    Checksums {
        /// File as sent over the link
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Buffer size in bytes (default: from the configuration)
        #[arg(short, long)]
        buffer_size: Option<u16>,
    },

    /// Run a complete update against RAM flash and print the resulting banks
    Simulate {
        /// Images in transfer order; ID=FILE sends FILE raw under ID
        #[arg(value_name = "IMAGE", required = true, value_parser = parse_transfer)]
        images: Vec<Transfer>,

        /// Report a CRC after every buffer
        #[arg(short, long)]
        buffer_check: bool,

        /// ATT MTU of the simulated link
        #[arg(short, long, default_value = "247")]
        mtu: u16,

        /// Ask the device to reboot into OTA mode
        #[arg(long)]
        ota_mode: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

/// One `simulate` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    /// Set for raw files; packed images carry their id in the header.
    pub id: Option<ImageId>,
    pub path: PathBuf,
}

/// Parse an image id given by name or as a hex number.
pub fn parse_image_id(s: &str) -> Result<ImageId, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        let raw = u16::from_str_radix(hex, 16).map_err(|e| format!("invalid hex value: {e}"))?;
        return ImageId::from_raw(raw).ok_or_else(|| format!("unknown image id 0x{raw:04x}"));
    }

    let wanted: String = s.chars().filter(|c| *c != '_' && *c != '-').collect();
    ImageId::TRANSFERABLE
        .into_iter()
        .find(|id| format!("{id:?}").eq_ignore_ascii_case(&wanted))
        .ok_or_else(|| format!("unknown image {s:?}"))
}

fn parse_version(s: &str) -> Result<ImageVersion, String> {
    image::parse_version(s).map_err(|e| e.to_string())
}

fn parse_transfer(s: &str) -> Result<Transfer, String> {
    match s.split_once('=') {
        Some((id, path)) => Ok(Transfer {
            id: Some(parse_image_id(id)?),
            path: PathBuf::from(path),
        }),
        None => Ok(Transfer {
            id: None,
            path: PathBuf::from(s),
        }),
    }
}

/// Execute the parsed CLI command.
pub fn run(cli: Cli) -> Result<()> {
    let config = ToolConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Info { file } => commands::info(&config, &file),
        Commands::Pack {
            id,
            payload,
            sub,
            version,
            secure_version,
            output,
        } => {
            let options = image::PackOptions {
                image_id: id,
                version,
                secure_version,
            };
            commands::pack(&config, &options, payload.as_deref(), &sub, &output)
        }
        Commands::Checksums { file, buffer_size } => {
            commands::checksums(&file, buffer_size.unwrap_or(config.dfu.buffer_size))
        }
        Commands::Simulate {
            images,
            buffer_check,
            mtu,
            ota_mode,
        } => {
            let options = crate::sim::SimOptions {
                buffer_check,
                mtu,
                ota_mode,
            };
            commands::simulate(&config, &images, &options)
        }
        Commands::Config => commands::print_config(&config),
    }
}
