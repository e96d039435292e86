// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command implementations.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use bee_dfu_common::checksum::crc16;
use bee_dfu_common::header::HeaderError;
use bee_dfu_common::protocol::MAX_BUFFER_SIZE;
use bee_dfu_common::{ImageHeader, ImageId};
use bee_dfu_target::BankFamily;

use crate::cli::Transfer;
use crate::config::ToolConfig;
use crate::image::{self, DigestStatus, PackOptions};
use crate::sim::{self, SimImage, SimOptions};

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Decode and display an image header.
pub fn info(config: &ToolConfig, file: &Path) -> Result<()> {
    let bytes = read_file(file)?;
    let report = image::inspect(&bytes).with_context(|| format!("{} (user data files carry no header)", file.display()))?;
    let header = &report.header;
    let ctrl = &header.ctrl;

    let id = match header.image_id() {
        Some(id) => format!("{:?}", id),
        None => "unknown".to_string(),
    };
    println!("Image: {} ({} bytes)", file.display(), bytes.len());
    println!("  Id:          {} (0x{:04x})", id, ctrl.image_id);
    println!("  IC type:     0x{:02x}", ctrl.ic_type);
    println!(
        "  Version:     {} (secure {})",
        image::format_version(&header.git_ver.version),
        ctrl.secure_version
    );
    println!(
        "  Flags:       0x{:04x} (not_ready={}, not_obsolete={}, enc={})",
        ctrl.flags.bits(),
        ctrl.flags.not_ready as u8,
        ctrl.flags.not_obsolete as u8,
        ctrl.flags.enc as u8
    );
    println!("  Payload:     {} bytes (total {})", ctrl.payload_len, header.total_len()?);
    println!("  ROM UUID:    {}", hex(&header.uuid));
    println!("  Image hash:  {}", hex(&header.image_hash));

    match report.digest {
        DigestStatus::Valid => println!("  Digest:      OK"),
        DigestStatus::Mismatch => println!("  Digest:      MISMATCH"),
        DigestStatus::Encrypted => println!("  Digest:      not checked (encrypted payload)"),
        DigestStatus::Truncated { expected, actual } => {
            println!("  Digest:      not checked (file has {} of {} bytes)", actual, expected)
        }
    }

    // Checked the way the device checks a freshly received copy.
    let verdict = match header.image_id() {
        Some(id) => header
            .validate_staged(id, &config.dfu.header_check(u32::MAX))
            .map_or_else(|e| e.to_string(), |()| "accepted".to_string()),
        None => HeaderError::UnknownId.to_string(),
    };
    println!("  Device:      {}", verdict);

    if header.image_id() == Some(ImageId::Ota) {
        print_container(header);
    }
    Ok(())
}

fn print_container(header: &ImageHeader) {
    println!("  Sub-images:");
    for id in ImageId::BANK_IMAGES {
        let size = header.sub_image_size(id);
        if size != 0 {
            println!(
                "    {:<14} {:>8} bytes at +0x{:06x}",
                format!("{:?}", id),
                size,
                header.sub_image_addr(id)
            );
        }
    }
}

/// Build an image file.
pub fn pack(
    config: &ToolConfig,
    options: &PackOptions,
    payload: Option<&Path>,
    subs: &[PathBuf],
    output: &Path,
) -> Result<()> {
    let image = match payload {
        Some(path) => image::pack(&config.dfu, options, &read_file(path)?)?,
        None => {
            if options.image_id != ImageId::Ota {
                bail!("--sub is only valid with --id ota");
            }
            let subs = subs.iter().map(|path| read_file(path)).collect::<Result<Vec<_>>>()?;
            image::pack_container(&config.dfu, options, &subs)?
        }
    };

    fs::write(output, &image).with_context(|| format!("Failed to write {}", output.display()))?;
    println!(
        "Packed {:?} v{} -> {} ({} bytes)",
        options.image_id,
        image::format_version(&options.version),
        output.display(),
        image.len()
    );
    Ok(())
}

/// Print the CRC16 of each buffer.
pub fn checksums(file: &Path, buffer_size: u16) -> Result<()> {
    if buffer_size == 0 || buffer_size > MAX_BUFFER_SIZE {
        bail!("buffer size must be 1..={}", MAX_BUFFER_SIZE);
    }
    let data = read_file(file)?;
    let size = usize::from(buffer_size);

    println!("{}: {} bytes, {} byte buffers", file.display(), data.len(), size);
    println!("  #     offset  length  crc16");
    for (i, block) in data.chunks(size).enumerate() {
        println!(
            "{:>3}  0x{:06x}  {:>6}  0x{:04x}",
            i,
            i * size,
            block.len(),
            crc16(block)
        );
    }
    Ok(())
}

fn load_transfer(transfer: &Transfer) -> Result<SimImage> {
    let bytes = read_file(&transfer.path)?;
    let id = match transfer.id {
        Some(id) => id,
        None => {
            let header = ImageHeader::parse(&bytes)
                .with_context(|| format!("{}: not a packed image, use ID=FILE for raw data", transfer.path.display()))?;
            header
                .image_id()
                .with_context(|| format!("{}: unknown image id 0x{:04x}", transfer.path.display(), header.ctrl.image_id))?
        }
    };
    Ok(SimImage { id, bytes })
}

/// Run an update against RAM flash.
pub fn simulate(config: &ToolConfig, transfers: &[Transfer], options: &SimOptions) -> Result<()> {
    let images = transfers.iter().map(load_transfer).collect::<Result<Vec<_>>>()?;
    let total: u64 = images.iter().map(|i| i.bytes.len() as u64).sum();

    for image in &images {
        println!("{:<14} {:>8} bytes", format!("{:?}", image.id), image.bytes.len());
    }
    println!();

    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes}")?
            .progress_chars("#>-"),
    );

    let report = match sim::simulate(&config.dfu, &config.layout, &images, options, &pb) {
        Ok(report) => report,
        Err(e) => {
            pb.abandon();
            return Err(e);
        }
    };
    pb.finish_with_message("Transfer complete");
    println!();

    let (reason, target) = report.reset;
    println!("Reset:         {:?} -> {:?}", reason, target);
    println!("Notifications: {}", report.notifications);
    println!("Active banks:");
    for family in BankFamily::ALL {
        match report.banks.get(family) {
            Some(addr) => println!(
                "  {:<16} 0x{:08x} (bank {})",
                format!("{:?}", family),
                addr,
                report.banks.bank_number(&config.layout, family)
            ),
            None => println!("  {:<16} -", format!("{:?}", family)),
        }
    }

    let info = report.device_info;
    println!("Device info:");
    println!("  ota_temp_size:   {} x 4 KiB", info.ota_temp_size);
    println!("  active_banknum:  {}", info.active_banknum);
    Ok(())
}

/// Show the configuration every other command runs with.
pub fn print_config(config: &ToolConfig) -> Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}
