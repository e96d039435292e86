// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Image files: header, payload and the SHA-256 digest over both.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};

use bee_dfu_common::header::{
    normalize_flag_bytes, ImageVersion, HASH_START, IMAGE_HASH_OFFSET, SHA256_SIZE,
};
use bee_dfu_common::image_id::ImageFamily;
use bee_dfu_common::{DfuConfig, ImageHeader, ImageId};
use bee_dfu_target::flash::MemFlash;
use bee_dfu_target::partition::container_offset;
use bee_dfu_target::platform::NoCrypto;
use bee_dfu_target::verify::{image_digests, verify_sha256};

/// Header fields chosen on the command line.
#[derive(Debug, Clone, Copy)]
pub struct PackOptions {
    pub image_id: ImageId,
    pub version: ImageVersion,
    pub secure_version: u8,
}

fn base_header(config: &DfuConfig, options: &PackOptions) -> ImageHeader {
    let mut header = ImageHeader::new(options.image_id, config.ic_type);
    header.ctrl.secure_version = options.secure_version;
    header.uuid = config.rom_uuid;
    header.git_ver.version = options.version;
    header
}

/// Fill in `image_hash` over the header tail and payload.
///
/// The activation flags are hashed in their shipped state, the same way the
/// device does it.
pub fn seal(image: &mut [u8]) {
    let mut hashed = image[HASH_START..].to_vec();
    normalize_flag_bytes(&mut hashed, HASH_START as u32);
    let digest = Sha256::digest(&hashed);
    image[IMAGE_HASH_OFFSET..IMAGE_HASH_OFFSET + SHA256_SIZE].copy_from_slice(&digest);
}

/// Put a header in front of `payload`.
pub fn pack(config: &DfuConfig, options: &PackOptions, payload: &[u8]) -> Result<Vec<u8>> {
    match options.image_id.family() {
        ImageFamily::UserData => bail!("user data is sent raw, it has no header"),
        ImageFamily::OtaHeader => bail!("an OTA container is built from its sub-images"),
        ImageFamily::Fixed => bail!("{:?} cannot be updated", options.image_id),
        _ => {}
    }

    let mut header = base_header(config, options);
    header.ctrl.payload_len = u32::try_from(payload.len()).context("payload too large")?;

    let mut image = header.encode().to_vec();
    image.extend_from_slice(payload);
    seal(&mut image);
    Ok(image)
}

/// Build an OTA container header listing packed `subs`.
pub fn pack_container(config: &DfuConfig, options: &PackOptions, subs: &[Vec<u8>]) -> Result<Vec<u8>> {
    if subs.is_empty() {
        bail!("an OTA container needs at least one sub-image");
    }

    let options = PackOptions {
        image_id: ImageId::Ota,
        ..*options
    };
    let mut header = base_header(config, &options);
    let mut listed = Vec::new();
    for (index, sub) in subs.iter().enumerate() {
        let sub_header = ImageHeader::parse(sub).with_context(|| format!("sub-image {} has no header", index))?;
        let id = sub_header
            .image_id()
            .filter(|id| id.is_bank_image())
            .with_context(|| format!("sub-image {}: 0x{:04x} is not an OTA bank image", index, sub_header.ctrl.image_id))?;
        if listed.contains(&id) {
            bail!("{:?} listed twice", id);
        }
        listed.push(id);
        let size = sub_header
            .total_len()
            .with_context(|| format!("sub-image {} length", index))?;
        header.set_sub_image(id, 0, size);
    }

    // Offsets depend on every size, so they go in last.
    for id in &listed {
        let size = header.sub_image_size(*id);
        let offset = container_offset(&header, *id).with_context(|| format!("{:?} does not fit an OTA bank", id))?;
        header.set_sub_image(*id, offset, size);
    }

    let mut image = header.encode().to_vec();
    seal(&mut image);
    Ok(image)
}

/// Result of checking an image file's digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestStatus {
    Valid,
    Mismatch,
    /// The payload is encrypted with a device key.
    Encrypted,
    Truncated { expected: u32, actual: usize },
}

/// Decoded header plus digest check.
#[derive(Debug, Clone)]
pub struct ImageReport {
    pub header: ImageHeader,
    pub digest: DigestStatus,
}

/// Decode the header of `bytes` and recompute its digest.
pub fn inspect(bytes: &[u8]) -> Result<ImageReport> {
    let header = ImageHeader::parse(bytes).context("not an image file")?;
    let total = header.total_len().context("payload length out of range")?;
    let digest = if bytes.len() < total as usize {
        DigestStatus::Truncated {
            expected: total,
            actual: bytes.len(),
        }
    } else if header.ctrl.flags.enc {
        DigestStatus::Encrypted
    } else {
        // Same code path as the device, run against the file in RAM.
        let mut mem = bytes[..total as usize].to_vec();
        let mut flash = MemFlash::new(&mut mem);
        let digests = image_digests(&mut flash, 0, 0, &header, &NoCrypto, false)?;
        match verify_sha256(&header, &digests) {
            Ok(()) => DigestStatus::Valid,
            Err(_) => DigestStatus::Mismatch,
        }
    };
    Ok(ImageReport { header, digest })
}

/// Parse `MAJOR.MINOR.REVISION`; missing trailing parts are zero.
pub fn parse_version(s: &str) -> Result<ImageVersion> {
    let mut parts = s.split('.');
    let mut next = |name: &str, max: u16| -> Result<u16> {
        let value = match parts.next() {
            Some(p) => p.parse::<u16>().with_context(|| format!("invalid {} in {:?}", name, s))?,
            None => 0,
        };
        if value > max {
            bail!("{} {} out of range (max {})", name, value, max);
        }
        Ok(value)
    };
    let major = next("major", 0xF)?;
    let minor = next("minor", 0xFF)?;
    let revision = next("revision", 0x7FFF)?;
    if parts.next().is_some() {
        bail!("too many components in {:?}", s);
    }
    Ok(ImageVersion::new(major as u8, minor as u8, revision))
}

pub fn format_version(version: &ImageVersion) -> String {
    format!("{}.{}.{}", version.major, version.minor, version.revision)
}
