// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Whole-image integrity checks.
//!
//! The digest covers `[header + 416, header + 1280 + payload_len)` with the
//! control flag word in its shipped state. A vendor signature covers the same
//! stream prefixed by the 32 digest bytes at offset 384. Encrypted payloads
//! are decrypted before hashing.

use crate::error::IntegrityError;
use crate::flash::{self, READ_CHUNK};
use crate::platform::{BlockCipher, CryptoError, KeySlot, SignatureVerifier};
use bee_dfu_common::header::{
    normalize_flag_bytes, CipherMode, ImageHeader, DEFAULT_HEADER_SIZE, HASH_START,
};
use bee_dfu_common::SignatureScheme;
use embedded_storage::nor_flash::ReadNorFlash;
use sha2::{Digest, Sha256};

const BLOCK: usize = 16;
const ECDSA_SIG_MAX: usize = 72;

/// Decrypt whole 16-byte blocks in place, each block on its own.
pub fn decrypt_blocks(cipher: &dyn BlockCipher, key: KeySlot, data: &mut [u8]) -> Result<(), CryptoError> {
    for chunk in data.chunks_exact_mut(BLOCK) {
        let mut block = [0u8; BLOCK];
        block.copy_from_slice(chunk);
        cipher.decrypt_block(key, &mut block)?;
        chunk.copy_from_slice(&block);
    }
    Ok(())
}

/// Chained payload decryption state.
struct PayloadCipher<'c> {
    cipher: &'c dyn BlockCipher,
    key: KeySlot,
    mode: CipherMode,
    /// Previous ciphertext block in CBC, counter block in CTR.
    chain: [u8; BLOCK],
}

impl<'c> PayloadCipher<'c> {
    /// The IV is `iv_high || iv_low` from `flash_sec_cfg`, zero extended.
    fn for_header(header: &ImageHeader, cipher: &'c dyn BlockCipher) -> Result<Option<Self>, IntegrityError> {
        let flags = header.ctrl.flags;
        if !flags.enc {
            return Ok(None);
        }
        if header.ctrl.payload_len as usize % BLOCK != 0 {
            return Err(IntegrityError::UnalignedCiphertext);
        }
        let mode = flags
            .enc_key_select
            .cipher_mode()
            .ok_or(IntegrityError::UnsupportedCipher)?;

        let mut chain = [0u8; BLOCK];
        chain[..8].copy_from_slice(&header.flash_sec_cfg[12..20]);
        Ok(Some(Self {
            cipher,
            key: KeySlot::Image(flags.enc_key_select),
            mode,
            chain,
        }))
    }

    /// `data` must be a whole number of blocks.
    fn decrypt(&mut self, data: &mut [u8]) -> Result<(), CryptoError> {
        for chunk in data.chunks_exact_mut(BLOCK) {
            let mut block = [0u8; BLOCK];
            match self.mode {
                CipherMode::Cbc => {
                    block.copy_from_slice(chunk);
                    let ciphertext = block;
                    self.cipher.decrypt_block(self.key, &mut block)?;
                    for (b, c) in block.iter_mut().zip(self.chain) {
                        *b ^= c;
                    }
                    self.chain = ciphertext;
                }
                CipherMode::Ctr => {
                    block = self.chain;
                    self.cipher.encrypt_block(self.key, &mut block)?;
                    for (c, k) in chunk.iter().zip(block.iter_mut()) {
                        *k ^= *c;
                    }
                    self.chain = u128::from_be_bytes(self.chain).wrapping_add(1).to_be_bytes();
                }
            }
            chunk.copy_from_slice(&block);
        }
        Ok(())
    }
}

/// Digests computed in one pass over the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDigests {
    /// Compared with `image_hash`.
    pub hash: [u8; 32],
    /// Input to the signature check, when one was requested.
    pub signed: Option<[u8; 32]>,
}

/// Hash the image whose header sits at `header_addr`.
pub fn image_digests<F: ReadNorFlash>(
    flash: &mut F,
    base: u32,
    header_addr: u32,
    header: &ImageHeader,
    cipher: &dyn BlockCipher,
    with_signature: bool,
) -> Result<ImageDigests, IntegrityError> {
    let mut hash = Sha256::new();
    let mut signed = with_signature.then(|| {
        let mut h = Sha256::new();
        h.update(header.image_hash);
        h
    });
    let mut payload_cipher = PayloadCipher::for_header(header, cipher)?;

    let end = header.total_len()? as usize;
    let mut offset = HASH_START;
    let mut chunk = [0u8; READ_CHUNK];

    while offset < end {
        // Keep header and payload bytes in separate chunks.
        let limit = if offset < DEFAULT_HEADER_SIZE {
            DEFAULT_HEADER_SIZE
        } else {
            end
        };
        let n = (limit - offset).min(READ_CHUNK);
        let bytes = &mut chunk[..n];
        flash::read(flash, base, header_addr + offset as u32, bytes)?;
        normalize_flag_bytes(bytes, offset as u32);
        if offset >= DEFAULT_HEADER_SIZE {
            if let Some(pc) = payload_cipher.as_mut() {
                pc.decrypt(bytes)?;
            }
        }

        hash.update(&*bytes);
        if let Some(s) = signed.as_mut() {
            s.update(&*bytes);
        }
        offset += n;
    }

    Ok(ImageDigests {
        hash: hash.finalize().into(),
        signed: signed.map(|s| s.finalize().into()),
    })
}

/// Check the computed digest against the header's `image_hash`.
pub fn verify_sha256(header: &ImageHeader, digests: &ImageDigests) -> Result<(), IntegrityError> {
    if digests.hash == header.image_hash {
        Ok(())
    } else {
        Err(IntegrityError::DigestMismatch)
    }
}

/// Check the vendor signature carried in the auth block.
pub fn verify_signature(
    header: &ImageHeader,
    digests: &ImageDigests,
    scheme: SignatureScheme,
    signer: &dyn SignatureVerifier,
) -> Result<(), IntegrityError> {
    let signature: &[u8] = match scheme {
        SignatureScheme::None => return Ok(()),
        SignatureScheme::Rsa3072 => &header.signature[..],
        SignatureScheme::Ecdsa => {
            let len = usize::from(header.signature[ECDSA_SIG_MAX]).min(ECDSA_SIG_MAX);
            &header.signature[..len]
        }
        SignatureScheme::Ed25519 => &header.signature[..64],
    };
    let public_key = &header.public_key[..scheme.public_key_len()];
    let digest = digests.signed.ok_or(IntegrityError::SignatureInvalid)?;

    if signer.verify(scheme, public_key, &digest, signature) {
        Ok(())
    } else {
        Err(IntegrityError::SignatureInvalid)
    }
}

/// Full check of a written image: digest, then signature if configured.
pub fn verify_image<F: ReadNorFlash>(
    flash: &mut F,
    base: u32,
    header_addr: u32,
    header: &ImageHeader,
    cipher: &dyn BlockCipher,
    signer: &dyn SignatureVerifier,
    scheme: SignatureScheme,
) -> Result<(), IntegrityError> {
    let with_signature = scheme != SignatureScheme::None;
    let digests = image_digests(flash, base, header_addr, header, cipher, with_signature)?;
    verify_sha256(header, &digests)?;
    verify_signature(header, &digests, scheme, signer)?;
    trace!("Verify: image at 0x{:08x} OK", header_addr);
    Ok(())
}
