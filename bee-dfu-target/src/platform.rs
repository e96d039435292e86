// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Collaborators the engine is driven through.
//!
//! The BLE stack, the reset controller, the tick source and the crypto
//! accelerators all live outside this crate. The update task only sees them
//! through these traits, so the whole engine runs against test doubles.

use bee_dfu_common::protocol::ConnParams;
use bee_dfu_common::{EncKeySelect, SignatureScheme};

/// Why the device is being reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResetReason {
    /// Update committed, boot into the new image.
    SuccessReboot,
    /// The peer went away mid-session.
    LinkLost,
    /// No peer connected in time.
    ImageTransferTimeout,
    /// The whole transfer took too long.
    ImageTotalTimeout,
    /// The peer asked for `SYSTEM_RESET`.
    ResetCommand,
    /// A transfer, verification or commit step failed.
    TransferFailure,
}

/// Where the next boot should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootTarget {
    Normal,
    /// Stay in OTA mode so the bootloader can move `OTA_TMP` images into place.
    OtaMode,
}

/// Transport failure reported by the BLE glue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    #[error("link is not connected")]
    NotConnected,
    #[error("notification queue is full")]
    Busy,
    #[error("request rejected by the controller")]
    Rejected,
}

/// Outbound side of the DFU GATT service.
pub trait Transport {
    /// Send one control-point notification.
    fn notify(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Ask the stack to drop the link. Completion arrives as a disconnect message.
    fn disconnect(&mut self);

    /// Forward a connection parameter update. The outcome arrives as a message.
    fn request_conn_params(&mut self, params: ConnParams) -> Result<(), TransportError>;
}

/// Reset controller.
pub trait System {
    /// Reset the chip. On hardware this does not return.
    fn reboot(&mut self, reason: ResetReason, target: BootTarget);
}

/// Monotonic millisecond tick.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Key slot used for a block operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KeySlot {
    /// Image payload key selected by the header.
    Image(EncKeySelect),
    /// Key protecting the DFU link.
    Link,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CryptoError {
    #[error("key slot not provisioned")]
    KeyUnavailable,
    #[error("crypto engine failure")]
    Engine,
}

/// AES-128 block primitive. Chaining is done by the caller.
pub trait BlockCipher {
    fn encrypt_block(&self, key: KeySlot, block: &mut [u8; 16]) -> Result<(), CryptoError>;
    fn decrypt_block(&self, key: KeySlot, block: &mut [u8; 16]) -> Result<(), CryptoError>;
}

/// Vendor signature check over a SHA-256 digest.
pub trait SignatureVerifier {
    fn verify(
        &self,
        scheme: SignatureScheme,
        public_key: &[u8],
        digest: &[u8; 32],
        signature: &[u8],
    ) -> bool;
}

/// Crypto backend for parts without an AES engine or signing keys.
pub struct NoCrypto;

impl BlockCipher for NoCrypto {
    fn encrypt_block(&self, _key: KeySlot, _block: &mut [u8; 16]) -> Result<(), CryptoError> {
        Err(CryptoError::KeyUnavailable)
    }

    fn decrypt_block(&self, _key: KeySlot, _block: &mut [u8; 16]) -> Result<(), CryptoError> {
        Err(CryptoError::KeyUnavailable)
    }
}

impl SignatureVerifier for NoCrypto {
    fn verify(&self, _: SignatureScheme, _: &[u8], _: &[u8; 32], _: &[u8]) -> bool {
        false
    }
}

/// Everything the update task borrows from the board.
pub struct Peripherals<'a, F> {
    pub flash: &'a mut F,
    pub transport: &'a mut dyn Transport,
    pub system: &'a mut dyn System,
    pub clock: &'a dyn Clock,
    pub cipher: &'a dyn BlockCipher,
    pub signer: &'a dyn SignatureVerifier,
}
