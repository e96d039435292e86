// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Engine error types and their mapping onto DFU status codes.

use crate::flash::{FlashError, HeaderReadError};
use crate::platform::{CryptoError, ResetReason};
use crate::supervisor::TimerId;
use bee_dfu_common::{DfuStatus, HeaderError, PartitionName};

/// Partition table or bank lookup failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LayoutError {
    #[error("partition {0:?} is not in the layout")]
    UnknownPartition(PartitionName),
    #[error("no bank of the family is active")]
    NoActiveBank,
    #[error("family has no spare bank")]
    NoTempBank,
    #[error("image 0x{0:04x} cannot be placed in flash")]
    NotPlaceable(u16),
    #[error("sub-image 0x{0:04x} reaches past the end of its OTA bank")]
    SubImageOverrun(u16),
    #[error("OTA container header unusable: {0}")]
    OtaHeader(HeaderReadError),
}

impl From<FlashError> for LayoutError {
    fn from(e: FlashError) -> Self {
        Self::OtaHeader(HeaderReadError::Flash(e))
    }
}

/// Failure while receiving an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferError {
    #[error("image larger than its destination")]
    DataSizeExceedsLimit,
    #[error("buffer CRC mismatch")]
    CrcMismatch,
    #[error("flash write failed: {0}")]
    FlashWrite(FlashError),
    #[error("flash erase failed: {0}")]
    FlashErase(FlashError),
    #[error("data length does not match the session")]
    LengthMismatch,
    #[error("invalid request parameter")]
    InvalidParameter,
    #[error("request not allowed in this state")]
    BadState,
    #[error("secure version below minimum")]
    SysVersion,
    #[error("header rejected: {0}")]
    Header(HeaderError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

/// Whole-image verification failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IntegrityError {
    #[error("SHA-256 digest mismatch")]
    DigestMismatch,
    #[error("signature rejected")]
    SignatureInvalid,
    #[error("encrypted payload is not a multiple of 16 bytes")]
    UnalignedCiphertext,
    #[error("unsupported key select")]
    UnsupportedCipher,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Flash(#[from] FlashError),
    #[error(transparent)]
    Header(#[from] HeaderError),
}

impl From<HeaderReadError> for IntegrityError {
    fn from(e: HeaderReadError) -> Self {
        match e {
            HeaderReadError::Flash(e) => Self::Flash(e),
            HeaderReadError::Header(e) => Self::Header(e),
        }
    }
}

/// Activation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommitError {
    #[error("flag word at 0x{addr:08x} would need a 0 to 1 transition")]
    FlagNotProgrammable { addr: u32 },
    #[error("two banks of {0:?} are current")]
    BothBanksCurrent(PartitionName),
    #[error("container is missing verified images")]
    Incomplete,
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Flash(#[from] FlashError),
}

/// Why a session ended early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AbortCause {
    Transfer(TransferError),
    Integrity(IntegrityError),
    Commit(CommitError),
    Timeout(TimerId),
    LinkLost,
    ResetCommand,
}

impl AbortCause {
    /// Status reported to the peer for this cause.
    pub fn status(&self) -> DfuStatus {
        match self {
            Self::Transfer(e) => e.status(),
            Self::Integrity(_) => DfuStatus::CrcError,
            Self::Commit(_) | Self::Timeout(_) | Self::LinkLost | Self::ResetCommand => {
                DfuStatus::FailOperation
            }
        }
    }

    pub fn reset_reason(&self) -> ResetReason {
        match self {
            Self::Timeout(TimerId::WaitForConnection) => ResetReason::ImageTransferTimeout,
            Self::Timeout(TimerId::TotalTransfer) => ResetReason::ImageTotalTimeout,
            Self::LinkLost => ResetReason::LinkLost,
            Self::ResetCommand => ResetReason::ResetCommand,
            Self::Transfer(_) | Self::Integrity(_) | Self::Commit(_) => ResetReason::TransferFailure,
        }
    }
}

impl TransferError {
    pub fn status(&self) -> DfuStatus {
        match self {
            Self::DataSizeExceedsLimit => DfuStatus::DataSizeExceedsLimit,
            Self::CrcMismatch => DfuStatus::CrcError,
            Self::FlashWrite(_) => DfuStatus::FlashWriteError,
            Self::FlashErase(_) => DfuStatus::FlashEraseError,
            Self::LengthMismatch => DfuStatus::DataLengthError,
            Self::InvalidParameter | Self::Header(_) => DfuStatus::InvalidParameter,
            Self::SysVersion => DfuStatus::SysVersionError,
            Self::BadState | Self::Layout(_) => DfuStatus::FailOperation,
        }
    }
}

impl From<TransferError> for AbortCause {
    fn from(e: TransferError) -> Self {
        Self::Transfer(e)
    }
}

impl From<IntegrityError> for AbortCause {
    fn from(e: IntegrityError) -> Self {
        Self::Integrity(e)
    }
}

impl From<CommitError> for AbortCause {
    fn from(e: CommitError) -> Self {
        Self::Commit(e)
    }
}
