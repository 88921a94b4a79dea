//! Typed failures of ISP operations.
//!
//! Library functions return `anyhow::Result`; the failures below travel inside
//! the `anyhow::Error` and can be recovered with [`IspError::of`] when the
//! caller needs the phase, address or values involved.

use std::path::PathBuf;

use thiserror::Error;

use crate::constants::PROGRAMMING_ENABLE_ECHO;
use crate::protocol::Fuse;

/// Broad category of a failure, used to choose a user facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Device absent, miswired or the wrong part
    Protocol,
    /// A fuse write would disable reset or ISP access
    Safety,
    /// Something did not read back as written
    Verification,
    /// Firmware or dump file could not be read or written
    Io,
    /// The firmware image itself is unusable
    Image,
    /// Stopped by the caller between pages
    Cancelled,
}

/// One flash byte that did not read back as expected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    pub address: u32,
    pub expected: u8,
    pub actual: u8,
}

#[derive(Debug, Error)]
pub enum IspError {
    #[error(
        "failed to enter programming mode (echo 0x{echo:02x}, expected 0x{expected:02x})",
        expected = PROGRAMMING_ENABLE_ECHO
    )]
    Handshake { echo: u8 },

    #[error(
        "unexpected device signature {}, expected {}",
        hex::encode(.actual),
        hex::encode(.expected)
    )]
    SignatureMismatch { expected: [u8; 3], actual: [u8; 3] },

    #[error("refusing to write 0x{value:02x} to the {fuse}: {reason}")]
    UnsafeFuse {
        fuse: Fuse,
        value: u8,
        reason: &'static str,
    },

    #[error("{fuse} reads back 0x{actual:02x} after writing 0x{expected:02x}")]
    FuseReadback { fuse: Fuse, expected: u8, actual: u8 },

    #[error("{}", describe_mismatches(.mismatches, .stopped_early))]
    FlashMismatch {
        mismatches: Vec<Mismatch>,
        stopped_early: bool,
    },

    #[error("cannot access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: invalid record: {reason}")]
    InvalidRecord { line: usize, reason: String },

    #[error("address 0x{address:04x} is outside the {flash_size} byte flash")]
    AddressOutOfRange { address: u32, flash_size: u32 },

    #[error("{len} bytes at 0x{base:08x} run past the end of the address space")]
    AddressOverflow { base: u32, len: usize },

    #[error("firmware image contains no data")]
    EmptyImage,

    #[error("operation cancelled")]
    Cancelled,
}

fn describe_mismatches(mismatches: &[Mismatch], stopped_early: &bool) -> String {
    format!(
        "flash verification failed with {}{} mismatches, first at 0x{:04x}",
        mismatches.len(),
        if *stopped_early { "+" } else { "" },
        mismatches.first().map(|m| m.address).unwrap_or_default()
    )
}

impl IspError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IspError::Handshake { .. } | IspError::SignatureMismatch { .. } => ErrorKind::Protocol,
            IspError::UnsafeFuse { .. } => ErrorKind::Safety,
            IspError::FuseReadback { .. } | IspError::FlashMismatch { .. } => {
                ErrorKind::Verification
            }
            IspError::Io { .. } => ErrorKind::Io,
            IspError::InvalidRecord { .. }
            | IspError::AddressOutOfRange { .. }
            | IspError::AddressOverflow { .. }
            | IspError::EmptyImage => ErrorKind::Image,
            IspError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Find the typed failure inside an `anyhow::Error`, looking through context layers.
    pub fn of(err: &anyhow::Error) -> Option<&IspError> {
        err.chain().find_map(|cause| cause.downcast_ref::<IspError>())
    }
}
