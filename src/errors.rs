//! This module defines the custom error types.

use thiserror::Error;

use crate::journal::Usn;

/// Custom error type for USN Journal, MFT, and daemon operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UsnError {
    #[error("Access denied: Administrator privileges required.")]
    PermissionDenied,

    #[error("Invalid mount point: {0}")]
    InvalidMountPointError(String),

    #[error("No such volume: {0}")]
    NotFound(String),

    #[error("Volume is not NTFS: {0}")]
    NotNtfs(String),

    #[error("USN journal is not active on this volume")]
    JournalDisabled,

    #[error("journal cursor was overwritten by wrap: stored={from}, first_usn={to}")]
    Wrapped { from: Usn, to: Usn },

    #[error("corrupt USN record batch, stopped parsing at offset {offset}")]
    CorruptBatch { offset: usize },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Windows API error: {0}")]
    WinApiError(#[from] windows::core::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("Other error: {0}")]
    OtherError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_error_formats_with_both_usns() {
        let err = UsnError::Wrapped { from: 100, to: 500 };
        assert_eq!(
            err.to_string(),
            "journal cursor was overwritten by wrap: stored=100, first_usn=500"
        );
    }

    #[test]
    fn io_error_converts_via_from() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "nope");
        let err: UsnError = io.into();
        assert!(matches!(err, UsnError::IoError(_)));
    }
}
