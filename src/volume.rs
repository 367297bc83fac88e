//! Scoped acquisition of a raw read handle to an NTFS volume.
//!
//! [`Volume`] is the handle every IOCTL in this crate is issued against. It is opened
//! once per drive letter and closed exactly once, on every exit path, when dropped.

use crate::{errors::UsnError, privilege};
use log::{debug, warn};
use windows::{
    core::HSTRING,
    Win32::{
        Foundation::{CloseHandle, ERROR_ACCESS_DENIED, ERROR_FILE_NOT_FOUND, HANDLE},
        Storage::FileSystem::{
            CreateFileW, GetLogicalDrives, GetVolumeInformationW, FILE_FLAGS_AND_ATTRIBUTES,
            FILE_GENERIC_READ, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
        },
    },
};

/// An open, read-only handle to an NTFS volume, identified by a drive letter.
///
/// Required by every volume control operation (`FSCTL_QUERY_USN_JOURNAL`,
/// `FSCTL_READ_USN_JOURNAL`, `FSCTL_ENUM_USN_DATA`). The underlying OS handle is closed
/// exactly once, via `Drop`, regardless of how the holder exits.
#[derive(Debug)]
pub struct Volume {
    pub(crate) handle: HANDLE,
    pub(crate) drive_letter: char,
}

// `DeviceIoControl` calls issued through this handle from multiple threads are
// independent, synchronous, buffer-in/buffer-out operations with no shared file
// position; the handle itself carries no thread-affinity, so sharing it behind an
// `Arc` across the main loop and the background populate task is sound.
unsafe impl Send for Volume {}
unsafe impl Sync for Volume {}

impl Volume {
    /// Opens a scoped handle to the NTFS volume named by `drive_letter` (e.g. `'C'`).
    ///
    /// # Errors
    /// * [`UsnError::PermissionDenied`] if the caller lacks administrator privileges.
    /// * [`UsnError::NotFound`] if the letter names no volume.
    /// * [`UsnError::NotNtfs`] if the volume is not formatted NTFS.
    pub fn open(drive_letter: char) -> Result<Self, UsnError> {
        if !privilege::is_elevated()? {
            return Err(UsnError::PermissionDenied);
        }

        if !drive_exists(drive_letter) {
            return Err(UsnError::NotFound(drive_letter.to_string()));
        }

        if !is_ntfs(drive_letter)? {
            return Err(UsnError::NotNtfs(drive_letter.to_string()));
        }

        // https://learn.microsoft.com/en-us/windows/win32/fileio/obtaining-a-volume-handle-for-change-journal-operations
        // To obtain a handle to a volume for use with update sequence number (USN) change
        // journal operations, call CreateFile with lpFileName set to \\.\X: where X is the
        // drive letter that identifies the NTFS volume.
        let volume_root = format!(r"\\.\{}:", drive_letter);

        let handle = match unsafe {
            CreateFileW(
                &HSTRING::from(&volume_root),
                FILE_GENERIC_READ.0,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                None,
                OPEN_EXISTING,
                FILE_FLAGS_AND_ATTRIBUTES::default(),
                None,
            )
        } {
            Ok(handle) => handle,
            Err(err) if err.code() == ERROR_ACCESS_DENIED.into() => {
                return Err(UsnError::PermissionDenied);
            }
            Err(err) if err.code() == ERROR_FILE_NOT_FOUND.into() => {
                return Err(UsnError::NotFound(drive_letter.to_string()));
            }
            Err(err) => return Err(UsnError::WinApiError(err)),
        };

        debug!("opened volume handle for {}:", drive_letter);

        Ok(Volume {
            handle,
            drive_letter,
        })
    }

    /// The drive letter this handle was opened against.
    pub fn drive_letter(&self) -> char {
        self.drive_letter
    }
}

impl Drop for Volume {
    fn drop(&mut self) {
        if let Err(err) = unsafe { CloseHandle(self.handle) } {
            warn!(
                "failed to close volume handle for {}: {}",
                self.drive_letter, err
            );
        } else {
            debug!("closed volume handle for {}:", self.drive_letter);
        }
    }
}

fn drive_exists(drive_letter: char) -> bool {
    let letter = drive_letter.to_ascii_uppercase();
    if !letter.is_ascii_uppercase() {
        return false;
    }
    let bit = (letter as u8 - b'A') as u32;
    let mask = unsafe { GetLogicalDrives() };
    mask & (1 << bit) != 0
}

fn is_ntfs(drive_letter: char) -> Result<bool, UsnError> {
    let root = format!("{}:\\", drive_letter.to_ascii_uppercase());
    let root_wide = HSTRING::from(&root);

    let mut fs_name_buf = [0u16; 32];
    let ok =
        unsafe { GetVolumeInformationW(&root_wide, None, None, None, None, Some(&mut fs_name_buf)) };

    if ok.is_err() {
        return Err(UsnError::NotFound(drive_letter.to_string()));
    }

    let end = fs_name_buf
        .iter()
        .position(|&c| c == 0)
        .unwrap_or(fs_name_buf.len());
    let fs_name = String::from_utf16_lossy(&fs_name_buf[..end]);

    Ok(fs_name.eq_ignore_ascii_case("ntfs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drive_exists_rejects_non_letter_input() {
        assert!(!drive_exists('1'));
    }

    #[test]
    #[ignore = "requires a real elevated Windows session and NTFS volume"]
    fn open_succeeds_on_elevated_ntfs_drive() {
        let volume = Volume::open('C').expect("volume should open");
        assert_eq!(volume.drive_letter(), 'C');
    }

    #[test]
    #[ignore = "requires a real Windows session"]
    fn open_fails_not_found_for_unused_letter() {
        let err = Volume::open('~').unwrap_err();
        assert!(matches!(err, UsnError::NotFound(_)));
    }
}
