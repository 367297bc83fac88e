//! Reads the NTFS/ReFS USN change journal for a single volume.
//!
//! [`JournalReader`] owns the cursor for one [`Volume`] and turns the raw IOCTL output
//! buffer into owned [`Event`]s via [`crate::record::parse_batch`]. It detects both
//! wrap (the stored cursor has been overwritten by the circular journal) and journal
//! recreation (the journal ID changed since the cursor was saved).

use crate::errors::UsnError;
use crate::event::Event;
use crate::record::parse_batch;
use crate::volume::Volume;
use log::{debug, warn};
use std::ffi::c_void;
use std::mem::size_of;
use windows::Win32::{
    Foundation::{ERROR_HANDLE_EOF, ERROR_JOURNAL_ENTRY_DELETED, ERROR_JOURNAL_NOT_ACTIVE},
    System::{
        IO::DeviceIoControl,
        Ioctl::{FSCTL_QUERY_USN_JOURNAL, FSCTL_READ_USN_JOURNAL, READ_USN_JOURNAL_DATA_V0, USN_JOURNAL_DATA_V0},
    },
};

/// 64-bit monotone counter assigned by the NTFS driver to each journal entry.
pub type Usn = i64;

pub(crate) const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Bitmask accepted by [`JournalReader::read_batch`] that selects every reason bit.
pub const REASON_MASK_ALL: u32 = 0xFFFF_FFFF;

/// Snapshot of `USN_JOURNAL_DATA_V0`, queried via `FSCTL_QUERY_USN_JOURNAL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalMetadata {
    pub journal_id: u64,
    pub first_usn: Usn,
    pub next_usn: Usn,
    pub max_usn: Usn,
    pub maximum_size: u64,
}

impl From<USN_JOURNAL_DATA_V0> for JournalMetadata {
    fn from(data: USN_JOURNAL_DATA_V0) -> Self {
        JournalMetadata {
            journal_id: data.UsnJournalID,
            first_usn: data.FirstUsn,
            next_usn: data.NextUsn,
            max_usn: data.MaxUsn,
            maximum_size: data.MaximumSize,
        }
    }
}

/// Outcome of positioning the cursor at a previously stored USN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorOutcome {
    /// `stored_usn` is still within the journal's live range; the cursor resumes there.
    Resumed,
    /// `stored_usn` fell below `first_usn`; the cursor was repositioned to `first_usn`.
    Wrapped { from: Usn, to: Usn },
}

/// Reads batches of USN records from one volume's change journal, tracking the cursor.
pub struct JournalReader<'a> {
    volume: &'a Volume,
    journal_id: u64,
    cursor: Usn,
    buffer: Vec<u8>,
}

impl<'a> JournalReader<'a> {
    pub fn new(volume: &'a Volume) -> Self {
        JournalReader {
            volume,
            journal_id: 0,
            cursor: 0,
            buffer: vec![0u8; DEFAULT_BUFFER_SIZE],
        }
    }

    /// Queries journal metadata and sets the cursor to the live tail (`next_usn`).
    ///
    /// Fails with [`UsnError::JournalDisabled`] if the journal is not active; this crate
    /// never enables the journal on a volume's behalf.
    pub fn initialize(&mut self) -> Result<JournalMetadata, UsnError> {
        let metadata = self.query()?;
        self.journal_id = metadata.journal_id;
        self.cursor = metadata.next_usn;
        Ok(metadata)
    }

    /// Queries journal metadata and positions the cursor at `stored_usn`, detecting wrap.
    pub fn set_cursor(&mut self, stored_usn: Usn) -> Result<CursorOutcome, UsnError> {
        let metadata = self.query()?;
        self.journal_id = metadata.journal_id;

        if stored_usn >= metadata.first_usn {
            self.cursor = stored_usn;
            Ok(CursorOutcome::Resumed)
        } else {
            self.cursor = metadata.first_usn;
            Ok(CursorOutcome::Wrapped {
                from: stored_usn,
                to: metadata.first_usn,
            })
        }
    }

    pub fn journal_id(&self) -> u64 {
        self.journal_id
    }

    pub fn cursor(&self) -> Usn {
        self.cursor
    }

    /// Issues one non-blocking `FSCTL_READ_USN_JOURNAL` call and returns the events
    /// decoded from it, in strict USN order. Empty when there are no new records.
    ///
    /// If the journal was recreated since the last call (wrap past the stored cursor,
    /// detected here as `ERROR_JOURNAL_ENTRY_DELETED`), the cursor is repositioned to the
    /// fresh tail and [`UsnError::Wrapped`] is returned; the caller should surface a gap
    /// and retry.
    pub fn read_batch(&mut self, reason_mask: u32) -> Result<Vec<Event>, UsnError> {
        let read_data = READ_USN_JOURNAL_DATA_V0 {
            StartUsn: self.cursor,
            ReasonMask: reason_mask,
            ReturnOnlyOnClose: 0,
            Timeout: 0,
            BytesToWaitFor: 0,
            UsnJournalID: self.journal_id,
        };

        let mut bytes_read = 0u32;
        let result = unsafe {
            DeviceIoControl(
                self.volume.handle,
                FSCTL_READ_USN_JOURNAL,
                Some(&read_data as *const _ as *mut c_void),
                size_of::<READ_USN_JOURNAL_DATA_V0>() as u32,
                Some(self.buffer.as_mut_ptr() as *mut c_void),
                self.buffer.len() as u32,
                Some(&mut bytes_read),
                None,
            )
        };

        if let Err(err) = result {
            if err.code() == ERROR_HANDLE_EOF.into() {
                return Ok(Vec::new());
            }
            if err.code() == ERROR_JOURNAL_ENTRY_DELETED.into() {
                let metadata = self.query()?;
                self.journal_id = metadata.journal_id;
                let from = self.cursor;
                self.cursor = metadata.next_usn;
                return Err(UsnError::Wrapped {
                    from,
                    to: metadata.next_usn,
                });
            }
            warn!("error reading USN journal: {}", err);
            return Err(err.into());
        }

        let (next_usn, records) = parse_batch(&self.buffer[..bytes_read as usize])?;
        self.cursor = next_usn;

        Ok(records.into_iter().map(Event::from).collect())
    }

    /// Fails with [`UsnError::JournalDisabled`] if the journal is not active. This crate
    /// never issues `FSCTL_CREATE_USN_JOURNAL` on a volume's behalf.
    fn query(&self) -> Result<JournalMetadata, UsnError> {
        match self.query_core() {
            Ok(data) => Ok(data.into()),
            Err(err) if err.code() == ERROR_JOURNAL_NOT_ACTIVE.into() => {
                Err(UsnError::JournalDisabled)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn query_core(&self) -> windows::core::Result<USN_JOURNAL_DATA_V0> {
        let journal_data = USN_JOURNAL_DATA_V0::default();
        let mut bytes_returned = 0u32;

        unsafe {
            DeviceIoControl(
                self.volume.handle,
                FSCTL_QUERY_USN_JOURNAL,
                None,
                0,
                Some(&journal_data as *const _ as *mut c_void),
                size_of::<USN_JOURNAL_DATA_V0>() as u32,
                Some(&mut bytes_returned),
                None,
            )
        }?;

        debug!("queried USN journal: {:#?}", journal_data);
        Ok(journal_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_outcome_wrapped_carries_from_and_to() {
        let outcome = CursorOutcome::Wrapped { from: 100, to: 500 };
        assert_eq!(
            outcome,
            CursorOutcome::Wrapped {
                from: 100,
                to: 500
            }
        );
        assert_ne!(outcome, CursorOutcome::Resumed);
    }

    #[test]
    #[ignore = "requires a real Windows volume with an inactive USN journal"]
    fn initialize_fails_disabled_instead_of_creating_journal() {
        let volume = crate::volume::Volume::open('C').expect("volume should open");
        let mut reader = JournalReader::new(&volume);
        let err = reader.initialize().unwrap_err();
        assert!(matches!(err, UsnError::JournalDisabled));
    }

    #[test]
    fn journal_metadata_converts_from_raw_struct() {
        let mut raw = USN_JOURNAL_DATA_V0::default();
        raw.UsnJournalID = 7;
        raw.FirstUsn = 10;
        raw.NextUsn = 20;
        raw.MaxUsn = 1000;
        raw.MaximumSize = 32 * 1024 * 1024;

        let metadata: JournalMetadata = raw.into();
        assert_eq!(metadata.journal_id, 7);
        assert_eq!(metadata.first_usn, 10);
        assert_eq!(metadata.next_usn, 20);
        assert_eq!(metadata.maximum_size, 32 * 1024 * 1024);
    }
}
