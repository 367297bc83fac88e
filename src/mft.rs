//! Enumerates every live record in the Master File Table via `FSCTL_ENUM_USN_DATA`.
//!
//! The output buffer has the same shape as a journal read batch (an 8-byte cursor
//! followed by USN_RECORD_V2 records), so entries are decoded with
//! [`crate::record::parse_batch`] and then reduced to the `(frn, parent_frn, file_name,
//! is_directory)` tuple the path resolver's bootstrap needs.

use crate::errors::UsnError;
use crate::event::Attribute;
use crate::record::parse_batch;
use crate::volume::Volume;
use log::warn;
use std::ffi::c_void;
use std::mem::size_of;
use windows::Win32::{
    Foundation::ERROR_HANDLE_EOF,
    System::{IO::DeviceIoControl, Ioctl},
};

const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// One live file or directory record surfaced by the MFT scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MftEntry {
    pub frn: u64,
    pub parent_frn: u64,
    pub file_name: String,
    pub is_directory: bool,
}

/// Walks the entire MFT of a volume in fixed-size batches.
pub struct MftEnumerator<'a> {
    volume: &'a Volume,
    buffer: Vec<u8>,
    next_start_fid: u64,
    done: bool,
}

impl<'a> MftEnumerator<'a> {
    pub fn new(volume: &'a Volume) -> Self {
        MftEnumerator {
            volume,
            buffer: vec![0u8; DEFAULT_BUFFER_SIZE],
            next_start_fid: 0,
            done: false,
        }
    }

    /// Returns the next batch of entries, or `None` once the MFT has been fully walked.
    pub fn next_batch(&mut self) -> Result<Option<Vec<MftEntry>>, UsnError> {
        if self.done {
            return Ok(None);
        }

        let enum_data = Ioctl::MFT_ENUM_DATA_V0 {
            StartFileReferenceNumber: self.next_start_fid,
            LowUsn: 0,
            HighUsn: i64::MAX,
        };

        let mut bytes_read = 0u32;
        let result = unsafe {
            DeviceIoControl(
                self.volume.handle,
                Ioctl::FSCTL_ENUM_USN_DATA,
                Some(&enum_data as *const _ as *mut c_void),
                size_of::<Ioctl::MFT_ENUM_DATA_V0>() as u32,
                Some(self.buffer.as_mut_ptr() as *mut c_void),
                self.buffer.len() as u32,
                Some(&mut bytes_read),
                None,
            )
        };

        if let Err(err) = result {
            if err.code() == ERROR_HANDLE_EOF.into() {
                self.done = true;
                return Ok(None);
            }
            warn!("error enumerating MFT: {}", err);
            return Err(err.into());
        }

        let (next_fid_bits, records) = parse_batch(&self.buffer[..bytes_read as usize])?;
        self.next_start_fid = next_fid_bits as u64;

        let entries = records
            .into_iter()
            .map(|record| MftEntry {
                frn: record.frn,
                parent_frn: record.parent_frn,
                is_directory: Attribute::decode(record.file_attributes)
                    .contains(&Attribute::Directory),
                file_name: record.file_name,
            })
            .collect();

        Ok(Some(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mft_entry_is_directory_follows_attribute_decode() {
        let entry = MftEntry {
            frn: 1,
            parent_frn: 0,
            file_name: "dir".into(),
            is_directory: true,
        };
        assert!(entry.is_directory);
    }
}
