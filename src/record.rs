//! Parsing of the raw, variable-length USN_RECORD_V2 buffer returned by
//! `FSCTL_READ_USN_JOURNAL`/`FSCTL_ENUM_USN_DATA`.
//!
//! The wire layout is a fixed 60-byte prefix followed by a UTF-16LE filename and padding
//! to 8-byte alignment. Fields are read directly from byte offsets rather than cast
//! through a `#[repr(C)]` struct, so a batch can be parsed (and fuzzed) without an
//! aligned, live IOCTL buffer.

use crate::errors::UsnError;
use crate::journal::Usn;

/// Byte length of the fixed record prefix, up to and including `FileNameOffset`.
const RECORD_PREFIX_LEN: usize = 60;

/// The major version this crate understands. Records with any other major version are
/// silently skipped, per spec.
const SUPPORTED_MAJOR_VERSION: u16 = 2;

/// One decoded USN_RECORD_V2, still holding its raw reason/attribute bitmasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub usn: Usn,
    pub frn: u64,
    pub parent_frn: u64,
    /// Windows FILETIME (100ns intervals since 1601-01-01 UTC).
    pub timestamp_filetime: i64,
    pub reason: u32,
    pub source_info: u32,
    pub file_attributes: u32,
    pub file_name: String,
}

/// Parses every well-formed record out of one IOCTL output buffer.
///
/// Returns the next-USN cursor read from the first 8 bytes of `buf`, plus the records
/// found in strict on-disk order. Parsing stops (without error) as soon as a record
/// fails the `record_length` sanity check, since the remainder of the buffer cannot be
/// trusted to contain valid record boundaries.
pub fn parse_batch(buf: &[u8]) -> Result<(Usn, Vec<RawRecord>), UsnError> {
    if buf.len() < size_of::<Usn>() {
        return Err(UsnError::CorruptBatch { offset: 0 });
    }

    let next_usn = Usn::from_le_bytes(buf[0..8].try_into().unwrap());
    let mut records = Vec::new();
    let mut offset = size_of::<Usn>();

    while offset < buf.len() {
        match parse_one(buf, offset) {
            Some((consumed, record)) => {
                if let Some(record) = record {
                    records.push(record);
                }
                offset += consumed;
            }
            None => break,
        }
    }

    Ok((next_usn, records))
}

/// Parses a single record starting at `offset`. Returns the number of bytes consumed
/// (always `record_length` rounded to 8-byte alignment isn't needed here: the kernel
/// already pads `RecordLength` itself) and `Some(RawRecord)` unless the record's major
/// version is unsupported, in which case it is consumed but skipped (`None` payload).
///
/// Returns `None` (stop parsing) if `record_length` is out of bounds.
fn parse_one(buf: &[u8], offset: usize) -> Option<(usize, Option<RawRecord>)> {
    if offset + RECORD_PREFIX_LEN > buf.len() {
        return None;
    }

    let record_length = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap()) as usize;
    if record_length < RECORD_PREFIX_LEN || offset + record_length > buf.len() {
        return None;
    }

    let major_version = u16::from_le_bytes(buf[offset + 4..offset + 6].try_into().unwrap());
    if major_version != SUPPORTED_MAJOR_VERSION {
        return Some((record_length, None));
    }

    let frn = u64::from_le_bytes(buf[offset + 8..offset + 16].try_into().unwrap());
    let parent_frn = u64::from_le_bytes(buf[offset + 16..offset + 24].try_into().unwrap());
    let usn = i64::from_le_bytes(buf[offset + 24..offset + 32].try_into().unwrap());
    let timestamp_filetime = i64::from_le_bytes(buf[offset + 32..offset + 40].try_into().unwrap());
    let reason = u32::from_le_bytes(buf[offset + 40..offset + 44].try_into().unwrap());
    let source_info = u32::from_le_bytes(buf[offset + 44..offset + 48].try_into().unwrap());
    // security_id lives at offset+48..52, currently unused downstream.
    let file_attributes = u32::from_le_bytes(buf[offset + 52..offset + 56].try_into().unwrap());
    let file_name_length =
        u16::from_le_bytes(buf[offset + 56..offset + 58].try_into().unwrap()) as usize;
    let file_name_offset =
        u16::from_le_bytes(buf[offset + 58..offset + 60].try_into().unwrap()) as usize;

    let name_start = offset + file_name_offset;
    let name_end = name_start + file_name_length;
    if name_end > offset + record_length || name_end > buf.len() {
        return None;
    }

    let utf16_units: Vec<u16> = buf[name_start..name_end]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let file_name = String::from_utf16_lossy(&utf16_units);

    let record = RawRecord {
        usn,
        frn,
        parent_frn,
        timestamp_filetime,
        reason,
        source_info,
        file_attributes,
        file_name,
    };

    Some((record_length, Some(record)))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Builds one raw record buffer segment (no alignment padding) for use in buffer
    /// construction tests; mirrors what `FSCTL_READ_USN_JOURNAL` would hand back.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn encode_record(
        usn: Usn,
        frn: u64,
        parent_frn: u64,
        timestamp_filetime: i64,
        reason: u32,
        source_info: u32,
        file_attributes: u32,
        major_version: u16,
        file_name: &str,
    ) -> Vec<u8> {
        let name_utf16: Vec<u8> = file_name
            .encode_utf16()
            .flat_map(|unit| unit.to_le_bytes())
            .collect();

        let unpadded_len = RECORD_PREFIX_LEN + name_utf16.len();
        let padded_len = unpadded_len.div_ceil(8) * 8;

        let mut buf = vec![0u8; padded_len];
        buf[0..4].copy_from_slice(&(padded_len as u32).to_le_bytes());
        buf[4..6].copy_from_slice(&major_version.to_le_bytes());
        buf[6..8].copy_from_slice(&2u16.to_le_bytes()); // minor version, unused
        buf[8..16].copy_from_slice(&frn.to_le_bytes());
        buf[16..24].copy_from_slice(&parent_frn.to_le_bytes());
        buf[24..32].copy_from_slice(&usn.to_le_bytes());
        buf[32..40].copy_from_slice(&timestamp_filetime.to_le_bytes());
        buf[40..44].copy_from_slice(&reason.to_le_bytes());
        buf[44..48].copy_from_slice(&source_info.to_le_bytes());
        buf[48..52].copy_from_slice(&0u32.to_le_bytes()); // security id, unused
        buf[52..56].copy_from_slice(&file_attributes.to_le_bytes());
        buf[56..58].copy_from_slice(&(name_utf16.len() as u16).to_le_bytes());
        buf[58..60].copy_from_slice(&(RECORD_PREFIX_LEN as u16).to_le_bytes());
        buf[RECORD_PREFIX_LEN..RECORD_PREFIX_LEN + name_utf16.len()].copy_from_slice(&name_utf16);
        buf
    }

    /// Assembles a full IOCTL-style output buffer: 8-byte next-USN header followed by
    /// the concatenation of pre-encoded records.
    pub(crate) fn encode_batch(next_usn: Usn, records: &[Vec<u8>]) -> Vec<u8> {
        let mut buf = next_usn.to_le_bytes().to_vec();
        for record in records {
            buf.extend_from_slice(record);
        }
        buf
    }
}
