//! The managed, stable event type the rest of the crate operates on, plus the decoded
//! reason-token and attribute vocabularies.

use crate::journal::Usn;
use crate::record::RawRecord;
use crate::time::filetime_to_utc;
use chrono::{DateTime, Utc};

/// `USN_REASON_*` bit -> stable uppercase token, per spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ReasonToken {
    DataOverwrite,
    DataExtend,
    DataTruncation,
    NamedDataOverwrite,
    NamedDataExtend,
    NamedDataTruncation,
    FileCreate,
    FileDelete,
    EaChange,
    SecurityChange,
    RenameOldName,
    RenameNewName,
    IndexableChange,
    BasicInfoChange,
    HardLinkChange,
    CompressionChange,
    EncryptionChange,
    ObjectIdChange,
    ReparsePointChange,
    StreamChange,
    TransactedChange,
    IntegrityChange,
    Close,
}

impl ReasonToken {
    /// Stable uppercase name used in the NDJSON `"reason"` array.
    pub const fn as_str(self) -> &'static str {
        match self {
            ReasonToken::DataOverwrite => "DATAOVERWRITE",
            ReasonToken::DataExtend => "DATAEXTEND",
            ReasonToken::DataTruncation => "DATATRUNCATION",
            ReasonToken::NamedDataOverwrite => "NAMEDDATAOVERWRITE",
            ReasonToken::NamedDataExtend => "NAMEDDATAEXTEND",
            ReasonToken::NamedDataTruncation => "NAMEDDATATRUNCATION",
            ReasonToken::FileCreate => "FILECREATE",
            ReasonToken::FileDelete => "FILEDELETE",
            ReasonToken::EaChange => "EACHANGE",
            ReasonToken::SecurityChange => "SECURITYCHANGE",
            ReasonToken::RenameOldName => "RENAMEOLDNAME",
            ReasonToken::RenameNewName => "RENAMENEWNAME",
            ReasonToken::IndexableChange => "INDEXABLECHANGE",
            ReasonToken::BasicInfoChange => "BASICINFOCHANGE",
            ReasonToken::HardLinkChange => "HARDLINKCHANGE",
            ReasonToken::CompressionChange => "COMPRESSIONCHANGE",
            ReasonToken::EncryptionChange => "ENCRYPTIONCHANGE",
            ReasonToken::ObjectIdChange => "OBJECTIDCHANGE",
            ReasonToken::ReparsePointChange => "REPARSEPOINTCHANGE",
            ReasonToken::StreamChange => "STREAMCHANGE",
            ReasonToken::TransactedChange => "TRANSACTEDCHANGE",
            ReasonToken::IntegrityChange => "INTEGRITYCHANGE",
            ReasonToken::Close => "CLOSE",
        }
    }

    /// The bit this token corresponds to in the raw `USN_REASON_*` mask.
    const fn bit(self) -> u32 {
        match self {
            ReasonToken::DataOverwrite => 0x0000_0001,
            ReasonToken::DataExtend => 0x0000_0002,
            ReasonToken::DataTruncation => 0x0000_0004,
            ReasonToken::NamedDataOverwrite => 0x0000_0010,
            ReasonToken::NamedDataExtend => 0x0000_0020,
            ReasonToken::NamedDataTruncation => 0x0000_0040,
            ReasonToken::FileCreate => 0x0000_0100,
            ReasonToken::FileDelete => 0x0000_0200,
            ReasonToken::EaChange => 0x0000_0400,
            ReasonToken::SecurityChange => 0x0000_0800,
            ReasonToken::RenameOldName => 0x0000_1000,
            ReasonToken::RenameNewName => 0x0000_2000,
            ReasonToken::IndexableChange => 0x0000_4000,
            ReasonToken::BasicInfoChange => 0x0000_8000,
            ReasonToken::HardLinkChange => 0x0001_0000,
            ReasonToken::CompressionChange => 0x0002_0000,
            ReasonToken::EncryptionChange => 0x0004_0000,
            ReasonToken::ObjectIdChange => 0x0008_0000,
            ReasonToken::ReparsePointChange => 0x0010_0000,
            ReasonToken::StreamChange => 0x0020_0000,
            ReasonToken::TransactedChange => 0x0040_0000,
            ReasonToken::IntegrityChange => 0x0080_0000,
            ReasonToken::Close => 0x8000_0000,
        }
    }

    const ALL: [ReasonToken; 23] = [
        ReasonToken::DataOverwrite,
        ReasonToken::DataExtend,
        ReasonToken::DataTruncation,
        ReasonToken::NamedDataOverwrite,
        ReasonToken::NamedDataExtend,
        ReasonToken::NamedDataTruncation,
        ReasonToken::FileCreate,
        ReasonToken::FileDelete,
        ReasonToken::EaChange,
        ReasonToken::SecurityChange,
        ReasonToken::RenameOldName,
        ReasonToken::RenameNewName,
        ReasonToken::IndexableChange,
        ReasonToken::BasicInfoChange,
        ReasonToken::HardLinkChange,
        ReasonToken::CompressionChange,
        ReasonToken::EncryptionChange,
        ReasonToken::ObjectIdChange,
        ReasonToken::ReparsePointChange,
        ReasonToken::StreamChange,
        ReasonToken::TransactedChange,
        ReasonToken::IntegrityChange,
        ReasonToken::Close,
    ];

    /// Decodes a raw reason bitmask into the set of tokens with a named meaning.
    /// Unknown bits are ignored, per spec.
    pub fn decode(mask: u32) -> Vec<ReasonToken> {
        Self::ALL.into_iter().filter(|t| mask & t.bit() != 0).collect()
    }
}

/// `FILE_ATTRIBUTE_*` bit -> stable name, used in the NDJSON `"attributes"` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Attribute {
    ReadOnly,
    Hidden,
    System,
    Directory,
    Archive,
    Reparse,
    Compressed,
    Encrypted,
}

impl Attribute {
    pub const fn as_str(self) -> &'static str {
        match self {
            Attribute::ReadOnly => "READONLY",
            Attribute::Hidden => "HIDDEN",
            Attribute::System => "SYSTEM",
            Attribute::Directory => "DIRECTORY",
            Attribute::Archive => "ARCHIVE",
            Attribute::Reparse => "REPARSE_POINT",
            Attribute::Compressed => "COMPRESSED",
            Attribute::Encrypted => "ENCRYPTED",
        }
    }

    const fn bit(self) -> u32 {
        match self {
            Attribute::ReadOnly => 0x0000_0001,
            Attribute::Hidden => 0x0000_0002,
            Attribute::System => 0x0000_0004,
            Attribute::Directory => 0x0000_0010,
            Attribute::Archive => 0x0000_0020,
            Attribute::Reparse => 0x0000_0400,
            Attribute::Compressed => 0x0000_0800,
            Attribute::Encrypted => 0x0000_4000,
        }
    }

    const ALL: [Attribute; 8] = [
        Attribute::ReadOnly,
        Attribute::Hidden,
        Attribute::System,
        Attribute::Directory,
        Attribute::Archive,
        Attribute::Reparse,
        Attribute::Compressed,
        Attribute::Encrypted,
    ];

    pub fn decode(mask: u32) -> Vec<Attribute> {
        Self::ALL.into_iter().filter(|a| mask & a.bit() != 0).collect()
    }
}

const REASON_CLOSE: u32 = 0x8000_0000;
const REASON_FILE_CREATE: u32 = 0x0000_0100;
const REASON_FILE_DELETE: u32 = 0x0000_0200;
const REASON_RENAME_OLD_NAME: u32 = 0x0000_1000;
const REASON_RENAME_NEW_NAME: u32 = 0x0000_2000;
const REASON_DATA_CHANGE: u32 = 0x0000_0001 | 0x0000_0002 | 0x0000_0004;

/// A single logical filesystem-change event, already resolved into stable, owned fields.
#[derive(Debug, Clone)]
pub struct Event {
    pub usn: Usn,
    pub timestamp: DateTime<Utc>,
    pub frn: u64,
    pub parent_frn: u64,
    pub file_name: String,
    pub full_path: Option<String>,
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub reason: Vec<ReasonToken>,
    pub reason_raw: u32,
    pub is_directory: bool,
    pub attributes: u32,
}

impl Event {
    pub fn is_close(&self) -> bool {
        self.reason_raw & REASON_CLOSE != 0
    }

    pub fn is_create(&self) -> bool {
        self.reason_raw & REASON_FILE_CREATE != 0
    }

    pub fn is_delete(&self) -> bool {
        self.reason_raw & REASON_FILE_DELETE != 0
    }

    pub fn is_rename_old_name(&self) -> bool {
        self.reason_raw & REASON_RENAME_OLD_NAME != 0
    }

    pub fn is_rename_new_name(&self) -> bool {
        self.reason_raw & REASON_RENAME_NEW_NAME != 0
    }

    pub fn is_rename(&self) -> bool {
        self.reason_raw & (REASON_RENAME_OLD_NAME | REASON_RENAME_NEW_NAME) != 0
    }

    pub fn is_data_change(&self) -> bool {
        self.reason_raw & REASON_DATA_CHANGE != 0
    }
}

impl From<RawRecord> for Event {
    fn from(record: RawRecord) -> Self {
        let is_directory = Attribute::decode(record.file_attributes).contains(&Attribute::Directory);
        Event {
            usn: record.usn,
            timestamp: filetime_to_utc(record.timestamp_filetime),
            frn: record.frn,
            parent_frn: record.parent_frn,
            file_name: record.file_name,
            full_path: None,
            old_path: None,
            new_path: None,
            reason: ReasonToken::decode(record.reason),
            reason_raw: record.reason,
            is_directory,
            attributes: record.file_attributes,
        }
    }
}
