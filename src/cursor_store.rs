//! Durable, best-effort persistence of the last-emitted cursor for one volume.

use crate::journal::Usn;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// `(volume, journal ID, next USN, saved-at)`, persisted as a small JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorRecord {
    pub volume: String,
    #[serde(rename = "journalId")]
    pub journal_id: String,
    #[serde(rename = "nextUsn")]
    pub next_usn: Usn,
    #[serde(rename = "savedAt")]
    pub saved_at: DateTime<Utc>,
}

impl CursorRecord {
    pub fn new(drive_letter: char, journal_id: u64, next_usn: Usn) -> Self {
        CursorRecord {
            volume: drive_letter.to_string(),
            journal_id: format!("0x{journal_id:016x}"),
            next_usn,
            saved_at: Utc::now(),
        }
    }

    /// Parses `journal_id` back into its numeric form, if well-formed.
    pub fn journal_id_value(&self) -> Option<u64> {
        u64::from_str_radix(self.journal_id.trim_start_matches("0x"), 16).ok()
    }
}

/// The per-user application-data path `cursor.json` lives at, if one can be resolved for
/// this platform/user.
pub fn default_cursor_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "usn-watcher").map(|dirs| dirs.data_dir().join("cursor.json"))
}

/// Writes `record` to `path`. Failures are logged and swallowed: losing the cursor only
/// degrades the next startup to "resume from live tail with a gap notice."
pub fn save(path: &Path, record: &CursorRecord) {
    let bytes = match serde_json::to_vec_pretty(record) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("failed to serialize cursor record: {}", err);
            return;
        }
    };

    if let Some(parent) = path.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            warn!("failed to create cursor directory {:?}: {}", parent, err);
            return;
        }
    }

    if let Err(err) = fs::write(path, bytes) {
        warn!("failed to save cursor to {:?}: {}", path, err);
    }
}

/// Loads and parses the cursor at `path`, returning `None` if the file is missing, the
/// volume does not match `drive_letter`, or parsing fails.
pub fn load(path: &Path, drive_letter: char) -> Option<CursorRecord> {
    let bytes = fs::read(path).ok()?;
    let record: CursorRecord = serde_json::from_slice(&bytes).ok()?;
    if record.volume != drive_letter.to_string() {
        return None;
    }
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");
        assert!(load(&path, 'C').is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");

        let record = CursorRecord::new('C', 0xdead_beef, 1234);
        save(&path, &record);

        let loaded = load(&path, 'C').unwrap();
        assert_eq!(loaded.next_usn, 1234);
        assert_eq!(loaded.journal_id_value(), Some(0xdead_beef));
    }

    #[test]
    fn mismatched_volume_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");
        save(&path, &CursorRecord::new('C', 1, 1));
        assert!(load(&path, 'D').is_none());
    }

    #[test]
    fn corrupt_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");
        fs::write(&path, b"not json").unwrap();
        assert!(load(&path, 'C').is_none());
    }

    #[test]
    fn journal_id_formats_as_lowercase_sixteen_hex() {
        let record = CursorRecord::new('C', 0xA, 0);
        assert_eq!(record.journal_id, "0x000000000000000a");
    }
}
