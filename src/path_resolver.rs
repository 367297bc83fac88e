//! Maintains the volume-wide FRN -> absolute path map.
//!
//! The map is bootstrapped from a full MFT enumeration (or a persisted cache snapshot)
//! and kept current by observing create/rename/delete events off the live journal. An
//! exact `HashMap` is used rather than an LRU: entries must not be silently evicted while
//! still live, and deletes must remove them explicitly (invariants I1-I4 in the data
//! model).

use crate::errors::UsnError;
use crate::event::Event;
use crate::mft::MftEnumerator;
use crate::volume::Volume;
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{Duration, SystemTime};

const MAX_PARENT_CHAIN_HOPS: usize = 1024;
const ROOT_FRN: u64 = 5;
const CACHE_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

struct Inner {
    map: HashMap<u64, String>,
    pending_rename: HashMap<u64, String>,
}

/// FRN -> absolute path map for one volume, plus the in-flight rename table.
pub struct PathResolver {
    drive_letter: char,
    inner: Mutex<Inner>,
}

impl PathResolver {
    pub fn new(drive_letter: char) -> Self {
        PathResolver {
            drive_letter,
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                pending_rename: HashMap::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Loads a persisted snapshot for this volume if present and younger than 24 hours.
    /// A corrupt file is deleted. Returns whether a fresh snapshot was loaded.
    pub fn try_load_cache(&self, cache_path: &Path) -> bool {
        let metadata = match fs::metadata(cache_path) {
            Ok(metadata) => metadata,
            Err(_) => return false,
        };

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok());
        if age.is_none_or(|age| age > CACHE_MAX_AGE) {
            return false;
        }

        match read_cache_file(cache_path) {
            Ok(map) => {
                let mut inner = self.inner.lock();
                let count = map.len();
                inner.map = map;
                debug!("loaded {} cached paths for {}:", count, self.drive_letter);
                true
            }
            Err(err) => {
                warn!("discarding corrupt path cache {:?}: {}", cache_path, err);
                let _ = fs::remove_file(cache_path);
                false
            }
        }
    }

    /// Writes the current map to `cache_path`. Best-effort: IO errors are logged, not
    /// propagated.
    pub fn save_cache(&self, cache_path: &Path) {
        let inner = self.inner.lock();
        if let Err(err) = write_cache_file(cache_path, &inner.map) {
            warn!("failed to save path cache {:?}: {}", cache_path, err);
        }
    }

    /// Performs a full MFT enumeration and merges the resulting paths into the map.
    /// Entries already present (from live updates that raced the scan) are left alone.
    /// Best-effort: IO errors on any single batch stop the scan but do not fail the run.
    pub fn populate(&self, volume: &Volume) -> usize {
        let mut staging: HashMap<u64, (String, u64)> = HashMap::new();
        let mut enumerator = MftEnumerator::new(volume);

        loop {
            match enumerator.next_batch() {
                Ok(Some(entries)) => {
                    for entry in entries {
                        staging.insert(entry.frn, (entry.file_name, entry.parent_frn));
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!("MFT enumeration stopped early: {}", err);
                    break;
                }
            }
        }

        let computed = compute_paths(&staging, self.drive_letter);
        let inserted = {
            let mut inner = self.inner.lock();
            let before = inner.map.len();
            for (frn, path) in computed {
                inner.map.entry(frn).or_insert(path);
            }
            inner.map.len() - before
        };

        debug!(
            "populate scanned {} MFT entries, added {} new paths",
            staging.len(),
            inserted
        );
        inserted
    }

    /// Fills `event.full_path`. Returns whether it was resolved.
    pub fn resolve(&self, event: &mut Event) -> bool {
        let mut inner = self.inner.lock();

        if let Some(path) = inner.map.get(&event.frn) {
            event.full_path = Some(path.clone());
            return true;
        }

        if let Some(parent_path) = inner.map.get(&event.parent_frn).cloned() {
            let synthesized = join_path(&parent_path, &event.file_name);
            inner.map.insert(event.frn, synthesized.clone());
            event.full_path = Some(synthesized);
            return true;
        }

        false
    }

    /// Keeps the map (and pending-rename table) in sync with a processed event.
    pub fn update(&self, event: &mut Event) {
        let mut inner = self.inner.lock();

        if event.is_delete() {
            inner.map.remove(&event.frn);
            return;
        }

        if event.is_rename_old_name() {
            let old_path = inner
                .map
                .get(&event.frn)
                .cloned()
                .or_else(|| {
                    inner
                        .map
                        .get(&event.parent_frn)
                        .map(|parent| join_path(parent, &event.file_name))
                });
            if let Some(old_path) = old_path {
                inner.pending_rename.insert(event.frn, old_path);
            }
            return;
        }

        if event.is_rename_new_name() {
            let new_path = match inner.map.get(&event.parent_frn) {
                Some(parent) => join_path(parent, &event.file_name),
                None => event.file_name.clone(),
            };
            event.old_path = inner.pending_rename.remove(&event.frn);
            event.full_path = Some(new_path.clone());
            event.new_path = Some(new_path.clone());
            inner.map.insert(event.frn, new_path);
            return;
        }

        if event.is_create() {
            if let Some(parent) = inner.map.get(&event.parent_frn).cloned() {
                let path = join_path(&parent, &event.file_name);
                inner.map.insert(event.frn, path.clone());
                event.full_path = Some(path);
            }
        }
    }
}

fn join_path(parent: &str, name: &str) -> String {
    format!("{}\\{}", parent, name)
}

/// Walks every staged `(frn -> (name, parent_frn))` entry up its parent chain, bounded to
/// `MAX_PARENT_CHAIN_HOPS` hops, producing an absolute `<letter>:\...` path. Entries whose
/// chain cannot be resolved (broken link, or exceeding the hop bound) are skipped.
fn compute_paths(staging: &HashMap<u64, (String, u64)>, drive_letter: char) -> HashMap<u64, String> {
    let mut result = HashMap::with_capacity(staging.len());

    for &frn in staging.keys() {
        if let Some(path) = resolve_chain(frn, staging, drive_letter) {
            result.insert(frn, path);
        }
    }

    result
}

fn resolve_chain(frn: u64, staging: &HashMap<u64, (String, u64)>, drive_letter: char) -> Option<String> {
    let mut components = Vec::new();
    let mut current = frn;

    for _ in 0..MAX_PARENT_CHAIN_HOPS {
        let (name, parent) = staging.get(&current)?;
        components.push(name.clone());
        if *parent == ROOT_FRN || *parent == 0 {
            components.reverse();
            return Some(format!(
                "{}:\\{}",
                drive_letter.to_ascii_uppercase(),
                components.join("\\")
            ));
        }
        current = *parent;
    }

    None
}

fn read_cache_file(path: &Path) -> Result<HashMap<u64, String>, UsnError> {
    let mut file = fs::File::open(path)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;

    if buf.len() < 4 {
        return Err(UsnError::CorruptBatch { offset: 0 });
    }

    let count = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    let mut map = HashMap::with_capacity(count);
    let mut offset = 4;

    for _ in 0..count {
        if offset + 12 > buf.len() {
            return Err(UsnError::CorruptBatch { offset });
        }
        let frn = u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
        let len = u32::from_le_bytes(buf[offset + 8..offset + 12].try_into().unwrap()) as usize;
        offset += 12;
        if offset + len > buf.len() {
            return Err(UsnError::CorruptBatch { offset });
        }
        let path = String::from_utf8(buf[offset..offset + len].to_vec())
            .map_err(|_| UsnError::CorruptBatch { offset })?;
        offset += len;
        map.insert(frn, path);
    }

    Ok(map)
}

fn write_cache_file(path: &Path, map: &HashMap<u64, String>) -> Result<(), UsnError> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(map.len() as u32).to_le_bytes());
    for (frn, path) in map {
        buf.extend_from_slice(&frn.to_le_bytes());
        let path_bytes = path.as_bytes();
        buf.extend_from_slice(&(path_bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(path_bytes);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(path)?;
    file.write_all(&buf)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;

    fn event(frn: u64, parent_frn: u64, file_name: &str, reason: u32) -> Event {
        Event {
            usn: 1,
            timestamp: chrono::Utc::now(),
            frn,
            parent_frn,
            file_name: file_name.to_string(),
            full_path: None,
            old_path: None,
            new_path: None,
            reason: Vec::new(),
            reason_raw: reason,
            is_directory: false,
            attributes: 0,
        }
    }

    const REASON_FILE_CREATE: u32 = 0x0000_0100;
    const REASON_FILE_DELETE: u32 = 0x0000_0200;
    const REASON_RENAME_OLD_NAME: u32 = 0x0000_1000;
    const REASON_RENAME_NEW_NAME: u32 = 0x0000_2000;

    #[test]
    fn resolve_chain_stops_at_root_frn() {
        let mut staging = HashMap::new();
        staging.insert(10u64, ("temp".to_string(), ROOT_FRN));
        staging.insert(20u64, ("old.txt".to_string(), 10u64));

        let path = resolve_chain(20, &staging, 'C').unwrap();
        assert_eq!(path, "C:\\temp\\old.txt");
    }

    #[test]
    fn resolve_chain_returns_none_for_broken_link() {
        let mut staging = HashMap::new();
        staging.insert(20u64, ("orphan.txt".to_string(), 999u64));
        assert!(resolve_chain(20, &staging, 'C').is_none());
    }

    #[test]
    fn cache_round_trips_through_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache-C.bin");

        let mut map = HashMap::new();
        map.insert(1u64, "C:\\a".to_string());
        map.insert(2u64, "C:\\b\\c".to_string());

        write_cache_file(&path, &map).unwrap();
        let loaded = read_cache_file(&path).unwrap();
        assert_eq!(loaded, map);
    }

    #[test]
    fn seed_scenario_s2_rename_round_trip() {
        let resolver = PathResolver::new('C');
        resolver.inner.lock().map.insert(0x10, "C:\\temp".to_string());

        let mut old_name_event = event(0x2222, 0x10, "old.txt", REASON_RENAME_OLD_NAME);
        resolver.update(&mut old_name_event);

        let mut new_name_event = event(0x2222, 0x10, "new.txt", REASON_RENAME_NEW_NAME);
        resolver.update(&mut new_name_event);

        assert_eq!(new_name_event.old_path.as_deref(), Some("C:\\temp\\old.txt"));
        assert_eq!(new_name_event.new_path.as_deref(), Some("C:\\temp\\new.txt"));
        assert_eq!(new_name_event.full_path.as_deref(), Some("C:\\temp\\new.txt"));
        assert_eq!(
            resolver.inner.lock().map.get(&0x2222).map(String::as_str),
            Some("C:\\temp\\new.txt")
        );
    }

    #[test]
    fn seed_scenario_s3_create_then_delete() {
        let resolver = PathResolver::new('C');
        resolver.inner.lock().map.insert(0x10, "C:\\logs".to_string());

        let mut create_event = event(0x30, 0x10, "tmp.log", REASON_FILE_CREATE);
        resolver.update(&mut create_event);
        assert_eq!(create_event.full_path.as_deref(), Some("C:\\logs\\tmp.log"));

        let mut delete_event = event(0x30, 0x10, "tmp.log", REASON_FILE_DELETE);
        resolver.update(&mut delete_event);
        assert!(!resolver.inner.lock().map.contains_key(&0x30));
    }

    #[test]
    fn seed_scenario_s3_delete_is_not_resynthesized_from_parent() {
        let resolver = PathResolver::new('C');
        resolver.inner.lock().map.insert(0x10, "C:\\logs".to_string());

        let mut create_event = event(0x30, 0x10, "tmp.log", REASON_FILE_CREATE);
        resolver.update(&mut create_event);

        let mut delete_event = event(0x30, 0x10, "tmp.log", REASON_FILE_DELETE);
        resolver.update(&mut delete_event);

        // Mirrors the main loop's guard: resolve() only runs for a still-unresolved,
        // non-delete event. Running it here (as the orchestrator used to) would hit the
        // still-mapped parent 0x10 and re-insert 0x30 into the map.
        if delete_event.full_path.is_none() && !delete_event.is_delete() {
            resolver.resolve(&mut delete_event);
        }

        assert!(!resolver.inner.lock().map.contains_key(&0x30));
    }

    #[test]
    fn seed_scenario_s6_unresolved_parent_leaves_map_unchanged() {
        let resolver = PathResolver::new('C');
        let mut ev = event(0x55, 0x56, "f.txt", 0x0000_0002);
        let resolved = resolver.resolve(&mut ev);
        assert!(!resolved);
        assert!(ev.full_path.is_none());
        assert!(resolver.is_empty());
    }

    #[test]
    fn resolve_synthesizes_and_caches_from_parent() {
        let resolver = PathResolver::new('C');
        resolver.inner.lock().map.insert(0x10, "C:\\logs".to_string());

        let mut ev = event(0x99, 0x10, "new.log", 0);
        assert!(resolver.resolve(&mut ev));
        assert_eq!(ev.full_path.as_deref(), Some("C:\\logs\\new.log"));
        assert_eq!(
            resolver.inner.lock().map.get(&0x99).map(String::as_str),
            Some("C:\\logs\\new.log")
        );
    }
}
