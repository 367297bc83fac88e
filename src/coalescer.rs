//! Debounces bursts of records for the same FRN into one merged event per quiet window.
//!
//! A single logical file operation (a save, a rename) typically produces several raw USN
//! records. The coalescer holds one pending, mergeable [`Event`] per FRN and flushes it
//! once `last_seen` has aged past the debounce window `W`.

use crate::event::Event;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_DEBOUNCE_MS: u64 = 50;
pub const MIN_DEBOUNCE_MS: u64 = 10;

/// Bound every task is expected to join within at shutdown.
pub const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

struct Pending {
    event: Event,
    last_seen: Instant,
}

/// Per-FRN debouncing merge buffer.
pub struct Coalescer {
    pending: DashMap<u64, Mutex<Pending>>,
    window: Duration,
}

impl Coalescer {
    /// `debounce_ms` is clamped to [`MIN_DEBOUNCE_MS`].
    pub fn new(debounce_ms: u64) -> Self {
        Coalescer {
            pending: DashMap::new(),
            window: Duration::from_millis(debounce_ms.max(MIN_DEBOUNCE_MS)),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Merges `event` into the pending slot for its FRN, creating the slot if absent.
    pub fn add(&self, event: Event) {
        match self.pending.entry(event.frn) {
            Entry::Occupied(occupied) => {
                let mut slot = occupied.get().lock();
                merge_into(&mut slot.event, event);
                slot.last_seen = Instant::now();
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Mutex::new(Pending {
                    event,
                    last_seen: Instant::now(),
                }));
            }
        }
    }

    /// Flushes every slot whose `last_seen` is at least `window` old. The flushed
    /// event's timestamp is set to flush time.
    pub fn flush_due(&self) -> Vec<Event> {
        let now = Instant::now();
        let due: Vec<u64> = self
            .pending
            .iter()
            .filter(|entry| now.duration_since(entry.value().lock().last_seen) >= self.window)
            .map(|entry| *entry.key())
            .collect();

        self.take(due)
    }

    /// Drains every pending slot unconditionally, regardless of age. Used at shutdown.
    pub fn flush_all(&self) -> Vec<Event> {
        let all: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        self.take(all)
    }

    fn take(&self, frns: Vec<u64>) -> Vec<Event> {
        let mut flushed = Vec::with_capacity(frns.len());
        for frn in frns {
            if let Some((_, slot)) = self.pending.remove(&frn) {
                let mut pending = slot.into_inner();
                pending.event.timestamp = chrono::Utc::now();
                flushed.push(pending.event);
            }
        }
        flushed
    }

    /// Spawns the periodic flush task, invoking `sink` synchronously with every
    /// non-empty batch of due events. The task exits once `token` is cancelled.
    pub fn spawn_flush_task<F>(
        self: Arc<Self>,
        token: CancellationToken,
        mut sink: F,
    ) -> JoinHandle<()>
    where
        F: FnMut(Vec<Event>) + Send + 'static,
    {
        let window = self.window;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(window);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("coalescer flush task cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        let flushed = self.flush_due();
                        if !flushed.is_empty() {
                            sink(flushed);
                        }
                    }
                }
            }
        })
    }
}

/// Cancels `token` and joins `handle`, bounded by [`SHUTDOWN_JOIN_TIMEOUT`].
pub async fn dispose(token: &CancellationToken, handle: JoinHandle<()>) {
    token.cancel();
    if tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, handle)
        .await
        .is_err()
    {
        debug!("coalescer flush task did not join within the shutdown timeout");
    }
}

fn merge_into(target: &mut Event, incoming: Event) {
    target.usn = target.usn.max(incoming.usn);
    target.timestamp = incoming.timestamp;
    target.reason_raw |= incoming.reason_raw;
    target.attributes |= incoming.attributes;
    target.is_directory = target.is_directory || incoming.is_directory;

    for token in incoming.reason {
        if !target.reason.contains(&token) {
            target.reason.push(token);
        }
    }

    if !incoming.file_name.is_empty() {
        target.file_name = incoming.file_name;
    }
    if incoming.full_path.is_some() {
        target.full_path = incoming.full_path;
    }
    if target.old_path.is_none() {
        target.old_path = incoming.old_path;
    }
    if incoming.new_path.is_some() {
        target.new_path = incoming.new_path;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ReasonToken;

    fn event(frn: u64, usn: i64, reason_raw: u32, reason: Vec<ReasonToken>) -> Event {
        Event {
            usn,
            timestamp: chrono::Utc::now(),
            frn,
            parent_frn: 0,
            file_name: "foo.txt".into(),
            full_path: None,
            old_path: None,
            new_path: None,
            reason,
            reason_raw,
            is_directory: false,
            attributes: 0,
        }
    }

    #[test]
    fn seed_scenario_s1_editor_save_merges_to_one_event() {
        let coalescer = Coalescer::new(DEFAULT_DEBOUNCE_MS);
        coalescer.add(event(0x1234, 1, 0x0000_0001, vec![ReasonToken::DataOverwrite]));
        coalescer.add(event(0x1234, 2, 0x0000_0004, vec![ReasonToken::DataTruncation]));
        coalescer.add(event(0x1234, 3, 0x8000_0000, vec![ReasonToken::Close]));

        let flushed = coalescer.flush_all();
        assert_eq!(flushed.len(), 1);
        let merged = &flushed[0];
        assert_eq!(merged.usn, 3);
        assert_eq!(merged.reason_raw, 0x8000_0005);
        assert_eq!(merged.reason.len(), 3);
    }

    #[test]
    fn merge_idempotence_adding_identical_event_twice() {
        let coalescer = Coalescer::new(DEFAULT_DEBOUNCE_MS);
        let e = event(0x1, 5, 0x0000_0001, vec![ReasonToken::DataOverwrite]);
        coalescer.add(e.clone());
        coalescer.add(e);

        let flushed = coalescer.flush_all();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].reason_raw, 0x0000_0001);
        assert_eq!(flushed[0].reason, vec![ReasonToken::DataOverwrite]);
    }

    #[test]
    fn flush_due_leaves_fresh_slots_pending() {
        let coalescer = Coalescer::new(MIN_DEBOUNCE_MS);
        coalescer.add(event(0x1, 1, 0, vec![]));
        // Not enough time has passed yet.
        assert!(coalescer.flush_due().is_empty());
    }

    #[test]
    fn flush_all_drains_every_slot_regardless_of_age() {
        let coalescer = Coalescer::new(DEFAULT_DEBOUNCE_MS);
        coalescer.add(event(0x1, 1, 0, vec![]));
        coalescer.add(event(0x2, 1, 0, vec![]));
        assert_eq!(coalescer.flush_all().len(), 2);
        assert!(coalescer.flush_all().is_empty());
    }

    #[test]
    fn old_path_keeps_first_non_empty_new_path_keeps_latest() {
        let coalescer = Coalescer::new(DEFAULT_DEBOUNCE_MS);
        let mut first = event(0x1, 1, 0, vec![]);
        first.old_path = Some("C:\\temp\\old.txt".into());
        coalescer.add(first);

        let mut second = event(0x1, 2, 0, vec![]);
        second.old_path = Some("C:\\temp\\should-not-win.txt".into());
        second.new_path = Some("C:\\temp\\new.txt".into());
        coalescer.add(second);

        let flushed = coalescer.flush_all();
        assert_eq!(flushed[0].old_path.as_deref(), Some("C:\\temp\\old.txt"));
        assert_eq!(flushed[0].new_path.as_deref(), Some("C:\\temp\\new.txt"));
    }
}
