//! Wires the volume, journal reader, path resolver, coalescer, cursor store, and pipe
//! broadcaster into one running daemon.

use crate::coalescer::{self, Coalescer};
use crate::config::WatcherConfig;
use crate::cursor_store::{self, CursorRecord};
use crate::errors::UsnError;
use crate::event::Event;
use crate::journal::{CursorOutcome, JournalReader, REASON_MASK_ALL};
use crate::path_resolver::PathResolver;
use crate::pipe::PipeBroadcaster;
use crate::serialize::{control_to_line, event_to_line, ControlMessage};
use crate::volume::Volume;
use directories::ProjectDirs;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const CURSOR_PERSIST_INTERVAL: Duration = Duration::from_secs(30);

/// Event and batch totals printed at shutdown.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunStats {
    pub events: u64,
    pub batches: u64,
}

/// Resolves the two per-user application-data paths ([`cursor_store`]'s `cursor.json`
/// and the FRN cache's `cache-<LETTER>.bin`) this run persists to, if a data directory
/// can be resolved on this platform.
fn state_paths(drive_letter: char) -> Option<(PathBuf, PathBuf)> {
    let dirs = ProjectDirs::from("", "", "usn-watcher")?;
    let cursor_path = dirs.data_dir().join("cursor.json");
    let cache_path = dirs
        .data_dir()
        .join(format!("cache-{}.bin", drive_letter.to_ascii_uppercase()));
    Some((cursor_path, cache_path))
}

/// Drives one volume's change stream end to end until cancelled.
pub struct Orchestrator {
    volume: Arc<Volume>,
    config: WatcherConfig,
}

impl Orchestrator {
    pub fn new(volume: Volume, config: WatcherConfig) -> Self {
        Orchestrator {
            volume: Arc::new(volume),
            config,
        }
    }

    /// Runs until `token` is cancelled, then drains the coalescer, persists state, and
    /// returns the totals observed.
    pub async fn run(self, token: CancellationToken) -> Result<RunStats, UsnError> {
        let drive_letter = self.volume.drive_letter();
        let paths = state_paths(drive_letter);

        let resolver = Arc::new(PathResolver::new(drive_letter));
        let loaded_cache = paths
            .as_ref()
            .map(|(_, cache_path)| resolver.try_load_cache(cache_path))
            .unwrap_or(false);

        let pipe = if self.config.enable_pipe {
            let broadcaster = PipeBroadcaster::new();
            match broadcaster.clone().spawn_accept_loop(drive_letter, token.clone()) {
                Ok(handle) => Some((broadcaster, handle)),
                Err(err) => {
                    warn!("failed to start pipe broadcaster for {}: {}", drive_letter, err);
                    None
                }
            }
        } else {
            None
        };
        let broadcaster = pipe.as_ref().map(|(b, _)| b.clone());

        let populate_handle = if self.config.populate_on_start || !loaded_cache {
            Some(spawn_populate(self.volume.clone(), resolver.clone()))
        } else {
            None
        };

        let mut reader = JournalReader::new(&self.volume);
        let mut pending_gap: Option<ControlMessage> = None;

        match paths
            .as_ref()
            .and_then(|(cursor_path, _)| cursor_store::load(cursor_path, drive_letter))
        {
            None => {
                reader.initialize()?;
                info!("no stored cursor for {}:, starting at live tail", drive_letter);
            }
            Some(record) => {
                let stored_journal_id = record.journal_id_value();
                let outcome = reader.set_cursor(record.next_usn)?;
                if stored_journal_id != Some(reader.journal_id()) {
                    pending_gap = Some(ControlMessage::journal_recreated());
                    reader.initialize()?;
                } else if let CursorOutcome::Wrapped { from, to } = outcome {
                    pending_gap = Some(ControlMessage::journal_wrapped(from, to));
                }
            }
        }

        if let Some(message) = pending_gap {
            emit_control(&message, broadcaster.as_deref());
        }

        let coalescer = Arc::new(Coalescer::new(self.config.debounce_ms_clamped()));
        let flush_sink_broadcaster = broadcaster.clone();
        let flush_handle = coalescer.clone().spawn_flush_task(token.clone(), move |events| {
            for event in events {
                emit_event(&event, flush_sink_broadcaster.as_deref());
            }
        });

        let stats = self
            .main_loop(&mut reader, &resolver, &coalescer, &token, &broadcaster, paths.as_ref())
            .await?;

        coalescer::dispose(&token, flush_handle).await;
        for event in coalescer.flush_all() {
            emit_event(&event, broadcaster.as_deref());
        }

        if let Some((cursor_path, cache_path)) = &paths {
            cursor_store::save(
                cursor_path,
                &CursorRecord::new(drive_letter, reader.journal_id(), reader.cursor()),
            );
            resolver.save_cache(cache_path);
        }

        if let Some((_, handle)) = pipe {
            token.cancel();
            let _ = tokio::time::timeout(coalescer::SHUTDOWN_JOIN_TIMEOUT, handle).await;
        }
        if let Some(handle) = populate_handle {
            let _ = tokio::time::timeout(coalescer::SHUTDOWN_JOIN_TIMEOUT, handle).await;
        }

        info!(
            "usn-watcher for {}: stopped after {} events in {} batches",
            drive_letter, stats.events, stats.batches
        );

        Ok(stats)
    }

    async fn main_loop(
        &self,
        reader: &mut JournalReader<'_>,
        resolver: &Arc<PathResolver>,
        coalescer: &Arc<Coalescer>,
        token: &CancellationToken,
        broadcaster: &Option<Arc<PipeBroadcaster>>,
        paths: Option<&(PathBuf, PathBuf)>,
    ) -> Result<RunStats, UsnError> {
        let drive_letter = self.volume.drive_letter();
        let mut stats = RunStats::default();
        let mut last_persist = tokio::time::Instant::now();
        let poll = Duration::from_millis(self.config.poll_ms);

        loop {
            if token.is_cancelled() {
                break;
            }

            match reader.read_batch(REASON_MASK_ALL) {
                Ok(events) => {
                    stats.batches += 1;
                    stats.events += events.len() as u64;
                    for mut event in events {
                        resolver.update(&mut event);
                        if event.full_path.is_none() && !event.is_delete() {
                            resolver.resolve(&mut event);
                        }
                        coalescer.add(event);
                    }
                }
                Err(UsnError::Wrapped { from, to }) => {
                    warn!("journal wrapped for {}: stored={}, first_usn={}", drive_letter, from, to);
                    emit_control(&ControlMessage::journal_wrapped(from, to), broadcaster.as_deref());
                }
                Err(UsnError::CorruptBatch { offset }) => {
                    warn!("corrupt USN batch for {} at offset {}, skipping", drive_letter, offset);
                }
                Err(err) => {
                    error!("error reading USN journal for {}: {}", drive_letter, err);
                }
            }

            if let Some((cursor_path, _)) = paths {
                if last_persist.elapsed() >= CURSOR_PERSIST_INTERVAL {
                    cursor_store::save(
                        cursor_path,
                        &CursorRecord::new(drive_letter, reader.journal_id(), reader.cursor()),
                    );
                    last_persist = tokio::time::Instant::now();
                }
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(poll) => {}
            }
        }

        Ok(stats)
    }
}

fn spawn_populate(volume: Arc<Volume>, resolver: Arc<PathResolver>) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let added = resolver.populate(&volume);
        info!("populate for {}: added {} paths", volume.drive_letter(), added);
    })
}

fn emit_event(event: &Event, broadcaster: Option<&PipeBroadcaster>) {
    match event_to_line(event) {
        Ok(line) => emit_line(&line, broadcaster),
        Err(err) => error!("failed to serialize event: {}", err),
    }
}

fn emit_control(message: &ControlMessage, broadcaster: Option<&PipeBroadcaster>) {
    match control_to_line(message) {
        Ok(line) => emit_line(&line, broadcaster),
        Err(err) => error!("failed to serialize control message: {}", err),
    }
}

fn emit_line(line: &str, broadcaster: Option<&PipeBroadcaster>) {
    println!("{line}");
    if let Some(broadcaster) = broadcaster {
        broadcaster.broadcast(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_paths_names_cache_file_by_uppercase_drive_letter() {
        if let Some((cursor_path, cache_path)) = state_paths('d') {
            assert_eq!(cursor_path.file_name().unwrap(), "cursor.json");
            assert_eq!(cache_path.file_name().unwrap(), "cache-D.bin");
        }
    }
}
