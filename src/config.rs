//! The narrow configuration seam the core exposes to its external CLI collaborator.
//!
//! Argument parsing, `--format`/`--filter`/`--verbose` and the rest of the CLI surface
//! are out of scope here; this struct is what such a collaborator would populate.

use crate::coalescer::DEFAULT_DEBOUNCE_MS;
use crate::coalescer::MIN_DEBOUNCE_MS;

const DEFAULT_POLL_MS: u64 = 250;

/// Tunables for one [`crate::orchestrator::Orchestrator`] run.
#[derive(Debug, Clone, Copy)]
pub struct WatcherConfig {
    /// Sleep between main-loop iterations when a batch returns no records.
    pub poll_ms: u64,
    /// Coalescer quiet window, clamped to a 10 ms floor.
    pub debounce_ms: u64,
    /// Whether to kick off a background MFT scan on startup.
    pub populate_on_start: bool,
    /// Whether to stand up the named-pipe broadcaster.
    pub enable_pipe: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        WatcherConfig {
            poll_ms: DEFAULT_POLL_MS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            populate_on_start: true,
            enable_pipe: true,
        }
    }
}

impl WatcherConfig {
    pub fn debounce_ms_clamped(&self) -> u64 {
        self.debounce_ms.max(MIN_DEBOUNCE_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_defaults() {
        let config = WatcherConfig::default();
        assert_eq!(config.poll_ms, 250);
        assert_eq!(config.debounce_ms, 50);
        assert!(config.populate_on_start);
        assert!(config.enable_pipe);
    }

    #[test]
    fn debounce_is_clamped_to_ten_ms_floor() {
        let config = WatcherConfig {
            debounce_ms: 1,
            ..WatcherConfig::default()
        };
        assert_eq!(config.debounce_ms_clamped(), MIN_DEBOUNCE_MS);
    }
}
