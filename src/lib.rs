//! # usn-watcher
//!
//! A volume-wide filesystem-change streaming daemon for NTFS volumes, built on the
//! USN change journal and the Master File Table (MFT).
//!
//! It reads the kernel-maintained USN change journal, resolves raw change records into
//! a stable, path-resolved, deduplicated event stream, and broadcasts that stream as
//! newline-delimited JSON over standard output and named-pipe subscribers. It survives
//! daemon restarts without losing or duplicating events, as long as the journal has not
//! wrapped past the stored cursor.
//!
//! ## Example: running one volume
//! ```no_run
//! use usn_watcher::config::WatcherConfig;
//! use usn_watcher::orchestrator::Orchestrator;
//! use usn_watcher::volume::Volume;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), usn_watcher::errors::UsnError> {
//! let volume = Volume::open('C')?;
//! let orchestrator = Orchestrator::new(volume, WatcherConfig::default());
//! let token = CancellationToken::new();
//! orchestrator.run(token).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform
//! - Windows NTFS volumes only.
//! - Requires administrator privileges to access the USN journal.

pub mod coalescer;
pub mod config;
pub mod cursor_store;
pub mod errors;
pub mod event;
pub mod journal;
pub mod mft;
pub mod orchestrator;
pub mod path_resolver;
pub mod pipe;
mod privilege;
pub mod record;
pub mod serialize;
mod time;
pub mod volume;

pub use errors::UsnError;
pub use journal::Usn;

/// A convenient type alias for Results with UsnError.
pub type UsnResult<T> = std::result::Result<T, UsnError>;
