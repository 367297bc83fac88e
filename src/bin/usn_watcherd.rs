//! Minimal process entry point: `usn-watcherd <drive-letter>`.
//!
//! Argument parsing beyond the single positional drive letter, service-controller
//! integration, and log-file redirection are all external collaborators' concerns; this
//! binary only wires `Volume::open` to `Orchestrator::run`.

use std::process::ExitCode;

use tokio_util::sync::CancellationToken;
use usn_watcher::config::WatcherConfig;
use usn_watcher::errors::UsnError;
use usn_watcher::orchestrator::Orchestrator;
use usn_watcher::volume::Volume;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let drive_letter = match std::env::args().nth(1).and_then(|arg| arg.chars().next()) {
        Some(letter) => letter,
        None => {
            eprintln!("usage: usn-watcherd <drive-letter>");
            return ExitCode::FAILURE;
        }
    };

    let volume = match Volume::open(drive_letter) {
        Ok(volume) => volume,
        Err(UsnError::PermissionDenied) => {
            eprintln!("usn-watcherd: administrator privileges are required");
            return ExitCode::FAILURE;
        }
        Err(err) => {
            eprintln!("usn-watcherd: failed to open volume {drive_letter}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let token = CancellationToken::new();
    let shutdown_token = token.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown_token.cancel();
    });

    let orchestrator = Orchestrator::new(volume, WatcherConfig::default());
    match orchestrator.run(token).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(UsnError::JournalDisabled) => {
            eprintln!("usn-watcherd: USN journal is not active on {drive_letter}:");
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("usn-watcherd: fatal error: {err}");
            ExitCode::FAILURE
        }
    }
}
