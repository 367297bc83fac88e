//! Broadcasts NDJSON lines to every subscriber connected to this volume's named pipe.
//!
//! One local pipe per volume, `\\.\pipe\usn-watcher-<LETTER>`, message-mode, UTF-8 lines.
//! Delivery is best-effort: a subscriber that can't keep up is evicted rather than
//! allowed to slow down the broadcaster.

use crate::errors::UsnError;
use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const SUBSCRIBER_WRITE_TIMEOUT: Duration = Duration::from_millis(500);
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

/// Listens on one volume's named pipe and fans broadcast lines out to every connection.
pub struct PipeBroadcaster {
    subscribers: Mutex<Vec<mpsc::Sender<String>>>,
}

impl PipeBroadcaster {
    pub fn new() -> Arc<Self> {
        Arc::new(PipeBroadcaster {
            subscribers: Mutex::new(Vec::new()),
        })
    }

    pub fn pipe_name(drive_letter: char) -> String {
        format!(r"\\.\pipe\usn-watcher-{}", drive_letter.to_ascii_uppercase())
    }

    /// Broadcasts one NDJSON line to every connected subscriber. A snapshot of senders
    /// is taken under the lock and written to outside of it, per the spec's broadcaster
    /// policy. A subscriber whose channel is full has this line dropped for them; it
    /// will be evicted by its handler task once its write timeout trips.
    pub fn broadcast(&self, line: &str) {
        let snapshot: Vec<mpsc::Sender<String>> = self.subscribers.lock().clone();
        for sender in snapshot {
            let _ = sender.try_send(line.to_string());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn add_subscriber(&self, sender: mpsc::Sender<String>) {
        self.subscribers.lock().push(sender);
    }

    fn evict_closed(&self) {
        self.subscribers.lock().retain(|sender| !sender.is_closed());
    }

    /// Spawns the accept loop for this volume's pipe. Runs until `token` is cancelled.
    pub fn spawn_accept_loop(
        self: Arc<Self>,
        drive_letter: char,
        token: CancellationToken,
    ) -> Result<JoinHandle<()>, UsnError> {
        let pipe_name = Self::pipe_name(drive_letter);
        let mut server = ServerOptions::new()
            .first_pipe_instance(true)
            .create(&pipe_name)?;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("pipe accept loop for {} cancelled", pipe_name);
                        break;
                    }
                    result = server.connect() => {
                        if let Err(err) = result {
                            warn!("pipe accept error on {}: {}", pipe_name, err);
                            break;
                        }

                        let next = match ServerOptions::new().create(&pipe_name) {
                            Ok(next) => next,
                            Err(err) => {
                                warn!("failed to create next pipe instance for {}: {}", pipe_name, err);
                                break;
                            }
                        };
                        let connected = std::mem::replace(&mut server, next);
                        self.clone().spawn_subscriber_handler(connected, token.clone());
                    }
                }
            }
        });

        Ok(handle)
    }

    fn spawn_subscriber_handler(self: Arc<Self>, mut pipe: NamedPipeServer, token: CancellationToken) {
        let (tx, mut rx) = mpsc::channel::<String>(SUBSCRIBER_CHANNEL_CAPACITY);
        self.add_subscriber(tx);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    maybe_line = rx.recv() => {
                        let Some(line) = maybe_line else { break };
                        let write = async {
                            pipe.write_all(line.as_bytes()).await?;
                            pipe.write_all(b"\n").await
                        };
                        match tokio::time::timeout(SUBSCRIBER_WRITE_TIMEOUT, write).await {
                            Ok(Ok(())) => {}
                            Ok(Err(err)) => {
                                debug!("evicting pipe subscriber after write error: {}", err);
                                break;
                            }
                            Err(_) => {
                                debug!("evicting pipe subscriber after write timeout");
                                break;
                            }
                        }
                    }
                }
            }
            self.evict_closed();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipe_name_uppercases_the_drive_letter() {
        assert_eq!(PipeBroadcaster::pipe_name('c'), r"\\.\pipe\usn-watcher-C");
        assert_eq!(PipeBroadcaster::pipe_name('D'), r"\\.\pipe\usn-watcher-D");
    }

    #[test]
    fn new_broadcaster_has_no_subscribers() {
        let broadcaster = PipeBroadcaster::new();
        assert_eq!(broadcaster.subscriber_count(), 0);
        // Broadcasting with nobody connected must not panic.
        broadcaster.broadcast("{}");
    }
}
