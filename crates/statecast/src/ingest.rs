//! Ingestion worker
//!
//! Owns the channel source and drives every payload through
//! parse -> store -> watchdog. The loop:
//!
//! 1. Open the source, backing off between failed attempts.
//! 2. Read payloads until the source disconnects or fails, then back off.
//! 3. Valid payloads replace the snapshot and disarm the watchdog; invalid
//!    ones leave the snapshot alone and arm it.
//! 4. Close the source and go back to 1.
//!
//! Bad frames and transport failures are handled here and never reach the
//! request layer. The loop only stops on cancellation, or when a bounded
//! retry policy runs out.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use statecast_core::{ChannelError, ChannelSource, ParseError, Record, SnapshotStore, Upsert};

use crate::status::StatusReporter;

/// Default delay between reconnect attempts (2 seconds)
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(2);

pub const MSG_STREAM_VALID: &str = "Valid data stream received.";
pub const MSG_STREAM_INVALID: &str = "Invalid data stream format.";

/// Reconnect policy for the channel source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fixed delay before the next attempt
    pub backoff: Duration,
    /// Consecutive failed attempts allowed before giving up (`None` = forever)
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: DEFAULT_RETRY_BACKOFF,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    fn exhausted(&self, failures: u32) -> bool {
        self.max_attempts.is_some_and(|max| failures >= max)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("{channel} source failed {attempts} times in a row, giving up")]
    RetriesExhausted { channel: String, attempts: u32 },
}

/// How one open session of the source ended
#[derive(Debug)]
enum SessionEnd {
    Cancelled,
    Disconnected { delivered: usize },
    Failed { error: ChannelError, delivered: usize },
}

/// Background loop feeding the snapshot store
pub struct IngestWorker {
    source: Box<dyn ChannelSource>,
    store: SnapshotStore,
    status: Arc<StatusReporter>,
    retry: RetryPolicy,
}

impl IngestWorker {
    pub fn new(
        source: Box<dyn ChannelSource>,
        store: SnapshotStore,
        status: Arc<StatusReporter>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            store,
            status,
            retry,
        }
    }

    /// Run until `cancel` fires or the retry policy gives up
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), WorkerError> {
        info!(source = self.source.name(), "ingestion worker started");
        let result = self.run_loop(&cancel).await;
        self.source.close().await;
        info!(source = self.source.name(), "ingestion worker stopped");
        result
    }

    async fn run_loop(&mut self, cancel: &CancellationToken) -> Result<(), WorkerError> {
        let mut failures: u32 = 0;

        loop {
            let opened = tokio::select! {
                result = self.source.open() => result,
                _ = cancel.cancelled() => return Ok(()),
            };

            if let Err(e) = opened {
                failures = failures.saturating_add(1);
                warn!(source = self.source.name(), error = %e, failures, "failed to open source");
                self.status
                    .emit(&format!("Data stream not yet ready, retrying... ({e})"));
                self.check_retries(failures)?;
                if backoff(self.retry.backoff, cancel).await {
                    return Ok(());
                }
                continue;
            }

            match self.pump(cancel).await {
                SessionEnd::Cancelled => return Ok(()),
                SessionEnd::Disconnected { delivered } => {
                    info!(source = self.source.name(), delivered, "source disconnected, reopening");
                    self.source.close().await;
                    // connected but never delivered: counts as a failed attempt
                    failures = if delivered > 0 {
                        0
                    } else {
                        failures.saturating_add(1)
                    };
                }
                SessionEnd::Failed { error, delivered } => {
                    warn!(source = self.source.name(), error = %error, "source read failed");
                    self.status
                        .emit(&format!("Error reading from data stream: {error}"));
                    self.source.close().await;
                    failures = if delivered > 0 {
                        1
                    } else {
                        failures.saturating_add(1)
                    };
                }
            }

            self.check_retries(failures)?;
            if backoff(self.retry.backoff, cancel).await {
                return Ok(());
            }
        }
    }

    /// Read and process payloads until the session ends
    async fn pump(&mut self, cancel: &CancellationToken) -> SessionEnd {
        let mut delivered = 0usize;
        loop {
            let read = tokio::select! {
                result = self.source.read() => result,
                _ = cancel.cancelled() => return SessionEnd::Cancelled,
            };

            match read {
                Ok(payload) => {
                    delivered += 1;
                    // the outcome is already logged and reported
                    let _ = self.process_payload(&payload);
                }
                Err(error) if error.is_bad_frame() => {
                    delivered += 1;
                    warn!(source = self.source.name(), error = %error, "rejected frame");
                    self.reject(MSG_STREAM_INVALID);
                }
                Err(error) if error.is_disconnect() => {
                    return SessionEnd::Disconnected { delivered };
                }
                Err(error) => return SessionEnd::Failed { error, delivered },
            }
        }
    }

    /// Parse one payload and apply it to the store
    ///
    /// A rejected payload never touches the stored record; it only arms the
    /// staleness watchdog.
    pub fn process_payload(&self, payload: &[u8]) -> Result<Upsert, ParseError> {
        match Record::parse_bytes(payload) {
            Ok(record) => {
                let id = record.id().clone();
                let upsert = self.store.accept(record.clone());
                match &upsert {
                    Upsert::Inserted => info!(id = %id, "snapshot populated"),
                    Upsert::Replaced => debug!(id = %id, "snapshot updated"),
                    Upsert::IdentityChanged { previous } => {
                        info!(id = %id, previous = %previous, "snapshot identity changed")
                    }
                }
                self.status.emit_with_record(MSG_STREAM_VALID, &record);
                Ok(upsert)
            }
            Err(e) => {
                warn!(error = %e, bytes = payload.len(), "rejected payload");
                match &e {
                    ParseError::MissingId => {
                        self.reject(&format!("Error processing data stream: {e}"))
                    }
                    _ => self.reject(MSG_STREAM_INVALID),
                }
                Err(e)
            }
        }
    }

    fn check_retries(&self, failures: u32) -> Result<(), WorkerError> {
        if self.retry.exhausted(failures) {
            let channel = self.source.name().to_string();
            self.status
                .emit(&format!("Giving up on {channel} data stream after {failures} attempts."));
            return Err(WorkerError::RetriesExhausted {
                channel,
                attempts: failures,
            });
        }
        Ok(())
    }

    /// Report a bad payload and start the staleness clock
    fn reject(&self, message: &str) {
        self.status.emit(message);
        if self.store.reject() {
            debug!(timeout = ?self.store.stream_timeout(), "staleness clock started");
        }
    }
}

/// Sleep for `delay`; returns true if cancelled meanwhile
async fn backoff(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = sleep(delay) => false,
        _ = cancel.cancelled() => true,
    }
}
