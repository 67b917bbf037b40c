//! De-duplicated status messages
//!
//! Human-readable status lines ("stream ok", "stream invalid", ...) are shown
//! on stdout and optionally appended to a status file. A line identical to the
//! previous one is suppressed, so a steady stream of valid (or invalid)
//! payloads produces one line per transition rather than one per payload.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use statecast_core::Record;
use tracing::{info, warn};

/// Width of the `=` rule separating status file entries
pub const RULE_WIDTH: usize = 80;

/// Status sink shared by the ingestion worker and the version check
#[derive(Debug)]
pub struct StatusReporter {
    last: Mutex<Option<String>>,
    file: Option<PathBuf>,
    echo: bool,
}

impl StatusReporter {
    /// Create a reporter that prints to stdout and, if `file` is set, appends there
    pub fn new(file: Option<PathBuf>) -> Self {
        Self {
            last: Mutex::new(None),
            file,
            echo: true,
        }
    }

    /// Disable the stdout echo (messages still go to tracing and the file)
    #[cfg(test)]
    pub fn quiet(mut self) -> Self {
        self.echo = false;
        self
    }

    /// Emit `message` unless it repeats the previous one
    ///
    /// Returns true if the message was emitted.
    pub fn emit(&self, message: &str) -> bool {
        self.emit_inner(message, None)
    }

    /// Emit `message` with the record that triggered it
    ///
    /// The record is only written to the status file; de-duplication looks at
    /// the message alone.
    pub fn emit_with_record(&self, message: &str, record: &Record) -> bool {
        self.emit_inner(message, Some(record))
    }

    /// The most recently emitted message
    #[cfg(test)]
    pub fn last_message(&self) -> Option<String> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn emit_inner(&self, message: &str, record: Option<&Record>) -> bool {
        {
            let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            if last.as_deref() == Some(message) {
                return false;
            }
            *last = Some(message.to_string());
        }

        info!(target: "statecast::status", "{}", message);
        if self.echo {
            println!("{}", message);
        }

        if let Some(path) = &self.file {
            if let Err(e) = append_entry(path, message, record) {
                warn!(path = ?path, error = %e, "failed to write status file");
            }
        }
        true
    }
}

/// Render one status file entry
pub fn format_entry(message: &str, record: Option<&Record>) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut entry = format!("{rule}\n{message}\n");
    if let Some(record) = record {
        let json = serde_json::to_string(record).unwrap_or_default();
        entry.push_str(&format!("{rule}\n{json}\n"));
    }
    entry
}

fn append_entry(path: &Path, message: &str, record: Option<&Record>) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(format_entry(message, record).as_bytes())
}
