//! Channel source trait definitions for statecast
//!
//! A channel source is the live transport the external process writes state
//! into. Two kinds exist:
//! - Pipe: a duplex byte stream with connect/read/disconnect semantics
//! - File: a watched file whose whole contents are one payload per change

use async_trait::async_trait;

use crate::record::RawPayload;

/// Transport-level failures
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// No producer is listening on the endpoint yet
    #[error("no peer listening on {endpoint}")]
    NoPeer { endpoint: String },

    /// The producer closed its end, or the watch stopped delivering events
    #[error("channel disconnected")]
    Disconnected,

    /// `read` was called before a successful `open`
    #[error("channel is not open")]
    NotOpen,

    /// Filesystem watcher failure
    #[error("watch error: {0}")]
    Watch(String),

    /// A single frame exceeded the configured size limit
    ///
    /// The frame was discarded; the channel is still open.
    #[error("frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },

    /// Any other I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    /// True when the right reaction is to reopen immediately rather than back off
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ChannelError::Disconnected)
    }

    /// True when one bad frame was dropped and the channel can keep reading
    pub fn is_bad_frame(&self) -> bool {
        matches!(self, ChannelError::FrameTooLarge { .. })
    }
}

/// A source of raw payloads
///
/// The open handle lives inside the source: `open` acquires it, `read` uses
/// it, `close` releases it. After a `Disconnected` error the caller closes and
/// reopens.
///
/// The `#[async_trait]` macro keeps the trait object safe so the ingestion
/// worker can hold a `Box<dyn ChannelSource>` chosen from configuration.
#[async_trait]
pub trait ChannelSource: Send {
    /// Returns the human-readable name of this source
    fn name(&self) -> &str;

    /// Acquire the transport
    async fn open(&mut self) -> Result<(), ChannelError>;

    /// Wait for the next complete payload
    async fn read(&mut self) -> Result<RawPayload, ChannelError>;

    /// Release the transport; a no-op when not open
    async fn close(&mut self);
}
