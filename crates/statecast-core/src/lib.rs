//! statecast-core: Shared types and traits for statecast
//!
//! This crate provides the snapshot model, the staleness watchdog, and the
//! channel source trait used by the statecast ingestion pipeline.
//!
//! ## Modules
//!
//! - [`record`] - Record type and payload parsing
//! - [`store`] - Single-slot snapshot store guarded together with the watchdog
//! - [`watchdog`] - Staleness watchdog state machine
//! - [`presenter`] - Read-only snapshot accessor for the request layer
//! - [`source`] - Channel source trait and transport errors

pub mod presenter;
pub mod record;
pub mod source;
pub mod store;
pub mod watchdog;

pub use presenter::{Snapshot, SnapshotPresenter};
pub use record::{ID_FIELD, ParseError, RawPayload, Record};
pub use source::{ChannelError, ChannelSource};
pub use store::{SnapshotStore, Upsert};
pub use watchdog::{DEFAULT_STREAM_TIMEOUT, WatchdogState};
