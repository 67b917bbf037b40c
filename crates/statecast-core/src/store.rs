//! Single-slot snapshot store
//!
//! The store holds at most one record: the latest accepted state of the
//! external process. The record and the staleness watchdog live behind one
//! mutex so that "write record, disarm watchdog" and "watchdog fired, clear
//! record" can never interleave. Readers get an `Arc<Record>` clone, so they
//! observe either the previous or the new record in full.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::record::Record;
use crate::watchdog::{Arming, Watchdog, WatchdogState};

/// What an upsert did to the slot
///
/// The slot is always replaced; the variant only informs logging.
#[derive(Debug, Clone, PartialEq)]
pub enum Upsert {
    /// The store was empty
    Inserted,
    /// A record with the same identifier was replaced
    Replaced,
    /// A record with a different identifier was replaced
    IdentityChanged { previous: Value },
}

#[derive(Debug)]
struct StoreState {
    current: Option<Arc<Record>>,
    watchdog: Watchdog,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<StoreState>,
    update_pending: AtomicBool,
}

/// Shared handle to the snapshot store
///
/// Cloning is cheap; all clones refer to the same slot.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    inner: Arc<Inner>,
}

impl SnapshotStore {
    /// Create an empty store whose watchdog clears it after `stream_timeout`
    pub fn new(stream_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(StoreState {
                    current: None,
                    watchdog: Watchdog::new(stream_timeout),
                }),
                update_pending: AtomicBool::new(false),
            }),
        }
    }

    // A panic while holding the lock cannot leave a torn record behind (the
    // slot is a single Arc swap), so poisoning is safe to ignore.
    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The current record, if any
    pub fn read(&self) -> Option<Arc<Record>> {
        self.lock().current.clone()
    }

    /// Replace the slot with `record`
    pub fn upsert(&self, record: Record) -> Upsert {
        let mut state = self.lock();
        Self::upsert_locked(&mut state, record)
    }

    fn upsert_locked(state: &mut StoreState, record: Record) -> Upsert {
        let outcome = match &state.current {
            None => Upsert::Inserted,
            Some(previous) if previous.id() == record.id() => Upsert::Replaced,
            Some(previous) => Upsert::IdentityChanged {
                previous: previous.id().clone(),
            },
        };
        state.current = Some(Arc::new(record));
        outcome
    }

    /// Empty the slot
    ///
    /// Returns true if a record was removed. In normal operation only the
    /// watchdog's fire action calls this.
    pub fn clear(&self) -> bool {
        self.lock().current.take().is_some()
    }

    /// Start the staleness clock after an invalid payload
    ///
    /// Returns true if the watchdog was newly armed, false if a deadline was
    /// already pending. Must be called from within a tokio runtime.
    pub fn on_invalid_payload(&self) -> bool {
        let arming = {
            let mut state = self.lock();
            state.watchdog.arm(Instant::now())
        };
        match arming {
            Some(arming) => {
                debug!(deadline = ?arming.deadline, "staleness watchdog armed");
                self.schedule(arming);
                true
            }
            None => false,
        }
    }

    /// Cancel a pending staleness clear after a valid payload
    ///
    /// Returns true if a pending clear was cancelled.
    pub fn on_valid_payload(&self) -> bool {
        let disarmed = self.lock().watchdog.disarm();
        if disarmed {
            debug!("staleness watchdog disarmed");
        }
        disarmed
    }

    /// Store `record` and disarm the watchdog as one atomic step
    pub fn accept(&self, record: Record) -> Upsert {
        let (outcome, disarmed) = {
            let mut state = self.lock();
            let outcome = Self::upsert_locked(&mut state, record);
            (outcome, state.watchdog.disarm())
        };
        if disarmed {
            debug!("staleness watchdog disarmed");
        }
        outcome
    }

    /// Reject a payload: the slot is left alone and the staleness clock starts
    ///
    /// Counterpart of [`accept`](Self::accept); same transition as
    /// [`on_invalid_payload`](Self::on_invalid_payload).
    pub fn reject(&self) -> bool {
        self.on_invalid_payload()
    }

    /// Snapshot of the watchdog state
    pub fn watchdog_state(&self) -> WatchdogState {
        self.lock().watchdog.state().clone()
    }

    /// The configured staleness timeout
    pub fn stream_timeout(&self) -> Duration {
        self.lock().watchdog.timeout()
    }

    /// Whether a newer release has been published
    pub fn update_pending(&self) -> bool {
        self.inner.update_pending.load(Ordering::Acquire)
    }

    pub fn set_update_pending(&self, pending: bool) {
        self.inner.update_pending.store(pending, Ordering::Release);
    }

    fn schedule(&self, arming: Arming) {
        let store = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(arming.deadline) => {
                    store.fire(arming.generation);
                }
                _ = arming.cancel.cancelled() => {}
            }
        });
    }

    fn fire(&self, generation: u64) {
        let cleared = {
            let mut state = self.lock();
            if !state.watchdog.expire(generation) {
                // disarmed between the deadline and taking the lock
                return;
            }
            state.current.take().is_some()
        };
        warn!(cleared, "data stream stale, snapshot cleared");
    }
}
