//! Staleness watchdog state machine
//!
//! The watchdog distinguishes a single bad frame from a broken feed. The first
//! invalid payload arms it with a deadline; later invalid payloads leave that
//! deadline alone. Any valid payload disarms it. If the deadline passes while
//! armed, the owner clears the snapshot and the watchdog returns to
//! `Disarmed`.
//!
//! This type only tracks state. Scheduling the timer and clearing the store
//! is done by [`SnapshotStore`](crate::store::SnapshotStore), which holds the
//! watchdog under the same lock as the record.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default staleness timeout (10 seconds)
pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Current watchdog state
#[derive(Debug, Clone, Default)]
pub enum WatchdogState {
    /// No clear action is pending
    #[default]
    Disarmed,
    /// A clear action is scheduled for `deadline`
    Armed {
        deadline: Instant,
        generation: u64,
        cancel: CancellationToken,
    },
}

/// A freshly armed timer that the caller must schedule
#[derive(Debug, Clone)]
pub(crate) struct Arming {
    pub deadline: Instant,
    pub generation: u64,
    pub cancel: CancellationToken,
}

/// Rearmable single-shot staleness timer
#[derive(Debug)]
pub(crate) struct Watchdog {
    timeout: Duration,
    state: WatchdogState,
    generation: u64,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            state: WatchdogState::Disarmed,
            generation: 0,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn state(&self) -> &WatchdogState {
        &self.state
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state, WatchdogState::Armed { .. })
    }

    /// Arm the watchdog if it is disarmed
    ///
    /// Returns the new arming for the caller to schedule, or `None` when a
    /// deadline is already pending (the deadline is never extended).
    pub fn arm(&mut self, now: Instant) -> Option<Arming> {
        if self.is_armed() {
            return None;
        }

        self.generation = self.generation.wrapping_add(1);
        let arming = Arming {
            deadline: now + self.timeout,
            generation: self.generation,
            cancel: CancellationToken::new(),
        };
        self.state = WatchdogState::Armed {
            deadline: arming.deadline,
            generation: arming.generation,
            cancel: arming.cancel.clone(),
        };
        Some(arming)
    }

    /// Cancel any pending clear action
    ///
    /// Returns true if the watchdog was armed.
    pub fn disarm(&mut self) -> bool {
        match std::mem::take(&mut self.state) {
            WatchdogState::Armed { cancel, .. } => {
                cancel.cancel();
                true
            }
            WatchdogState::Disarmed => false,
        }
    }

    /// Consume the arming identified by `generation` when its deadline passes
    ///
    /// Returns true if that arming was still pending, meaning the caller must
    /// run the clear action. A stale generation (disarmed, or disarmed and
    /// re-armed since) returns false and leaves the state untouched.
    pub fn expire(&mut self, generation: u64) -> bool {
        match &self.state {
            WatchdogState::Armed {
                generation: armed, ..
            } if *armed == generation => {
                self.state = WatchdogState::Disarmed;
                true
            }
            _ => false,
        }
    }
}
