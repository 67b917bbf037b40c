//! Read-only snapshot access for the request layer

use std::sync::Arc;

use serde::Serialize;

use crate::record::Record;
use crate::store::SnapshotStore;

/// The view handed to consumers
///
/// `record` is `None` when nothing has been received yet or the feed went
/// stale; that is "no current data", not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub record: Option<Arc<Record>>,
    pub update_pending: bool,
}

impl Snapshot {
    pub fn has_data(&self) -> bool {
        self.record.is_some()
    }
}

/// Read-only accessor over a [`SnapshotStore`]
///
/// Handed to request handlers instead of the store itself so that nothing on
/// the serving side can mutate the snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotPresenter {
    store: SnapshotStore,
}

impl SnapshotPresenter {
    pub fn new(store: SnapshotStore) -> Self {
        Self { store }
    }

    /// Current record plus the update-pending flag
    ///
    /// Only takes the store lock long enough to clone an `Arc`; never waits
    /// on the ingestion worker.
    pub fn get(&self) -> Snapshot {
        Snapshot {
            record: self.store.read(),
            update_pending: self.store.update_pending(),
        }
    }
}
