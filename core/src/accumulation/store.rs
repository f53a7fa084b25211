use crate::accumulation::model::{DriftHistory, HistoryKey, HistoryStatus};
use crate::error::{CoreError, CoreResult};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Persistence for drift histories.
///
/// Implementations must make `insert_if_absent` and `update_if_version`
/// atomic with respect to each other; the engine relies on them for
/// optimistic concurrency and never holds a lock across calls.
pub trait DriftHistoryStore: Send + Sync {
    /// The accumulating history for `key`, if any.
    fn find_accumulating(&self, key: &HistoryKey) -> CoreResult<Option<DriftHistory>>;

    fn get(&self, workspace_id: &str, history_id: &str) -> CoreResult<Option<DriftHistory>>;

    /// Insert `history` unless an accumulating history already exists for
    /// its key. Returns whichever row is now current.
    fn insert_if_absent(&self, history: DriftHistory) -> CoreResult<DriftHistory>;

    /// Replace the stored row when its version still equals
    /// `expected_version`. On success the stored row, with its version
    /// bumped, is returned; `None` means another writer got there first.
    fn update_if_version(
        &self,
        history: &DriftHistory,
        expected_version: u64,
    ) -> CoreResult<Option<DriftHistory>>;

    fn list(&self, workspace_id: &str) -> CoreResult<Vec<DriftHistory>>;
}

/// Newest accumulating history for `key` among `rows`.
pub(crate) fn pick_accumulating<'a>(
    rows: impl Iterator<Item = &'a DriftHistory>,
    key: &HistoryKey,
) -> Option<&'a DriftHistory> {
    rows.filter(|h| h.status == HistoryStatus::Accumulating)
        .filter(|h| {
            h.workspace_id == key.workspace_id
                && h.doc_system == key.doc_system
                && h.doc_id == key.doc_id
        })
        .max_by_key(|h| h.window_start_ms)
}

type RowKey = (String, String);

#[derive(Default)]
pub struct InMemoryHistoryStore {
    rows: Mutex<BTreeMap<RowKey, DriftHistory>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> CoreResult<MutexGuard<'_, BTreeMap<RowKey, DriftHistory>>> {
        self.rows
            .lock()
            .map_err(|_| CoreError::Store("history store mutex poisoned".to_string()))
    }
}

impl DriftHistoryStore for InMemoryHistoryStore {
    fn find_accumulating(&self, key: &HistoryKey) -> CoreResult<Option<DriftHistory>> {
        let rows = self.rows()?;
        Ok(pick_accumulating(rows.values(), key).cloned())
    }

    fn get(&self, workspace_id: &str, history_id: &str) -> CoreResult<Option<DriftHistory>> {
        let rows = self.rows()?;
        Ok(rows
            .get(&(workspace_id.to_string(), history_id.to_string()))
            .cloned())
    }

    fn insert_if_absent(&self, history: DriftHistory) -> CoreResult<DriftHistory> {
        let mut rows = self.rows()?;
        if let Some(existing) = pick_accumulating(rows.values(), &history.key()) {
            return Ok(existing.clone());
        }
        let row_key = (history.workspace_id.clone(), history.id.clone());
        if rows.contains_key(&row_key) {
            return Err(CoreError::Store(format!(
                "drift history {} already exists",
                history.id
            )));
        }
        rows.insert(row_key, history.clone());
        Ok(history)
    }

    fn update_if_version(
        &self,
        history: &DriftHistory,
        expected_version: u64,
    ) -> CoreResult<Option<DriftHistory>> {
        let mut rows = self.rows()?;
        let row_key = (history.workspace_id.clone(), history.id.clone());
        let Some(stored) = rows.get_mut(&row_key) else {
            return Err(CoreError::HistoryNotFound {
                workspace_id: history.workspace_id.clone(),
                history_id: history.id.clone(),
            });
        };
        if stored.version != expected_version {
            return Ok(None);
        }
        let mut next = history.clone();
        next.version = expected_version + 1;
        *stored = next.clone();
        Ok(Some(next))
    }

    fn list(&self, workspace_id: &str) -> CoreResult<Vec<DriftHistory>> {
        let rows = self.rows()?;
        Ok(rows
            .values()
            .filter(|h| h.workspace_id == workspace_id)
            .cloned()
            .collect())
    }
}
