use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invariant {invariant_id} is disabled")]
    InvariantDisabled { invariant_id: String },

    #[error("left and right snapshots are required (missing: {missing})")]
    MissingSnapshots { missing: String },

    #[error("no comparator registered for type {0}")]
    UnknownComparator(String),

    #[error("comparator type {0} is already registered")]
    DuplicateComparator(String),

    #[error("comparator {comparator_type} timed out after {elapsed_ms} ms")]
    Timeout {
        comparator_type: String,
        elapsed_ms: u64,
    },

    #[error("drift history {history_id} not found in workspace {workspace_id}")]
    HistoryNotFound {
        workspace_id: String,
        history_id: String,
    },

    #[error("drift history {history_id} is {status} and no longer accepts drifts")]
    HistoryClosed { history_id: String, status: String },

    #[error("drift history {history_id} update conflicted {attempts} times")]
    ConcurrencyConflict { history_id: String, attempts: u32 },

    #[error("drift records missing for bundle: {0}")]
    DriftRecordsMissing(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
