use crate::comparator::types::Severity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MS_PER_DAY: i64 = 86_400_000;

/// Identity of the document a history accumulates drift for.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HistoryKey {
    pub workspace_id: String,
    pub doc_system: String,
    pub doc_id: String,
}

impl HistoryKey {
    pub fn new(
        workspace_id: impl Into<String>,
        doc_system: impl Into<String>,
        doc_id: impl Into<String>,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            doc_system: doc_system.into(),
            doc_id: doc_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Accumulating,
    Bundled,
    Expired,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStatus::Accumulating => "accumulating",
            HistoryStatus::Bundled => "bundled",
            HistoryStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, HistoryStatus::Accumulating)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BundleTrigger {
    ThresholdReached,
    WindowExpired,
}

impl BundleTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            BundleTrigger::ThresholdReached => "threshold_reached",
            BundleTrigger::WindowExpired => "window_expired",
        }
    }
}

/// Drift accumulated for one document over one time window.
///
/// `version` is bumped by the store on every successful conditional update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriftHistory {
    pub id: String,
    pub workspace_id: String,
    pub doc_system: String,
    pub doc_id: String,
    pub doc_title: String,
    pub window_start_ms: i64,
    pub window_end_ms: i64,
    pub drift_count: u32,
    pub skipped_drift_count: u32,
    pub total_materiality: f64,
    pub average_materiality: f64,
    pub drift_type_breakdown: BTreeMap<String, u32>,
    pub accumulated_drift_ids: Vec<String>,
    pub status: HistoryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundled_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundled_drift_id: Option<String>,
    pub version: u64,
}

impl DriftHistory {
    pub fn open(
        id: String,
        key: &HistoryKey,
        doc_title: &str,
        now_ms: i64,
        window_days: u32,
    ) -> Self {
        Self {
            id,
            workspace_id: key.workspace_id.clone(),
            doc_system: key.doc_system.clone(),
            doc_id: key.doc_id.clone(),
            doc_title: doc_title.to_string(),
            window_start_ms: now_ms,
            window_end_ms: now_ms.saturating_add(i64::from(window_days) * MS_PER_DAY),
            drift_count: 0,
            skipped_drift_count: 0,
            total_materiality: 0.0,
            average_materiality: 0.0,
            drift_type_breakdown: BTreeMap::new(),
            accumulated_drift_ids: Vec::new(),
            status: HistoryStatus::Accumulating,
            bundled_at_ms: None,
            bundled_drift_id: None,
            version: 0,
        }
    }

    pub fn key(&self) -> HistoryKey {
        HistoryKey::new(&self.workspace_id, &self.doc_system, &self.doc_id)
    }

    /// In-memory half of `record_drift`; persistence is the caller's job.
    pub fn apply_drift(
        &mut self,
        drift_id: &str,
        drift_type: &str,
        materiality: f64,
        skipped: bool,
    ) {
        if skipped {
            self.skipped_drift_count += 1;
        } else {
            self.drift_count += 1;
        }
        self.total_materiality += materiality;
        self.average_materiality = if self.drift_count == 0 {
            0.0
        } else {
            self.total_materiality / f64::from(self.drift_count)
        };
        *self
            .drift_type_breakdown
            .entry(drift_type.to_string())
            .or_insert(0) += 1;
        self.accumulated_drift_ids.push(drift_id.to_string());
    }

    pub fn window_closed(&self, now_ms: i64) -> bool {
        now_ms >= self.window_end_ms
    }

    /// Most frequent drift type; ties go to the lexicographically first.
    pub fn dominant_drift_type(&self) -> Option<&str> {
        let mut best: Option<(&str, u32)> = None;
        for (t, n) in &self.drift_type_breakdown {
            if best.map_or(true, |(_, b)| *n > b) {
                best = Some((t.as_str(), *n));
            }
        }
        best.map(|(t, _)| t)
    }
}

/// Per-call overrides for `get_or_create_drift_history`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryOptions {
    #[serde(default)]
    pub window_days: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundlingDecision {
    pub should_bundle: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<BundleTrigger>,
    pub drift_count: u32,
    pub total_materiality: f64,
}

/// One remediation unit synthesized from a bundled history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriftCandidate {
    pub id: String,
    pub workspace_id: String,
    pub doc_system: String,
    pub doc_id: String,
    pub doc_title: String,
    pub drift_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    pub bundled: bool,
    pub bundled_from: Vec<String>,
    pub bundle_trigger: BundleTrigger,
    pub total_drifts: u32,
    pub evidence_summary: String,
    pub materiality: f64,
    pub history_id: String,
    pub created_at: String,
}
