//! Feeding comparator findings into the accumulation engine.
//!
//! Comparators never touch drift histories; callers turn each finding into a
//! [`DriftRecord`], store it in a [`DriftRecordSource`] and hand it to
//! [`AccumulationEngine::accumulate`](crate::accumulation::engine::AccumulationEngine::accumulate).

use crate::accumulation::model::DriftCandidate;
use crate::comparator::types::{Band, IntegrityFinding, RecommendedAction, Severity};
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// A single drift as the accumulation engine sees it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriftRecord {
    pub id: String,
    pub workspace_id: String,
    pub doc_system: String,
    pub doc_id: String,
    pub drift_type: String,
    pub materiality: f64,
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub band: Option<Band>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl DriftRecord {
    /// Materiality is `confidence * impact`; findings with no recommended
    /// action are recorded as skipped.
    pub fn from_finding(finding: &IntegrityFinding, doc_system: &str, doc_id: &str) -> Self {
        Self {
            id: finding.id.clone(),
            workspace_id: finding.workspace_id.clone(),
            doc_system: doc_system.to_string(),
            doc_id: doc_id.to_string(),
            drift_type: finding.drift_type.clone(),
            materiality: (finding.confidence * finding.impact).clamp(0.0, 1.0),
            skipped: finding.recommended_action == RecommendedAction::NoAction,
            severity: Some(finding.severity),
            band: Some(finding.band),
            fingerprint: Some(finding.fingerprint.clone()),
        }
    }
}

/// Read side for full drift records, used when bundling.
pub trait DriftRecordSource: Send + Sync {
    /// Records for the given ids, in id order. Unknown ids are left out.
    fn load(&self, workspace_id: &str, ids: &[String]) -> CoreResult<Vec<DriftRecord>>;
}

/// Where bundled candidates go.
pub trait CandidateSink: Send + Sync {
    fn create(&self, candidate: &DriftCandidate) -> CoreResult<()>;
}

fn lock<'a, T>(m: &'a Mutex<T>, what: &str) -> CoreResult<MutexGuard<'a, T>> {
    m.lock()
        .map_err(|_| CoreError::Store(format!("{} mutex poisoned", what)))
}

#[derive(Default)]
pub struct InMemoryDriftRecords {
    records: Mutex<BTreeMap<(String, String), DriftRecord>>,
}

impl InMemoryDriftRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: DriftRecord) -> CoreResult<()> {
        let mut records = lock(&self.records, "drift record")?;
        records.insert((record.workspace_id.clone(), record.id.clone()), record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DriftRecordSource for InMemoryDriftRecords {
    fn load(&self, workspace_id: &str, ids: &[String]) -> CoreResult<Vec<DriftRecord>> {
        let records = lock(&self.records, "drift record")?;
        Ok(ids
            .iter()
            .filter_map(|id| records.get(&(workspace_id.to_string(), id.clone())).cloned())
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryCandidates {
    candidates: Mutex<Vec<DriftCandidate>>,
}

impl InMemoryCandidates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> CoreResult<Vec<DriftCandidate>> {
        Ok(lock(&self.candidates, "candidate")?.clone())
    }

    pub fn get(&self, id: &str) -> CoreResult<Option<DriftCandidate>> {
        Ok(lock(&self.candidates, "candidate")?
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }
}

impl CandidateSink for InMemoryCandidates {
    fn create(&self, candidate: &DriftCandidate) -> CoreResult<()> {
        let mut candidates = lock(&self.candidates, "candidate")?;
        if candidates.iter().any(|c| c.id == candidate.id) {
            return Err(CoreError::Store(format!(
                "drift candidate {} already exists",
                candidate.id
            )));
        }
        candidates.push(candidate.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> DriftRecord {
        DriftRecord {
            id: id.to_string(),
            workspace_id: "w".to_string(),
            doc_system: "confluence".to_string(),
            doc_id: "p1".to_string(),
            drift_type: "instruction".to_string(),
            materiality: 0.3,
            skipped: false,
            severity: None,
            band: None,
            fingerprint: None,
        }
    }

    #[test]
    fn load_keeps_requested_order_and_drops_unknown_ids() {
        let source = InMemoryDriftRecords::new();
        source.insert(record("a")).unwrap();
        source.insert(record("b")).unwrap();
        let got = source
            .load("w", &["b".to_string(), "zz".to_string(), "a".to_string()])
            .unwrap();
        let ids: Vec<&str> = got.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert!(source.load("other", &["a".to_string()]).unwrap().is_empty());
    }
}
