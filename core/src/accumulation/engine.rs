//! Temporal drift accumulation.
//!
//! Each (workspace, doc system, doc id) has at most one `accumulating`
//! history at a time. Drifts are recorded into it until the bundling
//! threshold is crossed, at which point the history is bundled into a single
//! [`DriftCandidate`] and becomes terminal. A history whose window ends first
//! is expired. Windows are never extended.
//!
//! All writes go through the store's conditional update and are retried on
//! version conflicts with freshly read state.

use crate::accumulation::bridge::{CandidateSink, DriftRecord, DriftRecordSource};
use crate::accumulation::model::{
    BundleTrigger, BundlingDecision, DriftCandidate, DriftHistory, HistoryKey, HistoryOptions,
    HistoryStatus, MS_PER_DAY,
};
use crate::accumulation::store::{pick_accumulating, DriftHistoryStore};
use crate::config::{AccumulationConfig, BundlingThresholds};
use crate::determinism::ids::{prefixed_ulid, CANDIDATE_ID_PREFIX, HISTORY_ID_PREFIX};
use crate::error::{CoreError, CoreResult};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

// float sums such as 5 x 0.5 must still reach a 2.5 threshold
const MATERIALITY_EPSILON: f64 = 1e-9;

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance_days(&self, days: i64) {
        self.now_ms.fetch_add(days * MS_PER_DAY, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

pub(crate) fn rfc3339_from_ms(ms: i64) -> String {
    time::OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .ok()
        .and_then(|t| {
            t.format(&time::format_description::well_known::Rfc3339)
                .ok()
        })
        .unwrap_or_default()
}

/// Result of feeding one drift record through the engine.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AccumulationOutcome {
    pub history_id: String,
    pub drift_count: u32,
    pub total_materiality: f64,
    /// Set when this record pushed the history over its threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SweepReport {
    pub expired: Vec<String>,
    /// Candidate ids created by bundling on expiry.
    pub bundled: Vec<String>,
    /// (history id, error) pairs; one failure never stops the sweep.
    pub failed: Vec<(String, String)>,
}

pub struct AccumulationEngine {
    config: AccumulationConfig,
    store: Arc<dyn DriftHistoryStore>,
    records: Arc<dyn DriftRecordSource>,
    candidates: Arc<dyn CandidateSink>,
    clock: Arc<dyn Clock>,
}

impl AccumulationEngine {
    pub fn new(
        config: AccumulationConfig,
        store: Arc<dyn DriftHistoryStore>,
        records: Arc<dyn DriftRecordSource>,
        candidates: Arc<dyn CandidateSink>,
    ) -> Self {
        Self {
            config,
            store,
            records,
            candidates,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &AccumulationConfig {
        &self.config
    }

    fn attempts(&self) -> u32 {
        self.config.max_update_retries.max(1)
    }

    fn load(&self, workspace_id: &str, history_id: &str) -> CoreResult<DriftHistory> {
        self.store
            .get(workspace_id, history_id)?
            .ok_or_else(|| CoreError::HistoryNotFound {
                workspace_id: workspace_id.to_string(),
                history_id: history_id.to_string(),
            })
    }

    fn is_current(&self, history: &DriftHistory, now_ms: i64) -> bool {
        let within_lookback = self.config.lookback_days.map_or(true, |days| {
            history.window_start_ms >= now_ms.saturating_sub(i64::from(days) * MS_PER_DAY)
        });
        history.status == HistoryStatus::Accumulating
            && !history.window_closed(now_ms)
            && within_lookback
    }

    /// Close out a stale history. Losing the race to another writer is fine:
    /// whatever it did, the row is re-read by the caller.
    fn expire(&self, history: DriftHistory) -> CoreResult<bool> {
        let expected = history.version;
        let mut next = history;
        next.status = HistoryStatus::Expired;
        match self.store.update_if_version(&next, expected)? {
            Some(saved) => {
                info!(
                    workspace_id = %saved.workspace_id,
                    history_id = %saved.id,
                    drift_count = saved.drift_count,
                    "drift window expired"
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn closed(history: &DriftHistory) -> CoreError {
        CoreError::HistoryClosed {
            history_id: history.id.clone(),
            status: history.status.as_str().to_string(),
        }
    }

    /// The current accumulating history for a document, opening a new window
    /// when there is none. Stale windows found on the way are expired.
    pub fn get_or_create_drift_history(
        &self,
        workspace_id: &str,
        doc_system: &str,
        doc_id: &str,
        doc_title: &str,
        opts: &HistoryOptions,
    ) -> CoreResult<DriftHistory> {
        let window_days = opts.window_days.unwrap_or(self.config.window_days);
        if window_days == 0 {
            return Err(CoreError::InvalidInput(
                "window_days must be greater than zero".to_string(),
            ));
        }
        if let Some(lookback) = self.config.lookback_days {
            if window_days > lookback {
                return Err(CoreError::InvalidInput(format!(
                    "window_days ({}) exceeds lookback_days ({})",
                    window_days, lookback
                )));
            }
        }
        let key = HistoryKey::new(workspace_id, doc_system, doc_id);

        for _ in 0..self.attempts() {
            let now = self.clock.now_ms();
            match self.store.find_accumulating(&key)? {
                Some(h) if self.is_current(&h, now) => return Ok(h),
                Some(h) => {
                    self.expire(h)?;
                }
                None => {
                    let fresh = DriftHistory::open(
                        prefixed_ulid(HISTORY_ID_PREFIX),
                        &key,
                        doc_title,
                        now,
                        window_days,
                    );
                    let fresh_id = fresh.id.clone();
                    let current = self.store.insert_if_absent(fresh)?;
                    if current.id == fresh_id {
                        debug!(
                            workspace_id,
                            doc_system,
                            doc_id,
                            history_id = %current.id,
                            window_days,
                            "drift window opened"
                        );
                    }
                    if self.is_current(&current, now) {
                        return Ok(current);
                    }
                }
            }
        }
        Err(CoreError::ConcurrencyConflict {
            history_id: format!("{}/{}/{}", workspace_id, doc_system, doc_id),
            attempts: self.attempts(),
        })
    }

    /// Add one drift to an accumulating history.
    ///
    /// Terminal histories, and histories whose window has already ended,
    /// reject the drift with [`CoreError::HistoryClosed`].
    pub fn record_drift(
        &self,
        workspace_id: &str,
        history_id: &str,
        drift_id: &str,
        drift_type: &str,
        materiality: f64,
        skipped: bool,
    ) -> CoreResult<DriftHistory> {
        if !materiality.is_finite() || materiality < 0.0 {
            return Err(CoreError::InvalidInput(format!(
                "materiality must be a non-negative number, got {}",
                materiality
            )));
        }

        for attempt in 1..=self.attempts() {
            let current = self.load(workspace_id, history_id)?;
            if current.status.is_terminal() {
                return Err(Self::closed(&current));
            }
            if current.window_closed(self.clock.now_ms()) {
                let mut expired = current.clone();
                if self.expire(current)? {
                    expired.status = HistoryStatus::Expired;
                    return Err(Self::closed(&expired));
                }
                continue;
            }

            let expected = current.version;
            let mut next = current;
            next.apply_drift(drift_id, drift_type, materiality, skipped);
            match self.store.update_if_version(&next, expected)? {
                Some(saved) => {
                    debug!(
                        workspace_id,
                        history_id,
                        drift_id,
                        drift_type,
                        drift_count = saved.drift_count,
                        total_materiality = saved.total_materiality,
                        "drift recorded"
                    );
                    return Ok(saved);
                }
                None => {
                    warn!(
                        workspace_id,
                        history_id,
                        attempt,
                        "drift history update conflicted, retrying"
                    );
                    std::thread::yield_now();
                }
            }
        }
        Err(CoreError::ConcurrencyConflict {
            history_id: history_id.to_string(),
            attempts: self.attempts(),
        })
    }

    pub fn check_bundling_threshold(
        &self,
        workspace_id: &str,
        history_id: &str,
        thresholds: Option<BundlingThresholds>,
    ) -> CoreResult<BundlingDecision> {
        let history = self.load(workspace_id, history_id)?;
        let t = thresholds.unwrap_or_else(|| self.config.thresholds());
        let crossed = history.drift_count >= t.count
            || history.total_materiality + MATERIALITY_EPSILON >= t.materiality;
        let should_bundle = !history.status.is_terminal() && crossed;
        Ok(BundlingDecision {
            should_bundle,
            trigger: should_bundle.then_some(BundleTrigger::ThresholdReached),
            drift_count: history.drift_count,
            total_materiality: history.total_materiality,
        })
    }

    /// Bundle every drift of a history into one candidate; returns its id.
    ///
    /// The history is claimed (marked bundled) before the candidate is handed
    /// to the sink so that no drift can slip in between. If the sink fails,
    /// the claim is rolled back.
    pub fn bundle_drifts(
        &self,
        workspace_id: &str,
        history_id: &str,
        trigger: BundleTrigger,
    ) -> CoreResult<String> {
        let mut claimed: Option<(DriftHistory, DriftCandidate)> = None;

        for attempt in 1..=self.attempts() {
            let current = self.load(workspace_id, history_id)?;
            if current.status.is_terminal() {
                return Err(Self::closed(&current));
            }
            let records = self
                .records
                .load(workspace_id, &current.accumulated_drift_ids)?;
            if records.len() != current.accumulated_drift_ids.len() {
                let missing: Vec<&str> = current
                    .accumulated_drift_ids
                    .iter()
                    .filter(|id| !records.iter().any(|r| &r.id == *id))
                    .map(String::as_str)
                    .collect();
                return Err(CoreError::DriftRecordsMissing(missing.join(", ")));
            }

            let now = self.clock.now_ms();
            let candidate = synthesize_candidate(&current, &records, trigger, now);
            let expected = current.version;
            let mut next = current;
            next.status = HistoryStatus::Bundled;
            next.bundled_at_ms = Some(now);
            next.bundled_drift_id = Some(candidate.id.clone());
            match self.store.update_if_version(&next, expected)? {
                Some(saved) => {
                    claimed = Some((saved, candidate));
                    break;
                }
                None => {
                    warn!(workspace_id, history_id, attempt, "bundle claim conflicted, retrying");
                }
            }
        }

        let Some((saved, candidate)) = claimed else {
            return Err(CoreError::ConcurrencyConflict {
                history_id: history_id.to_string(),
                attempts: self.attempts(),
            });
        };

        if let Err(e) = self.candidates.create(&candidate) {
            warn!(
                workspace_id,
                history_id,
                error = %e,
                "candidate creation failed, releasing history"
            );
            self.release_claim(saved)?;
            return Err(e);
        }
        info!(
            workspace_id,
            history_id,
            candidate_id = %candidate.id,
            trigger = trigger.as_str(),
            total_drifts = candidate.total_drifts,
            "drifts bundled"
        );
        Ok(candidate.id)
    }

    /// Undo a bundle claim after the sink refused the candidate.
    ///
    /// While the claim was held, a concurrent caller may have opened a new
    /// window for the same document. The released drifts then move into that
    /// window and the old history is expired, so the document keeps a single
    /// accumulating history.
    fn release_claim(&self, bundled: DriftHistory) -> CoreResult<()> {
        let expected = bundled.version;
        let mut next = bundled;
        next.status = HistoryStatus::Accumulating;
        next.bundled_at_ms = None;
        next.bundled_drift_id = None;
        let Some(released) = self.store.update_if_version(&next, expected)? else {
            return Err(CoreError::Store(format!(
                "drift history {} changed while bundled",
                next.id
            )));
        };

        let others: Vec<DriftHistory> = self
            .store
            .list(&released.workspace_id)?
            .into_iter()
            .filter(|h| h.id != released.id)
            .collect();
        match pick_accumulating(others.iter(), &released.key()) {
            Some(live) => self.fold_into(&released.workspace_id, &released.id, live),
            None => Ok(()),
        }
    }

    fn fold_into(
        &self,
        workspace_id: &str,
        history_id: &str,
        live: &DriftHistory,
    ) -> CoreResult<()> {
        let mut expired = None;
        for _ in 0..self.attempts() {
            let current = self.load(workspace_id, history_id)?;
            if current.status != HistoryStatus::Accumulating {
                // closed by someone else in the meantime
                return Ok(());
            }
            let expected = current.version;
            let mut next = current;
            next.status = HistoryStatus::Expired;
            if let Some(saved) = self.store.update_if_version(&next, expected)? {
                expired = Some(saved);
                break;
            }
        }
        let Some(expired) = expired else {
            return Err(CoreError::ConcurrencyConflict {
                history_id: history_id.to_string(),
                attempts: self.attempts(),
            });
        };

        let records = self
            .records
            .load(workspace_id, &expired.accumulated_drift_ids)?;
        let mut target = live.id.clone();
        for drift_id in &expired.accumulated_drift_ids {
            let Some(r) = records.iter().find(|r| &r.id == drift_id) else {
                warn!(
                    workspace_id,
                    history_id,
                    drift_id = %drift_id,
                    "no drift record to move, dropping"
                );
                continue;
            };
            let mut moved = false;
            for _ in 0..self.attempts() {
                match self.record_drift(
                    workspace_id,
                    &target,
                    &r.id,
                    &r.drift_type,
                    r.materiality,
                    r.skipped,
                ) {
                    Ok(_) => {
                        moved = true;
                        break;
                    }
                    Err(CoreError::HistoryClosed { .. }) => {
                        target = self
                            .get_or_create_drift_history(
                                workspace_id,
                                &live.doc_system,
                                &live.doc_id,
                                &live.doc_title,
                                &HistoryOptions::default(),
                            )?
                            .id;
                    }
                    Err(e) => return Err(e),
                }
            }
            if !moved {
                return Err(CoreError::ConcurrencyConflict {
                    history_id: target,
                    attempts: self.attempts(),
                });
            }
        }
        info!(
            workspace_id,
            history_id,
            into = %target,
            drifts = expired.accumulated_drift_ids.len(),
            "released drifts moved to the open window"
        );
        Ok(())
    }

    /// Close every accumulating history of a workspace whose window is over.
    pub fn sweep_expired_windows(&self, workspace_id: &str) -> CoreResult<SweepReport> {
        let now = self.clock.now_ms();
        let mut report = SweepReport::default();
        for history in self.store.list(workspace_id)? {
            if history.status != HistoryStatus::Accumulating || self.is_current(&history, now) {
                continue;
            }
            let id = history.id.clone();
            let outcome = if self.config.bundle_on_expiry && history.drift_count > 0 {
                self.bundle_drifts(workspace_id, &id, BundleTrigger::WindowExpired)
                    .map(|candidate_id| report.bundled.push(candidate_id))
            } else {
                self.expire(history).map(|done| {
                    if done {
                        report.expired.push(id.clone());
                    }
                })
            };
            if let Err(e) = outcome {
                warn!(
                    workspace_id,
                    history_id = %id,
                    error = %e,
                    "window sweep failed for history"
                );
                report.failed.push((id, e.to_string()));
            }
        }
        Ok(report)
    }

    /// Get-or-create, record, check, bundle: the full path for one drift.
    ///
    /// The record must already be readable from the engine's
    /// [`DriftRecordSource`] for bundling to succeed.
    pub fn accumulate(
        &self,
        record: &DriftRecord,
        doc_title: &str,
    ) -> CoreResult<AccumulationOutcome> {
        let opts = HistoryOptions::default();
        let ws = record.workspace_id.as_str();
        let mut history = self.get_or_create_drift_history(
            ws,
            &record.doc_system,
            &record.doc_id,
            doc_title,
            &opts,
        )?;

        let mut recorded = None;
        for _ in 0..self.attempts() {
            match self.record_drift(
                ws,
                &history.id,
                &record.id,
                &record.drift_type,
                record.materiality,
                record.skipped,
            ) {
                Ok(h) => {
                    recorded = Some(h);
                    break;
                }
                Err(CoreError::HistoryClosed { .. }) => {
                    debug!(
                        workspace_id = ws,
                        history_id = %history.id,
                        "history closed, opening a new window"
                    );
                    history = self.get_or_create_drift_history(
                        ws,
                        &record.doc_system,
                        &record.doc_id,
                        doc_title,
                        &opts,
                    )?;
                }
                Err(e) => return Err(e),
            }
        }
        let Some(history) = recorded else {
            return Err(CoreError::ConcurrencyConflict {
                history_id: history.id,
                attempts: self.attempts(),
            });
        };

        let decision = self.check_bundling_threshold(ws, &history.id, None)?;
        let candidate_id = match decision.trigger {
            Some(trigger) if decision.should_bundle => {
                match self.bundle_drifts(ws, &history.id, trigger) {
                    Ok(id) => Some(id),
                    // a concurrent caller bundled it first
                    Err(CoreError::HistoryClosed { .. }) => None,
                    Err(e) => return Err(e),
                }
            }
            _ => None,
        };

        Ok(AccumulationOutcome {
            history_id: history.id,
            drift_count: history.drift_count,
            total_materiality: history.total_materiality,
            candidate_id,
        })
    }
}

fn synthesize_candidate(
    history: &DriftHistory,
    records: &[DriftRecord],
    trigger: BundleTrigger,
    now_ms: i64,
) -> DriftCandidate {
    let total = history.accumulated_drift_ids.len() as u32;
    let types: Vec<String> = history
        .drift_type_breakdown
        .iter()
        .map(|(t, n)| format!("{} ({})", t, n))
        .collect();
    let title = if history.doc_title.is_empty() {
        history.doc_id.as_str()
    } else {
        history.doc_title.as_str()
    };
    let evidence_summary = format!(
        "{} drifts bundled for {} ({}): {}",
        total,
        title,
        trigger.as_str(),
        types.join(", ")
    );

    DriftCandidate {
        id: prefixed_ulid(CANDIDATE_ID_PREFIX),
        workspace_id: history.workspace_id.clone(),
        doc_system: history.doc_system.clone(),
        doc_id: history.doc_id.clone(),
        doc_title: history.doc_title.clone(),
        drift_type: history
            .dominant_drift_type()
            .unwrap_or_default()
            .to_string(),
        severity: records.iter().filter_map(|r| r.severity).max(),
        bundled: true,
        bundled_from: history.accumulated_drift_ids.clone(),
        bundle_trigger: trigger,
        total_drifts: total,
        evidence_summary,
        materiality: history.total_materiality,
        history_id: history.id.clone(),
        created_at: rfc3339_from_ms(now_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulation::bridge::{InMemoryCandidates, InMemoryDriftRecords};
    use crate::accumulation::store::InMemoryHistoryStore;

    const T0: i64 = 1_700_000_000_000;

    struct Fixture {
        engine: AccumulationEngine,
        records: Arc<InMemoryDriftRecords>,
        candidates: Arc<InMemoryCandidates>,
        clock: Arc<ManualClock>,
    }

    fn fixture(config: AccumulationConfig) -> Fixture {
        let records = Arc::new(InMemoryDriftRecords::new());
        let candidates = Arc::new(InMemoryCandidates::new());
        let clock = Arc::new(ManualClock::new(T0));
        let engine = AccumulationEngine::new(
            config,
            Arc::new(InMemoryHistoryStore::new()),
            records.clone(),
            candidates.clone(),
        )
        .with_clock(clock.clone());
        Fixture {
            engine,
            records,
            candidates,
            clock,
        }
    }

    fn record(id: &str, materiality: f64) -> DriftRecord {
        DriftRecord {
            id: id.to_string(),
            workspace_id: "w".to_string(),
            doc_system: "confluence".to_string(),
            doc_id: "p1".to_string(),
            drift_type: "instruction".to_string(),
            materiality,
            skipped: false,
            severity: None,
            band: None,
            fingerprint: None,
        }
    }

    #[test]
    fn history_is_reused_within_window() {
        let f = fixture(AccumulationConfig::default());
        let opts = HistoryOptions::default();
        let a = f
            .engine
            .get_or_create_drift_history("w", "confluence", "p1", "Doc", &opts)
            .unwrap();
        f.clock.advance_days(3);
        let b = f
            .engine
            .get_or_create_drift_history("w", "confluence", "p1", "Doc", &opts)
            .unwrap();
        assert_eq!(a.id, b.id);
        assert!(a.id.starts_with("dh_"));
        assert_eq!(a.window_end_ms, T0 + 7 * MS_PER_DAY);
    }

    #[test]
    fn window_override_and_zero_window() {
        let f = fixture(AccumulationConfig::default());
        let h = f
            .engine
            .get_or_create_drift_history("w", "s", "d", "", &HistoryOptions {
                window_days: Some(2),
            })
            .unwrap();
        assert_eq!(h.window_end_ms - h.window_start_ms, 2 * MS_PER_DAY);
        let err = f
            .engine
            .get_or_create_drift_history("w", "s", "d2", "", &HistoryOptions {
                window_days: Some(0),
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn window_longer_than_lookback_is_refused() {
        let f = fixture(AccumulationConfig {
            lookback_days: Some(7),
            ..Default::default()
        });
        let err = f
            .engine
            .get_or_create_drift_history("w", "s", "d", "", &HistoryOptions {
                window_days: Some(10),
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));

        // a window as long as the lookback stays reusable to its last day
        let h = f
            .engine
            .get_or_create_drift_history("w", "s", "d", "", &HistoryOptions::default())
            .unwrap();
        f.clock.advance_days(6);
        let again = f
            .engine
            .get_or_create_drift_history("w", "s", "d", "", &HistoryOptions::default())
            .unwrap();
        assert_eq!(h.id, again.id);
    }

    #[test]
    fn materiality_threshold_triggers_before_count() {
        let f = fixture(AccumulationConfig::default());
        let h = f
            .engine
            .get_or_create_drift_history("w", "confluence", "p1", "Doc", &HistoryOptions::default())
            .unwrap();
        for i in 0..4 {
            f.engine
                .record_drift("w", &h.id, &format!("d{}", i), "instruction", 0.625, false)
                .unwrap();
        }
        let decision = f.engine.check_bundling_threshold("w", &h.id, None).unwrap();
        assert!(decision.should_bundle);
        assert_eq!(decision.trigger, Some(BundleTrigger::ThresholdReached));
        assert_eq!(decision.drift_count, 4);

        let strict = BundlingThresholds {
            count: 10,
            materiality: 100.0,
        };
        let decision = f
            .engine
            .check_bundling_threshold("w", &h.id, Some(strict))
            .unwrap();
        assert!(!decision.should_bundle);
        assert_eq!(decision.trigger, None);
    }

    #[test]
    fn negative_materiality_is_rejected() {
        let f = fixture(AccumulationConfig::default());
        let h = f
            .engine
            .get_or_create_drift_history("w", "confluence", "p1", "Doc", &HistoryOptions::default())
            .unwrap();
        assert!(f
            .engine
            .record_drift("w", &h.id, "d", "instruction", -0.1, false)
            .is_err());
        assert!(f
            .engine
            .record_drift("w", "dh_missing", "d", "instruction", 0.1, false)
            .is_err());
    }

    #[test]
    fn bundle_requires_every_drift_record() {
        let f = fixture(AccumulationConfig::default());
        let h = f
            .engine
            .get_or_create_drift_history("w", "confluence", "p1", "Doc", &HistoryOptions::default())
            .unwrap();
        f.records.insert(record("d1", 0.2)).unwrap();
        f.engine.record_drift("w", &h.id, "d1", "instruction", 0.2, false).unwrap();
        f.engine.record_drift("w", &h.id, "d2", "instruction", 0.2, false).unwrap();
        let err = f
            .engine
            .bundle_drifts("w", &h.id, BundleTrigger::ThresholdReached)
            .unwrap_err();
        match err {
            CoreError::DriftRecordsMissing(ids) => assert_eq!(ids, "d2"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(f.candidates.all().unwrap().is_empty());
    }

    struct FailingSink;

    impl CandidateSink for FailingSink {
        fn create(&self, _: &DriftCandidate) -> CoreResult<()> {
            Err(CoreError::Store("sink unavailable".to_string()))
        }
    }

    #[test]
    fn sink_failure_releases_the_history() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let records = Arc::new(InMemoryDriftRecords::new());
        let engine = AccumulationEngine::new(
            AccumulationConfig::default(),
            store.clone(),
            records.clone(),
            Arc::new(FailingSink),
        )
        .with_clock(Arc::new(ManualClock::new(T0)));
        let h = engine
            .get_or_create_drift_history("w", "confluence", "p1", "Doc", &HistoryOptions::default())
            .unwrap();
        records.insert(record("d1", 0.2)).unwrap();
        engine.record_drift("w", &h.id, "d1", "instruction", 0.2, false).unwrap();
        assert!(engine
            .bundle_drifts("w", &h.id, BundleTrigger::ThresholdReached)
            .is_err());
        let after = store.get("w", &h.id).unwrap().unwrap();
        assert_eq!(after.status, HistoryStatus::Accumulating);
        assert!(after.bundled_drift_id.is_none());
        engine.record_drift("w", &h.id, "d2", "instruction", 0.2, false).unwrap();
    }

    /// Opens a competing window for the same document, then fails.
    struct RacingSink {
        store: Arc<InMemoryHistoryStore>,
    }

    impl CandidateSink for RacingSink {
        fn create(&self, candidate: &DriftCandidate) -> CoreResult<()> {
            let key = HistoryKey::new(
                &candidate.workspace_id,
                &candidate.doc_system,
                &candidate.doc_id,
            );
            self.store
                .insert_if_absent(DriftHistory::open(
                    "dh_concurrent".to_string(),
                    &key,
                    "Doc",
                    T0,
                    7,
                ))?;
            Err(CoreError::Store("sink unavailable".to_string()))
        }
    }

    #[test]
    fn released_drifts_join_a_window_opened_during_the_claim() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let records = Arc::new(InMemoryDriftRecords::new());
        let engine = AccumulationEngine::new(
            AccumulationConfig::default(),
            store.clone(),
            records.clone(),
            Arc::new(RacingSink {
                store: store.clone(),
            }),
        )
        .with_clock(Arc::new(ManualClock::new(T0)));
        let h = engine
            .get_or_create_drift_history("w", "confluence", "p1", "Doc", &HistoryOptions::default())
            .unwrap();
        records.insert(record("d1", 0.2)).unwrap();
        engine.record_drift("w", &h.id, "d1", "instruction", 0.2, false).unwrap();

        assert!(engine
            .bundle_drifts("w", &h.id, BundleTrigger::ThresholdReached)
            .is_err());

        let accumulating: Vec<DriftHistory> = store
            .list("w")
            .unwrap()
            .into_iter()
            .filter(|r| r.status == HistoryStatus::Accumulating)
            .collect();
        assert_eq!(accumulating.len(), 1);
        let live = &accumulating[0];
        assert_eq!(live.id, "dh_concurrent");
        assert_eq!(live.accumulated_drift_ids, vec!["d1".to_string()]);
        assert_eq!(live.drift_count, 1);
        assert!((live.total_materiality - 0.2).abs() < 1e-9);

        let old = store.get("w", &h.id).unwrap().unwrap();
        assert_eq!(old.status, HistoryStatus::Expired);
        assert!(old.bundled_drift_id.is_none());
    }

    #[test]
    fn recording_into_an_ended_window_expires_it() {
        let f = fixture(AccumulationConfig::default());
        let h = f
            .engine
            .get_or_create_drift_history("w", "confluence", "p1", "Doc", &HistoryOptions::default())
            .unwrap();
        f.clock.advance_days(8);
        let err = f
            .engine
            .record_drift("w", &h.id, "d1", "instruction", 0.2, false)
            .unwrap_err();
        match err {
            CoreError::HistoryClosed { status, .. } => assert_eq!(status, "expired"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rfc3339_formatting_of_millis() {
        assert_eq!(rfc3339_from_ms(0), "1970-01-01T00:00:00Z");
    }
}
