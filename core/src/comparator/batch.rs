use crate::comparator::registry::ComparatorRegistry;
use crate::comparator::types::{ComparatorInput, ComparatorResult};
use crate::config::BatchLimits;
use crate::error::{CoreError, CoreResult};
use crossbeam_channel::RecvTimeoutError;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    Completed { result: ComparatorResult },
    Failed { error: String },
    TimedOut { limit_ms: u64 },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BatchEntry {
    pub invariant_id: String,
    pub comparator_type: String,
    pub elapsed_ms: u64,
    pub outcome: BatchOutcome,
}

impl BatchEntry {
    pub fn into_result(self) -> CoreResult<ComparatorResult> {
        match self.outcome {
            BatchOutcome::Completed { result } => Ok(result),
            BatchOutcome::Failed { error } => Err(CoreError::InvalidInput(error)),
            BatchOutcome::TimedOut { limit_ms } => Err(CoreError::Timeout {
                comparator_type: self.comparator_type,
                elapsed_ms: limit_ms,
            }),
        }
    }
}

type WorkerMessage = (usize, Result<ComparatorResult, String>, u64);

/// Run every input on its own worker thread.
///
/// Entries come back in input order. An input still running when its time
/// budget is spent is reported `TimedOut`; its worker is left to finish on
/// its own and the result is discarded.
pub fn evaluate_batch(
    registry: Arc<ComparatorRegistry>,
    inputs: Vec<ComparatorInput>,
    limits: BatchLimits,
) -> Vec<BatchEntry> {
    let started = Instant::now();
    let limit_ms = limits
        .per_comparator_timeout_ms
        .min(limits.total_timeout_ms);
    let deadline = started + Duration::from_millis(limit_ms);

    let (tx, rx) = crossbeam_channel::unbounded::<WorkerMessage>();
    let mut labels: Vec<(String, String)> = Vec::with_capacity(inputs.len());
    let mut outcomes: Vec<Option<(BatchOutcome, u64)>> = Vec::with_capacity(inputs.len());
    let mut pending = 0usize;

    for (idx, input) in inputs.into_iter().enumerate() {
        labels.push((
            input.invariant.id.clone(),
            input.invariant.comparator_type.clone(),
        ));
        let worker_tx = tx.clone();
        let worker_registry = Arc::clone(&registry);
        let spawned = std::thread::Builder::new()
            .name(format!("comparator-{}", idx))
            .spawn(move || {
                let t0 = Instant::now();
                let res = worker_registry.compare(&input).map_err(|e| e.to_string());
                let _ = worker_tx.send((idx, res, t0.elapsed().as_millis() as u64));
            });
        match spawned {
            Ok(_) => {
                pending += 1;
                outcomes.push(None);
            }
            Err(e) => outcomes.push(Some((
                BatchOutcome::Failed {
                    error: format!("failed to spawn comparator worker: {}", e),
                },
                0,
            ))),
        }
    }
    drop(tx);

    while pending > 0 {
        match rx.recv_deadline(deadline) {
            Ok((idx, res, elapsed_ms)) => {
                pending -= 1;
                let outcome = match res {
                    Ok(result) => BatchOutcome::Completed { result },
                    Err(error) => BatchOutcome::Failed { error },
                };
                outcomes[idx] = Some((outcome, elapsed_ms));
            }
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let batch_elapsed = started.elapsed().as_millis() as u64;
    let entries: Vec<BatchEntry> = labels
        .into_iter()
        .zip(outcomes)
        .map(|((invariant_id, comparator_type), outcome)| {
            let (outcome, elapsed_ms) = outcome.unwrap_or_else(|| {
                warn!(
                    invariant_id = %invariant_id,
                    comparator = %comparator_type,
                    limit_ms,
                    "comparator timed out"
                );
                // a worker that panicked never reports back and lands here too
                (BatchOutcome::TimedOut { limit_ms }, batch_elapsed)
            });
            BatchEntry {
                invariant_id,
                comparator_type,
                elapsed_ms,
                outcome,
            }
        })
        .collect();
    debug!(entries = entries.len(), elapsed_ms = batch_elapsed, "batch evaluated");
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::template::{ComparatorStrategy, Extraction};
    use crate::comparator::types::{
        ArtifactExtract, ArtifactSnapshot, ArtifactType, FindingDraft, Invariant, Severity,
        SnapshotVersion, TextExtract,
    };

    struct SleepyStrategy {
        key: &'static str,
        sleep_ms: u64,
    }

    impl ComparatorStrategy for SleepyStrategy {
        type LeftFacts = ();
        type RightFacts = ();

        fn comparator_type(&self) -> &str {
            self.key
        }

        fn supported_artifact_types(&self) -> (ArtifactType, ArtifactType) {
            (ArtifactType::Terraform, ArtifactType::Runbook)
        }

        fn extract_left(&self, _: &ArtifactSnapshot) -> Extraction<()> {
            std::thread::sleep(Duration::from_millis(self.sleep_ms));
            Extraction::complete(())
        }

        fn extract_right(&self, _: &ArtifactSnapshot) -> Extraction<()> {
            Extraction::complete(())
        }

        fn perform_comparison(&self, _: &Invariant, _: &(), _: &()) -> Vec<FindingDraft> {
            vec![]
        }
    }

    fn input(key: &str, enabled: bool) -> ComparatorInput {
        let snap = |id: &str, payload| ArtifactSnapshot {
            id: id.to_string(),
            workspace_id: "w".to_string(),
            contract_id: "c".to_string(),
            payload,
            version: SnapshotVersion {
                reference: "main".to_string(),
                sha: None,
                captured_at_ms: 0,
            },
        };
        let text = || TextExtract {
            path: None,
            content: "x".to_string(),
        };
        ComparatorInput {
            invariant: Invariant {
                id: format!("inv_{}", key),
                name: String::new(),
                enabled,
                severity: Severity::Medium,
                comparator_type: key.to_string(),
                config: None,
            },
            left_snapshot: Some(snap("l", ArtifactExtract::Terraform(text()))),
            right_snapshot: Some(snap("r", ArtifactExtract::Runbook(text()))),
            context: Default::default(),
        }
    }

    fn registry() -> Arc<ComparatorRegistry> {
        let mut reg = ComparatorRegistry::new();
        reg.register(Arc::new(SleepyStrategy { key: "fast", sleep_ms: 0 }))
            .unwrap();
        reg.register(Arc::new(SleepyStrategy { key: "slow", sleep_ms: 2_000 }))
            .unwrap();
        Arc::new(reg)
    }

    #[test]
    fn slow_comparator_times_out_without_affecting_siblings() {
        let entries = evaluate_batch(
            registry(),
            vec![input("slow", true), input("fast", true)],
            BatchLimits {
                per_comparator_timeout_ms: 200,
                total_timeout_ms: 1_000,
            },
        );
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].invariant_id, "inv_slow");
        assert_eq!(entries[0].outcome, BatchOutcome::TimedOut { limit_ms: 200 });
        assert!(matches!(entries[1].outcome, BatchOutcome::Completed { .. }));
        let err = entries[0].clone().into_result().unwrap_err();
        assert!(matches!(err, CoreError::Timeout { .. }));
    }

    #[test]
    fn caller_errors_are_reported_per_entry() {
        let entries = evaluate_batch(
            registry(),
            vec![input("fast", false), input("missing", true), input("fast", true)],
            BatchLimits::default(),
        );
        match &entries[0].outcome {
            BatchOutcome::Failed { error } => assert!(error.contains("disabled")),
            other => panic!("unexpected {:?}", other),
        }
        match &entries[1].outcome {
            BatchOutcome::Failed { error } => assert!(error.contains("no comparator")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(entries[2].outcome, BatchOutcome::Completed { .. }));
    }
}
