//! The fixed comparator pipeline: validate, applicability, extraction, diff,
//! scoring, finding assembly, coverage. Strategies only supply the hooks.

use crate::comparator::scoring::{
    calculate_confidence, calculate_impact, determine_band, determine_recommended_action,
    extract_domains, route_to_owners,
};
use crate::comparator::types::{
    ArtifactSnapshot, ArtifactType, ComparatorInput, ComparatorResult, Coverage, FindingDraft,
    IntegrityFinding, Invariant, SkipReason,
};
use crate::determinism::ids::{fingerprint, prefixed_ulid, FINDING_ID_PREFIX};
use crate::error::{CoreError, CoreResult};
use serde_json::json;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

/// Facts pulled out of one snapshot, plus whatever could not be parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction<T> {
    pub facts: T,
    pub gaps: Vec<String>,
    /// False when nothing usable came out of the snapshot.
    pub usable: bool,
}

impl<T> Extraction<T> {
    pub fn complete(facts: T) -> Self {
        Self {
            facts,
            gaps: Vec::new(),
            usable: true,
        }
    }

    pub fn partial(facts: T, gaps: Vec<String>) -> Self {
        Self {
            facts,
            gaps,
            usable: true,
        }
    }

    pub fn unusable(facts: T, gap: impl Into<String>) -> Self {
        Self {
            facts,
            gaps: vec![gap.into()],
            usable: false,
        }
    }
}

/// Strategy hooks called by [`compare`].
///
/// Extraction must not fail: malformed input degrades to partial facts.
pub trait ComparatorStrategy: Send + Sync {
    type LeftFacts;
    type RightFacts;

    fn comparator_type(&self) -> &str;

    /// Expected (left, right) artifact types.
    fn supported_artifact_types(&self) -> (ArtifactType, ArtifactType);

    fn can_compare(
        &self,
        invariant: &Invariant,
        left: &ArtifactSnapshot,
        right: &ArtifactSnapshot,
    ) -> bool {
        let (l, r) = <Self as ComparatorStrategy>::supported_artifact_types(self);
        invariant.comparator_type == <Self as ComparatorStrategy>::comparator_type(self)
            && left.artifact_type() == l
            && right.artifact_type() == r
    }

    fn extract_left(&self, snapshot: &ArtifactSnapshot) -> Extraction<Self::LeftFacts>;

    fn extract_right(&self, snapshot: &ArtifactSnapshot) -> Extraction<Self::RightFacts>;

    fn perform_comparison(
        &self,
        invariant: &Invariant,
        left: &Self::LeftFacts,
        right: &Self::RightFacts,
    ) -> Vec<FindingDraft>;
}

/// Object-safe face of a strategy, held by the registry.
pub trait Comparator: Send + Sync {
    fn comparator_type(&self) -> &str;
    fn supported_artifact_types(&self) -> (ArtifactType, ArtifactType);
    fn can_compare(
        &self,
        invariant: &Invariant,
        left: &ArtifactSnapshot,
        right: &ArtifactSnapshot,
    ) -> bool;
    fn compare(&self, input: &ComparatorInput) -> CoreResult<ComparatorResult>;
}

impl<S: ComparatorStrategy> Comparator for S {
    fn comparator_type(&self) -> &str {
        ComparatorStrategy::comparator_type(self)
    }

    fn supported_artifact_types(&self) -> (ArtifactType, ArtifactType) {
        ComparatorStrategy::supported_artifact_types(self)
    }

    fn can_compare(
        &self,
        invariant: &Invariant,
        left: &ArtifactSnapshot,
        right: &ArtifactSnapshot,
    ) -> bool {
        ComparatorStrategy::can_compare(self, invariant, left, right)
    }

    fn compare(&self, input: &ComparatorInput) -> CoreResult<ComparatorResult> {
        compare(self, input)
    }
}

pub fn compare<S: ComparatorStrategy + ?Sized>(
    strategy: &S,
    input: &ComparatorInput,
) -> CoreResult<ComparatorResult> {
    let invariant = &input.invariant;
    let comparator_type = ComparatorStrategy::comparator_type(strategy).to_string();

    // 1) validate
    if !invariant.enabled {
        return Err(CoreError::InvariantDisabled {
            invariant_id: invariant.id.clone(),
        });
    }
    let (left, right) = match (&input.left_snapshot, &input.right_snapshot) {
        (Some(l), Some(r)) => (l, r),
        (None, None) => {
            return Err(CoreError::MissingSnapshots {
                missing: "left, right".to_string(),
            })
        }
        (None, Some(_)) => {
            return Err(CoreError::MissingSnapshots {
                missing: "left".to_string(),
            })
        }
        (Some(_), None) => {
            return Err(CoreError::MissingSnapshots {
                missing: "right".to_string(),
            })
        }
    };

    // 2) applicability
    if !ComparatorStrategy::can_compare(strategy, invariant, left, right) {
        debug!(
            invariant_id = %invariant.id,
            comparator = %comparator_type,
            left_type = left.artifact_type().as_str(),
            right_type = right.artifact_type().as_str(),
            "comparator not applicable"
        );
        return Ok(ComparatorResult {
            invariant_id: invariant.id.clone(),
            comparator_type,
            evaluated: false,
            skipped_reason: Some(SkipReason::NotApplicable),
            findings: vec![],
            coverage: Coverage::default(),
        });
    }

    // 3) extraction
    let left_facts = strategy.extract_left(left);
    let right_facts = strategy.extract_right(right);
    let coverage = build_coverage(left, &left_facts, right, &right_facts);
    for gap in &coverage.parse_gaps {
        warn!(
            invariant_id = %invariant.id,
            comparator = %comparator_type,
            gap = %gap,
            "partial extraction"
        );
    }

    // 4) diff, only when both sides produced something to compare
    let drafts = if left_facts.usable && right_facts.usable {
        strategy.perform_comparison(invariant, &left_facts.facts, &right_facts.facts)
    } else {
        Vec::new()
    };

    // 5-6) scoring + assembly
    let mut findings = Vec::with_capacity(drafts.len());
    for draft in drafts {
        if draft.evidence.is_empty() {
            continue;
        }
        findings.push(create_finding(&comparator_type, input, left, right, draft)?);
    }
    debug!(
        invariant_id = %invariant.id,
        comparator = %comparator_type,
        findings = findings.len(),
        completeness = coverage.completeness,
        "comparator evaluated"
    );

    Ok(ComparatorResult {
        invariant_id: invariant.id.clone(),
        comparator_type,
        evaluated: true,
        skipped_reason: None,
        findings,
        coverage,
    })
}

fn build_coverage<L, R>(
    left: &ArtifactSnapshot,
    left_facts: &Extraction<L>,
    right: &ArtifactSnapshot,
    right_facts: &Extraction<R>,
) -> Coverage {
    let mut coverage = Coverage::default();
    let sides = [
        (Side::Left, left.artifact_type(), left_facts.usable, &left_facts.gaps),
        (Side::Right, right.artifact_type(), right_facts.usable, &right_facts.gaps),
    ];
    for (side, artifact_type, usable, gaps) in sides {
        if usable {
            coverage.artifacts_checked.push(artifact_type);
        } else {
            coverage.artifacts_skipped.push(artifact_type);
        }
        for gap in gaps {
            coverage
                .parse_gaps
                .push(format!("{} {}: {}", side.as_str(), artifact_type.as_str(), gap));
        }
    }
    coverage.completeness = coverage.artifacts_checked.len() as f64 / 2.0;
    coverage
}

pub fn create_finding(
    comparator_type: &str,
    input: &ComparatorInput,
    left: &ArtifactSnapshot,
    right: &ArtifactSnapshot,
    draft: FindingDraft,
) -> CoreResult<IntegrityFinding> {
    let severity = draft.severity.unwrap_or(input.invariant.severity);
    let confidence = calculate_confidence(&draft.evidence);
    let impact = calculate_impact(severity, &draft.evidence);
    let band = determine_band(confidence, impact, severity);
    let recommended_action = determine_recommended_action(band, severity);
    let owner_routing = route_to_owners(&input.context);
    let domains = extract_domains(&draft.evidence);

    let fingerprint = fingerprint(&json!({
        "invariant_id": input.invariant.id,
        "drift_type": draft.drift_type,
        "left_snapshot_id": left.id,
        "right_snapshot_id": right.id,
        "evidence": draft
            .evidence
            .iter()
            .map(|e| json!({"kind": e.kind, "left": e.left_value, "right": e.right_value}))
            .collect::<Vec<_>>(),
    }))?;

    Ok(IntegrityFinding {
        id: prefixed_ulid(FINDING_ID_PREFIX),
        workspace_id: left.workspace_id.clone(),
        contract_id: left.contract_id.clone(),
        invariant_id: input.invariant.id.clone(),
        comparator_type: comparator_type.to_string(),
        drift_type: draft.drift_type,
        domains,
        severity,
        evidence: draft.evidence,
        confidence,
        impact,
        band,
        recommended_action,
        owner_routing,
        left_snapshot_id: left.id.clone(),
        right_snapshot_id: right.id.clone(),
        signal_event_id: input.context.signal_event_id.clone(),
        fingerprint,
        created_at: now_rfc3339_utc(),
    })
}

pub(crate) fn now_rfc3339_utc() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}
