//! Finding scoring shared by every comparator strategy.
//!
//! Scores are accumulated as integer tenths/hundredths and divided once, so
//! threshold comparisons (`>= 0.8`, `>= 0.6`) are not disturbed by float
//! summation error.

use crate::comparator::types::{
    Band, EvidenceItem, OwnerRouting, RecommendedAction, RoutingContext, RoutingMethod, Severity,
};

const EXACT_MATCH_SUFFIX: &str = "_exact_match";
const FUZZY_MATCH_SUFFIX: &str = "_fuzzy_match";
const BREAKING_CHANGE_MARKER: &str = "breaking_change";

pub const FAIL_CONFIDENCE: f64 = 0.8;
pub const FAIL_IMPACT: f64 = 0.8;
pub const WARN_CONFIDENCE: f64 = 0.6;

/// +0.2 per `*_exact_match`, +0.1 per `*_fuzzy_match`, clamped to [0, 1].
pub fn calculate_confidence(evidence: &[EvidenceItem]) -> f64 {
    if evidence.is_empty() {
        return 0.0;
    }
    let tenths: u64 = evidence
        .iter()
        .map(|e| {
            if e.kind.ends_with(EXACT_MATCH_SUFFIX) {
                2
            } else if e.kind.ends_with(FUZZY_MATCH_SUFFIX) {
                1
            } else {
                0
            }
        })
        .sum();
    (tenths as f64 / 10.0).clamp(0.0, 1.0)
}

fn severity_base_hundredths(severity: Severity) -> u64 {
    match severity {
        Severity::Critical => 100,
        Severity::High => 80,
        Severity::Medium => 50,
        Severity::Low => 20,
    }
}

/// Severity base, +0.05 per evidence item, +0.2 on any breaking change; clamped to [0, 1].
pub fn calculate_impact(severity: Severity, evidence: &[EvidenceItem]) -> f64 {
    let mut hundredths = severity_base_hundredths(severity) + 5 * evidence.len() as u64;
    if evidence
        .iter()
        .any(|e| e.kind.contains(BREAKING_CHANGE_MARKER))
    {
        hundredths += 20;
    }
    (hundredths as f64 / 100.0).clamp(0.0, 1.0)
}

pub fn determine_band(confidence: f64, impact: f64, severity: Severity) -> Band {
    if confidence >= FAIL_CONFIDENCE && (severity == Severity::Critical || impact >= FAIL_IMPACT) {
        Band::Fail
    } else if confidence >= WARN_CONFIDENCE
        && matches!(severity, Severity::High | Severity::Critical)
    {
        Band::Warn
    } else {
        Band::Pass
    }
}

pub fn determine_recommended_action(band: Band, severity: Severity) -> RecommendedAction {
    match (band, severity) {
        (Band::Fail, Severity::Critical) => RecommendedAction::BlockMerge,
        (Band::Fail, _) => RecommendedAction::CreatePatchCandidate,
        (Band::Warn, Severity::High) => RecommendedAction::CreatePatchCandidate,
        (Band::Warn, _) => RecommendedAction::Notify,
        (Band::Pass, _) => RecommendedAction::NoAction,
    }
}

pub fn route_to_owners(context: &RoutingContext) -> OwnerRouting {
    let present = |v: &Option<String>| {
        v.as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    };
    if let Some(service) = present(&context.service) {
        OwnerRouting {
            method: RoutingMethod::ServiceOwner,
            owners: vec![service],
        }
    } else if let Some(repo) = present(&context.repo) {
        OwnerRouting {
            method: RoutingMethod::Codeowners,
            owners: vec![repo],
        }
    } else {
        OwnerRouting {
            method: RoutingMethod::Fallback,
            owners: vec![],
        }
    }
}

/// Evidence domains, deduplicated in first-seen order.
pub fn extract_domains(evidence: &[EvidenceItem]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in evidence {
        let domain = item.domain();
        if !out.iter().any(|d| d == domain) {
            out.push(domain.to_string());
        }
    }
    out
}
