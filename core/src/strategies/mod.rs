pub mod openapi_docs;
pub mod parsing;
pub mod terraform_runbook;

use crate::comparator::types::EvidenceItem;

/// Corroborating `<domain>_<aspect>_{exact|fuzzy}_match` marker.
pub(crate) fn corroboration(domain: &str, aspect: &str, exact: bool) -> EvidenceItem {
    let level = if exact { "exact" } else { "fuzzy" };
    EvidenceItem::marker(format!("{}_{}_{}_match", domain, aspect, level))
}
