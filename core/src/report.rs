use crate::comparator::types::{ComparatorResult, IntegrityFinding};
use crate::error::CoreResult;
use std::cmp::Reverse;

/// Fail before warn before pass, then most severe first.
fn sorted(findings: &[IntegrityFinding]) -> Vec<&IntegrityFinding> {
    let mut rows: Vec<&IntegrityFinding> = findings.iter().collect();
    rows.sort_by_key(|f| {
        (
            Reverse(f.band),
            Reverse(f.severity),
            f.drift_type.clone(),
            f.fingerprint.clone(),
        )
    });
    rows
}

fn evidence_kinds(f: &IntegrityFinding) -> String {
    f.evidence
        .iter()
        .map(|e| e.kind.as_str())
        .collect::<Vec<_>>()
        .join(";")
}

pub fn render_findings_csv(findings: &[IntegrityFinding]) -> CoreResult<String> {
    let mut wtr = csv::WriterBuilder::new().from_writer(vec![]);
    wtr.write_record([
        "band",
        "severity",
        "drift_type",
        "invariant_id",
        "comparator_type",
        "confidence",
        "impact",
        "recommended_action",
        "owners",
        "domains",
        "evidence_kinds",
        "fingerprint",
    ])?;
    for f in sorted(findings) {
        wtr.write_record([
            f.band.as_str().to_string(),
            f.severity.as_str().to_string(),
            f.drift_type.clone(),
            f.invariant_id.clone(),
            f.comparator_type.clone(),
            format!("{:.2}", f.confidence),
            format!("{:.2}", f.impact),
            f.recommended_action.as_str().to_string(),
            f.owner_routing.owners.join(";"),
            f.domains.join(";"),
            evidence_kinds(f),
            f.fingerprint.clone(),
        ])?;
    }
    let bytes = wtr.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8_lossy(&bytes).replace("\r\n", "\n"))
}

pub fn render_findings_markdown(results: &[ComparatorResult]) -> String {
    let mut out = Vec::new();
    out.push("# Drift Findings".to_string());
    out.push("".to_string());
    out.push("| Invariant | Comparator | Evaluated | Completeness | Findings |".to_string());
    out.push("|---|---|---|---|---|".to_string());
    for r in results {
        out.push(format!(
            "| {} | {} | {} | {:.2} | {} |",
            r.invariant_id,
            r.comparator_type,
            if r.evaluated { "yes" } else { "no" },
            r.coverage.completeness,
            r.findings.len()
        ));
    }
    out.push("".to_string());

    let all: Vec<IntegrityFinding> = results.iter().flat_map(|r| r.findings.clone()).collect();
    if all.is_empty() {
        out.push("No drift detected.".to_string());
        out.push("".to_string());
        return out.join("\n");
    }
    out.push("| Band | Severity | Drift Type | Invariant | Action | Owners |".to_string());
    out.push("|---|---|---|---|---|---|".to_string());
    for f in sorted(&all) {
        out.push(format!(
            "| {} | {} | {} | {} | {} | {} |",
            f.band.as_str(),
            f.severity.as_str(),
            f.drift_type,
            f.invariant_id,
            f.recommended_action.as_str(),
            f.owner_routing.owners.join(", ")
        ));
    }

    let gaps: Vec<&String> = results
        .iter()
        .flat_map(|r| r.coverage.parse_gaps.iter())
        .collect();
    if !gaps.is_empty() {
        out.push("".to_string());
        out.push("## Parse gaps".to_string());
        out.push("".to_string());
        for g in gaps {
            out.push(format!("- {}", g));
        }
    }
    out.push("".to_string());
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::types::{
        Band, Coverage, EvidenceItem, OwnerRouting, RecommendedAction, RoutingMethod, Severity,
    };

    fn finding(drift_type: &str, band: Band, severity: Severity) -> IntegrityFinding {
        IntegrityFinding {
            id: format!("if_{}", drift_type),
            workspace_id: "w".to_string(),
            contract_id: "c".to_string(),
            invariant_id: "inv".to_string(),
            comparator_type: "terraform_runbook".to_string(),
            drift_type: drift_type.to_string(),
            domains: vec!["resource".to_string()],
            severity,
            evidence: vec![
                EvidenceItem::marker(drift_type),
                EvidenceItem::marker("resource_block_exact_match"),
            ],
            confidence: 0.4,
            impact: 0.75,
            band,
            recommended_action: RecommendedAction::Notify,
            owner_routing: OwnerRouting {
                method: RoutingMethod::Fallback,
                owners: vec!["platform-team".to_string()],
            },
            left_snapshot_id: "l".to_string(),
            right_snapshot_id: "r".to_string(),
            signal_event_id: None,
            fingerprint: drift_type.to_string(),
            created_at: String::new(),
        }
    }

    #[test]
    fn csv_orders_fail_band_first() {
        let csv = render_findings_csv(&[
            finding("output_not_referenced", Band::Pass, Severity::Medium),
            finding("resource_missing", Band::Fail, Severity::Critical),
        ])
        .unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("band,severity,drift_type"));
        assert!(lines[1].starts_with("fail,critical,resource_missing"));
        assert!(lines[1].contains("resource_missing;resource_block_exact_match"));
        assert!(!csv.contains('\r'));
    }

    #[test]
    fn markdown_lists_results_and_gaps() {
        let result = ComparatorResult {
            invariant_id: "inv".to_string(),
            comparator_type: "terraform_runbook".to_string(),
            evaluated: true,
            skipped_reason: None,
            findings: vec![finding("resource_missing", Band::Warn, Severity::High)],
            coverage: Coverage {
                completeness: 1.0,
                parse_gaps: vec!["left terraform: unterminated block".to_string()],
                ..Default::default()
            },
        };
        let md = render_findings_markdown(&[result]);
        assert!(md.contains("| inv | terraform_runbook | yes | 1.00 | 1 |"));
        assert!(md.contains("| warn | high | resource_missing | inv | notify | platform-team |"));
        assert!(md.contains("- left terraform: unterminated block"));
        assert!(render_findings_markdown(&[]).contains("No drift detected."));
    }
}
