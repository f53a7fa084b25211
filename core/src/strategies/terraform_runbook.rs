//! Terraform source vs. operational runbook.
//!
//! Every discrepancy finding carries corroborating `*_exact_match` /
//! `*_fuzzy_match` evidence describing how solid the extraction behind it is:
//! whether the IaC block parsed cleanly, whether the runbook had the
//! dedicated section, and whether the name is absent from the whole page.

use crate::comparator::template::{ComparatorStrategy, Extraction};
use crate::comparator::types::{
    ArtifactExtract, ArtifactSnapshot, ArtifactType, EvidenceItem, FindingDraft, Invariant,
    Severity, SourcePointer,
};
use crate::error::CoreResult;
use crate::strategies::corroboration;
use crate::strategies::parsing::markdown::{MarkdownParser, RunbookEntry, RunbookFacts};
use crate::strategies::parsing::mentions_word;
use crate::strategies::parsing::terraform::{TerraformFacts, TerraformParser, TfResource};
use serde_json::{json, Value};

pub const TERRAFORM_RUNBOOK_COMPARATOR: &str = "terraform_runbook";

const CRITICAL_RESOURCE_TYPES: &[&str] = &[
    "aws_db_instance",
    "aws_rds_cluster",
    "aws_rds_cluster_instance",
    "aws_dynamodb_table",
    "aws_elasticache_cluster",
    "aws_redshift_cluster",
    "aws_lb",
    "aws_alb",
    "aws_elb",
    "aws_eks_cluster",
    "aws_ecs_cluster",
    "google_sql_database_instance",
    "google_container_cluster",
    "google_compute_forwarding_rule",
    "azurerm_mssql_server",
    "azurerm_postgresql_server",
    "azurerm_kubernetes_cluster",
    "azurerm_lb",
];

const HIGH_RESOURCE_TYPES: &[&str] = &[
    "aws_instance",
    "aws_launch_template",
    "aws_autoscaling_group",
    "aws_ecs_service",
    "aws_ecs_task_definition",
    "aws_lambda_function",
    "google_compute_instance",
    "google_cloudfunctions_function",
    "google_cloud_run_service",
    "azurerm_linux_virtual_machine",
    "azurerm_windows_virtual_machine",
    "azurerm_function_app",
];

const MEDIUM_RESOURCE_TYPES: &[&str] = &[
    "aws_s3_bucket",
    "aws_iam_role",
    "aws_iam_policy",
    "aws_security_group",
    "aws_sns_topic",
    "aws_sqs_queue",
    "aws_cloudwatch_log_group",
    "aws_route53_record",
    "aws_vpc",
    "aws_subnet",
    "google_storage_bucket",
    "azurerm_storage_account",
];

/// Severity for a missing resource of this type, and whether the type was
/// found in the known tables (as opposed to classified by name heuristics).
pub fn resource_criticality(resource_type: &str) -> (Severity, bool) {
    if CRITICAL_RESOURCE_TYPES.contains(&resource_type) {
        return (Severity::Critical, true);
    }
    if HIGH_RESOURCE_TYPES.contains(&resource_type) {
        return (Severity::High, true);
    }
    if MEDIUM_RESOURCE_TYPES.contains(&resource_type) {
        return (Severity::Medium, true);
    }
    let t = resource_type.to_ascii_lowercase();
    let critical_hints = ["database", "db_instance", "_db_", "load_balancer", "_lb", "cluster"];
    let high_hints = [
        "instance",
        "compute",
        "lambda",
        "function",
        "autoscaling",
        "container",
        "vm",
    ];
    if critical_hints.iter().any(|h| t.contains(h)) {
        (Severity::Critical, false)
    } else if high_hints.iter().any(|h| t.contains(h)) {
        (Severity::High, false)
    } else {
        (Severity::Medium, false)
    }
}

pub struct TerraformRunbookComparator {
    terraform: TerraformParser,
    markdown: MarkdownParser,
}

impl TerraformRunbookComparator {
    pub fn new() -> CoreResult<Self> {
        Ok(Self {
            terraform: TerraformParser::new()?,
            markdown: MarkdownParser::new()?,
        })
    }
}

struct Pointers<'a> {
    left: &'a str,
    right: &'a str,
}

impl Pointers<'_> {
    fn left(&self, line: u32) -> SourcePointer {
        SourcePointer {
            artifact_id: self.left.to_string(),
            path: None,
            line: Some(line),
        }
    }

    fn right(&self, line: u32) -> SourcePointer {
        SourcePointer {
            artifact_id: self.right.to_string(),
            path: None,
            line: Some(line),
        }
    }
}

fn ignored_types(invariant: &Invariant) -> Vec<String> {
    invariant
        .config
        .as_ref()
        .and_then(|c| c.get("ignore_resource_types"))
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn entry_matches(entry: &RunbookEntry, resource: &TfResource) -> bool {
    match &entry.address {
        Some((t, n)) => *t == resource.resource_type && *n == resource.name,
        None => entry.name == resource.name || entry.name == resource.address(),
    }
}

fn entry_value(entry: &RunbookEntry) -> Value {
    json!({
        "name": entry.name,
        "address": entry.address.as_ref().map(|(t, n)| format!("{}.{}", t, n)),
        "text": entry.raw,
    })
}

impl ComparatorStrategy for TerraformRunbookComparator {
    type LeftFacts = (String, TerraformFacts);
    type RightFacts = (String, RunbookFacts);

    fn comparator_type(&self) -> &str {
        TERRAFORM_RUNBOOK_COMPARATOR
    }

    fn supported_artifact_types(&self) -> (ArtifactType, ArtifactType) {
        (ArtifactType::Terraform, ArtifactType::Runbook)
    }

    fn extract_left(&self, snapshot: &ArtifactSnapshot) -> Extraction<Self::LeftFacts> {
        let id = snapshot.id.clone();
        match &snapshot.payload {
            ArtifactExtract::Terraform(t) => {
                let ex = self.terraform.parse(&t.content);
                Extraction {
                    facts: (id, ex.facts),
                    gaps: ex.gaps,
                    usable: ex.usable,
                }
            }
            _ => Extraction::unusable((id, TerraformFacts::default()), "payload is not terraform"),
        }
    }

    fn extract_right(&self, snapshot: &ArtifactSnapshot) -> Extraction<Self::RightFacts> {
        let id = snapshot.id.clone();
        match &snapshot.payload {
            ArtifactExtract::Runbook(t) => {
                let ex = self.markdown.parse_runbook(&t.content);
                Extraction {
                    facts: (id, ex.facts),
                    gaps: ex.gaps,
                    usable: ex.usable,
                }
            }
            _ => Extraction::unusable((id, RunbookFacts::default()), "payload is not a runbook"),
        }
    }

    fn perform_comparison(
        &self,
        invariant: &Invariant,
        left: &Self::LeftFacts,
        right: &Self::RightFacts,
    ) -> Vec<FindingDraft> {
        let (left_id, iac) = left;
        let (right_id, runbook) = right;
        let ptr = Pointers {
            left: left_id,
            right: right_id,
        };
        let ignored = ignored_types(invariant);
        let mut drafts = Vec::new();

        // resource_missing: declared in IaC, not listed in the runbook
        for res in iac
            .resources
            .iter()
            .filter(|r| !ignored.contains(&r.resource_type))
        {
            if runbook.resources.iter().any(|e| entry_matches(e, res)) {
                continue;
            }
            let (severity, known_type) = resource_criticality(&res.resource_type);
            let absent = !mentions_word(&runbook.text, &res.name)
                && !runbook.text.contains(&res.address());
            drafts.push(FindingDraft {
                drift_type: "resource_missing".to_string(),
                severity: Some(severity),
                evidence: vec![
                    EvidenceItem::new(
                        "resource_missing",
                        json!({
                            "type": res.resource_type,
                            "name": res.name,
                            "address": res.address(),
                        }),
                        Value::Null,
                    )
                    .with_left_pointer(ptr.left(res.line)),
                    corroboration("resource", "block", res.terminated),
                    corroboration("resource", "type", known_type),
                    corroboration("resource", "section", runbook.has_resources_section),
                    corroboration("resource", "absence", absent),
                ],
            });
        }

        // resource_deprecated: listed in the runbook, gone from IaC
        for entry in &runbook.resources {
            if let Some((t, _)) = &entry.address {
                if ignored.contains(t) {
                    continue;
                }
            }
            if iac.resources.iter().any(|r| entry_matches(entry, r)) {
                continue;
            }
            drafts.push(FindingDraft {
                drift_type: "resource_deprecated".to_string(),
                severity: Some(Severity::Medium),
                evidence: vec![
                    EvidenceItem::new("resource_deprecated", Value::Null, entry_value(entry))
                        .with_right_pointer(ptr.right(entry.line)),
                    corroboration("resource", "section", true),
                    corroboration("resource", "address", entry.address.is_some()),
                ],
            });
        }

        // variable_undocumented
        for var in &iac.variables {
            let documented = runbook.variables.iter().any(|e| e.name == var.name);
            if documented {
                continue;
            }
            let severity = if var.has_default() {
                Severity::Medium
            } else {
                Severity::High
            };
            let absent = !mentions_word(&runbook.text, &var.name);
            drafts.push(FindingDraft {
                drift_type: "variable_undocumented".to_string(),
                severity: Some(severity),
                evidence: vec![
                    EvidenceItem::new(
                        "variable_undocumented",
                        json!({
                            "name": var.name,
                            "has_default": var.has_default(),
                            "default": var.default,
                        }),
                        Value::Null,
                    )
                    .with_left_pointer(ptr.left(var.line)),
                    corroboration("variable", "block", var.terminated),
                    corroboration("variable", "section", runbook.has_variables_section),
                    corroboration("variable", "absence", absent),
                ],
            });
        }

        // deployment_step_missing: outputs exist but no terraform plan/apply step
        if !iac.outputs.is_empty() {
            let has_tf_step = runbook.steps.iter().any(|s| {
                let t = s.text.to_ascii_lowercase();
                t.contains("terraform apply") || t.contains("terraform plan")
            });
            if !has_tf_step {
                let outputs: Vec<&str> = iac.outputs.iter().map(|o| o.name.as_str()).collect();
                drafts.push(FindingDraft {
                    drift_type: "deployment_step_missing".to_string(),
                    severity: Some(Severity::High),
                    evidence: vec![
                        EvidenceItem::new(
                            "deployment_step_missing",
                            json!({"outputs": outputs}),
                            json!({"steps": runbook.steps.len()}),
                        ),
                        corroboration("deployment", "section", runbook.has_deployment_section),
                        corroboration("deployment", "command", !runbook.steps.is_empty()),
                    ],
                });
            }
        }

        // output_not_referenced: output never mentioned by a deployment step
        for out in &iac.outputs {
            if runbook.steps.iter().any(|s| mentions_word(&s.text, &out.name)) {
                continue;
            }
            drafts.push(FindingDraft {
                drift_type: "output_not_referenced".to_string(),
                severity: Some(Severity::Medium),
                evidence: vec![
                    EvidenceItem::new(
                        "output_not_referenced",
                        json!({"name": out.name}),
                        Value::Null,
                    )
                    .with_left_pointer(ptr.left(out.line)),
                    corroboration("output", "block", out.terminated),
                    corroboration("output", "section", runbook.has_deployment_section),
                ],
            });
        }

        drafts
    }
}
