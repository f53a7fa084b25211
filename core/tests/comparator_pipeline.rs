use drift_core::comparator::registry::ComparatorRegistry;
use drift_core::comparator::types::{
    Band, ComparatorInput, ComparatorResult, IntegrityFinding, RecommendedAction, RoutingMethod,
    Severity, SkipReason,
};
use drift_core::error::CoreError;
use drift_core::report::render_findings_csv;
use serde_json::{json, Value};

const MAIN_TF: &str = r#"
variable "region" {
  type    = string
  default = "us-east-1"
}

variable "db_password" {
  type = string
}

resource "aws_db_instance" "main" {
  engine = "postgres"
}

resource "aws_s3_bucket" "logs" {
  bucket = "payments-logs"
}

output "db_endpoint" {
  value = aws_db_instance.main.endpoint
}
"#;

const RUNBOOK: &str = "# Payments runbook

## Resources
- `aws_lambda_function.worker` background jobs

## Deployment
1. Run `terraform plan` and review the diff
2. Run `terraform apply`
3. Copy `db_endpoint` into the service config
";

const API_DOCS: &str = "# API

## Users
Fetch a user with `GET /users/{id}`, passing the user id.

```bash
curl https://api.example.com/users/42
```

## Orders
`POST /orders` creates an order from an `Order` body.

## Legacy
`GET /accounts` lists accounts.
";

fn snapshot(id: &str, artifact_type: &str, extract: Value) -> Value {
    json!({
        "id": id,
        "workspace_id": "ws_payments",
        "contract_id": "ct_1",
        "artifact_type": artifact_type,
        "extract": extract,
        "version": {"ref": "main", "sha": "abc123", "captured_at_ms": 1_700_000_000_000i64}
    })
}

fn input(comparator_type: &str, left: Value, right: Value, enabled: bool) -> ComparatorInput {
    serde_json::from_value(json!({
        "invariant": {
            "id": format!("inv_{}", comparator_type),
            "name": "keep artifacts in sync",
            "enabled": enabled,
            "severity": "medium",
            "comparator_type": comparator_type
        },
        "left_snapshot": left,
        "right_snapshot": right,
        "context": {"service": "payments-api"}
    }))
    .unwrap()
}

fn terraform_input() -> ComparatorInput {
    input(
        "terraform_runbook",
        snapshot("snap_tf", "terraform", json!({"path": "main.tf", "content": MAIN_TF})),
        snapshot("snap_rb", "runbook", json!({"content": RUNBOOK})),
        true,
    )
}

fn openapi_document() -> Value {
    json!({
        "openapi": "3.0.0",
        "paths": {
            "/users/{id}": {
                "get": {"parameters": [{"name": "id", "in": "path", "required": true}]},
                "delete": {"deprecated": true}
            },
            "/orders": {
                "post": {"parameters": [
                    {"name": "X-Request-Id", "in": "header", "required": true}
                ]},
                "get": {}
            }
        },
        "components": {"schemas": {"User": {}, "Order": {}}}
    })
}

fn openapi_input(document: Value) -> ComparatorInput {
    input(
        "openapi_docs",
        snapshot("snap_api", "openapi", json!({"document": document})),
        snapshot("snap_docs", "docs", json!({"content": API_DOCS})),
        true,
    )
}

fn run(input: &ComparatorInput) -> ComparatorResult {
    let registry = ComparatorRegistry::with_builtin().unwrap();
    registry.compare(input).unwrap()
}

fn find<'a>(res: &'a ComparatorResult, drift_type: &str, needle: &str) -> &'a IntegrityFinding {
    res.findings
        .iter()
        .find(|f| {
            f.drift_type == drift_type
                && f.evidence
                    .first()
                    .map(|e| {
                        e.left_value.to_string().contains(needle)
                            || e.right_value.to_string().contains(needle)
                    })
                    .unwrap_or(false)
        })
        .unwrap_or_else(|| panic!("no {} finding for {}", drift_type, needle))
}

#[test]
fn terraform_resources_are_scored_by_criticality() {
    let res = run(&terraform_input());
    assert!(res.evaluated);
    assert_eq!(res.coverage.completeness, 1.0);

    let db = find(&res, "resource_missing", "aws_db_instance");
    assert_eq!(db.severity, Severity::Critical);
    assert_eq!(db.band, Band::Fail);
    assert_eq!(db.recommended_action, RecommendedAction::BlockMerge);
    assert_eq!(db.domains, vec!["resource".to_string()]);
    assert_eq!(db.owner_routing.method, RoutingMethod::ServiceOwner);
    assert_eq!(db.owner_routing.owners, vec!["payments-api".to_string()]);
    assert!(db.id.starts_with("if_"));
    assert_eq!(db.evidence[0].left_pointer.as_ref().and_then(|p| p.line), Some(11));

    let bucket = find(&res, "resource_missing", "aws_s3_bucket");
    assert_eq!(bucket.severity, Severity::Medium);

    let lambda = find(&res, "resource_deprecated", "aws_lambda_function.worker");
    assert_eq!(lambda.severity, Severity::Medium);
}

#[test]
fn undocumented_variables_depend_on_default() {
    let res = run(&terraform_input());
    assert_eq!(find(&res, "variable_undocumented", "db_password").severity, Severity::High);
    assert_eq!(find(&res, "variable_undocumented", "region").severity, Severity::Medium);
}

#[test]
fn deployment_steps_cover_outputs() {
    let res = run(&terraform_input());
    assert!(!res.findings.iter().any(|f| f.drift_type == "deployment_step_missing"));
    assert!(!res.findings.iter().any(|f| f.drift_type == "output_not_referenced"));

    let mut without_steps = terraform_input();
    without_steps.right_snapshot = serde_json::from_value(snapshot(
        "snap_rb2",
        "runbook",
        json!({"content": "# Runbook\n\n## Deployment\n- ask the platform team\n"}),
    ))
    .unwrap();
    let res = run(&without_steps);
    let step = res
        .findings
        .iter()
        .find(|f| f.drift_type == "deployment_step_missing")
        .unwrap();
    assert_eq!(step.severity, Severity::High);
    assert!(res
        .findings
        .iter()
        .any(|f| f.drift_type == "output_not_referenced"));
}

#[test]
fn ignored_resource_types_are_skipped() {
    let mut i = terraform_input();
    i.invariant.config = Some(json!({"ignore_resource_types": ["aws_s3_bucket"]}));
    let res = run(&i);
    assert!(!res
        .findings
        .iter()
        .any(|f| f.evidence[0].left_value.to_string().contains("aws_s3_bucket")));
    assert!(res
        .findings
        .iter()
        .any(|f| f.evidence[0].left_value.to_string().contains("aws_db_instance")));
}

#[test]
fn openapi_docs_drift_is_detected() {
    let res = run(&openapi_input(openapi_document()));
    assert!(res.evaluated);

    let missing_get = find(&res, "endpoint_missing", "\"GET\"");
    assert_eq!(missing_get.severity, Severity::High);
    assert!(missing_get.evidence[0].left_value.to_string().contains("/orders"));
    let missing_delete = find(&res, "endpoint_missing", "DELETE");
    assert_eq!(missing_delete.severity, Severity::Low);

    let param = find(&res, "parameter_missing", "X-Request-Id");
    assert_eq!(param.severity, Severity::Medium);
    assert_eq!(find(&res, "example_missing", "/orders").severity, Severity::Medium);
    assert_eq!(find(&res, "endpoint_deprecated", "/accounts").severity, Severity::Medium);
    assert_eq!(find(&res, "schema_missing", "User").severity, Severity::Medium);

    // documented with example and parameter: nothing to report for GET /users/{id}
    assert!(!res
        .findings
        .iter()
        .any(|f| f.drift_type == "example_missing"
            && f.evidence[0].left_value.to_string().contains("/users")));
    assert!(!res
        .findings
        .iter()
        .any(|f| f.drift_type == "schema_missing"
            && f.evidence[0].left_value.to_string().contains("Order")));
}

#[test]
fn unusable_openapi_document_reduces_coverage() {
    let res = run(&openapi_input(json!({"openapi": "3.0.0"})));
    assert!(res.evaluated);
    assert!(res.findings.is_empty());
    assert_eq!(res.coverage.completeness, 0.5);
    assert!(res.coverage.parse_gaps[0].contains("no paths object"));
}

#[test]
fn mismatched_pairs_are_not_applicable() {
    let mut i = terraform_input();
    i.invariant.comparator_type = "openapi_docs".to_string();
    let res = run(&i);
    assert!(!res.evaluated);
    assert_eq!(res.skipped_reason, Some(SkipReason::NotApplicable));
}

#[test]
fn caller_errors_surface_from_registry() {
    let registry = ComparatorRegistry::with_builtin().unwrap();

    let mut disabled = terraform_input();
    disabled.invariant.enabled = false;
    let err = registry.compare(&disabled).unwrap_err();
    assert!(err.to_string().contains("disabled"));

    let mut missing = terraform_input();
    missing.left_snapshot = None;
    let err = registry.compare(&missing).unwrap_err();
    assert!(err.to_string().contains("required"));

    let mut unknown = terraform_input();
    unknown.invariant.comparator_type = "helm_chart".to_string();
    assert!(matches!(
        registry.compare(&unknown),
        Err(CoreError::UnknownComparator(_))
    ));
}

#[test]
fn repeated_runs_share_fingerprints_and_render_stably() {
    let a = run(&terraform_input());
    let b = run(&terraform_input());
    let fa: Vec<&str> = a.findings.iter().map(|f| f.fingerprint.as_str()).collect();
    let fb: Vec<&str> = b.findings.iter().map(|f| f.fingerprint.as_str()).collect();
    assert_eq!(fa, fb);
    assert_eq!(
        render_findings_csv(&a.findings).unwrap(),
        render_findings_csv(&b.findings).unwrap()
    );
}
