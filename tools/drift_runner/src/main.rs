use drift_core::accumulation::bridge::{DriftRecord, InMemoryCandidates, InMemoryDriftRecords};
use drift_core::accumulation::engine::AccumulationEngine;
use drift_core::accumulation::store::InMemoryHistoryStore;
use drift_core::comparator::batch::{evaluate_batch, BatchOutcome};
use drift_core::comparator::registry::ComparatorRegistry;
use drift_core::comparator::types::{Band, ComparatorInput, ComparatorResult};
use drift_core::config::DriftConfig;
use drift_core::error::{CoreError, CoreResult};
use drift_core::report::{render_findings_csv, render_findings_markdown};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// One document and the comparator inputs that guard it.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct Pack {
    name: String,
    doc_system: String,
    doc_id: String,
    #[serde(default)]
    doc_title: String,
    inputs: Vec<ComparatorInput>,
}

#[derive(Debug, Default)]
struct Args {
    pack_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    report_dir: Option<PathBuf>,
}

fn parse_args() -> CoreResult<Args> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        let mut value = |flag: &str| {
            it.next()
                .map(PathBuf::from)
                .ok_or_else(|| CoreError::InvalidInput(format!("{} needs a value", flag)))
        };
        match arg.as_str() {
            "--config" => args.config = Some(value("--config")?),
            "--report-dir" => args.report_dir = Some(value("--report-dir")?),
            other if other.starts_with("--") => {
                return Err(CoreError::InvalidInput(format!("unknown flag {}", other)))
            }
            other => args.pack_dir = Some(PathBuf::from(other)),
        }
    }
    Ok(args)
}

fn main() {
    // drift_runner [PACK_DIR] [--config FILE] [--report-dir DIR]
    //
    // Evaluates every comparison pack, prints stable RESULT / FINDING /
    // ACCUMULATE lines and exits non-zero when any finding is in the fail
    // band or any comparator could not be evaluated.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("DRIFT_RUNNER ERROR {}", e);
            std::process::exit(2);
        }
    }
}

fn run() -> CoreResult<i32> {
    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => DriftConfig::from_path(path)?,
        None => DriftConfig::default(),
    };
    let packs = match &args.pack_dir {
        Some(dir) => load_packs(dir)?,
        None => builtin_packs()?,
    };
    info!(packs = packs.len(), "comparison packs loaded");

    let registry = Arc::new(ComparatorRegistry::with_builtin()?);
    let records = Arc::new(InMemoryDriftRecords::new());
    let candidates = Arc::new(InMemoryCandidates::new());
    let engine = AccumulationEngine::new(
        config.accumulation.clone(),
        Arc::new(InMemoryHistoryStore::new()),
        records.clone(),
        candidates.clone(),
    );

    let mut any_fail = false;
    let mut results: Vec<ComparatorResult> = Vec::new();
    for pack in packs {
        println!("PACK {} doc={}/{}", pack.name, pack.doc_system, pack.doc_id);
        let entries = evaluate_batch(Arc::clone(&registry), pack.inputs, config.batch);
        for entry in entries {
            let result = match entry.outcome {
                BatchOutcome::Completed { result } => result,
                BatchOutcome::Failed { error } => {
                    println!(
                        "RESULT {} {} FAILED {}",
                        entry.invariant_id, entry.comparator_type, error
                    );
                    any_fail = true;
                    continue;
                }
                BatchOutcome::TimedOut { limit_ms } => {
                    println!(
                        "RESULT {} {} TIMEOUT limit_ms={}",
                        entry.invariant_id, entry.comparator_type, limit_ms
                    );
                    any_fail = true;
                    continue;
                }
            };
            let status = if result.evaluated { "EVALUATED" } else { "NOT_APPLICABLE" };
            println!(
                "RESULT {} {} {} findings={} completeness={:.2}",
                result.invariant_id,
                result.comparator_type,
                status,
                result.findings.len(),
                result.coverage.completeness
            );

            for finding in &result.findings {
                println!(
                    "FINDING {} {} {} {} {}",
                    finding.band.as_str(),
                    finding.severity.as_str(),
                    finding.drift_type,
                    finding.recommended_action.as_str(),
                    &finding.fingerprint[..12.min(finding.fingerprint.len())]
                );
                if finding.band == Band::Fail {
                    any_fail = true;
                }

                let record = DriftRecord::from_finding(finding, &pack.doc_system, &pack.doc_id);
                records.insert(record.clone())?;
                match engine.accumulate(&record, &pack.doc_title) {
                    Ok(outcome) => println!(
                        "ACCUMULATE {} history={} drifts={} materiality={:.3} candidate={}",
                        pack.doc_id,
                        outcome.history_id,
                        outcome.drift_count,
                        outcome.total_materiality,
                        outcome.candidate_id.as_deref().unwrap_or("-")
                    ),
                    // accumulation trouble stays local to this document
                    Err(e) => warn!(doc_id = %pack.doc_id, error = %e, "accumulation failed"),
                }
            }
            results.push(result);
        }
    }

    for candidate in candidates.all()? {
        println!(
            "CANDIDATE {} {} drifts={} trigger={}",
            candidate.id,
            candidate.drift_type,
            candidate.total_drifts,
            candidate.bundle_trigger.as_str()
        );
    }

    if let Some(dir) = &args.report_dir {
        std::fs::create_dir_all(dir)?;
        let findings: Vec<_> = results.iter().flat_map(|r| r.findings.clone()).collect();
        std::fs::write(dir.join("findings.csv"), render_findings_csv(&findings)?)?;
        std::fs::write(dir.join("findings.md"), render_findings_markdown(&results))?;
        info!(dir = %dir.display(), "reports written");
    }

    Ok(if any_fail { 1 } else { 0 })
}

fn load_packs(dir: &Path) -> CoreResult<Vec<Pack>> {
    let mut packs = Vec::new();
    for e in WalkDir::new(dir).sort_by_file_name() {
        let e =
            e.map_err(|err| CoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, err)))?;
        let is_pack = e
            .file_name()
            .to_str()
            .map(|n| n.ends_with(".pack.json"))
            .unwrap_or(false);
        if !e.file_type().is_file() || !is_pack {
            continue;
        }
        let bytes = std::fs::read(e.path())?;
        let pack: Pack = serde_json::from_slice(&bytes).map_err(|err| {
            CoreError::InvalidInput(format!("{}: {}", e.path().display(), err))
        })?;
        packs.push(pack);
    }
    if packs.is_empty() {
        return Err(CoreError::InvalidInput(format!(
            "no *.pack.json files under {}",
            dir.display()
        )));
    }
    Ok(packs)
}

const BUILTIN_TF: &str = r#"variable "region" {
  default = "us-east-1"
}

resource "aws_db_instance" "orders" {
  engine = "postgres"
}

output "orders_endpoint" {
  value = aws_db_instance.orders.endpoint
}
"#;

const BUILTIN_RUNBOOK: &str = "# Orders runbook

## Resources
- `aws_db_instance.orders` primary database

## Variables
- `region`: deployment region

## Deployment
1. `terraform apply`
2. Publish `orders_endpoint` to the service registry
";

const BUILTIN_DOCS: &str = "# Orders API

Create an order with `POST /orders`, sending an `Order` body.

```sh
curl -X POST https://api.example.com/orders
```
";

fn builtin_packs() -> CoreResult<Vec<Pack>> {
    let snapshot = |id: &str, artifact_type: &str, extract: serde_json::Value| {
        json!({
            "id": id,
            "workspace_id": "ws_builtin",
            "contract_id": "ct_orders",
            "artifact_type": artifact_type,
            "extract": extract,
            "version": {"ref": "main", "captured_at_ms": 0}
        })
    };
    let pack = json!({
        "name": "orders_service",
        "doc_system": "markdown",
        "doc_id": "orders-runbook",
        "doc_title": "Orders runbook",
        "inputs": [
            {
                "invariant": {
                    "id": "inv_orders_iac",
                    "name": "runbook lists provisioned infrastructure",
                    "enabled": true,
                    "severity": "high",
                    "comparator_type": "terraform_runbook"
                },
                "left_snapshot": snapshot(
                    "snap_tf",
                    "terraform",
                    json!({"path": "main.tf", "content": BUILTIN_TF})
                ),
                "right_snapshot": snapshot(
                    "snap_rb",
                    "runbook",
                    json!({"content": BUILTIN_RUNBOOK})
                ),
                "context": {"service": "orders"}
            },
            {
                "invariant": {
                    "id": "inv_orders_api",
                    "name": "docs cover the public API",
                    "enabled": true,
                    "severity": "medium",
                    "comparator_type": "openapi_docs"
                },
                "left_snapshot": snapshot("snap_api", "openapi", json!({"document": {
                    "openapi": "3.0.0",
                    "paths": {"/orders": {"post": {}}},
                    "components": {"schemas": {"Order": {}}}
                }})),
                "right_snapshot": snapshot("snap_docs", "docs", json!({"content": BUILTIN_DOCS})),
                "context": {"repo": "acme/orders"}
            }
        ]
    });
    Ok(vec![serde_json::from_value(pack)?])
}
