use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Pass,
    Warn,
    Fail,
}

impl Band {
    pub fn as_str(&self) -> &'static str {
        match self {
            Band::Pass => "pass",
            Band::Warn => "warn",
            Band::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    BlockMerge,
    CreatePatchCandidate,
    Notify,
    NoAction,
}

impl RecommendedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendedAction::BlockMerge => "block_merge",
            RecommendedAction::CreatePatchCandidate => "create_patch_candidate",
            RecommendedAction::Notify => "notify",
            RecommendedAction::NoAction => "no_action",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMethod {
    ServiceOwner,
    Codeowners,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerRouting {
    pub method: RoutingMethod,
    pub owners: Vec<String>,
}

/// A named consistency rule bound to one comparator type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Invariant {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub enabled: bool,
    pub severity: Severity,
    pub comparator_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArtifactType {
    #[serde(rename = "openapi")]
    OpenApi,
    #[serde(rename = "docs")]
    Docs,
    #[serde(rename = "terraform")]
    Terraform,
    #[serde(rename = "runbook")]
    Runbook,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::OpenApi => "openapi",
            ArtifactType::Docs => "docs",
            ArtifactType::Terraform => "terraform",
            ArtifactType::Runbook => "runbook",
        }
    }
}

/// OpenAPI document, already decoded to JSON by the fetch step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenApiExtract {
    pub document: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextExtract {
    #[serde(default)]
    pub path: Option<String>,
    pub content: String,
}

/// Snapshot payload, tagged by artifact type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "artifact_type", content = "extract")]
pub enum ArtifactExtract {
    #[serde(rename = "openapi")]
    OpenApi(OpenApiExtract),
    #[serde(rename = "docs")]
    Docs(TextExtract),
    #[serde(rename = "terraform")]
    Terraform(TextExtract),
    #[serde(rename = "runbook")]
    Runbook(TextExtract),
}

impl ArtifactExtract {
    pub fn artifact_type(&self) -> ArtifactType {
        match self {
            ArtifactExtract::OpenApi(_) => ArtifactType::OpenApi,
            ArtifactExtract::Docs(_) => ArtifactType::Docs,
            ArtifactExtract::Terraform(_) => ArtifactType::Terraform,
            ArtifactExtract::Runbook(_) => ArtifactType::Runbook,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotVersion {
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
    pub captured_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactSnapshot {
    pub id: String,
    pub workspace_id: String,
    pub contract_id: String,
    #[serde(flatten)]
    pub payload: ArtifactExtract,
    pub version: SnapshotVersion,
}

impl ArtifactSnapshot {
    pub fn artifact_type(&self) -> ArtifactType {
        self.payload.artifact_type()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourcePointer {
    pub artifact_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

/// One atomic observed discrepancy or match between two snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceItem {
    pub kind: String,
    #[serde(default)]
    pub left_value: Value,
    #[serde(default)]
    pub right_value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_pointer: Option<SourcePointer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_pointer: Option<SourcePointer>,
}

impl EvidenceItem {
    pub fn new(kind: impl Into<String>, left_value: Value, right_value: Value) -> Self {
        Self {
            kind: kind.into(),
            left_value,
            right_value,
            left_pointer: None,
            right_pointer: None,
        }
    }

    /// Marker item with no values, used for corroborating matches.
    pub fn marker(kind: impl Into<String>) -> Self {
        Self::new(kind, Value::Null, Value::Null)
    }

    pub fn with_left_pointer(mut self, pointer: SourcePointer) -> Self {
        self.left_pointer = Some(pointer);
        self
    }

    pub fn with_right_pointer(mut self, pointer: SourcePointer) -> Self {
        self.right_pointer = Some(pointer);
        self
    }

    /// Text before the first underscore of `kind`.
    pub fn domain(&self) -> &str {
        self.kind.split('_').next().unwrap_or_default()
    }
}

/// Strategy output: evidence for one logical finding, before scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct FindingDraft {
    pub drift_type: String,
    /// Falls back to the invariant severity when the strategy has no opinion.
    pub severity: Option<Severity>,
    pub evidence: Vec<EvidenceItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoutingContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_event_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComparatorInput {
    pub invariant: Invariant,
    pub left_snapshot: Option<ArtifactSnapshot>,
    pub right_snapshot: Option<ArtifactSnapshot>,
    #[serde(default)]
    pub context: RoutingContext,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntegrityFinding {
    pub id: String,
    pub workspace_id: String,
    pub contract_id: String,
    pub invariant_id: String,
    pub comparator_type: String,
    pub drift_type: String,
    pub domains: Vec<String>,
    pub severity: Severity,
    pub evidence: Vec<EvidenceItem>,
    pub confidence: f64,
    pub impact: f64,
    pub band: Band,
    pub recommended_action: RecommendedAction,
    pub owner_routing: OwnerRouting,
    pub left_snapshot_id: String,
    pub right_snapshot_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_event_id: Option<String>,
    pub fingerprint: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotApplicable,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Coverage {
    pub artifacts_checked: Vec<ArtifactType>,
    pub artifacts_skipped: Vec<ArtifactType>,
    pub completeness: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parse_gaps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComparatorResult {
    pub invariant_id: String,
    pub comparator_type: String,
    pub evaluated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<SkipReason>,
    pub findings: Vec<IntegrityFinding>,
    pub coverage: Coverage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn evidence_domain_is_first_token() {
        assert_eq!(EvidenceItem::marker("endpoint_missing").domain(), "endpoint");
        assert_eq!(EvidenceItem::marker("schema").domain(), "schema");
        assert_eq!(EvidenceItem::marker("").domain(), "");
    }

    #[test]
    fn snapshot_payload_is_tagged_by_artifact_type() {
        let snap: ArtifactSnapshot = serde_json::from_value(json!({
            "id": "s1",
            "workspace_id": "w1",
            "contract_id": "c1",
            "artifact_type": "terraform",
            "extract": {"content": "resource \"aws_s3_bucket\" \"logs\" {}"},
            "version": {"ref": "main", "captured_at_ms": 0}
        }))
        .unwrap();
        assert_eq!(snap.artifact_type(), ArtifactType::Terraform);
        match snap.payload {
            ArtifactExtract::Terraform(t) => assert!(t.content.contains("aws_s3_bucket")),
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
