use crate::comparator::template::{ComparatorStrategy, Extraction};
use crate::comparator::types::{
    ArtifactExtract, ArtifactSnapshot, ArtifactType, EvidenceItem, FindingDraft, Invariant,
    Severity, SourcePointer,
};
use crate::error::CoreResult;
use crate::strategies::corroboration;
use crate::strategies::parsing::markdown::{DocsFacts, EndpointMention, MarkdownParser};
use crate::strategies::parsing::openapi::{parse_openapi, ApiEndpoint, ApiSpecFacts};
use crate::strategies::parsing::{mentions_word, normalize_api_path, path_matches};
use serde_json::{json, Value};
use std::collections::BTreeSet;

pub const OPENAPI_DOCS_COMPARATOR: &str = "openapi_docs";

/// OpenAPI document vs. developer documentation page.
pub struct OpenApiDocsComparator {
    markdown: MarkdownParser,
}

impl OpenApiDocsComparator {
    pub fn new() -> CoreResult<Self> {
        Ok(Self {
            markdown: MarkdownParser::new()?,
        })
    }
}

fn ignored_paths(invariant: &Invariant) -> Vec<String> {
    invariant
        .config
        .as_ref()
        .and_then(|c| c.get("ignore_paths"))
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(normalize_api_path)
                .collect()
        })
        .unwrap_or_default()
}

fn is_ignored(endpoint: &ApiEndpoint, ignored: &[String]) -> bool {
    ignored.iter().any(|prefix| {
        endpoint.normalized == *prefix
            || endpoint
                .normalized
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

fn mention_matches(endpoint: &ApiEndpoint, mention: &EndpointMention) -> bool {
    endpoint.method == mention.method && path_matches(&endpoint.normalized, &mention.normalized)
}

fn endpoint_value(endpoint: &ApiEndpoint) -> Value {
    json!({
        "method": endpoint.method,
        "path": endpoint.path,
        "operation_id": endpoint.operation_id,
        "deprecated": endpoint.deprecated,
    })
}

impl ComparatorStrategy for OpenApiDocsComparator {
    type LeftFacts = (String, ApiSpecFacts);
    type RightFacts = (String, DocsFacts);

    fn comparator_type(&self) -> &str {
        OPENAPI_DOCS_COMPARATOR
    }

    fn supported_artifact_types(&self) -> (ArtifactType, ArtifactType) {
        (ArtifactType::OpenApi, ArtifactType::Docs)
    }

    fn extract_left(&self, snapshot: &ArtifactSnapshot) -> Extraction<Self::LeftFacts> {
        let id = snapshot.id.clone();
        match &snapshot.payload {
            ArtifactExtract::OpenApi(api) => {
                let ex = parse_openapi(&api.document);
                Extraction {
                    facts: (id, ex.facts),
                    gaps: ex.gaps,
                    usable: ex.usable,
                }
            }
            _ => Extraction::unusable((id, ApiSpecFacts::default()), "payload is not openapi"),
        }
    }

    fn extract_right(&self, snapshot: &ArtifactSnapshot) -> Extraction<Self::RightFacts> {
        let id = snapshot.id.clone();
        match &snapshot.payload {
            ArtifactExtract::Docs(t) => {
                let ex = self.markdown.parse_docs(&t.content);
                Extraction {
                    facts: (id, ex.facts),
                    gaps: ex.gaps,
                    usable: ex.usable,
                }
            }
            _ => Extraction::unusable((id, DocsFacts::default()), "payload is not docs"),
        }
    }

    fn perform_comparison(
        &self,
        invariant: &Invariant,
        left: &Self::LeftFacts,
        right: &Self::RightFacts,
    ) -> Vec<FindingDraft> {
        let (_, api) = left;
        let (docs_id, docs) = right;
        let ignored = ignored_paths(invariant);
        let endpoints: Vec<&ApiEndpoint> = api
            .endpoints
            .iter()
            .filter(|e| !is_ignored(e, &ignored))
            .collect();
        let pointer = |line: u32| SourcePointer {
            artifact_id: docs_id.clone(),
            path: None,
            line: Some(line),
        };
        let mut drafts = Vec::new();

        for endpoint in &endpoints {
            let mentions: Vec<&EndpointMention> = docs
                .endpoint_mentions
                .iter()
                .filter(|m| mention_matches(endpoint, m))
                .collect();

            if mentions.is_empty() {
                // the bare path showing up somewhere weakens the absence claim
                let path_in_text = docs.text.contains(&endpoint.path)
                    || (endpoint.normalized != "/" && docs.text.contains(&endpoint.normalized));
                drafts.push(FindingDraft {
                    drift_type: "endpoint_missing".to_string(),
                    severity: Some(if endpoint.deprecated {
                        Severity::Low
                    } else {
                        Severity::High
                    }),
                    evidence: vec![
                        EvidenceItem::new(
                            "endpoint_missing",
                            endpoint_value(endpoint),
                            Value::Null,
                        ),
                        EvidenceItem::marker("endpoint_path_exact_match"),
                        EvidenceItem::marker("endpoint_method_exact_match"),
                        corroboration("endpoint", "absence", !path_in_text),
                    ],
                });
                continue;
            }

            // parameter_missing: one finding per documented endpoint
            let missing: Vec<EvidenceItem> = endpoint
                .parameters
                .iter()
                .filter(|p| p.required && !mentions_word(&docs.text, &p.name))
                .map(|p| {
                    EvidenceItem::new(
                        "parameter_missing",
                        json!({
                            "method": endpoint.method,
                            "path": endpoint.path,
                            "name": p.name,
                            "in": p.location,
                        }),
                        Value::Null,
                    )
                    .with_right_pointer(pointer(mentions[0].line))
                })
                .collect();
            if !missing.is_empty() {
                let mut evidence = missing;
                evidence.push(EvidenceItem::marker("parameter_required_exact_match"));
                drafts.push(FindingDraft {
                    drift_type: "parameter_missing".to_string(),
                    severity: Some(Severity::Medium),
                    evidence,
                });
            }

            // example_missing
            let in_code_mention = mentions.iter().any(|m| m.in_code);
            let code_path = docs
                .code_paths
                .iter()
                .any(|p| path_matches(&endpoint.normalized, p));
            if !in_code_mention && !code_path {
                drafts.push(FindingDraft {
                    drift_type: "example_missing".to_string(),
                    severity: Some(Severity::Medium),
                    evidence: vec![
                        EvidenceItem::new(
                            "example_missing",
                            endpoint_value(endpoint),
                            json!({"code_blocks": docs.code_blocks.len()}),
                        )
                        .with_right_pointer(pointer(mentions[0].line)),
                        corroboration("example", "search", docs.code_blocks.is_empty()),
                    ],
                });
            }
        }

        // endpoint_deprecated: documented but gone from the API document
        let mut seen = BTreeSet::new();
        for mention in &docs.endpoint_mentions {
            if api.endpoints.iter().any(|e| mention_matches(e, mention)) {
                continue;
            }
            if !seen.insert((mention.method.clone(), mention.normalized.clone())) {
                continue;
            }
            drafts.push(FindingDraft {
                drift_type: "endpoint_deprecated".to_string(),
                severity: Some(Severity::Medium),
                evidence: vec![
                    EvidenceItem::new(
                        "endpoint_deprecated",
                        Value::Null,
                        json!({"method": mention.method, "path": mention.path}),
                    )
                    .with_right_pointer(pointer(mention.line)),
                    corroboration("endpoint", "mention", mention.in_code),
                ],
            });
        }

        // schema_missing
        for schema in &api.schemas {
            if mentions_word(&docs.text, schema) {
                continue;
            }
            drafts.push(FindingDraft {
                drift_type: "schema_missing".to_string(),
                severity: Some(Severity::Medium),
                evidence: vec![
                    EvidenceItem::new("schema_missing", json!({"name": schema}), Value::Null),
                    EvidenceItem::marker("schema_definition_exact_match"),
                ],
            });
        }

        drafts
    }
}
