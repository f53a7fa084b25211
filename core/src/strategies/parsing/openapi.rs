use super::normalize_api_path;
use crate::comparator::template::Extraction;
use serde::Serialize;
use serde_json::{Map, Value};

pub const HTTP_METHODS: &[&str] = &[
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ApiParameter {
    pub name: String,
    pub location: String,
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ApiEndpoint {
    /// Upper-case HTTP verb.
    pub method: String,
    pub path: String,
    pub normalized: String,
    pub operation_id: Option<String>,
    pub deprecated: bool,
    pub parameters: Vec<ApiParameter>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ApiSpecFacts {
    pub endpoints: Vec<ApiEndpoint>,
    pub schemas: Vec<String>,
}

/// Walk an OpenAPI 3 / Swagger 2 document already decoded to JSON.
pub fn parse_openapi(doc: &Value) -> Extraction<ApiSpecFacts> {
    let mut facts = ApiSpecFacts::default();
    let Some(root) = doc.as_object() else {
        return Extraction::unusable(facts, "openapi document is not a JSON object");
    };
    let Some(paths) = root.get("paths").and_then(Value::as_object) else {
        return Extraction::unusable(facts, "openapi document has no paths object");
    };
    let mut gaps = Vec::new();

    for (path, item) in paths {
        let Some(item) = item.as_object() else {
            gaps.push(format!("path item {} is not an object", path));
            continue;
        };
        let shared = collect_parameters(doc, item.get("parameters"), path, &mut gaps);
        for method in HTTP_METHODS {
            let Some(op) = item.get(*method) else {
                continue;
            };
            let Some(op) = op.as_object() else {
                gaps.push(format!("operation {} {} is not an object", method, path));
                continue;
            };
            let own = collect_parameters(doc, op.get("parameters"), path, &mut gaps);
            facts.endpoints.push(ApiEndpoint {
                method: method.to_ascii_uppercase(),
                path: path.clone(),
                normalized: normalize_api_path(path),
                operation_id: op
                    .get("operationId")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                deprecated: op
                    .get("deprecated")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                parameters: merge_parameters(&shared, own),
            });
        }
    }

    let schemas = doc
        .pointer("/components/schemas")
        .or_else(|| doc.pointer("/definitions"))
        .and_then(Value::as_object);
    if let Some(schemas) = schemas {
        facts.schemas = schemas.keys().cloned().collect();
    }

    Extraction::partial(facts, gaps)
}

fn collect_parameters(
    doc: &Value,
    params: Option<&Value>,
    path: &str,
    gaps: &mut Vec<String>,
) -> Vec<ApiParameter> {
    let Some(params) = params else {
        return vec![];
    };
    let Some(list) = params.as_array() else {
        gaps.push(format!("parameters under {} is not an array", path));
        return vec![];
    };
    let mut out = Vec::new();
    for p in list {
        let resolved = match p.get("$ref").and_then(Value::as_str) {
            Some(reference) => match resolve_ref(doc, reference) {
                Some(v) => v,
                None => {
                    gaps.push(format!(
                        "unresolved parameter reference {} under {}",
                        reference, path
                    ));
                    continue;
                }
            },
            None => p,
        };
        let Some(obj) = resolved.as_object() else {
            gaps.push(format!("parameter under {} is not an object", path));
            continue;
        };
        if let Some(param) = parameter_from(obj) {
            out.push(param);
        } else {
            gaps.push(format!("parameter under {} has no name", path));
        }
    }
    out
}

fn resolve_ref<'a>(doc: &'a Value, reference: &str) -> Option<&'a Value> {
    reference
        .strip_prefix('#')
        .and_then(|pointer| doc.pointer(pointer))
}

fn parameter_from(obj: &Map<String, Value>) -> Option<ApiParameter> {
    let name = obj.get("name").and_then(Value::as_str)?;
    let location = obj
        .get("in")
        .and_then(Value::as_str)
        .unwrap_or("query")
        .to_string();
    // path parameters are always required
    let required =
        location == "path" || obj.get("required").and_then(Value::as_bool).unwrap_or(false);
    Some(ApiParameter {
        name: name.to_string(),
        location,
        required,
    })
}

/// Operation parameters override path-level ones with the same name and location.
fn merge_parameters(shared: &[ApiParameter], own: Vec<ApiParameter>) -> Vec<ApiParameter> {
    let mut out: Vec<ApiParameter> = shared
        .iter()
        .filter(|s| {
            !own.iter()
                .any(|o| o.name == s.name && o.location == s.location)
        })
        .cloned()
        .collect();
    out.extend(own);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_endpoints_parameters_and_schemas() {
        let doc = json!({
            "openapi": "3.0.0",
            "paths": {
                "/users/{id}": {
                    "parameters": [{"$ref": "#/components/parameters/UserId"}],
                    "get": {"operationId": "getUser", "parameters": [
                        {"name": "expand", "in": "query", "required": false}
                    ]},
                    "delete": {"deprecated": true}
                }
            },
            "components": {
                "parameters": {"UserId": {"name": "id", "in": "path"}},
                "schemas": {"User": {"type": "object"}}
            }
        });
        let ex = parse_openapi(&doc);
        assert!(ex.usable);
        assert!(ex.gaps.is_empty(), "{:?}", ex.gaps);
        let f = ex.facts;
        assert_eq!(f.endpoints.len(), 2);
        let get = f.endpoints.iter().find(|e| e.method == "GET").unwrap();
        assert_eq!(get.operation_id.as_deref(), Some("getUser"));
        assert_eq!(get.parameters.len(), 2);
        assert!(get.parameters.iter().any(|p| p.name == "id" && p.required));
        assert!(f.endpoints.iter().any(|e| e.method == "DELETE" && e.deprecated));
        assert_eq!(f.schemas, vec!["User".to_string()]);
    }

    #[test]
    fn missing_paths_is_unusable_and_bad_refs_are_gaps() {
        assert!(!parse_openapi(&json!({"openapi": "3.0.0"})).usable);
        assert!(!parse_openapi(&json!([1, 2])).usable);
        let ex = parse_openapi(&json!({
            "paths": {"/a": {"get": {"parameters": [{"$ref": "#/nope"}]}}, "/b": 3}
        }));
        assert!(ex.usable);
        assert_eq!(ex.facts.endpoints.len(), 1);
        assert_eq!(ex.gaps.len(), 2);
    }
}
