use super::{compile, line_of};
use crate::comparator::template::Extraction;
use crate::error::CoreResult;
use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TfResource {
    pub resource_type: String,
    pub name: String,
    pub line: u32,
    /// False when the block's closing brace was never found.
    pub terminated: bool,
}

impl TfResource {
    pub fn address(&self) -> String {
        format!("{}.{}", self.resource_type, self.name)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TfVariable {
    pub name: String,
    pub default: Option<String>,
    pub description: Option<String>,
    pub line: u32,
    pub terminated: bool,
}

impl TfVariable {
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TfOutput {
    pub name: String,
    pub description: Option<String>,
    pub line: u32,
    pub terminated: bool,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TerraformFacts {
    pub resources: Vec<TfResource>,
    pub variables: Vec<TfVariable>,
    pub outputs: Vec<TfOutput>,
}

impl TerraformFacts {
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.variables.is_empty() && self.outputs.is_empty()
    }
}

pub struct TerraformParser {
    block_header: Regex,
}

impl TerraformParser {
    pub fn new() -> CoreResult<Self> {
        Ok(Self {
            block_header: compile(
                r#"(?m)^[ \t]*(resource|variable|output)[ \t]+"([^"\n]*)"(?:[ \t]+"([^"\n]*)")?[ \t]*\{"#,
            )?,
        })
    }

    pub fn parse(&self, source: &str) -> Extraction<TerraformFacts> {
        let mut facts = TerraformFacts::default();
        if source.trim().is_empty() {
            return Extraction::unusable(facts, "terraform source is empty");
        }
        let mut gaps = Vec::new();

        for caps in self.block_header.captures_iter(source) {
            let (Some(whole), Some(kind), Some(first)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            let line = line_of(source, whole.start());
            let (body, terminated) = block_body(source, whole.end());
            if !terminated {
                gaps.push(format!(
                    "unterminated {} block \"{}\" at line {}",
                    kind.as_str(),
                    first.as_str(),
                    line
                ));
            }
            match kind.as_str() {
                "resource" => match caps.get(3) {
                    Some(name) if !name.as_str().is_empty() => facts.resources.push(TfResource {
                        resource_type: first.as_str().to_string(),
                        name: name.as_str().to_string(),
                        line,
                        terminated,
                    }),
                    _ => gaps.push(format!(
                        "resource block \"{}\" at line {} has no name label",
                        first.as_str(),
                        line
                    )),
                },
                "variable" => facts.variables.push(TfVariable {
                    name: first.as_str().to_string(),
                    default: top_level_attribute(body, "default"),
                    description: top_level_attribute(body, "description").map(unquote),
                    line,
                    terminated,
                }),
                _ => facts.outputs.push(TfOutput {
                    name: first.as_str().to_string(),
                    description: top_level_attribute(body, "description").map(unquote),
                    line,
                    terminated,
                }),
            }
        }

        if facts.is_empty() {
            gaps.push("no resource, variable or output blocks found".to_string());
            return Extraction {
                facts,
                gaps,
                usable: false,
            };
        }
        Extraction::partial(facts, gaps)
    }
}

/// Body of a block whose opening brace ends at `start`, and whether the
/// matching closing brace was found. Braces inside strings and comments are ignored.
fn block_body(source: &str, start: usize) -> (&str, bool) {
    let bytes = source.as_bytes();
    let mut depth = 1usize;
    let mut i = start;
    let mut in_string = false;
    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            match b {
                b'\\' => i += 1,
                b'"' => in_string = false,
                _ => {}
            }
        } else {
            match b {
                b'"' => in_string = true,
                b'#' => i = skip_to_eol(bytes, i),
                b'/' if bytes.get(i + 1) == Some(&b'/') => i = skip_to_eol(bytes, i),
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return (&source[start..i], true);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    (&source[start..], false)
}

fn skip_to_eol(bytes: &[u8], from: usize) -> usize {
    let mut i = from;
    while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
    }
    i
}

/// Value text of `name = ...` at the top level of a block body.
fn top_level_attribute(body: &str, name: &str) -> Option<String> {
    let mut depth: i32 = 0;
    for line in body.lines() {
        let trimmed = line.trim();
        if depth == 0 {
            if let Some(rest) = trimmed.strip_prefix(name) {
                let rest = rest.trim_start();
                if let Some(value) = rest.strip_prefix('=') {
                    if !value.starts_with('=') {
                        return Some(value.trim().to_string());
                    }
                }
            }
        }
        for c in trimmed.chars() {
            match c {
                '{' | '[' | '(' => depth += 1,
                '}' | ']' | ')' => depth -= 1,
                _ => {}
            }
        }
    }
    None
}

fn unquote(value: String) -> String {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .map(str::to_string)
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAIN_TF: &str = r#"
variable "region" {
  type    = string
  default = "us-east-1"
}

variable "db_password" {
  type        = string
  description = "Master password"
  validation {
    condition = length(var.db_password) > 8 # default = "ignored"
  }
}

resource "aws_db_instance" "main" {
  engine = "postgres"
  tags = {
    Name = "main-{db}"
  }
}

output "db_endpoint" {
  value = aws_db_instance.main.endpoint
}
"#;

    #[test]
    fn parses_blocks_with_nested_braces() {
        let parser = TerraformParser::new().unwrap();
        let ex = parser.parse(MAIN_TF);
        assert!(ex.usable);
        assert!(ex.gaps.is_empty(), "{:?}", ex.gaps);
        let f = ex.facts;
        assert_eq!(f.resources.len(), 1);
        assert_eq!(f.resources[0].address(), "aws_db_instance.main");
        assert_eq!(f.resources[0].line, 15);
        assert_eq!(f.variables.len(), 2);
        assert_eq!(f.variables[0].default.as_deref(), Some("\"us-east-1\""));
        assert!(!f.variables[1].has_default());
        assert_eq!(f.variables[1].description.as_deref(), Some("Master password"));
        assert_eq!(f.outputs[0].name, "db_endpoint");
    }

    #[test]
    fn unterminated_block_is_a_gap_not_an_error() {
        let parser = TerraformParser::new().unwrap();
        let ex = parser.parse("resource \"aws_s3_bucket\" \"logs\" {\n  bucket = \"x\"\n");
        assert!(ex.usable);
        assert_eq!(ex.facts.resources.len(), 1);
        assert!(!ex.facts.resources[0].terminated);
        assert!(ex.gaps[0].contains("unterminated resource block"));
    }

    #[test]
    fn source_without_blocks_is_unusable() {
        let parser = TerraformParser::new().unwrap();
        assert!(!parser.parse("").usable);
        assert!(!parser.parse("locals { a = 1 }").usable);
    }
}
