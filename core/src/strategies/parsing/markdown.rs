use super::{compile, normalize_api_path};
use crate::comparator::template::Extraction;
use crate::error::CoreResult;
use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownLine {
    pub number: u32,
    pub text: String,
    pub in_code: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    pub level: usize,
    pub line: u32,
    /// Lines up to the next heading of the same or a higher level.
    pub lines: Vec<MarkdownLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub lang: Option<String>,
    pub start_line: u32,
    pub content: String,
}

/// Line-level view of a markdown document shared by the runbook and docs parsers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkdownDocument {
    pub lines: Vec<MarkdownLine>,
    pub sections: Vec<Section>,
    pub code_blocks: Vec<CodeBlock>,
    pub gaps: Vec<String>,
}

impl MarkdownDocument {
    /// First section whose title contains `keyword` (case-insensitive).
    pub fn find_section(&self, keyword: &str) -> Option<&Section> {
        let keyword = keyword.to_ascii_lowercase();
        self.sections
            .iter()
            .find(|s| s.title.to_ascii_lowercase().contains(&keyword))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunbookEntry {
    pub raw: String,
    pub name: String,
    /// `(type, name)` when the entry spells out a full resource address.
    pub address: Option<(String, String)>,
    pub line: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunbookStep {
    pub text: String,
    pub line: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunbookFacts {
    pub resources: Vec<RunbookEntry>,
    pub variables: Vec<RunbookEntry>,
    pub steps: Vec<RunbookStep>,
    pub has_resources_section: bool,
    pub has_deployment_section: bool,
    pub has_variables_section: bool,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EndpointMention {
    pub method: String,
    pub path: String,
    pub normalized: String,
    pub line: u32,
    pub in_code: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocsFacts {
    pub endpoint_mentions: Vec<EndpointMention>,
    pub code_blocks: Vec<CodeBlock>,
    /// Normalized paths seen inside code blocks, used for example matching.
    pub code_paths: Vec<String>,
    pub text: String,
}

pub struct MarkdownParser {
    heading: Regex,
    fence: Regex,
    list_item: Regex,
    backticked: Regex,
    address: Regex,
    quoted_address: Regex,
    bare_name: Regex,
    endpoint_mention: Regex,
    url_path: Regex,
    bare_path: Regex,
}

impl MarkdownParser {
    pub fn new() -> CoreResult<Self> {
        Ok(Self {
            heading: compile(r"^(#{1,6})[ \t]+(.+?)[ \t#]*$")?,
            fence: compile(r"^[ \t]*(```|~~~)[ \t]*([A-Za-z0-9_+-]*)")?,
            list_item: compile(r"^[ \t]*(?:[-*+]|\d+[.)])[ \t]+(.+)$")?,
            backticked: compile(r"`([^`]+)`")?,
            address: compile(r"\b([A-Za-z][A-Za-z0-9_]*)\.([A-Za-z0-9_-]+)\b")?,
            quoted_address: compile(r#"\b([a-z][a-z0-9_]*)[ \t]+"([^"]+)""#)?,
            bare_name: compile(r"[A-Za-z0-9_][A-Za-z0-9_.-]*")?,
            endpoint_mention: compile(
                r#"\b(GET|POST|PUT|PATCH|DELETE|HEAD|OPTIONS)[ \t]+(?:https?://[^/\s]+)?(/[^\s`'"()<>\]]*)"#,
            )?,
            url_path: compile(r#"https?://[^/\s'"]+(/[^\s'"`()<>]*)"#)?,
            bare_path: compile(r#"(?:^|[\s'"(=`])(/[A-Za-z0-9_{}:<>.-][^\s'"`()<>]*)"#)?,
        })
    }

    pub fn document(&self, content: &str) -> MarkdownDocument {
        let mut doc = MarkdownDocument::default();
        let mut in_code = false;
        let mut fence_marker = String::new();
        let mut open_block: Option<CodeBlock> = None;
        let mut headings: Vec<(usize, String, u32, usize)> = Vec::new();

        for (idx, raw) in content.lines().enumerate() {
            let number = idx as u32 + 1;
            if let Some(caps) = self.fence.captures(raw) {
                let marker = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                if !in_code {
                    in_code = true;
                    fence_marker = marker.to_string();
                    let lang = caps
                        .get(2)
                        .map(|m| m.as_str())
                        .filter(|s| !s.is_empty())
                        .map(str::to_string);
                    open_block = Some(CodeBlock {
                        lang,
                        start_line: number,
                        content: String::new(),
                    });
                    continue;
                } else if marker == fence_marker {
                    in_code = false;
                    if let Some(block) = open_block.take() {
                        doc.code_blocks.push(block);
                    }
                    continue;
                }
            }
            if in_code {
                if let Some(block) = open_block.as_mut() {
                    block.content.push_str(raw);
                    block.content.push('\n');
                }
            } else if let Some(caps) = self.heading.captures(raw) {
                let level = caps.get(1).map(|m| m.as_str().len()).unwrap_or(1);
                let title = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
                headings.push((level, title.to_string(), number, doc.lines.len()));
            }
            doc.lines.push(MarkdownLine {
                number,
                text: raw.to_string(),
                in_code,
            });
        }
        if let Some(block) = open_block.take() {
            doc.gaps.push(format!(
                "unterminated code fence opened at line {}",
                block.start_line
            ));
            doc.code_blocks.push(block);
        }

        for (i, (level, title, line, first_idx)) in headings.iter().enumerate() {
            let end_idx = headings[i + 1..]
                .iter()
                .find(|(l, _, _, _)| l <= level)
                .map(|(_, _, _, idx)| *idx)
                .unwrap_or(doc.lines.len());
            doc.sections.push(Section {
                title: title.clone(),
                level: *level,
                line: *line,
                lines: doc.lines[first_idx + 1..end_idx].to_vec(),
            });
        }
        doc
    }

    fn list_items<'a>(&self, section: &'a Section) -> Vec<(u32, &'a str)> {
        section
            .lines
            .iter()
            .filter(|l| !l.in_code)
            .filter_map(|l| {
                self.list_item
                    .captures(&l.text)
                    .and_then(|c| c.get(1))
                    .map(|m| (l.number, m.as_str().trim()))
            })
            .collect()
    }

    /// Interpret one list item as a resource/variable mention.
    pub fn entry(&self, raw: &str, line: u32) -> Option<RunbookEntry> {
        let focus = self
            .backticked
            .captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .unwrap_or(raw);
        if let Some(c) = self.quoted_address.captures(focus) {
            if let (Some(t), Some(n)) = (c.get(1), c.get(2)) {
                return Some(RunbookEntry {
                    raw: raw.to_string(),
                    name: n.as_str().to_string(),
                    address: Some((t.as_str().to_string(), n.as_str().to_string())),
                    line,
                });
            }
        }
        if let Some(c) = self.address.captures(focus) {
            if let (Some(t), Some(n)) = (c.get(1), c.get(2)) {
                if t.as_str() != "var" {
                    return Some(RunbookEntry {
                        raw: raw.to_string(),
                        name: n.as_str().to_string(),
                        address: Some((t.as_str().to_string(), n.as_str().to_string())),
                        line,
                    });
                }
                return Some(RunbookEntry {
                    raw: raw.to_string(),
                    name: n.as_str().to_string(),
                    address: None,
                    line,
                });
            }
        }
        let name = self
            .bare_name
            .find(focus)
            .map(|m| m.as_str().trim_end_matches(['.', '-']))
            .filter(|s| !s.is_empty())?;
        Some(RunbookEntry {
            raw: raw.to_string(),
            name: name.to_string(),
            address: None,
            line,
        })
    }

    pub fn parse_runbook(&self, content: &str) -> Extraction<RunbookFacts> {
        let mut facts = RunbookFacts {
            text: content.to_string(),
            ..Default::default()
        };
        if content.trim().is_empty() {
            return Extraction::unusable(facts, "runbook is empty");
        }
        let doc = self.document(content);
        let mut gaps = doc.gaps.clone();

        if let Some(section) = doc.find_section("resource") {
            facts.has_resources_section = true;
            facts.resources = self
                .list_items(section)
                .into_iter()
                .filter_map(|(line, item)| self.entry(item, line))
                .collect();
        }
        if let Some(section) = doc.find_section("variable") {
            facts.has_variables_section = true;
            facts.variables = self
                .list_items(section)
                .into_iter()
                .filter_map(|(line, item)| self.entry(item, line))
                .collect();
        }
        if let Some(section) = doc.find_section("deploy") {
            facts.has_deployment_section = true;
            for l in &section.lines {
                let text = if l.in_code {
                    Some(l.text.trim())
                } else {
                    self.list_item
                        .captures(&l.text)
                        .and_then(|c| c.get(1))
                        .map(|m| m.as_str().trim())
                };
                if let Some(text) = text.filter(|t| !t.is_empty()) {
                    facts.steps.push(RunbookStep {
                        text: text.to_string(),
                        line: l.number,
                    });
                }
            }
        }
        if !facts.has_resources_section
            && !facts.has_variables_section
            && !facts.has_deployment_section
        {
            gaps.push(
                "no Resources, Deployment or Variables section found; using whole-document scan"
                    .to_string(),
            );
        }
        Extraction::partial(facts, gaps)
    }

    pub fn parse_docs(&self, content: &str) -> Extraction<DocsFacts> {
        let mut facts = DocsFacts {
            text: content.to_string(),
            ..Default::default()
        };
        if content.trim().is_empty() {
            return Extraction::unusable(facts, "documentation page is empty");
        }
        let doc = self.document(content);
        for l in &doc.lines {
            for caps in self.endpoint_mention.captures_iter(&l.text) {
                if let (Some(method), Some(path)) = (caps.get(1), caps.get(2)) {
                    facts.endpoint_mentions.push(EndpointMention {
                        method: method.as_str().to_string(),
                        path: path.as_str().to_string(),
                        normalized: normalize_api_path(path.as_str()),
                        line: l.number,
                        in_code: l.in_code,
                    });
                }
            }
        }
        for block in &doc.code_blocks {
            for caps in self.url_path.captures_iter(&block.content) {
                if let Some(p) = caps.get(1) {
                    facts.code_paths.push(normalize_api_path(p.as_str()));
                }
            }
            for caps in self.bare_path.captures_iter(&block.content) {
                if let Some(p) = caps.get(1) {
                    facts.code_paths.push(normalize_api_path(p.as_str()));
                }
            }
        }
        facts.code_paths.sort();
        facts.code_paths.dedup();
        facts.code_blocks = doc.code_blocks;
        Extraction::partial(facts, doc.gaps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUNBOOK: &str = "# Payments runbook

## Resources
- `aws_db_instance.main` primary database
- aws_s3_bucket \"logs\"
- cache_cluster: redis

## Variables
- `region`: AWS region
* `var.db_password` must be rotated

## Deployment
1. Review the plan
2. Apply:

```bash
terraform init
terraform apply -auto-approve
echo $(terraform output db_endpoint)
```

## Troubleshooting
- restart the service
";

    #[test]
    fn runbook_sections_are_extracted() {
        let parser = MarkdownParser::new().unwrap();
        let ex = parser.parse_runbook(RUNBOOK);
        assert!(ex.usable);
        assert!(ex.gaps.is_empty(), "{:?}", ex.gaps);
        let f = ex.facts;
        assert_eq!(f.resources.len(), 3);
        assert_eq!(
            f.resources[0].address,
            Some(("aws_db_instance".to_string(), "main".to_string()))
        );
        assert_eq!(
            f.resources[1].address,
            Some(("aws_s3_bucket".to_string(), "logs".to_string()))
        );
        assert_eq!(f.resources[2].name, "cache_cluster");
        assert_eq!(f.variables.len(), 2);
        assert_eq!(f.variables[0].name, "region");
        assert_eq!(f.variables[1].name, "db_password");
        assert!(f.steps.iter().any(|s| s.text.contains("terraform apply")));
        assert!(!f.steps.iter().any(|s| s.text.contains("restart")));
    }

    #[test]
    fn unterminated_fence_is_reported() {
        let parser = MarkdownParser::new().unwrap();
        let ex = parser.parse_runbook("## Deployment\n```\nterraform apply\n");
        assert!(ex.usable);
        assert!(ex.gaps.iter().any(|g| g.contains("unterminated code fence")));
        assert_eq!(ex.facts.steps.len(), 1);
    }

    #[test]
    fn docs_mentions_and_code_paths() {
        let parser = MarkdownParser::new().unwrap();
        let ex = parser.parse_docs(
            "# Users\n\nUse `GET /users/{id}` to fetch a user.\n\n\
             ```sh\ncurl https://api.example.com/v1/users/42\n```\n",
        );
        let f = ex.facts;
        assert_eq!(f.endpoint_mentions.len(), 1);
        assert_eq!(f.endpoint_mentions[0].normalized, "/users/{}");
        assert!(!f.endpoint_mentions[0].in_code);
        assert!(f.code_paths.contains(&"/v1/users/42".to_string()));
    }
}
