//! Small text parsers turning raw artifacts into typed facts.
//!
//! None of these fail on malformed input; problems are reported as gap
//! strings on the returned [`Extraction`](crate::comparator::template::Extraction).

pub mod markdown;
pub mod openapi;
pub mod terraform;

use crate::error::{CoreError, CoreResult};
use regex::Regex;

pub(crate) fn compile(pattern: &str) -> CoreResult<Regex> {
    Regex::new(pattern)
        .map_err(|e| CoreError::InvalidInput(format!("regex compilation failed: {}", e)))
}

/// 1-based line number of a byte offset.
pub(crate) fn line_of(text: &str, offset: usize) -> u32 {
    let end = offset.min(text.len());
    text.as_bytes()[..end].iter().filter(|b| **b == b'\n').count() as u32 + 1
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// True when `word` occurs in `text` with no identifier character on either side.
pub fn mentions_word(text: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    let bytes = text.as_bytes();
    text.match_indices(word).any(|(start, m)| {
        let end = start + m.len();
        let before_ok = start == 0 || !is_word_byte(bytes[start - 1]);
        let after_ok = end >= bytes.len() || !is_word_byte(bytes[end]);
        before_ok && after_ok
    })
}

/// Normalize an HTTP path for comparison: drop query/fragment, trailing
/// punctuation and slash, and collapse `{id}`, `:id`, `<id>` into `{}`.
pub fn normalize_api_path(raw: &str) -> String {
    let cut = raw.find(|c| c == '?' || c == '#').unwrap_or(raw.len());
    let trimmed = raw[..cut].trim_end_matches(|c| matches!(c, '.' | ',' | ';' | ':' | '/'));
    let segments: Vec<String> = trimmed
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|seg| {
            let is_param = (seg.starts_with('{') && seg.ends_with('}'))
                || (seg.starts_with('<') && seg.ends_with('>'))
                || (seg.starts_with(':') && seg.len() > 1);
            if is_param {
                "{}".to_string()
            } else {
                seg.to_string()
            }
        })
        .collect();
    format!("/{}", segments.join("/"))
}

/// `api`, `v1`, `v2`, ...: segments a documented base path may add in front.
fn is_base_segment(seg: &str) -> bool {
    seg == "api"
        || seg
            .strip_prefix('v')
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Whether `candidate` refers to the `template` endpoint path.
///
/// Both sides must be normalized. The candidate may carry a base path made of
/// `api`/version segments (`/api/v1/users` matches `/users`); any other extra
/// prefix is a different endpoint. `{}` on either side matches any segment.
pub fn path_matches(template: &str, candidate: &str) -> bool {
    let t: Vec<&str> = template.split('/').filter(|s| !s.is_empty()).collect();
    let c: Vec<&str> = candidate.split('/').filter(|s| !s.is_empty()).collect();
    if t.is_empty() || c.is_empty() {
        return t.is_empty() && c.is_empty();
    }
    if c.len() < t.len() {
        return false;
    }
    let (base, tail) = c.split_at(c.len() - t.len());
    base.iter().all(|seg| is_base_segment(seg))
        && t
            .iter()
            .zip(tail)
            .all(|(ts, cs)| ts == cs || *ts == "{}" || *cs == "{}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_mentions_respect_boundaries() {
        assert!(mentions_word("set `db_password` first", "db_password"));
        assert!(!mentions_word("set db_password_v2 first", "db_password"));
        assert!(mentions_word("region", "region"));
        assert!(!mentions_word("regional", "region"));
    }

    #[test]
    fn api_paths_normalize_parameter_styles() {
        assert_eq!(normalize_api_path("/users/{id}/"), "/users/{}");
        assert_eq!(normalize_api_path("/users/:id?expand=1"), "/users/{}");
        assert_eq!(normalize_api_path("/users/<id>."), "/users/{}");
        assert_eq!(normalize_api_path("/"), "/");
    }

    #[test]
    fn paths_match_behind_a_base_path_only() {
        assert!(path_matches("/users/{}", "/v1/users/42"));
        assert!(path_matches("/users", "/api/v2/users"));
        assert!(!path_matches("/users", "/admin/users"));
        assert!(!path_matches("/users", "/vx/users"));
        assert!(path_matches("/users", "/users"));
        assert!(!path_matches("/users/{}", "/users"));
        assert!(!path_matches("/orders", "/users"));
        assert!(path_matches("/", "/"));
        assert!(!path_matches("/", "/users"));
    }

    #[test]
    fn line_numbers_are_one_based() {
        let text = "a\nb\nc";
        assert_eq!(line_of(text, 0), 1);
        assert_eq!(line_of(text, 2), 2);
        assert_eq!(line_of(text, 100), 3);
    }
}
