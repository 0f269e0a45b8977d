//! Inline `#tag` tokens in note bodies.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use crate::tag::normalize_key;

static INLINE_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^\w/])#([A-Za-z0-9_./-]+)").expect("valid inline tag regex"));

static TAG_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_./-]+$").expect("valid tag token regex"));

/// Byte ranges of the tag text (without `#`) of every inline tag in `body`.
fn inline_tag_spans(body: &str) -> Vec<Range<usize>> {
    INLINE_TAG_RE
        .captures_iter(body)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| {
            let token = m.as_str().trim_end_matches(['.', '/']);
            if token.is_empty() || token.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            Some(m.start()..m.start() + token.len())
        })
        .collect()
}

/// Inline tags in `body`, in order of appearance, duplicates included.
#[must_use]
pub fn inline_tags(body: &str) -> Vec<String> {
    inline_tag_spans(body)
        .into_iter()
        .map(|span| body[span].to_string())
        .collect()
}

/// Whether `tag` can be written as an inline `#tag`.
#[must_use]
pub fn is_inline_token(tag: &str) -> bool {
    TAG_TOKEN_RE.is_match(tag)
}

/// Rewrite every inline tag whose key is `old_key` to `#new`.
///
/// Returns `None` when nothing changed or `new` cannot be written inline.
#[must_use]
pub fn rewrite_inline_tags(body: &str, old_key: &str, new: &str) -> Option<String> {
    if !is_inline_token(new) {
        return None;
    }

    let mut out = String::with_capacity(body.len());
    let mut last = 0;
    let mut changed = false;
    for span in inline_tag_spans(body) {
        let token = &body[span.clone()];
        if normalize_key(token) != old_key || token == new {
            continue;
        }
        out.push_str(&body[last..span.start]);
        out.push_str(new);
        last = span.end;
        changed = true;
    }
    if !changed {
        return None;
    }
    out.push_str(&body[last..]);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_inline_tags_with_boundaries() {
        let body = "#start and #mid-word, a#not, url/#no, #nested/tag. ## heading #123\n#end";
        assert_eq!(inline_tags(body), vec!["start", "mid-word", "nested/tag", "end"]);
    }

    #[test]
    fn rewrites_matching_keys_only() {
        let body = "See #ML and #ml_ops, not #mlx.\n";
        let out = rewrite_inline_tags(body, "ml", "machine-learning").unwrap();
        assert_eq!(out, "See #machine-learning and #ml_ops, not #mlx.\n");
    }

    #[test]
    fn rewrite_is_idempotent() {
        let body = "tagged #machine-learning";
        assert!(rewrite_inline_tags(body, "machine-learning", "machine-learning").is_none());
    }

    #[test]
    fn refuses_tags_that_cannot_be_inline() {
        assert!(rewrite_inline_tags("#ml", "ml", "machine learning").is_none());
    }
}
