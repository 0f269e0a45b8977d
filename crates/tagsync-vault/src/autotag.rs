//! Regex auto-tagging.
//!
//! Each rule pairs a pattern with a tag template. Templates substitute
//! capture groups into the tag text:
//!
//! | Placeholder | Value |
//! |---|---|
//! | `{match}` | first capture group, or the whole match if there is none |
//! | `{0}` | the whole match |
//! | `{N}` | capture group `N` |
//! | `{name}` | named capture group |
//!
//! `{{` and `}}` write literal braces. A match where a referenced group did
//! not participate produces no tag.

use regex::{Captures, Regex};
use thiserror::Error;
use tracing::{debug, warn};

use tagsync_core::change::{sort_for_review, ProposedChange};
use tagsync_core::config::TagRuleConfig;
use tagsync_core::frontmatter::NoteDocument;
use tagsync_core::tag::{Provenance, Tag, TagInventory, TagSourceKind};

use crate::loader::Note;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule has no pattern")]
    MissingPattern,

    #[error("rule has no tag_format")]
    MissingFormat,

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("invalid tag_format '{format}': {reason}")]
    Format { format: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Group(usize),
    Named(String),
}

/// A compiled auto-tag rule.
#[derive(Debug, Clone)]
pub struct TagRule {
    regex: Regex,
    format: String,
    segments: Vec<Segment>,
}

/// A tag produced by a rule inside one note body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub tag: Tag,
    pub pattern: String,
    pub matched: String,
}

impl TagRule {
    /// Compile a rule.
    ///
    /// # Errors
    ///
    /// Returns a [`RuleError`] for an empty field, an invalid regex, or a
    /// template referring to a group the pattern does not define.
    pub fn new(pattern: &str, tag_format: &str) -> Result<Self, RuleError> {
        if pattern.is_empty() {
            return Err(RuleError::MissingPattern);
        }
        if tag_format.is_empty() {
            return Err(RuleError::MissingFormat);
        }
        let regex = Regex::new(pattern)?;
        let segments = parse_template(tag_format, &regex)?;
        Ok(Self {
            regex,
            format: tag_format.to_string(),
            segments,
        })
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    #[must_use]
    pub fn tag_format(&self) -> &str {
        &self.format
    }

    fn render(&self, caps: &Captures<'_>) -> Option<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Group(i) => out.push_str(caps.get(*i)?.as_str()),
                Segment::Named(name) => out.push_str(caps.name(name)?.as_str()),
            }
        }
        let out = out.trim();
        (!out.is_empty()).then(|| out.to_string())
    }

    /// Every tag this rule derives from `body`, in match order.
    #[must_use]
    pub fn apply(&self, body: &str) -> Vec<RuleMatch> {
        self.regex
            .captures_iter(body)
            .filter_map(|caps| {
                let tag = self.render(&caps)?;
                Some(RuleMatch {
                    tag: Tag::new(tag),
                    pattern: self.pattern().to_string(),
                    matched: caps.get(0).map_or("", |m| m.as_str()).to_string(),
                })
            })
            .collect()
    }
}

fn parse_template(format: &str, regex: &Regex) -> Result<Vec<Segment>, RuleError> {
    let bad = |reason: &str| RuleError::Format {
        format: format.to_string(),
        reason: reason.to_string(),
    };
    let groups = regex.captures_len();

    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '}' => return Err(bad("unmatched '}'")),
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => name.push(ch),
                        None => return Err(bad("unclosed '{'")),
                    }
                }
                let segment = if name == "match" {
                    Segment::Group(usize::from(groups > 1))
                } else if let Ok(index) = name.parse::<usize>() {
                    if index >= groups {
                        return Err(bad(&format!("pattern has no group {index}")));
                    }
                    Segment::Group(index)
                } else if regex.capture_names().flatten().any(|n| n == name) {
                    Segment::Named(name)
                } else {
                    return Err(bad(&format!("pattern has no group named '{name}'")));
                };
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(segment);
            }
            c => literal.push(c),
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// Compile configured rules in order, skipping invalid ones with a warning.
#[must_use]
pub fn compile_rules(configs: &[TagRuleConfig]) -> Vec<TagRule> {
    configs
        .iter()
        .enumerate()
        .filter_map(|(i, rule)| match TagRule::new(&rule.pattern, &rule.tag_format) {
            Ok(compiled) => Some(compiled),
            Err(err) => {
                warn!(rule = i, pattern = %rule.pattern, error = %err, "skipping auto-tag rule");
                None
            }
        })
        .collect()
}

/// Tags all rules derive from one body, deduplicated by key in rule order.
#[must_use]
pub fn derive_tags(rules: &[TagRule], body: &str) -> Vec<RuleMatch> {
    let mut found: Vec<RuleMatch> = Vec::new();
    for rule in rules {
        for m in rule.apply(body) {
            if !found.iter().any(|f| f.tag.same_key(&m.tag)) {
                found.push(m);
            }
        }
    }
    found
}

/// Text of a note for rule scanning: the body, or the whole note when its
/// frontmatter cannot be parsed. Tags derived from such a note still reach
/// the engine, which records the parse failure against it.
fn scannable_body(note: &Note) -> &str {
    match NoteDocument::parse(&note.text) {
        Ok(doc) => doc.body(),
        Err(err) => {
            warn!(note = %note.id, error = %err, "frontmatter unreadable, scanning whole note");
            &note.text
        }
    }
}

/// Inventory of every rule-derived tag, with the note and match behind it.
#[must_use]
pub fn derived_inventory(rules: &[TagRule], notes: &[Note]) -> TagInventory {
    let mut inventory = TagInventory::new(TagSourceKind::Derived);
    for note in notes {
        for m in derive_tags(rules, scannable_body(note)) {
            let provenance = Provenance::Rule {
                note: note.id.clone(),
                pattern: m.pattern,
                matched: m.matched,
            };
            inventory.insert(m.tag, Some(provenance));
        }
    }
    inventory
}

/// Note-level `add` changes for every rule-derived tag, in review order.
#[must_use]
pub fn autotag_changes(rules: &[TagRule], notes: &[Note]) -> Vec<ProposedChange> {
    let mut changes = Vec::new();
    for note in notes {
        let derived = derive_tags(rules, scannable_body(note));
        if !derived.is_empty() {
            debug!(note = %note.id, count = derived.len(), "derived tags");
        }
        changes.extend(derived.into_iter().map(|m| {
            let rationale = format!("pattern '{}' matched '{}'", m.pattern, m.matched);
            ProposedChange::add(m.tag, 100, rationale).for_note(note.id.clone())
        }));
    }
    sort_for_review(&mut changes);
    changes
}
