//! Format-preserving YAML frontmatter editing.
//!
//! Handles the `---` delimited YAML block at the top of markdown notes:
//! ```markdown
//! ---
//! title: "Alpha"   # kept byte-for-byte
//! tags:
//!   - alpha
//!   - beta         # item comments survive too
//! ---
//!
//! Body, never touched unless inline rewriting is on.
//! ```
//!
//! A note is split into the text before the `tags` node, the node itself,
//! and everything after it. Only the node is re-rendered on edit, from the
//! pieces it was parsed into, so untouched items keep their quoting, comments
//! and indentation. `serde_yaml` is used as a cross-check: the tags read here
//! must equal what the YAML parser sees, both before and after an edit.

use std::borrow::Cow;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::change::{ChangeKind, ProposedChange};
use crate::config::{MissingFrontmatterPolicy, MutationOptions};
use crate::error::FrontmatterError;
use crate::inline::rewrite_inline_tags;
use crate::tag::normalize_key;

const BOM: &str = "\u{feff}";
const DEFAULT_ITEM_PREFIX: &str = "  - ";

static TAGS_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(?:tags|"tags"|'tags')[ \t]*:(?:[ \t]|$)"#).expect("valid tags key regex")
});

/// One physical line: content without its line ending, plus the ending.
#[derive(Debug, Clone, Copy)]
struct Line<'a> {
    start: usize,
    content: &'a str,
    eol: &'a str,
}

impl Line<'_> {
    fn end(&self) -> usize {
        self.start + self.content.len() + self.eol.len()
    }

    fn is_blank_or_comment(&self) -> bool {
        let t = self.content.trim();
        t.is_empty() || t.starts_with('#')
    }
}

fn lines_of(text: &str, base: usize) -> Vec<Line<'_>> {
    let mut offset = base;
    text.split_inclusive('\n')
        .map(|piece| {
            let content = piece.strip_suffix('\n').unwrap_or(piece);
            let content = content.strip_suffix('\r').unwrap_or(content);
            let line = Line {
                start: offset,
                content,
                eol: &piece[content.len()..],
            };
            offset += piece.len();
            line
        })
        .collect()
}

/// An item line of a block sequence: `prefix` is indentation plus `- `,
/// `raw` the scalar as written, `suffix` trailing comment and line ending.
#[derive(Debug, Clone)]
struct BlockItem {
    prefix: String,
    raw: String,
    suffix: String,
}

#[derive(Debug, Clone)]
enum BlockLine {
    Item(BlockItem),
    Other(String),
}

/// How the `tags` value is written.
#[derive(Debug, Clone)]
enum TagsNode {
    /// No `tags` key in the block.
    Absent,
    /// `tags:` with no value, `~` or `null`. `head` ends at the colon;
    /// `explicit` is set when a `~`/`null` value is written out.
    Null {
        node: Range<usize>,
        line: String,
        head: String,
        explicit: bool,
        comment: String,
        eol: String,
    },
    Block {
        node: Range<usize>,
        key_line: String,
        lines: Vec<BlockLine>,
    },
    /// `tags: [a, b]` on one line. `head` ends with `[`, `tail` starts at `]`.
    Flow {
        node: Range<usize>,
        head: String,
        items: Vec<String>,
        sep: String,
        tail: String,
    },
    /// `tags: a, b` as one scalar.
    Scalar {
        node: Range<usize>,
        head: String,
        tail: String,
    },
}

#[derive(Debug, Clone)]
struct Block {
    /// Byte range of the YAML text between the delimiters.
    yaml: Range<usize>,
    node: TagsNode,
}

/// A note split into frontmatter and body, with its tags read.
#[derive(Debug, Clone)]
pub struct NoteDocument<'a> {
    text: &'a str,
    newline: &'static str,
    block: Option<Block>,
    body_start: usize,
    tags: Vec<String>,
}

impl<'a> NoteDocument<'a> {
    /// Parse a note's frontmatter and tags.
    ///
    /// A note that does not open with `---` has no frontmatter and no tags;
    /// that is not an error.
    ///
    /// # Errors
    ///
    /// Returns a [`FrontmatterError`] when the block is unterminated, is not
    /// valid YAML, or writes `tags` in a shape that cannot be edited safely.
    pub fn parse(text: &'a str) -> Result<Self, FrontmatterError> {
        let newline = if text.contains("\r\n") { "\r\n" } else { "\n" };
        let base = if text.starts_with(BOM) { BOM.len() } else { 0 };
        let lines = lines_of(&text[base..], base);

        let opens = lines
            .first()
            .is_some_and(|l| l.content.trim_end() == "---" && !l.eol.is_empty());
        if !opens {
            return Ok(Self {
                text,
                newline,
                block: None,
                body_start: base,
                tags: Vec::new(),
            });
        }

        let close = lines[1..]
            .iter()
            .find(|l| matches!(l.content.trim_end(), "---" | "..."))
            .ok_or(FrontmatterError::Unterminated)?;
        let yaml = lines[0].end()..close.start;
        let body_start = close.end();

        let parsed = parser_tags(&text[yaml.clone()])?;

        let yaml_lines: Vec<Line<'_>> = lines[1..]
            .iter()
            .take_while(|l| l.start < close.start)
            .copied()
            .collect();
        let (node, tags) = parse_tags_node(&yaml_lines)?;

        if parsed.as_deref().unwrap_or_default() != tags.as_slice() {
            return Err(FrontmatterError::UnsupportedTagsLayout(
                "tags differ from the YAML parser's reading".to_string(),
            ));
        }

        Ok(Self {
            text,
            newline,
            block: Some(Block { yaml, node }),
            body_start,
            tags,
        })
    }

    #[must_use]
    pub fn has_frontmatter(&self) -> bool {
        self.block.is_some()
    }

    /// The frontmatter YAML between the delimiters.
    #[must_use]
    pub fn yaml(&self) -> Option<&'a str> {
        self.block.as_ref().map(|b| &self.text[b.yaml.clone()])
    }

    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Everything after the closing delimiter (or the whole note).
    #[must_use]
    pub fn body(&self) -> &'a str {
        &self.text[self.body_start..]
    }

    fn slots(&self) -> Vec<Slot> {
        self.tags
            .iter()
            .enumerate()
            .map(|(i, value)| Slot {
                value: value.clone(),
                origin: Some(i),
                dirty: false,
            })
            .collect()
    }

    /// Rebuild the note from its parsed pieces with `slots` as the tag list.
    fn render(&self, slots: &[Slot], body: &str) -> String {
        let nl = self.newline;
        let Some(block) = &self.block else {
            let bom = &self.text[..self.body_start];
            if slots.is_empty() {
                return format!("{bom}{body}");
            }
            let mut out = format!("{bom}---{nl}tags:{nl}");
            for slot in slots {
                out.push_str(DEFAULT_ITEM_PREFIX);
                out.push_str(&render_scalar(&slot.value, false));
                out.push_str(nl);
            }
            out.push_str("---");
            out.push_str(nl);
            out.push_str(body);
            return out;
        };

        let (range, node_text) = match &block.node {
            TagsNode::Absent => {
                let mut s = String::new();
                if !slots.is_empty() {
                    s.push_str("tags:");
                    s.push_str(nl);
                    push_new_items(&mut s, slots, DEFAULT_ITEM_PREFIX, nl);
                }
                (block.yaml.end..block.yaml.end, s)
            }
            TagsNode::Null {
                node,
                line,
                head,
                explicit,
                comment,
                eol,
            } => {
                let mut s = if *explicit && !slots.is_empty() {
                    let mut h = head.clone();
                    if !comment.is_empty() {
                        h.push(' ');
                        h.push_str(comment);
                    }
                    h
                } else {
                    line.clone()
                };
                s.push_str(eol);
                push_new_items(&mut s, slots, DEFAULT_ITEM_PREFIX, nl);
                (node.clone(), s)
            }
            TagsNode::Block {
                node,
                key_line,
                lines,
            } => {
                let mut s = key_line.clone();
                let mut index = 0;
                let mut last_prefix = DEFAULT_ITEM_PREFIX;
                for line in lines {
                    match line {
                        BlockLine::Other(raw) => s.push_str(raw),
                        BlockLine::Item(item) => {
                            s.push_str(&item.prefix);
                            match slots.get(index) {
                                Some(slot) if slot.dirty => {
                                    s.push_str(&render_scalar(&slot.value, false));
                                }
                                _ => s.push_str(&item.raw),
                            }
                            s.push_str(&item.suffix);
                            last_prefix = item.prefix.as_str();
                            index += 1;
                        }
                    }
                }
                push_new_items(&mut s, slots, last_prefix, nl);
                (node.clone(), s)
            }
            TagsNode::Flow {
                node,
                head,
                items,
                sep,
                tail,
            } => {
                let rendered: Vec<Cow<'_, str>> = slots
                    .iter()
                    .map(|slot| match slot.origin {
                        Some(i) if !slot.dirty => Cow::Borrowed(items[i].as_str()),
                        _ => Cow::Owned(render_scalar(&slot.value, true)),
                    })
                    .collect();
                (node.clone(), format!("{head}{}{tail}", rendered.join(sep.as_str())))
            }
            TagsNode::Scalar { node, head, tail } => {
                let joined: Vec<&str> = slots.iter().map(|s| s.value.as_str()).collect();
                let value = render_scalar(&joined.join(", "), false);
                (node.clone(), format!("{head}{value}{tail}"))
            }
        };

        let mut out = String::with_capacity(self.text.len() + node_text.len());
        out.push_str(&self.text[..range.start]);
        out.push_str(&node_text);
        out.push_str(&self.text[range.end..self.body_start]);
        out.push_str(body);
        out
    }
}

fn push_new_items(out: &mut String, slots: &[Slot], prefix: &str, nl: &str) {
    for slot in slots.iter().filter(|s| s.origin.is_none()) {
        out.push_str(prefix);
        out.push_str(&render_scalar(&slot.value, false));
        out.push_str(nl);
    }
}

/// Locate and decompose the `tags` node among the YAML lines.
fn parse_tags_node(lines: &[Line<'_>]) -> Result<(TagsNode, Vec<String>), FrontmatterError> {
    let Some(key_pos) = lines.iter().position(|l| TAGS_KEY_RE.is_match(l.content)) else {
        return Ok((TagsNode::Absent, Vec::new()));
    };
    let key = lines[key_pos];
    let colon = key
        .content
        .find(':')
        .ok_or_else(|| FrontmatterError::UnsupportedTagsLayout("tags key without ':'".into()))?;
    let head = &key.content[..=colon];
    let after = &key.content[colon + 1..];

    // Continuation: indented lines, indentless `-` items, and blank lines.
    let mut cont: Vec<Line<'_>> = lines[key_pos + 1..]
        .iter()
        .take_while(|l| {
            l.content.trim().is_empty()
                || l.content.starts_with([' ', '\t'])
                || l.content == "-"
                || l.content.starts_with("- ")
        })
        .copied()
        .collect();
    while cont.last().is_some_and(Line::is_blank_or_comment) {
        cont.pop();
    }

    let trimmed = after.trim_start();
    let (value, comment) = split_scalar_comment(trimmed);
    let value = value.trim_end();
    let key_only = key.start..key.end();

    if value.is_empty() || value == "~" || value == "null" {
        if cont.is_empty() {
            return Ok((
                TagsNode::Null {
                    node: key_only,
                    line: key.content.to_string(),
                    head: head.to_string(),
                    explicit: !value.is_empty(),
                    comment: comment.trim().to_string(),
                    eol: key.eol.to_string(),
                },
                Vec::new(),
            ));
        }
        if !value.is_empty() {
            return Err(unsupported("null tags value followed by items"));
        }
        return parse_block(key, &cont);
    }

    if cont.iter().any(|l| !l.is_blank_or_comment()) {
        return Err(unsupported("multi-line tags value"));
    }

    let value_start = after.len() - trimmed.len();
    let value_end = value_start + value.len();
    let head_with_ws = &key.content[..colon + 1 + value_start];
    let tail = format!("{}{}", &after[value_end..], key.eol);

    if value.starts_with('[') {
        if !value.ends_with(']') {
            return Err(unsupported("flow sequence spanning several lines"));
        }
        let inner = &value[1..value.len() - 1];
        let items: Vec<String> = split_flow_items(inner)?
            .into_iter()
            .map(str::to_string)
            .collect();
        let tags = items
            .iter()
            .map(|raw| parse_scalar(raw))
            .collect::<Result<Vec<_>, _>>()?;
        let sep = if items.len() > 1 && !inner.contains(", ") {
            ","
        } else {
            ", "
        };
        return Ok((
            TagsNode::Flow {
                node: key_only,
                head: format!("{head_with_ws}["),
                items,
                sep: sep.to_string(),
                tail: format!("]{tail}"),
            },
            tags,
        ));
    }

    let scalar = parse_scalar(value)?;
    let tags = split_comma_tags(&scalar);
    Ok((
        TagsNode::Scalar {
            node: key_only,
            head: head_with_ws.to_string(),
            tail,
        },
        tags,
    ))
}

fn parse_block(key: Line<'_>, cont: &[Line<'_>]) -> Result<(TagsNode, Vec<String>), FrontmatterError> {
    let mut lines = Vec::with_capacity(cont.len());
    let mut tags = Vec::new();
    for line in cont {
        if line.is_blank_or_comment() {
            lines.push(BlockLine::Other(format!("{}{}", line.content, line.eol)));
            continue;
        }
        let body = line.content.trim_start_matches([' ', '\t']);
        let indent = &line.content[..line.content.len() - body.len()];
        let Some(rest) = body.strip_prefix('-') else {
            return Err(unsupported("tags block holds something other than list items"));
        };
        if !(rest.is_empty() || rest.starts_with([' ', '\t'])) {
            return Err(unsupported("tags block holds something other than list items"));
        }
        let item_text = rest.trim_start();
        let gap = &rest[..rest.len() - item_text.len()];
        let (raw, _) = split_scalar_comment(item_text);
        let raw = raw.trim_end();
        if raw.is_empty() {
            return Err(unsupported("empty list item"));
        }
        tags.push(parse_scalar(raw)?);
        lines.push(BlockLine::Item(BlockItem {
            prefix: format!("{indent}-{gap}"),
            raw: raw.to_string(),
            suffix: format!("{}{}", &item_text[raw.len()..], line.eol),
        }));
    }
    let end = cont.last().map_or(key.end(), Line::end);
    Ok((
        TagsNode::Block {
            node: key.start..end,
            key_line: format!("{}{}", key.content, key.eol),
            lines,
        },
        tags,
    ))
}

fn unsupported(reason: &str) -> FrontmatterError {
    FrontmatterError::UnsupportedTagsLayout(reason.to_string())
}

/// Split `value # comment` into the value and the comment (with `#`).
///
/// Quoted scalars end at their closing quote; plain scalars end at the first
/// `#` preceded by whitespace.
fn split_scalar_comment(s: &str) -> (&str, &str) {
    let value_end = match s.chars().next() {
        Some('"') => closing_double_quote(s).map_or(s.len(), |i| i + 1),
        Some('\'') => closing_single_quote(s).map_or(s.len(), |i| i + 1),
        _ => {
            let bytes = s.as_bytes();
            let mut end = s.len();
            for (i, b) in bytes.iter().enumerate() {
                if *b == b'#' && (i == 0 || bytes[i - 1] == b' ' || bytes[i - 1] == b'\t') {
                    end = i;
                    break;
                }
            }
            end
        }
    };
    let rest = &s[value_end..];
    match rest.find('#') {
        Some(i) => (&s[..value_end], &rest[i..]),
        None => (&s[..value_end], ""),
    }
}

fn closing_double_quote(s: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in s.char_indices().skip(1) {
        match c {
            '\\' if !escaped => escaped = true,
            '"' if !escaped => return Some(i),
            _ => escaped = false,
        }
    }
    None
}

fn closing_single_quote(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 1;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            if bytes.get(i + 1) == Some(&b'\'') {
                i += 2;
                continue;
            }
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Split the inside of a flow sequence on commas outside quotes.
fn split_flow_items(inner: &str) -> Result<Vec<&str>, FrontmatterError> {
    let mut items = Vec::new();
    let mut rest = inner.trim();
    while !rest.is_empty() {
        let end = match rest.chars().next() {
            Some('"') => closing_double_quote(rest).map(|i| i + 1),
            Some('\'') => closing_single_quote(rest).map(|i| i + 1),
            Some('[' | '{') => return Err(unsupported("nested flow collection in tags")),
            _ => Some(rest.find(',').unwrap_or(rest.len())),
        }
        .ok_or_else(|| unsupported("unterminated quote in tags"))?;
        let item = rest[..end].trim();
        if !item.is_empty() {
            items.push(item);
        }
        rest = rest[end..].trim_start();
        match rest.strip_prefix(',') {
            Some(r) => rest = r.trim_start(),
            None if rest.is_empty() => {}
            None => return Err(unsupported("unexpected text between flow items")),
        }
    }
    Ok(items)
}

/// Read one scalar as written (plain, single- or double-quoted).
fn parse_scalar(raw: &str) -> Result<String, FrontmatterError> {
    let raw = raw.trim();
    if let Some(inner) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('\\') => out.push('\\'),
                Some('"') => out.push('"'),
                Some('/') => out.push('/'),
                _ => return Err(unsupported("unsupported escape in quoted tag")),
            }
        }
        return Ok(out);
    }
    if let Some(inner) = raw.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')) {
        return Ok(inner.replace("''", "'"));
    }
    if raw.starts_with(['|', '>', '&', '*', '!', '{', '[', '"', '\'']) {
        return Err(unsupported("block scalar, anchor, alias or tag in tags"));
    }
    Ok(raw.to_string())
}

fn split_comma_tags(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Write a tag as a YAML scalar, quoting only when plain style would not
/// read back as the same string.
fn render_scalar(value: &str, in_flow: bool) -> String {
    if is_plain_safe(value, in_flow) {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn is_plain_safe(value: &str, in_flow: bool) -> bool {
    let Some(first) = value.chars().next() else {
        return false;
    };
    if value.trim() != value || value.chars().any(char::is_control) {
        return false;
    }
    if "-?:,[]{}#&*!|>'\"%@`".contains(first) {
        return false;
    }
    if value.contains(": ") || value.contains(" #") || value.ends_with(':') {
        return false;
    }
    if in_flow && value.contains([',', '[', ']', '{', '}']) {
        return false;
    }
    let lower = value.to_ascii_lowercase();
    if matches!(
        lower.as_str(),
        "true" | "false" | "yes" | "no" | "on" | "off" | "null" | "~" | "y" | "n"
    ) {
        return false;
    }
    !(value.parse::<f64>().is_ok() || lower.starts_with("0x") || lower.starts_with("0o"))
}

/// What the YAML parser sees under `tags`, as strings.
fn parser_tags(yaml: &str) -> Result<Option<Vec<String>>, FrontmatterError> {
    let value: serde_yaml::Value =
        serde_yaml::from_str(yaml).map_err(|e| FrontmatterError::InvalidYaml(e.to_string()))?;
    let map = match value {
        serde_yaml::Value::Null => return Ok(None),
        serde_yaml::Value::Mapping(map) => map,
        _ => return Err(FrontmatterError::NotAMapping),
    };
    let Some(tags) = map.get("tags") else {
        return Ok(None);
    };
    let tags = match tags {
        serde_yaml::Value::Null => Vec::new(),
        serde_yaml::Value::Sequence(seq) => seq
            .iter()
            .map(|v| scalar_string(v).ok_or_else(|| unsupported("non-scalar tag entry")))
            .collect::<Result<Vec<_>, _>>()?,
        other => {
            let s = scalar_string(other).ok_or_else(|| unsupported("tags is a mapping"))?;
            split_comma_tags(&s)
        }
    };
    Ok(Some(tags))
}

fn scalar_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Working copy of one tag during mutation.
#[derive(Debug, Clone)]
struct Slot {
    value: String,
    /// Index in the original tag list, `None` for appended tags.
    origin: Option<usize>,
    dirty: bool,
}

/// Why a change left a note as it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoOpReason {
    /// The new tag is already in the note.
    AlreadyPresent,
    /// The tag to rename is not in the note.
    OldTagAbsent,
    /// The change itself is a no-op.
    NotMutating,
}

/// Per-change result of [`mutate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeOutcome {
    Applied,
    NoOp(NoOpReason),
}

/// New note text and what happened to each change, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub text: String,
    pub outcomes: Vec<ChangeOutcome>,
}

impl Mutation {
    #[must_use]
    pub fn changed(&self) -> bool {
        self.outcomes.contains(&ChangeOutcome::Applied)
    }
}

/// Apply `changes` (all for one note) to `text`.
///
/// Adds append, renames replace in place, and a change whose new tag is
/// already present is a no-op, so applying the same changes twice leaves the
/// second run with nothing to do. When nothing applies the input is returned
/// unchanged.
///
/// # Errors
///
/// [`FrontmatterError::Missing`] when a rename or add targets a note without
/// frontmatter under [`MissingFrontmatterPolicy::Fail`], any parse error from
/// [`NoteDocument::parse`], and [`FrontmatterError::UnsupportedTagsLayout`]
/// when the edited block would not read back as intended.
pub fn mutate(
    text: &str,
    changes: &[ProposedChange],
    options: &MutationOptions,
) -> Result<Mutation, FrontmatterError> {
    let doc = NoteDocument::parse(text)?;
    if !doc.has_frontmatter()
        && options.missing_frontmatter == MissingFrontmatterPolicy::Fail
        && changes.iter().any(ProposedChange::is_mutating)
    {
        return Err(FrontmatterError::Missing);
    }

    let mut slots = doc.slots();
    let mut body = Cow::Borrowed(doc.body());
    let outcomes: Vec<ChangeOutcome> = changes
        .iter()
        .map(|change| apply_change(&mut slots, &mut body, change, options))
        .collect();

    if !outcomes.contains(&ChangeOutcome::Applied) {
        return Ok(Mutation {
            text: text.to_string(),
            outcomes,
        });
    }

    let new_text = doc.render(&slots, &body);
    let reread = NoteDocument::parse(&new_text)?;
    let expected: Vec<&str> = slots.iter().map(|s| s.value.as_str()).collect();
    if reread.tags() != expected.as_slice() || reread.body() != body.as_ref() {
        return Err(unsupported("edited note does not read back as written"));
    }

    Ok(Mutation {
        text: new_text,
        outcomes,
    })
}

fn apply_change(
    slots: &mut Vec<Slot>,
    body: &mut Cow<'_, str>,
    change: &ProposedChange,
    options: &MutationOptions,
) -> ChangeOutcome {
    let new = change.new_tag();
    match change.kind() {
        ChangeKind::NoOp => ChangeOutcome::NoOp(NoOpReason::NotMutating),
        ChangeKind::Add => {
            if find_key(slots, new.key()).is_some() {
                return ChangeOutcome::NoOp(NoOpReason::AlreadyPresent);
            }
            slots.push(Slot {
                value: new.original().to_string(),
                origin: None,
                dirty: true,
            });
            ChangeOutcome::Applied
        }
        ChangeKind::Rename => {
            let Some(old) = change.old() else {
                return ChangeOutcome::NoOp(NoOpReason::OldTagAbsent);
            };
            let at = find_key(slots, old.key());
            let clash = slots
                .iter()
                .enumerate()
                .any(|(i, s)| Some(i) != at && normalize_key(&s.value) == new.key());
            if clash {
                return ChangeOutcome::NoOp(NoOpReason::AlreadyPresent);
            }

            let mut applied = false;
            if let Some(i) = at {
                if slots[i].value != new.original() {
                    slots[i].value = new.original().to_string();
                    slots[i].dirty = true;
                    applied = true;
                }
            }
            if options.rewrite_inline_tags {
                if let Some(rewritten) = rewrite_inline_tags(&**body, old.key(), new.original()) {
                    *body = Cow::Owned(rewritten);
                    applied = true;
                }
            }

            match (applied, at) {
                (true, _) => ChangeOutcome::Applied,
                (false, Some(_)) => ChangeOutcome::NoOp(NoOpReason::AlreadyPresent),
                (false, None) => ChangeOutcome::NoOp(NoOpReason::OldTagAbsent),
            }
        }
    }
}

fn find_key(slots: &[Slot], key: &str) -> Option<usize> {
    slots.iter().position(|s| normalize_key(&s.value) == key)
}
