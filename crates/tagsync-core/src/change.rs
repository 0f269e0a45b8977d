//! Proposed changes: the unit the planner emits and the engine consumes.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tag::{NoteId, Tag};

/// What a change does to a tag list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeKind {
    Rename,
    Add,
    NoOp,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Rename => "rename",
            Self::Add => "add",
            Self::NoOp => "no-op",
        };
        f.write_str(s)
    }
}

/// What a change applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeTarget {
    /// A tag-vocabulary decision not yet bound to a note.
    Vocabulary,
    Note(NoteId),
}

impl ChangeTarget {
    #[must_use]
    pub fn note(&self) -> Option<&NoteId> {
        match self {
            Self::Vocabulary => None,
            Self::Note(id) => Some(id),
        }
    }
}

impl fmt::Display for ChangeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vocabulary => f.write_str("(vocabulary)"),
            Self::Note(id) => write!(f, "{id}"),
        }
    }
}

/// An immutable proposal to rename, add, or leave a tag.
///
/// `new` is the tag from the authoritative source; `old` is the existing tag
/// it replaces (renames) or matched (no-ops).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedChange {
    target: ChangeTarget,
    kind: ChangeKind,
    old: Option<Tag>,
    new: Tag,
    confidence: u8,
    rationale: String,
}

impl ProposedChange {
    #[must_use]
    pub fn rename(old: Tag, new: Tag, confidence: u8, rationale: impl Into<String>) -> Self {
        Self {
            target: ChangeTarget::Vocabulary,
            kind: ChangeKind::Rename,
            old: Some(old),
            new,
            confidence: confidence.min(100),
            rationale: rationale.into(),
        }
    }

    #[must_use]
    pub fn add(new: Tag, confidence: u8, rationale: impl Into<String>) -> Self {
        Self {
            target: ChangeTarget::Vocabulary,
            kind: ChangeKind::Add,
            old: None,
            new,
            confidence: confidence.min(100),
            rationale: rationale.into(),
        }
    }

    #[must_use]
    pub fn no_op(old: Option<Tag>, new: Tag, confidence: u8, rationale: impl Into<String>) -> Self {
        Self {
            target: ChangeTarget::Vocabulary,
            kind: ChangeKind::NoOp,
            old,
            new,
            confidence: confidence.min(100),
            rationale: rationale.into(),
        }
    }

    /// A copy of this change bound to `note`.
    #[must_use]
    pub fn for_note(&self, note: NoteId) -> Self {
        Self {
            target: ChangeTarget::Note(note),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn target(&self) -> &ChangeTarget {
        &self.target
    }

    #[must_use]
    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    #[must_use]
    pub fn old(&self) -> Option<&Tag> {
        self.old.as_ref()
    }

    #[must_use]
    pub fn new_tag(&self) -> &Tag {
        &self.new
    }

    #[must_use]
    pub fn confidence(&self) -> u8 {
        self.confidence
    }

    #[must_use]
    pub fn rationale(&self) -> &str {
        &self.rationale
    }

    /// Whether this change could alter a note at all.
    #[must_use]
    pub fn is_mutating(&self) -> bool {
        matches!(self.kind, ChangeKind::Rename | ChangeKind::Add)
    }
}

impl fmt::Display for ProposedChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.old {
            Some(old) => write!(f, "{} {} -> {} @ {}", self.kind, old, self.new, self.target),
            None => write!(f, "{} {} @ {}", self.kind, self.new, self.target),
        }
    }
}

/// Review order: confidence descending, then the new tag's key, then the
/// old tag's key, then the target (vocabulary before notes, notes by id).
#[must_use]
pub fn review_order(a: &ProposedChange, b: &ProposedChange) -> Ordering {
    b.confidence
        .cmp(&a.confidence)
        .then_with(|| a.new.key().cmp(b.new.key()))
        .then_with(|| {
            let ak = a.old.as_ref().map(Tag::key);
            let bk = b.old.as_ref().map(Tag::key);
            ak.cmp(&bk)
        })
        .then_with(|| a.target.note().cmp(&b.target.note()))
}

/// Sort changes into review order.
pub fn sort_for_review(changes: &mut [ProposedChange]) {
    changes.sort_by(review_order);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_note_binds_without_touching_the_original() {
        let vocab = ProposedChange::rename(Tag::new("ml"), Tag::new("machine-learning"), 85, "fuzzy");
        let bound = vocab.for_note(NoteId::new("a.md"));
        assert_eq!(vocab.target(), &ChangeTarget::Vocabulary);
        assert_eq!(bound.target().note(), Some(&NoteId::new("a.md")));
        assert_eq!(bound.kind(), ChangeKind::Rename);
        assert_eq!(bound.new_tag(), vocab.new_tag());
    }

    #[test]
    fn review_order_is_confidence_then_key() {
        let mut changes = vec![
            ProposedChange::add(Tag::new("zeta"), 0, "new"),
            ProposedChange::add(Tag::new("alpha"), 0, "new"),
            ProposedChange::rename(Tag::new("rusty"), Tag::new("rust"), 89, "fuzzy"),
            ProposedChange::add(Tag::new("beta"), 0, "new").for_note(NoteId::new("b.md")),
            ProposedChange::add(Tag::new("beta"), 0, "new").for_note(NoteId::new("a.md")),
        ];
        sort_for_review(&mut changes);
        let order: Vec<String> = changes.iter().map(ToString::to_string).collect();
        assert_eq!(
            order,
            vec![
                "rename rusty -> rust @ (vocabulary)",
                "add alpha @ (vocabulary)",
                "add beta @ a.md",
                "add beta @ b.md",
                "add zeta @ (vocabulary)",
            ]
        );
    }

    #[test]
    fn confidence_is_capped() {
        let c = ProposedChange::add(Tag::new("x"), 250, "r");
        assert_eq!(c.confidence(), 100);
    }
}
