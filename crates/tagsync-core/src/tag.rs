//! Tags, normalized keys, and per-source tag inventories.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TagsyncError};

/// Derive the comparison key for a raw tag string.
///
/// Trims, drops one leading `#`, lowercases, and collapses every run of
/// whitespace, `-` or `_` into a single `-`.
#[must_use]
pub fn normalize_key(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('#').unwrap_or(trimmed);

    let mut key = String::with_capacity(trimmed.len());
    let mut pending_sep = false;
    for c in trimmed.chars() {
        if c.is_whitespace() || c == '-' || c == '_' {
            pending_sep = true;
            continue;
        }
        if pending_sep && !key.is_empty() {
            key.push('-');
        }
        pending_sep = false;
        key.extend(c.to_lowercase());
    }
    key
}

/// A tag as written by its source, with its comparison key derived once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Tag {
    original: String,
    key: String,
}

impl Tag {
    pub fn new(raw: impl Into<String>) -> Self {
        let original: String = raw.into();
        let original = original.trim().to_string();
        let key = normalize_key(&original);
        Self { original, key }
    }

    /// The spelling used for display and for writing back.
    #[must_use]
    pub fn original(&self) -> &str {
        &self.original
    }

    /// The normalized comparison key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn same_key(&self, other: &Tag) -> bool {
        self.key == other.key
    }
}

impl From<String> for Tag {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> Self {
        tag.original
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

/// Vault-relative note path with `/` separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(String);

impl NoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().replace('\\', "/"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which source an inventory was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagSourceKind {
    Remote,
    Vault,
    Derived,
}

impl fmt::Display for TagSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Remote => "remote",
            Self::Vault => "vault",
            Self::Derived => "derived",
        };
        f.write_str(s)
    }
}

/// Where inside a note a tag was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagLocation {
    Frontmatter,
    Body,
}

/// Why a tag is in an inventory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Provenance {
    /// Used by a vault note.
    Note { note: NoteId, location: TagLocation },
    /// Produced by an auto-tag rule matching inside a note.
    Rule {
        note: NoteId,
        pattern: String,
        matched: String,
    },
}

impl Provenance {
    #[must_use]
    pub fn note(&self) -> &NoteId {
        match self {
            Self::Note { note, .. } | Self::Rule { note, .. } => note,
        }
    }
}

/// One tag in an inventory together with everything that references it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryTag {
    pub tag: Tag,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provenance: Vec<Provenance>,
}

impl InventoryTag {
    /// Notes referencing this tag, sorted and deduplicated.
    ///
    /// Body references are only included when `include_body` is set.
    #[must_use]
    pub fn notes(&self, include_body: bool) -> Vec<NoteId> {
        let mut notes: Vec<NoteId> = self
            .provenance
            .iter()
            .filter(|p| match p {
                Provenance::Note { location, .. } => {
                    include_body || *location == TagLocation::Frontmatter
                }
                Provenance::Rule { .. } => true,
            })
            .map(|p| p.note().clone())
            .collect();
        notes.sort();
        notes.dedup();
        notes
    }
}

/// The tags one source knows about.
///
/// [`TagInventory::collect`] and [`TagInventory::insert`] deduplicate by
/// normalized key. [`TagInventory::push_unchecked`] does not; the planner
/// rejects such inventories via [`TagInventory::ensure_unique`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagInventory {
    source: TagSourceKind,
    tags: Vec<InventoryTag>,
    /// Key to position in `tags`; the first entry wins for duplicate keys.
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl TagInventory {
    #[must_use]
    pub fn new(source: TagSourceKind) -> Self {
        Self {
            source,
            tags: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Build a deduplicated inventory from raw tag strings without provenance.
    pub fn collect<I, S>(source: TagSourceKind, raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inventory = Self::new(source);
        for tag in raw {
            inventory.insert(Tag::new(tag), None);
        }
        inventory
    }

    /// Add a tag, merging with an existing entry that shares its key.
    ///
    /// The first-seen spelling is kept. Empty keys are ignored.
    pub fn insert(&mut self, tag: Tag, provenance: Option<Provenance>) {
        if tag.key().is_empty() {
            return;
        }
        match self.index.get(tag.key()) {
            Some(&pos) => {
                let existing = &mut self.tags[pos];
                if let Some(p) = provenance {
                    if !existing.provenance.contains(&p) {
                        existing.provenance.push(p);
                    }
                }
            }
            None => {
                self.index.insert(tag.key().to_string(), self.tags.len());
                self.tags.push(InventoryTag {
                    tag,
                    provenance: provenance.into_iter().collect(),
                });
            }
        }
    }

    /// Append an entry without deduplication.
    pub fn push_unchecked(&mut self, entry: InventoryTag) {
        self.index
            .entry(entry.tag.key().to_string())
            .or_insert(self.tags.len());
        self.tags.push(entry);
    }

    #[must_use]
    pub fn source(&self) -> TagSourceKind {
        self.source
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InventoryTag> {
        self.tags.iter()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&InventoryTag> {
        self.index.get(key).map(|&pos| &self.tags[pos])
    }

    /// Fail if two entries share a normalized key.
    ///
    /// # Errors
    ///
    /// Returns [`TagsyncError::InvariantViolation`] naming the colliding spellings.
    pub fn ensure_unique(&self) -> Result<()> {
        let mut seen: HashMap<&str, &str> = HashMap::with_capacity(self.tags.len());
        for entry in &self.tags {
            if let Some(first) = seen.insert(entry.tag.key(), entry.tag.original()) {
                return Err(TagsyncError::InvariantViolation(format!(
                    "{} inventory holds '{}' and '{}' under the same key '{}'",
                    self.source,
                    first,
                    entry.tag.original(),
                    entry.tag.key()
                )));
            }
        }
        Ok(())
    }
}
