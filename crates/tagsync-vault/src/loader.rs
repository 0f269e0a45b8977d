//! Vault walking and the vault-side tag inventory.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use tagsync_core::error::{FrontmatterError, Result, TagsyncError};
use tagsync_core::frontmatter::NoteDocument;
use tagsync_core::inline::inline_tags;
use tagsync_core::tag::{NoteId, Provenance, Tag, TagInventory, TagLocation, TagSourceKind};

/// A markdown note read from the vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub id: NoteId,
    pub path: PathBuf,
    pub text: String,
}

/// An Obsidian vault rooted at a directory.
#[derive(Debug, Clone)]
pub struct Vault {
    root: PathBuf,
}

impl Vault {
    /// Open a vault directory.
    ///
    /// # Errors
    ///
    /// Returns [`TagsyncError::Config`] if `root` is not a directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(TagsyncError::Config(format!(
                "vault path {} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every `*.md` file under the root, sorted by path, skipping hidden
    /// directories such as `.obsidian` and `.trash`.
    ///
    /// # Errors
    ///
    /// Returns [`TagsyncError::Io`] if a directory cannot be read.
    pub fn note_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e));
        for entry in walker {
            let entry = entry.map_err(|e| TagsyncError::Io(e.into()))?;
            let is_md = entry.path().extension().and_then(|e| e.to_str()) == Some("md");
            if entry.file_type().is_file() && is_md {
                paths.push(entry.into_path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Vault-relative identifier with `/` separators.
    #[must_use]
    pub fn note_id(&self, path: &Path) -> NoteId {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        NoteId::new(parts.join("/"))
    }

    /// Absolute path of a note identifier.
    #[must_use]
    pub fn path_of(&self, id: &NoteId) -> PathBuf {
        id.as_str()
            .split('/')
            .fold(self.root.clone(), |path, part| path.join(part))
    }

    /// Read every note. Files that are not valid UTF-8 are skipped with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Returns [`TagsyncError::Io`] if the walk fails.
    pub fn load_notes(&self) -> Result<Vec<Note>> {
        let mut notes = Vec::new();
        for path in self.note_paths()? {
            let id = self.note_id(&path);
            match fs::read_to_string(&path) {
                Ok(text) => notes.push(Note { id, path, text }),
                Err(err) => warn!(note = %id, error = %err, "skipping unreadable note"),
            }
        }
        debug!(root = %self.root.display(), count = notes.len(), "loaded vault notes");
        Ok(notes)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_str().is_some_and(|s| s.starts_with('.'))
}

/// Build the vault inventory from frontmatter tags and inline body tags.
///
/// Notes whose frontmatter cannot be parsed contribute nothing and are
/// logged.
#[must_use]
pub fn vault_inventory(notes: &[Note]) -> TagInventory {
    let mut inventory = TagInventory::new(TagSourceKind::Vault);
    for note in notes {
        let doc = match NoteDocument::parse(&note.text) {
            Ok(doc) => doc,
            Err(err) => {
                warn!(note = %note.id, error = %err, "skipping note with unreadable frontmatter");
                continue;
            }
        };
        for raw in doc.tags() {
            inventory.insert(
                Tag::new(raw.as_str()),
                Some(Provenance::Note {
                    note: note.id.clone(),
                    location: TagLocation::Frontmatter,
                }),
            );
        }
        for raw in inline_tags(doc.body()) {
            inventory.insert(
                Tag::new(raw),
                Some(Provenance::Note {
                    note: note.id.clone(),
                    location: TagLocation::Body,
                }),
            );
        }
    }
    inventory
}

/// Notes whose frontmatter cannot be parsed, with the parse error.
///
/// Their tags are unknown, so any rename may concern them.
#[must_use]
pub fn unparsable_notes(notes: &[Note]) -> Vec<(NoteId, FrontmatterError)> {
    notes
        .iter()
        .filter_map(|note| {
            NoteDocument::parse(&note.text)
                .err()
                .map(|err| (note.id.clone(), err))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn walks_markdown_sorted_and_skips_hidden_dirs() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.md", "");
        write(dir.path(), "a/z.md", "");
        write(dir.path(), "a/notes.txt", "");
        write(dir.path(), ".obsidian/workspace.md", "");
        write(dir.path(), ".trash/old.md", "");

        let vault = Vault::open(dir.path()).unwrap();
        let ids: Vec<String> = vault
            .note_paths()
            .unwrap()
            .iter()
            .map(|p| vault.note_id(p).to_string())
            .collect();
        assert_eq!(ids, vec!["a/z.md", "b.md"]);
        assert_eq!(vault.path_of(&NoteId::new("a/z.md")), dir.path().join("a").join("z.md"));
    }

    #[test]
    fn open_rejects_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = Vault::open(dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, TagsyncError::Config(_)));
    }

    #[test]
    fn inventory_merges_frontmatter_and_inline_tags() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "one.md", "---\ntags: [Rust, ml]\n---\nSee #rust and #async\n");
        write(dir.path(), "two.md", "---\ntags: rust, cli\n---\n");
        write(dir.path(), "broken.md", "---\ntags: [a\n");

        let vault = Vault::open(dir.path()).unwrap();
        let notes = vault.load_notes().unwrap();
        assert_eq!(notes.len(), 3);

        let inv = vault_inventory(&notes);
        let tags: Vec<&str> = inv.iter().map(|t| t.tag.original()).collect();
        assert_eq!(tags, vec!["Rust", "ml", "async", "cli"]);
        assert!(inv.ensure_unique().is_ok());

        let rust = inv.get("rust").unwrap();
        assert_eq!(
            rust.notes(false),
            vec![NoteId::new("one.md"), NoteId::new("two.md")]
        );
        let async_tag = inv.get("async").unwrap();
        assert!(async_tag.notes(false).is_empty());
        assert_eq!(async_tag.notes(true), vec![NoteId::new("one.md")]);

        let unparsable = unparsable_notes(&notes);
        assert_eq!(unparsable.len(), 1);
        assert_eq!(unparsable[0].0, NoteId::new("broken.md"));
        assert_eq!(unparsable[0].1, FrontmatterError::Unterminated);
    }
}
