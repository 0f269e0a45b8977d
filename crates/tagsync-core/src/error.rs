//! Error types for tagsync.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level result type for tagsync operations.
pub type Result<T> = std::result::Result<T, TagsyncError>;

/// Top-level error type for tagsync.
///
/// Only [`TagsyncError::SourceUnavailable`], [`TagsyncError::InvariantViolation`]
/// and [`TagsyncError::Config`] abort a run. The per-note variants are recorded
/// against the note and the batch continues.
#[derive(Debug, Error)]
pub enum TagsyncError {
    #[error("tag source '{source_name}' unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("malformed frontmatter: {0}")]
    MalformedFrontmatter(#[from] FrontmatterError),

    #[error("write failed for {}: {source}", path.display())]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while locating or editing a note's frontmatter block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrontmatterError {
    #[error("note has no frontmatter block")]
    Missing,

    #[error("no closing '---' frontmatter delimiter found")]
    Unterminated,

    #[error("frontmatter is not valid YAML: {0}")]
    InvalidYaml(String),

    #[error("frontmatter is not a key/value mapping")]
    NotAMapping,

    #[error("unsupported tags layout: {0}")]
    UnsupportedTagsLayout(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_display_human_readable_messages() {
        let err = TagsyncError::SourceUnavailable {
            source_name: "readwise".to_string(),
            reason: "401 unauthorized".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("readwise"));
        assert!(msg.contains("401"));

        let err = TagsyncError::from(FrontmatterError::Unterminated);
        assert!(err.to_string().contains("closing '---'"));
    }
}
