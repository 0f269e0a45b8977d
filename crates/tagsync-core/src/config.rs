//! Immutable configuration values passed into the planner and mutator.

use serde::{Deserialize, Serialize};

/// Default minimum similarity for a fuzzy match.
pub const DEFAULT_SIMILARITY_THRESHOLD: u8 = 80;

/// How to settle several source tags claiming the same existing tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Keep the claim ranked first by score, then edit distance, then key.
    #[default]
    BestScore,
    /// Keep the claim from the earliest source tag in inventory order.
    FirstSeen,
}

/// What to do when a mutating change targets a note without frontmatter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingFrontmatterPolicy {
    /// Report the note as failed.
    #[default]
    Fail,
    /// Prepend a minimal block holding only `tags`.
    Create,
}

/// Planner settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub similarity_threshold: u8,
    pub conflict_policy: ConflictPolicy,
    /// Emit a rename when keys match but spellings differ.
    pub cosmetic_renames: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            conflict_policy: ConflictPolicy::default(),
            cosmetic_renames: true,
        }
    }
}

impl ReconcileConfig {
    #[must_use]
    pub fn with_threshold(threshold: u8) -> Self {
        Self {
            similarity_threshold: threshold.min(100),
            ..Self::default()
        }
    }
}

/// Mutator settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationOptions {
    pub missing_frontmatter: MissingFrontmatterPolicy,
    /// Also rewrite `#old` inline tags in the note body on rename.
    pub rewrite_inline_tags: bool,
}

/// One auto-tag rule as written in configuration.
///
/// Missing fields read as empty so a bad rule can be skipped on its own
/// instead of failing the whole file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagRuleConfig {
    pub pattern: String,
    pub tag_format: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ReconcileConfig::default();
        assert_eq!(config.similarity_threshold, 80);
        assert_eq!(config.conflict_policy, ConflictPolicy::BestScore);
        assert!(config.cosmetic_renames);

        let options = MutationOptions::default();
        assert_eq!(options.missing_frontmatter, MissingFrontmatterPolicy::Fail);
        assert!(!options.rewrite_inline_tags);
    }

    #[test]
    fn threshold_is_clamped() {
        assert_eq!(ReconcileConfig::with_threshold(150).similarity_threshold, 100);
    }

    #[test]
    fn policies_deserialize_from_kebab_case() {
        let policy: ConflictPolicy = serde_yaml::from_str("first-seen").unwrap();
        assert_eq!(policy, ConflictPolicy::FirstSeen);
        let policy: MissingFrontmatterPolicy = serde_yaml::from_str("create").unwrap();
        assert_eq!(policy, MissingFrontmatterPolicy::Create);
    }
}
