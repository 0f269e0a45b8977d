//! # tagsync-core
//!
//! Tag model, matching, planning and frontmatter editing for tagsync.
//!
//! Nothing in this crate touches the filesystem or the network:
//! - [`Tag`], [`TagInventory`] and [`Provenance`]: tags as sources know them
//! - [`similarity`]: the 0..=100 score and deterministic best-match ranking
//! - [`planner::plan`]: reconciles a source inventory into [`ProposedChange`]s
//! - [`frontmatter::mutate`]: applies changes to one note's text, preserving
//!   everything outside the `tags` node
//! - Error hierarchy ([`TagsyncError`], [`FrontmatterError`])

pub mod change;
pub mod config;
pub mod error;
pub mod frontmatter;
pub mod inline;
pub mod planner;
pub mod similarity;
pub mod tag;

pub use change::{ChangeKind, ChangeTarget, ProposedChange};
pub use config::{
    ConflictPolicy, MissingFrontmatterPolicy, MutationOptions, ReconcileConfig, TagRuleConfig,
    DEFAULT_SIMILARITY_THRESHOLD,
};
pub use error::{FrontmatterError, Result, TagsyncError};
pub use frontmatter::{mutate, ChangeOutcome, Mutation, NoOpReason, NoteDocument};
pub use planner::{bind_renames_to, expand_to_notes, plan};
pub use similarity::{MatchCandidate, MatchKind};
pub use tag::{
    normalize_key, InventoryTag, NoteId, Provenance, Tag, TagInventory, TagLocation, TagSourceKind,
};
