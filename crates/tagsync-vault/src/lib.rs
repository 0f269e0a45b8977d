//! # tagsync-vault
//!
//! Everything in tagsync that touches the vault on disk.
//!
//! The vault is the only thing tagsync writes to. Notes are read through
//! [`Vault`], tags are collected into inventories, and changes are carried
//! out by the [`Engine`], which previews in dry-run mode and replaces files
//! atomically in apply mode.

pub mod autotag;
pub mod engine;
pub mod loader;

pub use autotag::{autotag_changes, compile_rules, derived_inventory, RuleError, TagRule};
pub use engine::{Engine, Mode, NoteTransaction, TransactionResult, TransactionStatus};
pub use loader::{unparsable_notes, vault_inventory, Note, Vault};
