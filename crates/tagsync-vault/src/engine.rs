//! Transaction engine: dry-run previews and atomic, idempotent apply.
//!
//! Changes are grouped into one [`NoteTransaction`] per note. A transaction
//! reads the note once, runs every change through the mutator in plan order
//! and, in apply mode, writes the result with a single atomic replace. A
//! failing note never stops the rest of the batch.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use tagsync_core::change::{ChangeTarget, ProposedChange};
use tagsync_core::config::MutationOptions;
use tagsync_core::error::{Result, TagsyncError};
use tagsync_core::frontmatter::{mutate, ChangeOutcome, NoOpReason};
use tagsync_core::tag::NoteId;

use crate::loader::Vault;

/// Whether the engine may write to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    DryRun,
    Apply,
}

/// Terminal state of one change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionStatus {
    Applied,
    SkippedDryRun,
    SkippedNoop,
    Failed,
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Applied => "applied",
            Self::SkippedDryRun => "skipped-dry-run",
            Self::SkippedNoop => "skipped-noop",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of one proposed change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResult {
    /// Position of the change in the plan.
    pub order: usize,
    pub change: ProposedChange,
    pub status: TransactionStatus,
    /// Failure cause, or why nothing was done.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Line diff of the note, on the first change of a note that would change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

impl TransactionResult {
    fn new(order: usize, change: ProposedChange, status: TransactionStatus) -> Self {
        Self {
            order,
            change,
            status,
            detail: None,
            diff: None,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[must_use]
    pub fn note(&self) -> Option<&NoteId> {
        self.change.target().note()
    }
}

/// All changes for one note, with their plan positions.
#[derive(Debug, Clone)]
pub struct NoteTransaction {
    pub note: NoteId,
    pub changes: Vec<(usize, ProposedChange)>,
}

impl NoteTransaction {
    /// Group note-bound changes by note. Vocabulary-level changes are
    /// returned separately with their plan positions.
    #[must_use]
    pub fn group(changes: &[ProposedChange]) -> (Vec<Self>, Vec<(usize, ProposedChange)>) {
        let mut by_note: BTreeMap<NoteId, Vec<(usize, ProposedChange)>> = BTreeMap::new();
        let mut vocabulary = Vec::new();
        for (order, change) in changes.iter().enumerate() {
            match change.target() {
                ChangeTarget::Note(id) => by_note
                    .entry(id.clone())
                    .or_default()
                    .push((order, change.clone())),
                ChangeTarget::Vocabulary => vocabulary.push((order, change.clone())),
            }
        }
        let transactions = by_note
            .into_iter()
            .map(|(note, changes)| Self { note, changes })
            .collect();
        (transactions, vocabulary)
    }

    fn fail_all(&self, detail: &str) -> Vec<TransactionResult> {
        self.changes
            .iter()
            .map(|(order, change)| {
                TransactionResult::new(*order, change.clone(), TransactionStatus::Failed)
                    .with_detail(detail)
            })
            .collect()
    }
}

/// Runs transactions against one vault.
#[derive(Debug, Clone)]
pub struct Engine {
    vault: Vault,
    mode: Mode,
    options: MutationOptions,
}

impl Engine {
    #[must_use]
    pub fn new(vault: Vault, mode: Mode, options: MutationOptions) -> Self {
        Self {
            vault,
            mode,
            options,
        }
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Run one note's transaction. Blocking.
    #[must_use]
    pub fn run(&self, tx: &NoteTransaction) -> Vec<TransactionResult> {
        let path = self.vault.path_of(&tx.note);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                warn!(note = %tx.note, error = %err, "cannot read note");
                return tx.fail_all(&TagsyncError::Io(err).to_string());
            }
        };
        let digest = Sha256::digest(text.as_bytes());

        let changes: Vec<ProposedChange> = tx.changes.iter().map(|(_, c)| c.clone()).collect();
        let mutation = match mutate(&text, &changes, &self.options) {
            Ok(m) => m,
            Err(err) => {
                warn!(note = %tx.note, error = %err, "cannot edit note");
                return tx.fail_all(&TagsyncError::from(err).to_string());
            }
        };

        let write_error = if self.mode == Mode::Apply && mutation.changed() {
            match write_atomic(&path, &mutation.text, &digest) {
                Ok(()) => {
                    debug!(note = %tx.note, "note written");
                    None
                }
                Err(err) => {
                    warn!(note = %tx.note, error = %err, "write failed");
                    Some(err.to_string())
                }
            }
        } else {
            None
        };

        let mut diff = (self.mode == Mode::DryRun && mutation.changed())
            .then(|| line_diff(tx.note.as_str(), &text, &mutation.text));

        tx.changes
            .iter()
            .zip(&mutation.outcomes)
            .map(|((order, change), outcome)| {
                let result = TransactionResult::new(*order, change.clone(), TransactionStatus::Failed);
                match (outcome, self.mode, &write_error) {
                    (ChangeOutcome::NoOp(reason), _, _) => TransactionResult {
                        status: TransactionStatus::SkippedNoop,
                        detail: Some(noop_detail(*reason).to_string()),
                        ..result
                    },
                    (ChangeOutcome::Applied, Mode::DryRun, _) => TransactionResult {
                        status: TransactionStatus::SkippedDryRun,
                        diff: diff.take(),
                        ..result
                    },
                    (ChangeOutcome::Applied, Mode::Apply, None) => TransactionResult {
                        status: TransactionStatus::Applied,
                        ..result
                    },
                    (ChangeOutcome::Applied, Mode::Apply, Some(err)) => result.with_detail(err.clone()),
                }
            })
            .collect()
    }

    /// Run every change sequentially, returning results in plan order.
    #[must_use]
    pub fn execute(&self, changes: &[ProposedChange]) -> Vec<TransactionResult> {
        let (transactions, vocabulary) = NoteTransaction::group(changes);
        let mut results = vocabulary_results(vocabulary);
        for tx in &transactions {
            results.extend(self.run(tx));
        }
        results.sort_by_key(|r| r.order);
        results
    }

    /// Run note transactions on at most `workers` blocking tasks.
    ///
    /// Once `cancel` is set no further notes are started; notes already
    /// running finish their write, and unstarted ones are reported as
    /// failed. Results come back in plan order.
    pub async fn execute_batch(
        &self,
        changes: &[ProposedChange],
        workers: usize,
        cancel: Arc<AtomicBool>,
    ) -> Vec<TransactionResult> {
        let (transactions, vocabulary) = NoteTransaction::group(changes);
        info!(
            notes = transactions.len(),
            changes = changes.len(),
            workers,
            mode = ?self.mode,
            "executing batch"
        );
        let mut results = vocabulary_results(vocabulary);
        let expected: Vec<(usize, ProposedChange)> = transactions
            .iter()
            .flat_map(|tx| tx.changes.iter().cloned())
            .collect();

        let semaphore = Arc::new(Semaphore::new(workers.clamp(1, Semaphore::MAX_PERMITS)));
        let mut set = JoinSet::new();
        for tx in transactions {
            if cancel.load(Ordering::SeqCst) {
                results.extend(tx.fail_all("interrupted before this note was processed"));
                continue;
            }
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                results.extend(tx.fail_all("worker pool closed"));
                continue;
            };
            if cancel.load(Ordering::SeqCst) {
                results.extend(tx.fail_all("interrupted before this note was processed"));
                continue;
            }
            let engine = self.clone();
            set.spawn_blocking(move || {
                let _permit = permit;
                engine.run(&tx)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(batch) => results.extend(batch),
                Err(err) => error!(error = %err, "note worker did not finish"),
            }
        }

        let seen: BTreeSet<usize> = results.iter().map(|r| r.order).collect();
        for (order, change) in expected {
            if !seen.contains(&order) {
                results.push(
                    TransactionResult::new(order, change, TransactionStatus::Failed)
                        .with_detail("note worker did not finish"),
                );
            }
        }

        results.sort_by_key(|r| r.order);
        info!(results = results.len(), "batch finished");
        results
    }
}

fn vocabulary_results(vocabulary: Vec<(usize, ProposedChange)>) -> Vec<TransactionResult> {
    vocabulary
        .into_iter()
        .map(|(order, change)| {
            TransactionResult::new(order, change, TransactionStatus::SkippedNoop)
                .with_detail("vocabulary only")
        })
        .collect()
}

fn noop_detail(reason: NoOpReason) -> &'static str {
    match reason {
        NoOpReason::AlreadyPresent => "already present",
        NoOpReason::OldTagAbsent => "old tag not in note",
        NoOpReason::NotMutating => "no change needed",
    }
}

/// Replace `path` with `text` via a synced temp file in the same directory.
///
/// Fails without touching the file if its content no longer hashes to
/// `expected`.
fn write_atomic(path: &Path, text: &str, expected: &[u8]) -> Result<()> {
    let fail = |source: io::Error| TagsyncError::WriteFailure {
        path: path.to_path_buf(),
        source,
    };

    let current = fs::read(path).map_err(fail)?;
    if Sha256::digest(&current).as_slice() != expected {
        return Err(fail(io::Error::other("changed on disk since it was read")));
    }

    let dir = path
        .parent()
        .ok_or_else(|| fail(io::Error::other("note has no parent directory")))?;
    let permissions = fs::metadata(path).map_err(fail)?.permissions();

    let mut tmp = NamedTempFile::new_in(dir).map_err(fail)?;
    tmp.write_all(text.as_bytes()).map_err(fail)?;
    tmp.as_file().set_permissions(permissions).map_err(fail)?;
    tmp.as_file().sync_all().map_err(fail)?;
    tmp.persist(path).map_err(|e| fail(e.error))?;
    Ok(())
}

/// Largest changed region, in old lines times new lines, that is aligned
/// line by line. Bigger regions are shown as a plain removal and insertion.
const MAX_DIFF_CELLS: usize = 1 << 20;

/// Unified-style diff with a single hunk around the changed lines.
#[must_use]
pub fn line_diff(name: &str, old: &str, new: &str) -> String {
    let a: Vec<&str> = old.lines().collect();
    let b: Vec<&str> = new.lines().collect();

    let prefix = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();
    let a_mid = &a[prefix..a.len() - suffix];
    let b_mid = &b[prefix..b.len() - suffix];

    let mut out = format!(
        "--- a/{name}\n+++ b/{name}\n@@ -{},{} +{},{} @@\n",
        prefix + 1,
        a_mid.len(),
        prefix + 1,
        b_mid.len()
    );

    let cells = (a_mid.len() + 1).saturating_mul(b_mid.len() + 1);
    if cells > MAX_DIFF_CELLS {
        for line in a_mid {
            out.push_str(&format!("-{line}\n"));
        }
        for line in b_mid {
            out.push_str(&format!("+{line}\n"));
        }
        return out;
    }

    // LCS table over the changed middle only.
    let mut lcs = vec![vec![0u32; b_mid.len() + 1]; a_mid.len() + 1];
    for i in (0..a_mid.len()).rev() {
        for j in (0..b_mid.len()).rev() {
            lcs[i][j] = if a_mid[i] == b_mid[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < a_mid.len() || j < b_mid.len() {
        if i < a_mid.len() && j < b_mid.len() && a_mid[i] == b_mid[j] {
            out.push_str(&format!(" {}\n", a_mid[i]));
            i += 1;
            j += 1;
        } else if i < a_mid.len() && (j == b_mid.len() || lcs[i + 1][j] >= lcs[i][j + 1]) {
            out.push_str(&format!("-{}\n", a_mid[i]));
            i += 1;
        } else {
            out.push_str(&format!("+{}\n", b_mid[j]));
            j += 1;
        }
    }
    out
}
