//! Reconciliation planner: turns two tag inventories into reviewable changes.
//!
//! The source inventory is authoritative. Every source tag is matched against
//! the target inventory:
//!
//! - same normalized key: no-op, or a cosmetic rename when spellings differ
//! - best candidate at or above the threshold: rename that target tag
//! - otherwise: add the source tag as new vocabulary
//!
//! The result is sorted with [`review_order`](crate::change::review_order).

use std::collections::BTreeMap;

use tracing::debug;

use crate::change::{sort_for_review, ChangeKind, ChangeTarget, ProposedChange};
use crate::config::{ConflictPolicy, ReconcileConfig};
use crate::error::Result;
use crate::similarity::{best_match, rank, MatchCandidate, MatchKind};
use crate::tag::{NoteId, Tag, TagInventory};

/// A source tag's claim on an existing target tag.
struct Claim {
    order: usize,
    candidate: MatchCandidate,
}

/// Plan the changes that bring `target` in line with `source`.
///
/// # Errors
///
/// Returns [`TagsyncError::InvariantViolation`](crate::TagsyncError::InvariantViolation)
/// when either inventory holds duplicate normalized keys, before anything is
/// matched.
pub fn plan(
    source: &TagInventory,
    target: &TagInventory,
    config: &ReconcileConfig,
) -> Result<Vec<ProposedChange>> {
    source.ensure_unique()?;
    target.ensure_unique()?;

    let threshold = config.similarity_threshold;
    let target_tags: Vec<&Tag> = target.iter().map(|t| &t.tag).collect();

    let mut changes = Vec::with_capacity(source.len());
    let mut claims: BTreeMap<String, Vec<Claim>> = BTreeMap::new();

    for (order, entry) in source.iter().enumerate() {
        let src = &entry.tag;

        let candidate = match target.get(src.key()) {
            Some(existing) => Some(MatchCandidate::new(src, &existing.tag, threshold)),
            None => best_match(src, target_tags.iter().copied(), threshold)?,
        };

        match candidate {
            Some(c) if c.kind != MatchKind::None => {
                claims
                    .entry(c.target.key().to_string())
                    .or_default()
                    .push(Claim {
                        order,
                        candidate: c,
                    });
            }
            Some(c) => {
                debug!(tag = %src, best = %c.target, score = c.score, "no match above threshold");
                changes.push(ProposedChange::add(
                    src.clone(),
                    c.score,
                    format!(
                        "best match '{}' scored {}, below threshold {}",
                        c.target, c.score, threshold
                    ),
                ));
            }
            None => {
                debug!(tag = %src, "target inventory is empty");
                changes.push(ProposedChange::add(
                    src.clone(),
                    0,
                    "no existing tags to match against",
                ));
            }
        }
    }

    for (_, mut group) in claims {
        sort_claims(&mut group, config.conflict_policy);
        let mut group = group.into_iter();
        let Some(winner) = group.next() else {
            continue;
        };
        for loser in group {
            debug!(tag = %loser.candidate.source, claimed = %loser.candidate.target, "claim lost");
            changes.push(ProposedChange::add(
                loser.candidate.source.clone(),
                loser.candidate.score,
                format!(
                    "'{}' already claimed by '{}'",
                    loser.candidate.target, winner.candidate.source
                ),
            ));
        }
        changes.push(claimed_change(&winner.candidate, config));
    }

    sort_for_review(&mut changes);
    Ok(changes)
}

/// An exact claim always wins its group; the policy only orders fuzzy ones.
fn sort_claims(group: &mut [Claim], policy: ConflictPolicy) {
    let exact_first = |a: &Claim, b: &Claim| {
        let is_exact = |c: &Claim| c.candidate.kind == MatchKind::Exact;
        is_exact(b).cmp(&is_exact(a))
    };
    match policy {
        ConflictPolicy::FirstSeen => {
            group.sort_by(|a, b| exact_first(a, b).then_with(|| a.order.cmp(&b.order)));
        }
        ConflictPolicy::BestScore => group.sort_by(|a, b| {
            exact_first(a, b)
                .then_with(|| rank(&a.candidate, &b.candidate))
                .then_with(|| a.candidate.source.key().cmp(b.candidate.source.key()))
        }),
    }
}

fn claimed_change(c: &MatchCandidate, config: &ReconcileConfig) -> ProposedChange {
    match c.kind {
        MatchKind::Exact if c.source.original() != c.target.original() && config.cosmetic_renames => {
            ProposedChange::rename(
                c.target.clone(),
                c.source.clone(),
                c.score,
                format!("same key as '{}', spelling differs", c.target),
            )
        }
        MatchKind::Exact => ProposedChange::no_op(
            Some(c.target.clone()),
            c.source.clone(),
            c.score,
            format!("already present as '{}'", c.target),
        ),
        _ => ProposedChange::rename(
            c.target.clone(),
            c.source.clone(),
            c.score,
            format!(
                "fuzzy match score {} >= threshold {}",
                c.score, config.similarity_threshold
            ),
        ),
    }
}

/// Bind vocabulary-level renames to the notes that use the old tag.
///
/// Each rename becomes one change per note (in note order) at its position in
/// the plan. Renames of tags no note uses, and all adds and no-ops, stay at
/// vocabulary level.
#[must_use]
pub fn expand_to_notes(
    changes: &[ProposedChange],
    target: &TagInventory,
    include_body: bool,
) -> Vec<ProposedChange> {
    let mut expanded = Vec::with_capacity(changes.len());
    for change in changes {
        let notes = match (change.kind(), change.target(), change.old()) {
            (ChangeKind::Rename, ChangeTarget::Vocabulary, Some(old)) => target
                .get(old.key())
                .map(|entry| entry.notes(include_body))
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        if notes.is_empty() {
            expanded.push(change.clone());
        } else {
            expanded.extend(notes.into_iter().map(|note| change.for_note(note)));
        }
    }
    expanded
}

/// Bind every vocabulary-level rename in `changes` to each of `notes`.
///
/// Used for notes whose tags could not be read, so the rename is attempted
/// there and the failure is reported against the note.
#[must_use]
pub fn bind_renames_to(changes: &[ProposedChange], notes: &[NoteId]) -> Vec<ProposedChange> {
    changes
        .iter()
        .filter(|c| c.kind() == ChangeKind::Rename && *c.target() == ChangeTarget::Vocabulary)
        .flat_map(|c| notes.iter().map(|note| c.for_note(note.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TagsyncError;
    use crate::tag::{InventoryTag, Provenance, TagLocation, TagSourceKind};
    use proptest::prelude::*;

    fn remote(tags: &[&str]) -> TagInventory {
        TagInventory::collect(TagSourceKind::Remote, tags.iter().copied())
    }

    fn vault(tags: &[&str]) -> TagInventory {
        TagInventory::collect(TagSourceKind::Vault, tags.iter().copied())
    }

    fn summary(changes: &[ProposedChange]) -> Vec<String> {
        changes.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn case_only_difference_is_a_cosmetic_rename_and_abbreviation_is_untouched() {
        let changes = plan(
            &remote(&["machine-learning"]),
            &vault(&["ml", "Machine Learning"]),
            &ReconcileConfig::with_threshold(80),
        )
        .unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind(), ChangeKind::Rename);
        assert_eq!(changes[0].old().unwrap().original(), "Machine Learning");
        assert_eq!(changes[0].new_tag().original(), "machine-learning");
        assert_eq!(changes[0].confidence(), 100);
    }

    #[test]
    fn abbreviation_is_unmatched_when_planned_from_the_vault_side() {
        let changes = plan(
            &vault(&["ml", "Machine Learning"]),
            &remote(&["machine-learning"]),
            &ReconcileConfig::with_threshold(80),
        )
        .unwrap();
        let ml = changes
            .iter()
            .find(|c| c.new_tag().key() == "ml")
            .unwrap();
        assert_eq!(ml.kind(), ChangeKind::Add);
        assert!(ml.confidence() < 80);
    }

    #[test]
    fn cosmetic_renames_can_be_disabled() {
        let config = ReconcileConfig {
            cosmetic_renames: false,
            ..ReconcileConfig::default()
        };
        let changes = plan(&remote(&["Rust"]), &vault(&["rust"]), &config).unwrap();
        assert_eq!(summary(&changes), vec!["no-op rust -> Rust @ (vocabulary)"]);
    }

    #[test]
    fn identical_spelling_is_a_no_op() {
        let changes = plan(&remote(&["rust"]), &vault(&["rust"]), &ReconcileConfig::default())
            .unwrap();
        assert_eq!(changes[0].kind(), ChangeKind::NoOp);
    }

    #[test]
    fn fuzzy_match_renames_the_target_tag() {
        let changes = plan(&remote(&["rust"]), &vault(&["rusty"]), &ReconcileConfig::default())
            .unwrap();
        assert_eq!(summary(&changes), vec!["rename rusty -> rust @ (vocabulary)"]);
        assert_eq!(changes[0].confidence(), 89);
    }

    #[test]
    fn threshold_boundary_decides_rename_or_add() {
        let at = plan(&remote(&["rust"]), &vault(&["rusty"]), &ReconcileConfig::with_threshold(89))
            .unwrap();
        assert_eq!(at[0].kind(), ChangeKind::Rename);

        let above = plan(&remote(&["rust"]), &vault(&["rusty"]), &ReconcileConfig::with_threshold(90))
            .unwrap();
        assert_eq!(above[0].kind(), ChangeKind::Add);
    }

    #[test]
    fn empty_target_makes_everything_an_add() {
        let changes = plan(&remote(&["b", "a"]), &vault(&[]), &ReconcileConfig::default()).unwrap();
        assert_eq!(
            summary(&changes),
            vec!["add a @ (vocabulary)", "add b @ (vocabulary)"]
        );
    }

    #[test]
    fn duplicate_keys_are_rejected_before_matching() {
        let mut target = TagInventory::new(TagSourceKind::Vault);
        for raw in ["Rust", "rust"] {
            target.push_unchecked(InventoryTag {
                tag: Tag::new(raw),
                provenance: vec![],
            });
        }
        let err = plan(&remote(&["rust"]), &target, &ReconcileConfig::default()).unwrap_err();
        assert!(matches!(err, TagsyncError::InvariantViolation(_)));
    }

    #[test]
    fn best_score_policy_keeps_the_closest_claim() {
        // "rusts" scores 80 and "rustyy" 91 against "rusty"
        let changes = plan(
            &remote(&["rusts", "rustyy"]),
            &vault(&["rusty"]),
            &ReconcileConfig::with_threshold(70),
        )
        .unwrap();
        let rename = changes.iter().find(|c| c.kind() == ChangeKind::Rename).unwrap();
        assert_eq!(rename.new_tag().original(), "rustyy");
        let add = changes.iter().find(|c| c.kind() == ChangeKind::Add).unwrap();
        assert_eq!(add.new_tag().original(), "rusts");
        assert!(add.rationale().contains("already claimed by 'rustyy'"));
    }

    #[test]
    fn first_seen_policy_keeps_the_earliest_claim() {
        let config = ReconcileConfig {
            similarity_threshold: 70,
            conflict_policy: ConflictPolicy::FirstSeen,
            cosmetic_renames: true,
        };
        let changes = plan(&remote(&["rusts", "rustyy"]), &vault(&["rusty"]), &config).unwrap();
        let rename = changes.iter().find(|c| c.kind() == ChangeKind::Rename).unwrap();
        assert_eq!(rename.new_tag().original(), "rusts");
    }

    #[test]
    fn exact_match_wins_over_earlier_fuzzy_claim_under_every_policy() {
        for policy in [ConflictPolicy::FirstSeen, ConflictPolicy::BestScore] {
            let config = ReconcileConfig {
                similarity_threshold: 80,
                conflict_policy: policy,
                cosmetic_renames: true,
            };
            let changes = plan(&remote(&["rust", "rusty"]), &vault(&["rusty"]), &config).unwrap();
            let rusty = changes
                .iter()
                .find(|c| c.new_tag().original() == "rusty")
                .unwrap();
            assert_eq!(rusty.kind(), ChangeKind::NoOp, "{policy:?}");
            let rust = changes
                .iter()
                .find(|c| c.new_tag().original() == "rust")
                .unwrap();
            assert_eq!(rust.kind(), ChangeKind::Add, "{policy:?}");
            assert!(rust.rationale().contains("already claimed by 'rusty'"));
            assert!(changes.iter().all(|c| c.kind() != ChangeKind::Rename));
        }
    }

    #[test]
    fn expand_binds_renames_to_frontmatter_notes() {
        let mut target = TagInventory::new(TagSourceKind::Vault);
        for (note, location) in [
            ("b.md", TagLocation::Frontmatter),
            ("a.md", TagLocation::Frontmatter),
            ("c.md", TagLocation::Body),
        ] {
            target.insert(
                Tag::new("rusty"),
                Some(Provenance::Note {
                    note: NoteId::new(note),
                    location,
                }),
            );
        }
        let changes = plan(&remote(&["rust", "go"]), &target, &ReconcileConfig::default()).unwrap();

        let expanded = expand_to_notes(&changes, &target, false);
        assert_eq!(
            summary(&expanded),
            vec![
                "rename rusty -> rust @ a.md",
                "rename rusty -> rust @ b.md",
                "add go @ (vocabulary)",
            ]
        );

        let with_body = expand_to_notes(&changes, &target, true);
        assert_eq!(with_body.len(), 4);
    }

    #[test]
    fn renames_are_bound_to_unreadable_notes() {
        let changes = plan(&remote(&["rust", "go"]), &vault(&["rusty"]), &ReconcileConfig::default())
            .unwrap();
        let bound = bind_renames_to(&changes, &[NoteId::new("bad.md"), NoteId::new("worse.md")]);
        assert_eq!(
            summary(&bound),
            vec!["rename rusty -> rust @ bad.md", "rename rusty -> rust @ worse.md"]
        );
        assert!(bind_renames_to(&changes, &[]).is_empty());
    }

    proptest! {
        #[test]
        fn planning_is_deterministic(
            src in proptest::collection::vec("[a-e]{1,5}", 0..8),
            dst in proptest::collection::vec("[a-e]{1,5}", 0..8),
            threshold in 0u8..=100,
        ) {
            let source = TagInventory::collect(TagSourceKind::Remote, src.iter().cloned());
            let target = TagInventory::collect(TagSourceKind::Vault, dst.iter().cloned());
            let config = ReconcileConfig::with_threshold(threshold);
            let first = plan(&source, &target, &config).unwrap();
            let second = plan(&source, &target, &config).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
