//! Tag similarity scoring and best-match selection.
//!
//! The score is an indel ratio over the normalized keys: twice the length of
//! the longest common subsequence divided by the combined length, scaled to
//! 0..=100 and rounded half up. It is symmetric and depends only on the two
//! keys.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TagsyncError};
use crate::tag::Tag;

/// How a candidate pair relates under a given threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    /// Normalized keys are equal.
    Exact,
    /// Keys differ but the score reaches the threshold.
    Fuzzy,
    /// Score is below the threshold.
    None,
}

/// A scored pairing of a source tag with one target tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchCandidate {
    pub source: Tag,
    pub target: Tag,
    pub score: u8,
    /// Levenshtein distance between the keys, used for tie-breaking.
    pub distance: usize,
    pub kind: MatchKind,
}

impl MatchCandidate {
    #[must_use]
    pub fn new(source: &Tag, target: &Tag, threshold: u8) -> Self {
        let score = score(source, target);
        Self {
            source: source.clone(),
            target: target.clone(),
            score,
            distance: levenshtein(source.key(), target.key()),
            kind: classify(source, target, score, threshold),
        }
    }
}

/// Similarity of two tags in `0..=100`.
#[must_use]
pub fn score(a: &Tag, b: &Tag) -> u8 {
    score_keys(a.key(), b.key())
}

/// Similarity of two normalized keys in `0..=100`.
#[must_use]
pub fn score_keys(a: &str, b: &str) -> u8 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100;
    }
    let lcs = lcs_len(&a, &b);
    let scaled = (200 * lcs + total / 2) / total;
    // lcs <= min(len) so scaled <= 100
    u8::try_from(scaled).unwrap_or(100)
}

/// Classify a scored pair. A score equal to the threshold is fuzzy.
#[must_use]
pub fn classify(source: &Tag, target: &Tag, score: u8, threshold: u8) -> MatchKind {
    if source.same_key(target) {
        MatchKind::Exact
    } else if score >= threshold {
        MatchKind::Fuzzy
    } else {
        MatchKind::None
    }
}

/// Ordering used everywhere a "best" candidate is chosen.
///
/// Higher score first, then smaller edit distance, then the target key in
/// lexicographic order, then the target's original spelling.
#[must_use]
pub fn rank(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    b.score
        .cmp(&a.score)
        .then(a.distance.cmp(&b.distance))
        .then_with(|| a.target.key().cmp(b.target.key()))
        .then_with(|| a.target.original().cmp(b.target.original()))
}

/// Pick the best-ranked target for `source`.
///
/// Returns `Ok(None)` when `targets` is empty.
///
/// # Errors
///
/// Returns [`TagsyncError::InvariantViolation`] when the two top candidates
/// cannot be told apart by [`rank`].
pub fn best_match<'a, I>(source: &Tag, targets: I, threshold: u8) -> Result<Option<MatchCandidate>>
where
    I: IntoIterator<Item = &'a Tag>,
{
    let mut candidates: Vec<MatchCandidate> = targets
        .into_iter()
        .map(|t| MatchCandidate::new(source, t, threshold))
        .collect();
    candidates.sort_by(rank);

    if let [first, second, ..] = candidates.as_slice() {
        if rank(first, second) == Ordering::Equal {
            return Err(TagsyncError::InvariantViolation(format!(
                "cannot break tie between '{}' and '{}' for source tag '{}'",
                first.target, second.target, source
            )));
        }
    }
    Ok(candidates.into_iter().next())
}

/// Edit distance (insert, delete, substitute) between two strings by chars.
#[must_use]
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn t(s: &str) -> Tag {
        Tag::new(s)
    }

    #[test]
    fn identical_keys_score_100() {
        assert_eq!(score(&t("Rust"), &t("rust")), 100);
        assert_eq!(score_keys("", ""), 100);
    }

    #[test]
    fn disjoint_keys_score_0() {
        assert_eq!(score(&t("abc"), &t("xyz")), 0);
        assert_eq!(score_keys("abc", ""), 0);
    }

    #[test]
    fn abbreviation_scores_well_below_default_threshold() {
        let s = score(&t("ml"), &t("machine-learning"));
        assert!(s < 30, "got {s}");
    }

    #[test]
    fn known_ratio_values() {
        // lcs("kitten", "sitting") = 4 ("ittn"), 200*4/13 = 61.5 -> 62
        assert_eq!(score_keys("kitten", "sitting"), 62);
        // one extra char out of 9: 200*4/9 = 88.9 -> 89
        assert_eq!(score_keys("rust", "rusty"), 89);
    }

    #[test]
    fn threshold_boundary_is_inclusive() {
        let a = t("rust");
        let b = t("rusty");
        let s = score(&a, &b);
        assert_eq!(classify(&a, &b, s, s), MatchKind::Fuzzy);
        assert_eq!(classify(&a, &b, s, s + 1), MatchKind::None);
        assert_eq!(classify(&a, &t("RUST"), 100, 100), MatchKind::Exact);
    }

    #[test]
    fn levenshtein_distances() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn best_match_breaks_score_ties_by_distance_then_key() {
        // "ab" vs "abc" and "ab" vs "xab": both lcs 2 of 5 -> score 80, distance 1
        // so the key order decides.
        let best = best_match(&t("ab"), [&t("xab"), &t("abc")], 80)
            .unwrap()
            .unwrap();
        assert_eq!(best.target.key(), "abc");
        assert_eq!(best.kind, MatchKind::Fuzzy);
    }

    #[test]
    fn best_match_prefers_smaller_edit_distance_on_equal_score() {
        // "abcd"/"abdc": lcs 3 -> 75, distance 2; "abcd"/"abce": lcs 3 -> 75, distance 1
        let best = best_match(&t("abcd"), [&t("abdc"), &t("abce")], 50)
            .unwrap()
            .unwrap();
        assert_eq!(best.target.key(), "abce");
    }

    #[test]
    fn best_match_on_empty_targets_is_none() {
        let targets: Vec<Tag> = Vec::new();
        assert!(best_match(&t("a"), &targets, 80).unwrap().is_none());
    }

    #[test]
    fn best_match_rejects_indistinguishable_targets() {
        let err = best_match(&t("rust"), [&t("go"), &t("go")], 80).unwrap_err();
        assert!(matches!(err, TagsyncError::InvariantViolation(_)));
    }

    proptest! {
        #[test]
        fn score_is_symmetric(a in "[a-z -]{0,12}", b in "[a-z -]{0,12}") {
            prop_assert_eq!(score(&t(&a), &t(&b)), score(&t(&b), &t(&a)));
        }

        #[test]
        fn score_of_self_is_100(a in "[A-Za-z0-9 _/-]{0,16}") {
            prop_assert_eq!(score(&t(&a), &t(&a)), 100);
        }

        #[test]
        fn score_is_bounded(a in "\\PC{0,10}", b in "\\PC{0,10}") {
            prop_assert!(score(&t(&a), &t(&b)) <= 100);
        }
    }
}
