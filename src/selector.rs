//! Weighted selection among matching candidates, with default fallback.

use crate::model::{MockEndpoint, ResponseCandidate};
use rand::Rng;

/// Outcome of selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection<'a> {
    /// Picked from the matching set
    Matched(&'a ResponseCandidate),
    /// Nothing matched; the endpoint's default was used
    Default(&'a ResponseCandidate),
    NotFound,
}

impl<'a> Selection<'a> {
    pub fn candidate(&self) -> Option<&'a ResponseCandidate> {
        match *self {
            Selection::Matched(c) | Selection::Default(c) => Some(c),
            Selection::NotFound => None,
        }
    }
}

/// Configuration problem noticed while falling back to the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionInconsistency {
    NoDefault,
    MultipleDefaults { chosen: String, ignored: Vec<String> },
}

/// Sum of weights in the set.
pub fn total_weight(matching: &[&ResponseCandidate]) -> u64 {
    matching.iter().map(|c| u64::from(c.weight.max(1))).sum()
}

/// Walk the set in order, accumulating weights, and return the first
/// candidate whose running total exceeds `draw`. `draw` must be in
/// `[0, total_weight)`.
pub fn pick_by_draw<'a>(matching: &[&'a ResponseCandidate], draw: u64) -> Option<&'a ResponseCandidate> {
    let mut running = 0u64;
    for candidate in matching {
        running += u64::from(candidate.weight.max(1));
        if draw < running {
            return Some(*candidate);
        }
    }
    matching.last().copied()
}

/// Weight-proportional random pick. `None` only for an empty set.
pub fn select_weighted<'a, R: Rng + ?Sized>(
    matching: &[&'a ResponseCandidate],
    rng: &mut R,
) -> Option<&'a ResponseCandidate> {
    match matching {
        [] => None,
        [only] => Some(*only),
        _ => {
            let total = total_weight(matching);
            pick_by_draw(matching, rng.gen_range(0..total))
        }
    }
}

/// The endpoint's default candidate. With several flagged, the earliest
/// created wins and the rest are reported.
pub fn default_candidate(
    endpoint: &MockEndpoint,
) -> (Option<&ResponseCandidate>, Option<SelectionInconsistency>) {
    let mut defaults = endpoint.defaults();
    let chosen = match defaults.next() {
        Some(chosen) => chosen,
        None => return (None, Some(SelectionInconsistency::NoDefault)),
    };

    let ignored: Vec<String> = defaults.map(|c| c.id.clone()).collect();
    if ignored.is_empty() {
        (Some(chosen), None)
    } else {
        (
            Some(chosen),
            Some(SelectionInconsistency::MultipleDefaults {
                chosen: chosen.id.clone(),
                ignored,
            }),
        )
    }
}

/// Pick a candidate: weighted among `matching`, else the default, else
/// nothing. The default's own conditions are not re-checked.
pub fn select<'a, R: Rng + ?Sized>(
    endpoint: &'a MockEndpoint,
    matching: &[&'a ResponseCandidate],
    rng: &mut R,
) -> (Selection<'a>, Option<SelectionInconsistency>) {
    if let Some(candidate) = select_weighted(matching, rng) {
        return (Selection::Matched(candidate), None);
    }

    match default_candidate(endpoint) {
        (Some(candidate), inconsistency) => (Selection::Default(candidate), inconsistency),
        (None, inconsistency) => (Selection::NotFound, inconsistency),
    }
}
