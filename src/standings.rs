//! Deterministic ordering of the standings board.
//!
//! Ranking keys, highest priority first: points, wins, podiums (absent counts as 0), then
//! the normalized surname+name, then the racing number. The last two keys only exist to make
//! the order total so repeated renders of the same board always agree on the champion.

use crate::model::CompetitorRecord;
use std::cmp::Ordering;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// Case-fold, strip diacritics and drop everything that is not `[a-z0-9]`.
pub fn normalize_name(raw: &str) -> String {
    raw.trim()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

fn name_key(rec: &CompetitorRecord) -> String {
    let mut key = normalize_name(&rec.surname);
    key.push_str(&normalize_name(&rec.name));
    key
}

/// Total order used by [`rank`]. `Ordering::Less` means `a` ranks ahead of `b`.
pub fn compare(a: &CompetitorRecord, b: &CompetitorRecord) -> Ordering {
    b.points
        .cmp(&a.points)
        .then_with(|| b.wins.unwrap_or(0).cmp(&a.wins.unwrap_or(0)))
        .then_with(|| b.podiums.unwrap_or(0).cmp(&a.podiums.unwrap_or(0)))
        .then_with(|| name_key(a).cmp(&name_key(b)))
        .then_with(|| a.number.cmp(&b.number))
}

/// Rank the board without touching it.
pub fn rank(board: &[CompetitorRecord]) -> Vec<&CompetitorRecord> {
    let mut ranked: Vec<&CompetitorRecord> = board.iter().collect();
    ranked.sort_by(|a, b| compare(a, b));
    ranked
}

pub fn champion(board: &[CompetitorRecord]) -> Option<&CompetitorRecord> {
    board.iter().min_by(|a, b| compare(a, b))
}
